// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Orchestrator Configuration
//
// Settings read once at startup and handed to every component:
// - where managed instances live (persistence directory) and log
// - the messaging identity stamped into every generated artifact
// - announcement / readiness retry bounds
// - executable names per service kind

use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Root for managed instances; its presence means "a fleet may be running"
    #[serde(default = "default_persistence_dir")]
    pub persistence_dir: PathBuf,

    /// Directory receiving per-service log files
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,

    /// Where generated config artifacts are written (OS temp dir if unset)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_dir: Option<PathBuf>,

    /// Messaging exchange shared by the fleet (fresh UUID per run if unset)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exchange: Option<String>,

    #[serde(default)]
    pub messaging: MessagingConfig,

    #[serde(default)]
    pub announce: AnnounceConfig,

    #[serde(default)]
    pub readiness: ReadinessConfig,

    #[serde(default)]
    pub executables: ExecutablesConfig,

    /// Fallback installation directory for container-launched services
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_directory: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagingConfig {
    #[serde(default = "default_broker_host")]
    pub host: String,

    #[serde(default = "default_broker_port")]
    pub port: u16,

    #[serde(default = "default_broker_credential")]
    pub username: String,

    #[serde(default = "default_broker_credential")]
    pub password: String,

    #[serde(default = "default_vhost")]
    pub vhost: String,

    /// Base URL of the RPC gateway used to call running services
    #[serde(default = "default_rpc_endpoint")]
    pub rpc_endpoint: String,

    /// Per-call RPC timeout in seconds
    #[serde(default = "default_call_timeout")]
    pub call_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnnounceConfig {
    /// Maximum announcement attempts per node
    #[serde(default = "default_announce_attempts")]
    pub max_attempts: u32,

    /// One backoff time unit; attempt `n` waits `2^n` units after a timeout
    #[serde(default = "default_backoff_unit_ms")]
    pub backoff_unit_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessConfig {
    #[serde(default = "default_readiness_attempts")]
    pub max_attempts: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutablesConfig {
    #[serde(default = "default_scheduler_exe")]
    pub scheduler: String,
    #[serde(default = "default_agent_exe")]
    pub agent: String,
    #[serde(default = "default_provisioner_exe")]
    pub provisioner: String,
    #[serde(default = "default_registry_exe")]
    pub registry: String,
    #[serde(default = "default_elasticity_manager_exe")]
    pub elasticity_manager: String,
    #[serde(default = "default_frontend_exe")]
    pub frontend: String,
    /// Container launcher, relative to the installation directory
    #[serde(default = "default_container_launcher")]
    pub container_launcher: String,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            persistence_dir: default_persistence_dir(),
            log_dir: default_log_dir(),
            artifact_dir: None,
            exchange: None,
            messaging: MessagingConfig::default(),
            announce: AnnounceConfig::default(),
            readiness: ReadinessConfig::default(),
            executables: ExecutablesConfig::default(),
            container_directory: None,
        }
    }
}

impl Default for MessagingConfig {
    fn default() -> Self {
        Self {
            host: default_broker_host(),
            port: default_broker_port(),
            username: default_broker_credential(),
            password: default_broker_credential(),
            vhost: default_vhost(),
            rpc_endpoint: default_rpc_endpoint(),
            call_timeout_secs: default_call_timeout(),
        }
    }
}

impl MessagingConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    /// Transport section embedded as `server.amqp` in generated artifacts
    pub fn transport_section(&self, exchange: &str) -> Mapping {
        let mut amqp = Mapping::new();
        amqp.insert("host".into(), Value::from(self.host.clone()));
        amqp.insert("port".into(), Value::from(self.port));
        amqp.insert("username".into(), Value::from(self.username.clone()));
        amqp.insert("password".into(), Value::from(self.password.clone()));
        amqp.insert("vhost".into(), Value::from(self.vhost.clone()));
        amqp.insert("exchange".into(), Value::from(exchange));
        amqp
    }
}

impl Default for AnnounceConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_announce_attempts(),
            backoff_unit_ms: default_backoff_unit_ms(),
        }
    }
}

impl AnnounceConfig {
    pub fn backoff_unit(&self) -> Duration {
        Duration::from_millis(self.backoff_unit_ms)
    }
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_readiness_attempts(),
        }
    }
}

impl Default for ExecutablesConfig {
    fn default() -> Self {
        Self {
            scheduler: default_scheduler_exe(),
            agent: default_agent_exe(),
            provisioner: default_provisioner_exe(),
            registry: default_registry_exe(),
            elasticity_manager: default_elasticity_manager_exe(),
            frontend: default_frontend_exe(),
            container_launcher: default_container_launcher(),
        }
    }
}

impl OrchestratorConfig {
    /// Load configuration from YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Parse configuration from YAML string
    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        let config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    pub fn to_yaml_string(&self) -> anyhow::Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Discover configuration file using precedence order
    /// 1. CONVOY_CONFIG_PATH environment variable
    /// 2. ./convoy-config.yaml (working directory)
    /// 3. ~/.convoy/config.yaml (user home)
    /// 4. /etc/convoy/config.yaml (system)
    pub fn discover_config() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("CONVOY_CONFIG_PATH") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        let cwd = PathBuf::from("./convoy-config.yaml");
        if cwd.exists() {
            return Some(cwd);
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".convoy").join("config.yaml");
            if user_config.exists() {
                return Some(user_config);
            }
        }

        let system_config = PathBuf::from("/etc/convoy/config.yaml");
        if system_config.exists() {
            return Some(system_config);
        }

        None
    }

    /// Load configuration with discovery, fallback to default
    pub fn load_or_default(cli_path: Option<PathBuf>) -> anyhow::Result<Self> {
        // Explicit CLI path must exist
        if let Some(path) = cli_path {
            tracing::info!("Loading configuration from explicit path: {:?}", path);
            let mut config = Self::from_yaml_file(&path).map_err(|e| {
                anyhow::anyhow!("Failed to load config at {:?}: {}", path, e)
            })?;
            config.apply_env_overrides();
            return Ok(config);
        }

        if let Some(config_path) = Self::discover_config() {
            tracing::info!("Loading configuration from discovered path: {:?}", config_path);
            let mut config = Self::from_yaml_file(config_path)?;
            config.apply_env_overrides();
            Ok(config)
        } else {
            tracing::debug!("No configuration file found in standard locations. Using defaults.");
            let mut config = Self::default();
            config.apply_env_overrides();
            Ok(config)
        }
    }

    /// Apply environment variable overrides to configuration
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("CONVOY_PERSISTENCE_DIR") {
            if !val.is_empty() {
                tracing::info!("Environment override: CONVOY_PERSISTENCE_DIR={}", val);
                self.persistence_dir = PathBuf::from(val);
            }
        }

        if let Ok(val) = std::env::var("CONVOY_LOG_DIR") {
            if !val.is_empty() {
                tracing::info!("Environment override: CONVOY_LOG_DIR={}", val);
                self.log_dir = PathBuf::from(val);
            }
        }

        if let Ok(val) = std::env::var("CONVOY_EXCHANGE") {
            if !val.is_empty() {
                tracing::info!("Environment override: CONVOY_EXCHANGE={}", val);
                self.exchange = Some(val);
            }
        }

        if let Ok(val) = std::env::var("CONVOY_RPC_ENDPOINT") {
            if !val.is_empty() {
                tracing::info!("Environment override: CONVOY_RPC_ENDPOINT={}", val);
                self.messaging.rpc_endpoint = val;
            }
        }
    }

    /// Pin the exchange for this run, generating one if none is configured
    pub fn resolve_exchange(&mut self) -> String {
        let exchange = self
            .exchange
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        self.exchange = Some(exchange.clone());
        exchange
    }

    /// Directory for generated artifacts
    pub fn artifact_dir(&self) -> PathBuf {
        self.artifact_dir.clone().unwrap_or_else(std::env::temp_dir)
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.persistence_dir.as_os_str().is_empty() {
            anyhow::bail!("persistence_dir cannot be empty");
        }

        if self.announce.max_attempts == 0 {
            anyhow::bail!("announce.max_attempts must be at least 1");
        }

        if self.readiness.max_attempts == 0 {
            anyhow::bail!("readiness.max_attempts must be at least 1");
        }

        if self.messaging.rpc_endpoint.is_empty() {
            anyhow::bail!("messaging.rpc_endpoint cannot be empty");
        }

        let executables = [
            ("scheduler", &self.executables.scheduler),
            ("agent", &self.executables.agent),
            ("provisioner", &self.executables.provisioner),
            ("registry", &self.executables.registry),
            ("elasticity_manager", &self.executables.elasticity_manager),
            ("frontend", &self.executables.frontend),
            ("container_launcher", &self.executables.container_launcher),
        ];
        for (kind, exe) in executables {
            if exe.trim().is_empty() {
                anyhow::bail!("executables.{} cannot be empty", kind);
            }
        }

        Ok(())
    }
}

// Default value functions
fn default_persistence_dir() -> PathBuf {
    std::env::temp_dir().join("convoy").join("supervision")
}

fn default_log_dir() -> PathBuf {
    std::env::temp_dir().join("convoy").join("logs")
}

fn default_broker_host() -> String {
    "localhost".to_string()
}

fn default_broker_port() -> u16 {
    5672
}

fn default_broker_credential() -> String {
    "guest".to_string()
}

fn default_vhost() -> String {
    "/".to_string()
}

fn default_rpc_endpoint() -> String {
    "http://127.0.0.1:15680".to_string()
}

fn default_call_timeout() -> u64 {
    5
}

fn default_announce_attempts() -> u32 {
    10
}

fn default_backoff_unit_ms() -> u64 {
    1000
}

fn default_readiness_attempts() -> u32 {
    10
}

fn default_scheduler_exe() -> String {
    "epu-processdispatcher-service".to_string()
}

fn default_agent_exe() -> String {
    "eeagent".to_string()
}

fn default_provisioner_exe() -> String {
    "epu-provisioner-service".to_string()
}

fn default_registry_exe() -> String {
    "epu-dtrs".to_string()
}

fn default_elasticity_manager_exe() -> String {
    "epu-management-service".to_string()
}

fn default_frontend_exe() -> String {
    "phantomcherrypy".to_string()
}

fn default_container_launcher() -> String {
    "bin/pycc".to_string()
}
