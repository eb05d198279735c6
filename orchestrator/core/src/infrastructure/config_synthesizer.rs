// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Config Synthesizer
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure
//! - **Purpose:** Build one fully populated config artifact per managed
//!   instance
//!
//! Every kind starts from a default skeleton (messaging identity, log
//! routing, service identity), has the descriptor's override fragment deep
//! merged over it, and is written to a uniquely named file that the
//! instance's command line then references.
//!
//! # Artifact Layout
//!
//! ```yaml
//! server:
//!   amqp: { host, port, username, password, vhost, exchange }
//! logging:
//!   loggers: { <section>: { handlers: [file, console] } }
//!   handlers: { file: { filename: <log_dir>/<name>[-<i>].log } }
//!   root: { handlers: [file, console] }
//! <section>:
//!   service_name: <name>
//!   ...
//! ```

use serde_yaml::{Mapping, Value};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::domain::config::OrchestratorConfig;
use crate::domain::descriptor::FrontendUser;
use crate::domain::error::HarnessError;
use crate::domain::node::LaunchMode;
use crate::domain::service::{replica_name, AgentProfile, ServiceKind};
use crate::infrastructure::merge::deep_merge;

/// File suffix that marks a path on a command line as a generated artifact
pub const ARTIFACT_SUFFIX: &str = ".yml";
pub const AUTHZ_SUFFIX: &str = ".authz";

const AGENT_LOGFILE_DEFAULT: &str = "/dev/null";
const CONTAINER_AGENT_HEARTBEAT: u32 = 10;
const CONTAINER_AGENT_SLOTS: u32 = 80;
const CONTAINER_SUPERVISOR_DIR: &str = "/tmp/";

/// A written artifact and the document it holds
#[derive(Debug, Clone)]
pub struct GeneratedConfig {
    pub path: PathBuf,
    pub document: Mapping,
    /// Present for container-hosted kinds
    pub container: Option<ContainerTarget>,
}

/// Where a container-hosted service is installed and which system it joins
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerTarget {
    pub install_directory: PathBuf,
    pub system_name: Option<String>,
}

pub struct ConfigSynthesizer {
    exchange: String,
    transport: Mapping,
    broker_host: String,
    broker_port: u16,
    broker_user: String,
    broker_password: String,
    log_dir: PathBuf,
    artifact_dir: PathBuf,
    container_directory: Option<PathBuf>,
}

impl ConfigSynthesizer {
    pub fn new(config: &OrchestratorConfig, exchange: impl Into<String>) -> Self {
        let exchange = exchange.into();
        Self {
            transport: config.messaging.transport_section(&exchange),
            exchange,
            broker_host: config.messaging.host.clone(),
            broker_port: config.messaging.port,
            broker_user: config.messaging.username.clone(),
            broker_password: config.messaging.password.clone(),
            log_dir: config.log_dir.clone(),
            artifact_dir: config.artifact_dir(),
            container_directory: config.container_directory.clone(),
        }
    }

    pub fn exchange(&self) -> &str {
        &self.exchange
    }

    /// Synthesize and write the artifact for one instance (or one replica
    /// of it)
    pub fn build_config(
        &self,
        kind: &ServiceKind,
        instance_name: &str,
        overrides: &Mapping,
        replica: Option<u32>,
    ) -> Result<GeneratedConfig, HarnessError> {
        let proc_name = replica.map(|index| replica_name(instance_name, index));
        let log_name = match replica {
            Some(index) if index > 0 => format!("{}-{}", instance_name, index),
            _ => instance_name.to_string(),
        };

        let skeleton = match kind {
            ServiceKind::Provisioner => {
                let mut section = self.identity(instance_name, proc_name.as_deref());
                let dt_path = match overrides
                    .get("provisioner")
                    .and_then(|p| p.get("dt_path"))
                    .filter(|v| !v.is_null())
                {
                    Some(path) => path.clone(),
                    None => Value::from(self.fresh_dt_path()?.display().to_string()),
                };
                section.insert("dt_path".into(), dt_path);
                self.service_skeleton(kind, &log_name, section)
            }
            ServiceKind::Registry | ServiceKind::ElasticityManager => {
                let section = self.identity(instance_name, proc_name.as_deref());
                self.service_skeleton(kind, &log_name, section)
            }
            ServiceKind::Scheduler => {
                let mut section = self.identity(instance_name, proc_name.as_deref());
                section.insert("static_resources".into(), Value::Bool(true));
                self.service_skeleton(kind, &log_name, section)
            }
            ServiceKind::Agent(profile) => self.agent_skeleton(instance_name, profile)?,
            ServiceKind::ContainerScheduler => self.service_skeleton(kind, &log_name, Mapping::new()),
            ServiceKind::ContainerAgent { node } => {
                let mut launch_type = Mapping::new();
                launch_type.insert("name".into(), "pyon".into());
                launch_type.insert("supd_directory".into(), CONTAINER_SUPERVISOR_DIR.into());

                let mut section = Mapping::new();
                section.insert("name".into(), Value::from(format!("eeagent_{}", node)));
                section.insert("node_id".into(), Value::from(node.as_str()));
                section.insert("heartbeat".into(), Value::from(CONTAINER_AGENT_HEARTBEAT));
                section.insert("slots".into(), Value::from(CONTAINER_AGENT_SLOTS));
                section.insert("launch_type".into(), Value::Mapping(launch_type));
                self.service_skeleton(kind, &log_name, section)
            }
            ServiceKind::Frontend { authz_file } => {
                let mut document = self.common_skeleton(kind, &log_name);
                document.insert("phantom".into(), Value::Mapping(self.frontend_section(authz_file)));
                document
            }
        };

        let merged = deep_merge(&skeleton, overrides);

        let (document, container) = if kind.is_container() {
            let target = self.container_target(kind, &merged)?;
            (release_document(kind, instance_name, merged), Some(target))
        } else {
            (merged, None)
        };

        let path = self.write_artifact(instance_name, ARTIFACT_SUFFIX, &serde_yaml::to_string(&document)?)?;
        debug!("Wrote {} config for '{}' to {:?}", kind, instance_name, path);

        Ok(GeneratedConfig {
            path,
            document,
            container,
        })
    }

    /// Credentials file for a frontend: `<user>\n<password>\n` per user
    pub fn write_authz_file(&self, instance_name: &str, users: &[FrontendUser]) -> Result<PathBuf, HarnessError> {
        let contents: String = users
            .iter()
            .map(|u| format!("{}\n{}\n", u.user, u.password))
            .collect();
        self.write_artifact(instance_name, AUTHZ_SUFFIX, &contents)
    }

    fn identity(&self, service_name: &str, proc_name: Option<&str>) -> Mapping {
        let mut section = Mapping::new();
        section.insert("service_name".into(), Value::from(service_name));
        if let Some(proc_name) = proc_name {
            section.insert("proc_name".into(), Value::from(proc_name));
        }
        section
    }

    fn service_skeleton(&self, kind: &ServiceKind, log_name: &str, section: Mapping) -> Mapping {
        let mut document = self.common_skeleton(kind, log_name);
        if !section.is_empty() {
            document.insert(kind.config_section().into(), Value::Mapping(section));
        }
        document
    }

    fn common_skeleton(&self, kind: &ServiceKind, log_name: &str) -> Mapping {
        let logfile = self.log_dir.join(format!("{}.log", log_name));
        self.skeleton_with_log(kind, &logfile, None)
    }

    fn skeleton_with_log(&self, kind: &ServiceKind, logfile: &Path, level: Option<&str>) -> Mapping {
        let handlers = Value::Sequence(vec!["file".into(), "console".into()]);

        let mut logger = Mapping::new();
        if let Some(level) = level {
            logger.insert("level".into(), Value::from(level));
        }
        logger.insert("handlers".into(), handlers.clone());

        let mut loggers = Mapping::new();
        loggers.insert(kind.config_section().into(), Value::Mapping(logger));

        let mut file = Mapping::new();
        file.insert("filename".into(), Value::from(logfile.display().to_string()));
        let mut log_handlers = Mapping::new();
        log_handlers.insert("file".into(), Value::Mapping(file));

        let mut root = Mapping::new();
        root.insert("handlers".into(), handlers);

        let mut logging = Mapping::new();
        logging.insert("loggers".into(), Value::Mapping(loggers));
        logging.insert("handlers".into(), Value::Mapping(log_handlers));
        logging.insert("root".into(), Value::Mapping(root));

        let mut server = Mapping::new();
        server.insert("amqp".into(), Value::Mapping(self.transport.clone()));

        let mut document = Mapping::new();
        document.insert("server".into(), Value::Mapping(server));
        document.insert("logging".into(), Value::Mapping(logging));
        document
    }

    fn agent_skeleton(&self, name: &str, profile: &AgentProfile) -> Result<Mapping, HarnessError> {
        let mut launch_type = Mapping::new();
        launch_type.insert("name".into(), Value::from(profile.launch_mode.name()));

        let mut container_args = String::new();
        match &profile.launch_mode {
            LaunchMode::Supervised { directory } => {
                let directory = directory.as_ref().ok_or_else(|| {
                    HarnessError::DeploymentDescription(format!(
                        "agent '{}' uses the supd launch type but names no supd directory",
                        name
                    ))
                })?;
                if !directory.exists() {
                    std::fs::create_dir_all(directory).map_err(|e| HarnessError::io(directory, e))?;
                } else {
                    debug!("{:?} already exists. Continuing.", directory);
                }
                launch_type.insert("supd_directory".into(), Value::from(directory.display().to_string()));
                launch_type.insert("pyon_directory".into(), Value::Null);
            }
            LaunchMode::Fork => {
                launch_type.insert("supd_directory".into(), Value::Null);
                launch_type.insert("pyon_directory".into(), Value::Null);
            }
            LaunchMode::Container {
                install_directory,
                system_name,
                ..
            } => {
                let install_directory = install_directory.as_ref().ok_or_else(|| {
                    HarnessError::DeploymentDescription(format!(
                        "agent '{}' uses a container launch type but names no installation directory",
                        name
                    ))
                })?;
                container_args.push_str("--noshell");
                if let Some(system_name) = system_name {
                    container_args.push_str(&format!(" -s {}", system_name));
                }
                launch_type.insert("supd_directory".into(), Value::Null);
                launch_type.insert(
                    "pyon_directory".into(),
                    Value::from(install_directory.display().to_string()),
                );
            }
        }
        launch_type.insert("container_args".into(), Value::from(container_args));

        let mut section = Mapping::new();
        section.insert("name".into(), Value::from(name));
        section.insert("slots".into(), Value::from(profile.slots));
        section.insert("heartbeat".into(), Value::from(profile.heartbeat));
        section.insert("node_id".into(), Value::from(profile.node_id.as_str()));
        section.insert("launch_type".into(), Value::Mapping(launch_type));

        let mut pd = Mapping::new();
        pd.insert("name".into(), Value::from(profile.scheduler.as_str()));

        let logfile = profile
            .logfile
            .clone()
            .unwrap_or_else(|| PathBuf::from(AGENT_LOGFILE_DEFAULT));
        let kind = ServiceKind::Agent(profile.clone());
        let mut document = self.skeleton_with_log(&kind, &logfile, Some("DEBUG"));
        document.insert("eeagent".into(), Value::Mapping(section));
        document.insert("pd".into(), Value::Mapping(pd));
        Ok(document)
    }

    fn frontend_section(&self, authz_file: &Path) -> Mapping {
        let mut system = Mapping::new();
        system.insert("type".into(), "epu".into());
        system.insert("broker".into(), Value::from(self.broker_host.as_str()));
        system.insert("broker_port".into(), Value::from(self.broker_port));
        system.insert("broker_ssl".into(), "False".into());
        system.insert("rabbit_user".into(), Value::from(self.broker_user.as_str()));
        system.insert("rabbit_pw".into(), Value::from(self.broker_password.as_str()));
        system.insert("rabbit_exchange".into(), Value::from(self.exchange.as_str()));

        let mut authz = Mapping::new();
        authz.insert("type".into(), "simple_file".into());
        authz.insert("filename".into(), Value::from(authz_file.display().to_string()));

        let mut phantom = Mapping::new();
        phantom.insert("system".into(), Value::Mapping(system));
        phantom.insert("authz".into(), Value::Mapping(authz));
        phantom
    }

    fn container_target(&self, kind: &ServiceKind, merged: &Mapping) -> Result<ContainerTarget, HarnessError> {
        let declared = match kind {
            ServiceKind::ContainerAgent { .. } => merged
                .get("eeagent")
                .and_then(|e| e.get("launch_type"))
                .and_then(|l| l.get("pyon_directory")),
            _ => merged.get("pyon_directory"),
        };

        let install_directory = declared
            .and_then(Value::as_str)
            .map(PathBuf::from)
            .or_else(|| self.container_directory.clone())
            .ok_or_else(|| {
                HarnessError::Harness(format!(
                    "No installation directory for {} in deployment or orchestrator configuration",
                    kind
                ))
            })?;

        let system_name = merged
            .get("system")
            .and_then(|s| s.get("name"))
            .and_then(Value::as_str)
            .map(str::to_string);

        Ok(ContainerTarget {
            install_directory,
            system_name,
        })
    }

    fn fresh_dt_path(&self) -> Result<PathBuf, HarnessError> {
        let dir = tempfile::Builder::new()
            .prefix("dt_")
            .tempdir()
            .map_err(|e| HarnessError::io(std::env::temp_dir(), e))?;
        Ok(dir.keep())
    }

    fn write_artifact(&self, name: &str, suffix: &str, contents: &str) -> Result<PathBuf, HarnessError> {
        std::fs::create_dir_all(&self.artifact_dir).map_err(|e| HarnessError::io(&self.artifact_dir, e))?;

        let mut file = tempfile::Builder::new()
            .prefix(&format!("{}_", name))
            .suffix(suffix)
            .tempfile_in(&self.artifact_dir)
            .map_err(|e| HarnessError::io(&self.artifact_dir, e))?;
        file.write_all(contents.as_bytes())
            .map_err(|e| HarnessError::io(file.path(), e))?;

        let (_, path) = file.keep().map_err(|e| HarnessError::io(&self.artifact_dir, e.error))?;
        Ok(path)
    }
}

fn container_app(kind: &ServiceKind) -> (&'static str, &'static str) {
    match kind {
        ServiceKind::ContainerAgent { .. } => ("ion.agents.cei.execution_engine_agent", "ExecutionEngineAgent"),
        _ => ("ion.services.cei.process_dispatcher_service", "ProcessDispatcherService"),
    }
}

/// Wrap a service config in the release document a container launches from
fn release_document(kind: &ServiceKind, name: &str, config: Mapping) -> Mapping {
    let (module, class) = container_app(kind);

    let mut app = Mapping::new();
    app.insert("name".into(), Value::from(name));
    app.insert("version".into(), "0.1".into());
    app.insert("description".into(), Value::from(format!("{} started by convoy", name)));
    app.insert(
        "processapp".into(),
        Value::Sequence(vec![Value::from(name), Value::from(module), Value::from(class)]),
    );
    app.insert("config".into(), Value::Mapping(config));

    let mut release = Mapping::new();
    release.insert("name".into(), "convoy_deploy".into());
    release.insert("type".into(), "release".into());
    release.insert("version".into(), "0.1".into());
    release.insert("description".into(), "Service started by convoy".into());
    release.insert("ion".into(), "0.0.1".into());
    release.insert("apps".into(), Value::Sequence(vec![Value::Mapping(app)]));
    release
}
