// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Orchestrator
//!
//! # Architecture
//!
//! - **Layer:** Application
//! - **Purpose:** `start`, `stop` and `status` use cases over one
//!   persistence directory
//!
//! `start` walks the descriptor in dependency order:
//!
//! ```text
//! provisioners → registries → elasticity managers → schedulers
//!   → nodes (agents, then one announcement per node)
//!   → container schedulers → container nodes → frontends
//! ```
//!
//! Schedulers come before the nodes reporting to them because every agent
//! config embeds its scheduler's name and every announcement targets one.

use serde_yaml::Mapping;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::application::announcer::{AnnouncementOutcome, Announcer};
use crate::application::fleet::{FleetStatus, ProcessFleetManager, StopReport};
use crate::domain::config::OrchestratorConfig;
use crate::domain::descriptor::{DescriptorSource, FrontendSpec, NodeSpec, ServiceGroup};
use crate::domain::error::HarnessError;
use crate::domain::messaging::RpcClient;
use crate::domain::node::LaunchMode;
use crate::domain::service::{replica_name, AgentProfile, ServiceKind};
use crate::domain::supervision::{ProcessSpec, SupervisionConnector};
use crate::infrastructure::config_synthesizer::{ConfigSynthesizer, GeneratedConfig};
use crate::infrastructure::descriptor_parser::DescriptorParser;

/// One managed instance launched by `start`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchedInstance {
    pub logical: String,
    pub name: String,
    pub kind: &'static str,
    pub artifact: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Announcement {
    pub node: String,
    pub scheduler: String,
    pub outcome: AnnouncementOutcome,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StartReport {
    pub exchange: String,
    pub instances: Vec<LaunchedInstance>,
    pub announcements: Vec<Announcement>,
}

pub struct Orchestrator {
    config: OrchestratorConfig,
    exchange: String,
    connector: Arc<dyn SupervisionConnector>,
    rpc: Arc<dyn RpcClient>,
    announce: bool,
}

impl Orchestrator {
    pub fn new(
        mut config: OrchestratorConfig,
        connector: Arc<dyn SupervisionConnector>,
        rpc: Arc<dyn RpcClient>,
    ) -> Self {
        let exchange = config.resolve_exchange();
        Self {
            config,
            exchange,
            connector,
            rpc,
            announce: true,
        }
    }

    /// Skip node announcements (dry runs have no scheduler to talk to)
    pub fn with_announcements(mut self, announce: bool) -> Self {
        self.announce = announce;
        self
    }

    pub fn exchange(&self) -> &str {
        &self.exchange
    }

    pub fn persistence_dir(&self) -> &Path {
        &self.config.persistence_dir
    }

    pub async fn start(&self, source: &DescriptorSource) -> Result<StartReport, HarnessError> {
        let directory = self.config.persistence_dir.clone();
        ensure_absent_or_empty(&directory)?;

        let descriptor = DescriptorParser::load(source)?;

        std::fs::create_dir_all(&directory).map_err(|e| HarnessError::io(&directory, e))?;
        std::fs::create_dir_all(&self.config.log_dir).map_err(|e| HarnessError::io(&self.config.log_dir, e))?;

        let fleet = ProcessFleetManager::attach(self.connector.as_ref(), &directory).await?;
        let run = Run {
            orchestrator: self,
            fleet,
            synth: ConfigSynthesizer::new(&self.config, self.exchange.clone()),
            announcer: Announcer::new(
                self.rpc.clone(),
                self.config.announce.clone(),
                self.config.messaging.call_timeout(),
            ),
        };

        info!("Starting deployment on exchange {}", self.exchange);
        let mut report = StartReport {
            exchange: self.exchange.clone(),
            ..Default::default()
        };

        for group in ServiceGroup::START_ORDER {
            match group {
                ServiceGroup::Provisioners
                | ServiceGroup::Registries
                | ServiceGroup::ElasticityManagers
                | ServiceGroup::Schedulers => {
                    let kind = replicated_kind(group);
                    for (name, spec) in descriptor.instances(group)? {
                        info!("Starting {} '{}'", kind, name);
                        for index in 0..spec.replicas(&name)? {
                            let launched = run.launch_direct(&kind, &name, &spec.config, Some(index)).await?;
                            report.instances.push(launched);
                        }
                    }
                }
                ServiceGroup::Nodes => {
                    for (node, spec) in descriptor.nodes(group)? {
                        let scheduler = owning_scheduler(&node, &spec)?;
                        report.instances.extend(run.launch_agents(&node, &spec, &scheduler).await?);
                        if let Some(announcement) = run.announce(&node, &spec, &scheduler).await? {
                            report.announcements.push(announcement);
                        }
                    }
                }
                ServiceGroup::ContainerSchedulers => {
                    for (name, spec) in descriptor.instances(group)? {
                        info!("Starting container scheduler '{}'", name);
                        let launched = run
                            .launch_container(&ServiceKind::ContainerScheduler, &name, &spec.config)
                            .await?;
                        report.instances.push(launched);
                    }
                }
                ServiceGroup::ContainerNodes => {
                    for (node, spec) in descriptor.nodes(group)? {
                        let scheduler = owning_scheduler(&node, &spec)?;
                        for (agent, agent_spec) in spec.agent_specs(&node)? {
                            info!("Starting container agent '{}' on node '{}'", agent, node);
                            let kind = ServiceKind::ContainerAgent { node: node.clone() };
                            let launched = run.launch_container(&kind, &agent, &agent_spec.config).await?;
                            report.instances.push(launched);
                        }
                        if let Some(announcement) = run.announce(&node, &spec, &scheduler).await? {
                            report.announcements.push(announcement);
                        }
                    }
                }
                ServiceGroup::Frontends => {
                    for (name, spec) in descriptor.frontends()? {
                        info!("Starting frontend '{}'", name);
                        report.instances.push(run.launch_frontend(&name, &spec).await?);
                    }
                }
            }
        }

        info!(
            "Started {} instance(s), announced {} node(s)",
            report.instances.len(),
            report.announcements.len()
        );
        Ok(report)
    }

    /// Attach to the fleet in an existing persistence directory
    pub async fn fleet(&self) -> Result<ProcessFleetManager, HarnessError> {
        let directory = &self.config.persistence_dir;
        if !directory.is_dir() {
            return Err(HarnessError::SupervisionUnavailable(format!(
                "persistence directory {:?} does not exist; was a deployment started?",
                directory
            )));
        }
        ProcessFleetManager::attach(self.connector.as_ref(), directory).await
    }

    /// Unlike [`ProcessFleetManager::stop`], this is not a no-op once the
    /// directory is gone: with nothing to attach to it reports
    /// `SupervisionUnavailable`.
    pub async fn stop(&self, selected: &[String], force: bool) -> Result<StopReport, HarnessError> {
        self.fleet().await?.stop(selected, force).await
    }

    pub async fn status(&self) -> Result<FleetStatus, HarnessError> {
        self.fleet().await?.status().await
    }
}

/// State shared by one `start` invocation
struct Run<'a> {
    orchestrator: &'a Orchestrator,
    fleet: ProcessFleetManager,
    synth: ConfigSynthesizer,
    announcer: Announcer,
}

impl Run<'_> {
    fn config(&self) -> &OrchestratorConfig {
        &self.orchestrator.config
    }

    async fn launch_direct(
        &self,
        kind: &ServiceKind,
        logical: &str,
        overrides: &Mapping,
        replica: Option<u32>,
    ) -> Result<LaunchedInstance, HarnessError> {
        let generated = self.synth.build_config(kind, logical, overrides, replica)?;
        let name = match replica {
            Some(index) => replica_name(logical, index),
            None => logical.to_string(),
        };
        let command = format!(
            "{} {}",
            kind.executable(&self.config().executables),
            generated.path.display()
        );
        let process = ProcessSpec::new(name.as_str(), command, &self.config().persistence_dir)
            .with_auto_restart(matches!(kind, ServiceKind::Agent(_)));

        self.fleet
            .start_instance(logical, process, vec![generated.path.clone()])
            .await?;
        Ok(launched(kind, logical, &name, generated))
    }

    async fn launch_container(
        &self,
        kind: &ServiceKind,
        name: &str,
        overrides: &Mapping,
    ) -> Result<LaunchedInstance, HarnessError> {
        let generated = self.synth.build_config(kind, name, overrides, None)?;
        let target = generated.container.clone().ok_or_else(|| {
            HarnessError::Harness(format!("{} '{}' has no container target", kind, name))
        })?;

        let launcher = target
            .install_directory
            .join(kind.executable(&self.config().executables));
        let mut command = format!(
            "{} -D --rel {} --noshell",
            launcher.display(),
            generated.path.display()
        );
        if let Some(system_name) = &target.system_name {
            command.push_str(&format!(" --sysname {}", system_name));
        }

        let process = ProcessSpec::new(name, command, &target.install_directory).with_auto_restart(true);
        self.fleet
            .start_instance(name, process, vec![generated.path.clone()])
            .await?;
        Ok(launched(kind, name, name, generated))
    }

    async fn launch_frontend(&self, name: &str, spec: &FrontendSpec) -> Result<LaunchedInstance, HarnessError> {
        let authz_file = self.synth.write_authz_file(name, &spec.users)?;
        let kind = ServiceKind::Frontend {
            authz_file: authz_file.clone(),
        };
        let generated = match self.synth.build_config(&kind, name, &spec.config, None) {
            Ok(generated) => generated,
            Err(e) => {
                if let Err(remove_err) = std::fs::remove_file(&authz_file) {
                    warn!("Couldn't delete {:?}: {}", authz_file, remove_err);
                }
                return Err(e);
            }
        };

        let command = format!(
            "{} {} {}",
            kind.executable(&self.config().executables),
            generated.path.display(),
            spec.port()
        );
        let process = ProcessSpec::new(name, command, &self.config().persistence_dir);
        self.fleet
            .start_instance(name, process, vec![authz_file, generated.path.clone()])
            .await?;
        Ok(launched(&kind, name, name, generated))
    }

    async fn launch_agents(
        &self,
        node: &str,
        spec: &NodeSpec,
        scheduler: &str,
    ) -> Result<Vec<LaunchedInstance>, HarnessError> {
        let mut instances = Vec::new();

        for (agent, agent_spec) in spec.agent_specs(node)? {
            info!("Starting agent '{}' on node '{}'", agent, node);

            let launch_type = agent_spec.launch_type.as_deref().ok_or_else(|| {
                HarnessError::DeploymentDescription(format!(
                    "agent '{}' on node '{}' has no launch_type",
                    agent, node
                ))
            })?;
            let launch_mode = LaunchMode::parse(
                launch_type,
                Some(
                    agent_spec
                        .supd_directory
                        .clone()
                        .unwrap_or_else(|| self.config().persistence_dir.join(&agent)),
                ),
                agent_spec
                    .pyon_directory
                    .clone()
                    .or_else(|| self.config().container_directory.clone()),
                agent_spec.system_name.clone(),
            )?;

            let mut profile = AgentProfile::new(
                node,
                agent_spec.scheduler.clone().unwrap_or_else(|| scheduler.to_string()),
                launch_mode,
            );
            if let Some(slots) = agent_spec.slots {
                profile.slots = slots;
            }
            if let Some(heartbeat) = agent_spec.heartbeat {
                profile.heartbeat = heartbeat;
            }
            profile.logfile = agent_spec.logfile.clone();

            let kind = ServiceKind::Agent(profile);
            instances.push(self.launch_direct(&kind, &agent, &agent_spec.config, None).await?);
        }

        Ok(instances)
    }

    async fn announce(
        &self,
        node: &str,
        spec: &NodeSpec,
        scheduler: &str,
    ) -> Result<Option<Announcement>, HarnessError> {
        if !self.orchestrator.announce {
            debug!("Announcements disabled; skipping node '{}'", node);
            return Ok(None);
        }

        let outcome = self
            .announcer
            .announce(node, &spec.capability, scheduler, spec.desired_state())
            .await?;
        Ok(Some(Announcement {
            node: node.to_string(),
            scheduler: scheduler.to_string(),
            outcome,
        }))
    }
}

fn replicated_kind(group: ServiceGroup) -> ServiceKind {
    match group {
        ServiceGroup::Provisioners => ServiceKind::Provisioner,
        ServiceGroup::Registries => ServiceKind::Registry,
        ServiceGroup::ElasticityManagers => ServiceKind::ElasticityManager,
        _ => ServiceKind::Scheduler,
    }
}

fn owning_scheduler(node: &str, spec: &NodeSpec) -> Result<String, HarnessError> {
    spec.scheduler.clone().ok_or_else(|| {
        HarnessError::DeploymentDescription(format!("No process-dispatcher specified for node '{}'", node))
    })
}

fn launched(kind: &ServiceKind, logical: &str, name: &str, generated: GeneratedConfig) -> LaunchedInstance {
    LaunchedInstance {
        logical: logical.to_string(),
        name: name.to_string(),
        kind: kind.label(),
        artifact: generated.path,
    }
}

/// A present, non-empty directory means a fleet may already be running
fn ensure_absent_or_empty(directory: &Path) -> Result<(), HarnessError> {
    if !directory.exists() {
        return Ok(());
    }
    let mut entries = std::fs::read_dir(directory).map_err(|e| HarnessError::io(directory, e))?;
    if entries.next().is_some() {
        return Err(HarnessError::Harness(format!(
            "{:?} already exists. Has convoy already started a deployment?",
            directory
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::messaging::RpcError;
    use crate::infrastructure::supervision::{InMemoryConnector, InMemorySupervisor};
    use async_trait::async_trait;
    use serde_json::Value;
    use std::time::Duration;
    use tempfile::TempDir;

    struct Ack;

    #[async_trait]
    impl RpcClient for Ack {
        async fn call(&self, _topic: &str, _method: &str, _args: Value, _timeout: Duration) -> Result<Value, RpcError> {
            Ok(Value::Null)
        }
    }

    fn orchestrator(dir: &TempDir) -> (Orchestrator, InMemorySupervisor) {
        let supervisor = InMemorySupervisor::new();
        let config = OrchestratorConfig {
            persistence_dir: dir.path().join("supervision"),
            log_dir: dir.path().join("logs"),
            artifact_dir: Some(dir.path().join("artifacts")),
            exchange: Some("xchg".to_string()),
            ..Default::default()
        };
        let orchestrator = Orchestrator::new(
            config,
            Arc::new(InMemoryConnector::new(supervisor.clone())),
            Arc::new(Ack),
        );
        (orchestrator, supervisor)
    }

    #[tokio::test]
    async fn test_group_order() {
        let dir = TempDir::new().unwrap();
        let (orchestrator, supervisor) = orchestrator(&dir);
        let descriptor = r#"
nodes:
  n1:
    process-dispatcher: pd_0
    eeagents:
      eea_1:
        launch_type: fork
process-dispatchers:
  pd_0: {}
epums:
  epum_0: {}
dt_registries:
  dtrs_0: {}
provisioners:
  prov_0: {}
"#;

        orchestrator
            .start(&DescriptorSource::Text(descriptor.to_string()))
            .await
            .unwrap();

        let names: Vec<String> = supervisor.registered().await.into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["prov_0-0", "dtrs_0-0", "epum_0-0", "pd_0-0", "eea_1"]);
    }

    #[tokio::test]
    async fn test_agent_scheduler_override_and_auto_restart() {
        let dir = TempDir::new().unwrap();
        let (orchestrator, supervisor) = orchestrator(&dir);
        let descriptor = r#"
nodes:
  n1:
    process-dispatcher: pd_0
    engine: gpu
    eeagents:
      eea_1:
        launch_type: supd
        process-dispatcher: pd_1
        slots: 2
"#;

        let report = orchestrator
            .start(&DescriptorSource::Text(descriptor.to_string()))
            .await
            .unwrap();

        let registered = supervisor.registered().await;
        assert!(registered[0].auto_restart);
        assert!(dir.path().join("supervision").join("eea_1").is_dir());

        let doc: Mapping =
            serde_yaml::from_str(&std::fs::read_to_string(&report.instances[0].artifact).unwrap()).unwrap();
        assert_eq!(doc["pd"]["name"].as_str(), Some("pd_1"));
        assert_eq!(doc["eeagent"]["slots"].as_u64(), Some(2));

        assert_eq!(report.announcements.len(), 1);
        assert_eq!(report.announcements[0].scheduler, "pd_0");
    }

    #[tokio::test]
    async fn test_frontend_command_and_authz() {
        let dir = TempDir::new().unwrap();
        let (orchestrator, supervisor) = orchestrator(&dir);
        let descriptor = r#"
phantom-instances:
  phantom:
    port: 9090
    users:
      - {user: alice, password: pw}
"#;

        orchestrator
            .start(&DescriptorSource::Text(descriptor.to_string()))
            .await
            .unwrap();

        let registered = supervisor.registered().await;
        let argv = registered[0].argv();
        assert_eq!(argv[0], "phantomcherrypy");
        assert_eq!(argv[2], "9090");

        let fleet = orchestrator.fleet().await.unwrap();
        let artifacts = fleet.index().await.logical["phantom"]["phantom"].clone();
        assert_eq!(artifacts.len(), 2);
        assert_eq!(std::fs::read_to_string(&artifacts[0]).unwrap(), "alice\npw\n");

        fleet.stop(&[], false).await.unwrap();
        assert!(artifacts.iter().all(|a| !a.exists()));
    }

    #[tokio::test]
    async fn test_artifacts_in_spaced_directory_removed_with_instance() {
        let dir = TempDir::new().unwrap();
        let supervisor = InMemorySupervisor::new();
        let config = OrchestratorConfig {
            persistence_dir: dir.path().join("supervision"),
            log_dir: dir.path().join("logs"),
            artifact_dir: Some(dir.path().join("my artifacts")),
            exchange: Some("xchg".to_string()),
            ..Default::default()
        };
        let orchestrator = Orchestrator::new(
            config,
            Arc::new(InMemoryConnector::new(supervisor.clone())),
            Arc::new(Ack),
        );
        let descriptor = "process-dispatchers:\n  pd_0: {}\ndt_registries:\n  dtrs_0: {}\n";

        let report = orchestrator
            .start(&DescriptorSource::Text(descriptor.to_string()))
            .await
            .unwrap();
        let pd_artifact = report.instances[1].artifact.clone();
        assert!(pd_artifact.exists());

        let stopped = orchestrator.stop(&["pd_0".to_string()], false).await.unwrap();
        assert_eq!(stopped.stopped, vec!["pd_0-0"]);
        assert!(!pd_artifact.exists());
        assert!(report.instances[0].artifact.exists());
    }

    #[tokio::test]
    async fn test_container_services_run_from_install_directory() {
        let dir = TempDir::new().unwrap();
        let (orchestrator, supervisor) = orchestrator(&dir);
        let descriptor = r#"
pyon-process-dispatchers:
  pyon_pd:
    config:
      pyon_directory: /opt/pyon
      system: {name: sys1}
"#;

        orchestrator
            .start(&DescriptorSource::Text(descriptor.to_string()))
            .await
            .unwrap();

        let registered = supervisor.registered().await;
        assert_eq!(registered[0].working_dir, PathBuf::from("/opt/pyon"));
        assert!(registered[0].command.starts_with("/opt/pyon/bin/pycc -D --rel "));
        assert!(registered[0].command.ends_with("--noshell --sysname sys1"));
    }

    #[tokio::test]
    async fn test_missing_launch_type_is_descriptor_error() {
        let dir = TempDir::new().unwrap();
        let (orchestrator, _) = orchestrator(&dir);
        let descriptor = "nodes:\n  n1:\n    process-dispatcher: pd_0\n    eeagents:\n      eea_1: {}\n";

        let err = orchestrator
            .start(&DescriptorSource::Text(descriptor.to_string()))
            .await
            .unwrap_err();
        assert!(matches!(err, HarnessError::DeploymentDescription(_)));
    }

    #[tokio::test]
    async fn test_announcements_can_be_disabled() {
        let dir = TempDir::new().unwrap();
        let (orchestrator, _) = orchestrator(&dir);
        let orchestrator = orchestrator.with_announcements(false);

        let report = orchestrator.start(&DescriptorSource::BuiltIn).await.unwrap();
        assert!(report.announcements.is_empty());
        assert_eq!(report.instances.len(), 2);
    }

    #[tokio::test]
    async fn test_empty_existing_directory_is_accepted() {
        let dir = TempDir::new().unwrap();
        let (orchestrator, _) = orchestrator(&dir);
        std::fs::create_dir_all(orchestrator.persistence_dir()).unwrap();

        assert!(orchestrator.start(&DescriptorSource::BuiltIn).await.is_ok());
    }
}
