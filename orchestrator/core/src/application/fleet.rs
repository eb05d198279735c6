// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Process Fleet Manager
//!
//! # Architecture
//!
//! - **Layer:** Application
//! - **Purpose:** Lifecycle of the managed instances living under one
//!   persistence directory
//!
//! ## Stop semantics
//!
//! | Selection | Effect |
//! |-----------|--------|
//! | empty, or covers every managed instance | full stop: every instance cleaned up, backend shut down, directory removed |
//! | strict subset | partial stop: each selected logical name's instances cleaned up, directory kept |
//!
//! A selected name covers the instances the fleet index records for it
//! (`<dir>/fleet-index.yaml`, written at start time) plus every live
//! instance whose name starts with it.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::domain::error::HarnessError;
use crate::domain::supervision::{
    InstanceHandle, InstanceState, ProcessSpec, SupervisionBackend, SupervisionConnector,
};
use crate::infrastructure::config_synthesizer::ARTIFACT_SUFFIX;

pub const FLEET_INDEX_FILE: &str = "fleet-index.yaml";

/// Logical name -> concrete instance names -> artifacts owned by each
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FleetIndex {
    #[serde(default)]
    pub logical: BTreeMap<String, BTreeMap<String, Vec<PathBuf>>>,
}

impl FleetIndex {
    fn load(directory: &Path) -> Result<Self, HarnessError> {
        let path = directory.join(FLEET_INDEX_FILE);
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(&path).map_err(|e| HarnessError::io(&path, e))?;
        Ok(serde_yaml::from_str(&content)?)
    }

    fn save(&self, directory: &Path) -> Result<(), HarnessError> {
        if !directory.is_dir() {
            return Ok(());
        }
        let path = directory.join(FLEET_INDEX_FILE);
        std::fs::write(&path, serde_yaml::to_string(self)?).map_err(|e| HarnessError::io(&path, e))
    }

    /// Concrete instances owned by `logical`
    pub fn members(&self, logical: &str) -> Vec<String> {
        self.logical
            .get(logical)
            .map(|instances| instances.keys().cloned().collect())
            .unwrap_or_default()
    }

    fn artifacts(&self, instance: &str) -> Vec<PathBuf> {
        self.logical
            .values()
            .filter_map(|instances| instances.get(instance))
            .flatten()
            .cloned()
            .collect()
    }

    fn forget(&mut self, instance: &str) {
        for instances in self.logical.values_mut() {
            instances.remove(instance);
        }
        self.logical.retain(|_, instances| !instances.is_empty());
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StopReport {
    /// Instances released to the backend
    pub stopped: Vec<String>,
    /// Instances whose release failed under `force`
    pub failed: Vec<String>,
    /// Whether the persistence directory was removed
    pub wiped: bool,
}

impl StopReport {
    pub fn is_empty(&self) -> bool {
        self.stopped.is_empty() && self.failed.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FleetStatus {
    pub instances: Vec<(String, InstanceState)>,
    /// 0 when every instance is running, 1 otherwise
    pub exit_code: i32,
}

pub struct ProcessFleetManager {
    directory: PathBuf,
    backend: Arc<dyn SupervisionBackend>,
    index: Mutex<FleetIndex>,
}

impl ProcessFleetManager {
    pub fn new(directory: impl Into<PathBuf>, backend: Arc<dyn SupervisionBackend>) -> Result<Self, HarnessError> {
        let directory = directory.into();
        let index = FleetIndex::load(&directory)?;
        Ok(Self {
            directory,
            backend,
            index: Mutex::new(index),
        })
    }

    /// Attach to an existing persistence directory through `connector`
    pub async fn attach(connector: &dyn SupervisionConnector, directory: &Path) -> Result<Self, HarnessError> {
        let backend = connector.connect(directory).await?;
        Self::new(directory, backend)
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Register and start one managed instance under `logical`.
    ///
    /// `artifacts` lists generated files the instance owns. They are removed
    /// along with the instance, or right away if registration fails.
    pub async fn start_instance(
        &self,
        logical: &str,
        spec: ProcessSpec,
        artifacts: Vec<PathBuf>,
    ) -> Result<InstanceHandle, HarnessError> {
        let mut index = self.index.lock().await;

        debug!("Running command '{}'", spec.command);
        let name = spec.name.clone();
        let owned: Vec<PathBuf> = artifacts_in_command(&spec.command)
            .into_iter()
            .chain(artifacts.iter().cloned())
            .collect();
        let handle = match self.backend.register(spec).await {
            Ok(handle) => handle,
            Err(e) => {
                remove_artifacts(&name, &owned);
                return Err(e.into());
            }
        };

        index
            .logical
            .entry(logical.to_string())
            .or_default()
            .insert(name, artifacts);
        index.save(&self.directory)?;

        Ok(handle)
    }

    /// Reconciled `name -> state` view of every managed instance
    pub async fn list_instances(&self) -> Result<BTreeMap<String, InstanceState>, HarnessError> {
        Ok(self
            .backend
            .list()
            .await?
            .into_iter()
            .map(|(name, handle)| (name, handle.state))
            .collect())
    }

    pub async fn index(&self) -> FleetIndex {
        self.index.lock().await.clone()
    }

    pub async fn status(&self) -> Result<FleetStatus, HarnessError> {
        let instances: Vec<(String, InstanceState)> = self.list_instances().await?.into_iter().collect();
        let mut exit_code = 0;
        for (name, state) in &instances {
            info!("{} is {}", name, state);
            if *state != InstanceState::Running {
                exit_code = 1;
            }
        }
        Ok(FleetStatus { instances, exit_code })
    }

    /// Stop per the table in the module docs
    pub async fn stop(&self, selected: &[String], force: bool) -> Result<StopReport, HarnessError> {
        if !self.directory.exists() {
            debug!("{:?} already removed; nothing to stop", self.directory);
            return Ok(StopReport::default());
        }

        let current = self.list_instances().await?;
        let covers_everything = !selected.is_empty() && current.keys().all(|name| selected.contains(name));

        if selected.is_empty() || covers_everything {
            if covers_everything {
                warn!("Selection names every managed instance; performing a full stop including directory removal");
            }
            let everything: Vec<String> = current.into_keys().collect();
            let mut report = self.stop_instances(&everything, force).await?;
            self.wipe_persistence().await?;
            report.wiped = true;
            return Ok(report);
        }

        self.stop_instances(selected, force).await
    }

    /// Clean up every instance owned by each selected logical name. The
    /// directory and registry remain.
    pub async fn stop_instances(&self, selected: &[String], force: bool) -> Result<StopReport, HarnessError> {
        let live = self.backend.list().await?;
        let mut index = self.index.lock().await;
        let mut report = StopReport::default();

        if !selected.is_empty() {
            info!("Stopping {}", selected.join(", "));
        }

        let mut targets: Vec<String> = Vec::new();
        for logical in selected {
            let mut members = index.members(logical);
            for name in live.keys().filter(|name| name.starts_with(logical.as_str())) {
                if !members.contains(name) {
                    members.push(name.clone());
                }
            }
            if members.is_empty() {
                warn!("'{}' matches no managed instance", logical);
            }
            for member in members {
                if !targets.contains(&member) {
                    targets.push(member);
                }
            }
        }

        for name in targets {
            let command_artifacts = live
                .get(&name)
                .map(|handle| artifacts_in_command(&handle.spec.command))
                .unwrap_or_default();
            let mut artifacts = index.artifacts(&name);
            for artifact in command_artifacts {
                if !artifacts.contains(&artifact) {
                    artifacts.push(artifact);
                }
            }
            remove_artifacts(&name, &artifacts);

            if !live.contains_key(&name) {
                debug!("'{}' is no longer managed by the backend", name);
                index.forget(&name);
                continue;
            }

            match self.backend.terminate(&name).await {
                Ok(()) => {
                    index.forget(&name);
                    report.stopped.push(name);
                }
                Err(e) if force => {
                    warn!("Failed to stop '{}', continuing: {}", name, e);
                    report.failed.push(name);
                }
                Err(e) => {
                    index.save(&self.directory)?;
                    return Err(HarnessError::Harness(format!("Failed to stop '{}': {}", name, e)));
                }
            }
        }

        index.save(&self.directory)?;
        Ok(report)
    }

    /// Shut the backend down and remove the persistence directory
    pub async fn wipe_persistence(&self) -> Result<(), HarnessError> {
        let mut index = self.index.lock().await;
        self.backend.shutdown().await?;
        *index = FleetIndex::default();

        if self.directory.exists() {
            std::fs::remove_dir_all(&self.directory).map_err(|e| HarnessError::io(&self.directory, e))?;
            info!("Removed persistence directory {:?}", self.directory);
        }
        Ok(())
    }
}

/// Generated artifacts referenced on a command line
pub fn artifacts_in_command(command: &str) -> Vec<PathBuf> {
    command
        .split_whitespace()
        .filter(|token| token.ends_with(ARTIFACT_SUFFIX))
        .map(PathBuf::from)
        .collect()
}

fn remove_artifacts(name: &str, artifacts: &[PathBuf]) {
    for artifact in artifacts {
        match std::fs::remove_file(artifact) {
            Ok(()) => debug!("Removed artifact {:?} of '{}'", artifact, name),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Couldn't delete temporary config file {:?} of '{}': {}", artifact, name, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::supervision::InMemorySupervisor;
    use tempfile::TempDir;

    struct Fixture {
        dir: TempDir,
        supervisor: InMemorySupervisor,
        fleet: ProcessFleetManager,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let supervisor = InMemorySupervisor::new();
        let fleet = ProcessFleetManager::new(dir.path().join("supervision"), Arc::new(supervisor.clone())).unwrap();
        std::fs::create_dir_all(fleet.directory()).unwrap();
        Fixture { dir, supervisor, fleet }
    }

    fn artifact(dir: &TempDir, name: &str) -> PathBuf {
        let path = dir.path().join(format!("{}_x{}", name, ARTIFACT_SUFFIX));
        std::fs::write(&path, "server: {}\n").unwrap();
        path
    }

    async fn launch(f: &Fixture, logical: &str, name: &str) -> PathBuf {
        let path = artifact(&f.dir, name);
        let command = format!("svc {}", path.display());
        f.fleet
            .start_instance(logical, ProcessSpec::new(name, command, f.dir.path()), Vec::new())
            .await
            .unwrap();
        path
    }

    #[test]
    fn test_artifacts_in_command() {
        let found = artifacts_in_command("bin/pycc -D --rel /tmp/a_1.yml --noshell");
        assert_eq!(found, vec![PathBuf::from("/tmp/a_1.yml")]);
    }

    #[tokio::test]
    async fn test_selective_stop_by_logical_name() {
        let f = fixture();
        let pd0 = launch(&f, "pd0", "pd0-0").await;
        let pd1 = launch(&f, "pd0", "pd0-1").await;
        let agent = launch(&f, "agentA", "agentA").await;

        let report = f.fleet.stop(&["pd0".to_string()], false).await.unwrap();

        assert_eq!(report.stopped, vec!["pd0-0", "pd0-1"]);
        assert!(!report.wiped);
        assert!(!pd0.exists());
        assert!(!pd1.exists());
        assert!(agent.exists());

        let remaining = f.fleet.list_instances().await.unwrap();
        assert_eq!(remaining.keys().collect::<Vec<_>>(), vec!["agentA"]);
        assert!(f.fleet.directory().exists());
        assert!(f.fleet.index().await.members("pd0").is_empty());
    }

    #[tokio::test]
    async fn test_prefix_fallback_for_unindexed_instances() {
        let f = fixture();
        f.supervisor
            .register(ProcessSpec::new("dtrs-0", "epu-dtrs", f.dir.path()))
            .await
            .unwrap();
        launch(&f, "other", "other").await;

        let report = f.fleet.stop(&["dtrs".to_string()], false).await.unwrap();
        assert_eq!(report.stopped, vec!["dtrs-0"]);
    }

    #[tokio::test]
    async fn test_prefix_selects_across_logical_names() {
        let f = fixture();
        let a = launch(&f, "eeagent_a", "eeagent_a").await;
        let b = launch(&f, "eeagent_b", "eeagent_b").await;
        let pd = launch(&f, "pd_0", "pd_0-0").await;

        let report = f.fleet.stop(&["eeagent".to_string()], false).await.unwrap();

        assert_eq!(report.stopped, vec!["eeagent_a", "eeagent_b"]);
        assert!(!a.exists());
        assert!(!b.exists());
        assert!(pd.exists());
        let remaining = f.fleet.list_instances().await.unwrap();
        assert_eq!(remaining.keys().collect::<Vec<_>>(), vec!["pd_0-0"]);
        assert!(f.fleet.index().await.members("eeagent_a").is_empty());
    }

    #[tokio::test]
    async fn test_unmatched_selection_stops_nothing() {
        let f = fixture();
        launch(&f, "pd_0", "pd_0-0").await;

        let report = f.fleet.stop(&["registry".to_string()], false).await.unwrap();
        assert!(report.is_empty());
        assert_eq!(f.fleet.list_instances().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_indexed_artifact_in_spaced_directory_removed() {
        let f = fixture();
        let spaced = f.dir.path().join("my artifacts");
        std::fs::create_dir_all(&spaced).unwrap();
        let config = spaced.join(format!("pd_0_x{}", ARTIFACT_SUFFIX));
        std::fs::write(&config, "server: {}\n").unwrap();
        f.fleet
            .start_instance(
                "pd_0",
                ProcessSpec::new("pd_0-0", format!("svc {}", config.display()), f.dir.path()),
                vec![config.clone()],
            )
            .await
            .unwrap();
        launch(&f, "agentA", "agentA").await;

        f.fleet.stop(&["pd_0".to_string()], false).await.unwrap();
        assert!(!config.exists());
    }

    #[tokio::test]
    async fn test_failed_registration_removes_artifacts() {
        let f = fixture();
        let config = artifact(&f.dir, "pd_0");
        f.supervisor.set_unavailable(true).await;

        let result = f
            .fleet
            .start_instance(
                "pd_0",
                ProcessSpec::new("pd_0-0", format!("svc {}", config.display()), f.dir.path()),
                vec![config.clone()],
            )
            .await;

        assert!(result.is_err());
        assert!(!config.exists());
        assert!(f.fleet.index().await.members("pd_0").is_empty());
    }

    #[tokio::test]
    async fn test_full_stop_wipes_directory() {
        let f = fixture();
        let a = launch(&f, "pd0", "pd0-0").await;
        launch(&f, "agentA", "agentA").await;

        let report = f.fleet.stop(&[], false).await.unwrap();
        assert!(report.wiped);
        assert_eq!(report.stopped.len(), 2);
        assert!(!a.exists());
        assert!(!f.fleet.directory().exists());
    }

    #[tokio::test]
    async fn test_selecting_every_name_is_full_stop() {
        let f = fixture();
        launch(&f, "pd0", "pd0-0").await;

        let report = f.fleet.stop(&["pd0-0".to_string()], false).await.unwrap();
        assert!(report.wiped);
        assert!(!f.fleet.directory().exists());
    }

    #[tokio::test]
    async fn test_stop_after_stop_is_empty() {
        let f = fixture();
        launch(&f, "pd0", "pd0-0").await;

        f.fleet.stop(&[], false).await.unwrap();
        let second = f.fleet.stop(&[], false).await.unwrap();
        assert!(second.is_empty());
    }

    #[tokio::test]
    async fn test_stop_instances_keeps_directory() {
        let f = fixture();
        launch(&f, "pd0", "pd0-0").await;

        let report = f.fleet.stop_instances(&["pd0".to_string()], false).await.unwrap();
        assert_eq!(report.stopped, vec!["pd0-0"]);
        assert!(f.fleet.directory().exists());
    }

    #[tokio::test]
    async fn test_cleanup_failure_honours_force() {
        let f = fixture();
        launch(&f, "pd0", "pd0-0").await;
        launch(&f, "agentA", "agentA").await;

        f.supervisor.fail_termination_of("pd0-0").await;
        let err = f.fleet.stop(&["pd0".to_string()], false).await.unwrap_err();
        assert!(matches!(err, HarnessError::Harness(_)));

        f.supervisor.fail_termination_of("pd0-0").await;
        let report = f.fleet.stop(&["pd0".to_string()], true).await.unwrap();
        assert_eq!(report.failed, vec!["pd0-0"]);
    }

    #[tokio::test]
    async fn test_indexed_artifacts_removed_on_stop() {
        let f = fixture();
        let authz = f.dir.path().join("phantom_x.authz");
        std::fs::write(&authz, "user\npw\n").unwrap();
        let config = artifact(&f.dir, "phantom");
        f.fleet
            .start_instance(
                "phantom",
                ProcessSpec::new("phantom", format!("phantomcherrypy {} 8080", config.display()), f.dir.path()),
                vec![authz.clone()],
            )
            .await
            .unwrap();
        launch(&f, "pd0", "pd0-0").await;

        f.fleet.stop(&["phantom".to_string()], false).await.unwrap();
        assert!(!authz.exists());
        assert!(!config.exists());
    }

    #[tokio::test]
    async fn test_status_exit_code() {
        let f = fixture();
        launch(&f, "pd0", "pd0-0").await;
        launch(&f, "agentA", "agentA").await;

        let status = f.fleet.status().await.unwrap();
        assert_eq!(status.exit_code, 0);
        assert_eq!(status.instances.len(), 2);

        f.supervisor.set_state("agentA", InstanceState::Failed).await.unwrap();
        let status = f.fleet.status().await.unwrap();
        assert_eq!(status.exit_code, 1);
    }

    #[tokio::test]
    async fn test_unavailable_backend() {
        let f = fixture();
        f.supervisor.set_unavailable(true).await;
        let err = f
            .fleet
            .start_instance("pd0", ProcessSpec::new("pd0-0", "svc", f.dir.path()), Vec::new())
            .await
            .unwrap_err();
        assert!(matches!(err, HarnessError::SupervisionUnavailable(_)));
    }

    #[tokio::test]
    async fn test_index_persisted_for_later_attachment() {
        let f = fixture();
        launch(&f, "pd0", "pd0-0").await;
        launch(&f, "pd0", "pd0-1").await;

        let reopened = ProcessFleetManager::new(f.fleet.directory(), Arc::new(f.supervisor.clone())).unwrap();
        assert_eq!(reopened.index().await.members("pd0"), vec!["pd0-0", "pd0-1"]);
    }
}
