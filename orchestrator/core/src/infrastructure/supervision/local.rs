// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Local Process Supervisor
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure
//! - **Purpose:** Implements [`SupervisionBackend`] with detached OS
//!   processes on this host
//!
//! Each instance runs in its own process group with stdout/stderr captured
//! to `<dir>/<name>.out` and `<dir>/<name>.err`. The registry is persisted
//! to `<dir>/supervisor.yaml` so that a later `convoy status` or
//! `convoy stop` sees the fleet an earlier `convoy start` launched.
//!
//! Liveness comes from `try_wait` for children this process spawned and
//! from `kill(pid, 0)` otherwise. Termination sends SIGTERM to the process
//! group, waits up to the grace period, then sends SIGKILL.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::domain::supervision::{
    InstanceHandle, InstanceState, ProcessSpec, SupervisionBackend, SupervisionConnector, SupervisionError,
};

pub const REGISTRY_FILE: &str = "supervisor.yaml";

const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(5);
const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Serialize, Deserialize)]
struct InstanceRecord {
    spec: ProcessSpec,
    pid: Option<u32>,
    started_at: DateTime<Utc>,
    #[serde(default)]
    restarts: u32,
    state: InstanceState,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Registry {
    #[serde(default)]
    instances: BTreeMap<String, InstanceRecord>,
}

struct Inner {
    registry: Registry,
    children: HashMap<String, Child>,
}

pub struct LocalProcessSupervisor {
    directory: PathBuf,
    grace_period: Duration,
    inner: Mutex<Inner>,
}

impl LocalProcessSupervisor {
    /// Attach to an existing directory, loading any persisted registry
    pub fn open(directory: impl Into<PathBuf>) -> Result<Self, SupervisionError> {
        let directory = directory.into();
        if !directory.is_dir() {
            return Err(SupervisionError::Unavailable(format!(
                "supervision directory {:?} does not exist",
                directory
            )));
        }

        let registry_path = directory.join(REGISTRY_FILE);
        let registry = if registry_path.exists() {
            let content = std::fs::read_to_string(&registry_path)
                .map_err(|e| SupervisionError::Registry(format!("{:?}: {}", registry_path, e)))?;
            serde_yaml::from_str(&content)
                .map_err(|e| SupervisionError::Registry(format!("{:?}: {}", registry_path, e)))?
        } else {
            Registry::default()
        };

        debug!(
            "Opened local supervisor at {:?} with {} instance(s)",
            directory,
            registry.instances.len()
        );

        Ok(Self {
            directory,
            grace_period: DEFAULT_GRACE_PERIOD,
            inner: Mutex::new(Inner {
                registry,
                children: HashMap::new(),
            }),
        })
    }

    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub async fn pid(&self, name: &str) -> Option<u32> {
        self.inner.lock().await.registry.instances.get(name).and_then(|r| r.pid)
    }

    fn registry_path(&self) -> PathBuf {
        self.directory.join(REGISTRY_FILE)
    }

    fn persist(&self, registry: &Registry) -> Result<(), SupervisionError> {
        let yaml = serde_yaml::to_string(registry).map_err(|e| SupervisionError::Registry(e.to_string()))?;
        std::fs::write(self.registry_path(), yaml)
            .map_err(|e| SupervisionError::Registry(format!("{:?}: {}", self.registry_path(), e)))
    }

    fn spawn(&self, spec: &ProcessSpec) -> Result<Child, SupervisionError> {
        let spawn_failed = |reason: String| SupervisionError::SpawnFailed {
            name: spec.name.clone(),
            reason,
        };

        let argv = spec.argv();
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| spawn_failed("empty command line".to_string()))?;

        let stdout = File::create(self.directory.join(format!("{}.out", spec.name)))
            .map_err(|e| spawn_failed(e.to_string()))?;
        let stderr = File::create(self.directory.join(format!("{}.err", spec.name)))
            .map_err(|e| spawn_failed(e.to_string()))?;

        let child = Command::new(program)
            .args(args)
            .current_dir(&spec.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .process_group(0)
            .spawn()
            .map_err(|e| spawn_failed(e.to_string()))?;

        info!("Spawned '{}' (pid {}): {}", spec.name, child.id(), spec.command);
        Ok(child)
    }

    /// Current state of one record, reaping owned children as a side effect
    fn observe(inner: &mut Inner, name: &str) -> InstanceState {
        let Some(record) = inner.registry.instances.get(name) else {
            return InstanceState::Stopped;
        };
        if record.state.is_terminal() {
            return record.state;
        }

        if let Some(child) = inner.children.get_mut(name) {
            return match child.try_wait() {
                Ok(None) => InstanceState::Running,
                Ok(Some(status)) if status.success() => InstanceState::Stopped,
                Ok(Some(_)) => InstanceState::Failed,
                Err(e) => {
                    warn!("Failed to poll '{}': {}", name, e);
                    InstanceState::Failed
                }
            };
        }

        match record.pid {
            Some(pid) if pid_alive(pid) => InstanceState::Running,
            Some(_) => InstanceState::Failed,
            None => record.state,
        }
    }

    /// Refresh every record, relaunching dead auto-restart instances
    fn reconcile(&self, inner: &mut Inner) -> Result<(), SupervisionError> {
        let names: Vec<String> = inner.registry.instances.keys().cloned().collect();
        let mut changed = false;

        for name in names {
            let observed = Self::observe(inner, &name);
            let Some(record) = inner.registry.instances.get(&name).cloned() else {
                continue;
            };

            if observed.is_terminal() && record.spec.auto_restart {
                inner.children.remove(&name);
                match self.spawn(&record.spec) {
                    Ok(child) => {
                        warn!("Instance '{}' exited; relaunched", name);
                        let pid = child.id();
                        inner.children.insert(name.clone(), child);
                        if let Some(entry) = inner.registry.instances.get_mut(&name) {
                            entry.pid = Some(pid);
                            entry.started_at = Utc::now();
                            entry.restarts += 1;
                            entry.state = InstanceState::Running;
                        }
                        changed = true;
                    }
                    Err(e) => {
                        warn!("Failed to relaunch '{}': {}", name, e);
                        if let Some(entry) = inner.registry.instances.get_mut(&name) {
                            entry.state = InstanceState::Failed;
                        }
                        changed = true;
                    }
                }
                continue;
            }

            if observed != record.state {
                if let Some(entry) = inner.registry.instances.get_mut(&name) {
                    entry.state = observed;
                }
                changed = true;
            }
        }

        if changed {
            self.persist(&inner.registry)?;
        }
        Ok(())
    }

    async fn stop_process(&self, inner: &mut Inner, name: &str) -> Result<(), SupervisionError> {
        let Some(record) = inner.registry.instances.get(name) else {
            return Err(SupervisionError::NotFound(name.to_string()));
        };
        let Some(pid) = record.pid else {
            return Ok(());
        };
        let mut child = inner.children.remove(name);

        let alive = |child: &mut Option<Child>| match child {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => pid_alive(pid),
        };

        if !alive(&mut child) {
            return Ok(());
        }

        signal_group(pid, libc::SIGTERM).map_err(|reason| SupervisionError::TerminationFailed {
            name: name.to_string(),
            reason,
        })?;

        let deadline = tokio::time::Instant::now() + self.grace_period;
        while tokio::time::Instant::now() < deadline {
            if !alive(&mut child) {
                debug!("'{}' exited after SIGTERM", name);
                return Ok(());
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }

        warn!("'{}' ignored SIGTERM for {:?}; sending SIGKILL", name, self.grace_period);
        signal_group(pid, libc::SIGKILL).map_err(|reason| SupervisionError::TerminationFailed {
            name: name.to_string(),
            reason,
        })?;
        if let Some(child) = child.as_mut() {
            reap(name, child, self.grace_period).await;
        }
        Ok(())
    }
}

/// Collect a SIGKILLed child without blocking the runtime
async fn reap(name: &str, child: &mut Child, limit: Duration) {
    let deadline = tokio::time::Instant::now() + limit;
    loop {
        match child.try_wait() {
            Ok(Some(status)) => {
                debug!("'{}' killed ({})", name, status);
                return;
            }
            Ok(None) if tokio::time::Instant::now() < deadline => {
                tokio::time::sleep(POLL_INTERVAL).await;
            }
            Ok(None) => {
                warn!("'{}' still not reaped {:?} after SIGKILL", name, limit);
                return;
            }
            Err(e) => {
                warn!("Failed to reap '{}': {}", name, e);
                return;
            }
        }
    }
}

fn pid_alive(pid: u32) -> bool {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    // SAFETY: signal 0 performs permission and existence checks only
    let rc = unsafe { libc::kill(pid, 0) };
    rc == 0 || std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

fn signal_group(pid: u32, signal: libc::c_int) -> Result<(), String> {
    let pid = libc::pid_t::try_from(pid).map_err(|e| e.to_string())?;
    // SAFETY: negative pid addresses the process group the child leads
    let rc = unsafe { libc::kill(-pid, signal) };
    if rc == 0 {
        return Ok(());
    }
    let err = std::io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::ESRCH) {
        return Ok(());
    }
    Err(err.to_string())
}

#[async_trait]
impl SupervisionBackend for LocalProcessSupervisor {
    async fn register(&self, spec: ProcessSpec) -> Result<InstanceHandle, SupervisionError> {
        let mut inner = self.inner.lock().await;
        if inner.registry.instances.contains_key(&spec.name) {
            return Err(SupervisionError::AlreadyRegistered(spec.name));
        }

        let child = self.spawn(&spec)?;
        let record = InstanceRecord {
            spec: spec.clone(),
            pid: Some(child.id()),
            started_at: Utc::now(),
            restarts: 0,
            state: InstanceState::Running,
        };
        inner.children.insert(spec.name.clone(), child);
        inner.registry.instances.insert(spec.name.clone(), record);
        self.persist(&inner.registry)?;

        Ok(InstanceHandle {
            spec,
            state: InstanceState::Running,
        })
    }

    async fn list(&self) -> Result<BTreeMap<String, InstanceHandle>, SupervisionError> {
        let mut inner = self.inner.lock().await;
        self.reconcile(&mut inner)?;
        Ok(inner
            .registry
            .instances
            .iter()
            .map(|(name, record)| {
                (
                    name.clone(),
                    InstanceHandle {
                        spec: record.spec.clone(),
                        state: record.state,
                    },
                )
            })
            .collect())
    }

    async fn state(&self, name: &str) -> Result<InstanceState, SupervisionError> {
        let mut inner = self.inner.lock().await;
        self.reconcile(&mut inner)?;
        inner
            .registry
            .instances
            .get(name)
            .map(|r| r.state)
            .ok_or_else(|| SupervisionError::NotFound(name.to_string()))
    }

    async fn terminate(&self, name: &str) -> Result<(), SupervisionError> {
        let mut inner = self.inner.lock().await;
        self.stop_process(&mut inner, name).await?;
        inner.registry.instances.remove(name);
        self.persist(&inner.registry)?;
        info!("Terminated '{}'", name);
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), SupervisionError> {
        let mut inner = self.inner.lock().await;
        let names: Vec<String> = inner.registry.instances.keys().cloned().collect();
        for name in names {
            if let Err(e) = self.stop_process(&mut inner, &name).await {
                warn!("Failed to stop '{}' during shutdown: {}", name, e);
            }
            inner.registry.instances.remove(&name);
        }

        let registry_path = self.registry_path();
        if registry_path.exists() {
            std::fs::remove_file(&registry_path)
                .map_err(|e| SupervisionError::Registry(format!("{:?}: {}", registry_path, e)))?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct LocalProcessConnector {
    grace_period: Duration,
}

impl LocalProcessConnector {
    pub fn new() -> Self {
        Self {
            grace_period: DEFAULT_GRACE_PERIOD,
        }
    }

    pub fn with_grace_period(grace_period: Duration) -> Self {
        Self { grace_period }
    }
}

impl Default for LocalProcessConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SupervisionConnector for LocalProcessConnector {
    async fn connect(&self, directory: &Path) -> Result<Arc<dyn SupervisionBackend>, SupervisionError> {
        let supervisor = LocalProcessSupervisor::open(directory)?.with_grace_period(self.grace_period);
        Ok(Arc::new(supervisor))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn supervisor(dir: &TempDir) -> LocalProcessSupervisor {
        LocalProcessSupervisor::open(dir.path())
            .unwrap()
            .with_grace_period(Duration::from_secs(2))
    }

    #[test]
    fn test_open_missing_directory_is_unavailable() {
        let result = LocalProcessSupervisor::open("/nonexistent/convoy/supervision");
        assert!(matches!(result, Err(SupervisionError::Unavailable(_))));
    }

    #[tokio::test]
    async fn test_spawn_and_terminate() {
        let dir = TempDir::new().unwrap();
        let sup = supervisor(&dir);

        sup.register(ProcessSpec::new("sleeper", "sleep 30", dir.path()))
            .await
            .unwrap();
        assert_eq!(sup.state("sleeper").await.unwrap(), InstanceState::Running);
        assert!(dir.path().join(REGISTRY_FILE).exists());
        assert!(dir.path().join("sleeper.out").exists());

        let pid = sup.pid("sleeper").await.unwrap();
        sup.terminate("sleeper").await.unwrap();
        assert!(sup.list().await.unwrap().is_empty());
        assert!(!pid_alive(pid));
    }

    #[tokio::test]
    async fn test_sigterm_ignored_escalates_to_sigkill() {
        let dir = TempDir::new().unwrap();
        let script = dir.path().join("stubborn.sh");
        std::fs::write(&script, "trap '' TERM\nwhile true; do sleep 1; done\n").unwrap();
        let sup = LocalProcessSupervisor::open(dir.path())
            .unwrap()
            .with_grace_period(Duration::from_millis(300));

        sup.register(ProcessSpec::new("stubborn", format!("sh {}", script.display()), dir.path()))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        let pid = sup.pid("stubborn").await.unwrap();

        sup.terminate("stubborn").await.unwrap();
        assert!(sup.list().await.unwrap().is_empty());
        assert!(!pid_alive(pid));
    }

    #[tokio::test]
    async fn test_registry_visible_to_second_attachment() {
        let dir = TempDir::new().unwrap();
        let first = supervisor(&dir);
        first
            .register(ProcessSpec::new("sleeper", "sleep 30", dir.path()))
            .await
            .unwrap();

        let second = supervisor(&dir);
        let listed = second.list().await.unwrap();
        assert_eq!(listed["sleeper"].state, InstanceState::Running);

        second.shutdown().await.unwrap();
        assert!(!dir.path().join(REGISTRY_FILE).exists());
    }

    #[tokio::test]
    async fn test_exited_instance_reported_stopped() {
        let dir = TempDir::new().unwrap();
        let sup = supervisor(&dir);
        sup.register(ProcessSpec::new("oneshot", "true", dir.path()))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(sup.state("oneshot").await.unwrap(), InstanceState::Stopped);
    }

    #[tokio::test]
    async fn test_auto_restart_relaunches() {
        let dir = TempDir::new().unwrap();
        let sup = supervisor(&dir);
        sup.register(ProcessSpec::new("flaky", "false", dir.path()).with_auto_restart(true))
            .await
            .unwrap();
        let first_pid = sup.pid("flaky").await.unwrap();

        tokio::time::sleep(Duration::from_millis(300)).await;
        let listed = sup.list().await.unwrap();
        assert_eq!(listed["flaky"].state, InstanceState::Running);
        assert_ne!(sup.pid("flaky").await.unwrap(), first_pid);

        sup.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_empty_command_fails_to_spawn() {
        let dir = TempDir::new().unwrap();
        let sup = supervisor(&dir);
        let result = sup.register(ProcessSpec::new("blank", "   ", dir.path())).await;
        assert!(matches!(result, Err(SupervisionError::SpawnFailed { .. })));
    }
}
