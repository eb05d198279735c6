// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! In-memory supervision backend
//!
//! Nothing is forked. Registrations are recorded and reported as running,
//! which makes this backend suitable for dry runs and tests that inspect
//! what the orchestrator would have launched.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::domain::supervision::{
    InstanceHandle, InstanceState, ProcessSpec, SupervisionBackend, SupervisionConnector, SupervisionError,
};

#[derive(Default)]
struct MemoryState {
    instances: BTreeMap<String, InstanceHandle>,
    registered: Vec<ProcessSpec>,
    terminated: Vec<String>,
    failing_terminations: Vec<String>,
    unavailable: bool,
}

#[derive(Clone, Default)]
pub struct InMemorySupervisor {
    state: Arc<Mutex<MemoryState>>,
}

impl InMemorySupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every spec ever registered, in registration order
    pub async fn registered(&self) -> Vec<ProcessSpec> {
        self.state.lock().await.registered.clone()
    }

    /// Names passed to `terminate`, in call order
    pub async fn terminated(&self) -> Vec<String> {
        self.state.lock().await.terminated.clone()
    }

    pub async fn set_state(&self, name: &str, state: InstanceState) -> Result<(), SupervisionError> {
        let mut guard = self.state.lock().await;
        let handle = guard
            .instances
            .get_mut(name)
            .ok_or_else(|| SupervisionError::NotFound(name.to_string()))?;
        handle.state = state;
        Ok(())
    }

    /// Make every subsequent call fail as if the backend were down
    pub async fn set_unavailable(&self, unavailable: bool) {
        self.state.lock().await.unavailable = unavailable;
    }

    /// Make `terminate(name)` fail once
    pub async fn fail_termination_of(&self, name: &str) {
        self.state.lock().await.failing_terminations.push(name.to_string());
    }
}

fn check_available(state: &MemoryState) -> Result<(), SupervisionError> {
    if state.unavailable {
        return Err(SupervisionError::Unavailable(
            "in-memory supervisor marked unavailable".to_string(),
        ));
    }
    Ok(())
}

#[async_trait]
impl SupervisionBackend for InMemorySupervisor {
    async fn register(&self, spec: ProcessSpec) -> Result<InstanceHandle, SupervisionError> {
        let mut guard = self.state.lock().await;
        check_available(&guard)?;

        if guard.instances.contains_key(&spec.name) {
            return Err(SupervisionError::AlreadyRegistered(spec.name));
        }

        let handle = InstanceHandle {
            spec: spec.clone(),
            state: InstanceState::Running,
        };
        guard.instances.insert(spec.name.clone(), handle.clone());
        guard.registered.push(spec);
        Ok(handle)
    }

    async fn list(&self) -> Result<BTreeMap<String, InstanceHandle>, SupervisionError> {
        let guard = self.state.lock().await;
        check_available(&guard)?;
        Ok(guard.instances.clone())
    }

    async fn state(&self, name: &str) -> Result<InstanceState, SupervisionError> {
        let guard = self.state.lock().await;
        check_available(&guard)?;
        guard
            .instances
            .get(name)
            .map(|h| h.state)
            .ok_or_else(|| SupervisionError::NotFound(name.to_string()))
    }

    async fn terminate(&self, name: &str) -> Result<(), SupervisionError> {
        let mut guard = self.state.lock().await;
        check_available(&guard)?;

        if let Some(pos) = guard.failing_terminations.iter().position(|n| n == name) {
            guard.failing_terminations.remove(pos);
            return Err(SupervisionError::TerminationFailed {
                name: name.to_string(),
                reason: "injected failure".to_string(),
            });
        }

        if guard.instances.remove(name).is_none() {
            return Err(SupervisionError::NotFound(name.to_string()));
        }
        guard.terminated.push(name.to_string());
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), SupervisionError> {
        let mut guard = self.state.lock().await;
        check_available(&guard)?;
        let names: Vec<String> = guard.instances.keys().cloned().collect();
        guard.terminated.extend(names);
        guard.instances.clear();
        Ok(())
    }
}

/// Hands back one shared supervisor for every directory; the directory
/// must still exist, matching the local backend's contract
#[derive(Clone, Default)]
pub struct InMemoryConnector {
    supervisor: InMemorySupervisor,
}

impl InMemoryConnector {
    pub fn new(supervisor: InMemorySupervisor) -> Self {
        Self { supervisor }
    }

    pub fn supervisor(&self) -> &InMemorySupervisor {
        &self.supervisor
    }
}

#[async_trait]
impl SupervisionConnector for InMemoryConnector {
    async fn connect(&self, directory: &Path) -> Result<Arc<dyn SupervisionBackend>, SupervisionError> {
        if !directory.is_dir() {
            return Err(SupervisionError::Unavailable(format!(
                "supervision directory {:?} does not exist",
                directory
            )));
        }
        Ok(Arc::new(self.supervisor.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_register_list_terminate() {
        let supervisor = InMemorySupervisor::new();
        supervisor
            .register(ProcessSpec::new("pd_0-0", "epu-processdispatcher-service /tmp/a.yml", "/tmp"))
            .await
            .unwrap();

        let dup = supervisor
            .register(ProcessSpec::new("pd_0-0", "x", "/tmp"))
            .await;
        assert!(matches!(dup, Err(SupervisionError::AlreadyRegistered(_))));

        assert_eq!(supervisor.state("pd_0-0").await.unwrap(), InstanceState::Running);
        supervisor.set_state("pd_0-0", InstanceState::Failed).await.unwrap();
        assert_eq!(supervisor.list().await.unwrap()["pd_0-0"].state, InstanceState::Failed);

        supervisor.terminate("pd_0-0").await.unwrap();
        assert!(supervisor.list().await.unwrap().is_empty());
        assert_eq!(supervisor.terminated().await, vec!["pd_0-0"]);
    }

    #[tokio::test]
    async fn test_unavailable() {
        let supervisor = InMemorySupervisor::new();
        supervisor.set_unavailable(true).await;
        let result = supervisor.list().await;
        assert!(matches!(result, Err(SupervisionError::Unavailable(_))));
    }

    #[tokio::test]
    async fn test_connector_requires_directory() {
        let connector = InMemoryConnector::default();
        let missing = connector.connect(Path::new("/nonexistent/convoy")).await;
        assert!(matches!(missing, Err(SupervisionError::Unavailable(_))));

        let dir = tempfile::TempDir::new().unwrap();
        let backend = connector.connect(dir.path()).await.unwrap();
        backend.register(ProcessSpec::new("a", "sleep 1", dir.path())).await.unwrap();
        assert_eq!(connector.supervisor().registered().await.len(), 1);
    }
}
