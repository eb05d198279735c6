// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Supervision backend port
//!
//! The orchestrator never forks processes itself. It hands a command line
//! to a [`SupervisionBackend`] under a unique name and later asks the
//! backend to enumerate or terminate what it manages.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// Command line registered with the backend under a unique instance name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessSpec {
    pub name: String,
    pub command: String,
    pub working_dir: PathBuf,
    #[serde(default)]
    pub auto_restart: bool,
}

impl ProcessSpec {
    pub fn new(name: impl Into<String>, command: impl Into<String>, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            working_dir: working_dir.into(),
            auto_restart: false,
        }
    }

    pub fn with_auto_restart(mut self, auto_restart: bool) -> Self {
        self.auto_restart = auto_restart;
        self
    }

    /// Whitespace-separated tokens of the command line
    pub fn argv(&self) -> Vec<&str> {
        self.command.split_whitespace().collect()
    }
}

/// Run state of a managed instance.
///
/// `pending -> running -> {stopped, failed}`; the last two are terminal
/// from the orchestrator's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceState {
    Pending,
    Running,
    Stopped,
    Failed,
}

impl InstanceState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, InstanceState::Stopped | InstanceState::Failed)
    }
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            InstanceState::Pending => "pending",
            InstanceState::Running => "running",
            InstanceState::Stopped => "stopped",
            InstanceState::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// Backend view of one managed instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceHandle {
    pub spec: ProcessSpec,
    pub state: InstanceState,
}

impl InstanceHandle {
    pub fn name(&self) -> &str {
        &self.spec.name
    }
}

#[derive(Debug, Error)]
pub enum SupervisionError {
    #[error("{0}")]
    Unavailable(String),
    #[error("Instance already registered: {0}")]
    AlreadyRegistered(String),
    #[error("Instance not found: {0}")]
    NotFound(String),
    #[error("Failed to spawn {name}: {reason}")]
    SpawnFailed { name: String, reason: String },
    #[error("Failed to terminate {name}: {reason}")]
    TerminationFailed { name: String, reason: String },
    #[error("Registry persistence failed: {0}")]
    Registry(String),
}

#[async_trait]
pub trait SupervisionBackend: Send + Sync {
    /// Register a command line under `spec.name` and start it
    async fn register(&self, spec: ProcessSpec) -> Result<InstanceHandle, SupervisionError>;

    /// Live view of every managed instance keyed by name
    async fn list(&self) -> Result<BTreeMap<String, InstanceHandle>, SupervisionError>;

    async fn state(&self, name: &str) -> Result<InstanceState, SupervisionError>;

    /// Stop the instance and forget it
    async fn terminate(&self, name: &str) -> Result<(), SupervisionError>;

    /// Tear the backend's registry down entirely
    async fn shutdown(&self) -> Result<(), SupervisionError>;
}

/// Attaches a backend to a persistence directory
#[async_trait]
pub trait SupervisionConnector: Send + Sync {
    async fn connect(&self, directory: &Path) -> Result<Arc<dyn SupervisionBackend>, SupervisionError>;
}
