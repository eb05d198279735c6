// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Orchestrator error taxonomy
//!
//! | Variant | Raised when | Recovery |
//! |---------|-------------|----------|
//! | `DeploymentDescription` | descriptor is structurally unusable | abort `start` |
//! | `SupervisionUnavailable` | backend cannot be reached | abort operation |
//! | `Harness` | directory already present, non-forced cleanup failure | abort operation |
//! | `InvalidArgument` | caller broke an API contract | abort operation |
//!
//! Announcement timeouts and single-instance cleanup failures never show up
//! here; they are absorbed and logged where they happen. Non-timeout RPC
//! failures do, as `Rpc`.

use std::path::PathBuf;
use thiserror::Error;

use crate::domain::messaging::RpcError;
use crate::domain::supervision::SupervisionError;

#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("Invalid deployment description: {0}")]
    DeploymentDescription(String),

    #[error("Supervision backend unavailable: {0}")]
    SupervisionUnavailable(String),

    #[error("{0}")]
    Harness(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Supervision error: {0}")]
    Supervision(SupervisionError),

    #[error("RPC error: {0}")]
    Rpc(#[from] RpcError),
}

impl HarnessError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

impl From<SupervisionError> for HarnessError {
    fn from(err: SupervisionError) -> Self {
        match err {
            SupervisionError::Unavailable(msg) => HarnessError::SupervisionUnavailable(msg),
            other => HarnessError::Supervision(other),
        }
    }
}
