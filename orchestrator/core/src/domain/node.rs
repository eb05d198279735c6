// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Node model: announcement states, capability classes and agent launch modes

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use crate::domain::error::HarnessError;

/// Node state as understood by the scheduler. Wire values carry an ordering
/// prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum NodeState {
    #[serde(rename = "200-REQUESTING")]
    Requesting,
    #[serde(rename = "500-PENDING")]
    Pending,
    #[default]
    #[serde(rename = "600-RUNNING")]
    Running,
    #[serde(rename = "700-TERMINATING")]
    Terminating,
    #[serde(rename = "800-TERMINATED")]
    Terminated,
    #[serde(rename = "900-FAILED")]
    Failed,
}

impl NodeState {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeState::Requesting => "200-REQUESTING",
            NodeState::Pending => "500-PENDING",
            NodeState::Running => "600-RUNNING",
            NodeState::Terminating => "700-TERMINATING",
            NodeState::Terminated => "800-TERMINATED",
            NodeState::Failed => "900-FAILED",
        }
    }
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Label matched against scheduler resource domains (the "engine" of a node)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CapabilityClass(pub String);

impl CapabilityClass {
    pub fn new(class: impl Into<String>) -> Self {
        Self(class.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn domain_id(&self) -> String {
        format!("pd_domain_{}", self.0)
    }
}

impl Default for CapabilityClass {
    fn default() -> Self {
        Self::new("default")
    }
}

impl fmt::Display for CapabilityClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// How an agent executes the work it is handed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchMode {
    /// Child processes under the agent's own supervisor; needs a companion
    /// directory for that supervisor's state
    Supervised { directory: Option<PathBuf> },
    Fork,
    /// Cooperative container; needs the container installation directory
    Container {
        variant: String,
        install_directory: Option<PathBuf>,
        system_name: Option<String>,
    },
}

impl LaunchMode {
    pub fn parse(
        launch_type: &str,
        supervisor_directory: Option<PathBuf>,
        install_directory: Option<PathBuf>,
        system_name: Option<String>,
    ) -> Result<Self, HarnessError> {
        match launch_type {
            "supd" => Ok(LaunchMode::Supervised {
                directory: supervisor_directory,
            }),
            "fork" => Ok(LaunchMode::Fork),
            other if other.starts_with("pyon") => Ok(LaunchMode::Container {
                variant: other.to_string(),
                install_directory,
                system_name,
            }),
            other => Err(HarnessError::DeploymentDescription(format!(
                "Unknown launch_type '{}'. Supported: supd, fork, pyon, pyon_single",
                other
            ))),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            LaunchMode::Supervised { .. } => "supd",
            LaunchMode::Fork => "fork",
            LaunchMode::Container { variant, .. } => variant,
        }
    }

    pub fn is_container(&self) -> bool {
        matches!(self, LaunchMode::Container { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_domain_id_from_capability_class() {
        assert_eq!(CapabilityClass::default().domain_id(), "pd_domain_default");
        assert_eq!(CapabilityClass::new("gpu").domain_id(), "pd_domain_gpu");
    }

    #[test]
    fn test_node_state_wire_format() {
        let yaml = serde_yaml::to_string(&NodeState::Running).unwrap();
        assert_eq!(yaml.trim(), "600-RUNNING");
        let parsed: NodeState = serde_yaml::from_str("900-FAILED").unwrap();
        assert_eq!(parsed, NodeState::Failed);
        assert_eq!(NodeState::default(), NodeState::Running);
    }

    #[test]
    fn test_launch_mode_parse() {
        let supd = LaunchMode::parse("supd", Some(PathBuf::from("/tmp/supd")), None, None).unwrap();
        assert_eq!(supd.name(), "supd");
        assert!(!supd.is_container());

        let pyon = LaunchMode::parse("pyon_single", None, Some(PathBuf::from("/opt/pyon")), None).unwrap();
        assert_eq!(pyon.name(), "pyon_single");
        assert!(pyon.is_container());

        let err = LaunchMode::parse("docker", None, None, None).unwrap_err();
        assert!(matches!(err, HarnessError::DeploymentDescription(_)));
    }
}
