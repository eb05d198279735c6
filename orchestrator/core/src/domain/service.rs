// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Service kinds known to the orchestrator
//!
//! Each variant selects one config skeleton and one executable. Variants
//! that need identity beyond their instance name carry it.

use std::fmt;
use std::path::PathBuf;

use crate::domain::config::ExecutablesConfig;
use crate::domain::node::LaunchMode;

/// Identity of an agent process: who it reports to and how it runs work
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentProfile {
    pub node_id: String,
    pub scheduler: String,
    pub launch_mode: LaunchMode,
    pub slots: u32,
    pub heartbeat: u32,
    pub logfile: Option<PathBuf>,
}

impl AgentProfile {
    pub const DEFAULT_SLOTS: u32 = 8;
    pub const DEFAULT_HEARTBEAT: u32 = 30;

    pub fn new(node_id: impl Into<String>, scheduler: impl Into<String>, launch_mode: LaunchMode) -> Self {
        Self {
            node_id: node_id.into(),
            scheduler: scheduler.into(),
            launch_mode,
            slots: Self::DEFAULT_SLOTS,
            heartbeat: Self::DEFAULT_HEARTBEAT,
            logfile: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceKind {
    Provisioner,
    Registry,
    ElasticityManager,
    Scheduler,
    Agent(AgentProfile),
    /// Scheduler hosted inside a cooperative container
    ContainerScheduler,
    /// Agent hosted inside a cooperative container on `node`
    ContainerAgent { node: String },
    Frontend { authz_file: PathBuf },
}

impl ServiceKind {
    pub fn label(&self) -> &'static str {
        match self {
            ServiceKind::Provisioner => "provisioner",
            ServiceKind::Registry => "registry",
            ServiceKind::ElasticityManager => "elasticity manager",
            ServiceKind::Scheduler => "scheduler",
            ServiceKind::Agent(_) => "agent",
            ServiceKind::ContainerScheduler => "container scheduler",
            ServiceKind::ContainerAgent { .. } => "container agent",
            ServiceKind::Frontend { .. } => "frontend",
        }
    }

    /// Top-level section of the generated artifact owned by this kind,
    /// also used as the logger name
    pub fn config_section(&self) -> &'static str {
        match self {
            ServiceKind::Provisioner => "provisioner",
            ServiceKind::Registry => "dtrs",
            ServiceKind::ElasticityManager => "epumanagement",
            ServiceKind::Scheduler | ServiceKind::ContainerScheduler => "processdispatcher",
            ServiceKind::Agent(_) | ServiceKind::ContainerAgent { .. } => "eeagent",
            ServiceKind::Frontend { .. } => "phantom",
        }
    }

    /// Hosted in a cooperative container and launched through a release file
    pub fn is_container(&self) -> bool {
        matches!(self, ServiceKind::ContainerScheduler | ServiceKind::ContainerAgent { .. })
    }

    /// Executable for directly launched kinds
    pub fn executable<'a>(&self, executables: &'a ExecutablesConfig) -> &'a str {
        match self {
            ServiceKind::Provisioner => &executables.provisioner,
            ServiceKind::Registry => &executables.registry,
            ServiceKind::ElasticityManager => &executables.elasticity_manager,
            ServiceKind::Scheduler => &executables.scheduler,
            ServiceKind::Agent(_) => &executables.agent,
            ServiceKind::ContainerScheduler | ServiceKind::ContainerAgent { .. } => {
                &executables.container_launcher
            }
            ServiceKind::Frontend { .. } => &executables.frontend,
        }
    }
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Concrete managed-instance name for a replica of a logical service
pub fn replica_name(logical: &str, index: u32) -> String {
    format!("{}-{}", logical, index)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replica_name() {
        assert_eq!(replica_name("pd0", 0), "pd0-0");
        assert_eq!(replica_name("pd0", 2), "pd0-2");
    }

    #[test]
    fn test_kind_dispatch_tables() {
        let executables = ExecutablesConfig::default();
        assert_eq!(ServiceKind::Scheduler.executable(&executables), "epu-processdispatcher-service");
        assert_eq!(ServiceKind::Registry.config_section(), "dtrs");

        let agent = ServiceKind::Agent(AgentProfile::new("n1", "pd_0", LaunchMode::Fork));
        assert_eq!(agent.executable(&executables), "eeagent");
        assert_eq!(agent.config_section(), "eeagent");

        let container = ServiceKind::ContainerAgent { node: "n1".to_string() };
        assert!(container.is_container());
        assert_eq!(container.executable(&executables), "bin/pycc");
    }
}
