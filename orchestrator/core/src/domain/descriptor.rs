// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Deployment descriptor model
//!
//! The descriptor stays a nested YAML mapping once parsed. Typed views
//! ([`InstanceSpec`], [`NodeSpec`], [`AgentSpec`], [`FrontendSpec`]) are
//! decoded lazily while the orchestrator walks the topology, so a bad entry
//! is reported in the context of the group that owns it.
//!
//! # Descriptor Format
//!
//! ```yaml
//! process-dispatchers:
//!   pd_0:
//!     replica_count: 2
//!     config:
//!       processdispatcher:
//!         engines:
//!           default:
//!             slots: 4
//! nodes:
//!   nodeone:
//!     engine: default
//!     process-dispatcher: pd_0
//!     eeagents:
//!       eeagent_nodeone:
//!         launch_type: supd
//! ```

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use std::path::PathBuf;

use crate::domain::error::HarnessError;
use crate::domain::node::{CapabilityClass, NodeState};

/// Topology used when the caller supplies no descriptor at all
pub const DEFAULT_DESCRIPTOR: &str = r#"---
process-dispatchers:
  pd_0:
    config:
      processdispatcher:
        engines:
          default:
            deployable_type: eeagent
            slots: 4
            base_need: 1
nodes:
  nodeone:
    dt: eeagent
    process-dispatcher: pd_0
    eeagents:
      eeagent_nodeone:
        launch_type: supd
        logfile: /tmp/eeagent_nodeone.log
"#;

/// Where a descriptor comes from, in resolution priority order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DescriptorSource {
    Text(String),
    Path(PathBuf),
    BuiltIn,
}

impl DescriptorSource {
    /// Explicit string, then explicit path, then the built-in default
    pub fn resolve(text: Option<String>, path: Option<PathBuf>) -> Self {
        match (text, path) {
            (Some(text), _) => DescriptorSource::Text(text),
            (None, Some(path)) => DescriptorSource::Path(path),
            (None, None) => DescriptorSource::BuiltIn,
        }
    }
}

/// Service groups recognised at the top level of a descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceGroup {
    Provisioners,
    Registries,
    ElasticityManagers,
    Schedulers,
    Nodes,
    ContainerSchedulers,
    ContainerNodes,
    Frontends,
}

impl ServiceGroup {
    /// Dependency order used by the orchestrator
    pub const START_ORDER: [ServiceGroup; 8] = [
        ServiceGroup::Provisioners,
        ServiceGroup::Registries,
        ServiceGroup::ElasticityManagers,
        ServiceGroup::Schedulers,
        ServiceGroup::Nodes,
        ServiceGroup::ContainerSchedulers,
        ServiceGroup::ContainerNodes,
        ServiceGroup::Frontends,
    ];

    /// Accepted top-level keys, canonical key first
    pub fn keys(&self) -> &'static [&'static str] {
        match self {
            ServiceGroup::Provisioners => &["provisioners"],
            ServiceGroup::Registries => &["dt_registries", "registries"],
            ServiceGroup::ElasticityManagers => &["epums", "elasticity-managers"],
            ServiceGroup::Schedulers => &["process-dispatchers", "schedulers"],
            ServiceGroup::Nodes => &["nodes"],
            ServiceGroup::ContainerSchedulers => &["container-schedulers", "pyon-process-dispatchers"],
            ServiceGroup::ContainerNodes => &["container-nodes", "pyon-nodes"],
            ServiceGroup::Frontends => &["frontends", "phantom-instances"],
        }
    }

    pub fn label(&self) -> &'static str {
        self.keys()[0]
    }
}

/// Generic per-instance fields shared by every service kind
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InstanceSpec {
    /// Override fragment merged over the kind's default skeleton
    #[serde(default)]
    pub config: Mapping,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replica_count: Option<u32>,
}

impl InstanceSpec {
    /// Replica count from the instance level, else from inside `config`,
    /// else 1
    pub fn replicas(&self, instance: &str) -> Result<u32, HarnessError> {
        let count = match self.replica_count {
            Some(count) => u64::from(count),
            None => match self.config.get("replica_count") {
                None | Some(Value::Null) => 1,
                Some(value) => value.as_u64().ok_or_else(|| {
                    HarnessError::DeploymentDescription(format!(
                        "replica_count for '{}' must be a positive integer",
                        instance
                    ))
                })?,
            },
        };

        if count == 0 || count > u64::from(u32::MAX) {
            return Err(HarnessError::DeploymentDescription(format!(
                "replica_count for '{}' must be a positive integer",
                instance
            )));
        }
        Ok(count as u32)
    }
}

/// A logical compute unit hosting agents, owned by one scheduler
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeSpec {
    #[serde(
        default,
        rename = "process-dispatcher",
        alias = "scheduler",
        skip_serializing_if = "Option::is_none"
    )]
    pub scheduler: Option<String>,

    #[serde(default, rename = "engine", alias = "capability")]
    pub capability: CapabilityClass,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<NodeState>,

    /// Deployable type the node was built from; informational
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dt: Option<String>,

    #[serde(default, rename = "eeagents", alias = "agents")]
    pub agents: Mapping,
}

impl NodeSpec {
    pub fn desired_state(&self) -> NodeState {
        self.state.unwrap_or_default()
    }
}

/// One agent process co-located on a node
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub launch_type: Option<String>,

    /// Overrides the owning node's scheduler
    #[serde(
        default,
        rename = "process-dispatcher",
        alias = "scheduler",
        skip_serializing_if = "Option::is_none"
    )]
    pub scheduler: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supd_directory: Option<PathBuf>,

    #[serde(default, alias = "install_directory", skip_serializing_if = "Option::is_none")]
    pub pyon_directory: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logfile: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slots: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heartbeat: Option<u32>,

    #[serde(default)]
    pub config: Mapping,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrontendUser {
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub password: String,
}

/// Web frontend fronting the fleet
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FrontendSpec {
    #[serde(default)]
    pub config: Mapping,

    #[serde(default)]
    pub users: Vec<FrontendUser>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

impl FrontendSpec {
    pub fn port(&self) -> u16 {
        self.port.unwrap_or(8080)
    }
}

/// Parsed topology: a mapping of service group -> instance name -> spec
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeploymentDescriptor {
    root: Mapping,
}

impl DeploymentDescriptor {
    pub fn from_value(value: Value) -> Result<Self, HarnessError> {
        match value {
            Value::Mapping(root) => Ok(Self { root }),
            Value::Null => Ok(Self::default()),
            other => Err(HarnessError::DeploymentDescription(format!(
                "descriptor must be a mapping of service groups, got {}",
                value_kind(&other)
            ))),
        }
    }

    pub fn as_mapping(&self) -> &Mapping {
        &self.root
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_empty()
    }

    /// Raw `(name, spec)` entries of a group in document order
    pub fn entries(&self, group: ServiceGroup) -> Result<Vec<(String, Value)>, HarnessError> {
        let Some(section) = group.keys().iter().find_map(|key| self.root.get(*key)) else {
            return Ok(Vec::new());
        };

        let section = match section {
            Value::Null => return Ok(Vec::new()),
            Value::Mapping(section) => section,
            other => {
                return Err(HarnessError::DeploymentDescription(format!(
                    "'{}' must be a mapping of instance names, got {}",
                    group.label(),
                    value_kind(other)
                )))
            }
        };

        section
            .iter()
            .map(|(name, spec)| {
                let name = scalar_key(name).ok_or_else(|| {
                    HarnessError::DeploymentDescription(format!(
                        "'{}' contains a non-scalar instance name",
                        group.label()
                    ))
                })?;
                Ok((name, spec.clone()))
            })
            .collect()
    }

    pub fn instances(&self, group: ServiceGroup) -> Result<Vec<(String, InstanceSpec)>, HarnessError> {
        self.decode_group(group)
    }

    pub fn nodes(&self, group: ServiceGroup) -> Result<Vec<(String, NodeSpec)>, HarnessError> {
        self.decode_group(group)
    }

    pub fn frontends(&self) -> Result<Vec<(String, FrontendSpec)>, HarnessError> {
        self.decode_group(ServiceGroup::Frontends)
    }

    /// Every instance name declared in the given groups
    pub fn names(&self, group: ServiceGroup) -> Result<Vec<String>, HarnessError> {
        Ok(self.entries(group)?.into_iter().map(|(name, _)| name).collect())
    }

    fn decode_group<T: DeserializeOwned + Default>(
        &self,
        group: ServiceGroup,
    ) -> Result<Vec<(String, T)>, HarnessError> {
        self.entries(group)?
            .into_iter()
            .map(|(name, spec)| {
                let decoded = decode_entry(spec).map_err(|e| {
                    HarnessError::DeploymentDescription(format!(
                        "{} '{}': {}",
                        group.label(),
                        name,
                        e
                    ))
                })?;
                Ok((name, decoded))
            })
            .collect()
    }
}

impl NodeSpec {
    /// Decoded agents in document order
    pub fn agent_specs(&self, node: &str) -> Result<Vec<(String, AgentSpec)>, HarnessError> {
        self.agents
            .iter()
            .map(|(name, spec)| {
                let name = scalar_key(name).ok_or_else(|| {
                    HarnessError::DeploymentDescription(format!(
                        "node '{}' contains a non-scalar agent name",
                        node
                    ))
                })?;
                let decoded = decode_entry(spec.clone()).map_err(|e| {
                    HarnessError::DeploymentDescription(format!(
                        "agent '{}' on node '{}': {}",
                        name, node, e
                    ))
                })?;
                Ok((name, decoded))
            })
            .collect()
    }
}

fn decode_entry<T: DeserializeOwned + Default>(spec: Value) -> Result<T, serde_yaml::Error> {
    match spec {
        Value::Null => Ok(T::default()),
        other => serde_yaml::from_value(other),
    }
}

fn scalar_key(key: &Value) -> Option<String> {
    match key {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Sequence(_) => "a sequence",
        Value::Mapping(_) => "a mapping",
        Value::Tagged(_) => "a tagged value",
    }
}
