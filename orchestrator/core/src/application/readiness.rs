// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Readiness probe
//!
//! Blocks until every service declared in a descriptor answers one cheap
//! RPC. A probe that times out is retried up to the readiness bound; any
//! other failure means the service is up but unhappy and is raised at once.

use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::domain::config::ReadinessConfig;
use crate::domain::descriptor::{DeploymentDescriptor, ServiceGroup};
use crate::domain::error::HarnessError;
use crate::domain::messaging::{RpcClient, ServiceClient};

/// One RPC used to decide that a service is listening
#[derive(Debug, Clone, PartialEq)]
pub struct Probe {
    pub topic: String,
    pub method: &'static str,
    pub args: Value,
}

impl Probe {
    fn new(topic: impl Into<String>, method: &'static str, args: Value) -> Self {
        Self {
            topic: topic.into(),
            method,
            args,
        }
    }
}

/// Probes for every service in `descriptor`, in the order they are checked
pub fn probes_for(descriptor: &DeploymentDescriptor) -> Result<Vec<Probe>, HarnessError> {
    let mut probes = Vec::new();

    for name in descriptor.names(ServiceGroup::Provisioners)? {
        probes.push(Probe::new(name, "describe_nodes", json!({})));
    }
    for name in descriptor.names(ServiceGroup::ElasticityManagers)? {
        probes.push(Probe::new(name, "list_domains", json!({})));
    }
    for (node, spec) in descriptor.nodes(ServiceGroup::Nodes)? {
        for (agent, _) in spec.agent_specs(&node)? {
            probes.push(Probe::new(agent, "dump", json!({"rpc": true})));
        }
    }
    for name in descriptor.names(ServiceGroup::Schedulers)? {
        probes.push(Probe::new(name, "describe_processes", json!({})));
    }
    for name in descriptor.names(ServiceGroup::Registries)? {
        probes.push(Probe::new(name, "list_sites", json!({})));
    }

    Ok(probes)
}

pub struct ReadinessProbe {
    rpc: Arc<dyn RpcClient>,
    config: ReadinessConfig,
    call_timeout: Duration,
}

impl ReadinessProbe {
    pub fn new(rpc: Arc<dyn RpcClient>, config: ReadinessConfig, call_timeout: Duration) -> Self {
        Self {
            rpc,
            config,
            call_timeout,
        }
    }

    pub async fn block_until_ready(&self, descriptor: &DeploymentDescriptor) -> Result<usize, HarnessError> {
        let probes = probes_for(descriptor)?;
        for probe in &probes {
            self.block_on(probe).await?;
        }
        info!("All {} service(s) answered", probes.len());
        Ok(probes.len())
    }

    async fn block_on(&self, probe: &Probe) -> Result<(), HarnessError> {
        let client = ServiceClient::connect(self.rpc.clone(), probe.topic.as_str(), self.call_timeout);
        info!("Block on {}.{}", probe.topic, probe.method);

        for attempt in 1..=self.config.max_attempts {
            match client.call(probe.method, probe.args.clone()).await {
                Ok(_) => return Ok(()),
                Err(e) if e.is_timeout() => {
                    debug!("{}.{} timed out (attempt {})", probe.topic, probe.method, attempt);
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(HarnessError::Harness(format!(
            "Wasn't able to call {}.{}",
            probe.topic, probe.method
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::messaging::RpcError;
    use crate::infrastructure::descriptor_parser::DescriptorParser;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use tokio::sync::Mutex;

    /// Each topic times out a fixed number of times before answering
    struct SlowServices {
        pending_timeouts: Mutex<HashMap<String, u32>>,
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl RpcClient for SlowServices {
        async fn call(&self, topic: &str, method: &str, _args: Value, _timeout: Duration) -> Result<Value, RpcError> {
            self.calls.lock().await.push(format!("{}.{}", topic, method));
            let mut pending = self.pending_timeouts.lock().await;
            match pending.get_mut(topic) {
                Some(left) if *left > 0 => {
                    *left -= 1;
                    Err(RpcError::Timeout {
                        topic: topic.to_string(),
                        method: method.to_string(),
                    })
                }
                _ => Ok(Value::Null),
            }
        }
    }

    const DESCRIPTOR: &str = r#"
provisioners:
  prov_0: {}
epums:
  epum_0: {}
process-dispatchers:
  pd_0: {}
dt_registries:
  dtrs_0: {}
nodes:
  n1:
    process-dispatcher: pd_0
    eeagents:
      eea_1:
        launch_type: fork
"#;

    #[test]
    fn test_probe_order() {
        let descriptor = DescriptorParser::parse_yaml(DESCRIPTOR).unwrap();
        let probes: Vec<String> = probes_for(&descriptor)
            .unwrap()
            .into_iter()
            .map(|p| format!("{}.{}", p.topic, p.method))
            .collect();
        assert_eq!(
            probes,
            vec![
                "prov_0.describe_nodes",
                "epum_0.list_domains",
                "eea_1.dump",
                "pd_0.describe_processes",
                "dtrs_0.list_sites",
            ]
        );
    }

    #[tokio::test]
    async fn test_retries_timeouts_until_ready() {
        let descriptor = DescriptorParser::parse_yaml(DESCRIPTOR).unwrap();
        let rpc = Arc::new(SlowServices {
            pending_timeouts: Mutex::new(HashMap::from([("pd_0".to_string(), 3)])),
            calls: Mutex::new(Vec::new()),
        });
        let probe = ReadinessProbe::new(rpc.clone(), ReadinessConfig { max_attempts: 10 }, Duration::from_millis(10));

        assert_eq!(probe.block_until_ready(&descriptor).await.unwrap(), 5);
        let calls = rpc.calls.lock().await;
        assert_eq!(calls.iter().filter(|c| c.as_str() == "pd_0.describe_processes").count(), 4);
    }

    #[tokio::test]
    async fn test_exhaustion_names_service() {
        let descriptor = DescriptorParser::parse_yaml("dt_registries:\n  dtrs_0: {}\n").unwrap();
        let rpc = Arc::new(SlowServices {
            pending_timeouts: Mutex::new(HashMap::from([("dtrs_0".to_string(), u32::MAX)])),
            calls: Mutex::new(Vec::new()),
        });
        let probe = ReadinessProbe::new(rpc, ReadinessConfig { max_attempts: 3 }, Duration::from_millis(10));

        let err = probe.block_until_ready(&descriptor).await.unwrap_err();
        assert!(matches!(err, HarnessError::Harness(ref msg) if msg.contains("dtrs_0.list_sites")));
    }
}
