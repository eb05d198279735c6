// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Messaging / RPC port
//!
//! Running services are addressed by topic. The orchestrator only needs a
//! call-with-timeout contract that reports "nobody answered" distinctly
//! from every other failure, because that is the one case worth retrying.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::domain::node::NodeState;

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("Timed out calling {topic}.{method}")]
    Timeout { topic: String, method: String },
    #[error("Remote error from {topic}.{method}: {message}")]
    Remote {
        topic: String,
        method: String,
        message: String,
    },
    #[error("Transport error: {0}")]
    Transport(String),
}

impl RpcError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, RpcError::Timeout { .. })
    }
}

#[async_trait]
pub trait RpcClient: Send + Sync {
    async fn call(
        &self,
        topic: &str,
        method: &str,
        args: Value,
        timeout: Duration,
    ) -> Result<Value, RpcError>;
}

/// RPC client bound to one service topic
#[derive(Clone)]
pub struct ServiceClient {
    rpc: Arc<dyn RpcClient>,
    topic: String,
    timeout: Duration,
}

impl ServiceClient {
    pub fn connect(rpc: Arc<dyn RpcClient>, topic: impl Into<String>, timeout: Duration) -> Self {
        Self {
            rpc,
            topic: topic.into(),
            timeout,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub async fn call(&self, method: &str, args: Value) -> Result<Value, RpcError> {
        self.rpc.call(&self.topic, method, args, self.timeout).await
    }

    /// Scheduler-side node state assertion
    pub async fn node_state(
        &self,
        node_id: &str,
        domain_id: &str,
        state: NodeState,
    ) -> Result<Value, RpcError> {
        self.call(
            "node_state",
            json!({
                "node_id": node_id,
                "domain_id": domain_id,
                "state": state.as_str(),
            }),
        )
        .await
    }
}
