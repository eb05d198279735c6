// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! HTTP RPC transport
//!
//! Calls reach services through an RPC gateway bridging HTTP to the
//! fleet's message exchange:
//!
//! ```text
//! POST <endpoint>/rpc/<topic>/<method>
//! { "exchange": "<exchange>", "args": { ... } }
//!
//! 200 { "result": <value> }
//! 200 { "error": "<message>" }
//! ```
//!
//! A request that cannot connect or gets no answer within the per-call
//! timeout is reported as [`RpcError::Timeout`]: from the caller's side the
//! service is simply not listening yet.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

use crate::domain::messaging::{RpcClient, RpcError};

pub struct HttpRpcClient {
    client: reqwest::Client,
    endpoint: String,
    exchange: String,
}

impl HttpRpcClient {
    pub fn new(endpoint: impl Into<String>, exchange: impl Into<String>) -> Result<Self, RpcError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| RpcError::Transport(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            exchange: exchange.into(),
        })
    }

    fn url(&self, topic: &str, method: &str) -> String {
        format!("{}/rpc/{}/{}", self.endpoint, topic, method)
    }
}

#[async_trait]
impl RpcClient for HttpRpcClient {
    async fn call(&self, topic: &str, method: &str, args: Value, timeout: Duration) -> Result<Value, RpcError> {
        let url = self.url(topic, method);
        debug!("RPC {}.{} via {}", topic, method, url);

        let timed_out = || RpcError::Timeout {
            topic: topic.to_string(),
            method: method.to_string(),
        };
        let remote = |message: String| RpcError::Remote {
            topic: topic.to_string(),
            method: method.to_string(),
            message,
        };

        let response = self
            .client
            .post(&url)
            .timeout(timeout)
            .json(&json!({
                "exchange": self.exchange,
                "args": args,
            }))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() || e.is_connect() {
                    timed_out()
                } else {
                    RpcError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(remote(format!("HTTP {}: {}", status, body)));
        }

        let body: Value = response.json().await.map_err(|e| {
            if e.is_timeout() {
                timed_out()
            } else {
                RpcError::Transport(format!("Invalid response body: {}", e))
            }
        })?;

        if let Some(error) = body.get("error").filter(|e| !e.is_null()) {
            let message = error.as_str().map(str::to_string).unwrap_or_else(|| error.to_string());
            return Err(remote(message));
        }

        Ok(body.get("result").cloned().unwrap_or(Value::Null))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    #[tokio::test]
    async fn test_call_posts_exchange_and_args() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/rpc/pd_0/node_state")
            .match_body(Matcher::PartialJson(json!({
                "exchange": "xchg",
                "args": {"node_id": "nodeone", "state": "600-RUNNING"},
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"result": {"ok": true}}"#)
            .create_async()
            .await;

        let client = HttpRpcClient::new(server.url(), "xchg").unwrap();
        let result = client
            .call(
                "pd_0",
                "node_state",
                json!({"node_id": "nodeone", "domain_id": "pd_domain_default", "state": "600-RUNNING"}),
                Duration::from_secs(5),
            )
            .await
            .unwrap();

        assert_eq!(result, json!({"ok": true}));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_error_body_is_remote_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/rpc/dtrs_0/list_sites")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"error": "no such site"}"#)
            .create_async()
            .await;

        let client = HttpRpcClient::new(server.url(), "xchg").unwrap();
        let err = client
            .call("dtrs_0", "list_sites", json!({}), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::Remote { ref message, .. } if message == "no such site"));
    }

    #[tokio::test]
    async fn test_http_failure_is_remote_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/rpc/epum_0/list_domains")
            .with_status(500)
            .with_body("boom")
            .create_async()
            .await;

        let client = HttpRpcClient::new(server.url(), "xchg").unwrap();
        let err = client
            .call("epum_0", "list_domains", json!({}), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::Remote { .. }));
        assert!(!err.is_timeout());
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_timeout() {
        // Port 9 (discard) is closed on test hosts
        let client = HttpRpcClient::new("http://127.0.0.1:9", "xchg").unwrap();
        let err = client
            .call("pd_0", "describe_processes", json!({}), Duration::from_millis(500))
            .await
            .unwrap_err();
        assert!(err.is_timeout());
    }
}
