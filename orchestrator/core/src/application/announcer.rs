// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Node announcement
//!
//! Once a node's agents are launched, the node is asserted to its scheduler
//! as being in a given state. The scheduler may not be listening yet, so
//! timeouts are retried with exponential backoff: after attempt `n` times
//! out, the announcer waits `2^n` backoff units. Running out of attempts is
//! logged and reported, never raised.

use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::domain::config::AnnounceConfig;
use crate::domain::error::HarnessError;
use crate::domain::messaging::{RpcClient, ServiceClient};
use crate::domain::node::{CapabilityClass, NodeState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnnouncementOutcome {
    Acknowledged { attempts: u32 },
    /// Every attempt timed out
    Unreachable { attempts: u32 },
}

impl AnnouncementOutcome {
    pub fn is_acknowledged(&self) -> bool {
        matches!(self, AnnouncementOutcome::Acknowledged { .. })
    }
}

pub struct Announcer {
    rpc: Arc<dyn RpcClient>,
    config: AnnounceConfig,
    call_timeout: Duration,
}

impl Announcer {
    pub fn new(rpc: Arc<dyn RpcClient>, config: AnnounceConfig, call_timeout: Duration) -> Self {
        Self {
            rpc,
            config,
            call_timeout,
        }
    }

    pub async fn announce(
        &self,
        node: &str,
        capability: &CapabilityClass,
        scheduler: &str,
        state: NodeState,
    ) -> Result<AnnouncementOutcome, HarnessError> {
        let client = ServiceClient::connect(self.rpc.clone(), scheduler, self.call_timeout);
        let domain_id = capability.domain_id();
        info!(
            "Announcing {} of engine {} is '{}' to {}",
            node, capability, state, scheduler
        );

        let max_attempts = self.config.max_attempts.max(1);
        for attempt in 1..=max_attempts {
            match client.node_state(node, &domain_id, state).await {
                Ok(_) => return Ok(AnnouncementOutcome::Acknowledged { attempts: attempt }),
                Err(e) if e.is_timeout() => {
                    if attempt == max_attempts {
                        break;
                    }
                    let wait = self.backoff(attempt);
                    warn!("Scheduler '{}' not available yet. Waiting {:?}", scheduler, wait);
                    tokio::time::sleep(wait).await;
                }
                Err(e) => return Err(e.into()),
            }
        }

        warn!(
            "Scheduler '{}' did not acknowledge node '{}' after {} attempts; continuing",
            scheduler, node, max_attempts
        );
        Ok(AnnouncementOutcome::Unreachable {
            attempts: max_attempts,
        })
    }

    fn backoff(&self, attempt: u32) -> Duration {
        self.config
            .backoff_unit()
            .saturating_mul(2u32.saturating_pow(attempt))
    }
}
