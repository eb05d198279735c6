// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Command implementations for convoy CLI

pub mod config;
pub mod start;
pub mod status;
pub mod stop;
pub mod wait;

pub use self::config::ConfigCommand;
pub use self::start::StartArgs;
pub use self::stop::StopArgs;
pub use self::wait::WaitArgs;

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;

use convoy_core::application::Orchestrator;
use convoy_core::domain::config::OrchestratorConfig;
use convoy_core::domain::supervision::SupervisionConnector;
use convoy_core::infrastructure::messaging::HttpRpcClient;
use convoy_core::infrastructure::supervision::LocalProcessConnector;

/// Global flags shared by every command
#[derive(Debug, Clone, Default)]
pub struct Settings {
    pub config_path: Option<PathBuf>,
    pub persistence_dir: Option<PathBuf>,
}

impl Settings {
    /// Discovered configuration with `--persistence-dir` applied last
    pub fn load_config(&self) -> Result<OrchestratorConfig> {
        let mut config = OrchestratorConfig::load_or_default(self.config_path.clone())
            .context("Failed to load configuration")?;
        if let Some(dir) = &self.persistence_dir {
            config.persistence_dir = dir.clone();
        }
        config.validate().context("Configuration validation failed")?;
        Ok(config)
    }
}

pub(crate) fn rpc_client(config: &mut OrchestratorConfig) -> Result<Arc<HttpRpcClient>> {
    let exchange = config.resolve_exchange();
    let client = HttpRpcClient::new(config.messaging.rpc_endpoint.clone(), exchange)
        .context("Failed to create RPC client")?;
    Ok(Arc::new(client))
}

/// Orchestrator over real local processes
pub(crate) fn local_orchestrator(mut config: OrchestratorConfig) -> Result<Orchestrator> {
    let rpc = rpc_client(&mut config)?;
    let connector: Arc<dyn SupervisionConnector> = Arc::new(LocalProcessConnector::new());
    Ok(Orchestrator::new(config, connector, rpc))
}
