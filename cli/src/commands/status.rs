// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! `convoy status`

use anyhow::{Context, Result};
use colored::Colorize;

use convoy_core::domain::supervision::InstanceState;

use super::{local_orchestrator, Settings};

/// Prints one line per instance and returns the process exit code
pub async fn run(settings: &Settings) -> Result<i32> {
    let orchestrator = local_orchestrator(settings.load_config()?)?;
    let status = orchestrator.status().await.context("Failed to query status")?;

    if status.instances.is_empty() {
        println!("{}", "No managed instances".dimmed());
    }
    for (name, state) in &status.instances {
        let state_label = match state {
            InstanceState::Running => state.to_string().green(),
            InstanceState::Pending => state.to_string().yellow(),
            InstanceState::Stopped | InstanceState::Failed => state.to_string().red(),
        };
        println!("{} is {}", name.bold(), state_label);
    }

    Ok(status.exit_code)
}
