// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! `convoy stop`

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

use super::{local_orchestrator, Settings};

#[derive(Args, Debug)]
pub struct StopArgs {
    /// Log and continue past instances that fail to stop
    #[arg(short, long)]
    pub force: bool,

    /// Logical service names to stop (default: everything)
    #[arg(value_name = "NAMES")]
    pub names: Vec<String>,
}

pub async fn run(args: StopArgs, settings: &Settings) -> Result<()> {
    let orchestrator = local_orchestrator(settings.load_config()?)?;

    let report = orchestrator
        .stop(&args.names, args.force)
        .await
        .context("Failed to stop services")?;

    for name in &report.stopped {
        println!("  stopped {}", name);
    }
    for name in &report.failed {
        println!("{}", format!("  failed to stop {}", name).yellow());
    }
    if report.wiped {
        println!(
            "{}",
            format!("✓ Removed {}", orchestrator.persistence_dir().display()).green()
        );
    } else {
        println!("{}", format!("✓ Stopped {} instance(s)", report.stopped.len()).green());
    }
    Ok(())
}
