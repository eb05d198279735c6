// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! `convoy start`
//!
//! Launches every service the descriptor declares under the persistence
//! directory. `--dry-run` synthesizes configs and walks the topology against
//! an in-memory backend in a scratch directory, then prints what would have
//! been launched.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use convoy_core::application::{Orchestrator, StartReport};
use convoy_core::domain::config::OrchestratorConfig;
use convoy_core::domain::descriptor::DescriptorSource;
use convoy_core::infrastructure::supervision::{InMemoryConnector, InMemorySupervisor};

use super::{local_orchestrator, rpc_client, Settings};

#[derive(Args, Debug)]
pub struct StartArgs {
    /// Deployment descriptor file (default: one scheduler, one node)
    #[arg(value_name = "DESCRIPTOR")]
    pub descriptor: Option<PathBuf>,

    /// Inline descriptor YAML
    #[arg(long, value_name = "YAML", conflicts_with = "descriptor")]
    pub inline: Option<String>,

    /// Messaging exchange for this run (default: fresh UUID)
    #[arg(long)]
    pub exchange: Option<String>,

    /// Print the launch plan without starting anything
    #[arg(long)]
    pub dry_run: bool,
}

pub async fn run(args: StartArgs, settings: &Settings) -> Result<()> {
    let mut config = settings.load_config()?;
    if let Some(exchange) = args.exchange {
        config.exchange = Some(exchange);
    }
    let source = DescriptorSource::resolve(args.inline, args.descriptor);

    if args.dry_run {
        return dry_run(config, &source).await;
    }

    let orchestrator = local_orchestrator(config)?;
    info!("Persistence directory: {:?}", orchestrator.persistence_dir());

    let report = orchestrator
        .start(&source)
        .await
        .context("Failed to start deployment")?;
    print_report(&report);
    Ok(())
}

async fn dry_run(mut config: OrchestratorConfig, source: &DescriptorSource) -> Result<()> {
    let scratch = tempfile::Builder::new()
        .prefix("convoy-dry-run-")
        .tempdir()
        .context("Failed to create scratch directory")?;
    config.persistence_dir = scratch.path().join("supervision");
    config.log_dir = scratch.path().join("logs");
    config.artifact_dir = Some(scratch.path().join("artifacts"));

    let supervisor = InMemorySupervisor::new();
    let rpc = rpc_client(&mut config)?;
    let orchestrator = Orchestrator::new(config, Arc::new(InMemoryConnector::new(supervisor.clone())), rpc)
        .with_announcements(false);

    let report = orchestrator.start(source).await.context("Dry run failed")?;

    println!("{}", "Dry run: nothing was started.".yellow().bold());
    println!("Exchange: {}", report.exchange);
    println!();
    for spec in supervisor.registered().await {
        let restart = if spec.auto_restart { " (auto-restart)" } else { "" };
        println!("  {}{}", spec.name.bold(), restart.dimmed());
        println!("    cwd: {}", spec.working_dir.display());
        println!("    cmd: {}", spec.command);
    }
    Ok(())
}

fn print_report(report: &StartReport) {
    println!(
        "{}",
        format!("✓ Started {} instance(s) on exchange {}", report.instances.len(), report.exchange).green()
    );
    for instance in &report.instances {
        println!("  {} ({})", instance.name.bold(), instance.kind);
    }

    for announcement in &report.announcements {
        if announcement.outcome.is_acknowledged() {
            println!(
                "  node {} announced to {}",
                announcement.node, announcement.scheduler
            );
        } else {
            println!(
                "{}",
                format!(
                    "  node {} not acknowledged by {} (scheduler may still be starting)",
                    announcement.node, announcement.scheduler
                )
                .yellow()
            );
        }
    }
}
