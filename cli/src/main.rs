// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # convoy
//!
//! Stands up a local multi-process service fleet from one deployment
//! descriptor and tears it down again.
//!
//! ## Commands
//!
//! - `convoy start [DESCRIPTOR]` - Launch every service the descriptor declares
//! - `convoy stop [--force] [NAMES...]` - Stop some or all managed instances
//! - `convoy status` - One line per instance; exits 1 if any is not running
//! - `convoy wait [DESCRIPTOR]` - Block until every declared service answers
//! - `convoy config show|validate|generate` - Configuration management

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use tracing::error;

use convoy_cli::commands::{self, ConfigCommand, StartArgs, StopArgs, WaitArgs};

/// convoy - local deployment orchestrator
#[derive(Parser)]
#[command(name = "convoy")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file (overrides discovery)
    #[arg(
        short,
        long,
        global = true,
        env = "CONVOY_CONFIG_PATH",
        value_name = "FILE"
    )]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "CONVOY_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Persistence directory holding the managed fleet
    #[arg(long, global = true, value_name = "DIR")]
    persistence_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the services declared in a deployment descriptor
    Start(StartArgs),

    /// Stop previously started services
    Stop(StopArgs),

    /// Show the state of every managed instance
    Status,

    /// Block until every service in a descriptor answers
    Wait(WaitArgs),

    /// Configuration management
    #[command(name = "config")]
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = init_logging(&cli.log_level) {
        eprintln!("{}", format!("Error: {:#}", e).red());
        std::process::exit(1);
    }

    match run(cli).await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            error!("{:#}", e);
            eprintln!("{}", format!("Error: {:#}", e).red());
            std::process::exit(1);
        }
    }
}

async fn run(cli: Cli) -> Result<i32> {
    let settings = commands::Settings {
        config_path: cli.config,
        persistence_dir: cli.persistence_dir,
    };

    match cli.command {
        Some(Commands::Start(args)) => commands::start::run(args, &settings).await.map(|_| 0),
        Some(Commands::Stop(args)) => commands::stop::run(args, &settings).await.map(|_| 0),
        Some(Commands::Status) => commands::status::run(&settings).await,
        Some(Commands::Wait(args)) => commands::wait::run(args, &settings).await.map(|_| 0),
        Some(Commands::Config { command }) => {
            commands::config::handle_command(command, &settings).await.map(|_| 0)
        }
        None => {
            // No command provided - show help
            eprintln!("{}", "No command specified. Use --help for usage.".yellow());
            Ok(1)
        }
    }
}

/// Initialize tracing subscriber for logging
fn init_logging(level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .context("Failed to create log filter")?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .init();

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stop_arguments() {
        let cli = Cli::try_parse_from(["convoy", "stop", "--force", "pd0", "agentA"]).unwrap();
        match cli.command {
            Some(Commands::Stop(args)) => {
                assert!(args.force);
                assert_eq!(args.names, vec!["pd0", "agentA"]);
            }
            _ => panic!("expected stop"),
        }
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "convoy",
            "start",
            "deploy.yml",
            "--persistence-dir",
            "/tmp/fleet",
            "--dry-run",
        ])
        .unwrap();
        assert_eq!(cli.persistence_dir, Some(PathBuf::from("/tmp/fleet")));
        match cli.command {
            Some(Commands::Start(args)) => {
                assert!(args.dry_run);
                assert_eq!(args.descriptor, Some(PathBuf::from("deploy.yml")));
            }
            _ => panic!("expected start"),
        }
    }

    #[test]
    fn test_descriptor_file_and_inline_conflict() {
        let result = Cli::try_parse_from(["convoy", "start", "deploy.yml", "--inline", "nodes: {}"]);
        assert!(result.is_err());
    }
}
