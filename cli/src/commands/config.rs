// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Configuration management commands
//!
//! Commands: show, validate, generate

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::PathBuf;

use convoy_core::domain::config::OrchestratorConfig;

use super::Settings;

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Show config file paths checked
        #[arg(long)]
        paths: bool,
    },

    /// Validate configuration file
    Validate {
        /// Path to config file (default: discover)
        #[arg(value_name = "FILE")]
        file: Option<PathBuf>,
    },

    /// Generate sample configuration
    Generate {
        /// Output path (default: ./convoy-config.yaml)
        #[arg(short, long, default_value = "./convoy-config.yaml")]
        output: PathBuf,

        /// Include examples and comments
        #[arg(long)]
        examples: bool,
    },
}

pub async fn handle_command(command: ConfigCommand, settings: &Settings) -> Result<()> {
    match command {
        ConfigCommand::Show { paths } => show(settings, paths).await,
        ConfigCommand::Validate { file } => validate(file.or_else(|| settings.config_path.clone())).await,
        ConfigCommand::Generate { output, examples } => generate(output, examples).await,
    }
}

async fn show(settings: &Settings, show_paths: bool) -> Result<()> {
    let config = settings.load_config()?;

    if show_paths {
        println!("{}", "Configuration discovery paths:".bold());
        if let Some(path) = &settings.config_path {
            println!("  1. --config flag: {}", path.display());
        } else {
            println!("  1. --config flag: {}", "(not set)".dimmed());
        }
        println!(
            "  2. CONVOY_CONFIG_PATH: {}",
            std::env::var("CONVOY_CONFIG_PATH")
                .unwrap_or_else(|_| "(not set)".to_string())
                .dimmed()
        );
        println!("  3. ./convoy-config.yaml");
        println!("  4. ~/.convoy/config.yaml");
        println!("  5. /etc/convoy/config.yaml");
        println!();
    }

    println!("{}", "Current configuration:".bold());
    println!();

    println!("{}", "Fleet:".bold());
    println!("  Persistence directory: {}", config.persistence_dir.display());
    println!("  Log directory: {}", config.log_dir.display());
    println!("  Artifact directory: {}", config.artifact_dir().display());
    println!(
        "  Exchange: {}",
        config.exchange.as_deref().unwrap_or("(fresh UUID per run)")
    );
    println!();

    println!("{}", "Messaging:".bold());
    println!(
        "  Broker: {}@{}:{}{}",
        config.messaging.username, config.messaging.host, config.messaging.port, config.messaging.vhost
    );
    println!("  RPC endpoint: {}", config.messaging.rpc_endpoint);
    println!("  Call timeout: {:?}", config.messaging.call_timeout());
    println!();

    println!("{}", "Retries:".bold());
    println!(
        "  Announce: {} attempts, backoff unit {:?}",
        config.announce.max_attempts,
        config.announce.backoff_unit()
    );
    println!("  Readiness: {} attempts", config.readiness.max_attempts);
    println!();

    println!("{}", "Executables:".bold());
    let executables = &config.executables;
    println!("  scheduler: {}", executables.scheduler);
    println!("  agent: {}", executables.agent);
    println!("  provisioner: {}", executables.provisioner);
    println!("  registry: {}", executables.registry);
    println!("  elasticity manager: {}", executables.elasticity_manager);
    println!("  frontend: {}", executables.frontend);
    println!("  container launcher: {}", executables.container_launcher);
    if let Some(dir) = &config.container_directory {
        println!("  container directory: {}", dir.display());
    }
    println!();

    Ok(())
}

async fn validate(config_path: Option<PathBuf>) -> Result<()> {
    println!("Validating configuration...");

    let config = OrchestratorConfig::load_or_default(config_path).context("Failed to load configuration")?;

    config.validate().context("Configuration validation failed")?;

    println!("{}", "✓ Configuration is valid".green());

    Ok(())
}

async fn generate(output: PathBuf, with_examples: bool) -> Result<()> {
    let sample = if with_examples {
        include_str!("../../templates/config-with-examples.yaml")
    } else {
        include_str!("../../templates/config-minimal.yaml")
    };

    std::fs::write(&output, sample).with_context(|| format!("Failed to write config to {:?}", output))?;

    println!(
        "{}",
        format!("✓ Configuration generated: {}", output.display()).green()
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_templates_parse() {
        let minimal = include_str!("../../templates/config-minimal.yaml");
        let config = OrchestratorConfig::from_yaml_str(minimal).unwrap();
        assert!(config.validate().is_ok());

        let full = include_str!("../../templates/config-with-examples.yaml");
        let config = OrchestratorConfig::from_yaml_str(full).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.announce.max_attempts, 10);
    }

    #[tokio::test]
    async fn test_generate_writes_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let output = dir.path().join("convoy-config.yaml");
        generate(output.clone(), false).await.unwrap();
        assert!(OrchestratorConfig::from_yaml_file(&output).is_ok());
    }
}
