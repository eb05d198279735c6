// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! `convoy wait`

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use std::path::PathBuf;

use convoy_core::application::ReadinessProbe;
use convoy_core::domain::descriptor::DescriptorSource;
use convoy_core::infrastructure::descriptor_parser::DescriptorParser;

use super::{rpc_client, Settings};

#[derive(Args, Debug)]
pub struct WaitArgs {
    /// Deployment descriptor file (default: one scheduler, one node)
    #[arg(value_name = "DESCRIPTOR")]
    pub descriptor: Option<PathBuf>,

    /// Messaging exchange the fleet was started on
    #[arg(long)]
    pub exchange: Option<String>,
}

pub async fn run(args: WaitArgs, settings: &Settings) -> Result<()> {
    let mut config = settings.load_config()?;
    if let Some(exchange) = args.exchange {
        config.exchange = Some(exchange);
    }
    if config.exchange.is_none() {
        anyhow::bail!("No exchange configured; pass --exchange or set CONVOY_EXCHANGE");
    }

    let descriptor = DescriptorParser::load(&DescriptorSource::resolve(None, args.descriptor))
        .context("Failed to load descriptor")?;
    let rpc = rpc_client(&mut config)?;
    let probe = ReadinessProbe::new(rpc, config.readiness.clone(), config.messaging.call_timeout());

    let answered = probe
        .block_until_ready(&descriptor)
        .await
        .context("Services did not become ready")?;
    println!("{}", format!("✓ {} service(s) ready", answered).green());
    Ok(())
}
