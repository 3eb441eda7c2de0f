// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
pub mod checkpoints;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Fabstir Checkpoint CLI
#[derive(Parser, Debug)]
#[command(name = "fabstir-cli")]
#[command(version = crate::version::VERSION_NUMBER)]
#[command(about = "Inspect, recover and clean up conversation checkpoints", long_about = None)]
pub struct Cli {
    /// Path to a TOML config file
    #[arg(long, global = true, env = "FABSTIR_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Recover and verify a conversation from a host
    Recover(checkpoints::RecoverArgs),

    /// Print a host's checkpoint index for a session
    Inspect(checkpoints::InspectArgs),

    /// Delete a session's checkpoints according to the retention policy
    Cleanup(checkpoints::CleanupArgs),
}

/// Execute CLI command
pub async fn execute(cli: Cli) -> Result<()> {
    let config = crate::config::NodeConfig::load(cli.config.as_deref())?;
    match cli.command {
        Commands::Recover(args) => checkpoints::recover(args, &config).await,
        Commands::Inspect(args) => checkpoints::inspect(args, &config).await,
        Commands::Cleanup(args) => checkpoints::cleanup(args, &config).await,
    }
}
