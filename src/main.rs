// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
use anyhow::{Context, Result};
use clap::Parser;
use fabstir_checkpoint::{
    api::{start_server, AppState},
    checkpoint::CheckpointDiscovery,
    config::NodeConfig,
    crypto::{address_from_private_key, extract_host_private_key},
    storage::S5Client,
    version,
};
use std::{env, path::PathBuf, sync::Arc};
use tokio::signal;

/// Fabstir checkpoint node: serves checkpoint indices for SDK recovery
#[derive(Parser, Debug)]
#[command(name = "fabstir-checkpoint", version = version::VERSION_NUMBER)]
struct NodeArgs {
    /// Path to a TOML config file
    #[arg(long, env = "FABSTIR_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    // Initialize tracing subscriber for logging
    if env::var("RUST_LOG").is_err() {
        env::set_var("RUST_LOG", "info");
    }
    tracing_subscriber::fmt::init();

    let args = NodeArgs::parse();

    println!("🚀 Starting {}...\n", version::get_version_string());
    println!("📦 BUILD VERSION: {}", version::VERSION);
    println!("📅 Build Date: {}", version::BUILD_DATE);
    println!();

    let config = NodeConfig::load(args.config.as_deref())?;

    // Host identity: checkpoints live under the host's address
    let host_key = extract_host_private_key()
        .context("HOST_PRIVATE_KEY is required to serve checkpoints")?;
    let host_address = address_from_private_key(&host_key)?;

    let storage = S5Client::create(config.storage_config())
        .map_err(|e| anyhow::anyhow!("Failed to open S5 storage: {}", e))?;
    tracing::info!(
        "[S5] Storage backend: {:?} (host {})",
        config.storage.backend,
        host_address
    );

    let discovery = CheckpointDiscovery::new(storage, &host_address);
    let state = Arc::new(AppState::new(discovery));
    let addr = config.api_addr()?;

    let separator = "=".repeat(60);
    println!("{}", separator);
    println!("Host Address:   {}", host_address);
    println!("\nAPI Endpoints:");
    println!("  Health:       http://{}/health", addr);
    println!("  Version:      http://{}/version", addr);
    println!("  Checkpoints:  http://{}/checkpoints/{{sessionId}}", addr);
    println!("\nPress Ctrl+C to shutdown...");
    println!("{}\n", separator);

    start_server(state, addr, async {
        let _ = signal::ctrl_c().await;
        println!("\n⏹️  Shutting down...");
    })
    .await?;

    println!("👋 Goodbye!");
    Ok(())
}
