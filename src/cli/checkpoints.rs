// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
use anyhow::{anyhow, Context, Result};
use clap::{Args, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;

use crate::checkpoint::{
    cleanup_checkpoints, CheckpointSource, CleanupTask, HttpDiscoveryClient, RecoveryEngine,
    SessionState,
};
use crate::config::NodeConfig;
use crate::contracts::{ProofLedger, Web3ProofLedger};
use crate::crypto::{address_from_private_key, parse_private_key_hex};
use crate::storage::{S5Client, S5Storage};

/// Arguments for the recover command
#[derive(Args, Debug)]
pub struct RecoverArgs {
    /// Session (job) id
    #[arg(long)]
    pub session_id: String,

    /// Host API base URL, e.g. http://host:8080
    #[arg(long)]
    pub host_url: String,

    /// Expected host address; the index must be signed by it
    #[arg(long)]
    pub host_address: Option<String>,

    /// Recovery private key for encrypted checkpoints
    #[arg(long, env = "RECOVERY_PRIVATE_KEY", hide_env_values = true)]
    pub private_key: Option<String>,

    /// Write the recovered conversation here instead of stdout
    #[arg(long)]
    pub output: Option<PathBuf>,
}

/// Arguments for the inspect command
#[derive(Args, Debug)]
pub struct InspectArgs {
    #[arg(long)]
    pub session_id: String,

    #[arg(long)]
    pub host_url: String,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateArg {
    Completed,
    TimedOut,
    Cancelled,
}

impl From<StateArg> for SessionState {
    fn from(state: StateArg) -> Self {
        match state {
            StateArg::Completed => SessionState::Completed,
            StateArg::TimedOut => SessionState::TimedOut,
            StateArg::Cancelled => SessionState::Cancelled,
        }
    }
}

/// Arguments for the cleanup command
#[derive(Args, Debug)]
pub struct CleanupArgs {
    #[arg(long)]
    pub session_id: String,

    /// How the session ended
    #[arg(long, value_enum)]
    pub state: StateArg,

    /// When the session ended (unix ms); defaults to now
    #[arg(long)]
    pub ended_at: Option<u64>,

    /// Host private key (owner of the checkpoints)
    #[arg(long, env = "HOST_PRIVATE_KEY", hide_env_values = true)]
    pub private_key: String,
}

fn now_millis() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

fn open_storage(config: &NodeConfig) -> Result<Arc<dyn S5Storage>> {
    S5Client::create(config.storage_config()).map_err(|e| anyhow!("Failed to open S5 storage: {}", e))
}

fn open_ledger(config: &NodeConfig) -> Result<Arc<dyn ProofLedger>> {
    match (&config.ledger.rpc_url, &config.ledger.job_marketplace) {
        (Some(rpc_url), Some(marketplace)) => Ok(Arc::new(Web3ProofLedger::new(rpc_url, marketplace)?)),
        _ => Err(anyhow!(
            "Recovery needs a ledger. Set RPC_URL and CONTRACT_JOB_MARKETPLACE (or [ledger] in the config file)"
        )),
    }
}

/// Recover, verify and print a conversation
pub async fn recover(args: RecoverArgs, config: &NodeConfig) -> Result<()> {
    let user_key = args
        .private_key
        .as_deref()
        .map(parse_private_key_hex)
        .transpose()
        .context("Invalid recovery private key")?;

    let storage = open_storage(config)?;
    let ledger = open_ledger(config)?;
    let recovery_config = config.recovery_config(args.host_address.clone());
    let source = HttpDiscoveryClient::new(&args.host_url, storage.clone(), recovery_config.http_timeout)?;
    let engine = RecoveryEngine::new(ledger, storage).with_config(recovery_config);

    println!("🔍 Recovering session {} from {}...", args.session_id, args.host_url);

    let conversation = engine
        .recover_with_timeout(&source, &args.session_id, user_key.as_ref())
        .await
        .map_err(|e| {
            if e.is_verification_failure() {
                anyhow!("❌ Checkpoints failed verification, refusing to use them: {}", e)
            } else {
                anyhow!("❌ Recovery failed: {}", e)
            }
        })?;

    if conversation.is_empty() {
        println!("ℹ️  No checkpoints published for session {}", args.session_id);
        return Ok(());
    }

    println!(
        "✅ Verified {} checkpoints ({} messages, {} tokens)",
        conversation.checkpoint_count,
        conversation.messages.len(),
        conversation.total_tokens
    );

    let json = serde_json::to_string_pretty(&conversation)?;
    match args.output {
        Some(path) => {
            std::fs::write(&path, json)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!("   Written to {}", path.display());
        }
        None => println!("{}", json),
    }

    Ok(())
}

/// Print the index without verifying it
pub async fn inspect(args: InspectArgs, config: &NodeConfig) -> Result<()> {
    let storage = open_storage(config)?;
    let source = HttpDiscoveryClient::new(
        &args.host_url,
        storage,
        config.recovery_config(None).http_timeout,
    )?;

    match source.fetch_index(&args.session_id).await? {
        Some(index) => {
            println!("📋 Session {} (host {})", index.session_id, index.host_address);
            for entry in &index.checkpoints {
                println!(
                    "  #{:<3} tokens {:>7}-{:<7} encrypted={:<5} cid={}",
                    entry.index,
                    entry.token_range[0],
                    entry.token_range[1],
                    entry.encrypted,
                    entry.delta_cid
                );
            }
            println!("{}", serde_json::to_string_pretty(&index)?);
        }
        None => println!("ℹ️  No checkpoints published for session {}", args.session_id),
    }

    Ok(())
}

/// Apply the retention policy to one session
pub async fn cleanup(args: CleanupArgs, config: &NodeConfig) -> Result<()> {
    let key = parse_private_key_hex(&args.private_key).context("Invalid host private key")?;
    let host_address = address_from_private_key(&key)?;
    let storage = open_storage(config)?;

    let task = CleanupTask::new(
        args.session_id.clone(),
        host_address,
        args.ended_at.unwrap_or_else(now_millis),
        args.state.into(),
    );

    let result = cleanup_checkpoints(storage.as_ref(), &task, now_millis(), &config.cleanup_config()).await?;

    if result.skipped {
        println!(
            "⏳ Session {} is still within its retention period; nothing deleted",
            args.session_id
        );
    } else {
        println!(
            "🧹 Session {}: {} deltas deleted, {} already missing, index deleted: {}",
            args.session_id, result.deltas_deleted, result.already_missing, result.index_deleted
        );
    }

    Ok(())
}
