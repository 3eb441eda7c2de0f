// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

//! Node configuration
//!
//! Loaded from an optional TOML file, then overridden by environment
//! variables (`.env` is read by the binaries via `dotenv`). The host
//! private key is never part of the file; it comes from `HOST_PRIVATE_KEY`.
//!
//! ```toml
//! [api]
//! host = "0.0.0.0"
//! port = 8080
//!
//! [storage]
//! backend = "real"
//! portal_url = "https://s5.example.org"
//!
//! [ledger]
//! rpc_url = "https://sepolia.base.org"
//! job_marketplace = "0x..."
//! ```

use crate::checkpoint::cleanup::CleanupConfig;
use crate::checkpoint::publisher::{RetryPolicy, MAX_S5_RETRIES, S5_RETRY_BASE_DELAY_MS};
use crate::checkpoint::recovery::{
    RecoveryConfig, DEFAULT_DISCOVERY_HTTP_TIMEOUT_SECS, DEFAULT_RECOVERY_CONCURRENCY,
    DEFAULT_RECOVERY_TIMEOUT_SECS,
};
use crate::storage::{S5Backend, S5StorageConfig};
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

const SECS_PER_DAY: u64 = 24 * 60 * 60;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiSettings {
    pub host: String,
    pub port: u16,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackendKind {
    Mock,
    Real,
}

impl FromStr for StorageBackendKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "mock" => Ok(Self::Mock),
            "real" => Ok(Self::Real),
            other => Err(anyhow!("unknown storage backend '{}' (expected mock or real)", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    pub backend: StorageBackendKind,
    pub portal_url: String,
    pub api_key: Option<String>,
    pub timeout_seconds: u64,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            backend: StorageBackendKind::Mock,
            portal_url: "http://localhost:5050".to_string(),
            api_key: None,
            timeout_seconds: 30,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerSettings {
    pub rpc_url: Option<String>,
    pub job_marketplace: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PublisherSettings {
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
}

impl Default for PublisherSettings {
    fn default() -> Self {
        Self {
            max_retries: MAX_S5_RETRIES,
            retry_base_delay_ms: S5_RETRY_BASE_DELAY_MS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoverySettings {
    pub concurrency: usize,
    pub timeout_secs: u64,
    pub http_timeout_secs: u64,
}

impl Default for RecoverySettings {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_RECOVERY_CONCURRENCY,
            timeout_secs: DEFAULT_RECOVERY_TIMEOUT_SECS,
            http_timeout_secs: DEFAULT_DISCOVERY_HTTP_TIMEOUT_SECS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CleanupSettings {
    pub completed_ttl_days: u64,
    pub timed_out_ttl_days: u64,
    pub dispute_grace_days: u64,
    pub delete_cancelled_immediately: bool,
}

impl Default for CleanupSettings {
    fn default() -> Self {
        Self {
            completed_ttl_days: 7,
            timed_out_ttl_days: 30,
            dispute_grace_days: 7,
            delete_cancelled_immediately: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub api: ApiSettings,
    pub storage: StorageSettings,
    pub ledger: LedgerSettings,
    pub publisher: PublisherSettings,
    pub recovery: RecoverySettings,
    pub cleanup: CleanupSettings,
}

impl NodeConfig {
    /// Load configuration from a TOML file; missing sections use defaults
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    /// File (if given) then environment overrides, validated
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from `lookup` (normally `std::env::var`)
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(val) = lookup("API_HOST") {
            self.api.host = val;
        }
        if let Some(val) = lookup("API_PORT") {
            self.api.port = parse_var("API_PORT", &val)?;
        }
        if let Some(val) = lookup("S5_BACKEND") {
            self.storage.backend = val.parse()?;
        }
        if let Some(val) = lookup("S5_PORTAL_URL") {
            self.storage.portal_url = val;
        }
        if let Some(val) = lookup("S5_API_KEY") {
            self.storage.api_key = Some(val);
        }
        if let Some(val) = lookup("RPC_URL") {
            self.ledger.rpc_url = Some(val);
        }
        if let Some(val) = lookup("CONTRACT_JOB_MARKETPLACE") {
            self.ledger.job_marketplace = Some(val);
        }
        if let Some(val) = lookup("CHECKPOINT_MAX_RETRIES") {
            self.publisher.max_retries = parse_var("CHECKPOINT_MAX_RETRIES", &val)?;
        }
        if let Some(val) = lookup("CHECKPOINT_RETRY_DELAY_MS") {
            self.publisher.retry_base_delay_ms = parse_var("CHECKPOINT_RETRY_DELAY_MS", &val)?;
        }
        if let Some(val) = lookup("RECOVERY_CONCURRENCY") {
            self.recovery.concurrency = parse_var("RECOVERY_CONCURRENCY", &val)?;
        }
        if let Some(val) = lookup("RECOVERY_TIMEOUT_SECS") {
            self.recovery.timeout_secs = parse_var("RECOVERY_TIMEOUT_SECS", &val)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.publisher.max_retries == 0 {
            return Err(anyhow!("publisher.max_retries must be at least 1"));
        }
        if self.recovery.concurrency == 0 {
            return Err(anyhow!("recovery.concurrency must be at least 1"));
        }
        if self.storage.backend == StorageBackendKind::Real && self.storage.portal_url.is_empty() {
            return Err(anyhow!("storage.portal_url is required for the real S5 backend"));
        }
        if self.ledger.rpc_url.is_some() != self.ledger.job_marketplace.is_some() {
            return Err(anyhow!(
                "ledger.rpc_url and ledger.job_marketplace must be set together"
            ));
        }
        self.api_addr()?;
        Ok(())
    }

    pub fn api_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.api.host, self.api.port)
            .parse()
            .with_context(|| format!("Invalid API address {}:{}", self.api.host, self.api.port))
    }

    pub fn storage_config(&self) -> S5StorageConfig {
        let backend = match self.storage.backend {
            StorageBackendKind::Mock => S5Backend::Mock,
            StorageBackendKind::Real => S5Backend::Real {
                portal_url: self.storage.portal_url.clone(),
            },
        };
        S5StorageConfig {
            backend,
            api_key: self.storage.api_key.clone(),
            timeout_seconds: self.storage.timeout_seconds,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.publisher.max_retries,
            base_delay: Duration::from_millis(self.publisher.retry_base_delay_ms),
        }
    }

    pub fn recovery_config(&self, expected_host: Option<String>) -> RecoveryConfig {
        RecoveryConfig {
            concurrency: self.recovery.concurrency,
            timeout: Duration::from_secs(self.recovery.timeout_secs),
            http_timeout: Duration::from_secs(self.recovery.http_timeout_secs),
            expected_host,
        }
    }

    pub fn cleanup_config(&self) -> CleanupConfig {
        CleanupConfig {
            completed_ttl: Duration::from_secs(self.cleanup.completed_ttl_days * SECS_PER_DAY),
            timed_out_ttl: Duration::from_secs(self.cleanup.timed_out_ttl_days * SECS_PER_DAY),
            delete_cancelled_immediately: self.cleanup.delete_cancelled_immediately,
            dispute_grace_period: Duration::from_secs(self.cleanup.dispute_grace_days * SECS_PER_DAY),
        }
    }
}

fn parse_var<T>(name: &str, value: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e| anyhow!("Invalid value for {}: '{}' ({})", name, value, e))
}
