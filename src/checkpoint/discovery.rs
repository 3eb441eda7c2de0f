// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

//! Checkpoint discovery
//!
//! Host side: `CheckpointDiscovery` reads the published index for a session.
//! Client side: `HttpDiscoveryClient` fetches the same index over HTTP and
//! pulls deltas from S5 by CID. Both implement `CheckpointSource`, which is
//! all the recovery engine needs.

use crate::checkpoint::error::{CheckpointError, CheckpointResult};
use crate::checkpoint::index::CheckpointIndex;
use crate::checkpoint::publisher::validate_session_id;
use crate::storage::{S5Storage, StorageError};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Where recovery reads indices and deltas from
#[async_trait]
pub trait CheckpointSource: Send + Sync {
    /// `Ok(None)` when the session has no checkpoints
    async fn fetch_index(&self, session_id: &str) -> CheckpointResult<Option<CheckpointIndex>>;

    /// Raw stored delta object for a raw CID
    async fn fetch_delta(&self, delta_cid: &str) -> CheckpointResult<Vec<u8>>;
}

/// Read-only view over one host's published checkpoints
#[derive(Clone)]
pub struct CheckpointDiscovery {
    storage: Arc<dyn S5Storage>,
    host_address: String,
}

impl CheckpointDiscovery {
    pub fn new(storage: Arc<dyn S5Storage>, host_address: &str) -> Self {
        Self {
            storage,
            host_address: host_address.to_lowercase(),
        }
    }

    pub fn host_address(&self) -> &str {
        &self.host_address
    }

    /// Stored index bytes exactly as published (already canonical)
    pub async fn get_index_bytes(&self, session_id: &str) -> CheckpointResult<Option<Vec<u8>>> {
        validate_session_id(session_id)?;

        let path = CheckpointIndex::storage_path(&self.host_address, session_id);
        match self.storage.get(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(StorageError::NotFound(_)) => {
                debug!("[DISCOVERY] No checkpoints for session {}", session_id);
                Ok(None)
            }
            Err(e) => {
                warn!(
                    "[DISCOVERY] Failed to read index for session {}: {}",
                    session_id, e
                );
                Err(e.into())
            }
        }
    }

    /// Parsed index; `None` is a normal state for sessions that never checkpointed
    pub async fn get_checkpoints(&self, session_id: &str) -> CheckpointResult<Option<CheckpointIndex>> {
        match self.get_index_bytes(session_id).await? {
            Some(bytes) => Ok(Some(CheckpointIndex::from_json_bytes(&bytes)?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl CheckpointSource for CheckpointDiscovery {
    async fn fetch_index(&self, session_id: &str) -> CheckpointResult<Option<CheckpointIndex>> {
        self.get_checkpoints(session_id).await
    }

    async fn fetch_delta(&self, delta_cid: &str) -> CheckpointResult<Vec<u8>> {
        self.storage.get_by_cid(delta_cid).await.map_err(|e| match e {
            StorageError::NotFound(_) => {
                CheckpointError::NotFound(format!("delta {}", delta_cid))
            }
            other => other.into(),
        })
    }
}

/// Client for a host's `GET /checkpoints/{sessionId}` endpoint
pub struct HttpDiscoveryClient {
    client: reqwest::Client,
    base_url: String,
    storage: Arc<dyn S5Storage>,
}

impl HttpDiscoveryClient {
    /// `base_url` is the host API root, e.g. `http://host:8080`
    pub fn new(
        base_url: &str,
        storage: Arc<dyn S5Storage>,
        timeout: Duration,
    ) -> CheckpointResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CheckpointError::Discovery(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            storage,
        })
    }

    pub fn index_url(&self, session_id: &str) -> String {
        format!("{}/checkpoints/{}", self.base_url, session_id)
    }
}

/// True for the `{"error":"not_found",...}` body the endpoint sends for an unknown session
fn is_not_found_body(body: &[u8]) -> bool {
    serde_json::from_slice::<serde_json::Value>(body)
        .ok()
        .and_then(|value| value.get("error").and_then(|e| e.as_str()).map(|e| e == "not_found"))
        .unwrap_or(false)
}

#[async_trait]
impl CheckpointSource for HttpDiscoveryClient {
    async fn fetch_index(&self, session_id: &str) -> CheckpointResult<Option<CheckpointIndex>> {
        validate_session_id(session_id)?;
        let url = self.index_url(session_id);
        debug!("[DISCOVERY] GET {}", url);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| CheckpointError::Discovery(format!("request to {} failed: {}", url, e)))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            let body = response.bytes().await.unwrap_or_default();
            if is_not_found_body(&body) {
                return Ok(None);
            }
            // a 404 without our error body means the URL is not a checkpoint endpoint
            return Err(CheckpointError::Discovery(format!(
                "{} returned HTTP 404 without a not_found body: {}",
                url,
                String::from_utf8_lossy(&body)
            )));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CheckpointError::Discovery(format!(
                "{} returned HTTP {}: {}",
                url, status, body
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| CheckpointError::Discovery(format!("failed to read body: {}", e)))?;
        Ok(Some(CheckpointIndex::from_json_bytes(&bytes)?))
    }

    async fn fetch_delta(&self, delta_cid: &str) -> CheckpointResult<Vec<u8>> {
        self.storage.get_by_cid(delta_cid).await.map_err(|e| match e {
            StorageError::NotFound(_) => {
                CheckpointError::NotFound(format!("delta {}", delta_cid))
            }
            other => other.into(),
        })
    }
}
