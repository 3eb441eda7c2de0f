// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
use async_trait::async_trait;
use data_encoding::BASE32_NOPAD;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    #[error("Network error: {0}")]
    NetworkError(String),
    #[error("Invalid path: {0}")]
    InvalidPath(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Quota exceeded")]
    QuotaExceeded,
    #[error("Serialization error: {0}")]
    SerializationError(String),
    #[error("Authentication error: {0}")]
    AuthError(String),
    #[error("Server error: {0}")]
    ServerError(String),
}

impl StorageError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum S5Backend {
    Mock,
    Real { portal_url: String },
}

#[derive(Debug, Clone)]
pub struct S5StorageConfig {
    pub backend: S5Backend,
    pub api_key: Option<String>,
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone)]
pub struct S5ClientConfig {
    pub portal_url: String,
    pub api_key: Option<String>,
    pub timeout_seconds: u64,
}

/// Content-addressed store keyed by path
///
/// `put` returns the CID of the stored bytes; callers strip any `s5://`
/// scheme before recording it.
#[async_trait]
pub trait S5Storage: Send + Sync {
    async fn put(&self, path: &str, data: Vec<u8>) -> Result<String, StorageError>;
    async fn get(&self, path: &str) -> Result<Vec<u8>, StorageError>;
    async fn get_by_cid(&self, cid: &str) -> Result<Vec<u8>, StorageError>;
    async fn delete(&self, path: &str) -> Result<(), StorageError>;
    async fn exists(&self, path: &str) -> Result<bool, StorageError>;
}

/// Strip the `s5://` scheme from a CID
pub fn raw_cid(cid: &str) -> &str {
    cid.strip_prefix("s5://").unwrap_or(cid)
}

pub(crate) fn validate_path(path: &str) -> Result<(), StorageError> {
    if path.is_empty() {
        return Err(StorageError::InvalidPath("Empty path".to_string()));
    }

    if path.starts_with('/') {
        return Err(StorageError::InvalidPath(
            "Path cannot start with /".to_string(),
        ));
    }

    if path.split('/').any(|segment| segment == "..") {
        return Err(StorageError::InvalidPath(
            "Path traversal not allowed".to_string(),
        ));
    }

    if !path.starts_with("home/") && !path.starts_with("archive/") {
        return Err(StorageError::InvalidPath(
            "Path must start with 'home/' or 'archive/'".to_string(),
        ));
    }

    Ok(())
}

/// Failure rule for puts whose path ends with `suffix`
#[derive(Debug, Clone)]
struct PutFailure {
    suffix: String,
    remaining: Option<u32>,
    error: StorageError,
}

#[derive(Debug, Default)]
struct MockState {
    // path -> cid
    paths: HashMap<String, String>,
    // cid -> bytes
    blobs: HashMap<String, Vec<u8>>,
    put_counts: HashMap<String, u32>,
    injected_error: Option<StorageError>,
    put_failures: Vec<PutFailure>,
    quota_limit: Option<u64>,
}

impl MockState {
    fn total_size(&self) -> u64 {
        self.paths
            .values()
            .filter_map(|cid| self.blobs.get(cid))
            .map(|data| data.len() as u64)
            .sum()
    }

    fn take_put_failure(&mut self, path: &str) -> Option<StorageError> {
        let position = self
            .put_failures
            .iter()
            .position(|rule| path.ends_with(&rule.suffix))?;

        let rule = &mut self.put_failures[position];
        let error = rule.error.clone();
        let exhausted = match rule.remaining {
            Some(0) => {
                self.put_failures.remove(position);
                return None;
            }
            Some(n) => {
                rule.remaining = Some(n - 1);
                n == 1
            }
            None => false,
        };
        if exhausted {
            self.put_failures.remove(position);
        }
        Some(error)
    }
}

/// In-memory store with content-derived CIDs and failure injection
#[derive(Debug, Clone, Default)]
pub struct MockS5Backend {
    state: Arc<Mutex<MockState>>,
}

impl MockS5Backend {
    pub fn new() -> Self {
        Self::default()
    }

    fn generate_cid(data: &[u8]) -> String {
        let hash = Sha256::digest(data);
        format!("s5://b{}", BASE32_NOPAD.encode(&hash).to_lowercase())
    }

    /// Fail the next operation with `error`
    pub async fn inject_error(&self, error: StorageError) {
        self.state.lock().await.injected_error = Some(error);
    }

    pub async fn set_quota_limit(&self, limit_bytes: u64) {
        self.state.lock().await.quota_limit = Some(limit_bytes);
    }

    /// Fail puts to paths ending with `suffix`, `times` times (`None` = until cleared)
    pub async fn fail_puts_matching(&self, suffix: &str, times: Option<u32>, error: StorageError) {
        self.state.lock().await.put_failures.push(PutFailure {
            suffix: suffix.to_string(),
            remaining: times,
            error,
        });
    }

    pub async fn clear_put_failures(&self) {
        self.state.lock().await.put_failures.clear();
    }

    /// Number of put attempts (successful or not) against `path`
    pub async fn put_count(&self, path: &str) -> u32 {
        self.state
            .lock()
            .await
            .put_counts
            .get(path)
            .copied()
            .unwrap_or(0)
    }

    pub async fn object_count(&self) -> usize {
        self.state.lock().await.paths.len()
    }

    /// Overwrite the bytes behind a path and its CID (tamper simulation)
    pub async fn overwrite_raw(&self, path: &str, data: Vec<u8>) -> Result<(), StorageError> {
        let mut state = self.state.lock().await;
        let cid = state
            .paths
            .get(path)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(path.to_string()))?;
        state.blobs.insert(cid, data);
        Ok(())
    }
}

#[async_trait]
impl S5Storage for MockS5Backend {
    async fn put(&self, path: &str, data: Vec<u8>) -> Result<String, StorageError> {
        let mut state = self.state.lock().await;
        *state.put_counts.entry(path.to_string()).or_insert(0) += 1;

        if let Some(error) = state.injected_error.take() {
            return Err(error);
        }
        validate_path(path)?;
        if let Some(error) = state.take_put_failure(path) {
            debug!("[S5-MOCK] Simulated put failure for '{}'", path);
            return Err(error);
        }

        if let Some(limit) = state.quota_limit {
            if state.total_size() + data.len() as u64 > limit {
                return Err(StorageError::QuotaExceeded);
            }
        }

        let cid = Self::generate_cid(&data);
        state.blobs.insert(raw_cid(&cid).to_string(), data);
        state.paths.insert(path.to_string(), raw_cid(&cid).to_string());

        Ok(cid)
    }

    async fn get(&self, path: &str) -> Result<Vec<u8>, StorageError> {
        let mut state = self.state.lock().await;
        if let Some(error) = state.injected_error.take() {
            return Err(error);
        }
        validate_path(path)?;

        state
            .paths
            .get(path)
            .and_then(|cid| state.blobs.get(cid))
            .cloned()
            .ok_or_else(|| StorageError::NotFound(path.to_string()))
    }

    async fn get_by_cid(&self, cid: &str) -> Result<Vec<u8>, StorageError> {
        let mut state = self.state.lock().await;
        if let Some(error) = state.injected_error.take() {
            return Err(error);
        }

        state
            .blobs
            .get(raw_cid(cid))
            .cloned()
            .ok_or_else(|| StorageError::NotFound(cid.to_string()))
    }

    async fn delete(&self, path: &str) -> Result<(), StorageError> {
        let mut state = self.state.lock().await;
        if let Some(error) = state.injected_error.take() {
            return Err(error);
        }
        validate_path(path)?;

        let cid = state
            .paths
            .remove(path)
            .ok_or_else(|| StorageError::NotFound(path.to_string()))?;

        // identical content may live at another path
        if !state.paths.values().any(|other| *other == cid) {
            state.blobs.remove(&cid);
        }

        Ok(())
    }

    async fn exists(&self, path: &str) -> Result<bool, StorageError> {
        let mut state = self.state.lock().await;
        if let Some(error) = state.injected_error.take() {
            return Err(error);
        }
        validate_path(path)?;

        if state.paths.contains_key(path) {
            return Ok(true);
        }

        let dir_prefix = format!("{}/", path);
        Ok(state.paths.keys().any(|key| key.starts_with(&dir_prefix)))
    }
}

/// S5 portal HTTP client
#[derive(Debug, Clone)]
pub struct RealS5Backend {
    client: reqwest::Client,
    portal_url: String,
    api_key: Option<String>,
}

impl RealS5Backend {
    pub fn new(config: S5ClientConfig) -> Result<Self, StorageError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| StorageError::NetworkError(e.to_string()))?;

        Ok(Self {
            client,
            portal_url: config.portal_url.trim_end_matches('/').to_string(),
            api_key: config.api_key,
        })
    }

    async fn make_request(
        &self,
        method: reqwest::Method,
        url: &str,
        body: Option<Vec<u8>>,
    ) -> Result<reqwest::Response, StorageError> {
        let mut request_builder = self.client.request(method, url);

        if let Some(api_key) = &self.api_key {
            request_builder =
                request_builder.header("Authorization", format!("Bearer {}", api_key));
        }

        if let Some(body) = body {
            request_builder = request_builder.body(body);
        }

        let response = request_builder
            .send()
            .await
            .map_err(|e| StorageError::NetworkError(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(StorageError::AuthError(format!("Portal rejected request: {}", status)));
        }
        if status.is_server_error() {
            return Err(StorageError::ServerError(format!("Server error: {}", status)));
        }

        Ok(response)
    }

    async fn read_body(
        response: reqwest::Response,
        what: &str,
    ) -> Result<Vec<u8>, StorageError> {
        if response.status().is_success() {
            let data = response
                .bytes()
                .await
                .map_err(|e| StorageError::NetworkError(e.to_string()))?;
            Ok(data.to_vec())
        } else if response.status() == reqwest::StatusCode::NOT_FOUND {
            Err(StorageError::NotFound(what.to_string()))
        } else {
            Err(StorageError::ServerError(format!(
                "Download failed for {}: {}",
                what,
                response.status()
            )))
        }
    }
}

#[async_trait]
impl S5Storage for RealS5Backend {
    async fn put(&self, path: &str, data: Vec<u8>) -> Result<String, StorageError> {
        validate_path(path)?;

        let url = format!("{}/api/s5/upload/{}", self.portal_url, path);
        let response = self
            .make_request(reqwest::Method::POST, &url, Some(data))
            .await?;

        if !response.status().is_success() {
            return Err(StorageError::ServerError(format!(
                "Upload failed: {}",
                response.status()
            )));
        }

        let result: serde_json::Value = response
            .json()
            .await
            .map_err(|e| StorageError::SerializationError(e.to_string()))?;

        match result["cid"].as_str() {
            Some(cid) if !cid.is_empty() => Ok(cid.to_string()),
            _ => Err(StorageError::SerializationError(
                "Upload response missing cid".to_string(),
            )),
        }
    }

    async fn get(&self, path: &str) -> Result<Vec<u8>, StorageError> {
        validate_path(path)?;

        let url = format!("{}/api/s5/download/{}", self.portal_url, path);
        let response = self.make_request(reqwest::Method::GET, &url, None).await?;
        Self::read_body(response, path).await
    }

    async fn get_by_cid(&self, cid: &str) -> Result<Vec<u8>, StorageError> {
        let url = format!("{}/api/s5/cid/{}", self.portal_url, raw_cid(cid));
        let response = self.make_request(reqwest::Method::GET, &url, None).await?;
        Self::read_body(response, cid).await
    }

    async fn delete(&self, path: &str) -> Result<(), StorageError> {
        validate_path(path)?;

        let url = format!("{}/api/s5/delete/{}", self.portal_url, path);
        let response = self
            .make_request(reqwest::Method::DELETE, &url, None)
            .await?;

        if response.status().is_success() {
            Ok(())
        } else if response.status() == reqwest::StatusCode::NOT_FOUND {
            Err(StorageError::NotFound(path.to_string()))
        } else {
            Err(StorageError::ServerError(format!(
                "Delete failed: {}",
                response.status()
            )))
        }
    }

    async fn exists(&self, path: &str) -> Result<bool, StorageError> {
        validate_path(path)?;

        let url = format!("{}/api/s5/exists/{}", self.portal_url, path);
        let response = self.make_request(reqwest::Method::HEAD, &url, None).await?;

        Ok(response.status().is_success())
    }
}

pub struct S5Client;

impl S5Client {
    pub fn create(config: S5StorageConfig) -> Result<Arc<dyn S5Storage>, StorageError> {
        match config.backend {
            S5Backend::Mock => Ok(Arc::new(MockS5Backend::new())),
            S5Backend::Real { portal_url } => {
                let client_config = S5ClientConfig {
                    portal_url,
                    api_key: config.api_key,
                    timeout_seconds: config.timeout_seconds,
                };
                Ok(Arc::new(RealS5Backend::new(client_config)?))
            }
        }
    }
}
