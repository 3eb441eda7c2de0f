// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

//! Checkpoint Publisher for S5 storage
//!
//! Handles publishing checkpoint deltas and indices to S5 storage.
//! CRITICAL: Publishing MUST complete BEFORE proof submission to chain.
//! Any error returned here means the caller must NOT settle the interval.
//!
//! ## Usage
//! ```ignore
//! let publisher = CheckpointPublisher::new(host_address);
//! publisher.buffer_message(session_id, message).await;
//! // Before proof submission:
//! let delta_cid = publisher
//!     .publish_checkpoint(session_id, proof_hash, start, end, &host_key, storage)
//!     .await?;
//! // Now safe to submit proof to chain
//! ```

use crate::checkpoint::cleanup::{cleanup_checkpoints, CleanupConfig, CleanupResult, CleanupTask};
use crate::checkpoint::delta::{CheckpointDelta, CheckpointMessage};
use crate::checkpoint::encryption::encrypt_checkpoint_delta;
use crate::checkpoint::error::{CheckpointError, CheckpointResult};
use crate::checkpoint::index::{CheckpointEntry, CheckpointIndex, SessionState};
use crate::crypto::address_from_private_key;
use crate::storage::{raw_cid, S5Storage, StorageError};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::{error, info, warn};

/// Maximum number of S5 upload attempts
pub const MAX_S5_RETRIES: u32 = 3;

/// Base delay for linear backoff (1s, 2s)
pub const S5_RETRY_BASE_DELAY_MS: u64 = 1000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: MAX_S5_RETRIES,
            base_delay: Duration::from_millis(S5_RETRY_BASE_DELAY_MS),
        }
    }
}

impl RetryPolicy {
    /// Delay after failed attempt `attempt` (1-based): `base_delay * attempt`
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.base_delay * attempt
    }
}

/// One checkpoint to publish; `proof_hash` comes from the proof the caller
/// is about to settle and is never computed here
#[derive(Debug, Clone)]
pub struct PublishRequest {
    pub session_id: String,
    pub checkpoint_index: u32,
    pub proof_hash: [u8; 32],
    pub start_token: u64,
    pub end_token: u64,
    pub messages: Vec<CheckpointMessage>,
    /// Recipient key; when present the delta is encrypted
    pub recipient_pub_key: Option<String>,
    pub proof_cid: Option<String>,
}

/// State for tracking checkpoints within a session
#[derive(Debug, Clone, Default)]
pub struct SessionCheckpointState {
    /// Next checkpoint index (0-based)
    pub checkpoint_index: u32,

    /// Messages buffered since last checkpoint
    pub message_buffer: Vec<CheckpointMessage>,

    /// Token count at last checkpoint
    pub last_checkpoint_tokens: u64,

    /// Last index written (for session resumption)
    pub index: Option<CheckpointIndex>,

    /// In-progress streaming response, included as a partial message if a
    /// checkpoint triggers mid-stream
    pub streaming_response: Option<String>,

    /// Bytes of `streaming_response` already published as partial content
    pub published_stream_len: usize,

    /// User's recovery public key; when present deltas are encrypted
    pub recovery_public_key: Option<String>,
}

impl SessionCheckpointState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create state from existing index (session resumption)
    /// Note: recovery_public_key is not persisted in index, must be set separately
    pub fn from_index(index: CheckpointIndex) -> Self {
        Self {
            checkpoint_index: index.next_checkpoint_index(),
            last_checkpoint_tokens: index.total_tokens(),
            index: Some(index),
            ..Self::default()
        }
    }

    pub fn has_recovery_key(&self) -> bool {
        self.recovery_public_key.is_some()
    }

    pub fn buffer_size(&self) -> usize {
        self.message_buffer.len()
    }

    pub fn update_streaming_response(&mut self, chunk: &str) {
        match &mut self.streaming_response {
            Some(buffer) => buffer.push_str(chunk),
            None => self.streaming_response = Some(chunk.to_string()),
        }
    }

    /// Streaming content not yet covered by a published partial message
    pub fn unpublished_stream(&self) -> Option<&str> {
        self.streaming_response
            .as_deref()
            .and_then(|s| s.get(self.published_stream_len..))
    }
}

/// Publisher for checkpoint data to S5 storage
pub struct CheckpointPublisher {
    /// Host's Ethereum address (lowercase)
    host_address: String,

    retry_policy: RetryPolicy,

    /// Per-session checkpoint state
    sessions: Arc<RwLock<HashMap<String, SessionCheckpointState>>>,

    /// Single-writer lock per session
    session_locks: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl CheckpointPublisher {
    pub fn new(host_address: String) -> Self {
        Self {
            host_address: host_address.to_lowercase(),
            retry_policy: RetryPolicy::default(),
            sessions: Arc::new(RwLock::new(HashMap::new())),
            session_locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Publisher whose address is derived from the signing key
    pub fn from_private_key(private_key: &[u8; 32]) -> CheckpointResult<Self> {
        let address = address_from_private_key(private_key)
            .map_err(|e| CheckpointError::InvalidCheckpoint(format!("invalid host key: {}", e)))?;
        Ok(Self::new(address))
    }

    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    pub fn host_address(&self) -> &str {
        &self.host_address
    }

    async fn session_lock(&self, session_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.session_locks.lock().await;
        locks
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drop the map entry once no other task holds or waits on the lock.
    /// Clones are only handed out under the map lock, so the count is stable here.
    async fn release_session_lock(&self, session_id: &str, lock: Arc<Mutex<()>>) {
        let mut locks = self.session_locks.lock().await;
        let idle = locks
            .get(session_id)
            .is_some_and(|held| Arc::ptr_eq(held, &lock) && Arc::strong_count(&lock) == 2);
        if idle {
            locks.remove(session_id);
        }
    }

    /// CRITICAL: Publish one checkpoint BEFORE its proof is submitted
    ///
    /// Uploads the (optionally encrypted) delta, then re-reads the session
    /// index from storage, upserts the entry, re-signs and re-uploads it.
    /// Publishes for one session are serialized; different sessions run
    /// concurrently.
    ///
    /// # Returns
    /// * `Ok(delta_cid)` - raw CID of the uploaded delta (no s5:// prefix)
    /// * `Err` - caller must NOT submit proof
    pub async fn publish(
        &self,
        request: PublishRequest,
        private_key: &[u8; 32],
        s5_storage: &dyn S5Storage,
    ) -> CheckpointResult<String> {
        let session_id = request.session_id.clone();
        let lock = self.session_lock(&session_id).await;
        let result = {
            let _guard = lock.lock().await;
            self.publish_locked(request, private_key, s5_storage).await
        };
        self.release_session_lock(&session_id, lock).await;

        let index = result?;
        let delta_cid = index
            .last_checkpoint()
            .map(|entry| entry.delta_cid.clone())
            .unwrap_or_default();
        Ok(delta_cid)
    }

    // Caller holds the session lock. Returns the index as uploaded, with the
    // published entry moved to the end for the caller's convenience only.
    async fn publish_locked(
        &self,
        request: PublishRequest,
        private_key: &[u8; 32],
        s5_storage: &dyn S5Storage,
    ) -> CheckpointResult<CheckpointIndex> {
        let PublishRequest {
            session_id,
            checkpoint_index,
            proof_hash,
            start_token,
            end_token,
            messages,
            recipient_pub_key,
            proof_cid,
        } = request;

        validate_session_id(&session_id)?;
        self.check_host_key(private_key)?;

        if start_token > end_token {
            return Err(CheckpointError::InvalidCheckpoint(format!(
                "start token {} is after end token {}",
                start_token, end_token
            )));
        }

        // 1. Current index from storage (single writer, so this is authoritative)
        let index_path = CheckpointIndex::storage_path(&self.host_address, &session_id);
        let mut index = match self
            .with_retry(&index_path, || s5_storage.get(&index_path))
            .await
        {
            Ok(bytes) => CheckpointIndex::from_json_bytes(&bytes)?,
            Err((_, e)) if e.is_not_found() => CheckpointIndex::new(&session_id, &self.host_address),
            Err((attempts, source)) => {
                return Err(CheckpointError::TransientStorage { attempts, source })
            }
        };

        validate_against_index(&index, checkpoint_index, start_token, end_token)?;

        info!(
            "📤 [CHECKPOINT] Publishing checkpoint {} for session {} ({} messages, tokens {}-{})",
            checkpoint_index,
            session_id,
            messages.len(),
            start_token,
            end_token
        );

        // 2. Create delta and sign messages
        let mut delta = CheckpointDelta::new(
            session_id.clone(),
            checkpoint_index,
            &proof_hash,
            start_token,
            end_token,
            messages,
        );
        delta.sign(private_key)?;
        let messages_hash = delta.messages_hash()?;

        // 3. Encrypt when the session has a recovery key; never fall back to plaintext
        let is_encrypted = recipient_pub_key.is_some();
        let delta_bytes = match &recipient_pub_key {
            Some(recipient) => {
                let encrypted = encrypt_checkpoint_delta(&delta, recipient, private_key)
                    .map_err(|e| {
                        error!(
                            "📤 [CHECKPOINT] ❌ Encryption FAILED: session='{}', checkpoint={}, error={}",
                            session_id, checkpoint_index, e
                        );
                        e
                    })?;
                info!(
                    "🔐 [CHECKPOINT] Encrypted checkpoint {} for session {}",
                    checkpoint_index, session_id
                );
                encrypted.to_json_bytes()?
            }
            None => delta.to_json_bytes()?,
        };

        // 4. Upload delta
        let delta_path = CheckpointIndex::delta_path(&self.host_address, &session_id, checkpoint_index);
        info!(
            "📤 [CHECKPOINT] Uploading delta: session='{}', checkpoint={}, path='{}', size={} bytes, encrypted={}",
            session_id, checkpoint_index, delta_path, delta_bytes.len(), is_encrypted
        );

        let delta_cid = self
            .with_retry(&delta_path, || s5_storage.put(&delta_path, delta_bytes.clone()))
            .await
            .map_err(|(attempts, source)| {
                error!(
                    "📤 [CHECKPOINT] ❌ Delta upload FAILED: session='{}', checkpoint={}, error={}",
                    session_id, checkpoint_index, source
                );
                CheckpointError::TransientStorage { attempts, source }
            })?;
        let delta_cid = raw_cid(&delta_cid).to_string();

        info!(
            "📤 [CHECKPOINT] ✅ Delta uploaded: session='{}', checkpoint={}, cid='{}'",
            session_id, checkpoint_index, delta_cid
        );

        // 5. Upsert entry, re-sign, upload index
        let entry = CheckpointEntry::new(
            checkpoint_index,
            delta.proof_hash.clone(),
            delta_cid.clone(),
            start_token,
            end_token,
        )
        .encrypted(is_encrypted)
        .with_messages_hash(messages_hash)
        .with_proof_cid(proof_cid);

        if let Some(previous) = index.upsert_checkpoint(entry)? {
            warn!(
                "📤 [CHECKPOINT] Replaced existing entry for checkpoint {} (previous cid '{}')",
                checkpoint_index, previous.delta_cid
            );
        }
        index.sign(private_key)?;
        let index_bytes = index.to_json_bytes()?;

        self.with_retry(&index_path, || s5_storage.put(&index_path, index_bytes.clone()))
            .await
            .map_err(|(_, source)| {
                error!(
                    "📤 [CHECKPOINT] ❌ Index upload FAILED for session {} checkpoint {} (delta '{}' orphaned): {}",
                    session_id, checkpoint_index, delta_cid, source
                );
                CheckpointError::IndexConsistency {
                    checkpoint_index,
                    delta_cid: delta_cid.clone(),
                    source,
                }
            })?;

        info!(
            "📤 [CHECKPOINT] ✅ Index uploaded: session='{}', checkpoints={}",
            session_id,
            index.checkpoints.len()
        );

        let mut published = index.clone();
        if let Some(pos) = published
            .checkpoints
            .iter()
            .position(|e| e.index == checkpoint_index)
        {
            let entry = published.checkpoints.remove(pos);
            published.checkpoints.push(entry);
        }

        let mut sessions = self.sessions.write().await;
        if let Some(state) = sessions.get_mut(&session_id) {
            state.index = Some(index);
        }

        Ok(published)
    }

    fn check_host_key(&self, private_key: &[u8; 32]) -> CheckpointResult<()> {
        let address = address_from_private_key(private_key)
            .map_err(|e| CheckpointError::InvalidCheckpoint(format!("invalid host key: {}", e)))?;
        if address != self.host_address {
            return Err(CheckpointError::InvalidCheckpoint(format!(
                "signing key belongs to {} but publisher is {}",
                address, self.host_address
            )));
        }
        Ok(())
    }

    /// Run a storage operation with linear backoff
    ///
    /// NotFound and InvalidPath are returned immediately. On exhaustion
    /// returns the number of attempts and the last error.
    async fn with_retry<T, F, Fut>(&self, path: &str, mut op: F) -> Result<T, (u32, StorageError)>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StorageError>>,
    {
        let max_attempts = self.retry_policy.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if matches!(e, StorageError::NotFound(_) | StorageError::InvalidPath(_)) => {
                    return Err((attempt, e))
                }
                Err(e) => {
                    warn!(
                        "📤 [S5] ❌ Attempt {}/{} FAILED for path '{}': {}",
                        attempt, max_attempts, path, e
                    );
                    if attempt >= max_attempts {
                        error!(
                            "📤 [S5] 🚨 FAILED after {} attempts: path='{}'",
                            attempt, path
                        );
                        return Err((attempt, e));
                    }
                    let delay = self.retry_policy.delay_after(attempt);
                    info!("📤 [S5] Waiting {}ms before retry...", delay.as_millis());
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    // ---- buffered host-side flow ----

    /// Buffer a message for the given session
    pub async fn buffer_message(&self, session_id: &str, message: CheckpointMessage) {
        let mut sessions = self.sessions.write().await;
        sessions
            .entry(session_id.to_string())
            .or_default()
            .message_buffer
            .push(message);
    }

    pub async fn get_session_state(&self, session_id: &str) -> Option<SessionCheckpointState> {
        self.sessions.read().await.get(session_id).cloned()
    }

    pub async fn remove_session(&self, session_id: &str) {
        self.sessions.write().await.remove(session_id);

        // an in-flight publish keeps its lock; it is released when that publish ends
        let mut locks = self.session_locks.lock().await;
        if locks
            .get(session_id)
            .is_some_and(|held| Arc::strong_count(held) == 1)
        {
            locks.remove(session_id);
        }
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Append a streamed chunk of the in-progress assistant response
    pub async fn update_streaming_response(&self, session_id: &str, chunk: &str) {
        let mut sessions = self.sessions.write().await;
        sessions
            .entry(session_id.to_string())
            .or_default()
            .update_streaming_response(chunk);
    }

    /// Finish the streamed response: buffer whatever was not already
    /// published as partial content, so recovery concatenation reproduces
    /// the full turn. Waits for an in-flight publish of the session.
    pub async fn complete_streaming_response(&self, session_id: &str, timestamp: u64) {
        let lock = self.session_lock(session_id).await;
        {
            let _guard = lock.lock().await;
            self.buffer_stream_remainder(session_id, timestamp).await;
        }
        self.release_session_lock(session_id, lock).await;
    }

    async fn buffer_stream_remainder(&self, session_id: &str, timestamp: u64) {
        let mut sessions = self.sessions.write().await;
        let Some(state) = sessions.get_mut(session_id) else {
            return;
        };

        let Some(full) = state.streaming_response.take() else {
            return;
        };
        let published = std::mem::take(&mut state.published_stream_len);
        let remainder = full.get(published..).unwrap_or_default();

        // an empty continuation still closes out a published partial
        if published > 0 || !remainder.is_empty() {
            state.message_buffer.push(CheckpointMessage::new_assistant(
                remainder.to_string(),
                timestamp,
                false,
            ));
        }
    }

    /// Drop the streamed response without buffering it
    pub async fn clear_streaming_response(&self, session_id: &str) {
        if let Some(state) = self.sessions.write().await.get_mut(session_id) {
            state.streaming_response = None;
            state.published_stream_len = 0;
        }
    }

    /// Set the recovery public key for a session (enables encrypted checkpoints)
    pub async fn set_recovery_public_key(&self, session_id: &str, key: String) {
        let mut sessions = self.sessions.write().await;
        sessions
            .entry(session_id.to_string())
            .or_default()
            .recovery_public_key = Some(key);
    }

    pub async fn get_recovery_public_key(&self, session_id: &str) -> Option<String> {
        self.sessions
            .read()
            .await
            .get(session_id)
            .and_then(|s| s.recovery_public_key.clone())
    }

    pub async fn has_recovery_key(&self, session_id: &str) -> bool {
        self.sessions
            .read()
            .await
            .get(session_id)
            .map(|s| s.has_recovery_key())
            .unwrap_or(false)
    }

    /// Drain the session buffer into a checkpoint
    ///
    /// An in-flight streaming response is included as a `partial` assistant
    /// message containing only the content not yet published.
    pub async fn publish_checkpoint(
        &self,
        session_id: &str,
        proof_hash: [u8; 32],
        start_token: u64,
        end_token: u64,
        private_key: &[u8; 32],
        s5_storage: &dyn S5Storage,
    ) -> CheckpointResult<String> {
        let lock = self.session_lock(session_id).await;
        let result = {
            let _guard = lock.lock().await;
            self.publish_buffered_locked(
                session_id,
                proof_hash,
                start_token,
                end_token,
                private_key,
                s5_storage,
            )
            .await
        };
        self.release_session_lock(session_id, lock).await;
        result
    }

    async fn publish_buffered_locked(
        &self,
        session_id: &str,
        proof_hash: [u8; 32],
        start_token: u64,
        end_token: u64,
        private_key: &[u8; 32],
        s5_storage: &dyn S5Storage,
    ) -> CheckpointResult<String> {
        let (request, drained, stream_len) = {
            let mut sessions = self.sessions.write().await;
            let state = sessions.entry(session_id.to_string()).or_default();

            let mut messages = state.message_buffer.clone();
            let drained = messages.len();

            let stream_len = state.streaming_response.as_ref().map(String::len);
            if let Some(partial) = state.unpublished_stream().filter(|s| !s.is_empty()) {
                info!(
                    "📤 [CHECKPOINT] Including partial streaming response ({} chars) in checkpoint",
                    partial.len()
                );
                messages.push(CheckpointMessage::new_assistant(
                    partial.to_string(),
                    now_millis(),
                    true,
                ));
            }

            let request = PublishRequest {
                session_id: session_id.to_string(),
                checkpoint_index: state.checkpoint_index,
                proof_hash,
                start_token,
                end_token,
                messages,
                recipient_pub_key: state.recovery_public_key.clone(),
                proof_cid: None,
            };
            (request, drained, stream_len)
        };

        let checkpoint_index = request.checkpoint_index;
        let index = self.publish_locked(request, private_key, s5_storage).await?;
        let delta_cid = index
            .last_checkpoint()
            .map(|entry| entry.delta_cid.clone())
            .unwrap_or_default();

        let mut sessions = self.sessions.write().await;
        if let Some(state) = sessions.get_mut(session_id) {
            let drained = drained.min(state.message_buffer.len());
            state.message_buffer.drain(..drained);
            if let Some(len) = stream_len {
                state.published_stream_len = len;
            }
            state.checkpoint_index = checkpoint_index + 1;
            state.last_checkpoint_tokens = end_token;
        }

        Ok(delta_cid)
    }

    /// Initialize or resume a session from storage
    ///
    /// If an index exists, numbering resumes after its last checkpoint.
    pub async fn init_session(
        &self,
        session_id: &str,
        s5_storage: &dyn S5Storage,
    ) -> CheckpointResult<()> {
        validate_session_id(session_id)?;
        let index_path = CheckpointIndex::storage_path(&self.host_address, session_id);

        let state = match s5_storage.get(&index_path).await {
            Ok(bytes) => {
                let existing = CheckpointIndex::from_json_bytes(&bytes)?;
                info!(
                    "📤 [CHECKPOINT] Resuming session {} from checkpoint {} (last token: {})",
                    session_id,
                    existing.next_checkpoint_index(),
                    existing.total_tokens()
                );
                SessionCheckpointState::from_index(existing)
            }
            Err(e) if e.is_not_found() => {
                info!("📤 [CHECKPOINT] Starting fresh session {}", session_id);
                SessionCheckpointState::new()
            }
            Err(e) => return Err(e.into()),
        };

        let mut sessions = self.sessions.write().await;
        let recovery_key = sessions
            .get(session_id)
            .and_then(|s| s.recovery_public_key.clone());
        sessions.insert(
            session_id.to_string(),
            SessionCheckpointState {
                recovery_public_key: recovery_key,
                ..state
            },
        );

        Ok(())
    }

    /// Cancel a session: wait for any in-flight publish, then delete its
    /// checkpoints immediately
    pub async fn cancel_session(
        &self,
        session_id: &str,
        s5_storage: &dyn S5Storage,
    ) -> CheckpointResult<CleanupResult> {
        validate_session_id(session_id)?;

        let lock = self.session_lock(session_id).await;
        let result = {
            let _guard = lock.lock().await;

            self.sessions.write().await.remove(session_id);

            let task = CleanupTask::new(
                session_id.to_string(),
                self.host_address.clone(),
                now_millis(),
                SessionState::Cancelled,
            );
            cleanup_checkpoints(s5_storage, &task, now_millis(), &CleanupConfig::default()).await
        };
        self.release_session_lock(session_id, lock).await;

        result
    }
}

fn now_millis() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

/// Session ids become path segments; reject anything that could escape
pub fn validate_session_id(session_id: &str) -> CheckpointResult<()> {
    if session_id.is_empty()
        || session_id.contains('/')
        || session_id.contains('\\')
        || session_id.contains("..")
    {
        return Err(CheckpointError::InvalidCheckpoint(format!(
            "invalid session id '{}'",
            session_id
        )));
    }
    Ok(())
}

fn validate_against_index(
    index: &CheckpointIndex,
    checkpoint_index: u32,
    start_token: u64,
    end_token: u64,
) -> CheckpointResult<()> {
    let next = index.next_checkpoint_index();
    if checkpoint_index > next {
        return Err(CheckpointError::InvalidCheckpoint(format!(
            "checkpoint index {} would leave a gap (next is {})",
            checkpoint_index, next
        )));
    }

    if checkpoint_index > 0 {
        let previous_end = index.checkpoints[checkpoint_index as usize - 1].token_range[1];
        if start_token != previous_end {
            return Err(CheckpointError::InvalidCheckpoint(format!(
                "checkpoint {} starts at token {} but previous checkpoint ended at {}",
                checkpoint_index, start_token, previous_end
            )));
        }
    } else if start_token != 0 {
        warn!(
            "📤 [CHECKPOINT] First checkpoint starts at token {} (expected 0)",
            start_token
        );
    }

    if let Some(following) = index.checkpoints.get(checkpoint_index as usize + 1) {
        if following.token_range[0] != end_token {
            return Err(CheckpointError::InvalidCheckpoint(format!(
                "replacing checkpoint {} would break contiguity with checkpoint {}",
                checkpoint_index, following.index
            )));
        }
    }

    Ok(())
}
