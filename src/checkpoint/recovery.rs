// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

//! Client-side checkpoint recovery
//!
//! Rebuilds a conversation from a host's published checkpoints. Every entry
//! is checked against the proof ledger and every signature is verified
//! before any message is returned. Recovery is all-or-nothing: the first
//! verification failure aborts with no partial output.
//!
//! ## Order of checks
//! 1. Index host matches the ledger's session host (and any pinned host)
//! 2. `hostSignature` and `messagesSignature` over the index
//! 3. Index order (contiguous indices and token ranges)
//! 4. Per entry, concurrently: ledger proof hash, delta signature(s),
//!    decryption, delta fields against the entry
//! 5. Merge messages in checkpoint order, joining partial continuations

use crate::checkpoint::codec::StoredDelta;
use crate::checkpoint::delta::{format_proof_hash, parse_proof_hash, CheckpointDelta, CheckpointMessage};
use crate::checkpoint::discovery::{CheckpointSource, HttpDiscoveryClient};
use crate::checkpoint::encryption::decrypt_checkpoint_delta;
use crate::checkpoint::error::{CheckpointError, CheckpointResult, VerificationFailure};
use crate::checkpoint::index::{CheckpointEntry, CheckpointIndex};
use crate::checkpoint::publisher::validate_session_id;
use crate::contracts::ProofLedger;
use crate::crypto::public_key_from_private_key;
use crate::storage::S5Storage;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Deltas fetched and verified in parallel
pub const DEFAULT_RECOVERY_CONCURRENCY: usize = 4;

/// Whole-recovery deadline for `recover_with_timeout`
pub const DEFAULT_RECOVERY_TIMEOUT_SECS: u64 = 60;

/// Per-request timeout for the HTTP discovery client
pub const DEFAULT_DISCOVERY_HTTP_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone)]
pub struct RecoveryConfig {
    pub concurrency: usize,
    pub timeout: Duration,
    pub http_timeout: Duration,
    /// Host the client negotiated with; the index must be signed by it
    pub expected_host: Option<String>,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_RECOVERY_CONCURRENCY,
            timeout: Duration::from_secs(DEFAULT_RECOVERY_TIMEOUT_SECS),
            http_timeout: Duration::from_secs(DEFAULT_DISCOVERY_HTTP_TIMEOUT_SECS),
            expected_host: None,
        }
    }
}

/// Verified conversation history
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveredConversation {
    pub session_id: String,
    pub messages: Vec<CheckpointMessage>,
    pub checkpoint_count: usize,
    /// End token of the last checkpoint
    pub total_tokens: u64,
}

impl RecoveredConversation {
    pub fn empty(session_id: &str) -> Self {
        Self {
            session_id: session_id.to_string(),
            messages: Vec::new(),
            checkpoint_count: 0,
            total_tokens: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.checkpoint_count == 0
    }
}

pub struct RecoveryEngine {
    ledger: Arc<dyn ProofLedger>,
    storage: Arc<dyn S5Storage>,
    config: RecoveryConfig,
}

impl RecoveryEngine {
    /// `storage` is the client's handle for fetching deltas by CID
    pub fn new(ledger: Arc<dyn ProofLedger>, storage: Arc<dyn S5Storage>) -> Self {
        Self {
            ledger,
            storage,
            config: RecoveryConfig::default(),
        }
    }

    pub fn with_config(mut self, config: RecoveryConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &RecoveryConfig {
        &self.config
    }

    /// Recover from a host's discovery endpoint (`http://host:port`)
    pub async fn recover(
        &self,
        session_id: &str,
        host_endpoint: &str,
        user_private_key: Option<&[u8; 32]>,
    ) -> CheckpointResult<RecoveredConversation> {
        let source = HttpDiscoveryClient::new(
            host_endpoint,
            self.storage.clone(),
            self.config.http_timeout,
        )?;
        self.recover_from(&source, session_id, user_private_key).await
    }

    /// `recover_from` bounded by the configured deadline
    ///
    /// A timeout means history is unavailable, not that it is inauthentic.
    pub async fn recover_with_timeout(
        &self,
        source: &dyn CheckpointSource,
        session_id: &str,
        user_private_key: Option<&[u8; 32]>,
    ) -> CheckpointResult<RecoveredConversation> {
        let timeout = self.config.timeout;
        match tokio::time::timeout(timeout, self.recover_from(source, session_id, user_private_key))
            .await
        {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    "[RECOVERY] Timed out after {:?} recovering session {}",
                    timeout, session_id
                );
                Err(CheckpointError::RecoveryTimeout(timeout))
            }
        }
    }

    pub async fn recover_from(
        &self,
        source: &dyn CheckpointSource,
        session_id: &str,
        user_private_key: Option<&[u8; 32]>,
    ) -> CheckpointResult<RecoveredConversation> {
        validate_session_id(session_id)?;

        let index = match source.fetch_index(session_id).await? {
            Some(index) if !index.checkpoints.is_empty() => index,
            _ => {
                info!("[RECOVERY] No checkpoints for session {}", session_id);
                return Ok(RecoveredConversation::empty(session_id));
            }
        };

        if index.session_id != session_id {
            return Err(VerificationFailure::IndexSignature(format!(
                "index is for session {}, requested {}",
                index.session_id, session_id
            ))
            .into());
        }

        let host = self.resolve_host(session_id, &index).await?;
        index.verify_signatures(&host)?;
        index.validate_order()?;

        info!(
            "[RECOVERY] Verifying {} checkpoints for session {} (host {})",
            index.checkpoints.len(),
            session_id,
            host
        );

        let host_ref = host.as_str();
        let results: Vec<CheckpointResult<(u32, Vec<CheckpointMessage>)>> =
            stream::iter(index.checkpoints.iter())
                .map(|entry| self.verify_entry(source, session_id, host_ref, entry, user_private_key))
                .buffer_unordered(self.config.concurrency.max(1))
                .collect()
                .await;

        let mut chunks = Vec::with_capacity(results.len());
        for result in results {
            chunks.push(result?);
        }

        let messages = merge_checkpoint_messages(chunks);

        info!(
            "[RECOVERY] ✅ Recovered session {}: {} checkpoints, {} messages, {} tokens",
            session_id,
            index.checkpoints.len(),
            messages.len(),
            index.total_tokens()
        );

        Ok(RecoveredConversation {
            session_id: session_id.to_string(),
            messages,
            checkpoint_count: index.checkpoints.len(),
            total_tokens: index.total_tokens(),
        })
    }

    /// Host whose signatures the index must carry
    async fn resolve_host(&self, session_id: &str, index: &CheckpointIndex) -> CheckpointResult<String> {
        let pinned = self.config.expected_host.as_ref().map(|h| h.to_lowercase());
        let on_ledger = self.ledger.session_host(session_id).await?;

        if let (Some(pinned), Some(on_ledger)) = (&pinned, &on_ledger) {
            if !pinned.eq_ignore_ascii_case(on_ledger) {
                return Err(VerificationFailure::HostMismatch {
                    claimed: pinned.clone(),
                    expected: on_ledger.to_lowercase(),
                }
                .into());
            }
        }

        match on_ledger.or(pinned) {
            Some(host) => Ok(host.to_lowercase()),
            None => {
                warn!(
                    "[RECOVERY] No ledger or pinned host for session {}; trusting index host {}",
                    session_id, index.host_address
                );
                Ok(index.host_address.to_lowercase())
            }
        }
    }

    async fn verify_entry(
        &self,
        source: &dyn CheckpointSource,
        session_id: &str,
        host: &str,
        entry: &CheckpointEntry,
        user_private_key: Option<&[u8; 32]>,
    ) -> CheckpointResult<(u32, Vec<CheckpointMessage>)> {
        let index = entry.index;

        // Ledger first: an unsettled checkpoint is never trusted
        let ledger_hash = self
            .ledger
            .proof_hash_at(session_id, index)
            .await?
            .ok_or(VerificationFailure::ProofMissing { index })?;

        let entry_hash = parse_proof_hash(&entry.proof_hash).map_err(|_| mismatch(index, "malformed proofHash"))?;
        if entry_hash != ledger_hash {
            return Err(VerificationFailure::ProofHashMismatch {
                index,
                stored: entry.proof_hash.clone(),
                ledger: format_proof_hash(&ledger_hash),
            }
            .into());
        }

        let bytes = source.fetch_delta(&entry.delta_cid).await?;
        let stored = StoredDelta::from_json_bytes(&bytes)
            .map_err(|e| mismatch(index, &format!("stored delta is not a checkpoint delta: {}", e)))?;

        let delta = match stored {
            StoredDelta::Plaintext(delta) => {
                if entry.encrypted {
                    return Err(VerificationFailure::EncryptionDowngrade { index }.into());
                }
                delta.verify_signature(host)?;
                delta
            }
            StoredDelta::Encrypted(encrypted) => {
                if !entry.encrypted {
                    return Err(mismatch(index, "delta is encrypted but entry is not marked encrypted"));
                }
                let user_key = user_private_key.ok_or(CheckpointError::RecoveryKeyRequired(index))?;

                encrypted.verify_host_signature(host)?;

                let our_public = public_key_from_private_key(user_key)
                    .map_err(|e| CheckpointError::InvalidCheckpoint(format!("invalid recovery key: {}", e)))?;
                if !encrypted.is_for_recipient(&our_public) {
                    return Err(VerificationFailure::RecipientMismatch { index }.into());
                }

                let delta = decrypt_checkpoint_delta(&encrypted, user_key)?;
                delta.verify_signature(host)?;
                delta
            }
        };

        check_delta_matches_entry(&delta, session_id, entry, &ledger_hash)?;
        debug!("[RECOVERY] Checkpoint {} verified", index);

        Ok((index, delta.messages))
    }
}

fn mismatch(index: u32, reason: &str) -> CheckpointError {
    VerificationFailure::EntryMismatch {
        index,
        reason: reason.to_string(),
    }
    .into()
}

fn check_delta_matches_entry(
    delta: &CheckpointDelta,
    session_id: &str,
    entry: &CheckpointEntry,
    ledger_hash: &[u8; 32],
) -> CheckpointResult<()> {
    let index = entry.index;

    if delta.session_id != session_id {
        return Err(mismatch(index, &format!("sessionId {}", delta.session_id)));
    }
    if delta.checkpoint_index != index {
        return Err(mismatch(index, &format!("checkpointIndex {}", delta.checkpoint_index)));
    }
    match parse_proof_hash(&delta.proof_hash) {
        Ok(hash) if &hash == ledger_hash => {}
        _ => return Err(mismatch(index, &format!("proofHash {}", delta.proof_hash))),
    }
    if [delta.start_token, delta.end_token] != entry.token_range {
        return Err(mismatch(
            index,
            &format!("token range [{}, {}]", delta.start_token, delta.end_token),
        ));
    }
    if let Some(expected) = &entry.messages_hash {
        let actual = delta.messages_hash()?;
        if !actual.eq_ignore_ascii_case(expected) {
            return Err(mismatch(index, "messagesHash"));
        }
    }
    Ok(())
}

/// Concatenate verified checkpoint messages in index order
///
/// A `partial` message ending a checkpoint is joined with the first message
/// of the same role in the next non-empty checkpoint; the other messages of
/// that checkpoint keep their order after it. The joined message stays
/// partial only if the continuation is. A partial with no continuation is
/// returned flagged.
pub fn merge_checkpoint_messages(
    mut chunks: Vec<(u32, Vec<CheckpointMessage>)>,
) -> Vec<CheckpointMessage> {
    chunks.sort_by_key(|(index, _)| *index);

    let mut merged: Vec<CheckpointMessage> = Vec::new();
    // position in `merged` of a partial still waiting for its continuation
    let mut open_partial: Option<usize> = None;

    for (_, mut messages) in chunks {
        if messages.is_empty() {
            continue;
        }

        let mut still_open = None;
        if let Some(pos) = open_partial.take() {
            let role = merged[pos].role;
            if let Some(at) = messages.iter().position(|m| m.role == role) {
                let continuation = messages.remove(at);
                let target = &mut merged[pos];
                target.content.push_str(&continuation.content);
                target.set_partial(continuation.is_partial());
                if target.is_partial() {
                    still_open = Some(pos);
                }
            }
        }

        let trailing_partial = messages.last().is_some_and(CheckpointMessage::is_partial);
        merged.extend(messages);

        open_partial = if trailing_partial {
            Some(merged.len() - 1)
        } else {
            still_open
        };
    }
    merged
}
