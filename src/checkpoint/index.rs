// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

//! Checkpoint Index data structures
//!
//! The index lists all checkpoints for a session, stored at:
//! `home/checkpoints/{hostAddress}/{sessionId}/index.json`
//!
//! Two host signatures cover it:
//! - `hostSignature` over the canonical `checkpoints` array
//! - `messagesSignature` over the concatenated `messagesHash` values, so a
//!   client can tie the indexed message content to the host even when the
//!   deltas themselves are encrypted

use crate::checkpoint::codec::{canonical_json, canonical_json_bytes};
use crate::checkpoint::error::{CheckpointError, CheckpointResult, VerificationFailure};
use crate::crypto::{sign_message, verify_signature};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Checkpoint index listing all checkpoints for a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckpointIndex {
    pub session_id: String,

    /// Host's Ethereum address (lowercase)
    pub host_address: String,

    pub checkpoints: Vec<CheckpointEntry>,

    /// EIP-191 signature of checkpoints array
    pub host_signature: String,

    /// EIP-191 signature of the concatenated per-entry messages hashes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub messages_signature: Option<String>,
}

/// A single checkpoint entry in the index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckpointEntry {
    /// 0-based checkpoint index
    pub index: u32,

    /// bytes32 proof hash (matches on-chain)
    pub proof_hash: String,

    /// CID where delta is stored (raw CID, no s5:// prefix)
    pub delta_cid: String,

    /// CID of the proof artifact, when the caller stored one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proof_cid: Option<String>,

    /// [startToken, endToken] tuple
    pub token_range: [u64; 2],

    /// Unix timestamp in milliseconds
    pub timestamp: u64,

    /// Present (and true) only for encrypted deltas
    #[serde(default, skip_serializing_if = "is_false")]
    pub encrypted: bool,

    /// keccak256 of the delta's canonical messages encoding
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub messages_hash: Option<String>,
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// Session state for cleanup policy
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Active,
    Completed,
    TimedOut,
    Cancelled,
}

impl CheckpointIndex {
    /// Create empty index for new session
    pub fn new(session_id: impl Into<String>, host_address: &str) -> Self {
        Self {
            session_id: session_id.into(),
            host_address: host_address.to_lowercase(),
            checkpoints: Vec::new(),
            host_signature: String::new(),
            messages_signature: None,
        }
    }

    /// Path for the session index
    /// Format: home/checkpoints/{hostAddress}/{sessionId}/index.json
    pub fn storage_path(host_address: &str, session_id: &str) -> String {
        format!(
            "home/checkpoints/{}/{}/index.json",
            host_address.to_lowercase(),
            session_id
        )
    }

    /// Path for one delta object, next to the index
    pub fn delta_path(host_address: &str, session_id: &str, checkpoint_index: u32) -> String {
        format!(
            "home/checkpoints/{}/{}/delta_{}.json",
            host_address.to_lowercase(),
            session_id,
            checkpoint_index
        )
    }

    /// JSON string of checkpoints array that `hostSignature` covers
    pub fn compute_checkpoints_json(&self) -> serde_json::Result<String> {
        canonical_json(&self.checkpoints)
    }

    /// Concatenated `messagesHash` values in index order, or `None` if
    /// any entry predates messages hashing
    pub fn compute_messages_digest_input(&self) -> Option<String> {
        if self.checkpoints.is_empty() {
            return None;
        }
        self.checkpoints
            .iter()
            .map(|entry| entry.messages_hash.as_deref())
            .collect::<Option<Vec<_>>>()
            .map(|hashes| hashes.concat())
    }

    /// Append the next entry or replace an existing one (last write wins).
    /// Returns the replaced entry, if any.
    pub fn upsert_checkpoint(
        &mut self,
        entry: CheckpointEntry,
    ) -> CheckpointResult<Option<CheckpointEntry>> {
        let next = self.next_checkpoint_index();

        if entry.index > next {
            return Err(CheckpointError::InvalidCheckpoint(format!(
                "checkpoint index {} would leave a gap (next is {})",
                entry.index, next
            )));
        }

        if entry.index == next {
            self.checkpoints.push(entry);
            return Ok(None);
        }

        let slot = &mut self.checkpoints[entry.index as usize];
        if !slot.proof_hash.eq_ignore_ascii_case(&entry.proof_hash) {
            warn!(
                "⚠️ [CHECKPOINT] Replacing checkpoint {} for session {} with a different proof hash ({} -> {})",
                entry.index, self.session_id, slot.proof_hash, entry.proof_hash
            );
        }
        Ok(Some(std::mem::replace(slot, entry)))
    }

    pub fn last_checkpoint(&self) -> Option<&CheckpointEntry> {
        self.checkpoints.last()
    }

    pub fn next_checkpoint_index(&self) -> u32 {
        self.checkpoints.len() as u32
    }

    /// Token count covered by the index
    pub fn total_tokens(&self) -> u64 {
        self.last_checkpoint()
            .map(|entry| entry.token_range[1])
            .unwrap_or(0)
    }

    /// Re-sign both index signatures after a mutation
    pub fn sign(&mut self, private_key: &[u8; 32]) -> CheckpointResult<()> {
        let checkpoints_json = self.compute_checkpoints_json()?;
        self.host_signature = sign_message(private_key, checkpoints_json.as_bytes())
            .map_err(|e| CheckpointError::InvalidCheckpoint(format!("index signing failed: {}", e)))?;

        self.messages_signature = match self.compute_messages_digest_input() {
            Some(input) => Some(sign_message(private_key, input.as_bytes()).map_err(|e| {
                CheckpointError::InvalidCheckpoint(format!("index signing failed: {}", e))
            })?),
            None => None,
        };

        Ok(())
    }

    /// Verify the index was signed by `host_address`
    pub fn verify_signatures(&self, host_address: &str) -> CheckpointResult<()> {
        if !self.host_address.eq_ignore_ascii_case(host_address) {
            return Err(VerificationFailure::HostMismatch {
                claimed: self.host_address.clone(),
                expected: host_address.to_lowercase(),
            }
            .into());
        }

        let checkpoints_json = self.compute_checkpoints_json()?;
        verify_signature(&self.host_signature, checkpoints_json.as_bytes(), host_address)
            .map_err(|e| VerificationFailure::IndexSignature(e.to_string()))?;

        match (self.compute_messages_digest_input(), &self.messages_signature) {
            (Some(input), Some(signature)) => {
                verify_signature(signature, input.as_bytes(), host_address).map_err(|e| {
                    VerificationFailure::IndexSignature(format!("messagesSignature: {}", e))
                })?;
            }
            (Some(_), None) => {
                return Err(VerificationFailure::IndexSignature(
                    "messagesSignature missing".to_string(),
                )
                .into());
            }
            (None, _) => {}
        }

        Ok(())
    }

    /// Indices contiguous from 0; token ranges contiguous and non-overlapping
    pub fn validate_order(&self) -> CheckpointResult<()> {
        let mut previous_end: Option<u64> = None;

        for (position, entry) in self.checkpoints.iter().enumerate() {
            if entry.index as usize != position {
                return Err(VerificationFailure::Order(format!(
                    "entry at position {} has index {}",
                    position, entry.index
                ))
                .into());
            }

            let [start, end] = entry.token_range;
            if start > end {
                return Err(VerificationFailure::Order(format!(
                    "checkpoint {} has inverted token range [{}, {}]",
                    entry.index, start, end
                ))
                .into());
            }

            if let Some(prev) = previous_end {
                if start != prev {
                    return Err(VerificationFailure::Order(format!(
                        "checkpoint {} starts at token {} but previous ended at {}",
                        entry.index, start, prev
                    ))
                    .into());
                }
            }
            previous_end = Some(end);
        }

        Ok(())
    }

    /// Canonical JSON bytes for upload and the discovery endpoint
    pub fn to_json_bytes(&self) -> serde_json::Result<Vec<u8>> {
        canonical_json_bytes(self)
    }

    pub fn from_json_bytes(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }
}

impl CheckpointEntry {
    pub fn new(
        index: u32,
        proof_hash: String,
        delta_cid: String,
        start_token: u64,
        end_token: u64,
    ) -> Self {
        Self::with_timestamp(
            index,
            proof_hash,
            delta_cid,
            start_token,
            end_token,
            chrono::Utc::now().timestamp_millis().max(0) as u64,
        )
    }

    /// Create with explicit timestamp (for testing)
    pub fn with_timestamp(
        index: u32,
        proof_hash: String,
        delta_cid: String,
        start_token: u64,
        end_token: u64,
        timestamp: u64,
    ) -> Self {
        Self {
            index,
            proof_hash,
            delta_cid,
            proof_cid: None,
            token_range: [start_token, end_token],
            timestamp,
            encrypted: false,
            messages_hash: None,
        }
    }

    pub fn encrypted(mut self, encrypted: bool) -> Self {
        self.encrypted = encrypted;
        self
    }

    pub fn with_messages_hash(mut self, messages_hash: String) -> Self {
        self.messages_hash = Some(messages_hash);
        self
    }

    pub fn with_proof_cid(mut self, proof_cid: Option<String>) -> Self {
        self.proof_cid = proof_cid;
        self
    }
}
