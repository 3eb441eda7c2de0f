// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

//! Checkpoint Delta data structures
//!
//! A delta contains the messages added during one proof interval.
//! Used for SDK conversation recovery.

use crate::checkpoint::codec::{canonical_json_bytes, encode_messages};
use crate::checkpoint::error::{CheckpointError, CheckpointResult, VerificationFailure};
use crate::crypto::{keccak256, sign_message, verify_signature};
use serde::{Deserialize, Serialize};

/// A checkpoint delta containing messages since the last checkpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckpointDelta {
    /// Session ID (matches on-chain session)
    pub session_id: String,

    /// 0-based index of this checkpoint
    pub checkpoint_index: u32,

    /// bytes32 hash of proof data (matches on-chain)
    pub proof_hash: String,

    /// Token count at start of this delta
    pub start_token: u64,

    /// Token count at end of this delta
    pub end_token: u64,

    /// Messages added during this interval
    pub messages: Vec<CheckpointMessage>,

    /// EIP-191 signature of the canonical messages encoding
    pub host_signature: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

/// A conversation message in a checkpoint delta
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckpointMessage {
    pub role: MessageRole,

    pub content: String,

    /// Unix timestamp in milliseconds
    pub timestamp: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<MessageMetadata>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageMetadata {
    /// True if message continues in next delta (streaming)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partial: Option<bool>,
}

impl CheckpointDelta {
    /// Unsigned delta; call `sign` before upload
    pub fn new(
        session_id: impl Into<String>,
        checkpoint_index: u32,
        proof_hash: &[u8; 32],
        start_token: u64,
        end_token: u64,
        messages: Vec<CheckpointMessage>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            checkpoint_index,
            proof_hash: format_proof_hash(proof_hash),
            start_token,
            end_token,
            messages,
            host_signature: String::new(),
        }
    }

    /// JSON string of the messages array that the host signature covers
    pub fn compute_messages_json(&self) -> serde_json::Result<String> {
        encode_messages(&self.messages)
    }

    /// keccak256 of the messages encoding, `0x` hex
    pub fn messages_hash(&self) -> serde_json::Result<String> {
        let encoded = self.compute_messages_json()?;
        Ok(format!("0x{}", hex::encode(keccak256(encoded.as_bytes()))))
    }

    pub fn sign(&mut self, private_key: &[u8; 32]) -> CheckpointResult<()> {
        let encoded = self.compute_messages_json()?;
        self.host_signature = sign_message(private_key, encoded.as_bytes())
            .map_err(|e| CheckpointError::InvalidCheckpoint(format!("signing failed: {}", e)))?;
        Ok(())
    }

    /// Check the host signature over the messages encoding
    pub fn verify_signature(&self, host_address: &str) -> CheckpointResult<()> {
        let encoded = self.compute_messages_json()?;
        verify_signature(&self.host_signature, encoded.as_bytes(), host_address).map_err(|e| {
            VerificationFailure::MessageSignature {
                index: self.checkpoint_index,
                reason: e.to_string(),
            }
        })?;
        Ok(())
    }

    /// Convert delta to canonical JSON bytes for upload
    pub fn to_json_bytes(&self) -> serde_json::Result<Vec<u8>> {
        canonical_json_bytes(self)
    }

    pub fn token_count(&self) -> u64 {
        self.end_token.saturating_sub(self.start_token)
    }
}

impl CheckpointMessage {
    pub fn new_user(content: String, timestamp: u64) -> Self {
        Self {
            role: MessageRole::User,
            content,
            timestamp,
            metadata: None,
        }
    }

    pub fn new_assistant(content: String, timestamp: u64, partial: bool) -> Self {
        Self {
            role: MessageRole::Assistant,
            content,
            timestamp,
            metadata: if partial {
                Some(MessageMetadata {
                    partial: Some(true),
                })
            } else {
                None
            },
        }
    }

    /// True if the message continues in the next delta
    pub fn is_partial(&self) -> bool {
        self.metadata
            .as_ref()
            .and_then(|m| m.partial)
            .unwrap_or(false)
    }

    pub fn set_partial(&mut self, partial: bool) {
        self.metadata = if partial {
            Some(MessageMetadata {
                partial: Some(true),
            })
        } else {
            None
        };
    }
}

/// Parse a `0x`-prefixed bytes32 hash (hex case is irrelevant)
pub fn parse_proof_hash(value: &str) -> CheckpointResult<[u8; 32]> {
    let hex_str = value.strip_prefix("0x").unwrap_or(value);

    if hex_str.len() != 64 {
        return Err(CheckpointError::InvalidCheckpoint(format!(
            "proof hash must be 64 hex characters, got {}",
            hex_str.len()
        )));
    }

    let bytes = hex::decode(hex_str)
        .map_err(|e| CheckpointError::InvalidCheckpoint(format!("invalid proof hash: {}", e)))?;

    let mut hash = [0u8; 32];
    hash.copy_from_slice(&bytes);
    Ok(hash)
}

pub fn format_proof_hash(hash: &[u8; 32]) -> String {
    format!("0x{}", hex::encode(hash))
}
