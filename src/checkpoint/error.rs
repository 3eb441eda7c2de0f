// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

//! Checkpoint error taxonomy
//!
//! Publish failures (`TransientStorage`, `IndexConsistency`, `Encryption`)
//! mean the caller must NOT settle the interval on-chain. Recovery is
//! all-or-nothing: any `Verification` failure aborts with no partial output.

use crate::contracts::LedgerError;
use crate::crypto::CryptoError;
use crate::storage::StorageError;
use thiserror::Error;

/// Why a recovered checkpoint was rejected
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerificationFailure {
    #[error("index signature invalid: {0}")]
    IndexSignature(String),

    #[error("checkpoint {index}: message signature invalid: {reason}")]
    MessageSignature { index: u32, reason: String },

    #[error("ciphertext signature invalid: {0}")]
    CiphertextSignature(String),

    #[error("delta decryption failed: {0}")]
    Decryption(String),

    #[error("checkpoint {index}: proof hash {stored} does not match ledger {ledger}")]
    ProofHashMismatch {
        index: u32,
        stored: String,
        ledger: String,
    },

    #[error("checkpoint {index}: no proof recorded on the ledger")]
    ProofMissing { index: u32 },

    #[error("host {claimed} does not match expected host {expected}")]
    HostMismatch { claimed: String, expected: String },

    #[error("checkpoint {index}: index marks delta encrypted but stored delta is plaintext")]
    EncryptionDowngrade { index: u32 },

    #[error("checkpoint {index}: delta does not match index entry: {reason}")]
    EntryMismatch { index: u32, reason: String },

    #[error("checkpoint {index}: encrypted for a different recovery key")]
    RecipientMismatch { index: u32 },

    #[error("index order invalid: {0}")]
    Order(String),
}

#[derive(Debug, Error)]
pub enum CheckpointError {
    /// Upload retries exhausted; nothing was indexed
    #[error("Transient storage failure after {attempts} attempts: {source}")]
    TransientStorage {
        attempts: u32,
        #[source]
        source: StorageError,
    },

    /// Delta uploaded but the index write failed; the delta is an orphan
    #[error("Index update failed for checkpoint {checkpoint_index} (orphan delta {delta_cid}): {source}")]
    IndexConsistency {
        checkpoint_index: u32,
        delta_cid: String,
        #[source]
        source: StorageError,
    },

    #[error("Checkpoint verification failed: {0}")]
    Verification(#[from] VerificationFailure),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Delta could not be encrypted; nothing was uploaded
    #[error("Checkpoint encryption failed: {0}")]
    Encryption(#[source] CryptoError),

    #[error("Invalid checkpoint: {0}")]
    InvalidCheckpoint(String),

    #[error("Checkpoint codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("Ledger query failed: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Discovery request failed: {0}")]
    Discovery(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Checkpoint {0} is encrypted but no recovery private key was supplied")]
    RecoveryKeyRequired(u32),

    #[error("History unavailable: recovery timed out after {0:?}")]
    RecoveryTimeout(std::time::Duration),
}

impl CheckpointError {
    /// Whether retrying the same operation can succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CheckpointError::TransientStorage { .. }
                | CheckpointError::IndexConsistency { .. }
                | CheckpointError::Ledger(_)
                | CheckpointError::Discovery(_)
                | CheckpointError::Storage(_)
                | CheckpointError::RecoveryTimeout(_)
        )
    }

    /// Whether the data is inauthentic (as opposed to unavailable)
    pub fn is_verification_failure(&self) -> bool {
        matches!(self, CheckpointError::Verification(_))
    }
}

pub type CheckpointResult<T> = Result<T, CheckpointError>;
