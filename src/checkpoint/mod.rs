// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

//! Checkpoint Publishing and Recovery
//!
//! Publishes signed conversation checkpoints to S5 storage so a client
//! can recover the conversation after a session timeout, and verifies
//! recovered checkpoints against proofs settled on-chain.
//!
//! ## Host flow
//! 1. Buffer conversation messages during inference
//! 2. At each proof submission (~1000 tokens):
//!    - Create delta with messages since last checkpoint
//!    - Sign with EIP-191 (encrypt for the user's recovery key if set)
//!    - Upload to S5
//!    - Re-read, update, re-sign and upload the checkpoint index
//! 3. THEN submit proof to chain
//!
//! ## Client flow
//! Fetch the index from `GET /checkpoints/{sessionId}`, check every entry
//! against the ledger, verify and decrypt each delta, merge messages.
//!
//! ## Critical
//! Checkpoint publishing MUST complete BEFORE proof submission.
//! If S5 upload fails, proof submission is blocked.
//!
//! ## SDK Compatibility
//! - JSON must use alphabetically sorted keys (recursive)
//! - Compact format (no spaces)
//! - Raw CID format without s5:// prefix

pub mod cleanup;
pub mod codec;
pub mod delta;
pub mod discovery;
pub mod encryption;
pub mod error;
pub mod index;
pub mod publisher;
pub mod recovery;

pub use cleanup::{
    cleanup_checkpoints, CleanupConfig, CleanupResult, CleanupTask, DisputeStatus,
};
pub use codec::{canonical_json, canonical_json_bytes, decode_messages, encode_messages, StoredDelta};
pub use delta::{
    format_proof_hash, parse_proof_hash, CheckpointDelta, CheckpointMessage, MessageMetadata,
    MessageRole,
};
pub use discovery::{CheckpointDiscovery, CheckpointSource, HttpDiscoveryClient};
pub use encryption::{decrypt_checkpoint_delta, encrypt_checkpoint_delta, EncryptedCheckpointDelta};
pub use error::{CheckpointError, CheckpointResult, VerificationFailure};
pub use index::{CheckpointEntry, CheckpointIndex, SessionState};
pub use publisher::{
    validate_session_id, CheckpointPublisher, PublishRequest, RetryPolicy, SessionCheckpointState,
};
pub use recovery::{
    merge_checkpoint_messages, RecoveredConversation, RecoveryConfig, RecoveryEngine,
};
