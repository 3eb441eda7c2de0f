// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
pub mod api;
pub mod checkpoint;
pub mod cli;
pub mod config;
pub mod contracts;
pub mod crypto;
pub mod storage;
pub mod version;

// Re-export main types
pub use checkpoint::{
    CheckpointDiscovery, CheckpointError, CheckpointIndex, CheckpointMessage, CheckpointPublisher,
    PublishRequest, RecoveredConversation, RecoveryEngine,
};
pub use config::NodeConfig;
pub use contracts::{MockProofLedger, ProofLedger, Web3ProofLedger};
pub use storage::{MockS5Backend, S5Storage};
