// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Shared fixture: one host publishing into a mock S5 store, with a mock
//! ledger that records each proof once its checkpoint has been published.
#![allow(dead_code)]

use fabstir_checkpoint::checkpoint::{
    CheckpointDiscovery, CheckpointIndex, CheckpointMessage, CheckpointPublisher, CheckpointResult,
    PublishRequest, RecoveryEngine, RetryPolicy,
};
use fabstir_checkpoint::contracts::MockProofLedger;
use fabstir_checkpoint::crypto::public_key_from_private_key;
use fabstir_checkpoint::storage::{MockS5Backend, S5Storage};
use std::sync::Arc;
use std::time::Duration;

pub const HOST_KEY: [u8; 32] = [0x11; 32];
pub const USER_KEY: [u8; 32] = [0x22; 32];
pub const SESSION: &str = "1001";

pub struct Harness {
    pub storage: Arc<MockS5Backend>,
    pub ledger: Arc<MockProofLedger>,
    pub publisher: CheckpointPublisher,
}

impl Harness {
    pub async fn new() -> Self {
        let publisher = CheckpointPublisher::from_private_key(&HOST_KEY)
            .unwrap()
            .with_retry_policy(RetryPolicy {
                max_attempts: 3,
                base_delay: Duration::from_millis(1),
            });
        let ledger = Arc::new(MockProofLedger::new());
        ledger.set_session_host(SESSION, publisher.host_address()).await;

        Self {
            storage: Arc::new(MockS5Backend::new()),
            ledger,
            publisher,
        }
    }

    pub fn proof_hash(index: u32) -> [u8; 32] {
        let mut hash = [0xabu8; 32];
        hash[31] = index as u8;
        hash
    }

    pub fn user_public_key() -> String {
        public_key_from_private_key(&USER_KEY).unwrap()
    }

    /// Publish, then settle the proof on the mock ledger (publish gates settlement)
    pub async fn publish(
        &self,
        index: u32,
        start: u64,
        end: u64,
        messages: Vec<CheckpointMessage>,
        encrypted: bool,
    ) -> CheckpointResult<String> {
        let request = PublishRequest {
            session_id: SESSION.to_string(),
            checkpoint_index: index,
            proof_hash: Self::proof_hash(index),
            start_token: start,
            end_token: end,
            messages,
            recipient_pub_key: encrypted.then(Self::user_public_key),
            proof_cid: None,
        };

        let cid = self
            .publisher
            .publish(request, &HOST_KEY, self.storage.as_ref())
            .await?;
        self.ledger
            .record_proof(SESSION, index, Self::proof_hash(index))
            .await;
        Ok(cid)
    }

    pub fn engine(&self) -> RecoveryEngine {
        RecoveryEngine::new(self.ledger.clone(), self.storage.clone())
    }

    pub fn discovery(&self) -> CheckpointDiscovery {
        CheckpointDiscovery::new(self.storage.clone(), self.publisher.host_address())
    }

    pub fn index_path(&self) -> String {
        CheckpointIndex::storage_path(self.publisher.host_address(), SESSION)
    }

    pub fn delta_path(&self, index: u32) -> String {
        CheckpointIndex::delta_path(self.publisher.host_address(), SESSION, index)
    }

    pub async fn stored_index(&self) -> CheckpointIndex {
        let bytes = self.storage.get(&self.index_path()).await.unwrap();
        CheckpointIndex::from_json_bytes(&bytes).unwrap()
    }
}

/// The two-checkpoint conversation used by the end-to-end scenarios
pub fn scenario_messages() -> (Vec<CheckpointMessage>, Vec<CheckpointMessage>) {
    (
        vec![
            CheckpointMessage::new_user("Explain quantum computing".to_string(), 1_000),
            CheckpointMessage::new_assistant(
                "Quantum computers use qubits, which can be in superposition.".to_string(),
                2_000,
                false,
            ),
        ],
        vec![CheckpointMessage::new_user(
            "How is that different from a classical bit?".to_string(),
            3_000,
        )],
    )
}
