// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
// Tampering, ledger disagreement and partial-publish failures

use super::common::{scenario_messages, Harness, HOST_KEY, SESSION, USER_KEY};
use anyhow::Result;
use async_trait::async_trait;
use fabstir_checkpoint::checkpoint::{
    CheckpointDelta, CheckpointError, CheckpointIndex, CheckpointResult, CheckpointSource,
    PublishRequest, RecoveryConfig, VerificationFailure,
};
use fabstir_checkpoint::contracts::LedgerError;
use fabstir_checkpoint::storage::{S5Storage, StorageError};
use serde_json::Value;
use std::time::Duration;

#[tokio::test]
async fn test_tampered_ciphertext_fails_recovery() -> Result<()> {
    let harness = Harness::new().await;
    let (first, second) = scenario_messages();
    harness.publish(0, 0, 1000, first, true).await?;
    harness.publish(1, 1000, 2000, second, true).await?;

    // flip one byte of checkpoint 1's ciphertext
    let path = harness.delta_path(1);
    let mut stored: Value = serde_json::from_slice(&harness.storage.get(&path).await?)?;
    let ciphertext = stored["ciphertext"].as_str().unwrap().to_string();
    let mut bytes = hex::decode(&ciphertext)?;
    bytes[0] ^= 0x01;
    stored["ciphertext"] = Value::String(hex::encode(bytes));
    harness
        .storage
        .overwrite_raw(&path, serde_json::to_vec(&stored)?)
        .await?;

    let result = harness
        .engine()
        .recover_from(&harness.discovery(), SESSION, Some(&USER_KEY))
        .await;

    let err = result.expect_err("tampered checkpoint must abort recovery");
    assert!(err.is_verification_failure(), "got {:?}", err);
    Ok(())
}

#[tokio::test]
async fn test_tampered_plaintext_message_fails_recovery() -> Result<()> {
    let harness = Harness::new().await;
    let (first, _) = scenario_messages();
    harness.publish(0, 0, 1000, first, false).await?;

    let path = harness.delta_path(0);
    let mut stored: Value = serde_json::from_slice(&harness.storage.get(&path).await?)?;
    stored["messages"][0]["content"] = Value::String("Explain classical computing".into());
    harness
        .storage
        .overwrite_raw(&path, serde_json::to_vec(&stored)?)
        .await?;

    let result = harness
        .engine()
        .recover_from(&harness.discovery(), SESSION, None)
        .await;
    assert!(matches!(
        result,
        Err(CheckpointError::Verification(
            VerificationFailure::MessageSignature { index: 0, .. }
        ))
    ));
    Ok(())
}

#[tokio::test]
async fn test_altered_index_proof_hash_fails_recovery() -> Result<()> {
    let harness = Harness::new().await;
    let (first, second) = scenario_messages();
    harness.publish(0, 0, 1000, first, false).await?;
    harness.publish(1, 1000, 2000, second, false).await?;

    let mut index = harness.stored_index().await;
    index.checkpoints[1].proof_hash = format!("0x{}", "ff".repeat(32));
    harness
        .storage
        .overwrite_raw(&harness.index_path(), index.to_json_bytes()?)
        .await?;

    let result = harness
        .engine()
        .recover_from(&harness.discovery(), SESSION, None)
        .await;
    assert!(matches!(
        result,
        Err(CheckpointError::Verification(
            VerificationFailure::IndexSignature(_)
        ))
    ));
    Ok(())
}

#[tokio::test]
async fn test_ledger_proof_disagreement_fails_recovery() -> Result<()> {
    let harness = Harness::new().await;
    let (first, second) = scenario_messages();
    harness.publish(0, 0, 1000, first, false).await?;
    harness.publish(1, 1000, 2000, second, false).await?;

    harness.ledger.record_proof(SESSION, 1, [0x99; 32]).await;

    let result = harness
        .engine()
        .recover_from(&harness.discovery(), SESSION, None)
        .await;
    match result {
        Err(CheckpointError::Verification(VerificationFailure::ProofHashMismatch {
            index, ..
        })) => assert_eq!(index, 1),
        other => panic!("expected ProofHashMismatch, got {:?}", other),
    }
    Ok(())
}

#[tokio::test]
async fn test_unsettled_checkpoint_is_not_trusted() -> Result<()> {
    let harness = Harness::new().await;
    let (first, second) = scenario_messages();
    harness.publish(0, 0, 1000, first, false).await?;

    // published, but the proof never reached the ledger
    harness
        .publisher
        .publish(
            PublishRequest {
                session_id: SESSION.to_string(),
                checkpoint_index: 1,
                proof_hash: Harness::proof_hash(1),
                start_token: 1000,
                end_token: 2000,
                messages: second,
                recipient_pub_key: None,
                proof_cid: None,
            },
            &HOST_KEY,
            harness.storage.as_ref(),
        )
        .await?;

    let result = harness
        .engine()
        .recover_from(&harness.discovery(), SESSION, None)
        .await;
    assert!(matches!(
        result,
        Err(CheckpointError::Verification(VerificationFailure::ProofMissing { index: 1 }))
    ));
    Ok(())
}

#[tokio::test]
async fn test_plaintext_substituted_for_encrypted_delta_fails() -> Result<()> {
    let harness = Harness::new().await;
    let (first, _) = scenario_messages();
    harness.publish(0, 0, 1000, first.clone(), true).await?;

    // a correctly signed plaintext delta placed behind the encrypted entry
    let mut delta = CheckpointDelta::new(SESSION, 0, &Harness::proof_hash(0), 0, 1000, first);
    delta.sign(&HOST_KEY)?;
    harness
        .storage
        .overwrite_raw(&harness.delta_path(0), delta.to_json_bytes()?)
        .await?;

    let result = harness
        .engine()
        .recover_from(&harness.discovery(), SESSION, Some(&USER_KEY))
        .await;
    assert!(matches!(
        result,
        Err(CheckpointError::Verification(
            VerificationFailure::EncryptionDowngrade { index: 0 }
        ))
    ));
    Ok(())
}

#[tokio::test]
async fn test_index_upload_failure_leaves_previous_index() -> Result<()> {
    let harness = Harness::new().await;
    let (first, second) = scenario_messages();
    harness.publish(0, 0, 1000, first, false).await?;

    harness
        .storage
        .fail_puts_matching(
            "index.json",
            None,
            StorageError::NetworkError("portal down".to_string()),
        )
        .await;

    let result = harness.publish(1, 1000, 2000, second.clone(), false).await;
    match result {
        Err(CheckpointError::IndexConsistency {
            checkpoint_index,
            delta_cid,
            ..
        }) => {
            assert_eq!(checkpoint_index, 1);
            assert!(!delta_cid.is_empty());
        }
        other => panic!("expected IndexConsistency, got {:?}", other),
    }

    // orphan delta exists, but the index never references it
    assert!(harness.storage.exists(&harness.delta_path(1)).await?);
    let index = harness.stored_index().await;
    assert_eq!(index.checkpoints.len(), 1);

    // the caller did not settle checkpoint 1, so recovery returns checkpoint 0 only
    let recovered = harness
        .engine()
        .recover_from(&harness.discovery(), SESSION, None)
        .await?;
    assert_eq!(recovered.checkpoint_count, 1);
    assert_eq!(recovered.messages.len(), 2);

    // retry after the outage: exactly one new entry
    harness.storage.clear_put_failures().await;
    harness.publish(1, 1000, 2000, second, false).await?;

    let index = harness.stored_index().await;
    assert_eq!(index.checkpoints.len(), 2);
    index.validate_order()?;
    Ok(())
}

#[tokio::test]
async fn test_transient_index_failure_is_retried() -> Result<()> {
    let harness = Harness::new().await;
    let (first, _) = scenario_messages();

    harness
        .storage
        .fail_puts_matching(
            "index.json",
            Some(2),
            StorageError::ServerError("503".to_string()),
        )
        .await;

    harness.publish(0, 0, 1000, first, false).await?;
    assert_eq!(harness.storage.put_count(&harness.index_path()).await, 3);
    assert_eq!(harness.stored_index().await.checkpoints.len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_ledger_outage_is_not_a_verification_failure() -> Result<()> {
    let harness = Harness::new().await;
    let (first, _) = scenario_messages();
    harness.publish(0, 0, 1000, first, false).await?;

    harness
        .ledger
        .fail_next(LedgerError::Rpc("connection refused".to_string()))
        .await;

    let err = harness
        .engine()
        .recover_from(&harness.discovery(), SESSION, None)
        .await
        .expect_err("ledger outage must surface");
    assert!(matches!(err, CheckpointError::Ledger(_)));
    assert!(!err.is_verification_failure());
    assert!(err.is_retryable());
    Ok(())
}

/// Source that never answers
struct StalledSource;

#[async_trait]
impl CheckpointSource for StalledSource {
    async fn fetch_index(&self, _session_id: &str) -> CheckpointResult<Option<CheckpointIndex>> {
        std::future::pending().await
    }

    async fn fetch_delta(&self, _delta_cid: &str) -> CheckpointResult<Vec<u8>> {
        std::future::pending().await
    }
}

#[tokio::test]
async fn test_recovery_timeout_reports_history_unavailable() -> Result<()> {
    let harness = Harness::new().await;
    let engine = harness.engine().with_config(RecoveryConfig {
        timeout: Duration::from_millis(50),
        ..RecoveryConfig::default()
    });

    let result = engine
        .recover_with_timeout(&StalledSource, SESSION, None)
        .await;
    match result {
        Err(CheckpointError::RecoveryTimeout(timeout)) => {
            assert_eq!(timeout, Duration::from_millis(50))
        }
        other => panic!("expected RecoveryTimeout, got {:?}", other),
    }
    Ok(())
}
