// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
// Publishing flow against the mock S5 backend

use super::common::{scenario_messages, Harness, HOST_KEY, SESSION};
use anyhow::Result;
use fabstir_checkpoint::checkpoint::{
    format_proof_hash, CheckpointError, CheckpointMessage, CheckpointPublisher, StoredDelta,
};
use fabstir_checkpoint::crypto::verify_signature;
use fabstir_checkpoint::storage::{S5Storage, StorageError};

#[tokio::test]
async fn test_publish_writes_delta_and_signed_index() -> Result<()> {
    let harness = Harness::new().await;
    let (first, _) = scenario_messages();

    let cid = harness.publish(0, 0, 1000, first.clone(), false).await?;
    assert!(!cid.starts_with("s5://"), "index must record raw CIDs");

    let index = harness.stored_index().await;
    assert_eq!(index.session_id, SESSION);
    assert_eq!(index.host_address, harness.publisher.host_address());
    assert_eq!(index.checkpoints.len(), 1);

    let entry = &index.checkpoints[0];
    assert_eq!(entry.index, 0);
    assert_eq!(entry.delta_cid, cid);
    assert_eq!(entry.token_range, [0, 1000]);
    assert_eq!(entry.proof_hash, format_proof_hash(&Harness::proof_hash(0)));
    assert!(!entry.encrypted);

    index.verify_signatures(harness.publisher.host_address())?;

    let stored = harness.storage.get_by_cid(&cid).await?;
    match StoredDelta::from_json_bytes(&stored)? {
        StoredDelta::Plaintext(delta) => {
            assert_eq!(delta.messages, first);
            assert_eq!(delta.start_token, 0);
            assert_eq!(delta.end_token, 1000);
            assert_eq!(Some(delta.messages_hash()?), entry.messages_hash);
            delta.verify_signature(harness.publisher.host_address())?;
        }
        StoredDelta::Encrypted(_) => panic!("plaintext session produced an encrypted delta"),
    }

    Ok(())
}

#[tokio::test]
async fn test_index_signature_covers_canonical_checkpoints() -> Result<()> {
    let harness = Harness::new().await;
    let (first, second) = scenario_messages();
    harness.publish(0, 0, 1000, first, false).await?;
    harness.publish(1, 1000, 2000, second, false).await?;

    let index = harness.stored_index().await;
    let checkpoints_json = index.compute_checkpoints_json()?;

    // canonical: sorted keys, compact
    assert!(checkpoints_json.starts_with("[{\"deltaCid\":"));
    assert!(!checkpoints_json.contains(": "));

    verify_signature(
        &index.host_signature,
        checkpoints_json.as_bytes(),
        harness.publisher.host_address(),
    )?;

    // stored bytes are exactly the canonical encoding
    let raw = harness.storage.get(&harness.index_path()).await?;
    assert_eq!(raw, index.to_json_bytes()?);
    Ok(())
}

#[tokio::test]
async fn test_token_ranges_stay_contiguous_across_publishes() -> Result<()> {
    let harness = Harness::new().await;
    let message = || vec![CheckpointMessage::new_user("next".to_string(), 1)];

    harness.publish(0, 0, 1000, message(), false).await?;
    harness.publish(1, 1000, 2000, message(), false).await?;
    harness.publish(2, 2000, 2500, message(), false).await?;

    // gap in indices
    let gap = harness.publish(4, 2500, 3000, message(), false).await;
    assert!(matches!(gap, Err(CheckpointError::InvalidCheckpoint(_))));

    // overlapping token range
    let overlap = harness.publish(3, 2400, 3000, message(), false).await;
    assert!(matches!(overlap, Err(CheckpointError::InvalidCheckpoint(_))));

    let index = harness.stored_index().await;
    assert_eq!(index.checkpoints.len(), 3);
    index.validate_order()?;
    assert_eq!(index.total_tokens(), 2500);
    Ok(())
}

#[tokio::test]
async fn test_republish_same_index_replaces_entry() -> Result<()> {
    let harness = Harness::new().await;
    let (first, _) = scenario_messages();

    let cid_a = harness.publish(0, 0, 1000, first.clone(), false).await?;
    let cid_b = harness
        .publish(
            0,
            0,
            1000,
            vec![CheckpointMessage::new_user("rewritten".to_string(), 5)],
            false,
        )
        .await?;
    assert_ne!(cid_a, cid_b);

    let index = harness.stored_index().await;
    assert_eq!(index.checkpoints.len(), 1);
    assert_eq!(index.checkpoints[0].delta_cid, cid_b);
    Ok(())
}

#[tokio::test]
async fn test_delta_upload_failure_publishes_nothing() -> Result<()> {
    let harness = Harness::new().await;
    let (first, _) = scenario_messages();

    harness
        .storage
        .fail_puts_matching(
            "delta_0.json",
            None,
            StorageError::NetworkError("portal down".to_string()),
        )
        .await;

    let result = harness.publish(0, 0, 1000, first, false).await;
    match result {
        Err(CheckpointError::TransientStorage { attempts, .. }) => assert_eq!(attempts, 3),
        other => panic!("expected TransientStorage, got {:?}", other),
    }
    assert_eq!(harness.storage.put_count(&harness.delta_path(0)).await, 3);
    assert!(!harness.storage.exists(&harness.index_path()).await?);
    Ok(())
}

#[tokio::test]
async fn test_buffered_flow_resumes_after_restart() -> Result<()> {
    let harness = Harness::new().await;
    let publisher = &harness.publisher;
    let storage = harness.storage.as_ref();

    publisher
        .buffer_message(SESSION, CheckpointMessage::new_user("hello".to_string(), 1))
        .await;
    publisher
        .publish_checkpoint(SESSION, Harness::proof_hash(0), 0, 1000, &HOST_KEY, storage)
        .await?;

    // a fresh publisher picks numbering up from storage
    let restarted = CheckpointPublisher::from_private_key(&HOST_KEY)?;
    restarted.init_session(SESSION, storage).await?;
    let state = restarted
        .get_session_state(SESSION)
        .await
        .expect("session state after init");
    assert_eq!(state.checkpoint_index, 1);
    assert_eq!(state.last_checkpoint_tokens, 1000);

    restarted
        .buffer_message(SESSION, CheckpointMessage::new_user("again".to_string(), 2))
        .await;
    restarted
        .publish_checkpoint(SESSION, Harness::proof_hash(1), 1000, 2000, &HOST_KEY, storage)
        .await?;

    let index = harness.stored_index().await;
    assert_eq!(index.checkpoints.len(), 2);
    index.validate_order()?;
    Ok(())
}
