// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
// Publish then recover, plaintext and encrypted

use super::common::{scenario_messages, Harness, HOST_KEY, SESSION, USER_KEY};
use anyhow::Result;
use fabstir_checkpoint::checkpoint::{
    encrypt_checkpoint_delta, CheckpointDelta, CheckpointError, CheckpointMessage, MessageRole,
    RecoveryConfig, StoredDelta, VerificationFailure,
};
use fabstir_checkpoint::storage::S5Storage;

#[tokio::test]
async fn test_plaintext_publish_and_recover() -> Result<()> {
    let harness = Harness::new().await;
    let (first, second) = scenario_messages();

    harness.publish(0, 0, 1000, first, false).await?;
    harness.publish(1, 1000, 2000, second, false).await?;

    let recovered = harness
        .engine()
        .recover_from(&harness.discovery(), SESSION, None)
        .await?;

    assert_eq!(recovered.session_id, SESSION);
    assert_eq!(recovered.checkpoint_count, 2);
    assert_eq!(recovered.total_tokens, 2000);
    assert_eq!(recovered.messages.len(), 3);
    assert_eq!(recovered.messages[0].role, MessageRole::User);
    assert_eq!(recovered.messages[0].content, "Explain quantum computing");
    assert_eq!(recovered.messages[1].role, MessageRole::Assistant);
    assert_eq!(
        recovered.messages[2].content,
        "How is that different from a classical bit?"
    );
    Ok(())
}

#[tokio::test]
async fn test_encrypted_publish_and_recover() -> Result<()> {
    let harness = Harness::new().await;
    let (first, second) = scenario_messages();

    harness.publish(0, 0, 1000, first.clone(), true).await?;
    harness.publish(1, 1000, 2000, second.clone(), true).await?;

    let index = harness.stored_index().await;
    assert!(index.checkpoints.iter().all(|entry| entry.encrypted));

    // nothing readable at rest
    let stored = harness.storage.get(&harness.delta_path(0)).await?;
    let stored_text = String::from_utf8(stored.clone())?;
    assert!(!stored_text.contains("quantum"));
    assert!(StoredDelta::from_json_bytes(&stored)?.is_encrypted());

    let recovered = harness
        .engine()
        .recover_from(&harness.discovery(), SESSION, Some(&USER_KEY))
        .await?;

    let mut expected = first;
    expected.extend(second);
    assert_eq!(recovered.messages, expected);
    Ok(())
}

#[tokio::test]
async fn test_encrypted_recovery_requires_key() -> Result<()> {
    let harness = Harness::new().await;
    let (first, _) = scenario_messages();
    harness.publish(0, 0, 1000, first, true).await?;

    let result = harness
        .engine()
        .recover_from(&harness.discovery(), SESSION, None)
        .await;
    assert!(matches!(result, Err(CheckpointError::RecoveryKeyRequired(0))));
    Ok(())
}

#[tokio::test]
async fn test_encrypted_recovery_with_wrong_key_fails() -> Result<()> {
    let harness = Harness::new().await;
    let (first, _) = scenario_messages();
    harness.publish(0, 0, 1000, first, true).await?;

    let other_key = [0x33u8; 32];
    let result = harness
        .engine()
        .recover_from(&harness.discovery(), SESSION, Some(&other_key))
        .await;
    match result {
        Err(CheckpointError::Verification(VerificationFailure::RecipientMismatch { index })) => {
            assert_eq!(index, 0)
        }
        other => panic!("expected RecipientMismatch, got {:?}", other),
    }
    Ok(())
}

#[tokio::test]
async fn test_missing_checkpoints_recover_empty() -> Result<()> {
    let harness = Harness::new().await;

    let recovered = harness
        .engine()
        .recover_from(&harness.discovery(), SESSION, Some(&USER_KEY))
        .await?;

    assert!(recovered.is_empty());
    assert_eq!(recovered.checkpoint_count, 0);
    assert_eq!(recovered.total_tokens, 0);
    Ok(())
}

#[tokio::test]
async fn test_partial_message_continues_into_next_checkpoint() -> Result<()> {
    let harness = Harness::new().await;

    harness
        .publish(
            0,
            0,
            1000,
            vec![
                CheckpointMessage::new_user("Tell me a story".to_string(), 1),
                CheckpointMessage::new_assistant("Once upon a time,".to_string(), 2, true),
            ],
            false,
        )
        .await?;
    harness
        .publish(
            1,
            1000,
            1500,
            vec![
                CheckpointMessage::new_assistant(" there was a node.".to_string(), 3, false),
                CheckpointMessage::new_user("And then?".to_string(), 4),
            ],
            false,
        )
        .await?;

    let recovered = harness
        .engine()
        .recover_from(&harness.discovery(), SESSION, None)
        .await?;

    assert_eq!(recovered.messages.len(), 3);
    assert_eq!(
        recovered.messages[1].content,
        "Once upon a time, there was a node."
    );
    assert!(!recovered.messages[1].is_partial());
    assert_eq!(recovered.messages[2].content, "And then?");
    Ok(())
}

#[tokio::test]
async fn test_partial_joins_same_role_message_after_user_interjection() -> Result<()> {
    let harness = Harness::new().await;

    harness
        .publish(
            0,
            0,
            1000,
            vec![
                CheckpointMessage::new_user("q".to_string(), 1),
                CheckpointMessage::new_assistant("Once upon ".to_string(), 2, true),
            ],
            true,
        )
        .await?;
    harness
        .publish(
            1,
            1000,
            1400,
            vec![
                CheckpointMessage::new_user("interjection".to_string(), 3),
                CheckpointMessage::new_assistant("a time".to_string(), 4, false),
            ],
            true,
        )
        .await?;

    let recovered = harness
        .engine()
        .recover_from(&harness.discovery(), SESSION, Some(&USER_KEY))
        .await?;

    let contents: Vec<_> = recovered.messages.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(contents, vec!["q", "Once upon a time", "interjection"]);
    assert_eq!(recovered.messages[1].role, MessageRole::Assistant);
    assert!(!recovered.messages[1].is_partial());
    Ok(())
}

#[tokio::test]
async fn test_streaming_response_published_as_partial_then_completed() -> Result<()> {
    let harness = Harness::new().await;
    let publisher = &harness.publisher;
    let storage = harness.storage.as_ref();

    publisher
        .buffer_message(SESSION, CheckpointMessage::new_user("Count to three".to_string(), 1))
        .await;
    publisher.update_streaming_response(SESSION, "One, ").await;
    publisher
        .publish_checkpoint(SESSION, Harness::proof_hash(0), 0, 1000, &HOST_KEY, storage)
        .await?;
    harness.ledger.record_proof(SESSION, 0, Harness::proof_hash(0)).await;

    publisher.update_streaming_response(SESSION, "two, three.").await;
    publisher.complete_streaming_response(SESSION, 2).await;
    publisher
        .publish_checkpoint(SESSION, Harness::proof_hash(1), 1000, 1200, &HOST_KEY, storage)
        .await?;
    harness.ledger.record_proof(SESSION, 1, Harness::proof_hash(1)).await;

    let recovered = harness
        .engine()
        .recover_from(&harness.discovery(), SESSION, None)
        .await?;

    assert_eq!(recovered.messages.len(), 2);
    assert_eq!(recovered.messages[1].content, "One, two, three.");
    assert!(!recovered.messages[1].is_partial());
    Ok(())
}

#[tokio::test]
async fn test_encryptions_of_same_delta_differ() -> Result<()> {
    let (first, _) = scenario_messages();
    let mut delta = CheckpointDelta::new(SESSION, 0, &Harness::proof_hash(0), 0, 1000, first);
    delta.sign(&HOST_KEY)?;

    let recipient = Harness::user_public_key();
    let a = encrypt_checkpoint_delta(&delta, &recipient, &HOST_KEY)?;
    let b = encrypt_checkpoint_delta(&delta, &recipient, &HOST_KEY)?;

    assert_ne!(a.ephemeral_public_key, b.ephemeral_public_key);
    assert_ne!(a.nonce, b.nonce);
    assert_ne!(a.ciphertext, b.ciphertext);
    Ok(())
}

#[tokio::test]
async fn test_recovery_pinned_to_wrong_host_fails() -> Result<()> {
    let harness = Harness::new().await;
    let (first, _) = scenario_messages();
    harness.publish(0, 0, 1000, first, false).await?;

    let engine = harness.engine().with_config(RecoveryConfig {
        expected_host: Some("0x000000000000000000000000000000000000dead".to_string()),
        ..RecoveryConfig::default()
    });
    let result = engine
        .recover_from(&harness.discovery(), SESSION, None)
        .await;

    assert!(matches!(
        result,
        Err(CheckpointError::Verification(VerificationFailure::HostMismatch { .. }))
    ));
    Ok(())
}
