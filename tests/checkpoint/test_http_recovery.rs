// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
// Recovery through a live discovery endpoint on loopback

use super::common::{scenario_messages, Harness, SESSION, USER_KEY};
use anyhow::Result;
use fabstir_checkpoint::api::{create_app, AppState};
use fabstir_checkpoint::checkpoint::{CheckpointError, CheckpointSource, HttpDiscoveryClient};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

async fn serve(harness: &Harness) -> Result<SocketAddr> {
    let state = Arc::new(AppState::new(harness.discovery()));
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;

    tokio::spawn(async move {
        let _ = axum::serve(listener, create_app(state)).await;
    });

    Ok(addr)
}

#[tokio::test]
async fn test_recover_over_http_discovery() -> Result<()> {
    let harness = Harness::new().await;
    let (first, second) = scenario_messages();
    harness.publish(0, 0, 1000, first, true).await?;
    harness.publish(1, 1000, 2000, second, true).await?;

    let addr = serve(&harness).await?;

    let recovered = harness
        .engine()
        .recover(SESSION, &format!("http://{}", addr), Some(&USER_KEY))
        .await?;

    assert_eq!(recovered.checkpoint_count, 2);
    assert_eq!(recovered.messages.len(), 3);
    assert_eq!(recovered.messages[0].content, "Explain quantum computing");
    Ok(())
}

#[tokio::test]
async fn test_http_discovery_missing_session_is_empty() -> Result<()> {
    let harness = Harness::new().await;
    let addr = serve(&harness).await?;

    let client = HttpDiscoveryClient::new(
        &format!("http://{}/", addr),
        harness.storage.clone(),
        Duration::from_secs(5),
    )?;
    assert_eq!(
        client.index_url(SESSION),
        format!("http://{}/checkpoints/{}", addr, SESSION)
    );
    assert!(client.fetch_index(SESSION).await?.is_none());

    let recovered = harness
        .engine()
        .recover(SESSION, &format!("http://{}", addr), None)
        .await?;
    assert!(recovered.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_http_discovery_returns_signed_index() -> Result<()> {
    let harness = Harness::new().await;
    let (first, _) = scenario_messages();
    harness.publish(0, 0, 1000, first, false).await?;
    let addr = serve(&harness).await?;

    let client = HttpDiscoveryClient::new(
        &format!("http://{}", addr),
        harness.storage.clone(),
        Duration::from_secs(5),
    )?;
    let index = client
        .fetch_index(SESSION)
        .await?
        .expect("published index");

    assert_eq!(index, harness.stored_index().await);
    index.verify_signatures(harness.publisher.host_address())?;
    Ok(())
}

#[tokio::test]
async fn test_http_discovery_bare_404_is_an_error() -> Result<()> {
    let harness = Harness::new().await;
    let (first, _) = scenario_messages();
    harness.publish(0, 0, 1000, first, false).await?;
    let addr = serve(&harness).await?;

    // wrong base path: the router's own 404 carries no not_found body
    let client = HttpDiscoveryClient::new(
        &format!("http://{}/v1", addr),
        harness.storage.clone(),
        Duration::from_secs(5),
    )?;
    let err = client.fetch_index(SESSION).await.unwrap_err();
    assert!(matches!(err, CheckpointError::Discovery(_)), "got {:?}", err);

    let err = harness
        .engine()
        .recover(SESSION, &format!("http://{}/v1", addr), None)
        .await
        .unwrap_err();
    assert!(matches!(err, CheckpointError::Discovery(_)), "got {:?}", err);
    Ok(())
}
