// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
use axum::{extract::State, response::IntoResponse, routing::get, Json, Router};
use serde::{Deserialize, Serialize};
use std::{future::Future, net::SocketAddr, sync::Arc};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::checkpoints::get_checkpoints_handler;
use crate::checkpoint::CheckpointDiscovery;
use crate::version;

pub struct AppState {
    pub discovery: CheckpointDiscovery,
}

impl AppState {
    pub fn new(discovery: CheckpointDiscovery) -> Self {
        Self { discovery }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    #[serde(rename = "hostAddress")]
    pub host_address: String,
}

pub fn create_app(state: Arc<AppState>) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health_handler))
        .route("/version", get(version_handler))
        // Checkpoint discovery for SDK recovery
        .route("/checkpoints/:session_id", get(get_checkpoints_handler))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve until `shutdown` resolves
pub async fn start_server<F>(
    state: Arc<AppState>,
    addr: SocketAddr,
    shutdown: F,
) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = create_app(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    tracing::info!("API server listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}

async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: version::VERSION_NUMBER.to_string(),
        host_address: state.discovery.host_address().to_string(),
    })
}

async fn version_handler() -> impl IntoResponse {
    Json(version::get_version_info())
}
