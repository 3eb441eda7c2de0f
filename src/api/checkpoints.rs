// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

//! GET /checkpoints/{sessionId} handler
//!
//! Returns the host's signed checkpoint index for a session so the SDK can
//! recover the conversation. No auth: the index only carries hashes, CIDs
//! and signatures, and the deltas it points to are signed (and optionally
//! encrypted) by the host.
//!
//! # Response Body
//! ```json
//! {
//!   "checkpoints": [
//!     {
//!       "deltaCid": "baaa...",
//!       "index": 0,
//!       "messagesHash": "0x...",
//!       "proofHash": "0x...",
//!       "timestamp": 1704844800000,
//!       "tokenRange": [0, 1000]
//!     }
//!   ],
//!   "hostAddress": "0x...",
//!   "hostSignature": "0x...",
//!   "messagesSignature": "0x...",
//!   "sessionId": "123"
//! }
//! ```

use crate::api::errors::ApiError;
use crate::api::http_server::AppState;
use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use tracing::{debug, warn};

pub async fn get_checkpoints_handler(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<Response, ApiError> {
    debug!("[DISCOVERY] GET /checkpoints/{}", session_id);

    let index = state
        .discovery
        .get_checkpoints(&session_id)
        .await
        .map_err(|e| {
            warn!("[DISCOVERY] Lookup failed for session {}: {}", session_id, e);
            ApiError::from(e)
        })?
        .ok_or_else(|| {
            ApiError::NotFound(format!("No checkpoints found for session {}", session_id))
        })?;

    // re-encode so the body is canonical even if storage reformatted it
    let body = index
        .to_json_bytes()
        .map_err(|e| ApiError::InternalError(format!("Failed to encode index: {}", e)))?;

    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/json")],
        body,
    )
        .into_response())
}
