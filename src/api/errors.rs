// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
use crate::checkpoint::CheckpointError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// JSON error body: `{"error": "...", "message": "..."}`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

#[derive(Debug, Clone)]
pub enum ApiError {
    NotFound(String),
    InvalidRequest(String),
    StorageError(String),
    ServiceUnavailable(String),
    InternalError(String),
}

impl ApiError {
    pub fn to_response(&self, request_id: Option<String>) -> ErrorResponse {
        let (error, message) = match self {
            ApiError::NotFound(msg) => ("not_found", msg.clone()),
            ApiError::InvalidRequest(msg) => ("invalid_request", msg.clone()),
            ApiError::StorageError(msg) => ("storage_error", msg.clone()),
            ApiError::ServiceUnavailable(msg) => ("service_unavailable", msg.clone()),
            ApiError::InternalError(msg) => ("internal_error", msg.clone()),
        };

        ErrorResponse {
            error: error.to_string(),
            message,
            request_id,
        }
    }

    pub fn status_code(&self) -> u16 {
        match self {
            ApiError::NotFound(_) => 404,
            ApiError::InvalidRequest(_) => 400,
            ApiError::StorageError(_) | ApiError::InternalError(_) => 500,
            ApiError::ServiceUnavailable(_) => 503,
        }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiError::NotFound(msg) => write!(f, "Not found: {}", msg),
            ApiError::InvalidRequest(msg) => write!(f, "Invalid request: {}", msg),
            ApiError::StorageError(msg) => write!(f, "Storage error: {}", msg),
            ApiError::ServiceUnavailable(msg) => write!(f, "Service unavailable: {}", msg),
            ApiError::InternalError(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for ApiError {}

impl From<CheckpointError> for ApiError {
    fn from(err: CheckpointError) -> Self {
        match err {
            CheckpointError::NotFound(msg) => ApiError::NotFound(msg),
            CheckpointError::InvalidCheckpoint(msg) => ApiError::InvalidRequest(msg),
            CheckpointError::Storage(e) => ApiError::StorageError(e.to_string()),
            CheckpointError::TransientStorage { source, .. } => {
                ApiError::StorageError(source.to_string())
            }
            CheckpointError::Codec(e) => {
                ApiError::StorageError(format!("stored checkpoint index is malformed: {}", e))
            }
            other => ApiError::InternalError(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self.to_response(None))).into_response()
    }
}
