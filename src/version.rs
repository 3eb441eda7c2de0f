// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
// Version information for the Fabstir checkpoint node

/// Full version string with feature description
pub const VERSION: &str = "v1.2.0-checkpoint-recovery-2025-11-04";

/// Semantic version number
pub const VERSION_NUMBER: &str = "1.2.0";

/// Major version number
pub const VERSION_MAJOR: u32 = 1;

/// Minor version number
pub const VERSION_MINOR: u32 = 2;

/// Patch version number
pub const VERSION_PATCH: u32 = 0;

/// Build date
pub const BUILD_DATE: &str = "2025-11-04";

/// Supported features in this version
pub const FEATURES: &[&str] = &[
    "checkpoint-publishing",
    "checkpoint-discovery",
    "checkpoint-recovery",
    "encrypted-checkpoints",
    "ecdh-key-exchange",
    "xchacha20-poly1305",
    "eip191-signatures",
    "ledger-proof-verification",
    "partial-message-merge",
    "checkpoint-cleanup",
];

/// Canonical JSON encoding version used for signed payloads
pub const CHECKPOINT_ENCODING_VERSION: u32 = 1;

/// Get formatted version string for logging
pub fn get_version_string() -> String {
    format!("Fabstir Checkpoint Node {} ({})", VERSION_NUMBER, BUILD_DATE)
}

/// Get full version info for API responses
pub fn get_version_info() -> serde_json::Value {
    serde_json::json!({
        "version": VERSION_NUMBER,
        "build": VERSION,
        "date": BUILD_DATE,
        "features": FEATURES,
        "checkpointEncoding": CHECKPOINT_ENCODING_VERSION,
    })
}
