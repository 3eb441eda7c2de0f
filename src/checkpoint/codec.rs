// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

//! Canonical JSON encoding shared by signer and verifier
//!
//! Signatures cover bytes, so host and client must produce identical bytes
//! for the same value: object keys sorted lexicographically at every depth,
//! compact separators, UTF-8. Any change here is a protocol change and must
//! bump `CANONICAL_ENCODING_VERSION`.

use crate::checkpoint::delta::{CheckpointDelta, CheckpointMessage};
use crate::checkpoint::encryption::EncryptedCheckpointDelta;
use serde::Serialize;
use serde_json::Value;

pub const CANONICAL_ENCODING_VERSION: u8 = 1;

/// Recursively sort JSON object keys alphabetically
pub fn sort_json_keys(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut sorted = serde_json::Map::new();
            let mut keys: Vec<_> = map.keys().collect();
            keys.sort();
            for key in keys {
                sorted.insert(key.clone(), sort_json_keys(&map[key]));
            }
            Value::Object(sorted)
        }
        Value::Array(arr) => Value::Array(arr.iter().map(sort_json_keys).collect()),
        _ => value.clone(),
    }
}

/// Canonical (sorted, compact) JSON string of any serializable value
pub fn canonical_json<T: Serialize + ?Sized>(value: &T) -> serde_json::Result<String> {
    let value = serde_json::to_value(value)?;
    serde_json::to_string(&sort_json_keys(&value))
}

/// Canonical JSON bytes, used for every object written to storage
pub fn canonical_json_bytes<T: Serialize + ?Sized>(value: &T) -> serde_json::Result<Vec<u8>> {
    let value = serde_json::to_value(value)?;
    serde_json::to_vec(&sort_json_keys(&value))
}

/// Encoding of a message list; this is what message signatures cover
pub fn encode_messages(messages: &[CheckpointMessage]) -> serde_json::Result<String> {
    canonical_json(messages)
}

pub fn decode_messages(bytes: &[u8]) -> serde_json::Result<Vec<CheckpointMessage>> {
    serde_json::from_slice(bytes)
}

/// A delta object as found in storage
#[derive(Debug, Clone)]
pub enum StoredDelta {
    Plaintext(CheckpointDelta),
    Encrypted(EncryptedCheckpointDelta),
}

impl StoredDelta {
    /// Decode a stored delta, dispatching on the `encrypted` field
    /// (absent or `false` means plaintext)
    pub fn from_json_bytes(bytes: &[u8]) -> serde_json::Result<Self> {
        let value: Value = serde_json::from_slice(bytes)?;

        let encrypted = value
            .get("encrypted")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        if encrypted {
            Ok(StoredDelta::Encrypted(serde_json::from_value(value)?))
        } else {
            Ok(StoredDelta::Plaintext(serde_json::from_value(value)?))
        }
    }

    pub fn is_encrypted(&self) -> bool {
        matches!(self, StoredDelta::Encrypted(_))
    }
}
