// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Host Private Key Loading
//!
//! The host signs every delta and index with the key from `HOST_PRIVATE_KEY`.
//!
//! ## Security Considerations
//!
//! - Must be a 32-byte hex string with "0x" prefix
//! - Key is NEVER logged or persisted
//! - The scalar is range-checked before use
//!
//! ## Usage
//!
//! ```no_run
//! use fabstir_checkpoint::crypto::extract_host_private_key;
//!
//! match extract_host_private_key() {
//!     Ok(_key) => println!("✅ Host key loaded"),
//!     Err(e) => eprintln!("❌ Failed to load host key: {}", e),
//! }
//! ```

use crate::crypto::ecdh::parse_secret_key;
use crate::crypto::error::CryptoError;
use std::env;
use tracing::info;

pub const HOST_PRIVATE_KEY_ENV: &str = "HOST_PRIVATE_KEY";

/// Parse a `0x` + 64 hex private key
pub fn parse_private_key_hex(key_str: &str) -> Result<[u8; 32], CryptoError> {
    let key_str = key_str.trim();

    if key_str.is_empty() {
        return Err(CryptoError::invalid_key("private_key", "key is empty"));
    }

    let hex_str = key_str.strip_prefix("0x").ok_or_else(|| {
        CryptoError::invalid_key("private_key", "must start with '0x' prefix (Ethereum format)")
    })?;

    if hex_str.len() != 64 {
        return Err(CryptoError::invalid_key(
            "private_key",
            format!(
                "must be exactly 64 hex characters (32 bytes), got {} characters",
                hex_str.len()
            ),
        ));
    }

    let key_bytes = hex::decode(hex_str).map_err(|e| {
        CryptoError::invalid_key("private_key", format!("contains invalid hex characters: {}", e))
    })?;

    let mut key_array = [0u8; 32];
    key_array.copy_from_slice(&key_bytes);

    // zero or >= curve order
    parse_secret_key(&key_array, "private_key")?;

    Ok(key_array)
}

/// Read and parse a private key from the named environment variable
pub fn extract_private_key_from_env(var: &str) -> Result<[u8; 32], CryptoError> {
    let key_str = env::var(var)
        .map_err(|_| CryptoError::invalid_key("private_key", format!("{} not set", var)))?;

    let key = parse_private_key_hex(&key_str)?;

    info!("✅ Private key loaded from {} (32 bytes)", var);

    Ok(key)
}

/// Host signing key from `HOST_PRIVATE_KEY`
pub fn extract_host_private_key() -> Result<[u8; 32], CryptoError> {
    extract_private_key_from_env(HOST_PRIVATE_KEY_ENV)
}
