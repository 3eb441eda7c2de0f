// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Crypto Error Types
//!
//! Error variants for the primitive layer. Every variant carries enough
//! context to tell which operation failed without exposing key material.
//!
//! ## Usage Example
//!
//! ```rust
//! use fabstir_checkpoint::crypto::CryptoError;
//!
//! fn decrypt(ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
//!     Err(CryptoError::DecryptionFailed {
//!         operation: "checkpoint_delta".to_string(),
//!         reason: "authentication tag verification failed".to_string(),
//!     })
//! }
//! ```

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    /// Key has the wrong size, is not a curve point, or is malformed hex
    #[error("Invalid {key_type}: {reason}")]
    InvalidKey { key_type: String, reason: String },

    /// Signature is malformed, unrecoverable, or recovers to the wrong signer
    #[error("Invalid signature during {operation}: {reason}")]
    InvalidSignature { operation: String, reason: String },

    /// XChaCha20 requires exactly 24-byte nonces
    #[error("Invalid nonce size: expected {expected_size} bytes, got {actual_size}")]
    InvalidNonce {
        expected_size: usize,
        actual_size: usize,
    },

    /// ECDH or HKDF failed
    #[error("Key derivation failed during {operation}: {reason}")]
    KeyDerivationFailed { operation: String, reason: String },

    #[error("Encryption failed during {operation}: {reason}")]
    EncryptionFailed { operation: String, reason: String },

    /// AEAD authentication failed (wrong key, tampered ciphertext, AAD mismatch)
    #[error("Decryption failed during {operation}: {reason}")]
    DecryptionFailed { operation: String, reason: String },
}

impl CryptoError {
    pub fn invalid_key(key_type: &str, reason: impl Into<String>) -> Self {
        CryptoError::InvalidKey {
            key_type: key_type.to_string(),
            reason: reason.into(),
        }
    }

    pub fn invalid_signature(operation: &str, reason: impl Into<String>) -> Self {
        CryptoError::InvalidSignature {
            operation: operation.to_string(),
            reason: reason.into(),
        }
    }

    /// Whether the failure means the data is not authentic
    /// (as opposed to a caller supplying a malformed key)
    pub fn is_authentication_failure(&self) -> bool {
        matches!(
            self,
            CryptoError::InvalidSignature { .. } | CryptoError::DecryptionFailed { .. }
        )
    }
}
