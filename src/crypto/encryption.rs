// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! XChaCha20-Poly1305 Encryption/Decryption
//!
//! Authenticated encryption for checkpoint deltas. The Poly1305 tag is
//! appended to the ciphertext, so any modification of the stored bytes
//! fails decryption.

use crate::crypto::error::CryptoError;
use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    XChaCha20Poly1305, XNonce,
};
use rand::{rngs::OsRng, RngCore};

pub const NONCE_SIZE: usize = 24;
pub const KEY_SIZE: usize = 32;
pub const TAG_SIZE: usize = 16;

/// Fresh 24-byte nonce from the OS RNG
pub fn generate_nonce() -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce);
    nonce
}

fn validate_sizes(nonce: &[u8], key: &[u8]) -> Result<(), CryptoError> {
    if nonce.len() != NONCE_SIZE {
        return Err(CryptoError::InvalidNonce {
            expected_size: NONCE_SIZE,
            actual_size: nonce.len(),
        });
    }

    if key.len() != KEY_SIZE {
        return Err(CryptoError::invalid_key(
            "symmetric_key",
            format!("expected {} bytes, got {}", KEY_SIZE, key.len()),
        ));
    }

    Ok(())
}

/// Decrypt data using XChaCha20-Poly1305 AEAD
///
/// # Arguments
///
/// * `ciphertext` - Encrypted data (includes authentication tag)
/// * `nonce` - 24-byte nonce used for encryption
/// * `aad` - Additional authenticated data (can be empty)
/// * `key` - 32-byte encryption key
///
/// # Errors
///
/// - `InvalidNonce` / `InvalidKey` on size mismatch
/// - `DecryptionFailed` if the authentication tag does not verify
pub fn decrypt_with_aead(
    ciphertext: &[u8],
    nonce: &[u8],
    aad: &[u8],
    key: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    validate_sizes(nonce, key)?;

    if ciphertext.len() < TAG_SIZE {
        return Err(CryptoError::DecryptionFailed {
            operation: "xchacha20poly1305_decrypt".to_string(),
            reason: format!(
                "ciphertext shorter than {}-byte authentication tag",
                TAG_SIZE
            ),
        });
    }

    let cipher = XChaCha20Poly1305::new_from_slice(key)
        .map_err(|e| CryptoError::invalid_key("symmetric_key", e.to_string()))?;

    let payload = Payload {
        msg: ciphertext,
        aad,
    };

    cipher
        .decrypt(XNonce::from_slice(nonce), payload)
        .map_err(|_| CryptoError::DecryptionFailed {
            operation: "xchacha20poly1305_decrypt".to_string(),
            reason: "authentication tag verification failed".to_string(),
        })
}

/// Encrypt data using XChaCha20-Poly1305 AEAD
///
/// Returns the ciphertext with the 16-byte tag appended.
pub fn encrypt_with_aead(
    plaintext: &[u8],
    nonce: &[u8],
    aad: &[u8],
    key: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    validate_sizes(nonce, key)?;

    let cipher = XChaCha20Poly1305::new_from_slice(key)
        .map_err(|e| CryptoError::invalid_key("symmetric_key", e.to_string()))?;

    let payload = Payload {
        msg: plaintext,
        aad,
    };

    cipher
        .encrypt(XNonce::from_slice(nonce), payload)
        .map_err(|e| CryptoError::EncryptionFailed {
            operation: "xchacha20poly1305_encrypt".to_string(),
            reason: e.to_string(),
        })
}
