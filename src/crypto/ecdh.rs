// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! ECDH Key Agreement for Checkpoint Encryption
//!
//! Derives the symmetric key that protects an encrypted checkpoint delta.
//! The same function runs on both sides of the exchange:
//!
//! - host: `derive_checkpoint_key(ephemeral_private, user_recovery_public)`
//! - client: `derive_checkpoint_key(user_recovery_private, ephemeral_public)`
//!
//! ## Derivation
//! 1. `shared_point = private * public` on secp256k1
//! 2. `shared_secret = sha256(shared_point.x)`
//! 3. `key = HKDF-SHA256(ikm = shared_secret, salt = None, info = CHECKPOINT_HKDF_INFO)`

use crate::crypto::error::CryptoError;
use hkdf::Hkdf;
use k256::{elliptic_curve::sec1::ToEncodedPoint, PublicKey, SecretKey};
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};

/// HKDF info label for checkpoint encryption (bump the suffix with the protocol version)
pub const CHECKPOINT_HKDF_INFO: &[u8] = b"checkpoint-delta-encryption-v1";

/// Parse a secp256k1 public key (33 bytes compressed or 65 bytes uncompressed)
pub fn parse_public_key(bytes: &[u8], key_type: &str) -> Result<PublicKey, CryptoError> {
    if bytes.len() != 33 && bytes.len() != 65 {
        return Err(CryptoError::invalid_key(
            key_type,
            format!("expected 33 or 65 bytes, got {}", bytes.len()),
        ));
    }

    PublicKey::from_sec1_bytes(bytes)
        .map_err(|_| CryptoError::invalid_key(key_type, "not a valid curve point"))
}

/// Parse a `0x`-prefixed (or bare) hex public key
pub fn parse_public_key_hex(hex_str: &str, key_type: &str) -> Result<PublicKey, CryptoError> {
    let hex_clean = hex_str.strip_prefix("0x").unwrap_or(hex_str);

    if hex_clean.len() != 66 && hex_clean.len() != 130 {
        return Err(CryptoError::invalid_key(
            key_type,
            format!(
                "expected 66 or 130 hex chars, got {}",
                hex_clean.len()
            ),
        ));
    }

    let bytes = hex::decode(hex_clean)
        .map_err(|e| CryptoError::invalid_key(key_type, format!("invalid hex: {}", e)))?;

    parse_public_key(&bytes, key_type)
}

/// Parse a 32-byte secp256k1 private key
pub fn parse_secret_key(bytes: &[u8], key_type: &str) -> Result<SecretKey, CryptoError> {
    if bytes.len() != 32 {
        return Err(CryptoError::invalid_key(
            key_type,
            format!("expected 32 bytes, got {}", bytes.len()),
        ));
    }

    SecretKey::from_slice(bytes)
        .map_err(|_| CryptoError::invalid_key(key_type, "scalar out of range"))
}

/// Compressed public key for a private key, as `0x` hex (68 chars)
pub fn public_key_from_private_key(private_key: &[u8; 32]) -> Result<String, CryptoError> {
    let secret = parse_secret_key(private_key, "private_key")?;
    Ok(compressed_hex(&secret.public_key()))
}

fn compressed_hex(public_key: &PublicKey) -> String {
    format!(
        "0x{}",
        hex::encode(public_key.to_encoded_point(true).as_bytes())
    )
}

/// Derive the 32-byte checkpoint encryption key via ECDH + HKDF-SHA256
///
/// # Arguments
/// * `private_key` - 32-byte secp256k1 private key (ephemeral on the host, recovery key on the client)
/// * `public_key` - counterparty public key (33 bytes compressed or 65 bytes uncompressed)
pub fn derive_checkpoint_key(private_key: &[u8], public_key: &[u8]) -> Result<[u8; 32], CryptoError> {
    let secret = parse_secret_key(private_key, "ecdh_private_key")?;
    let counterparty = parse_public_key(public_key, "ecdh_public_key")?;

    let shared_point =
        k256::ecdh::diffie_hellman(secret.to_nonzero_scalar(), counterparty.as_affine());

    // SDK expects: shared_secret = sha256(shared_point.x)
    let shared_secret = Sha256::digest(shared_point.raw_secret_bytes());

    let hkdf = Hkdf::<Sha256>::new(None, &shared_secret);
    let mut key = [0u8; 32];
    hkdf.expand(CHECKPOINT_HKDF_INFO, &mut key)
        .map_err(|e| CryptoError::KeyDerivationFailed {
            operation: "checkpoint_hkdf".to_string(),
            reason: e.to_string(),
        })?;

    Ok(key)
}

/// One-time keypair for a single checkpoint encryption
///
/// Constructed inside the publish call and dropped at its end. Never cloned,
/// serialized or cached.
pub struct EphemeralKeypair {
    secret: SecretKey,
}

impl EphemeralKeypair {
    pub fn generate() -> Self {
        Self {
            secret: SecretKey::random(&mut OsRng),
        }
    }

    /// Compressed public key as `0x` hex, embedded in the encrypted delta
    pub fn public_key_hex(&self) -> String {
        compressed_hex(&self.secret.public_key())
    }

    /// Derive the checkpoint key against the recipient's stable public key
    pub fn derive_key(&self, recipient_public_key: &[u8]) -> Result<[u8; 32], CryptoError> {
        derive_checkpoint_key(&self.secret.to_bytes(), recipient_public_key)
    }
}
