// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! EIP-191 Signing and Address Recovery
//!
//! Host signatures on checkpoint data use Ethereum `personal_sign` so any
//! wallet library can verify them against the host's on-chain address.
//!
//! ## Signature Format
//! - 65 bytes: r (32) + s (32) + v (1)
//! - Hex string with 0x prefix: `0x` + 130 hex characters
//! - v is 27 or 28

use crate::crypto::ecdh::parse_secret_key;
use crate::crypto::error::CryptoError;
use k256::ecdsa::{RecoveryId, Signature, SigningKey, VerifyingKey};
use tiny_keccak::{Hasher, Keccak};

pub const SIGNATURE_SIZE: usize = 65;

/// Keccak-256 digest
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak::v256();
    hasher.update(data);
    let mut hash = [0u8; 32];
    hasher.finalize(&mut hash);
    hash
}

/// EIP-191 message hash
/// prefix = "\x19Ethereum Signed Message:\n" + len(message)
pub fn eip191_hash(message: &[u8]) -> [u8; 32] {
    let prefix = format!("\x19Ethereum Signed Message:\n{}", message.len());

    let mut hasher = Keccak::v256();
    hasher.update(prefix.as_bytes());
    hasher.update(message);

    let mut hash = [0u8; 32];
    hasher.finalize(&mut hash);
    hash
}

/// Sign data using EIP-191 personal_sign
///
/// # Arguments
/// * `private_key` - 32-byte host private key
/// * `data` - bytes to sign (canonical messages encoding, checkpoints array, ...)
///
/// # Returns
/// 65-byte signature (r + s + v) as hex string with 0x prefix
pub fn sign_message(private_key: &[u8; 32], data: &[u8]) -> Result<String, CryptoError> {
    let message_hash = eip191_hash(data);

    let signing_key = SigningKey::from_slice(private_key)
        .map_err(|e| CryptoError::invalid_key("signing_key", e.to_string()))?;

    // RFC6979 deterministic nonce
    let (signature, recovery_id) = signing_key
        .sign_prehash_recoverable(&message_hash)
        .map_err(|e| CryptoError::invalid_signature("eip191_sign", e.to_string()))?;

    let mut sig_bytes = [0u8; SIGNATURE_SIZE];
    sig_bytes[..64].copy_from_slice(&signature.to_bytes());
    sig_bytes[64] = recovery_id.to_byte() + 27;

    Ok(format!("0x{}", hex::encode(sig_bytes)))
}

/// Recover the lowercase `0x` address that produced an EIP-191 signature over `data`
pub fn recover_signer_address(signature: &str, data: &[u8]) -> Result<String, CryptoError> {
    let sig_bytes = hex::decode(signature.strip_prefix("0x").unwrap_or(signature))
        .map_err(|e| CryptoError::invalid_signature("recover", format!("invalid hex: {}", e)))?;

    if sig_bytes.len() != SIGNATURE_SIZE {
        return Err(CryptoError::invalid_signature(
            "recover",
            format!(
                "expected {} bytes, got {}",
                SIGNATURE_SIZE,
                sig_bytes.len()
            ),
        ));
    }

    let recovery_id = match sig_bytes[64] {
        27 | 0 => RecoveryId::from_byte(0),
        28 | 1 => RecoveryId::from_byte(1),
        _ => None,
    }
    .ok_or_else(|| {
        CryptoError::invalid_signature("recover", format!("invalid v value: {}", sig_bytes[64]))
    })?;

    let signature = Signature::from_slice(&sig_bytes[..64])
        .map_err(|e| CryptoError::invalid_signature("recover", e.to_string()))?;

    let message_hash = eip191_hash(data);

    let verifying_key = VerifyingKey::recover_from_prehash(&message_hash, &signature, recovery_id)
        .map_err(|e| CryptoError::invalid_signature("recover", e.to_string()))?;

    Ok(address_from_verifying_key(&verifying_key))
}

/// Verify that `signature` over `data` was produced by `expected_address`
///
/// Address comparison is case-insensitive (checksummed or lowercase input).
pub fn verify_signature(
    signature: &str,
    data: &[u8],
    expected_address: &str,
) -> Result<(), CryptoError> {
    let recovered = recover_signer_address(signature, data)?;

    if !recovered.eq_ignore_ascii_case(expected_address) {
        return Err(CryptoError::invalid_signature(
            "verify",
            format!(
                "signer {} does not match expected {}",
                recovered,
                expected_address.to_lowercase()
            ),
        ));
    }

    Ok(())
}

/// Lowercase `0x` Ethereum address for a private key
pub fn address_from_private_key(private_key: &[u8; 32]) -> Result<String, CryptoError> {
    let secret = parse_secret_key(private_key, "private_key")?;
    let verifying_key = VerifyingKey::from(secret.public_key());
    Ok(address_from_verifying_key(&verifying_key))
}

// last 20 bytes of keccak256(uncompressed pubkey without the 0x04 tag)
fn address_from_verifying_key(key: &VerifyingKey) -> String {
    let encoded = key.to_encoded_point(false);
    let hash = keccak256(&encoded.as_bytes()[1..]);
    format!("0x{}", hex::encode(&hash[12..]))
}
