// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

//! Encrypted Checkpoint Deltas for Privacy-Preserving Recovery
//!
//! Implements ECDH + XChaCha20-Poly1305 encryption for checkpoint deltas,
//! ensuring only the user can recover their conversation.
//!
//! ## Security Properties
//! - **Confidentiality**: XChaCha20-Poly1305 with ECDH-derived key
//! - **Forward Secrecy**: Ephemeral keypair per checkpoint
//! - **Authenticity**: Poly1305 MAC + host signature over ciphertext
//! - **User-Only Access**: Only user has private key for recoveryPublicKey
//!
//! ## Format
//! ```json
//! {
//!   "encrypted": true,
//!   "version": 1,
//!   "userRecoveryPubKey": "0x02...",
//!   "ephemeralPublicKey": "0x03...",
//!   "nonce": "...",
//!   "ciphertext": "...",
//!   "hostSignature": "0x..."
//! }
//! ```

use crate::checkpoint::codec::{canonical_json_bytes, CANONICAL_ENCODING_VERSION};
use crate::checkpoint::delta::CheckpointDelta;
use crate::checkpoint::error::{CheckpointError, CheckpointResult, VerificationFailure};
use crate::crypto::{
    decrypt_with_aead, derive_checkpoint_key, encrypt_with_aead, generate_nonce, keccak256,
    parse_public_key_hex, sign_message, verify_signature, EphemeralKeypair,
};
use k256::elliptic_curve::sec1::ToEncodedPoint;
use serde::{Deserialize, Serialize};

pub const ENCRYPTED_DELTA_VERSION: u8 = 1;

/// Encrypted checkpoint delta for SDK recovery
///
/// Only the holder of the private key behind `userRecoveryPubKey` can decrypt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedCheckpointDelta {
    /// Always true for encrypted deltas
    pub encrypted: bool,

    pub version: u8,

    /// Recipient key echoed back (compressed, 0x-prefixed, 68 chars)
    pub user_recovery_pub_key: String,

    /// Host's one-time ECDH public key (compressed, 0x-prefixed, 68 chars)
    pub ephemeral_public_key: String,

    /// 24-byte random nonce (hex, 48 chars)
    pub nonce: String,

    /// XChaCha20-Poly1305 output over the canonical signed delta (hex)
    pub ciphertext: String,

    /// EIP-191 signature over hex(keccak256(ciphertext))
    pub host_signature: String,
}

/// Encrypt a signed checkpoint delta for the holder of `recipient_pub_key_hex`
///
/// Each call uses a fresh ephemeral keypair and nonce. Any failure is
/// returned as `CheckpointError::Encryption`; there is no plaintext fallback.
pub fn encrypt_checkpoint_delta(
    delta: &CheckpointDelta,
    recipient_pub_key_hex: &str,
    host_private_key: &[u8; 32],
) -> CheckpointResult<EncryptedCheckpointDelta> {
    let recipient = parse_public_key_hex(recipient_pub_key_hex, "recovery_public_key")
        .map_err(CheckpointError::Encryption)?;
    let recipient_compressed = recipient.to_encoded_point(true);

    let ephemeral = EphemeralKeypair::generate();
    let key = ephemeral
        .derive_key(recipient_compressed.as_bytes())
        .map_err(CheckpointError::Encryption)?;

    let plaintext = canonical_json_bytes(delta)?;
    let nonce = generate_nonce();

    let ciphertext =
        encrypt_with_aead(&plaintext, &nonce, b"", &key).map_err(CheckpointError::Encryption)?;

    let host_signature = sign_message(host_private_key, ciphertext_digest_hex(&ciphertext).as_bytes())
        .map_err(CheckpointError::Encryption)?;

    Ok(EncryptedCheckpointDelta {
        encrypted: true,
        version: ENCRYPTED_DELTA_VERSION,
        user_recovery_pub_key: format!("0x{}", hex::encode(recipient_compressed.as_bytes())),
        ephemeral_public_key: ephemeral.public_key_hex(),
        nonce: hex::encode(nonce),
        ciphertext: hex::encode(&ciphertext),
        host_signature,
    })
}

/// Decrypt with the user's recovery private key
///
/// Structural problems and AEAD authentication failures are both
/// verification failures: the stored object is not what the host published.
pub fn decrypt_checkpoint_delta(
    encrypted: &EncryptedCheckpointDelta,
    user_private_key: &[u8; 32],
) -> CheckpointResult<CheckpointDelta> {
    encrypted
        .validate()
        .map_err(VerificationFailure::Decryption)?;

    let ephemeral = decode_hex_field(&encrypted.ephemeral_public_key, "ephemeralPublicKey")?;
    let nonce = decode_hex_field(&encrypted.nonce, "nonce")?;
    let ciphertext = decode_hex_field(&encrypted.ciphertext, "ciphertext")?;

    let key = derive_checkpoint_key(user_private_key, &ephemeral)
        .map_err(|e| VerificationFailure::Decryption(e.to_string()))?;

    let plaintext = decrypt_with_aead(&ciphertext, &nonce, b"", &key)
        .map_err(|e| VerificationFailure::Decryption(e.to_string()))?;

    serde_json::from_slice(&plaintext).map_err(|e| {
        VerificationFailure::Decryption(format!("plaintext is not a checkpoint delta: {}", e))
            .into()
    })
}

fn decode_hex_field(value: &str, field: &str) -> CheckpointResult<Vec<u8>> {
    hex::decode(value.strip_prefix("0x").unwrap_or(value)).map_err(|e| {
        VerificationFailure::Decryption(format!("{} is not valid hex: {}", field, e)).into()
    })
}

fn ciphertext_digest_hex(ciphertext: &[u8]) -> String {
    hex::encode(keccak256(ciphertext))
}

impl EncryptedCheckpointDelta {
    /// Convert to canonical JSON bytes for upload
    pub fn to_json_bytes(&self) -> serde_json::Result<Vec<u8>> {
        canonical_json_bytes(self)
    }

    /// Check the host signature over hex(keccak256(ciphertext))
    pub fn verify_host_signature(&self, host_address: &str) -> CheckpointResult<()> {
        let ciphertext = hex::decode(&self.ciphertext).map_err(|e| {
            VerificationFailure::CiphertextSignature(format!("ciphertext is not valid hex: {}", e))
        })?;

        verify_signature(
            &self.host_signature,
            ciphertext_digest_hex(&ciphertext).as_bytes(),
            host_address,
        )
        .map_err(|e| VerificationFailure::CiphertextSignature(e.to_string()))?;

        Ok(())
    }

    /// Whether this delta was encrypted for `public_key_hex` (any SEC1 form)
    pub fn is_for_recipient(&self, public_key_hex: &str) -> bool {
        let ours = match parse_public_key_hex(public_key_hex, "recovery_public_key") {
            Ok(key) => key,
            Err(_) => return false,
        };
        match parse_public_key_hex(&self.user_recovery_pub_key, "userRecoveryPubKey") {
            Ok(theirs) => theirs == ours,
            Err(_) => false,
        }
    }

    /// Validate the structure has expected field lengths
    pub fn validate(&self) -> Result<(), String> {
        if !self.encrypted {
            return Err("encrypted field must be true".to_string());
        }

        if self.version != ENCRYPTED_DELTA_VERSION {
            return Err(format!(
                "unsupported version: {} (canonical encoding v{})",
                self.version, CANONICAL_ENCODING_VERSION
            ));
        }

        for (name, value) in [
            ("userRecoveryPubKey", &self.user_recovery_pub_key),
            ("ephemeralPublicKey", &self.ephemeral_public_key),
        ] {
            if !value.starts_with("0x") {
                return Err(format!("{} must start with 0x", name));
            }
            if value.len() != 68 {
                return Err(format!(
                    "{} invalid length: {} (expected 68)",
                    name,
                    value.len()
                ));
            }
        }

        if self.nonce.len() != 48 {
            return Err(format!(
                "nonce invalid length: {} (expected 48)",
                self.nonce.len()
            ));
        }

        if self.ciphertext.is_empty() {
            return Err("ciphertext cannot be empty".to_string());
        }

        if !self.host_signature.starts_with("0x") || self.host_signature.len() != 132 {
            return Err(format!(
                "hostSignature invalid: {} chars (expected 0x + 130)",
                self.host_signature.len()
            ));
        }

        Ok(())
    }
}
