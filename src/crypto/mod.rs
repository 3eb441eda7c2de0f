// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Cryptographic Primitives for Checkpoints
//!
//! - **ECDH**: ephemeral-static key agreement on secp256k1 with HKDF-SHA256
//! - **Encryption**: XChaCha20-Poly1305 AEAD for encrypted deltas
//! - **Signature**: EIP-191 signing and address recovery for host authenticity
//! - **Private Key**: host key loading from the environment
//!
//! ## Security Considerations
//!
//! - Ephemeral keys live for one publish call and are never persisted
//! - Nonces are random and never reused under a key
//! - Private keys and decrypted content are never logged

pub mod ecdh;
pub mod encryption;
pub mod error;
pub mod private_key;
pub mod signature;

pub use ecdh::{
    derive_checkpoint_key, parse_public_key, parse_public_key_hex, public_key_from_private_key,
    EphemeralKeypair, CHECKPOINT_HKDF_INFO,
};
pub use encryption::{decrypt_with_aead, encrypt_with_aead, generate_nonce};
pub use error::CryptoError;
pub use private_key::{extract_host_private_key, parse_private_key_hex};
pub use signature::{
    address_from_private_key, keccak256, recover_signer_address, sign_message, verify_signature,
};
