// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
// XChaCha20-Poly1305 behavior

use fabstir_checkpoint::crypto::{decrypt_with_aead, encrypt_with_aead, generate_nonce};

const KEY: [u8; 32] = [0x42; 32];

#[test]
fn test_encrypt_then_decrypt() {
    let nonce = generate_nonce();
    let plaintext = br#"{"messages":[]}"#;

    let ciphertext = encrypt_with_aead(plaintext, &nonce, b"", &KEY).unwrap();
    assert_eq!(ciphertext.len(), plaintext.len() + 16);

    let decrypted = decrypt_with_aead(&ciphertext, &nonce, b"", &KEY).unwrap();
    assert_eq!(decrypted, plaintext);
}

#[test]
fn test_modified_ciphertext_fails_authentication() {
    let nonce = generate_nonce();
    let mut ciphertext = encrypt_with_aead(b"checkpoint", &nonce, b"", &KEY).unwrap();
    ciphertext[3] ^= 0x80;

    let err = decrypt_with_aead(&ciphertext, &nonce, b"", &KEY).unwrap_err();
    assert!(err.is_authentication_failure());
}

#[test]
fn test_wrong_key_fails() {
    let nonce = generate_nonce();
    let ciphertext = encrypt_with_aead(b"checkpoint", &nonce, b"", &KEY).unwrap();
    assert!(decrypt_with_aead(&ciphertext, &nonce, b"", &[0x43; 32]).is_err());
}

#[test]
fn test_bad_sizes_rejected() {
    assert!(encrypt_with_aead(b"x", &[0u8; 12], b"", &KEY).is_err());
    assert!(encrypt_with_aead(b"x", &generate_nonce(), b"", &[0u8; 16]).is_err());
    assert!(decrypt_with_aead(&[0u8; 8], &generate_nonce(), b"", &KEY).is_err());
}

#[test]
fn test_nonces_are_unique() {
    assert_ne!(generate_nonce(), generate_nonce());
}
