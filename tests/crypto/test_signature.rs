// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
// EIP-191 signing and recovery

use fabstir_checkpoint::crypto::{
    address_from_private_key, keccak256, parse_private_key_hex, recover_signer_address,
    sign_message, verify_signature,
};

// well-known test key from the web3 account docs
const KNOWN_KEY: &str = "0x4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";
const KNOWN_ADDRESS: &str = "0x2c7536e3605d9c16a7a3d7b1898e529396a65c23";

#[test]
fn test_known_key_address() {
    let key = parse_private_key_hex(KNOWN_KEY).unwrap();
    assert_eq!(address_from_private_key(&key).unwrap(), KNOWN_ADDRESS);
}

#[test]
fn test_sign_and_recover() {
    let key = parse_private_key_hex(KNOWN_KEY).unwrap();
    let data = br#"[{"content":"hi","role":"user","timestamp":1}]"#;

    let signature = sign_message(&key, data).unwrap();
    assert_eq!(signature.len(), 2 + 65 * 2);

    let v = u8::from_str_radix(&signature[signature.len() - 2..], 16).unwrap();
    assert!(v == 27 || v == 28);

    assert_eq!(recover_signer_address(&signature, data).unwrap(), KNOWN_ADDRESS);
    verify_signature(&signature, data, &KNOWN_ADDRESS.to_uppercase().replace("0X", "0x")).unwrap();
}

#[test]
fn test_signatures_are_deterministic() {
    let key = parse_private_key_hex(KNOWN_KEY).unwrap();
    assert_eq!(
        sign_message(&key, b"same").unwrap(),
        sign_message(&key, b"same").unwrap()
    );
}

#[test]
fn test_signature_over_other_data_fails() {
    let key = parse_private_key_hex(KNOWN_KEY).unwrap();
    let signature = sign_message(&key, b"original").unwrap();
    assert!(verify_signature(&signature, b"altered", KNOWN_ADDRESS).is_err());
}

#[test]
fn test_wrong_signer_rejected() {
    let signature = sign_message(&[0x11; 32], b"data").unwrap();
    assert!(verify_signature(&signature, b"data", KNOWN_ADDRESS).is_err());
}

#[test]
fn test_keccak256_empty_input() {
    assert_eq!(
        hex::encode(keccak256(b"")),
        "c5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470"
    );
}
