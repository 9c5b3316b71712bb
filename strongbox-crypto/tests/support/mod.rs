//! Shared RSA fixtures. Key generation is slow, so each key is generated
//! once per test binary.

#![allow(dead_code)]

use rand::rngs::OsRng;
use rsa::RsaPrivateKey;
use rsa::pkcs1::EncodeRsaPublicKey;
use rsa::pkcs8::{EncodePrivateKey, EncodePublicKey, LineEnding};
use std::sync::OnceLock;
use strongbox_crypto::RsaKeyPair;

pub fn keypair() -> &'static RsaKeyPair {
    static KEY: OnceLock<RsaKeyPair> = OnceLock::new();
    KEY.get_or_init(|| RsaKeyPair::generate(2048).unwrap())
}

pub fn other_keypair() -> &'static RsaKeyPair {
    static KEY: OnceLock<RsaKeyPair> = OnceLock::new();
    KEY.get_or_init(|| RsaKeyPair::generate(1024).unwrap())
}

/// A 512-bit key: parses fine but is too small to OAEP-wrap a 32-byte key.
pub fn undersized_private_key() -> &'static RsaPrivateKey {
    static KEY: OnceLock<RsaPrivateKey> = OnceLock::new();
    KEY.get_or_init(|| RsaPrivateKey::new(&mut OsRng, 512).unwrap())
}

pub fn undersized_private_pem() -> String {
    undersized_private_key()
        .to_pkcs8_pem(LineEnding::LF)
        .unwrap()
        .to_string()
}

pub fn undersized_public_pem() -> String {
    undersized_private_key()
        .to_public_key()
        .to_public_key_pem(LineEnding::LF)
        .unwrap()
}

/// A 4160-bit key, past the 4096-bit limit of the `rsa` public-key decoders.
pub fn large_private_key() -> &'static RsaPrivateKey {
    static KEY: OnceLock<RsaPrivateKey> = OnceLock::new();
    KEY.get_or_init(|| RsaPrivateKey::new(&mut OsRng, 4160).unwrap())
}

pub fn large_private_pem() -> String {
    large_private_key()
        .to_pkcs8_pem(LineEnding::LF)
        .unwrap()
        .to_string()
}

pub fn large_public_pem() -> String {
    large_private_key()
        .to_public_key()
        .to_public_key_pem(LineEnding::LF)
        .unwrap()
}

pub fn large_public_pkcs1_pem() -> String {
    large_private_key()
        .to_public_key()
        .to_pkcs1_pem(LineEnding::LF)
        .unwrap()
}

pub fn private_pem() -> &'static str {
    keypair().private_key_pem().unwrap()
}

pub fn public_pem() -> &'static str {
    keypair().public_key_pem()
}

/// Strips the armour lines from a PEM block, leaving the base64 DER body.
pub fn pem_body(pem: &str) -> String {
    pem.lines()
        .filter(|line| !line.starts_with("-----"))
        .collect::<Vec<_>>()
        .join("\n")
}
