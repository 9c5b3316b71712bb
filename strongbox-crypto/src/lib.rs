//! Cryptographic primitives for Strongbox.
//!
//! Provides the building blocks of the secrets envelope:
//! - RSA key validation and keypair generation (PEM / base64 DER)
//! - RSA-OAEP (SHA-256) wrapping of the symmetric master key per user
//! - ChaCha20-Poly1305 authenticated encryption
//! - Length-hiding encryption of secret plaintexts
//! - Argon2id verifiers for session keys
//!
//! # Architecture
//!
//! Secrets are protected by a two-tier key system:
//!
//! 1. **Master Key**: A random 256-bit key shared by every authorized user.
//!    It is never stored in the clear; each user holds a copy wrapped under
//!    their RSA public key.
//!
//! 2. **Session Key**: A random key the master key is re-wrapped under after
//!    the user proves possession of their RSA private key. The private key is
//!    needed once per session instead of once per request.
//!
//! This crate performs no I/O. Persistence and access control live in
//! `strongbox-vault`.

mod cipher;
mod envelope;
mod error;
mod key;
mod rsa_key;
mod secret;

pub use cipher::{
    EncryptedData, NONCE_SIZE, TAG_SIZE, decrypt, decrypt_with_aad, encrypt, encrypt_with_aad,
};
pub use envelope::{unwrap_key, wrap_key};
pub use error::{CryptoError, CryptoResult};
pub use key::{
    KEY_SIZE, KdfParams, SymmetricKey, generate_random_key, hash_key_material,
    verify_key_material,
};
pub use rsa_key::{
    KeyKind, MAX_OAEP_MODULUS_BYTES, MIN_OAEP_MODULUS_BYTES, RsaKeyPair, check_oaep,
    parse_private_key, parse_public_key, validate_rsa_key,
};
pub use secret::{
    PAD_BLOCK, SECRET_PLAINTEXT_MAX_LENGTH, decrypt_secret, encrypt_secret, reencrypt_secret,
    sealed_len,
};

pub use rsa::{RsaPrivateKey, RsaPublicKey};
pub use zeroize::Zeroizing;
