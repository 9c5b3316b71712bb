//! Crypto error types.

use crate::rsa_key::KeyKind;
use thiserror::Error;

/// Result type for crypto operations.
pub type CryptoResult<T> = Result<T, CryptoError>;

/// Errors raised by key validation, key wrapping and encryption.
///
/// Validation variants carry actionable detail because they never involve
/// secret material. `Decryption` is deliberately uniform: a wrong key and a
/// tampered ciphertext produce the same error.
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("OpenSSH key format is not supported; please supply the key in PEM (base64) format")]
    OpenSshFormat,

    #[error("invalid RSA key ({0}); please ensure the key is in PEM (base64) format")]
    KeyFormat(String),

    #[error("{found} key supplied where {expected} key expected")]
    KeyKindMismatch { expected: KeyKind, found: KeyKind },

    #[error(
        "RSA key does not support OAEP padding: modulus is {modulus_bytes} bytes, at least {required} required"
    )]
    PaddingIncompatible { modulus_bytes: usize, required: usize },

    #[error("RSA key is too large: modulus is {modulus_bytes} bytes, at most {max} supported")]
    KeyTooLarge { modulus_bytes: usize, max: usize },

    #[error("could not decrypt")]
    Decryption,

    #[error("malformed ciphertext: {0}")]
    Malformed(String),

    #[error("plaintext is {len} bytes, the maximum is {max}")]
    PlaintextTooLong { len: usize, max: usize },

    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    #[error("encryption failed: {0}")]
    Encryption(String),

    #[error("key generation failed: {0}")]
    KeyGeneration(String),

    #[error("key derivation failed: {0}")]
    KeyDerivation(String),
}

impl CryptoError {
    /// True for errors caused by a user-submitted key blob. These are safe to
    /// show verbatim and the user can fix them by resubmitting.
    pub fn is_key_validation(&self) -> bool {
        matches!(
            self,
            Self::OpenSshFormat
                | Self::KeyFormat(_)
                | Self::KeyKindMismatch { .. }
                | Self::PaddingIncompatible { .. }
                | Self::KeyTooLarge { .. }
        )
    }
}
