//! Symmetric key material and session-key verifiers.

use crate::error::{CryptoError, CryptoResult};
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::{Algorithm, Argon2, Params, Version};
use rand::RngCore;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Size of every symmetric key in bytes (256 bits).
pub const KEY_SIZE: usize = 32;

/// A 256-bit symmetric key. Zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SymmetricKey {
    bytes: [u8; KEY_SIZE],
}

impl SymmetricKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    /// Builds a key from a slice, failing unless it is exactly [`KEY_SIZE`] long.
    pub fn from_slice(bytes: &[u8]) -> CryptoResult<Self> {
        if bytes.len() != KEY_SIZE {
            return Err(CryptoError::InvalidKeyLength {
                expected: KEY_SIZE,
                actual: bytes.len(),
            });
        }
        let mut arr = [0u8; KEY_SIZE];
        arr.copy_from_slice(bytes);
        let key = Self::from_bytes(arr);
        arr.zeroize();
        Ok(key)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SymmetricKey([REDACTED])")
    }
}

/// Generates a fresh key from the operating system CSPRNG.
pub fn generate_random_key() -> SymmetricKey {
    let mut bytes = [0u8; KEY_SIZE];
    OsRng.fill_bytes(&mut bytes);
    let key = SymmetricKey::from_bytes(bytes);
    bytes.zeroize();
    key
}

/// Argon2id cost parameters for session-key verifier hashes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    /// Memory cost in KiB.
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            memory_kib: 19_456,
            iterations: 2,
            parallelism: 1,
        }
    }
}

impl KdfParams {
    /// Minimal-cost parameters. Session keys are 256-bit random values, so the
    /// verifier needs no stretching to resist guessing; tests use this profile.
    pub fn fast() -> Self {
        Self {
            memory_kib: 1024,
            iterations: 1,
            parallelism: 1,
        }
    }

    fn argon2(&self) -> CryptoResult<Argon2<'static>> {
        let params = Params::new(self.memory_kib, self.iterations, self.parallelism, None)
            .map_err(|e| CryptoError::KeyDerivation(format!("invalid Argon2 parameters: {e}")))?;
        Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
    }
}

/// Produces a salted Argon2id verifier (PHC string) for key material.
pub fn hash_key_material(material: &[u8], params: &KdfParams) -> CryptoResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = params
        .argon2()?
        .hash_password(material, &salt)
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
    Ok(hash.to_string())
}

/// Checks key material against a verifier from [`hash_key_material`].
///
/// The parameters embedded in the PHC string are used, so verifiers stay
/// valid when the configured cost changes.
pub fn verify_key_material(material: &[u8], verifier: &str) -> CryptoResult<bool> {
    let parsed = PasswordHash::new(verifier)
        .map_err(|e| CryptoError::Malformed(format!("key verifier: {e}")))?;
    Ok(Argon2::default().verify_password(material, &parsed).is_ok())
}
