//! RSA-OAEP envelope for the master key.
//!
//! The master key is wrapped once per authorized user under that user's RSA
//! public key (OAEP with SHA-256). Only the holder of the matching private
//! key can unwrap it.

use crate::error::{CryptoError, CryptoResult};
use crate::key::SymmetricKey;
use rand::rngs::OsRng;
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;
use zeroize::Zeroizing;

/// Wraps a symmetric key for the owner of `recipient`.
///
/// Output is exactly the recipient's modulus size and differs on every call.
pub fn wrap_key(key: &SymmetricKey, recipient: &RsaPublicKey) -> CryptoResult<Vec<u8>> {
    recipient
        .encrypt(&mut OsRng, Oaep::new::<Sha256>(), key.as_bytes())
        .map_err(|e| CryptoError::Encryption(format!("key wrap failed: {e}")))
}

/// Unwraps a key produced by [`wrap_key`].
///
/// A wrong private key, a tampered wrap and a wrap of the wrong length all
/// fail with the same [`CryptoError::Decryption`].
pub fn unwrap_key(wrapped: &[u8], private_key: &RsaPrivateKey) -> CryptoResult<SymmetricKey> {
    let plaintext = Zeroizing::new(
        private_key
            .decrypt_blinded(&mut OsRng, Oaep::new::<Sha256>(), wrapped)
            .map_err(|_| CryptoError::Decryption)?,
    );
    SymmetricKey::from_slice(&plaintext).map_err(|_| CryptoError::Decryption)
}
