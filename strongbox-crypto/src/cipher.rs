//! ChaCha20-Poly1305 authenticated encryption.

use crate::error::{CryptoError, CryptoResult};
use crate::key::SymmetricKey;
use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use rand::RngCore;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};

/// ChaCha20-Poly1305 nonce size in bytes.
pub const NONCE_SIZE: usize = 12;

/// Poly1305 authentication tag size in bytes.
pub const TAG_SIZE: usize = 16;

/// Ciphertext plus the nonce it was sealed with.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedData {
    pub nonce: [u8; NONCE_SIZE],
    /// Ciphertext followed by the Poly1305 tag.
    pub ciphertext: Vec<u8>,
}

impl EncryptedData {
    /// Reassembles stored parts, rejecting a nonce of the wrong size or a
    /// ciphertext too short to hold a tag.
    pub fn from_parts(nonce: &[u8], ciphertext: Vec<u8>) -> CryptoResult<Self> {
        let nonce: [u8; NONCE_SIZE] = nonce.try_into().map_err(|_| {
            CryptoError::Malformed(format!(
                "nonce must be {NONCE_SIZE} bytes, got {}",
                nonce.len()
            ))
        })?;
        if ciphertext.len() < TAG_SIZE {
            return Err(CryptoError::Malformed(format!(
                "ciphertext of {} bytes cannot hold a {TAG_SIZE}-byte tag",
                ciphertext.len()
            )));
        }
        Ok(Self { nonce, ciphertext })
    }

    /// Total stored size (nonce + ciphertext + tag).
    pub fn len(&self) -> usize {
        NONCE_SIZE + self.ciphertext.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ciphertext.is_empty()
    }
}

/// Encrypts `plaintext` under `key` with a fresh random nonce.
pub fn encrypt(key: &SymmetricKey, plaintext: &[u8]) -> CryptoResult<EncryptedData> {
    encrypt_with_aad(key, plaintext, &[])
}

/// Decrypts data produced by [`encrypt`].
pub fn decrypt(key: &SymmetricKey, encrypted: &EncryptedData) -> CryptoResult<Vec<u8>> {
    decrypt_with_aad(key, encrypted, &[])
}

/// Encrypts `plaintext`, binding `aad` into the tag without encrypting it.
pub fn encrypt_with_aad(
    key: &SymmetricKey,
    plaintext: &[u8],
    aad: &[u8],
) -> CryptoResult<EncryptedData> {
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));

    let mut nonce = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce);

    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), Payload { msg: plaintext, aad })
        .map_err(|e| CryptoError::Encryption(e.to_string()))?;

    Ok(EncryptedData { nonce, ciphertext })
}

/// Decrypts data produced by [`encrypt_with_aad`] with the same `aad`.
///
/// A wrong key, wrong `aad` or any modified byte yields
/// [`CryptoError::Decryption`]; a ciphertext shorter than the tag is
/// reported as [`CryptoError::Malformed`].
pub fn decrypt_with_aad(
    key: &SymmetricKey,
    encrypted: &EncryptedData,
    aad: &[u8],
) -> CryptoResult<Vec<u8>> {
    if encrypted.ciphertext.len() < TAG_SIZE {
        return Err(CryptoError::Malformed(format!(
            "ciphertext of {} bytes cannot hold a {TAG_SIZE}-byte tag",
            encrypted.ciphertext.len()
        )));
    }

    let cipher = ChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));
    cipher
        .decrypt(
            Nonce::from_slice(&encrypted.nonce),
            Payload {
                msg: &encrypted.ciphertext,
                aad,
            },
        )
        .map_err(|_| CryptoError::Decryption)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::generate_random_key;

    #[test]
    fn aad_is_bound_to_ciphertext() {
        let key = generate_random_key();
        let sealed = encrypt_with_aad(&key, b"payload", b"alice").unwrap();

        assert_eq!(decrypt_with_aad(&key, &sealed, b"alice").unwrap(), b"payload");
        assert!(matches!(
            decrypt_with_aad(&key, &sealed, b"bob"),
            Err(CryptoError::Decryption)
        ));
        assert!(matches!(decrypt(&key, &sealed), Err(CryptoError::Decryption)));
    }

    #[test]
    fn from_parts_validates_lengths() {
        assert!(matches!(
            EncryptedData::from_parts(&[0u8; 8], vec![0u8; 32]),
            Err(CryptoError::Malformed(_))
        ));
        assert!(matches!(
            EncryptedData::from_parts(&[0u8; NONCE_SIZE], vec![0u8; 4]),
            Err(CryptoError::Malformed(_))
        ));
        assert!(EncryptedData::from_parts(&[0u8; NONCE_SIZE], vec![0u8; TAG_SIZE]).is_ok());
    }

    #[test]
    fn len_counts_nonce_and_tag() {
        let key = generate_random_key();
        let sealed = encrypt(&key, &[1, 2, 3]).unwrap();
        assert_eq!(sealed.len(), NONCE_SIZE + 3 + TAG_SIZE);
    }
}
