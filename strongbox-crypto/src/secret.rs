//! Length-hiding encryption of secret plaintexts.
//!
//! Plaintext is framed as a 2-byte big-endian length followed by the bytes,
//! then padded with random bytes up to a multiple of [`PAD_BLOCK`] before
//! sealing with ChaCha20-Poly1305. Ciphertexts of secrets whose lengths fall
//! in the same block are indistinguishable by size.

use crate::cipher::{EncryptedData, decrypt, encrypt};
use crate::error::{CryptoError, CryptoResult};
use crate::key::SymmetricKey;
use rand::RngCore;
use rand::rngs::OsRng;
use zeroize::Zeroizing;

/// Hard upper bound on secret plaintext length in bytes.
pub const SECRET_PLAINTEXT_MAX_LENGTH: usize = 65_535;

/// Padding granularity in bytes.
pub const PAD_BLOCK: usize = 16;

const LEN_PREFIX: usize = 2;

/// Encrypts a secret under the master key.
///
/// `max_len` is the caller's configured limit; the effective limit never
/// exceeds [`SECRET_PLAINTEXT_MAX_LENGTH`]. The length check runs before any
/// cryptographic work.
pub fn encrypt_secret(
    master_key: &SymmetricKey,
    plaintext: &str,
    max_len: usize,
) -> CryptoResult<EncryptedData> {
    let max = max_len.min(SECRET_PLAINTEXT_MAX_LENGTH);
    if plaintext.len() > max {
        return Err(CryptoError::PlaintextTooLong {
            len: plaintext.len(),
            max,
        });
    }

    let framed = frame(plaintext.as_bytes());
    encrypt(master_key, &framed)
}

/// Decrypts a secret from its stored ciphertext and nonce.
///
/// Wrong key or tampering gives [`CryptoError::Decryption`]; a bad nonce
/// length, truncated ciphertext or inconsistent frame gives
/// [`CryptoError::Malformed`].
pub fn decrypt_secret(
    master_key: &SymmetricKey,
    ciphertext: &[u8],
    nonce: &[u8],
) -> CryptoResult<Zeroizing<String>> {
    let sealed = EncryptedData::from_parts(nonce, ciphertext.to_vec())?;
    let framed = Zeroizing::new(decrypt(master_key, &sealed)?);
    let bytes = unframe(&framed)?;
    let text = std::str::from_utf8(bytes)
        .map_err(|_| CryptoError::Malformed("secret is not valid UTF-8".into()))?;
    Ok(Zeroizing::new(text.to_owned()))
}

/// Moves a secret from one master key to another without exposing the
/// plaintext beyond this call. The padded frame is kept as is.
pub fn reencrypt_secret(
    old_key: &SymmetricKey,
    new_key: &SymmetricKey,
    ciphertext: &[u8],
    nonce: &[u8],
) -> CryptoResult<EncryptedData> {
    let sealed = EncryptedData::from_parts(nonce, ciphertext.to_vec())?;
    let framed = Zeroizing::new(decrypt(old_key, &sealed)?);
    unframe(&framed)?;
    encrypt(new_key, &framed)
}

/// Size of the sealed ciphertext (including tag) for a plaintext length.
pub fn sealed_len(plaintext_len: usize) -> usize {
    padded_len(plaintext_len) + crate::cipher::TAG_SIZE
}

fn padded_len(plaintext_len: usize) -> usize {
    (LEN_PREFIX + plaintext_len).div_ceil(PAD_BLOCK) * PAD_BLOCK
}

fn frame(plaintext: &[u8]) -> Zeroizing<Vec<u8>> {
    let total = padded_len(plaintext.len());
    let mut buf = Zeroizing::new(Vec::with_capacity(total));
    // Caller guarantees the length fits in u16.
    buf.extend_from_slice(&(plaintext.len() as u16).to_be_bytes());
    buf.extend_from_slice(plaintext);
    let used = buf.len();
    buf.resize(total, 0);
    OsRng.fill_bytes(&mut buf[used..]);
    buf
}

fn unframe(buf: &[u8]) -> CryptoResult<&[u8]> {
    if buf.len() < LEN_PREFIX || buf.len() % PAD_BLOCK != 0 {
        return Err(CryptoError::Malformed("bad secret frame size".into()));
    }
    let len = u16::from_be_bytes([buf[0], buf[1]]) as usize;
    let body = &buf[LEN_PREFIX..];
    if len > body.len() || padded_len(len) != buf.len() {
        return Err(CryptoError::Malformed("secret length prefix out of range".into()));
    }
    Ok(&body[..len])
}
