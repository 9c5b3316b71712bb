//! RSA key validation and keypair handling.
//!
//! Every user-supplied key blob passes through [`validate_rsa_key`] (or one of
//! the `parse_*` helpers built on it) before it is stored or used. Accepted
//! encodings are PEM (`RSA PRIVATE KEY`, `PRIVATE KEY`, `RSA PUBLIC KEY`,
//! `PUBLIC KEY`) or the bare base64 DER body of any of those.

use crate::error::{CryptoError, CryptoResult};
use crate::key::KEY_SIZE;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use rand::rngs::OsRng;
use rsa::pkcs1::der::{Decode, Document};
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs8::{DecodePrivateKey, EncodePrivateKey, EncodePublicKey, LineEnding, SubjectPublicKeyInfoRef};
use rsa::traits::PublicKeyParts;
use rsa::{BigUint, RsaPrivateKey, RsaPublicKey};
use std::fmt;
use zeroize::Zeroizing;

/// SHA-256 output size, the OAEP hash used for key wrapping.
const OAEP_HASH_SIZE: usize = 32;

/// Smallest modulus (in bytes) that can OAEP-encrypt a [`KEY_SIZE`] key.
pub const MIN_OAEP_MODULUS_BYTES: usize = 2 * OAEP_HASH_SIZE + 2 + KEY_SIZE;

/// Largest accepted modulus (in bytes), 16 384 bits. Applies to both halves
/// of a pair.
pub const MAX_OAEP_MODULUS_BYTES: usize = 2048;

/// Bit limit used while decoding public keys. Anything the decoder lets
/// through is judged by [`check_oaep`].
const DECODE_MAX_BITS: usize = 2 * MAX_OAEP_MODULUS_BYTES * 8;

/// Which half of a keypair a blob holds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeyKind {
    Public,
    Private,
}

impl fmt::Display for KeyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Public => f.write_str("public"),
            Self::Private => f.write_str("private"),
        }
    }
}

enum ParsedKey {
    Public(RsaPublicKey),
    Private(RsaPrivateKey),
}

impl ParsedKey {
    fn kind(&self) -> KeyKind {
        match self {
            Self::Public(_) => KeyKind::Public,
            Self::Private(_) => KeyKind::Private,
        }
    }

    fn modulus_bytes(&self) -> usize {
        match self {
            Self::Public(k) => k.size(),
            Self::Private(k) => k.size(),
        }
    }
}

/// Validates an RSA key blob.
///
/// Checks, in order: encoding (PEM or base64 DER, not OpenSSH), that it
/// parses, that it is the expected kind, and that the modulus is large
/// enough to OAEP-wrap a symmetric key. Pure.
pub fn validate_rsa_key(blob: &str, expect_private: bool) -> CryptoResult<()> {
    let expected = if expect_private {
        KeyKind::Private
    } else {
        KeyKind::Public
    };
    decode_expecting(blob, expected).map(|_| ())
}

/// Validates `blob` as a public key and returns it.
pub fn parse_public_key(blob: &str) -> CryptoResult<RsaPublicKey> {
    match decode_expecting(blob, KeyKind::Public)? {
        ParsedKey::Public(key) => Ok(key),
        ParsedKey::Private(key) => Ok(RsaPublicKey::from(&key)),
    }
}

/// Validates `blob` as a private key and returns it. The key zeroizes its
/// components when dropped.
pub fn parse_private_key(blob: &str) -> CryptoResult<RsaPrivateKey> {
    match decode_expecting(blob, KeyKind::Private)? {
        ParsedKey::Private(key) => Ok(key),
        ParsedKey::Public(_) => Err(CryptoError::KeyKindMismatch {
            expected: KeyKind::Private,
            found: KeyKind::Public,
        }),
    }
}

fn decode_expecting(blob: &str, expected: KeyKind) -> CryptoResult<ParsedKey> {
    let parsed = decode(blob)?;
    if parsed.kind() != expected {
        return Err(CryptoError::KeyKindMismatch {
            expected,
            found: parsed.kind(),
        });
    }
    check_oaep(parsed.modulus_bytes())?;
    Ok(parsed)
}

/// Fails unless a modulus of `modulus_bytes` can carry a wrapped key.
pub fn check_oaep(modulus_bytes: usize) -> CryptoResult<()> {
    if modulus_bytes < MIN_OAEP_MODULUS_BYTES {
        return Err(CryptoError::PaddingIncompatible {
            modulus_bytes,
            required: MIN_OAEP_MODULUS_BYTES,
        });
    }
    if modulus_bytes > MAX_OAEP_MODULUS_BYTES {
        return Err(CryptoError::KeyTooLarge {
            modulus_bytes,
            max: MAX_OAEP_MODULUS_BYTES,
        });
    }
    Ok(())
}

fn decode(blob: &str) -> CryptoResult<ParsedKey> {
    let blob = blob.trim();
    if blob.is_empty() {
        return Err(CryptoError::KeyFormat("key is empty".into()));
    }
    if blob.starts_with("ssh-rsa ") {
        return Err(CryptoError::OpenSshFormat);
    }

    match pem_label(blob) {
        Some(label) => decode_pem(blob, label),
        None => decode_der(blob),
    }
}

/// Returns the label of the first `-----BEGIN <label>-----` line, if any.
fn pem_label(blob: &str) -> Option<&str> {
    let rest = blob.strip_prefix("-----BEGIN ")?;
    let end = rest.find("-----")?;
    Some(&rest[..end])
}

fn decode_pem(blob: &str, label: &str) -> CryptoResult<ParsedKey> {
    let format_err = |e: &dyn fmt::Display| CryptoError::KeyFormat(format!("{label}: {e}"));
    match label {
        "RSA PRIVATE KEY" => RsaPrivateKey::from_pkcs1_pem(blob)
            .map(ParsedKey::Private)
            .map_err(|e| format_err(&e)),
        "PRIVATE KEY" => RsaPrivateKey::from_pkcs8_pem(blob)
            .map(ParsedKey::Private)
            .map_err(|e| format_err(&e)),
        "RSA PUBLIC KEY" => pem_der(blob)
            .and_then(|der| public_from_pkcs1_der(der.as_bytes()))
            .map(ParsedKey::Public)
            .map_err(|e| format_err(&e)),
        "PUBLIC KEY" => pem_der(blob)
            .and_then(|der| public_from_spki_der(der.as_bytes()))
            .map(ParsedKey::Public)
            .map_err(|e| format_err(&e)),
        "ENCRYPTED PRIVATE KEY" => Err(CryptoError::KeyFormat(
            "passphrase-protected keys are not supported".into(),
        )),
        "OPENSSH PRIVATE KEY" => Err(CryptoError::OpenSshFormat),
        other => Err(CryptoError::KeyFormat(format!(
            "unsupported PEM block \"{other}\""
        ))),
    }
}

fn decode_der(blob: &str) -> CryptoResult<ParsedKey> {
    let compact: String = blob.split_whitespace().collect();
    let der = Zeroizing::new(
        STANDARD
            .decode(compact.as_bytes())
            .map_err(|_| CryptoError::KeyFormat("not PEM or base64".into()))?,
    );

    if let Ok(key) = RsaPrivateKey::from_pkcs8_der(&der) {
        return Ok(ParsedKey::Private(key));
    }
    if let Ok(key) = RsaPrivateKey::from_pkcs1_der(&der) {
        return Ok(ParsedKey::Private(key));
    }
    if let Ok(key) = public_from_spki_der(&der) {
        return Ok(ParsedKey::Public(key));
    }
    if let Ok(key) = public_from_pkcs1_der(&der) {
        return Ok(ParsedKey::Public(key));
    }
    Err(CryptoError::KeyFormat(
        "base64 body is not an RSA key".into(),
    ))
}

// The `rsa` public-key decoders reject moduli above 4096 bits as malformed
// while private keys of any size decode. These build the key with a higher
// limit and leave size policy to `check_oaep`, so both halves of a pair get
// the same verdict.

fn pem_der(blob: &str) -> Result<Document, String> {
    Document::from_pem(blob)
        .map(|(_, der)| der)
        .map_err(|e| e.to_string())
}

fn public_from_pkcs1_der(der: &[u8]) -> Result<RsaPublicKey, String> {
    let key = rsa::pkcs1::RsaPublicKey::from_der(der).map_err(|e| e.to_string())?;
    RsaPublicKey::new_with_max_size(
        BigUint::from_bytes_be(key.modulus.as_bytes()),
        BigUint::from_bytes_be(key.public_exponent.as_bytes()),
        DECODE_MAX_BITS,
    )
    .map_err(|e| e.to_string())
}

fn public_from_spki_der(der: &[u8]) -> Result<RsaPublicKey, String> {
    let spki = SubjectPublicKeyInfoRef::from_der(der).map_err(|e| e.to_string())?;
    spki.algorithm
        .assert_algorithm_oid(rsa::pkcs1::ALGORITHM_OID)
        .map_err(|e| e.to_string())?;
    let bits = spki
        .subject_public_key
        .as_bytes()
        .ok_or_else(|| "public key bit string is not octet aligned".to_string())?;
    public_from_pkcs1_der(bits)
}

// ============================================================================
// Keypairs
// ============================================================================

/// A PEM-encoded RSA keypair. The private half, when present, lives in a
/// zeroizing buffer and is never printed.
#[derive(Clone)]
pub struct RsaKeyPair {
    public_key: String,
    private_key: Option<Zeroizing<String>>,
}

impl RsaKeyPair {
    /// Generates a fresh keypair (PKCS#8 private, SPKI public).
    pub fn generate(bits: usize) -> CryptoResult<Self> {
        check_oaep(bits / 8)?;
        let private = RsaPrivateKey::new(&mut OsRng, bits)
            .map_err(|e| CryptoError::KeyGeneration(e.to_string()))?;
        Self::from_parsed_private(&private)
    }

    /// Builds a pair from a private key blob, deriving the public half.
    pub fn from_private_key(blob: &str) -> CryptoResult<Self> {
        let private = parse_private_key(blob)?;
        Self::from_parsed_private(&private)
    }

    /// A pair holding only a validated public key.
    pub fn public_only(blob: &str) -> CryptoResult<Self> {
        let public = parse_public_key(blob)?;
        let public_key = public
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| CryptoError::KeyFormat(e.to_string()))?;
        Ok(Self {
            public_key,
            private_key: None,
        })
    }

    fn from_parsed_private(private: &RsaPrivateKey) -> CryptoResult<Self> {
        let private_key = private
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| CryptoError::KeyGeneration(e.to_string()))?;
        let public_key = RsaPublicKey::from(private)
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| CryptoError::KeyGeneration(e.to_string()))?;
        Ok(Self {
            public_key,
            private_key: Some(private_key),
        })
    }

    pub fn public_key_pem(&self) -> &str {
        &self.public_key
    }

    pub fn private_key_pem(&self) -> Option<&str> {
        self.private_key.as_ref().map(|k| k.as_str())
    }

    pub fn has_private(&self) -> bool {
        self.private_key.is_some()
    }
}

impl fmt::Debug for RsaKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RsaKeyPair")
            .field("public_key", &self.public_key)
            .field(
                "private_key",
                &self.private_key.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}
