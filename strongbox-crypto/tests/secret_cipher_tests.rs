//! Secret encryption: length checks, length hiding, tamper detection.

use strongbox_crypto::{
    CryptoError, NONCE_SIZE, SECRET_PLAINTEXT_MAX_LENGTH, decrypt_secret, encrypt_secret,
    generate_random_key, reencrypt_secret, sealed_len,
};

const MAX: usize = SECRET_PLAINTEXT_MAX_LENGTH;

#[test]
fn hunter2_roundtrips() {
    let key = generate_random_key();
    let sealed = encrypt_secret(&key, "hunter2", MAX).unwrap();
    let plaintext = decrypt_secret(&key, &sealed.ciphertext, &sealed.nonce).unwrap();
    assert_eq!(plaintext.as_str(), "hunter2");
}

#[test]
fn unicode_roundtrips() {
    let key = generate_random_key();
    let secret = "pässwörd 🔑 密码";
    let sealed = encrypt_secret(&key, secret, MAX).unwrap();
    assert_eq!(
        decrypt_secret(&key, &sealed.ciphertext, &sealed.nonce)
            .unwrap()
            .as_str(),
        secret
    );
}

// ── Length Limits ──

#[test]
fn max_length_plaintext_accepted() {
    let key = generate_random_key();
    let secret = "x".repeat(MAX);
    let sealed = encrypt_secret(&key, &secret, MAX).unwrap();
    assert_eq!(
        decrypt_secret(&key, &sealed.ciphertext, &sealed.nonce)
            .unwrap()
            .len(),
        MAX
    );
}

#[test]
fn over_length_plaintext_rejected() {
    let key = generate_random_key();
    let secret = "x".repeat(MAX + 1);
    let err = encrypt_secret(&key, &secret, MAX).unwrap_err();
    assert!(matches!(
        err,
        CryptoError::PlaintextTooLong { len, max } if len == MAX + 1 && max == MAX
    ));
}

#[test]
fn caller_limit_is_honoured() {
    let key = generate_random_key();
    assert!(encrypt_secret(&key, "12345678", 8).is_ok());
    assert!(matches!(
        encrypt_secret(&key, "123456789", 8),
        Err(CryptoError::PlaintextTooLong { len: 9, max: 8 })
    ));
}

#[test]
fn caller_limit_cannot_exceed_hard_maximum() {
    let key = generate_random_key();
    let secret = "x".repeat(MAX + 1);
    assert!(matches!(
        encrypt_secret(&key, &secret, usize::MAX),
        Err(CryptoError::PlaintextTooLong { max: MAX, .. })
    ));
}

// ── Length Hiding ──

#[test]
fn lengths_within_a_bucket_are_indistinguishable() {
    let key = generate_random_key();
    let short = encrypt_secret(&key, "a", MAX).unwrap();
    let long = encrypt_secret(&key, "abcdefghijklmn", MAX).unwrap();

    assert_eq!(short.ciphertext.len(), long.ciphertext.len());
    assert_eq!(short.ciphertext.len(), sealed_len(1));
}

#[test]
fn crossing_a_bucket_grows_ciphertext() {
    let key = generate_random_key();
    let a = encrypt_secret(&key, &"y".repeat(14), MAX).unwrap();
    let b = encrypt_secret(&key, &"y".repeat(15), MAX).unwrap();
    assert_eq!(b.ciphertext.len(), a.ciphertext.len() + 16);
}

// ── Tamper Detection ──

#[test]
fn every_ciphertext_bit_flip_detected() {
    let key = generate_random_key();
    let sealed = encrypt_secret(&key, "hunter2", MAX).unwrap();

    for byte in 0..sealed.ciphertext.len() {
        for bit in 0..8 {
            let mut ciphertext = sealed.ciphertext.clone();
            ciphertext[byte] ^= 1 << bit;
            assert!(
                matches!(
                    decrypt_secret(&key, &ciphertext, &sealed.nonce),
                    Err(CryptoError::Decryption)
                ),
                "flip of bit {bit} in byte {byte} went unnoticed"
            );
        }
    }
}

#[test]
fn every_nonce_bit_flip_detected() {
    let key = generate_random_key();
    let sealed = encrypt_secret(&key, "hunter2", MAX).unwrap();

    for byte in 0..NONCE_SIZE {
        for bit in 0..8 {
            let mut nonce = sealed.nonce;
            nonce[byte] ^= 1 << bit;
            assert!(matches!(
                decrypt_secret(&key, &sealed.ciphertext, &nonce),
                Err(CryptoError::Decryption)
            ));
        }
    }
}

#[test]
fn wrong_key_is_decryption_error() {
    let sealed = encrypt_secret(&generate_random_key(), "hunter2", MAX).unwrap();
    assert!(matches!(
        decrypt_secret(&generate_random_key(), &sealed.ciphertext, &sealed.nonce),
        Err(CryptoError::Decryption)
    ));
}

#[test]
fn bad_nonce_length_is_malformed() {
    let key = generate_random_key();
    let sealed = encrypt_secret(&key, "hunter2", MAX).unwrap();

    for len in [0usize, 8, 11, 13, 24] {
        let nonce = vec![0u8; len];
        assert!(
            matches!(
                decrypt_secret(&key, &sealed.ciphertext, &nonce),
                Err(CryptoError::Malformed(_))
            ),
            "nonce of {len} bytes"
        );
    }
}

#[test]
fn truncated_ciphertext_is_malformed() {
    let key = generate_random_key();
    let sealed = encrypt_secret(&key, "hunter2", MAX).unwrap();
    assert!(matches!(
        decrypt_secret(&key, &sealed.ciphertext[..10], &sealed.nonce),
        Err(CryptoError::Malformed(_))
    ));
}

// ── Re-encryption ──

#[test]
fn reencrypt_moves_secret_to_new_key() {
    let old = generate_random_key();
    let new = generate_random_key();
    let sealed = encrypt_secret(&old, "hunter2", MAX).unwrap();

    let moved = reencrypt_secret(&old, &new, &sealed.ciphertext, &sealed.nonce).unwrap();

    assert_eq!(moved.ciphertext.len(), sealed.ciphertext.len());
    assert_eq!(
        decrypt_secret(&new, &moved.ciphertext, &moved.nonce)
            .unwrap()
            .as_str(),
        "hunter2"
    );
    assert!(decrypt_secret(&old, &moved.ciphertext, &moved.nonce).is_err());
}

#[test]
fn reencrypt_with_wrong_old_key_fails() {
    let sealed = encrypt_secret(&generate_random_key(), "hunter2", MAX).unwrap();
    assert!(matches!(
        reencrypt_secret(
            &generate_random_key(),
            &generate_random_key(),
            &sealed.ciphertext,
            &sealed.nonce
        ),
        Err(CryptoError::Decryption)
    ));
}

mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn any_text_roundtrips(secret in "\\PC{0,200}") {
            let key = generate_random_key();
            let sealed = encrypt_secret(&key, &secret, MAX).unwrap();
            let plaintext = decrypt_secret(&key, &sealed.ciphertext, &sealed.nonce).unwrap();
            prop_assert_eq!(plaintext.as_str(), secret.as_str());
        }

        #[test]
        fn ciphertext_length_depends_only_on_bucket(len in 0usize..2000) {
            let key = generate_random_key();
            let sealed = encrypt_secret(&key, &"z".repeat(len), MAX).unwrap();
            prop_assert_eq!(sealed.ciphertext.len(), sealed_len(len));
            prop_assert_eq!(sealed.ciphertext.len() % 16, 0);
        }
    }
}
