mod support;

use chrono::Duration;
use strongbox_vault::{Keyring, SessionKey, VaultConfig, VaultError};
use support::*;

// ── Open ──

#[test]
fn open_session_yields_master_key() {
    let (keyring, master) = bootstrapped();
    let session = keyring
        .sessions()
        .open_session("alice", private(alice()), None)
        .unwrap();

    assert_eq!(session.owner(), "alice");
    assert!(keyring.sessions().is_open("alice").unwrap());

    let resolved = keyring
        .sessions()
        .get_master_key("alice", session.key())
        .unwrap();
    assert_eq!(resolved.key().as_bytes(), master.key().as_bytes());
    assert_eq!(resolved.version(), master.version());
}

#[test]
fn default_ttl_comes_from_config() {
    let (keyring, clock) = keyring_with_clock();
    keyring.bootstrap("alice", alice().public_key_pem()).unwrap();
    let before = clock.current();

    let session = keyring
        .sessions()
        .open_session("alice", private(alice()), None)
        .unwrap();
    assert_eq!(
        session.expires_at() - before,
        Duration::seconds(keyring.config().default_session_ttl_secs)
    );
}

#[test]
fn ttl_is_clamped_to_maximum() {
    let (keyring, clock) = keyring_with_clock();
    keyring.bootstrap("alice", alice().public_key_pem()).unwrap();
    let before = clock.current();

    let session = keyring
        .sessions()
        .open_session("alice", private(alice()), Some(Duration::days(30)))
        .unwrap();
    assert_eq!(
        session.expires_at() - before,
        Duration::seconds(keyring.config().max_session_ttl_secs)
    );
}

#[test]
fn non_positive_ttl_rejected() {
    let (keyring, _master) = bootstrapped();
    for ttl in [Duration::zero(), Duration::seconds(-5)] {
        assert!(matches!(
            keyring
                .sessions()
                .open_session("alice", private(alice()), Some(ttl)),
            Err(VaultError::InvalidTtl)
        ));
    }
}

fn bootstrapped_with(config: VaultConfig) -> Keyring {
    init_tracing();
    let keyring = Keyring::open_in_memory(config).unwrap();
    keyring.bootstrap("alice", alice().public_key_pem()).unwrap();
    keyring
}

#[test]
fn unrepresentable_max_ttl_means_no_cap() {
    let keyring = bootstrapped_with(VaultConfig {
        max_session_ttl_secs: i64::MAX,
        ..VaultConfig::fast()
    });
    let session = keyring
        .sessions()
        .open_session("alice", private(alice()), Some(Duration::seconds(60)))
        .unwrap();
    assert!(keyring
        .sessions()
        .get_master_key("alice", session.key())
        .is_ok());
}

#[test]
fn overflowing_expiry_rejected() {
    let keyring = bootstrapped_with(VaultConfig {
        max_session_ttl_secs: i64::MAX,
        ..VaultConfig::fast()
    });
    assert!(matches!(
        keyring
            .sessions()
            .open_session("alice", private(alice()), Some(Duration::days(100_000_000))),
        Err(VaultError::InvalidTtl)
    ));
    assert!(!keyring.sessions().is_open("alice").unwrap());
}

#[test]
fn out_of_range_ttl_config_rejected() {
    let huge_default = bootstrapped_with(VaultConfig {
        default_session_ttl_secs: i64::MAX,
        ..VaultConfig::fast()
    });
    assert!(matches!(
        huge_default
            .sessions()
            .open_session("alice", private(alice()), None),
        Err(VaultError::InvalidTtl)
    ));

    assert!(matches!(
        Keyring::open_in_memory(VaultConfig {
            max_session_ttl_secs: 0,
            ..VaultConfig::fast()
        }),
        Err(VaultError::InvalidTtl)
    ));
}

#[test]
fn wrong_private_key_opens_nothing() {
    let (keyring, _master) = bootstrapped();
    assert!(matches!(
        keyring
            .sessions()
            .open_session("alice", private(mallory()), None),
        Err(VaultError::DecryptionFailure)
    ));
    assert!(!keyring.sessions().is_open("alice").unwrap());
}

#[test]
fn inactive_user_cannot_open_session() {
    let (keyring, _master) = bootstrapped();
    keyring
        .user_keys()
        .register("bob", bob().public_key_pem())
        .unwrap();
    let err = keyring
        .sessions()
        .open_session("bob", private(bob()), None)
        .unwrap_err();
    assert!(err.is_decryption_failure());
}

#[test]
fn reopening_replaces_previous_session() {
    let (keyring, _master) = bootstrapped();
    let first = keyring
        .sessions()
        .open_session("alice", private(alice()), None)
        .unwrap();
    let second = keyring
        .sessions()
        .open_session("alice", private(alice()), None)
        .unwrap();

    assert!(keyring
        .sessions()
        .get_master_key("alice", second.key())
        .is_ok());
    assert!(matches!(
        keyring.sessions().get_master_key("alice", first.key()),
        Err(VaultError::DecryptionFailure)
    ));
}

// ── Isolation ──

#[test]
fn sessions_are_isolated_between_users() {
    let (keyring, master) = bootstrapped();
    enroll(&keyring, "bob", bob(), &master);

    let alice_session = keyring
        .sessions()
        .open_session("alice", private(alice()), None)
        .unwrap();
    let bob_session = keyring
        .sessions()
        .open_session("bob", private(bob()), None)
        .unwrap();

    // Bob's session key does not unlock Alice's session and vice versa.
    assert!(matches!(
        keyring.sessions().get_master_key("alice", bob_session.key()),
        Err(VaultError::DecryptionFailure)
    ));
    assert!(matches!(
        keyring.sessions().get_master_key("bob", alice_session.key()),
        Err(VaultError::DecryptionFailure)
    ));
}

#[test]
fn random_session_key_is_refused() {
    let (keyring, _master) = bootstrapped();
    keyring
        .sessions()
        .open_session("alice", private(alice()), None)
        .unwrap();

    let forged = SessionKey::from_base64(&base64_of([7u8; 32])).unwrap();
    assert!(matches!(
        keyring.sessions().get_master_key("alice", &forged),
        Err(VaultError::DecryptionFailure)
    ));
}

// ── Expiry & Revocation ──

#[test]
fn expired_session_is_refused_and_removed() {
    let (keyring, clock) = keyring_with_clock();
    keyring.bootstrap("alice", alice().public_key_pem()).unwrap();
    let session = keyring
        .sessions()
        .open_session("alice", private(alice()), Some(Duration::seconds(60)))
        .unwrap();

    clock.advance(Duration::seconds(59));
    assert!(keyring
        .sessions()
        .get_master_key("alice", session.key())
        .is_ok());

    clock.advance(Duration::seconds(1));
    assert!(!keyring.sessions().is_open("alice").unwrap());
    let err = keyring
        .sessions()
        .get_master_key("alice", session.key())
        .unwrap_err();
    assert!(matches!(err, VaultError::SessionExpired));
    assert_eq!(err.to_string(), "session expired");
    assert_eq!(keyring.sessions().expires_at("alice").unwrap(), None);
}

#[test]
fn wrong_key_learns_nothing_about_expiry() {
    let (keyring, clock) = keyring_with_clock();
    keyring.bootstrap("alice", alice().public_key_pem()).unwrap();
    let session = keyring
        .sessions()
        .open_session("alice", private(alice()), Some(Duration::seconds(60)))
        .unwrap();
    let forged = SessionKey::from_base64(&base64_of([7u8; 32])).unwrap();

    clock.advance(Duration::seconds(120));
    assert!(matches!(
        keyring.sessions().get_master_key("alice", &forged),
        Err(VaultError::DecryptionFailure)
    ));
    // The expired row is only cleared by its own key.
    assert!(keyring.sessions().expires_at("alice").unwrap().is_some());

    assert!(matches!(
        keyring.sessions().get_master_key("alice", session.key()),
        Err(VaultError::SessionExpired)
    ));
    assert_eq!(keyring.sessions().expires_at("alice").unwrap(), None);
}

#[test]
fn closed_session_is_refused() {
    let (keyring, _master) = bootstrapped();
    let session = keyring
        .sessions()
        .open_session("alice", private(alice()), None)
        .unwrap();

    assert!(keyring.sessions().close_session("alice").unwrap());
    assert!(!keyring.sessions().close_session("alice").unwrap());
    assert!(matches!(
        keyring.sessions().get_master_key("alice", session.key()),
        Err(VaultError::SessionExpired)
    ));
}

#[test]
fn deactivation_kills_session() {
    let (keyring, master) = bootstrapped();
    enroll(&keyring, "bob", bob(), &master);
    let session = keyring
        .sessions()
        .open_session("bob", private(bob()), None)
        .unwrap();

    keyring.user_keys().deactivate("bob").unwrap();

    assert!(matches!(
        keyring.sessions().get_master_key("bob", session.key()),
        Err(VaultError::SessionExpired)
    ));
}

#[test]
fn re_registration_kills_session_even_after_reactivation() {
    let (keyring, master) = bootstrapped();
    enroll(&keyring, "bob", bob(), &master);
    let session = keyring
        .sessions()
        .open_session("bob", private(bob()), None)
        .unwrap();

    enroll(&keyring, "bob", bob(), &master);

    assert!(matches!(
        keyring.sessions().get_master_key("bob", session.key()),
        Err(VaultError::SessionExpired)
    ));
}

#[test]
fn purge_removes_only_expired_sessions() {
    let (keyring, clock) = keyring_with_clock();
    let master = keyring.bootstrap("alice", alice().public_key_pem()).unwrap();
    enroll(&keyring, "bob", bob(), &master);

    keyring
        .sessions()
        .open_session("alice", private(alice()), Some(Duration::seconds(30)))
        .unwrap();
    keyring
        .sessions()
        .open_session("bob", private(bob()), Some(Duration::seconds(300)))
        .unwrap();

    clock.advance(Duration::seconds(60));
    assert_eq!(keyring.sessions().purge_expired().unwrap(), 1);
    assert!(!keyring.sessions().is_open("alice").unwrap());
    assert!(keyring.sessions().is_open("bob").unwrap());
}

// ── Session Key Transport ──

#[test]
fn session_key_base64_roundtrip() {
    let (keyring, _master) = bootstrapped();
    let session = keyring
        .sessions()
        .open_session("alice", private(alice()), None)
        .unwrap();

    let encoded = session.key().to_base64();
    let decoded = SessionKey::from_base64(&encoded).unwrap();
    assert!(keyring
        .sessions()
        .get_master_key("alice", &decoded)
        .is_ok());
}

#[test]
fn malformed_session_key_rejected() {
    assert!(matches!(
        SessionKey::from_base64("not base64!"),
        Err(VaultError::InvalidInput(_))
    ));
    assert!(matches!(
        SessionKey::from_base64(&base64_of([1u8; 8])),
        Err(VaultError::InvalidInput(_))
    ));
}

#[test]
fn session_debug_does_not_leak_key() {
    let (keyring, _master) = bootstrapped();
    let session = keyring
        .sessions()
        .open_session("alice", private(alice()), None)
        .unwrap();
    let shown = format!("{session:?}");
    assert!(shown.contains("REDACTED"));
    assert!(!shown.contains(session.key().to_base64().as_str()));
}

fn base64_of<const N: usize>(bytes: [u8; N]) -> String {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.encode(bytes)
}
