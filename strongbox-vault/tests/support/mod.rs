//! Shared helpers for vault integration tests.

#![allow(dead_code)]

use chrono::{DateTime, Duration, Utc};
use std::sync::{Arc, Mutex, OnceLock};
use strongbox_crypto::RsaKeyPair;
use strongbox_vault::{Clock, Database, Keyring, MasterKey, Principal, VaultConfig};
use tracing_subscriber::EnvFilter;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("strongbox_vault=debug")),
        )
        .with_test_writer()
        .try_init();
}

// ── Keys ──
// RSA generation is slow, so each user's pair is generated once per binary.

pub fn alice() -> &'static RsaKeyPair {
    static KEY: OnceLock<RsaKeyPair> = OnceLock::new();
    KEY.get_or_init(|| RsaKeyPair::generate(2048).unwrap())
}

pub fn bob() -> &'static RsaKeyPair {
    static KEY: OnceLock<RsaKeyPair> = OnceLock::new();
    KEY.get_or_init(|| RsaKeyPair::generate(1024).unwrap())
}

pub fn carol() -> &'static RsaKeyPair {
    static KEY: OnceLock<RsaKeyPair> = OnceLock::new();
    KEY.get_or_init(|| RsaKeyPair::generate(1024).unwrap())
}

pub fn mallory() -> &'static RsaKeyPair {
    static KEY: OnceLock<RsaKeyPair> = OnceLock::new();
    KEY.get_or_init(|| RsaKeyPair::generate(1024).unwrap())
}

pub fn private(pair: &RsaKeyPair) -> &str {
    pair.private_key_pem().unwrap()
}

pub fn admin() -> Principal {
    Principal::admin("admin")
}

// ── Clock ──

/// A clock that only moves when told to.
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            now: Mutex::new(Utc::now()),
        })
    }

    pub fn current(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap();
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        self.current()
    }
}

// ── Keyrings ──

pub fn keyring() -> Keyring {
    init_tracing();
    Keyring::open_in_memory(VaultConfig::fast()).unwrap()
}

pub fn keyring_with_clock() -> (Keyring, Arc<ManualClock>) {
    init_tracing();
    let clock = ManualClock::new();
    let keyring = Keyring::with_clock(
        Database::open_in_memory().unwrap(),
        VaultConfig::fast(),
        clock.clone(),
    )
    .unwrap();
    (keyring, clock)
}

/// A keyring bootstrapped with alice as the first active key holder.
pub fn bootstrapped() -> (Keyring, MasterKey) {
    let keyring = keyring();
    let master = keyring.bootstrap("alice", alice().public_key_pem()).unwrap();
    (keyring, master)
}

/// Registers and activates `owner` with the given master key.
pub fn enroll(keyring: &Keyring, owner: &str, pair: &RsaKeyPair, master: &MasterKey) {
    keyring
        .user_keys()
        .register(owner, pair.public_key_pem())
        .unwrap();
    keyring
        .user_keys()
        .activate(owner, master, &admin())
        .unwrap();
}
