//! Key custody and encrypted secret storage backed by DuckDB.
//!
//! Users register RSA public keys. An admin activates a user by wrapping the
//! shared master key under that user's key. A user opens a short-lived
//! session with their private key, after which a session key unlocks the
//! master key for individual secret operations.
//!
//! Plaintext secrets, RSA private keys and the unwrapped master key are never
//! persisted and never logged. All components share one connection and one
//! guarded master-key slot through [`Keyring`].

mod clock;
mod config;
mod db;
mod error;
mod keyring;
mod master_key;
mod secrets;
mod session;
mod user_keys;

pub use clock::{Clock, SystemClock};
pub use config::VaultConfig;
pub use db::Database;
pub use error::{VaultError, VaultResult};
pub use keyring::Keyring;
pub use master_key::{MasterKey, MasterKeyManager};
pub use secrets::{SecretDraft, SecretRecord, SecretState, SecretStore, SecretUpdate};
pub use session::{Session, SessionKey, SessionKeyManager};
pub use user_keys::{Principal, UserKey, UserKeyStore};
