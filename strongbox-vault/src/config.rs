//! Vault configuration.

use crate::error::{VaultError, VaultResult};
use serde::{Deserialize, Serialize};
use strongbox_crypto::{KdfParams, SECRET_PLAINTEXT_MAX_LENGTH};

/// Configuration for a [`Keyring`](crate::Keyring).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultConfig {
    /// Session lifetime used when the caller does not ask for one (seconds).
    pub default_session_ttl_secs: i64,

    /// Upper bound on any session lifetime (seconds). Longer requests are clamped.
    pub max_session_ttl_secs: i64,

    /// Maximum secret plaintext length in bytes. Never above 65 535.
    pub max_plaintext_len: usize,

    /// Argon2id cost for session-key verifier hashes.
    pub session_kdf: KdfParams,

    /// DuckDB memory limit (e.g. "64MB").
    pub memory_limit: String,

    /// DuckDB worker threads.
    pub threads: u32,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            default_session_ttl_secs: 3600,
            max_session_ttl_secs: 86_400, // one day
            max_plaintext_len: SECRET_PLAINTEXT_MAX_LENGTH,
            session_kdf: KdfParams::default(),
            memory_limit: "64MB".to_string(),
            threads: 1,
        }
    }
}

impl VaultConfig {
    /// Low-cost profile for tests: cheap verifier hashing, default limits.
    pub fn fast() -> Self {
        Self {
            session_kdf: KdfParams::fast(),
            ..Self::default()
        }
    }

    /// Rejects settings that cannot work. `memory_limit` is spliced into a
    /// PRAGMA, so only a size like `64MB` or `1.5 GiB` is accepted.
    pub fn validate(&self) -> VaultResult<()> {
        let limit = self.memory_limit.trim();
        if limit.is_empty()
            || !limit.starts_with(|c: char| c.is_ascii_digit())
            || !limit
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == ' ')
        {
            return Err(VaultError::InvalidInput(format!(
                "memory_limit {:?} is not a size",
                self.memory_limit
            )));
        }
        if self.threads == 0 {
            return Err(VaultError::InvalidInput("threads must be at least 1".into()));
        }
        if self.default_session_ttl_secs <= 0 || self.max_session_ttl_secs <= 0 {
            return Err(VaultError::InvalidTtl);
        }
        if self.max_plaintext_len == 0 {
            return Err(VaultError::InvalidInput(
                "max_plaintext_len must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub(crate) fn plaintext_limit(&self) -> usize {
        self.max_plaintext_len.min(SECRET_PLAINTEXT_MAX_LENGTH)
    }
}
