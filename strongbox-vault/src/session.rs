//! Short-lived session keys.
//!
//! Opening a session proves possession of the user's RSA private key once.
//! The master key is then re-wrapped under a fresh random session key, which
//! only the client keeps. The database stores the re-wrapped master key and
//! an Argon2id verifier of the session key, never the session key itself.

use crate::clock::Clock;
use crate::config::VaultConfig;
use crate::db::{Database, from_millis, optional};
use crate::error::{VaultError, VaultResult};
use crate::master_key::{MasterKey, MasterKeySlot, unwrap_with_state};
use crate::user_keys::fetch_user_key;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Duration, Utc};
use duckdb::params;
use std::sync::Arc;
use strongbox_crypto::{
    EncryptedData, SymmetricKey, decrypt_with_aad, encrypt_with_aad, generate_random_key,
    hash_key_material, verify_key_material,
};
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

/// The client-held half of a session. Whoever holds it can use the master
/// key until the session ends.
#[derive(Clone, Debug)]
pub struct SessionKey(SymmetricKey);

impl SessionKey {
    /// Encodes the key for transport (e.g. a cookie or header).
    pub fn to_base64(&self) -> Zeroizing<String> {
        Zeroizing::new(STANDARD.encode(self.0.as_bytes()))
    }

    pub fn from_base64(encoded: &str) -> VaultResult<Self> {
        let bytes = Zeroizing::new(
            STANDARD
                .decode(encoded.trim())
                .map_err(|_| VaultError::InvalidInput("session key is not valid base64".into()))?,
        );
        SymmetricKey::from_slice(&bytes)
            .map(Self)
            .map_err(|_| VaultError::InvalidInput("session key has the wrong length".into()))
    }

    fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

/// A freshly opened session, as handed back to the client.
#[derive(Debug)]
pub struct Session {
    owner: String,
    key: SessionKey,
    wrapped_master_key: EncryptedData,
    expires_at: DateTime<Utc>,
}

impl Session {
    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    /// The master key sealed under the session key (owner bound as AAD).
    pub fn wrapped_master_key(&self) -> &EncryptedData {
        &self.wrapped_master_key
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }
}

struct SessionRow {
    wrapped: Vec<u8>,
    nonce: Vec<u8>,
    key_hash: String,
    master_key_version: i64,
    user_generation: i64,
    expires_at: i64,
}

/// Opens, resolves and closes sessions.
pub struct SessionKeyManager {
    db: Database,
    slot: MasterKeySlot,
    config: VaultConfig,
    clock: Arc<dyn Clock>,
}

impl SessionKeyManager {
    pub(crate) fn new(
        db: Database,
        slot: MasterKeySlot,
        config: VaultConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            db,
            slot,
            config,
            clock,
        }
    }

    /// Opens a session for `owner`, replacing any existing one.
    ///
    /// `ttl` defaults to the configured lifetime and is clamped to the
    /// configured maximum. The private key is used to unwrap the master key
    /// and then dropped.
    pub fn open_session(
        &self,
        owner: &str,
        private_key: &str,
        ttl: Option<Duration>,
    ) -> VaultResult<Session> {
        let ttl = self.resolve_ttl(ttl)?;

        let slot = self.slot.read()?;
        let state = slot.as_ref().ok_or(VaultError::NoMasterKey)?;
        let (master, generation) = unwrap_with_state(&self.db, state, owner, private_key)?;

        let key = SessionKey(generate_random_key());
        let wrapped = encrypt_with_aad(&key.0, master.key().as_bytes(), owner.as_bytes())?;
        let key_hash = hash_key_material(key.as_bytes(), &self.config.session_kdf)?;

        let now = self.clock.now();
        let expires_at = now
            .checked_add_signed(ttl)
            .ok_or(VaultError::InvalidTtl)?;

        let conn = self.db.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO session_keys
                (owner, wrapped_master_key, nonce, key_hash, master_key_version,
                 user_generation, created_at, expires_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                owner,
                wrapped.ciphertext,
                wrapped.nonce.to_vec(),
                key_hash,
                master.version(),
                generation,
                now.timestamp_millis(),
                expires_at.timestamp_millis(),
            ],
        )?;
        info!("opened session for {owner} (expires {expires_at})");

        Ok(Session {
            owner: owner.to_string(),
            key,
            wrapped_master_key: wrapped,
            expires_at,
        })
    }

    /// Resolves a live session to the master key for one operation.
    ///
    /// `key` is checked before anything else about the session, so a wrong
    /// key gets `DecryptionFailure` whether the session is live, expired or
    /// invalidated. With the right key, fails with `SessionExpired` if the
    /// session has timed out or was invalidated by deactivation,
    /// re-registration or rotation. A missing session is `SessionExpired`.
    pub fn get_master_key(&self, owner: &str, key: &SessionKey) -> VaultResult<MasterKey> {
        let slot = self.slot.read()?;
        let state = slot.as_ref().ok_or(VaultError::SessionExpired)?;

        let row = {
            let conn = self.db.lock()?;
            optional(conn.query_row(
                "SELECT wrapped_master_key, nonce, key_hash, master_key_version,
                        user_generation, expires_at
                 FROM session_keys WHERE owner = ?",
                params![owner],
                |row| {
                    Ok(SessionRow {
                        wrapped: row.get(0)?,
                        nonce: row.get(1)?,
                        key_hash: row.get(2)?,
                        master_key_version: row.get(3)?,
                        user_generation: row.get(4)?,
                        expires_at: row.get(5)?,
                    })
                },
            ))?
            .ok_or(VaultError::SessionExpired)?
        };

        // Argon2 runs outside the database lock.
        if !verify_key_material(key.as_bytes(), &row.key_hash)? {
            return Err(VaultError::DecryptionFailure);
        }

        {
            let conn = self.db.lock()?;
            let expired = self.clock.now().timestamp_millis() >= row.expires_at;
            let user_current = fetch_user_key(&conn, owner)?
                .is_some_and(|u| u.is_active && u.generation == row.user_generation);
            if expired || !user_current || row.master_key_version != state.version {
                // Only the row that was verified; a newer session stays.
                conn.execute(
                    "DELETE FROM session_keys WHERE owner = ? AND key_hash = ?",
                    params![owner, row.key_hash],
                )?;
                if expired {
                    debug!("session for {owner} expired");
                } else {
                    debug!("session for {owner} invalidated");
                }
                return Err(VaultError::SessionExpired);
            }
        }

        let sealed = EncryptedData::from_parts(&row.nonce, row.wrapped)?;
        let bytes = Zeroizing::new(decrypt_with_aad(&key.0, &sealed, owner.as_bytes())?);
        let master_key =
            SymmetricKey::from_slice(&bytes).map_err(|_| VaultError::DecryptionFailure)?;

        Ok(MasterKey::from_key(master_key, row.master_key_version))
    }

    /// Ends `owner`'s session. Returns whether one existed.
    pub fn close_session(&self, owner: &str) -> VaultResult<bool> {
        let conn = self.db.lock()?;
        let removed = conn.execute("DELETE FROM session_keys WHERE owner = ?", params![owner])?;
        if removed > 0 {
            info!("closed session for {owner}");
        }
        Ok(removed > 0)
    }

    /// Whether `owner` has an unexpired session row.
    pub fn is_open(&self, owner: &str) -> VaultResult<bool> {
        let conn = self.db.lock()?;
        let expires_at: Option<i64> = optional(conn.query_row(
            "SELECT expires_at FROM session_keys WHERE owner = ?",
            params![owner],
            |row| row.get(0),
        ))?;
        Ok(expires_at.is_some_and(|t| self.clock.now().timestamp_millis() < t))
    }

    /// Expiry timestamp of `owner`'s session, if one exists.
    pub fn expires_at(&self, owner: &str) -> VaultResult<Option<DateTime<Utc>>> {
        let conn = self.db.lock()?;
        let expires_at: Option<i64> = optional(conn.query_row(
            "SELECT expires_at FROM session_keys WHERE owner = ?",
            params![owner],
            |row| row.get(0),
        ))?;
        expires_at.map(from_millis).transpose()
    }

    /// Deletes every expired session. Returns how many were removed.
    pub fn purge_expired(&self) -> VaultResult<usize> {
        let now = self.clock.now().timestamp_millis();
        let conn = self.db.lock()?;
        let removed = conn.execute(
            "DELETE FROM session_keys WHERE expires_at <= ?",
            params![now],
        )?;
        debug!("purged {removed} expired sessions");
        Ok(removed)
    }

    /// A configured maximum too large to represent is no cap at all; the
    /// expiry computation still refuses lifetimes that overflow.
    fn resolve_ttl(&self, requested: Option<Duration>) -> VaultResult<Duration> {
        if self.config.max_session_ttl_secs <= 0 {
            return Err(VaultError::InvalidTtl);
        }
        let max = Duration::try_seconds(self.config.max_session_ttl_secs);
        let ttl = match requested {
            Some(ttl) => ttl,
            None => Duration::try_seconds(self.config.default_session_ttl_secs)
                .ok_or(VaultError::InvalidTtl)?,
        };
        if ttl <= Duration::zero() {
            return Err(VaultError::InvalidTtl);
        }
        match max {
            Some(max) if ttl > max => {
                warn!(
                    "session lifetime of {}s clamped to {}s",
                    ttl.num_seconds(),
                    max.num_seconds()
                );
                Ok(max)
            }
            _ => Ok(ttl),
        }
    }
}
