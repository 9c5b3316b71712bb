//! Per-user RSA public keys and their copies of the master key.

use crate::clock::Clock;
use crate::db::{Database, from_millis, optional};
use crate::error::{VaultError, VaultResult};
use crate::master_key::{MasterKey, MasterKeySlot};
use chrono::{DateTime, Utc};
use duckdb::{Connection, Row, params};
use std::sync::Arc;
use strongbox_crypto::{RsaKeyPair, parse_public_key, wrap_key};
use tracing::{debug, info, warn};

/// Who is asking. Activation and rotation are admin-only.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Principal {
    pub username: String,
    pub is_admin: bool,
}

impl Principal {
    pub fn admin(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            is_admin: true,
        }
    }

    pub fn user(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            is_admin: false,
        }
    }
}

/// A user's registered public key and, once activated, their wrapped copy
/// of the master key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UserKey {
    pub owner: String,
    /// SPKI PEM, normalised on registration.
    pub public_key: String,
    /// RSA-OAEP wrap of the master key. Present exactly when active.
    pub wrapped_master_key: Option<Vec<u8>>,
    pub master_key_version: Option<i64>,
    pub is_active: bool,
    /// Bumped on every register and deactivate. Sessions opened under an
    /// older generation are dead.
    pub generation: i64,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

const USER_KEY_COLUMNS: &str = "owner, public_key, wrapped_master_key, master_key_version, \
     is_active, generation, created_at, modified_at";

type RawUserKey = (
    String,
    String,
    Option<Vec<u8>>,
    Option<i64>,
    bool,
    i64,
    i64,
    i64,
);

fn raw_user_key(row: &Row<'_>) -> duckdb::Result<RawUserKey> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
    ))
}

fn into_user_key(raw: RawUserKey) -> VaultResult<UserKey> {
    let (owner, public_key, wrapped, version, is_active, generation, created, modified) = raw;
    Ok(UserKey {
        owner,
        public_key,
        wrapped_master_key: wrapped,
        master_key_version: version,
        is_active,
        generation,
        created_at: from_millis(created)?,
        modified_at: from_millis(modified)?,
    })
}

pub(crate) fn fetch_user_key(conn: &Connection, owner: &str) -> VaultResult<Option<UserKey>> {
    optional(conn.query_row(
        &format!("SELECT {USER_KEY_COLUMNS} FROM user_keys WHERE owner = ?"),
        params![owner],
        raw_user_key,
    ))?
    .map(into_user_key)
    .transpose()
}

/// Wraps `master_key` under `owner`'s stored public key and marks the key
/// active.
pub(crate) fn store_wrap(
    conn: &Connection,
    owner: &str,
    master_key: &MasterKey,
    now: i64,
) -> VaultResult<()> {
    let user = fetch_user_key(conn, owner)?
        .ok_or_else(|| VaultError::NotFound(format!("user key for {owner}")))?;
    let public = parse_public_key(&user.public_key)?;
    let wrapped = wrap_key(master_key.key(), &public)?;
    conn.execute(
        "UPDATE user_keys SET wrapped_master_key = ?, master_key_version = ?,
            is_active = TRUE, modified_at = ?
         WHERE owner = ?",
        params![wrapped, master_key.version(), now, owner],
    )?;
    Ok(())
}

fn count_active(conn: &Connection) -> VaultResult<i64> {
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM user_keys WHERE is_active",
        [],
        |row| row.get(0),
    )?)
}

/// Stores user public keys and manages activation.
///
/// Never holds an unwrapped master key beyond the `activate` call that was
/// handed one.
pub struct UserKeyStore {
    db: Database,
    slot: MasterKeySlot,
    clock: Arc<dyn Clock>,
}

impl UserKeyStore {
    pub(crate) fn new(db: Database, slot: MasterKeySlot, clock: Arc<dyn Clock>) -> Self {
        Self { db, slot, clock }
    }

    /// Registers (or replaces) `owner`'s public key.
    ///
    /// The key is validated first. The stored key always ends up inactive
    /// with no wrap; replacing an active key requires re-activation. The
    /// only active key cannot be replaced.
    pub fn register(&self, owner: &str, public_key: &str) -> VaultResult<UserKey> {
        if owner.trim().is_empty() {
            return Err(VaultError::InvalidInput("owner must not be empty".into()));
        }
        let normalised = RsaKeyPair::public_only(public_key)?;
        let now = self.clock.now().timestamp_millis();

        let conn = self.db.lock()?;
        match fetch_user_key(&conn, owner)? {
            Some(existing) => {
                if existing.is_active && count_active(&conn)? == 1 {
                    warn!("refused to replace the only active user key ({owner})");
                    return Err(VaultError::LastActiveKey(owner.to_string()));
                }
                conn.execute(
                    "UPDATE user_keys SET public_key = ?, wrapped_master_key = NULL,
                        master_key_version = NULL, is_active = FALSE,
                        generation = generation + 1, modified_at = ?
                     WHERE owner = ?",
                    params![normalised.public_key_pem(), now, owner],
                )?;
                conn.execute("DELETE FROM session_keys WHERE owner = ?", params![owner])?;
                info!("replaced user key for {owner}");
            }
            None => {
                conn.execute(
                    "INSERT INTO user_keys (owner, public_key, is_active, generation, created_at, modified_at)
                     VALUES (?, ?, FALSE, 1, ?, ?)",
                    params![owner, normalised.public_key_pem(), now, now],
                )?;
                info!("registered user key for {owner}");
            }
        }

        fetch_user_key(&conn, owner)?
            .ok_or_else(|| VaultError::Storage(format!("user key for {owner} vanished")))
    }

    /// Grants `owner` access by wrapping the current master key under their
    /// public key. Admin only. Re-activating re-wraps.
    pub fn activate(
        &self,
        owner: &str,
        master_key: &MasterKey,
        admin: &Principal,
    ) -> VaultResult<UserKey> {
        if !admin.is_admin {
            return Err(VaultError::PermissionDenied(format!(
                "{} may not activate user keys",
                admin.username
            )));
        }

        let slot = self.slot.read()?;
        let state = slot.as_ref().ok_or(VaultError::NoMasterKey)?;
        state.verify(master_key)?;

        let conn = self.db.lock()?;
        store_wrap(&conn, owner, master_key, self.clock.now().timestamp_millis())?;
        info!(
            "activated user key for {owner} (master key version {}, by {})",
            master_key.version(),
            admin.username
        );

        fetch_user_key(&conn, owner)?
            .ok_or_else(|| VaultError::Storage(format!("user key for {owner} vanished")))
    }

    /// Revokes `owner`'s access: drops the wrap and kills their session.
    /// The only active key cannot be deactivated.
    pub fn deactivate(&self, owner: &str) -> VaultResult<UserKey> {
        let now = self.clock.now().timestamp_millis();
        let conn = self.db.lock()?;
        let existing = fetch_user_key(&conn, owner)?
            .ok_or_else(|| VaultError::NotFound(format!("user key for {owner}")))?;
        if existing.is_active && count_active(&conn)? == 1 {
            warn!("refused to deactivate the only active user key ({owner})");
            return Err(VaultError::LastActiveKey(owner.to_string()));
        }
        conn.execute(
            "UPDATE user_keys SET wrapped_master_key = NULL, master_key_version = NULL,
                is_active = FALSE, generation = generation + 1, modified_at = ?
             WHERE owner = ?",
            params![now, owner],
        )?;
        conn.execute("DELETE FROM session_keys WHERE owner = ?", params![owner])?;
        info!("deactivated user key for {owner}");

        fetch_user_key(&conn, owner)?
            .ok_or_else(|| VaultError::Storage(format!("user key for {owner} vanished")))
    }

    /// Deletes `owner`'s key and session. The only active key cannot be removed.
    pub fn remove(&self, owner: &str) -> VaultResult<()> {
        let conn = self.db.lock()?;
        let existing = fetch_user_key(&conn, owner)?
            .ok_or_else(|| VaultError::NotFound(format!("user key for {owner}")))?;
        if existing.is_active && count_active(&conn)? == 1 {
            warn!("refused to remove the only active user key ({owner})");
            return Err(VaultError::LastActiveKey(owner.to_string()));
        }
        conn.execute("DELETE FROM session_keys WHERE owner = ?", params![owner])?;
        conn.execute("DELETE FROM user_keys WHERE owner = ?", params![owner])?;
        info!("removed user key for {owner}");
        Ok(())
    }

    pub fn get(&self, owner: &str) -> VaultResult<Option<UserKey>> {
        let conn = self.db.lock()?;
        fetch_user_key(&conn, owner)
    }

    /// All registered keys, ordered by owner.
    pub fn list(&self) -> VaultResult<Vec<UserKey>> {
        self.query_many(&format!(
            "SELECT {USER_KEY_COLUMNS} FROM user_keys ORDER BY owner"
        ))
    }

    /// Keys currently holding a wrap of the master key, ordered by owner.
    pub fn list_active(&self) -> VaultResult<Vec<UserKey>> {
        self.query_many(&format!(
            "SELECT {USER_KEY_COLUMNS} FROM user_keys WHERE is_active ORDER BY owner"
        ))
    }

    fn query_many(&self, sql: &str) -> VaultResult<Vec<UserKey>> {
        let conn = self.db.lock()?;
        let mut stmt = conn.prepare(sql)?;
        let raw = stmt
            .query_map([], raw_user_key)?
            .collect::<Result<Vec<_>, _>>()?;
        debug!("listed {} user keys", raw.len());
        raw.into_iter().map(into_user_key).collect()
    }
}
