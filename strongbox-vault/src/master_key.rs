//! Custody of the shared symmetric master key.
//!
//! The master key is never stored in the clear. The database holds one
//! *master key record* (version + check token) and one RSA-OAEP wrap per
//! active user. The check token is a fixed plaintext encrypted under the
//! master key: decrypting it proves a caller-supplied key is the current one.
//!
//! Every consumer of the master key holds the slot's read guard while it
//! works; rotation holds the write guard, so nobody observes a half-rotated
//! state. Lock order is always slot, then database connection.

use crate::clock::Clock;
use crate::db::{Database, in_transaction, optional};
use crate::error::{VaultError, VaultResult};
use crate::user_keys::{Principal, fetch_user_key, store_wrap};
use duckdb::{Connection, params};
use std::fmt;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use strongbox_crypto::{
    EncryptedData, SymmetricKey, decrypt, encrypt, generate_random_key, parse_private_key,
    parse_public_key, reencrypt_secret, unwrap_key, wrap_key,
};
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

/// Verification token: a known plaintext encrypted with the master key.
const VERIFICATION_PLAINTEXT: &[u8] = b"strongbox-master-key-verification-v1";

/// An unwrapped master key, tagged with the version it belongs to.
///
/// Lives for a single operation. Not `Clone`; the key bytes zeroize on drop.
pub struct MasterKey {
    key: SymmetricKey,
    version: i64,
}

impl MasterKey {
    /// Pairs raw key material with a version. The vault checks both against
    /// the stored check token before using the key for anything.
    pub fn from_key(key: SymmetricKey, version: i64) -> Self {
        Self { key, version }
    }

    pub fn version(&self) -> i64 {
        self.version
    }

    pub fn key(&self) -> &SymmetricKey {
        &self.key
    }
}

impl fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MasterKey")
            .field("version", &self.version)
            .field("key", &"[REDACTED]")
            .finish()
    }
}

pub(crate) struct SlotState {
    pub(crate) version: i64,
    check_token: EncryptedData,
}

impl SlotState {
    /// Confirms `key` is the current master key.
    pub(crate) fn verify(&self, key: &MasterKey) -> VaultResult<()> {
        if key.version != self.version {
            return Err(VaultError::StaleMasterKey);
        }
        let plaintext = Zeroizing::new(
            decrypt(&key.key, &self.check_token).map_err(|_| VaultError::DecryptionFailure)?,
        );
        if plaintext.as_slice() != VERIFICATION_PLAINTEXT {
            return Err(VaultError::DecryptionFailure);
        }
        Ok(())
    }
}

/// Shared, guarded view of the master key record.
#[derive(Clone)]
pub(crate) struct MasterKeySlot(Arc<RwLock<Option<SlotState>>>);

impl MasterKeySlot {
    pub(crate) fn load(db: &Database) -> VaultResult<Self> {
        let conn = db.lock()?;
        let row = optional(conn.query_row(
            "SELECT version, check_token FROM master_key WHERE id = 1",
            [],
            |row| Ok((row.get::<_, i64>(0)?, row.get::<_, Vec<u8>>(1)?)),
        ))?;
        let state = match row {
            Some((version, token)) => Some(SlotState {
                version,
                check_token: serde_json::from_slice(&token)?,
            }),
            None => None,
        };
        Ok(Self(Arc::new(RwLock::new(state))))
    }

    pub(crate) fn read(&self) -> VaultResult<RwLockReadGuard<'_, Option<SlotState>>> {
        self.0
            .read()
            .map_err(|e| VaultError::Storage(e.to_string()))
    }

    fn write(&self) -> VaultResult<RwLockWriteGuard<'_, Option<SlotState>>> {
        self.0
            .write()
            .map_err(|e| VaultError::Storage(e.to_string()))
    }
}

/// Unwraps the master key for `owner` with their RSA private key.
///
/// Returns the key together with the user's current generation. The caller
/// must hold the slot read guard that produced `state`.
pub(crate) fn unwrap_with_state(
    db: &Database,
    state: &SlotState,
    owner: &str,
    private_key: &str,
) -> VaultResult<(MasterKey, i64)> {
    let private = parse_private_key(private_key)?;

    let user = {
        let conn = db.lock()?;
        fetch_user_key(&conn, owner)?
    }
    .ok_or_else(|| VaultError::NotFound(format!("user key for {owner}")))?;

    let wrapped = match (&user.wrapped_master_key, user.is_active) {
        (Some(wrapped), true) => wrapped,
        _ => return Err(VaultError::Inactive(owner.to_string())),
    };

    let key = unwrap_key(wrapped, &private)?;
    let master = MasterKey {
        key,
        version: state.version,
    };
    // A wrap that opens but is not the current key is as good as a wrong key.
    state
        .verify(&master)
        .map_err(|_| VaultError::DecryptionFailure)?;
    Ok((master, user.generation))
}

/// Generates, rotates and unwraps the master key.
pub struct MasterKeyManager {
    db: Database,
    slot: MasterKeySlot,
    clock: Arc<dyn Clock>,
}

impl MasterKeyManager {
    pub(crate) fn new(db: Database, slot: MasterKeySlot, clock: Arc<dyn Clock>) -> Self {
        Self { db, slot, clock }
    }

    /// Whether a master key has been generated.
    pub fn exists(&self) -> VaultResult<bool> {
        Ok(self.slot.read()?.is_some())
    }

    /// Version of the current master key, if any.
    pub fn current_version(&self) -> VaultResult<Option<i64>> {
        Ok(self.slot.read()?.as_ref().map(|s| s.version))
    }

    /// Generates the deployment's master key. Fails if one already exists.
    ///
    /// The returned key is not wrapped for anyone yet; activate at least one
    /// user with it or it is lost when dropped.
    pub fn generate(&self) -> VaultResult<MasterKey> {
        self.generate_inner(None)
    }

    /// Generates the master key and activates `owner` with it in one
    /// transaction. On failure nothing is written and the call can be
    /// retried. `owner` must already be registered.
    pub(crate) fn generate_for(&self, owner: &str) -> VaultResult<MasterKey> {
        self.generate_inner(Some(owner))
    }

    fn generate_inner(&self, first_holder: Option<&str>) -> VaultResult<MasterKey> {
        let mut slot = self.slot.write()?;
        if slot.is_some() {
            return Err(VaultError::MasterKeyExists);
        }

        let master = MasterKey {
            key: generate_random_key(),
            version: 1,
        };
        let check_token = encrypt(&master.key, VERIFICATION_PLAINTEXT)?;
        let token_bytes = serde_json::to_vec(&check_token)?;
        let now = self.clock.now().timestamp_millis();

        let conn = self.db.lock()?;
        in_transaction(&conn, |conn| {
            conn.execute(
                "INSERT INTO master_key (id, version, check_token, created_at) VALUES (1, 1, ?, ?)",
                params![token_bytes, now],
            )?;
            if let Some(owner) = first_holder {
                store_wrap(conn, owner, &master, now)?;
            }
            Ok(())
        })?;

        *slot = Some(SlotState {
            version: 1,
            check_token,
        });
        match first_holder {
            Some(owner) => info!("generated master key (version 1), first holder {owner}"),
            None => info!("generated master key (version 1)"),
        }
        Ok(master)
    }

    /// Replaces the master key with `new_key`.
    ///
    /// In one transaction: re-wraps the key for every active user,
    /// re-encrypts every secret, drops every session and bumps the version.
    /// Any failure rolls everything back and returns
    /// [`VaultError::RotationAborted`]. Only admins may rotate.
    pub fn rotate(
        &self,
        current: &MasterKey,
        new_key: SymmetricKey,
        admin: &Principal,
    ) -> VaultResult<MasterKey> {
        if !admin.is_admin {
            return Err(VaultError::PermissionDenied(format!(
                "{} may not rotate the master key",
                admin.username
            )));
        }

        let mut slot = self.slot.write()?;
        let state = slot.as_ref().ok_or(VaultError::NoMasterKey)?;
        state.verify(current)?;

        let next = MasterKey {
            key: new_key,
            version: state.version + 1,
        };
        let check_token = encrypt(&next.key, VERIFICATION_PLAINTEXT)?;
        let token_bytes = serde_json::to_vec(&check_token)?;
        let now = self.clock.now().timestamp_millis();

        let conn = self.db.lock()?;
        let (users, secrets) = in_transaction(&conn, |conn| {
            let users = rewrap_active_users(conn, &next, now)?;
            let secrets = reencrypt_secrets(conn, current, &next)?;
            conn.execute("DELETE FROM session_keys", [])?;
            conn.execute(
                "UPDATE master_key SET version = ?, check_token = ?, rotated_at = ? WHERE id = 1",
                params![next.version, token_bytes, now],
            )?;
            Ok((users, secrets))
        })
        .map_err(|e| {
            warn!("master key rotation aborted: {e}");
            VaultError::RotationAborted(e.to_string())
        })?;

        *slot = Some(SlotState {
            version: next.version,
            check_token,
        });
        info!(
            "rotated master key to version {} ({users} users re-wrapped, {secrets} secrets re-encrypted)",
            next.version
        );
        Ok(next)
    }

    /// Returns the master key wrapped for `owner`, unwrapped with their
    /// private key.
    ///
    /// Unknown users fail with `NotFound`, inactive ones with `Inactive`, and
    /// a key that does not open the wrap with `DecryptionFailure`.
    pub fn unwrap_for(&self, owner: &str, private_key: &str) -> VaultResult<MasterKey> {
        let slot = self.slot.read()?;
        let state = slot.as_ref().ok_or(VaultError::NoMasterKey)?;
        let (master, _) = unwrap_with_state(&self.db, state, owner, private_key)?;
        debug!("unwrapped master key for {owner}");
        Ok(master)
    }
}

fn rewrap_active_users(conn: &Connection, next: &MasterKey, now: i64) -> VaultResult<usize> {
    let active: Vec<(String, String)> = {
        let mut stmt = conn.prepare(
            "SELECT owner, public_key FROM user_keys WHERE is_active ORDER BY owner",
        )?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        rows
    };

    for (owner, public_key) in &active {
        let public = parse_public_key(public_key)?;
        let wrapped = wrap_key(&next.key, &public)?;
        conn.execute(
            "UPDATE user_keys SET wrapped_master_key = ?, master_key_version = ?, modified_at = ?
             WHERE owner = ?",
            params![wrapped, next.version, now, owner],
        )?;
    }
    Ok(active.len())
}

fn reencrypt_secrets(conn: &Connection, current: &MasterKey, next: &MasterKey) -> VaultResult<usize> {
    let rows: Vec<(String, Vec<u8>, Vec<u8>)> = {
        let mut stmt = conn.prepare("SELECT id, ciphertext, nonce FROM secrets ORDER BY id")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        rows
    };

    for (id, ciphertext, nonce) in &rows {
        let sealed = reencrypt_secret(&current.key, &next.key, ciphertext, nonce)
            .map_err(|e| VaultError::Storage(format!("secret {id}: {e}")))?;
        conn.execute(
            "UPDATE secrets SET ciphertext = ?, nonce = ? WHERE id = ?",
            params![sealed.ciphertext, sealed.nonce.to_vec(), id],
        )?;
    }
    Ok(rows.len())
}
