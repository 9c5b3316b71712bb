//! Encrypted secret records.
//!
//! A secret is identified by (device, role, name), which is unique. The
//! plaintext is encrypted under the master key before it reaches the
//! database and is only ever returned from [`SecretStore::decrypt`].

use crate::clock::Clock;
use crate::config::VaultConfig;
use crate::db::{Database, from_millis, in_transaction, is_constraint_violation, optional};
use crate::error::{VaultError, VaultResult};
use crate::master_key::{MasterKey, MasterKeySlot};
use chrono::{DateTime, Utc};
use duckdb::{Connection, Row, params};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use strongbox_crypto::{EncryptedData, decrypt_secret, encrypt_secret};
use tracing::{debug, info};
use uuid::Uuid;
use zeroize::Zeroizing;

/// Lifecycle of a secret record. `Deleted` is terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SecretState {
    Draft,
    Stored,
    Updated,
    Deleted,
}

impl SecretState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Stored => "stored",
            Self::Updated => "updated",
            Self::Deleted => "deleted",
        }
    }

    fn parse(s: &str) -> VaultResult<Self> {
        match s {
            "draft" => Ok(Self::Draft),
            "stored" => Ok(Self::Stored),
            "updated" => Ok(Self::Updated),
            "deleted" => Ok(Self::Deleted),
            other => Err(VaultError::Storage(format!("unknown secret state: {other}"))),
        }
    }
}

/// A secret that has not been stored yet.
pub struct SecretDraft {
    device: String,
    role: String,
    name: String,
    plaintext: Zeroizing<String>,
}

impl SecretDraft {
    /// Validates a new secret. Every field, the plaintext included, must be
    /// non-empty.
    pub fn new(
        device: impl Into<String>,
        role: impl Into<String>,
        name: impl Into<String>,
        plaintext: impl Into<String>,
    ) -> VaultResult<Self> {
        let draft = Self {
            device: required("device", device.into())?,
            role: required("role", role.into())?,
            name: required("name", name.into())?,
            plaintext: Zeroizing::new(plaintext.into()),
        };
        if draft.plaintext.is_empty() {
            return Err(VaultError::InvalidInput("plaintext must not be empty".into()));
        }
        Ok(draft)
    }

    pub fn state(&self) -> SecretState {
        SecretState::Draft
    }

    fn identity(&self) -> (&str, &str, &str) {
        (&self.device, &self.role, &self.name)
    }
}

impl fmt::Debug for SecretDraft {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretDraft")
            .field("device", &self.device)
            .field("role", &self.role)
            .field("name", &self.name)
            .field("plaintext", &"[REDACTED]")
            .finish()
    }
}

fn required(field: &str, value: String) -> VaultResult<String> {
    if value.trim().is_empty() {
        return Err(VaultError::InvalidInput(format!("{field} must not be empty")));
    }
    Ok(value)
}

/// Changes to apply to a stored secret. Unset fields are left alone; an
/// update without plaintext leaves the ciphertext untouched.
#[derive(Default)]
pub struct SecretUpdate {
    device: Option<String>,
    role: Option<String>,
    name: Option<String>,
    plaintext: Option<Zeroizing<String>>,
}

impl SecretUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn device(mut self, device: impl Into<String>) -> Self {
        self.device = Some(device.into());
        self
    }

    pub fn role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn plaintext(mut self, plaintext: impl Into<String>) -> Self {
        self.plaintext = Some(Zeroizing::new(plaintext.into()));
        self
    }
}

/// A stored secret: ciphertext plus the metadata that identifies it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SecretRecord {
    pub id: Uuid,
    pub device: String,
    pub role: String,
    pub name: String,
    pub ciphertext: Vec<u8>,
    pub nonce: Vec<u8>,
    pub state: SecretState,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

const SECRET_COLUMNS: &str =
    "id, device, role, name, ciphertext, nonce, state, created_at, modified_at";

type RawSecret = (
    String,
    String,
    String,
    String,
    Vec<u8>,
    Vec<u8>,
    String,
    i64,
    i64,
);

fn raw_secret(row: &Row<'_>) -> duckdb::Result<RawSecret> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
        row.get(8)?,
    ))
}

fn into_record(raw: RawSecret) -> VaultResult<SecretRecord> {
    let (id, device, role, name, ciphertext, nonce, state, created, modified) = raw;
    Ok(SecretRecord {
        id: Uuid::parse_str(&id).map_err(|e| VaultError::Storage(format!("secret id: {e}")))?,
        device,
        role,
        name,
        ciphertext,
        nonce,
        state: SecretState::parse(&state)?,
        created_at: from_millis(created)?,
        modified_at: from_millis(modified)?,
    })
}

fn fetch_by_id(conn: &Connection, id: Uuid) -> VaultResult<Option<SecretRecord>> {
    optional(conn.query_row(
        &format!("SELECT {SECRET_COLUMNS} FROM secrets WHERE id = ?"),
        params![id.to_string()],
        raw_secret,
    ))?
    .map(into_record)
    .transpose()
}

/// Id of another record already using (device, role, name), if any.
fn conflicting_id(
    conn: &Connection,
    (device, role, name): (&str, &str, &str),
    except: Option<Uuid>,
) -> VaultResult<Option<String>> {
    let except = except.map(|id| id.to_string()).unwrap_or_default();
    optional(conn.query_row(
        "SELECT id FROM secrets WHERE device = ? AND role = ? AND name = ? AND id <> ?",
        params![device, role, name, except],
        |row| row.get(0),
    ))
}

fn uniqueness_violation((device, role, name): (&str, &str, &str)) -> VaultError {
    VaultError::UniquenessViolation {
        device: device.to_string(),
        role: role.to_string(),
        name: name.to_string(),
    }
}

/// Maps a failed write to `UniquenessViolation` when the UNIQUE index fired.
fn write_error(err: duckdb::Error, identity: (&str, &str, &str)) -> VaultError {
    if is_constraint_violation(&err) {
        uniqueness_violation(identity)
    } else {
        err.into()
    }
}

fn insert(
    conn: &Connection,
    draft: &SecretDraft,
    sealed: &EncryptedData,
    now: DateTime<Utc>,
) -> VaultResult<SecretRecord> {
    let identity = draft.identity();
    if conflicting_id(conn, identity, None)?.is_some() {
        return Err(uniqueness_violation(identity));
    }

    let id = Uuid::new_v4();
    let millis = now.timestamp_millis();
    conn.execute(
        "INSERT INTO secrets (id, device, role, name, ciphertext, nonce, state, created_at, modified_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        params![
            id.to_string(),
            draft.device,
            draft.role,
            draft.name,
            sealed.ciphertext,
            sealed.nonce.to_vec(),
            SecretState::Stored.as_str(),
            millis,
            millis,
        ],
    )
    .map_err(|e| write_error(e, identity))?;

    Ok(SecretRecord {
        id,
        device: draft.device.clone(),
        role: draft.role.clone(),
        name: draft.name.clone(),
        ciphertext: sealed.ciphertext.clone(),
        nonce: sealed.nonce.to_vec(),
        state: SecretState::Stored,
        created_at: from_millis(millis)?,
        modified_at: from_millis(millis)?,
    })
}

/// Creates, updates, deletes and decrypts secret records.
pub struct SecretStore {
    db: Database,
    slot: MasterKeySlot,
    config: VaultConfig,
    clock: Arc<dyn Clock>,
}

impl SecretStore {
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

    /// Encrypts and stores a new secret.
    ///
    /// The master key must be the current one. Fails with
    /// `UniquenessViolation` if (device, role, name) is taken.
    pub fn create(&self, draft: SecretDraft, master_key: &MasterKey) -> VaultResult<SecretRecord> {
        let sealed = encrypt_secret(
            master_key.key(),
            &draft.plaintext,
            self.config.plaintext_limit(),
        )?;

        let slot = self.slot.read()?;
        slot.as_ref()
            .ok_or(VaultError::NoMasterKey)?
            .verify(master_key)?;

        let conn = self.db.lock()?;
        let record = insert(&conn, &draft, &sealed, self.clock.now())?;
        info!(
            "stored secret {} ({}/{}/{})",
            record.id, record.device, record.role, record.name
        );
        Ok(record)
    }

    /// Stores many secrets at once. Either all are stored or none are.
    pub fn create_many(
        &self,
        drafts: Vec<SecretDraft>,
        master_key: &MasterKey,
    ) -> VaultResult<Vec<SecretRecord>> {
        let mut seen = HashSet::new();
        for draft in &drafts {
            if !seen.insert(draft.identity()) {
                return Err(uniqueness_violation(draft.identity()));
            }
        }

        let limit = self.config.plaintext_limit();
        let sealed = drafts
            .iter()
            .map(|d| encrypt_secret(master_key.key(), &d.plaintext, limit))
            .collect::<Result<Vec<_>, _>>()?;

        let slot = self.slot.read()?;
        slot.as_ref()
            .ok_or(VaultError::NoMasterKey)?
            .verify(master_key)?;

        let now = self.clock.now();
        let conn = self.db.lock()?;
        let records = in_transaction(&conn, |conn| {
            drafts
                .iter()
                .zip(&sealed)
                .map(|(draft, sealed)| insert(conn, draft, sealed, now))
                .collect::<VaultResult<Vec<_>>>()
        })?;
        info!("stored {} secrets in bulk", records.len());
        Ok(records)
    }

    /// Applies `update` to the secret `id`.
    ///
    /// Changing the plaintext requires the current master key
    /// (`MasterKeyRequired` otherwise). A supplied master key is always
    /// checked, so a stale one fails with `StaleMasterKey` even for
    /// metadata-only edits.
    pub fn update(
        &self,
        id: Uuid,
        update: SecretUpdate,
        master_key: Option<&MasterKey>,
    ) -> VaultResult<SecretRecord> {
        let device = update.device.map(|v| required("device", v)).transpose()?;
        let role = update.role.map(|v| required("role", v)).transpose()?;
        let name = update.name.map(|v| required("name", v)).transpose()?;

        let sealed = match (&update.plaintext, master_key) {
            (Some(_), None) => return Err(VaultError::MasterKeyRequired),
            (Some(p), Some(_)) if p.is_empty() => {
                return Err(VaultError::InvalidInput("plaintext must not be empty".into()));
            }
            (Some(p), Some(mk)) => Some(encrypt_secret(
                mk.key(),
                p,
                self.config.plaintext_limit(),
            )?),
            (None, _) => None,
        };

        let slot = self.slot.read()?;
        if let Some(mk) = master_key {
            slot.as_ref().ok_or(VaultError::NoMasterKey)?.verify(mk)?;
        }

        let conn = self.db.lock()?;
        let mut record = fetch_by_id(&conn, id)?
            .ok_or_else(|| VaultError::NotFound(format!("secret {id}")))?;

        let identity_changed = device.as_ref().is_some_and(|v| *v != record.device)
            || role.as_ref().is_some_and(|v| *v != record.role)
            || name.as_ref().is_some_and(|v| *v != record.name);
        if let Some(v) = device {
            record.device = v;
        }
        if let Some(v) = role {
            record.role = v;
        }
        if let Some(v) = name {
            record.name = v;
        }
        if let Some(sealed) = &sealed {
            record.ciphertext = sealed.ciphertext.clone();
            record.nonce = sealed.nonce.to_vec();
        }
        record.state = SecretState::Updated;
        let now = self.clock.now().timestamp_millis();
        record.modified_at = from_millis(now)?;

        let identity = (
            record.device.as_str(),
            record.role.as_str(),
            record.name.as_str(),
        );
        if identity_changed && conflicting_id(&conn, identity, Some(id))?.is_some() {
            return Err(uniqueness_violation(identity));
        }

        let id_str = id.to_string();
        let state = record.state.as_str();
        let result = match (identity_changed, sealed.is_some()) {
            (true, true) => conn.execute(
                "UPDATE secrets SET device = ?, role = ?, name = ?, ciphertext = ?, nonce = ?,
                    state = ?, modified_at = ?
                 WHERE id = ?",
                params![
                    record.device,
                    record.role,
                    record.name,
                    record.ciphertext,
                    record.nonce,
                    state,
                    now,
                    id_str
                ],
            ),
            (true, false) => conn.execute(
                "UPDATE secrets SET device = ?, role = ?, name = ?, state = ?, modified_at = ?
                 WHERE id = ?",
                params![record.device, record.role, record.name, state, now, id_str],
            ),
            (false, true) => conn.execute(
                "UPDATE secrets SET ciphertext = ?, nonce = ?, state = ?, modified_at = ?
                 WHERE id = ?",
                params![record.ciphertext, record.nonce, state, now, id_str],
            ),
            (false, false) => conn.execute(
                "UPDATE secrets SET state = ?, modified_at = ? WHERE id = ?",
                params![state, now, id_str],
            ),
        };
        result.map_err(|e| write_error(e, identity))?;

        info!("updated secret {id}");
        Ok(record)
    }

    /// Permanently deletes a secret. Returns the final record in the
    /// `Deleted` state.
    pub fn delete(&self, id: Uuid) -> VaultResult<SecretRecord> {
        let conn = self.db.lock()?;
        let mut record = fetch_by_id(&conn, id)?
            .ok_or_else(|| VaultError::NotFound(format!("secret {id}")))?;
        conn.execute("DELETE FROM secrets WHERE id = ?", params![id.to_string()])?;
        record.state = SecretState::Deleted;
        record.modified_at = self.clock.now();
        info!("deleted secret {id}");
        Ok(record)
    }

    pub fn get(&self, id: Uuid) -> VaultResult<Option<SecretRecord>> {
        let conn = self.db.lock()?;
        fetch_by_id(&conn, id)
    }

    /// Looks a secret up by its unique (device, role, name).
    pub fn find(&self, device: &str, role: &str, name: &str) -> VaultResult<Option<SecretRecord>> {
        let conn = self.db.lock()?;
        optional(conn.query_row(
            &format!(
                "SELECT {SECRET_COLUMNS} FROM secrets WHERE device = ? AND role = ? AND name = ?"
            ),
            params![device, role, name],
            raw_secret,
        ))?
        .map(into_record)
        .transpose()
    }

    /// All secrets of a device, ordered by role then name.
    pub fn list_for_device(&self, device: &str) -> VaultResult<Vec<SecretRecord>> {
        let conn = self.db.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {SECRET_COLUMNS} FROM secrets WHERE device = ? ORDER BY role, name"
        ))?;
        let raw = stmt
            .query_map(params![device], raw_secret)?
            .collect::<Result<Vec<_>, _>>()?;
        debug!("listed {} secrets for device {device}", raw.len());
        raw.into_iter().map(into_record).collect()
    }

    /// Decrypts a record's plaintext. The result zeroizes on drop.
    pub fn decrypt(
        &self,
        record: &SecretRecord,
        master_key: &MasterKey,
    ) -> VaultResult<Zeroizing<String>> {
        if record.state == SecretState::Deleted {
            return Err(VaultError::NotFound(format!("secret {}", record.id)));
        }
        Ok(decrypt_secret(
            master_key.key(),
            &record.ciphertext,
            &record.nonce,
        )?)
    }
}
