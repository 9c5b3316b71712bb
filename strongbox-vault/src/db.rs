//! DuckDB connection handling and schema.

use crate::config::VaultConfig;
use crate::error::{VaultError, VaultResult};
use chrono::{DateTime, Utc};
use duckdb::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, warn};

/// A shared DuckDB connection. Cloning shares the connection.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Opens (or creates) a database file and ensures the schema exists.
    ///
    /// A stale WAL left behind by a crash can make DuckDB refuse to open; in
    /// that case the WAL is removed and the open retried once.
    pub fn open(path: &Path, config: &VaultConfig) -> VaultResult<Self> {
        config.validate()?;
        let conn = match Connection::open(path) {
            Ok(c) => c,
            Err(first_err) => {
                let wal_path = path.with_extension(
                    path.extension()
                        .map(|ext| format!("{}.wal", ext.to_string_lossy()))
                        .unwrap_or_else(|| "wal".to_string()),
                );
                if !wal_path.exists() || std::fs::remove_file(&wal_path).is_err() {
                    return Err(first_err.into());
                }
                warn!(
                    "DuckDB open failed, removed stale WAL and retrying: {}",
                    wal_path.display()
                );
                Connection::open(path)?
            }
        };
        conn.execute_batch(&format!(
            "PRAGMA memory_limit='{}'; PRAGMA threads={};",
            config.memory_limit.trim(),
            config.threads
        ))?;
        Self::with_connection(conn)
    }

    /// Opens a private in-memory database. Contents vanish on drop.
    pub fn open_in_memory() -> VaultResult<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> VaultResult<Self> {
        conn.execute_batch(SCHEMA)?;
        debug!("vault schema ready");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub(crate) fn lock(&self) -> VaultResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| VaultError::Storage(e.to_string()))
    }
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS master_key (
    id INTEGER PRIMARY KEY,
    version BIGINT NOT NULL,
    check_token BLOB NOT NULL,
    created_at BIGINT NOT NULL,
    rotated_at BIGINT
);
CREATE TABLE IF NOT EXISTS user_keys (
    owner VARCHAR PRIMARY KEY,
    public_key VARCHAR NOT NULL,
    wrapped_master_key BLOB,
    master_key_version BIGINT,
    is_active BOOLEAN NOT NULL DEFAULT FALSE,
    generation BIGINT NOT NULL DEFAULT 1,
    created_at BIGINT NOT NULL,
    modified_at BIGINT NOT NULL
);
CREATE TABLE IF NOT EXISTS session_keys (
    owner VARCHAR PRIMARY KEY,
    wrapped_master_key BLOB NOT NULL,
    nonce BLOB NOT NULL,
    key_hash VARCHAR NOT NULL,
    master_key_version BIGINT NOT NULL,
    user_generation BIGINT NOT NULL,
    created_at BIGINT NOT NULL,
    expires_at BIGINT NOT NULL
);
CREATE TABLE IF NOT EXISTS secrets (
    id VARCHAR PRIMARY KEY,
    device VARCHAR NOT NULL,
    role VARCHAR NOT NULL,
    name VARCHAR NOT NULL,
    ciphertext BLOB NOT NULL,
    nonce BLOB NOT NULL,
    state VARCHAR NOT NULL,
    created_at BIGINT NOT NULL,
    modified_at BIGINT NOT NULL,
    UNIQUE (device, role, name)
);
";

/// Runs `f` inside a transaction, committing on `Ok` and rolling back on `Err`.
pub(crate) fn in_transaction<T>(
    conn: &Connection,
    f: impl FnOnce(&Connection) -> VaultResult<T>,
) -> VaultResult<T> {
    conn.execute_batch("BEGIN TRANSACTION")?;
    match f(conn) {
        Ok(value) => {
            if let Err(e) = conn.execute_batch("COMMIT") {
                let _ = conn.execute_batch("ROLLBACK");
                return Err(e.into());
            }
            Ok(value)
        }
        Err(e) => {
            let _ = conn.execute_batch("ROLLBACK");
            Err(e)
        }
    }
}

/// Maps a `query_row` result to `None` when no row matched.
pub(crate) fn optional<T>(result: duckdb::Result<T>) -> VaultResult<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(duckdb::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub(crate) fn is_constraint_violation(err: &duckdb::Error) -> bool {
    let msg = err.to_string();
    msg.contains("Duplicate key") || msg.contains("Constraint Error")
}

pub(crate) fn from_millis(ms: i64) -> VaultResult<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| VaultError::Storage(format!("timestamp out of range: {ms}")))
}
