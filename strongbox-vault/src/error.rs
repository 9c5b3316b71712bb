//! Vault error types.

use strongbox_crypto::CryptoError;
use thiserror::Error;

/// Result type for vault operations.
pub type VaultResult<T> = Result<T, VaultError>;

/// Errors raised by the key stores, sessions and secret records.
#[derive(Debug, Error)]
pub enum VaultError {
    /// A submitted key blob failed validation. Specific and safe to show.
    #[error(transparent)]
    Key(CryptoError),

    #[error("could not decrypt")]
    DecryptionFailure,

    #[error("a secret named \"{name}\" already exists for device {device} and role {role}")]
    UniquenessViolation {
        device: String,
        role: String,
        name: String,
    },

    #[error("session expired")]
    SessionExpired,

    #[error("master key rotation aborted: {0}")]
    RotationAborted(String),

    #[error("master key already exists")]
    MasterKeyExists,

    #[error("no master key has been generated")]
    NoMasterKey,

    #[error("master key is not the current version")]
    StaleMasterKey,

    #[error("a master key is required to change secret plaintext")]
    MasterKeyRequired,

    #[error("user key is not active: {0}")]
    Inactive(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("cannot replace, deactivate or remove the only active user key: {0}")]
    LastActiveKey(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("plaintext is {len} bytes, the maximum is {max}")]
    PlaintextTooLong { len: usize, max: usize },

    #[error("session lifetime must be positive and representable")]
    InvalidTtl,

    #[error("storage error: {0}")]
    Storage(String),
}

impl From<CryptoError> for VaultError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::Decryption | CryptoError::Malformed(_) => Self::DecryptionFailure,
            CryptoError::PlaintextTooLong { len, max } => Self::PlaintextTooLong { len, max },
            other => Self::Key(other),
        }
    }
}

impl From<duckdb::Error> for VaultError {
    fn from(err: duckdb::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for VaultError {
    fn from(err: serde_json::Error) -> Self {
        Self::Storage(format!("serialization: {err}"))
    }
}

impl VaultError {
    /// Whether the caller can fix the problem and retry: resubmit a key,
    /// pick another name, reopen a session, supply the current master key.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Key(e) => e.is_key_validation(),
            Self::UniquenessViolation { .. }
            | Self::SessionExpired
            | Self::StaleMasterKey
            | Self::MasterKeyRequired
            | Self::InvalidInput(_)
            | Self::PlaintextTooLong { .. }
            | Self::InvalidTtl
            | Self::LastActiveKey(_)
            | Self::RotationAborted(_) => true,
            Self::DecryptionFailure
            | Self::MasterKeyExists
            | Self::NoMasterKey
            | Self::Inactive(_)
            | Self::NotFound(_)
            | Self::PermissionDenied(_)
            | Self::Storage(_) => false,
        }
    }

    /// Errors that must look like a plain decryption failure to an end user.
    pub fn is_decryption_failure(&self) -> bool {
        matches!(
            self,
            Self::DecryptionFailure | Self::Inactive(_) | Self::NotFound(_)
        )
    }
}
