use crate::clock::{Clock, SystemClock};
use crate::config::VaultConfig;
use crate::db::Database;
use crate::error::{VaultError, VaultResult};
use crate::master_key::{MasterKey, MasterKeyManager, MasterKeySlot};
use crate::secrets::SecretStore;
use crate::session::SessionKeyManager;
use crate::user_keys::UserKeyStore;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// One database, one master-key slot, and the components that share them.
pub struct Keyring {
    config: VaultConfig,
    user_keys: UserKeyStore,
    master_keys: MasterKeyManager,
    sessions: SessionKeyManager,
    secrets: SecretStore,
}

impl Keyring {
    /// Opens a keyring backed by a database file.
    pub fn open(path: impl AsRef<Path>, config: VaultConfig) -> VaultResult<Self> {
        let db = Database::open(path.as_ref(), &config)?;
        Self::with_clock(db, config, Arc::new(SystemClock))
    }

    /// Opens a keyring backed by a throwaway in-memory database.
    pub fn open_in_memory(config: VaultConfig) -> VaultResult<Self> {
        Self::with_clock(Database::open_in_memory()?, config, Arc::new(SystemClock))
    }

    /// Builds a keyring over an existing database with a custom time source.
    pub fn with_clock(
        db: Database,
        config: VaultConfig,
        clock: Arc<dyn Clock>,
    ) -> VaultResult<Self> {
        config.validate()?;
        let slot = MasterKeySlot::load(&db)?;
        Ok(Self {
            user_keys: UserKeyStore::new(db.clone(), slot.clone(), clock.clone()),
            master_keys: MasterKeyManager::new(db.clone(), slot.clone(), clock.clone()),
            sessions: SessionKeyManager::new(db.clone(), slot.clone(), config.clone(), clock.clone()),
            secrets: SecretStore::new(db, slot, config.clone(), clock),
            config,
        })
    }

    /// First-run setup: registers `owner`, then generates the master key and
    /// activates `owner` with it atomically. A failed bootstrap leaves no
    /// master key behind and can be retried.
    pub fn bootstrap(&self, owner: &str, public_key: &str) -> VaultResult<MasterKey> {
        if self.master_keys.exists()? {
            return Err(VaultError::MasterKeyExists);
        }
        self.user_keys.register(owner, public_key)?;
        let master = self.master_keys.generate_for(owner)?;
        info!("bootstrapped keyring with {owner} as first key holder");
        Ok(master)
    }

    pub fn config(&self) -> &VaultConfig {
        &self.config
    }

    pub fn user_keys(&self) -> &UserKeyStore {
        &self.user_keys
    }

    pub fn master_keys(&self) -> &MasterKeyManager {
        &self.master_keys
    }

    pub fn sessions(&self) -> &SessionKeyManager {
        &self.sessions
    }

    pub fn secrets(&self) -> &SecretStore {
        &self.secrets
    }
}
