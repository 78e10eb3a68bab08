//! Handles shared by every command.

use anyhow::{Context, Result};
use rekey_core::{ObjectNames, RekeyConfig};
use rekey_effects::{
    EncryptionModeStore, FilesystemStateStore, StateReplicaRegistry, TargetConfigStore,
};
use std::path::Path;
use std::sync::Arc;

pub type CliStore = Arc<FilesystemStateStore>;

/// Opened state directory plus the validated settings.
pub struct CliContext {
    pub store: CliStore,
    pub names: ObjectNames,
    pub config: RekeyConfig,
}

impl CliContext {
    pub async fn open(state_dir: &Path, config: RekeyConfig) -> Result<Self> {
        let store = FilesystemStateStore::open(state_dir)
            .await
            .with_context(|| format!("opening state directory {}", state_dir.display()))?;
        Ok(Self {
            store: Arc::new(store),
            names: config.object_names(),
            config,
        })
    }

    pub fn configs(&self) -> TargetConfigStore<CliStore> {
        TargetConfigStore::new(Arc::clone(&self.store), self.names.clone())
    }

    pub fn replicas(&self) -> StateReplicaRegistry<CliStore> {
        StateReplicaRegistry::new(Arc::clone(&self.store), self.names.clone())
    }

    pub fn mode(&self) -> EncryptionModeStore<CliStore> {
        EncryptionModeStore::new(Arc::clone(&self.store))
    }
}
