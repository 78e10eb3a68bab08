//! Effect bundle shared by every controller.

use std::sync::Arc;

use rekey_core::effects::{
    ConfigurationStore, EncryptionModeSource, KeyStore, MigrationCollaborator,
    PhysicalTimeEffects, RandomEffects, ReplicaEffects, SharedStateStore,
};
use rekey_core::ObjectNames;
use rekey_effects::{
    EncryptionModeStore, MigrationTracker, StateKeyStore, StateReplicaRegistry, TargetConfigStore,
};

/// Handles to every collaborator a controller may touch.
///
/// Cloning is cheap; all controllers of one process share the same bundle,
/// and in particular the same [`MigrationTracker`].
#[derive(Clone)]
pub struct ControllerEffects {
    /// Key records.
    pub keys: Arc<dyn KeyStore>,
    /// Target configuration.
    pub configs: Arc<dyn ConfigurationStore>,
    /// Desired encryption mode.
    pub mode: Arc<dyn EncryptionModeSource>,
    /// Replica revisions.
    pub replicas: Arc<dyn ReplicaEffects>,
    /// Wall clock.
    pub time: Arc<dyn PhysicalTimeEffects>,
    /// Key material and jitter source.
    pub random: Arc<dyn RandomEffects>,
    /// Migration jobs of this process.
    pub migrations: MigrationTracker,
}

impl std::fmt::Debug for ControllerEffects {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControllerEffects")
            .field("migrations", &self.migrations)
            .finish_non_exhaustive()
    }
}

impl ControllerEffects {
    /// Wire every store-backed effect onto one shared-state store.
    pub fn over_store<S>(
        store: S,
        names: ObjectNames,
        time: Arc<dyn PhysicalTimeEffects>,
        random: Arc<dyn RandomEffects>,
        collaborator: Arc<dyn MigrationCollaborator>,
    ) -> Self
    where
        S: SharedStateStore + Clone + 'static,
    {
        Self {
            keys: Arc::new(StateKeyStore::new(store.clone(), names.clone())),
            configs: Arc::new(TargetConfigStore::new(store.clone(), names.clone())),
            mode: Arc::new(EncryptionModeStore::new(store.clone())),
            replicas: Arc::new(StateReplicaRegistry::new(store, names)),
            time,
            random,
            migrations: MigrationTracker::new(collaborator),
        }
    }
}
