//! Point-in-time read of everything a controller decides on.
//!
//! Every pass starts from a fresh snapshot. Nothing is cached between passes,
//! which is what makes a restarted controller resume exactly where the shared
//! state says it left off.

use std::collections::BTreeMap;

use rekey_core::effects::{VersionToken, Versioned};
use rekey_core::{
    EncryptionFunction, EncryptionKey, KeyId, KeyStage, RekeyResult, ReplicaConvergenceView,
    TargetConfiguration,
};

use crate::effects::ControllerEffects;

/// Keys, target, convergence, and mode as read at the start of a pass.
#[derive(Debug, Clone)]
pub struct ClusterSnapshot {
    keys: Vec<Versioned<EncryptionKey>>,
    target: Option<Versioned<TargetConfiguration>>,
    convergence: ReplicaConvergenceView,
    mode: EncryptionFunction,
}

impl ClusterSnapshot {
    /// Read the shared state.
    pub async fn load(effects: &ControllerEffects) -> RekeyResult<Self> {
        let keys = effects.keys.list_keys().await?;
        let target = effects.configs.current_target().await?;
        let convergence =
            ReplicaConvergenceView::load(effects.replicas.as_ref(), effects.configs.as_ref())
                .await?;
        let mode = effects.mode.encryption_function().await?;
        Ok(Self {
            keys,
            target,
            convergence,
            mode,
        })
    }

    /// Versioned key records, ascending by id.
    pub fn keys(&self) -> &[Versioned<EncryptionKey>] {
        &self.keys
    }

    /// Plain key records, ascending by id.
    pub fn key_records(&self) -> Vec<EncryptionKey> {
        self.keys.iter().map(|key| key.value.clone()).collect()
    }

    /// Versioned record of `id`.
    pub fn key(&self, id: KeyId) -> Option<&Versioned<EncryptionKey>> {
        self.keys.iter().find(|key| key.value.id == id)
    }

    /// Newest key not marked for deletion.
    pub fn newest_key(&self) -> Option<&EncryptionKey> {
        self.keys
            .iter()
            .map(|key| &key.value)
            .filter(|key| !key.deletion_requested)
            .max_by_key(|key| key.id)
    }

    /// Current target; empty before the first write.
    pub fn target(&self) -> TargetConfiguration {
        self.target
            .as_ref()
            .map(|target| target.value.clone())
            .unwrap_or_default()
    }

    /// Version of the target object, `None` before the first write.
    pub fn target_version(&self) -> Option<VersionToken> {
        self.target.as_ref().map(|target| target.version)
    }

    /// Which replicas serve which target revision.
    pub fn convergence(&self) -> &ReplicaConvergenceView {
        &self.convergence
    }

    /// Configured encryption function.
    pub fn mode(&self) -> EncryptionFunction {
        self.mode
    }

    /// Lifecycle stage of every key, for diagnostics.
    pub fn key_stages(&self) -> BTreeMap<KeyId, KeyStage> {
        let target = self.target();
        let observed = self.convergence.observed();
        self.keys
            .iter()
            .map(|key| (key.value.id, KeyStage::derive(&key.value, &target, observed)))
            .collect()
    }
}
