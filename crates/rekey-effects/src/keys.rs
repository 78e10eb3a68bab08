//! Key store backed by a shared-state store.
//!
//! Each key record is one JSON object named after its id. A separate
//! high-water object remembers the highest id ever claimed; creating a key first
//! advances it with a conditional write, so two minters racing for one id
//! cannot both win and ids stay unique after their records are deleted.

use async_trait::async_trait;
use rekey_core::effects::{KeyStore, SharedStateStore, Versioned};
use rekey_core::{
    DeletionPermit, EncryptionKey, KeyId, KeyMaterial, ObjectNames, RekeyError, RekeyResult,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct HighWater {
    highest_key_id: KeyId,
}

/// [`KeyStore`] over any [`SharedStateStore`].
#[derive(Debug, Clone)]
pub struct StateKeyStore<S> {
    store: S,
    names: ObjectNames,
}

impl<S: SharedStateStore> StateKeyStore<S> {
    /// Key store for the component `names` belongs to.
    pub fn new(store: S, names: ObjectNames) -> Self {
        Self { store, names }
    }

    async fn high_water(&self) -> RekeyResult<Option<Versioned<HighWater>>> {
        let Some(object) = self.store.get(&self.names.key_high_water()).await? else {
            return Ok(None);
        };
        let high_water: HighWater = serde_json::from_slice(&object.value)?;
        Ok(Some(Versioned::new(object.version, high_water)))
    }

    /// Advance the high-water mark to `id`, failing if `id` was claimed before.
    async fn claim(&self, id: KeyId) -> RekeyResult<()> {
        let name = self.names.key_high_water();
        let claimed = serde_json::to_vec(&HighWater { highest_key_id: id })?;
        match self.high_water().await? {
            Some(current) => {
                if id <= current.value.highest_key_id {
                    return Err(RekeyError::conflict(format!(
                        "key id {id} already claimed (high water {})",
                        current.value.highest_key_id
                    )));
                }
                self.store.update(&name, current.version, claimed).await?;
            }
            None => {
                let existing = self.list_keys().await?;
                if let Some(newest) = existing.last() {
                    if id <= newest.value.id {
                        return Err(RekeyError::conflict(format!(
                            "key id {id} is not above existing key {}",
                            newest.value.id
                        )));
                    }
                }
                self.store.create(&name, claimed).await?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl<S: SharedStateStore> KeyStore for StateKeyStore<S> {
    async fn list_keys(&self) -> RekeyResult<Vec<Versioned<EncryptionKey>>> {
        let mut keys = Vec::new();
        for (name, object) in self.store.list(&self.names.key_prefix()).await? {
            let Some(id) = self.names.parse_key(&name) else {
                continue;
            };
            let key: EncryptionKey = serde_json::from_slice(&object.value)?;
            if key.id != id {
                return Err(RekeyError::serialization(format!(
                    "object {name} holds key {}",
                    key.id
                )));
            }
            keys.push(Versioned::new(object.version, key));
        }
        keys.sort_by_key(|key| key.value.id);
        Ok(keys)
    }

    async fn next_key_id(&self) -> RekeyResult<KeyId> {
        let listed = self.list_keys().await?.last().map(|key| key.value.id);
        let claimed = self.high_water().await?.map(|hw| hw.value.highest_key_id);
        match listed.max(claimed) {
            Some(highest) => highest.next(),
            None => Ok(KeyId(1)),
        }
    }

    async fn create_key(&self, key: EncryptionKey) -> RekeyResult<Versioned<EncryptionKey>> {
        self.claim(key.id).await?;
        let value = serde_json::to_vec(&key)?;
        let version = self.store.create(&self.names.key(key.id), value).await?;
        let fingerprint = key
            .material
            .as_ref()
            .map(KeyMaterial::fingerprint)
            .unwrap_or_else(|| "none".to_string());
        info!(
            key_id = %key.id,
            function = %key.function,
            reason = %key.reason,
            fingerprint = %fingerprint,
            "created key"
        );
        Ok(Versioned::new(version, key))
    }

    async fn update_key(
        &self,
        key: &Versioned<EncryptionKey>,
    ) -> RekeyResult<Versioned<EncryptionKey>> {
        let value = serde_json::to_vec(&key.value)?;
        let version = self
            .store
            .update(&self.names.key(key.value.id), key.version, value)
            .await?;
        debug!(key_id = %key.value.id, version, "updated key");
        Ok(Versioned::new(version, key.value.clone()))
    }

    async fn remove_key(&self, permit: DeletionPermit) -> RekeyResult<()> {
        self.store
            .delete(&self.names.key(permit.key_id()), permit.version())
            .await?;
        info!(key_id = %permit.key_id(), "deleted key");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::MemoryStateStore;
    use assert_matches::assert_matches;
    use rekey_core::{DeletionGuard, EncryptionFunction, GroupResource, MintReason, PhysicalTime};

    fn store() -> StateKeyStore<MemoryStateStore> {
        StateKeyStore::new(MemoryStateStore::new(), ObjectNames::new("kube-apiserver"))
    }

    fn key(id: u64) -> EncryptionKey {
        EncryptionKey::new(
            KeyId(id),
            EncryptionFunction::AesCbc,
            Some(KeyMaterial::from_bytes([id as u8; 32])),
            PhysicalTime::from_secs(id),
            MintReason::Rotation,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn ids_are_never_reused_after_delete() {
        let keys = store();
        assert_eq!(keys.next_key_id().await.unwrap(), KeyId(1));
        keys.create_key(key(1)).await.unwrap();
        let second = keys.create_key(key(2)).await.unwrap();

        let mut doomed = second.value.clone();
        doomed.record_migration(GroupResource::core("secrets"), PhysicalTime::from_secs(9));
        let doomed = keys
            .mark_for_deletion(&Versioned::new(second.version, doomed))
            .await
            .unwrap();
        let permit = DeletionGuard::verify(&doomed, None, []).unwrap();
        keys.remove_key(permit).await.unwrap();

        assert_eq!(keys.list_keys().await.unwrap().len(), 1);
        assert_eq!(keys.next_key_id().await.unwrap(), KeyId(3));
        assert_matches!(
            keys.create_key(key(2)).await,
            Err(RekeyError::Conflict { .. })
        );
    }

    #[tokio::test]
    async fn racing_creates_have_one_winner() {
        let keys = store();
        keys.create_key(key(1)).await.unwrap();
        let (a, b) = tokio::join!(keys.create_key(key(2)), keys.create_key(key(2)));
        assert_eq!([a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count(), 1);
        let loser = a.err().or(b.err()).unwrap();
        assert!(loser.is_transient());
    }

    #[tokio::test]
    async fn stale_update_conflicts() {
        let keys = store();
        let created = keys.create_key(key(1)).await.unwrap();
        let mut migrated = created.clone();
        migrated
            .value
            .record_migration(GroupResource::core("secrets"), PhysicalTime::from_secs(5));
        keys.update_key(&migrated).await.unwrap();
        assert_matches!(
            keys.update_key(&created).await,
            Err(RekeyError::Conflict { .. })
        );
    }
}
