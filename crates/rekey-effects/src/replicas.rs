//! Replica registry backed by a shared-state store.
//!
//! Replicas report their state into one object per component. Controllers only
//! read it; the registry's write side is used by replicas themselves and by the
//! rollout tooling.

use async_trait::async_trait;
use rekey_core::effects::{ReplicaEffects, SharedStateStore, Versioned};
use rekey_core::{ObjectNames, RekeyError, RekeyResult, ReplicaStatus, Revision};
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ReplicaSetDocument {
    #[serde(default)]
    replicas: Vec<ReplicaStatus>,
}

/// Store-backed replica registry.
#[derive(Debug, Clone)]
pub struct StateReplicaRegistry<S> {
    store: S,
    names: ObjectNames,
}

impl<S: SharedStateStore> StateReplicaRegistry<S> {
    /// Registry for the component `names` belongs to.
    pub fn new(store: S, names: ObjectNames) -> Self {
        Self { store, names }
    }

    async fn load(&self) -> RekeyResult<Option<Versioned<ReplicaSetDocument>>> {
        match self.store.get(&self.names.replicas()).await? {
            Some(object) => {
                let document: ReplicaSetDocument = serde_json::from_slice(&object.value)?;
                Ok(Some(Versioned::new(object.version, document)))
            }
            None => Ok(None),
        }
    }

    async fn modify(&self, edit: impl FnOnce(&mut Vec<ReplicaStatus>)) -> RekeyResult<()> {
        let name = self.names.replicas();
        match self.load().await? {
            Some(mut current) => {
                edit(&mut current.value.replicas);
                current.value.replicas.sort_by(|a, b| a.id.cmp(&b.id));
                let value = serde_json::to_vec_pretty(&current.value)?;
                self.store.update(&name, current.version, value).await?;
            }
            None => {
                let mut document = ReplicaSetDocument::default();
                edit(&mut document.replicas);
                document.replicas.sort_by(|a, b| a.id.cmp(&b.id));
                let value = serde_json::to_vec_pretty(&document)?;
                self.store.create(&name, value).await?;
            }
        }
        Ok(())
    }

    /// Insert or replace the state of one replica.
    pub async fn report(&self, status: ReplicaStatus) -> RekeyResult<()> {
        info!(
            replica = %status.id,
            running = status.running,
            revision = status.revision.as_ref().map_or("none", Revision::as_str),
            "replica reported"
        );
        self.modify(|replicas| {
            replicas.retain(|existing| existing.id != status.id);
            replicas.push(status);
        })
        .await
    }

    /// Report several replicas in one write, so a rollout moves them together.
    pub async fn report_all(&self, statuses: Vec<ReplicaStatus>) -> RekeyResult<()> {
        info!(replicas = statuses.len(), "replicas reported");
        self.modify(|replicas| {
            replicas.retain(|existing| !statuses.iter().any(|status| status.id == existing.id));
            replicas.extend(statuses);
        })
        .await
    }

    /// Forget a replica.
    pub async fn remove(&self, id: &str) -> RekeyResult<()> {
        let mut found = false;
        self.modify(|replicas| {
            let before = replicas.len();
            replicas.retain(|existing| existing.id != id);
            found = replicas.len() != before;
        })
        .await?;
        if !found {
            return Err(RekeyError::not_found(format!("replica {id}")));
        }
        Ok(())
    }
}

#[async_trait]
impl<S: SharedStateStore> ReplicaEffects for StateReplicaRegistry<S> {
    async fn replicas(&self) -> RekeyResult<Vec<ReplicaStatus>> {
        Ok(self
            .load()
            .await?
            .map(|document| document.value.replicas)
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::MemoryStateStore;

    #[tokio::test]
    async fn reports_replace_by_id() {
        let registry = StateReplicaRegistry::new(MemoryStateStore::new(), ObjectNames::new("kube-apiserver"));
        assert!(registry.replicas().await.unwrap().is_empty());

        registry
            .report(ReplicaStatus::running("b", Revision::new("1")))
            .await
            .unwrap();
        registry
            .report(ReplicaStatus::running("a", Revision::new("1")))
            .await
            .unwrap();
        registry
            .report(ReplicaStatus::running("b", Revision::new("2")))
            .await
            .unwrap();

        let replicas = registry.replicas().await.unwrap();
        assert_eq!(replicas.len(), 2);
        assert_eq!(replicas[0].id, "a");
        assert_eq!(replicas[1].revision, Some(Revision::new("2")));

        registry.remove("a").await.unwrap();
        assert!(registry.remove("a").await.is_err());
    }
}
