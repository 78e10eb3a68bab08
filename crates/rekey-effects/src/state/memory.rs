//! In-memory shared-state store

use async_trait::async_trait;
use rekey_core::effects::{SharedStateStore, StateStoreError, VersionToken, Versioned};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};

use super::{validate_name, ChangeKind, StateChange, WatchableStore, CHANGE_CHANNEL_CAPACITY};

#[derive(Debug, Default)]
struct MemoryState {
    objects: BTreeMap<String, Versioned<Vec<u8>>>,
    clock: VersionToken,
}

impl MemoryState {
    fn tick(&mut self) -> VersionToken {
        self.clock += 1;
        self.clock
    }
}

/// In-memory shared-state store. Clones share the same objects.
#[derive(Debug, Clone)]
pub struct MemoryStateStore {
    state: Arc<RwLock<MemoryState>>,
    changes: broadcast::Sender<StateChange>,
}

impl MemoryStateStore {
    /// Create an empty store
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            state: Arc::new(RwLock::new(MemoryState::default())),
            changes,
        }
    }

    /// Number of stored objects
    pub async fn len(&self) -> usize {
        self.state.read().await.objects.len()
    }

    /// Whether the store holds no objects
    pub async fn is_empty(&self) -> bool {
        self.state.read().await.objects.is_empty()
    }

    fn notify(&self, name: &str, kind: ChangeKind, version: VersionToken) {
        // No subscribers is fine.
        let _ = self.changes.send(StateChange {
            name: name.to_string(),
            kind,
            version,
        });
    }
}

impl Default for MemoryStateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl WatchableStore for MemoryStateStore {
    fn watch(&self) -> broadcast::Receiver<StateChange> {
        self.changes.subscribe()
    }
}

#[async_trait]
impl SharedStateStore for MemoryStateStore {
    async fn get(&self, name: &str) -> Result<Option<Versioned<Vec<u8>>>, StateStoreError> {
        validate_name(name)?;
        let state = self.state.read().await;
        Ok(state.objects.get(name).cloned())
    }

    async fn list(
        &self,
        prefix: &str,
    ) -> Result<Vec<(String, Versioned<Vec<u8>>)>, StateStoreError> {
        let state = self.state.read().await;
        Ok(state
            .objects
            .range(prefix.to_string()..)
            .take_while(|(name, _)| name.starts_with(prefix))
            .map(|(name, object)| (name.clone(), object.clone()))
            .collect())
    }

    async fn create(&self, name: &str, value: Vec<u8>) -> Result<VersionToken, StateStoreError> {
        validate_name(name)?;
        let version = {
            let mut state = self.state.write().await;
            if state.objects.contains_key(name) {
                return Err(StateStoreError::AlreadyExists {
                    name: name.to_string(),
                });
            }
            let version = state.tick();
            state
                .objects
                .insert(name.to_string(), Versioned::new(version, value));
            version
        };
        self.notify(name, ChangeKind::Created, version);
        Ok(version)
    }

    async fn update(
        &self,
        name: &str,
        expected: VersionToken,
        value: Vec<u8>,
    ) -> Result<VersionToken, StateStoreError> {
        validate_name(name)?;
        let version = {
            let mut state = self.state.write().await;
            let actual = match state.objects.get(name) {
                Some(object) => object.version,
                None => {
                    return Err(StateStoreError::NotFound {
                        name: name.to_string(),
                    })
                }
            };
            if actual != expected {
                return Err(StateStoreError::Conflict {
                    name: name.to_string(),
                    expected,
                    actual,
                });
            }
            let version = state.tick();
            state
                .objects
                .insert(name.to_string(), Versioned::new(version, value));
            version
        };
        self.notify(name, ChangeKind::Updated, version);
        Ok(version)
    }

    async fn delete(&self, name: &str, expected: VersionToken) -> Result<(), StateStoreError> {
        validate_name(name)?;
        {
            let mut state = self.state.write().await;
            let actual = match state.objects.get(name) {
                Some(object) => object.version,
                None => {
                    return Err(StateStoreError::NotFound {
                        name: name.to_string(),
                    })
                }
            };
            if actual != expected {
                return Err(StateStoreError::Conflict {
                    name: name.to_string(),
                    expected,
                    actual,
                });
            }
            state.objects.remove(name);
        }
        self.notify(name, ChangeKind::Deleted, expected);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[tokio::test]
    async fn conditional_writes() {
        let store = MemoryStateStore::new();
        let v1 = store.create("a", b"one".to_vec()).await.unwrap();
        assert_matches!(
            store.create("a", b"again".to_vec()).await,
            Err(StateStoreError::AlreadyExists { .. })
        );

        let v2 = store.update("a", v1, b"two".to_vec()).await.unwrap();
        assert!(v2 > v1);
        assert_matches!(
            store.update("a", v1, b"stale".to_vec()).await,
            Err(StateStoreError::Conflict { expected, actual, .. }) if expected == v1 && actual == v2
        );
        assert_matches!(store.delete("a", v1).await, Err(StateStoreError::Conflict { .. }));
        store.delete("a", v2).await.unwrap();
        assert!(store.get("a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_is_prefix_scoped_and_sorted() {
        let store = MemoryStateStore::new();
        for name in ["key-2", "key-1", "other", "key-10"] {
            store.create(name, Vec::new()).await.unwrap();
        }
        let names: Vec<String> = store
            .list("key-")
            .await
            .unwrap()
            .into_iter()
            .map(|(name, _)| name)
            .collect();
        assert_eq!(names, vec!["key-1", "key-10", "key-2"]);
    }

    #[tokio::test]
    async fn mutations_are_broadcast() {
        let store = MemoryStateStore::new();
        let mut changes = store.watch();
        let version = store.create("mode", b"{}".to_vec()).await.unwrap();
        let change = changes.recv().await.unwrap();
        assert_eq!(change.name, "mode");
        assert_eq!(change.kind, ChangeKind::Created);
        assert_eq!(change.version, version);
    }
}
