//! Shared-state store wrapper that loses optimistic-concurrency races on demand.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use rekey_core::effects::{SharedStateStore, StateStoreError, VersionToken, Versioned};
use rekey_effects::{StateChange, WatchableStore};
use tokio::sync::broadcast;

#[derive(Debug, Default)]
struct Script {
    prefix: String,
    remaining: u32,
    injected: u32,
}

/// Delegates to `S`, except that scripted writes fail with a conflict as if a
/// concurrent writer got there first.
#[derive(Debug, Clone)]
pub struct ConflictInjectingStore<S> {
    inner: S,
    script: Arc<Mutex<Script>>,
}

impl<S> ConflictInjectingStore<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            script: Arc::new(Mutex::new(Script::default())),
        }
    }

    /// Fail the next `times` conditional writes to objects starting with `prefix`.
    pub fn fail_next_writes(&self, prefix: impl Into<String>, times: u32) {
        let mut script = self.script.lock();
        script.prefix = prefix.into();
        script.remaining = times;
    }

    /// Conflicts injected so far.
    pub fn injected(&self) -> u32 {
        self.script.lock().injected
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    fn maybe_conflict(&self, name: &str, expected: VersionToken) -> Result<(), StateStoreError> {
        let mut script = self.script.lock();
        if script.remaining > 0 && name.starts_with(&script.prefix) {
            script.remaining -= 1;
            script.injected += 1;
            return Err(StateStoreError::Conflict {
                name: name.to_string(),
                expected,
                actual: expected.saturating_add(1),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl<S: SharedStateStore> SharedStateStore for ConflictInjectingStore<S> {
    async fn get(&self, name: &str) -> Result<Option<Versioned<Vec<u8>>>, StateStoreError> {
        self.inner.get(name).await
    }

    async fn list(
        &self,
        prefix: &str,
    ) -> Result<Vec<(String, Versioned<Vec<u8>>)>, StateStoreError> {
        self.inner.list(prefix).await
    }

    async fn create(&self, name: &str, value: Vec<u8>) -> Result<VersionToken, StateStoreError> {
        self.maybe_conflict(name, 0)?;
        self.inner.create(name, value).await
    }

    async fn update(
        &self,
        name: &str,
        expected: VersionToken,
        value: Vec<u8>,
    ) -> Result<VersionToken, StateStoreError> {
        self.maybe_conflict(name, expected)?;
        self.inner.update(name, expected, value).await
    }

    async fn delete(&self, name: &str, expected: VersionToken) -> Result<(), StateStoreError> {
        self.maybe_conflict(name, expected)?;
        self.inner.delete(name, expected).await
    }
}

impl<S: WatchableStore> WatchableStore for ConflictInjectingStore<S> {
    fn watch(&self) -> broadcast::Receiver<StateChange> {
        self.inner.watch()
    }
}
