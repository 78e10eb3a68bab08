//! Shared-state store handlers.
//!
//! Both handlers implement [`SharedStateStore`](rekey_core::effects::SharedStateStore)
//! and broadcast every successful mutation, which is what wakes the controllers
//! between periodic resyncs.

mod filesystem;
mod memory;

pub use filesystem::FilesystemStateStore;
pub use memory::MemoryStateStore;

use rekey_core::effects::{StateStoreError, VersionToken};
use tokio::sync::broadcast;

/// Capacity of the change notification channel. Slow subscribers see
/// `Lagged` and fall back to a full resync.
pub const CHANGE_CHANNEL_CAPACITY: usize = 256;

/// Kind of mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// Object created.
    Created,
    /// Object replaced.
    Updated,
    /// Object removed.
    Deleted,
}

/// One successful mutation of a shared-state object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateChange {
    /// Object name.
    pub name: String,
    /// What happened to it.
    pub kind: ChangeKind,
    /// Version after the write; the deleted version for deletes.
    pub version: VersionToken,
}

/// A store whose mutations can be observed.
pub trait WatchableStore: Send + Sync {
    /// Subscribe to future mutations.
    fn watch(&self) -> broadcast::Receiver<StateChange>;
}

impl<T: WatchableStore + ?Sized> WatchableStore for std::sync::Arc<T> {
    fn watch(&self) -> broadcast::Receiver<StateChange> {
        (**self).watch()
    }
}

/// Validate object name format and safety
pub(crate) fn validate_name(name: &str) -> Result<(), StateStoreError> {
    let valid = !name.is_empty()
        && name.len() <= 253
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(StateStoreError::InvalidName {
            name: name.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_must_be_path_safe() {
        assert!(validate_name("encryption-key-kube-apiserver-3").is_ok());
        assert!(validate_name("").is_err());
        assert!(validate_name("../etc/passwd").is_err());
        assert!(validate_name(".hidden").is_err());
        assert!(validate_name("a/b").is_err());
    }
}
