//! Migration collaborator interface.
//!
//! The collaborator rewrites every stored instance of a resource type so that it
//! is retrievable under a given key. It may take minutes, must be safe to invoke
//! again after a partial run, and reports only success or failure.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::types::{GroupResource, KeyId, KeyRef};

/// Error type for migration operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
pub enum MigrationError {
    /// The rewrite ran and did not complete.
    #[error("migration of {resource} to key {key} failed: {reason}")]
    Failed {
        resource: GroupResource,
        key: KeyId,
        reason: String,
    },
    /// The collaborator could not be reached.
    #[error("migration collaborator unavailable: {reason}")]
    Unavailable { reason: String },
}

/// Rewrites stored data under a new write key.
#[async_trait]
pub trait MigrationCollaborator: Send + Sync {
    /// Rewrite every stored instance of `resource` under `key`.
    async fn migrate(&self, resource: &GroupResource, key: &KeyRef) -> Result<(), MigrationError>;
}

/// Blanket implementation for Arc<T> where T: MigrationCollaborator
#[async_trait]
impl<T: MigrationCollaborator + ?Sized> MigrationCollaborator for std::sync::Arc<T> {
    async fn migrate(&self, resource: &GroupResource, key: &KeyRef) -> Result<(), MigrationError> {
        (**self).migrate(resource, key).await
    }
}
