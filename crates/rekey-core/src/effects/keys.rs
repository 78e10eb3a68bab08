//! Key store effect: persistence of key records.
//!
//! Records are addressed by id, written with optimistic concurrency, and removed
//! through a two-phase delete: a versioned write sets the deletion mark, and
//! only a [`DeletionPermit`] issued by [`DeletionGuard`](crate::prune::DeletionGuard)
//! authorizes physical removal.

use async_trait::async_trait;

use crate::effects::state::Versioned;
use crate::errors::RekeyResult;
use crate::prune::DeletionPermit;
use crate::types::{EncryptionKey, KeyId};

/// Persistence and lifecycle operations over key records.
#[async_trait]
pub trait KeyStore: Send + Sync {
    /// Every key record, ascending by id.
    async fn list_keys(&self) -> RekeyResult<Vec<Versioned<EncryptionKey>>>;

    /// Next unused id: one past both the highest existing id and the highest
    /// id ever claimed, so deleted ids are never handed out again.
    async fn next_key_id(&self) -> RekeyResult<KeyId>;

    /// Persist a new record under the id it carries.
    ///
    /// Fails with `Conflict` or `AlreadyExists` when the id is not strictly above
    /// every id ever claimed in this store, so two minters racing for the same id
    /// cannot both succeed and ids are never reused after deletion.
    async fn create_key(&self, key: EncryptionKey) -> RekeyResult<Versioned<EncryptionKey>>;

    /// Replace a record if it is still at the version it was read at.
    async fn update_key(
        &self,
        key: &Versioned<EncryptionKey>,
    ) -> RekeyResult<Versioned<EncryptionKey>>;

    /// Physically remove a record the deletion guard has cleared.
    async fn remove_key(&self, permit: DeletionPermit) -> RekeyResult<()>;

    /// First phase of the two-phase delete.
    async fn mark_for_deletion(
        &self,
        key: &Versioned<EncryptionKey>,
    ) -> RekeyResult<Versioned<EncryptionKey>> {
        let mut marked = key.clone();
        marked.value.deletion_requested = true;
        self.update_key(&marked).await
    }

    /// Abort a two-phase delete.
    async fn clear_deletion_mark(
        &self,
        key: &Versioned<EncryptionKey>,
    ) -> RekeyResult<Versioned<EncryptionKey>> {
        let mut cleared = key.clone();
        cleared.value.deletion_requested = false;
        self.update_key(&cleared).await
    }
}

/// Blanket implementation for Arc<T> where T: KeyStore
#[async_trait]
impl<T: KeyStore + ?Sized> KeyStore for std::sync::Arc<T> {
    async fn list_keys(&self) -> RekeyResult<Vec<Versioned<EncryptionKey>>> {
        (**self).list_keys().await
    }

    async fn next_key_id(&self) -> RekeyResult<KeyId> {
        (**self).next_key_id().await
    }

    async fn create_key(&self, key: EncryptionKey) -> RekeyResult<Versioned<EncryptionKey>> {
        (**self).create_key(key).await
    }

    async fn update_key(
        &self,
        key: &Versioned<EncryptionKey>,
    ) -> RekeyResult<Versioned<EncryptionKey>> {
        (**self).update_key(key).await
    }

    async fn remove_key(&self, permit: DeletionPermit) -> RekeyResult<()> {
        (**self).remove_key(permit).await
    }
}
