//! Shared state store effect.
//!
//! The only coordination medium between controllers and replicas. Objects are
//! named byte blobs carrying a version token; every mutation is conditional on
//! the token the writer last read, so concurrent writers never silently clobber
//! each other. There is no locking: a writer that loses the race gets
//! [`StateStoreError::Conflict`] and retries on its next pass.
//!
//! # Effect Classification
//!
//! - **Category**: Infrastructure Effect
//! - **Implementation**: `rekey-effects` (memory and filesystem handlers)
//! - **Usage**: key store, configuration store, replica registry adapters

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Opaque version token, strictly increasing across all writes of a store.
pub type VersionToken = u64;

/// A value together with the version token it was read at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Versioned<T> {
    /// Token to present on the next conditional write.
    pub version: VersionToken,
    /// The value as read.
    pub value: T,
}

impl<T> Versioned<T> {
    /// Pair a value with its version token.
    pub fn new(version: VersionToken, value: T) -> Self {
        Self { version, value }
    }

    /// Transform the value, keeping the version token.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Versioned<U> {
        Versioned {
            version: self.version,
            value: f(self.value),
        }
    }

    /// Borrow the value, keeping the version token.
    pub fn as_ref(&self) -> Versioned<&T> {
        Versioned {
            version: self.version,
            value: &self.value,
        }
    }
}

/// Error type for shared state operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
pub enum StateStoreError {
    #[error("object {name} not found")]
    NotFound { name: String },
    #[error("object {name} already exists")]
    AlreadyExists { name: String },
    #[error("version conflict on {name}: expected {expected}, found {actual}")]
    Conflict {
        name: String,
        expected: VersionToken,
        actual: VersionToken,
    },
    #[error("state store unavailable: {reason}")]
    Unavailable { reason: String },
    #[error("invalid object name {name:?}")]
    InvalidName { name: String },
    #[error("backend failure: {0}")]
    Backend(String),
}

/// Named, versioned object storage with conditional writes.
#[async_trait]
pub trait SharedStateStore: Send + Sync {
    /// Read one object.
    async fn get(&self, name: &str) -> Result<Option<Versioned<Vec<u8>>>, StateStoreError>;

    /// List objects whose name starts with `prefix`, sorted by name.
    async fn list(&self, prefix: &str)
        -> Result<Vec<(String, Versioned<Vec<u8>>)>, StateStoreError>;

    /// Create an object that must not exist yet.
    async fn create(&self, name: &str, value: Vec<u8>) -> Result<VersionToken, StateStoreError>;

    /// Replace an object if it is still at `expected`.
    async fn update(
        &self,
        name: &str,
        expected: VersionToken,
        value: Vec<u8>,
    ) -> Result<VersionToken, StateStoreError>;

    /// Delete an object if it is still at `expected`.
    async fn delete(&self, name: &str, expected: VersionToken) -> Result<(), StateStoreError>;
}

#[async_trait]
impl<T: SharedStateStore + ?Sized> SharedStateStore for std::sync::Arc<T> {
    async fn get(&self, name: &str) -> Result<Option<Versioned<Vec<u8>>>, StateStoreError> {
        (**self).get(name).await
    }

    async fn list(
        &self,
        prefix: &str,
    ) -> Result<Vec<(String, Versioned<Vec<u8>>)>, StateStoreError> {
        (**self).list(prefix).await
    }

    async fn create(&self, name: &str, value: Vec<u8>) -> Result<VersionToken, StateStoreError> {
        (**self).create(name, value).await
    }

    async fn update(
        &self,
        name: &str,
        expected: VersionToken,
        value: Vec<u8>,
    ) -> Result<VersionToken, StateStoreError> {
        (**self).update(name, expected, value).await
    }

    async fn delete(&self, name: &str, expected: VersionToken) -> Result<(), StateStoreError> {
        (**self).delete(name, expected).await
    }
}
