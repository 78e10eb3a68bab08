//! Unified error type for key lifecycle operations
//!
//! Every controller, store adapter, and pure computation reports failures through
//! [`RekeyError`]. Effect-specific error enums convert into it so that callers can
//! use `?` across layers and the controller runner can decide whether a failure is
//! worth retrying.

use serde::{Deserialize, Serialize};

use crate::effects::{MigrationError, StateStoreError, TimeError};

/// Unified error type for all Rekey operations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum RekeyError {
    /// Invalid input or configuration
    #[error("Invalid: {message}")]
    Invalid {
        /// Error message describing the invalid input
        message: String,
    },

    /// Shared state object not found
    #[error("Not found: {message}")]
    NotFound {
        /// Error message describing what was not found
        message: String,
    },

    /// Shared state object already exists
    #[error("Already exists: {message}")]
    AlreadyExists {
        /// Error message describing the duplicate object
        message: String,
    },

    /// Optimistic concurrency check lost against a concurrent writer
    #[error("Conflict: {message}")]
    Conflict {
        /// Error message describing the conflicting write
        message: String,
    },

    /// Shared state or a collaborator is temporarily unavailable
    #[error("Unavailable: {message}")]
    Unavailable {
        /// Error message describing the outage
        message: String,
    },

    /// Serialization/deserialization error
    #[error("Serialization error: {message}")]
    Serialization {
        /// Error message describing the serialization failure
        message: String,
    },

    /// Storage backend failure
    #[error("Storage error: {message}")]
    Storage {
        /// Error message describing the storage failure
        message: String,
    },

    /// Migration collaborator reported a failure
    #[error("Migration error: {message}")]
    Migration {
        /// Error message describing the failed migration
        message: String,
    },

    /// A correctness-critical invariant would have been violated
    #[error("Invariant violation: {message}")]
    InvariantViolation {
        /// Error message describing the violated invariant
        message: String,
    },

    /// Internal system error
    #[error("Internal error: {message}")]
    Internal {
        /// Error message describing the internal error
        message: String,
    },
}

impl RekeyError {
    /// Create an invalid input error
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid {
            message: message.into(),
        }
    }

    /// Create a not found error
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    /// Create an already exists error
    pub fn already_exists(message: impl Into<String>) -> Self {
        Self::AlreadyExists {
            message: message.into(),
        }
    }

    /// Create a conflict error
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    /// Create an unavailable error
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    /// Create a serialization error
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Create a storage error
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Create a migration error
    pub fn migration(message: impl Into<String>) -> Self {
        Self::Migration {
            message: message.into(),
        }
    }

    /// Create an invariant violation error
    pub fn invariant_violation(message: impl Into<String>) -> Self {
        Self::InvariantViolation {
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether the failure is expected to clear up on a later reconciliation pass.
    ///
    /// Lost optimistic-concurrency races, duplicate creates, outages, and migration
    /// failures are all retried with backoff. Invariant violations and invalid input
    /// are not: retrying them cannot change the outcome.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Conflict { .. }
                | Self::AlreadyExists { .. }
                | Self::Unavailable { .. }
                | Self::Storage { .. }
                | Self::Migration { .. }
        )
    }
}

/// Standard Result type for Rekey operations
pub type RekeyResult<T> = std::result::Result<T, RekeyError>;

impl From<serde_json::Error> for RekeyError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization(err.to_string())
    }
}

impl From<StateStoreError> for RekeyError {
    fn from(err: StateStoreError) -> Self {
        match err {
            StateStoreError::NotFound { .. } => Self::not_found(err.to_string()),
            StateStoreError::AlreadyExists { .. } => Self::already_exists(err.to_string()),
            StateStoreError::Conflict { .. } => Self::conflict(err.to_string()),
            StateStoreError::Unavailable { .. } => Self::unavailable(err.to_string()),
            StateStoreError::InvalidName { .. } => Self::invalid(err.to_string()),
            StateStoreError::Backend(_) => Self::storage(err.to_string()),
        }
    }
}

impl From<TimeError> for RekeyError {
    fn from(err: TimeError) -> Self {
        Self::unavailable(err.to_string())
    }
}

impl From<MigrationError> for RekeyError {
    fn from(err: MigrationError) -> Self {
        match err {
            MigrationError::Unavailable { .. } => Self::unavailable(err.to_string()),
            MigrationError::Failed { .. } => Self::migration(err.to_string()),
        }
    }
}
