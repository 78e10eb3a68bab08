//! Rekey Core - Encryption Key Lifecycle Foundation
//!
//! Domain types, effect interfaces, and the pure decision logic shared by the
//! key lifecycle controllers. Nothing in this crate performs I/O on its own:
//! handlers live in `rekey-effects`, controllers in `rekey-controllers`.
//!
//! # Architecture Layers
//!
//! ## Domain Types
//! - `EncryptionKey`, `KeyId`, `KeyMaterial`: key records and their secrets
//! - `TargetConfiguration`, `ResourceProviders`: ordered provider lists per resource
//! - `GroupResource`, `ResourcePolicy`: what must be encrypted
//!
//! ## Effect Interfaces
//! - `SharedStateStore`: versioned objects with conditional writes
//! - `KeyStore`, `ConfigurationStore`, `EncryptionModeSource`, `ReplicaEffects`
//! - `MigrationCollaborator`, `PhysicalTimeEffects`, `RandomEffects`
//!
//! ## Pure Decisions
//! - `ConfigComputer`: next desired configuration
//! - `KeyMintPolicy`: whether to mint, and why
//! - `select_prune_victims` and `DeletionGuard`: bounded retention, guarded delete
//! - `ReplicaConvergenceView`: whether replicas agree on one configuration
//!
//! ## Safety Contracts
//! - A key leaves the read set only after a newer write key is migrated everywhere
//! - At most one write key across all encrypted resources
//! - Key ids strictly increase and are never reused
//! - Target transitions apply only while replicas are converged on the current target

#![allow(missing_docs)]
#![forbid(unsafe_code)]

/// Desired configuration computation
pub mod compute;

/// Controller configuration
pub mod config;

/// Replica convergence
pub mod convergence;

/// Pure effect interfaces (no implementations)
pub mod effects;

/// Unified error handling
pub mod errors;

/// Mint decisions
pub mod mint;

/// Shared-state object names
pub mod naming;

/// Retention and the guarded delete
pub mod prune;

/// Retry backoff
pub mod reliability;

/// Derived key lifecycle stages
pub mod stage;

/// Wall-clock timestamps
pub mod time;

/// Domain types
pub mod types;

pub use compute::{AppliedRule, ComputeOutcome, ConfigComputer};
pub use config::RekeyConfig;
pub use convergence::{ConvergenceStatus, ReplicaConvergenceView};
pub use errors::{RekeyError, RekeyResult};
pub use mint::KeyMintPolicy;
pub use naming::{ObjectNames, ENCRYPTION_MODE_OBJECT};
pub use prune::{select_prune_victims, DeletionGuard, DeletionPermit};
pub use reliability::{Backoff, BackoffStrategy, RetryConfig};
pub use stage::KeyStage;
pub use time::PhysicalTime;
pub use types::*;
