//! Rekey Effects - Production Handlers
//!
//! Concrete implementations of the effect traits declared in `rekey-core`:
//!
//! - **State stores**: [`MemoryStateStore`] and [`FilesystemStateStore`], both
//!   with conditional writes and change notification
//! - **Store adapters**: [`StateKeyStore`], [`TargetConfigStore`],
//!   [`EncryptionModeStore`], [`StateReplicaRegistry`] map domain objects onto
//!   named shared-state objects
//! - **System handlers**: [`RealTimeHandler`], [`RealRandomHandler`]
//! - **Migration**: [`MigrationTracker`] runs collaborator jobs in the background
//!
//! Deterministic stand-ins for tests live in `rekey-testkit`.

#![forbid(unsafe_code)]

pub mod configuration;
pub mod keys;
pub mod migration;
pub mod random;
pub mod replicas;
pub mod state;
pub mod time;

pub use configuration::{EncryptionModeDocument, EncryptionModeStore, TargetConfigStore};
pub use keys::StateKeyStore;
pub use migration::{MigrationCompletion, MigrationJobStatus, MigrationTracker};
pub use random::RealRandomHandler;
pub use replicas::StateReplicaRegistry;
pub use state::{
    ChangeKind, FilesystemStateStore, MemoryStateStore, StateChange, WatchableStore,
    CHANGE_CHANNEL_CAPACITY,
};
pub use time::RealTimeHandler;
