//! Effect trait definitions
//!
//! Pure trait definitions for every side effect the controllers perform. This
//! module defines **what** can be done; handlers in `rekey-effects` and
//! `rekey-testkit` define **how**.
//!
//! ## Infrastructure Effects
//! - **State**: named, versioned objects with conditional writes
//! - **Time**: wall-clock timestamps
//! - **Random**: key material generation
//!
//! ## Application Effects
//! - **Keys**: key records with two-phase delete
//! - **Configuration**: target/observed configurations and the encryption mode
//! - **Replica**: read-only replica state
//! - **Migration**: the external data rewrite collaborator

pub mod configuration;
pub mod keys;
pub mod migration;
pub mod random;
pub mod replica;
pub mod state;
pub mod time;

pub use configuration::{ConfigurationStore, EncryptionModeSource};
pub use keys::KeyStore;
pub use migration::{MigrationCollaborator, MigrationError};
pub use random::RandomEffects;
pub use replica::ReplicaEffects;
pub use state::{SharedStateStore, StateStoreError, VersionToken, Versioned};
pub use time::{PhysicalTimeEffects, TimeError};
