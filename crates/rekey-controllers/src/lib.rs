//! Rekey Controllers
//!
//! Level-triggered controllers that move encryption keys through their
//! lifecycle, coordinating only through the shared state:
//!
//! - [`KeyMintController`]: creates keys on enable, mode change, rotation, and
//!   policy growth
//! - [`ConfigApplyController`]: writes one target configuration transition at a
//!   time, gated on replica convergence
//! - [`MigrationController`]: rewrites stored data under the write key and
//!   records completion
//! - [`PruneController`]: deletes retired keys through the two-phase delete
//!
//! [`ControllerRunner`] drives one controller from change triggers, a periodic
//! resync, and backoff on transient failures; [`ControllerSet`] wires all four.

#![forbid(unsafe_code)]

pub mod apply;
pub mod controller;
pub mod effects;
pub mod migration;
pub mod mint;
pub mod prune;
pub mod runner;
pub mod set;
pub mod snapshot;

pub use apply::ConfigApplyController;
pub use controller::{Controller, ReconcileOutcome};
pub use effects::ControllerEffects;
pub use migration::MigrationController;
pub use mint::KeyMintController;
pub use prune::PruneController;
pub use runner::{ControllerRunner, RunnerHealth, Trigger};
pub use set::{ControllerSet, RunningControllers, TRIGGER_CHANNEL_CAPACITY};
pub use snapshot::ClusterSnapshot;
