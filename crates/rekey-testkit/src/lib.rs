//! Rekey Testing Infrastructure
//!
//! Deterministic stand-ins for every effect the controllers use, plus a
//! [`TestCluster`] harness that wires them to a simulated replica fleet.
//!
//! ```rust,no_run
//! use rekey_core::EncryptionFunction;
//! use rekey_testkit::TestCluster;
//!
//! # async fn example() -> rekey_core::RekeyResult<()> {
//! let cluster = TestCluster::start().await?;
//! cluster.set_mode(EncryptionFunction::AesCbc).await?;
//! cluster.settle().await?;
//! # Ok(())
//! # }
//! ```

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(missing_docs)]

pub mod clock;
pub mod cluster;
pub mod conflict;
pub mod fleet;
pub mod migrator;
pub mod random;

pub use clock::ControllableClock;
pub use cluster::{ClusterStore, SettleReport, TestCluster, TestClusterConfig, MAX_SETTLE_ROUNDS};
pub use conflict::ConflictInjectingStore;
pub use fleet::SimulatedFleet;
pub use migrator::ScriptedMigrator;
pub use random::SeededRandom;

/// Route `tracing` output through the test harness. Safe to call repeatedly.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
