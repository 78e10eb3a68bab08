//! Configuration store effect: target and observed configurations, and the
//! user-facing encryption mode.

use async_trait::async_trait;

use crate::effects::state::{VersionToken, Versioned};
use crate::errors::RekeyResult;
use crate::types::{EncryptionFunction, Revision, TargetConfiguration};

/// Access to the shared target configuration and the per-revision observed
/// configurations served by replicas.
#[async_trait]
pub trait ConfigurationStore: Send + Sync {
    /// Current target, `None` before the first write.
    async fn current_target(&self) -> RekeyResult<Option<Versioned<TargetConfiguration>>>;

    /// Write a new target. `expected` is the version last read, `None` to create.
    async fn write_target(
        &self,
        config: &TargetConfiguration,
        expected: Option<VersionToken>,
    ) -> RekeyResult<VersionToken>;

    /// Configuration served by replicas on `revision`, if published.
    async fn observed_configuration(
        &self,
        revision: &Revision,
    ) -> RekeyResult<Option<TargetConfiguration>>;
}

/// Single user-facing field selecting the active encryption function.
#[async_trait]
pub trait EncryptionModeSource: Send + Sync {
    /// Configured function; unset reads as [`EncryptionFunction::Identity`].
    async fn encryption_function(&self) -> RekeyResult<EncryptionFunction>;
}
