//! Storage rewrite stand-in for single-host runs.

use async_trait::async_trait;
use rekey_core::effects::{MigrationCollaborator, MigrationError};
use rekey_core::{GroupResource, KeyRef};
use std::time::Duration;
use tracing::info;

/// Pretends to rewrite every stored object of a resource after `delay`.
///
/// A real deployment plugs in the job that re-reads and re-writes stored data
/// through the serving replicas.
#[derive(Debug, Clone)]
pub struct SimulatedRewrite {
    delay: Duration,
}

impl SimulatedRewrite {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

#[async_trait]
impl MigrationCollaborator for SimulatedRewrite {
    async fn migrate(&self, resource: &GroupResource, key: &KeyRef) -> Result<(), MigrationError> {
        info!(resource = %resource, key = %key, "rewriting stored data");
        tokio::time::sleep(self.delay).await;
        info!(resource = %resource, key = %key, "stored data rewritten");
        Ok(())
    }
}
