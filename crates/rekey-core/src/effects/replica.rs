//! Read-only view of the front-end server replicas.

use async_trait::async_trait;

use crate::errors::RekeyResult;
use crate::types::ReplicaStatus;

/// Source of replica state. Implementations never mutate replicas.
#[async_trait]
pub trait ReplicaEffects: Send + Sync {
    /// Every known replica, running or not.
    async fn replicas(&self) -> RekeyResult<Vec<ReplicaStatus>>;
}
