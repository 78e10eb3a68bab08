//! The reconciliation contract shared by all controllers.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use rekey_core::RekeyResult;

/// Result of one successful reconciliation pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Shared state already matched what the controller wants.
    Idle,
    /// The controller wrote to the shared state.
    Applied {
        /// What was written.
        action: String,
    },
    /// Something needs doing, but a precondition is not met yet. The next
    /// state change or resync re-evaluates it.
    Deferred {
        /// The unmet precondition.
        reason: String,
    },
}

impl ReconcileOutcome {
    /// An [`Applied`](Self::Applied) outcome.
    pub fn applied(action: impl Into<String>) -> Self {
        Self::Applied {
            action: action.into(),
        }
    }

    /// A [`Deferred`](Self::Deferred) outcome.
    pub fn deferred(reason: impl Into<String>) -> Self {
        Self::Deferred {
            reason: reason.into(),
        }
    }

    /// Whether the pass wrote anything.
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied { .. })
    }
}

impl fmt::Display for ReconcileOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("idle"),
            Self::Applied { action } => write!(f, "applied: {action}"),
            Self::Deferred { reason } => write!(f, "deferred: {reason}"),
        }
    }
}

/// A level-triggered reconciler.
///
/// `reconcile` reads the shared state, takes at most one step toward the
/// desired state, and returns. It must be idempotent: running it twice
/// against unchanged state writes nothing the second time.
#[async_trait]
pub trait Controller: Send + Sync {
    /// Stable name used in logs.
    fn name(&self) -> &'static str;

    /// Run one pass.
    async fn reconcile(&self) -> RekeyResult<ReconcileOutcome>;
}

#[async_trait]
impl<T: Controller + ?Sized> Controller for Arc<T> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    async fn reconcile(&self) -> RekeyResult<ReconcileOutcome> {
        (**self).reconcile().await
    }
}
