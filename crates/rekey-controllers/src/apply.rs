//! Configuration apply controller.
//!
//! Feeds the snapshot through the [`ConfigComputer`] and writes the result as
//! the new target, one transition at a time: a transition is only written while
//! every replica serves exactly the current target. The write carries the
//! version the target was read at, so two writers never both succeed.

use async_trait::async_trait;
use rekey_core::{ConfigComputer, RekeyResult, ResourcePolicy};
use tracing::{debug, info};

use crate::controller::{Controller, ReconcileOutcome};
use crate::effects::ControllerEffects;
use crate::snapshot::ClusterSnapshot;

/// Writes target configuration transitions.
#[derive(Debug, Clone)]
pub struct ConfigApplyController {
    effects: ControllerEffects,
    resources: ResourcePolicy,
    computer: ConfigComputer,
}

impl ConfigApplyController {
    /// Apply controller for the configured `resources`.
    pub fn new(effects: ControllerEffects, resources: ResourcePolicy) -> Self {
        Self {
            effects,
            resources,
            computer: ConfigComputer::new(),
        }
    }
}

#[async_trait]
impl Controller for ConfigApplyController {
    fn name(&self) -> &'static str {
        "config-apply"
    }

    async fn reconcile(&self) -> RekeyResult<ReconcileOutcome> {
        let snapshot = ClusterSnapshot::load(&self.effects).await?;
        let current = snapshot.target();
        let convergence = snapshot.convergence();

        let outcome = self.computer.compute(
            &snapshot.key_records(),
            &self.resources,
            &current,
            convergence.observed(),
        )?;
        if !outcome.is_change() {
            debug!("target configuration up to date");
            return Ok(ReconcileOutcome::Idle);
        }

        if !convergence.is_converged_on(&current) {
            debug!(rule = %outcome.rule, status = %convergence.status(), "waiting for replicas");
            return Ok(ReconcileOutcome::deferred(format!(
                "{} waits for replicas: {}",
                outcome.rule,
                convergence.status()
            )));
        }

        let version = self
            .effects
            .configs
            .write_target(&outcome.desired, snapshot.target_version())
            .await?;
        info!(
            rule = %outcome.rule,
            version,
            target = %outcome.desired,
            "applied target configuration"
        );
        Ok(ReconcileOutcome::applied(outcome.rule.to_string()))
    }
}
