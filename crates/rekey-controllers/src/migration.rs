//! Migration controller.
//!
//! Once every replica serves the current target and the target is stable,
//! rewrites stored data of each resource under its write key and records the
//! confirmed migrations on the key record. Recording is what later lets the
//! configuration apply controller retire older read keys.

use async_trait::async_trait;
use rekey_core::{ConfigComputer, GroupResource, RekeyError, RekeyResult, ResourcePolicy};
use rekey_effects::MigrationJobStatus;
use tracing::{debug, info, warn};

use crate::controller::{Controller, ReconcileOutcome};
use crate::effects::ControllerEffects;
use crate::snapshot::ClusterSnapshot;

/// Drives storage migrations to the current write key.
#[derive(Debug, Clone)]
pub struct MigrationController {
    effects: ControllerEffects,
    resources: ResourcePolicy,
    computer: ConfigComputer,
}

impl MigrationController {
    /// Migration controller for `resources`.
    pub fn new(effects: ControllerEffects, resources: ResourcePolicy) -> Self {
        Self {
            effects,
            resources,
            computer: ConfigComputer::new(),
        }
    }
}

#[async_trait]
impl Controller for MigrationController {
    fn name(&self) -> &'static str {
        "migration"
    }

    async fn reconcile(&self) -> RekeyResult<ReconcileOutcome> {
        let snapshot = ClusterSnapshot::load(&self.effects).await?;
        let current = snapshot.target();
        let convergence = snapshot.convergence();

        let Some(write) = current.write_key() else {
            return Ok(ReconcileOutcome::Idle);
        };
        // Anything started for an older write key is stale now.
        self.effects.migrations.forget_except(write.id);

        // A job for an older key could still rewrite data under that key after
        // this key is recorded as migrated and the older key is dropped.
        let stopping = self.effects.migrations.stopping();
        if stopping > 0 {
            return Ok(ReconcileOutcome::deferred(format!(
                "waiting for {stopping} stale migration job(s) to stop"
            )));
        }

        if !convergence.is_converged_on(&current) {
            return Ok(ReconcileOutcome::deferred(format!(
                "replicas not serving the target: {}",
                convergence.status()
            )));
        }

        // Migrating while a transition is pending would rewrite data under a key
        // some replicas are about to stop reading.
        let pending = self.computer.compute(
            &snapshot.key_records(),
            &self.resources,
            &current,
            convergence.observed(),
        )?;
        if pending.is_change() {
            return Ok(ReconcileOutcome::deferred(format!(
                "configuration transition pending: {}",
                pending.rule
            )));
        }

        let Some(record) = snapshot.key(write.id) else {
            return Err(RekeyError::invariant_violation(format!(
                "target writes with key {} which has no record",
                write.id
            )));
        };

        let unmigrated: Vec<&GroupResource> = current
            .resources()
            .filter(|(resource, providers)| {
                providers.write_key() == Some(write) && !record.value.is_migrated_for(resource)
            })
            .map(|(resource, _)| resource)
            .collect();
        if unmigrated.is_empty() {
            debug!(key_id = %write.id, "write key fully migrated");
            return Ok(ReconcileOutcome::Idle);
        }

        let mut finished = Vec::new();
        let mut failures = Vec::new();
        let mut running = 0usize;
        for resource in unmigrated {
            match self.effects.migrations.ensure_migration(resource, write) {
                MigrationJobStatus::Succeeded => finished.push(resource.clone()),
                MigrationJobStatus::InProgress => running += 1,
                MigrationJobStatus::Failed(reason) => failures.push(format!("{resource}: {reason}")),
            }
        }

        if !finished.is_empty() {
            let now = self.effects.time.physical_time().await?;
            let mut updated = record.clone();
            for resource in &finished {
                updated.value.record_migration(resource.clone(), now);
            }
            self.effects.keys.update_key(&updated).await?;
            let resources: Vec<String> = finished.iter().map(ToString::to_string).collect();
            info!(key_id = %write.id, resources = ?resources, "recorded migration");
        }

        if !failures.is_empty() {
            warn!(key_id = %write.id, failures = ?failures, "migration jobs failed");
            return Err(RekeyError::migration(format!(
                "migration to key {} failed: {}",
                write.id,
                failures.join("; ")
            )));
        }

        if !finished.is_empty() {
            return Ok(ReconcileOutcome::applied(format!(
                "recorded {} migration(s) to key {}",
                finished.len(),
                write.id
            )));
        }
        Ok(ReconcileOutcome::deferred(format!(
            "{running} migration(s) to key {} in progress",
            write.id
        )))
    }
}
