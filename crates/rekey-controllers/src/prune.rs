//! Prune controller.
//!
//! Deletes migrated keys beyond the retention count with a two-phase delete:
//! the record is marked first, then the target and every reported revision's
//! observed configuration are re-read and handed to the [`DeletionGuard`].
//! Only the permit it issues can remove the record. A refused permit clears the
//! mark again and is logged as an invariant violation; the key survives.

use std::collections::BTreeSet;

use async_trait::async_trait;
use rekey_core::effects::Versioned;
use rekey_core::{
    select_prune_victims, DeletionGuard, EncryptionKey, KeyId, RekeyResult, ReplicaConvergenceView,
    TargetConfiguration,
};
use tracing::{debug, error, info};

use crate::controller::{Controller, ReconcileOutcome};
use crate::effects::ControllerEffects;
use crate::snapshot::ClusterSnapshot;

/// Removes keys no configuration can need anymore.
#[derive(Debug, Clone)]
pub struct PruneController {
    effects: ControllerEffects,
    retention: usize,
}

impl PruneController {
    /// Prune controller keeping `retention` migrated keys per resource.
    pub fn new(effects: ControllerEffects, retention: usize) -> Self {
        Self { effects, retention }
    }

    /// Observed configurations of every revision any replica reports, or
    /// `None` when one of them was never published.
    async fn reported_configurations(&self) -> RekeyResult<Option<Vec<TargetConfiguration>>> {
        let view = ReplicaConvergenceView::load(
            self.effects.replicas.as_ref(),
            self.effects.configs.as_ref(),
        )
        .await?;
        let mut configs = Vec::with_capacity(view.reported_revisions().len());
        for revision in view.reported_revisions() {
            match self.effects.configs.observed_configuration(revision).await? {
                Some(config) => configs.push(config),
                None => {
                    debug!(revision = %revision, "revision has no observed configuration");
                    return Ok(None);
                }
            }
        }
        Ok(Some(configs))
    }

    /// Clear deletion marks left by an interrupted pass on keys outside `keep`.
    async fn clear_stale_marks(
        &self,
        snapshot: &ClusterSnapshot,
        keep: &BTreeSet<KeyId>,
    ) -> RekeyResult<usize> {
        let mut cleared = 0;
        for key in snapshot.keys() {
            if key.value.deletion_requested && !keep.contains(&key.value.id) {
                self.effects.keys.clear_deletion_mark(key).await?;
                info!(key_id = %key.value.id, "cleared stale deletion mark");
                cleared += 1;
            }
        }
        Ok(cleared)
    }

    /// Mark, verify, and remove one key. Returns whether it was deleted.
    async fn delete(&self, key: &Versioned<EncryptionKey>) -> RekeyResult<bool> {
        let marked = if key.value.deletion_requested {
            key.clone()
        } else {
            self.effects.keys.mark_for_deletion(key).await?
        };

        // Re-read after marking: anything written before the mark is visible now.
        let target = self.effects.configs.current_target().await?;
        let Some(observed) = self.reported_configurations().await? else {
            // Cannot prove the key unused; leave the mark for the next pass.
            return Ok(false);
        };

        match DeletionGuard::verify(&marked, target.as_ref().map(|t| &t.value), observed.iter()) {
            Ok(permit) => {
                self.effects.keys.remove_key(permit).await?;
                info!(key_id = %key.value.id, "deleted key");
                Ok(true)
            }
            Err(err) => {
                error!(key_id = %key.value.id, error = %err, "refusing to delete key");
                self.effects.keys.clear_deletion_mark(&marked).await?;
                Ok(false)
            }
        }
    }
}

#[async_trait]
impl Controller for PruneController {
    fn name(&self) -> &'static str {
        "prune"
    }

    async fn reconcile(&self) -> RekeyResult<ReconcileOutcome> {
        let snapshot = ClusterSnapshot::load(&self.effects).await?;
        let victims = select_prune_victims(&snapshot.key_records(), self.retention);

        let observed = if victims.is_empty() {
            Some(Vec::new())
        } else {
            self.reported_configurations().await?
        };
        let Some(observed) = observed else {
            let keep: BTreeSet<KeyId> = victims.iter().copied().collect();
            let cleared = self.clear_stale_marks(&snapshot, &keep).await?;
            debug!(cleared, "waiting for observed configurations");
            return Ok(ReconcileOutcome::deferred(
                "a reported revision has no observed configuration",
            ));
        };

        // Keys still referenced somewhere are not even marked; the guard would
        // refuse them anyway.
        let target = snapshot.target();
        let (deletable, blocked): (Vec<KeyId>, Vec<KeyId>) = victims.into_iter().partition(|id| {
            !target.references(*id) && !observed.iter().any(|config| config.references(*id))
        });

        let keep: BTreeSet<KeyId> = deletable.iter().copied().collect();
        let cleared = self.clear_stale_marks(&snapshot, &keep).await?;

        let mut deleted = Vec::new();
        for id in &deletable {
            let Some(key) = snapshot.key(*id) else {
                continue;
            };
            if self.delete(key).await? {
                deleted.push(id.to_string());
            }
        }

        if !deleted.is_empty() {
            return Ok(ReconcileOutcome::applied(format!(
                "deleted key(s) {}",
                deleted.join(", ")
            )));
        }
        if cleared > 0 {
            return Ok(ReconcileOutcome::applied(format!(
                "cleared {cleared} deletion mark(s)"
            )));
        }
        if !blocked.is_empty() || !deletable.is_empty() {
            return Ok(ReconcileOutcome::deferred(format!(
                "{} key(s) awaiting safe deletion",
                blocked.len() + deletable.len()
            )));
        }
        Ok(ReconcileOutcome::Idle)
    }
}
