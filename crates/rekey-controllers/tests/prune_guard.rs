//! Deletion safety: the prune controller against configurations that change
//! underneath it, and concurrent minters racing for the same key id.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use async_trait::async_trait;
use rekey_controllers::{
    Controller, ControllerEffects, KeyMintController, PruneController, ReconcileOutcome,
};
use rekey_core::effects::{ConfigurationStore, VersionToken, Versioned};
use rekey_core::{
    EncryptionFunction, KeyId, KeyMintPolicy, RekeyConfig, RekeyResult, ReplicaStatus,
    ResourcePolicy, Revision, TargetConfiguration,
};
use rekey_effects::StateReplicaRegistry;
use rekey_testkit::{init_test_tracing, TestCluster, TestClusterConfig};

const WEEK: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Serves the real target on the first read and `stale` on every later one,
/// as if another writer reverted the target between two reads.
struct RacingTarget {
    inner: Arc<dyn ConfigurationStore>,
    stale: TargetConfiguration,
    reads: AtomicUsize,
}

#[async_trait]
impl ConfigurationStore for RacingTarget {
    async fn current_target(&self) -> RekeyResult<Option<Versioned<TargetConfiguration>>> {
        let current = self.inner.current_target().await?;
        if self.reads.fetch_add(1, Ordering::SeqCst) == 0 {
            return Ok(current);
        }
        let version = current.map(|target| target.version + 1).unwrap_or(1);
        Ok(Some(Versioned::new(version, self.stale.clone())))
    }

    async fn write_target(
        &self,
        config: &TargetConfiguration,
        expected: Option<VersionToken>,
    ) -> RekeyResult<VersionToken> {
        self.inner.write_target(config, expected).await
    }

    async fn observed_configuration(
        &self,
        revision: &Revision,
    ) -> RekeyResult<Option<TargetConfiguration>> {
        self.inner.observed_configuration(revision).await
    }
}

/// Cluster that rotated once with generous retention, plus the target it
/// served before the rotation (which references key 1).
async fn rotated_cluster() -> (TestCluster, TargetConfiguration) {
    init_test_tracing();
    let cluster = TestCluster::with_config(TestClusterConfig {
        rekey: RekeyConfig {
            retention: 10,
            ..RekeyConfig::default()
        },
        ..TestClusterConfig::default()
    })
    .await
    .unwrap();
    cluster.set_mode(EncryptionFunction::AesCbc).await.unwrap();
    cluster.settle().await.unwrap();
    let before_rotation = cluster.target().await.unwrap();

    cluster.clock().advance(WEEK);
    cluster.settle().await.unwrap();
    let ids: Vec<KeyId> = cluster.keys().await.unwrap().iter().map(|key| key.id).collect();
    assert_eq!(ids, vec![KeyId(1), KeyId(2)]);
    assert!(!cluster.target().await.unwrap().references(KeyId(1)));
    (cluster, before_rotation)
}

#[tokio::test]
async fn retired_key_is_deleted_once_nothing_references_it() {
    let (cluster, _) = rotated_cluster().await;
    let prune = PruneController::new(cluster.effects().clone(), 1);

    let outcome = prune.reconcile().await.unwrap();
    assert_eq!(outcome, ReconcileOutcome::applied("deleted key(s) 1"));

    let ids: Vec<KeyId> = cluster.keys().await.unwrap().iter().map(|key| key.id).collect();
    assert_eq!(ids, vec![KeyId(2)]);
    assert_matches!(prune.reconcile().await, Ok(ReconcileOutcome::Idle));
}

#[tokio::test]
async fn key_referenced_after_marking_survives() {
    let (cluster, before_rotation) = rotated_cluster().await;
    let effects = ControllerEffects {
        configs: Arc::new(RacingTarget {
            inner: Arc::clone(&cluster.effects().configs),
            stale: before_rotation,
            reads: AtomicUsize::new(0),
        }),
        ..cluster.effects().clone()
    };
    let prune = PruneController::new(effects, 1);

    let outcome = prune.reconcile().await.unwrap();
    assert_matches!(outcome, ReconcileOutcome::Deferred { .. });

    let keys = cluster.keys().await.unwrap();
    let retired = keys.iter().find(|key| key.id == KeyId(1)).expect("key 1 was deleted");
    assert!(!retired.deletion_requested, "refused deletion left the mark behind");
}

#[tokio::test]
async fn stale_deletion_mark_is_cleared() {
    let (cluster, _) = rotated_cluster().await;
    let snapshot = cluster.snapshot().await.unwrap();
    let current = snapshot.key(KeyId(2)).unwrap();
    cluster.effects().keys.mark_for_deletion(current).await.unwrap();

    let prune = PruneController::new(cluster.effects().clone(), 10);
    let outcome = prune.reconcile().await.unwrap();
    assert_eq!(outcome, ReconcileOutcome::applied("cleared 1 deletion mark(s)"));
    assert!(cluster
        .keys()
        .await
        .unwrap()
        .iter()
        .all(|key| !key.deletion_requested));
}

#[tokio::test]
async fn unpublished_revision_blocks_pruning() {
    let (cluster, _) = rotated_cluster().await;
    // A replica reporting a revision nobody published an observed config for.
    StateReplicaRegistry::new(cluster.store().clone(), cluster.names().clone())
        .report(ReplicaStatus::running("replica-9", Revision::new("unpublished")))
        .await
        .unwrap();

    let prune = PruneController::new(cluster.effects().clone(), 1);
    assert_matches!(prune.reconcile().await, Ok(ReconcileOutcome::Deferred { .. }));
    assert_eq!(cluster.keys().await.unwrap().len(), 2);
}

#[tokio::test]
async fn concurrent_minters_create_one_key() {
    init_test_tracing();
    let cluster = TestCluster::start().await.unwrap();
    cluster.set_mode(EncryptionFunction::AesCbc).await.unwrap();

    let minter = || {
        KeyMintController::new(
            cluster.effects().clone(),
            ResourcePolicy::builtin(),
            KeyMintPolicy::new(WEEK),
        )
    };
    let (first, second) = (minter(), minter());
    let (a, b) = tokio::join!(first.reconcile(), second.reconcile());

    let applied = [&a, &b]
        .iter()
        .filter(|result| matches!(result, Ok(outcome) if outcome.is_applied()))
        .count();
    assert_eq!(applied, 1, "outcomes: {a:?} {b:?}");
    for result in [a, b] {
        if let Err(err) = result {
            assert!(err.is_transient(), "unexpected error: {err}");
        }
    }
    assert_eq!(cluster.keys().await.unwrap().len(), 1);
}
