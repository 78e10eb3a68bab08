//! Spawned runners driven by store change triggers rather than explicit steps.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::time::Duration;

use rekey_core::{EncryptionFunction, KeyId, KeyStage, RekeyConfig};
use rekey_effects::WatchableStore;
use rekey_testkit::{init_test_tracing, TestCluster, TestClusterConfig};
use tokio::time::{sleep, Instant};

async fn settled_on_first_key(cluster: &TestCluster) -> bool {
    let snapshot = cluster.snapshot().await.unwrap();
    let target = snapshot.target();
    let written = target
        .resources()
        .all(|(_, providers)| providers.write_key().map(|key| key.id) == Some(KeyId(1)));
    let no_fallback = target
        .resources()
        .all(|(_, providers)| !providers.has_identity_fallback());
    !target.is_empty()
        && written
        && no_fallback
        && snapshot.key_stages().get(&KeyId(1)) == Some(&KeyStage::Migrated)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn spawned_controllers_enable_encryption() {
    init_test_tracing();
    let cluster = TestCluster::with_config(TestClusterConfig {
        rekey: RekeyConfig {
            resync_interval_secs: 1,
            ..RekeyConfig::default()
        },
        ..TestClusterConfig::default()
    })
    .await
    .unwrap();

    let running = cluster.controllers().spawn(cluster.store().watch());
    cluster.set_mode(EncryptionFunction::AesCbc).await.unwrap();

    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        // Stand in for the rollout tooling reacting to new targets.
        cluster.fleet().rollout_all().await.unwrap();
        if settled_on_first_key(&cluster).await {
            break;
        }
        assert!(Instant::now() < deadline, "controllers did not settle in time");
        sleep(Duration::from_millis(20)).await;
    }

    let health = running.health();
    assert_eq!(health.len(), 4);
    assert!(health.values().all(|runner| runner.passes > 0));
    assert!(health["key-mint"].applied >= 1);
    running.shutdown().await;

    let ids: Vec<KeyId> = cluster.keys().await.unwrap().iter().map(|key| key.id).collect();
    assert_eq!(ids, vec![KeyId(1)]);
}
