//! Whole-system harness: one in-memory store, a simulated fleet, the four
//! controllers, and deterministic clock, randomness, and migrations.
//!
//! Controllers are stepped explicitly rather than run by their runners, so a
//! test decides exactly when replicas roll out and when time passes.

use std::sync::Arc;

use rekey_controllers::{ClusterSnapshot, ControllerEffects, ControllerSet, ReconcileOutcome};
use rekey_core::{
    EncryptionFunction, EncryptionKey, ObjectNames, RekeyConfig, RekeyError, RekeyResult,
    ResourcePolicy, Revision, TargetConfiguration,
};
use rekey_effects::{EncryptionModeStore, MemoryStateStore};
use tracing::debug;

use crate::clock::ControllableClock;
use crate::conflict::ConflictInjectingStore;
use crate::fleet::SimulatedFleet;
use crate::migrator::ScriptedMigrator;
use crate::random::SeededRandom;

/// Store type every harness component shares.
pub type ClusterStore = ConflictInjectingStore<MemoryStateStore>;

/// Upper bound on [`TestCluster::settle`] rounds.
pub const MAX_SETTLE_ROUNDS: usize = 200;

/// Harness settings.
#[derive(Debug, Clone)]
pub struct TestClusterConfig {
    pub replicas: usize,
    pub resources: ResourcePolicy,
    pub rekey: RekeyConfig,
    /// Roll every new target out to all replicas during `settle`.
    pub auto_rollout: bool,
}

impl Default for TestClusterConfig {
    fn default() -> Self {
        Self {
            replicas: 3,
            resources: ResourcePolicy::builtin(),
            rekey: RekeyConfig::default(),
            auto_rollout: true,
        }
    }
}

/// What a call to [`TestCluster::settle`] did.
#[derive(Debug, Clone, Default)]
pub struct SettleReport {
    pub rounds: usize,
    /// `controller: action` for every applied pass, in order.
    pub applied: Vec<String>,
    pub rollouts: Vec<Revision>,
    pub transient_errors: Vec<String>,
}

impl SettleReport {
    /// Applied actions of one controller.
    pub fn applied_by(&self, controller: &str) -> Vec<&str> {
        let prefix = format!("{controller}: ");
        self.applied
            .iter()
            .filter_map(|entry| entry.strip_prefix(prefix.as_str()))
            .collect()
    }
}

pub struct TestCluster {
    store: ClusterStore,
    names: ObjectNames,
    clock: ControllableClock,
    random: SeededRandom,
    migrator: ScriptedMigrator,
    fleet: SimulatedFleet<ClusterStore>,
    mode: EncryptionModeStore<ClusterStore>,
    config: TestClusterConfig,
    effects: ControllerEffects,
    controllers: ControllerSet,
}

impl TestCluster {
    /// Three replicas, builtin resources, default settings.
    pub async fn start() -> RekeyResult<Self> {
        Self::with_config(TestClusterConfig::default()).await
    }

    pub async fn with_config(config: TestClusterConfig) -> RekeyResult<Self> {
        config.rekey.validate()?;
        let store = ConflictInjectingStore::new(MemoryStateStore::new());
        let names = config.rekey.object_names();
        let clock = ControllableClock::default();
        let random = SeededRandom::deterministic();
        let migrator = ScriptedMigrator::new();
        let fleet = SimulatedFleet::new(store.clone(), names.clone());
        fleet.start(config.replicas).await?;
        let mode = EncryptionModeStore::new(store.clone());

        let (effects, controllers) =
            Self::build_controllers(&store, &names, &clock, &random, &migrator, &config);
        Ok(Self {
            store,
            names,
            clock,
            random,
            migrator,
            fleet,
            mode,
            config,
            effects,
            controllers,
        })
    }

    fn build_controllers(
        store: &ClusterStore,
        names: &ObjectNames,
        clock: &ControllableClock,
        random: &SeededRandom,
        migrator: &ScriptedMigrator,
        config: &TestClusterConfig,
    ) -> (ControllerEffects, ControllerSet) {
        let effects = ControllerEffects::over_store(
            store.clone(),
            names.clone(),
            Arc::new(clock.clone()),
            Arc::new(random.clone()),
            Arc::new(migrator.clone()),
        );
        let controllers = ControllerSet::new(effects.clone(), config.resources.clone(), &config.rekey);
        (effects, controllers)
    }

    /// Replace the controllers with fresh ones over the same shared state, as
    /// after a process restart. In-memory migration tracking is lost.
    pub fn restart_controllers(&mut self) {
        let (effects, controllers) = Self::build_controllers(
            &self.store,
            &self.names,
            &self.clock,
            &self.random,
            &self.migrator,
            &self.config,
        );
        self.effects = effects;
        self.controllers = controllers;
    }

    /// Change the controller settings; takes effect as a restart.
    pub fn reconfigure(&mut self, rekey: RekeyConfig) -> RekeyResult<()> {
        rekey.validate()?;
        self.config.rekey = rekey;
        self.restart_controllers();
        Ok(())
    }

    /// Change the encrypted resource set; takes effect as a restart.
    pub fn set_resources(&mut self, resources: ResourcePolicy) {
        self.config.resources = resources;
        self.restart_controllers();
    }

    pub fn set_auto_rollout(&mut self, enabled: bool) {
        self.config.auto_rollout = enabled;
    }

    /// Set the user-facing encryption mode.
    pub async fn set_mode(&self, function: EncryptionFunction) -> RekeyResult<()> {
        self.mode.set_mode(Some(function)).await?;
        Ok(())
    }

    /// Run every controller once, in pipeline order.
    pub async fn step(&self) -> Vec<(&'static str, RekeyResult<ReconcileOutcome>)> {
        self.controllers.reconcile_once().await
    }

    /// Step, finish migrations, and roll out until nothing moves.
    ///
    /// Transient errors count as progress and are retried on the next round;
    /// any other error aborts.
    pub async fn settle(&self) -> RekeyResult<SettleReport> {
        let mut report = SettleReport::default();
        for _ in 0..MAX_SETTLE_ROUNDS {
            report.rounds += 1;
            let mut progressed = false;

            for (name, result) in self.step().await {
                match result {
                    Ok(ReconcileOutcome::Applied { action }) => {
                        debug!(controller = name, %action, "settle: applied");
                        report.applied.push(format!("{name}: {action}"));
                        progressed = true;
                    }
                    Ok(_) => {}
                    Err(err) if err.is_transient() => {
                        report.transient_errors.push(format!("{name}: {err}"));
                        progressed = true;
                    }
                    Err(err) => return Err(err),
                }
            }

            if self.wait_for_migrations().await {
                progressed = true;
            }

            if self.config.auto_rollout {
                if let Some(revision) = self.fleet.rollout_all().await? {
                    report.rollouts.push(revision);
                    progressed = true;
                }
            }

            if !progressed {
                return Ok(report);
            }
        }
        Err(RekeyError::internal(format!(
            "cluster did not settle within {MAX_SETTLE_ROUNDS} rounds"
        )))
    }

    /// Let in-flight migration jobs finish. Returns whether any job ended.
    ///
    /// Held jobs still get polled far enough to register with the migrator,
    /// but only jobs that actually end count as progress.
    pub async fn wait_for_migrations(&self) -> bool {
        let before = self.effects.migrations.in_flight();
        if before == 0 {
            return false;
        }
        let mut last = before;
        let mut quiet = 0;
        while quiet < 16 {
            tokio::task::yield_now().await;
            let now = self.effects.migrations.in_flight();
            if now == 0 {
                break;
            }
            if now == last {
                quiet += 1;
            } else {
                last = now;
                quiet = 0;
            }
        }
        self.effects.migrations.in_flight() < before
    }

    pub async fn snapshot(&self) -> RekeyResult<ClusterSnapshot> {
        ClusterSnapshot::load(&self.effects).await
    }

    /// Key records, ascending by id.
    pub async fn keys(&self) -> RekeyResult<Vec<EncryptionKey>> {
        Ok(self.snapshot().await?.key_records())
    }

    /// Current target; empty before the first write.
    pub async fn target(&self) -> RekeyResult<TargetConfiguration> {
        Ok(self.snapshot().await?.target())
    }

    pub fn store(&self) -> &ClusterStore {
        &self.store
    }

    pub fn names(&self) -> &ObjectNames {
        &self.names
    }

    pub fn clock(&self) -> &ControllableClock {
        &self.clock
    }

    pub fn migrator(&self) -> &ScriptedMigrator {
        &self.migrator
    }

    pub fn fleet(&self) -> &SimulatedFleet<ClusterStore> {
        &self.fleet
    }

    pub fn effects(&self) -> &ControllerEffects {
        &self.effects
    }

    pub fn controllers(&self) -> &ControllerSet {
        &self.controllers
    }

    pub fn resources(&self) -> &ResourcePolicy {
        &self.config.resources
    }
}
