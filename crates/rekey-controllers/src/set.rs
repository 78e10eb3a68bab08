//! The four controllers of one component, wired to shared triggers.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::future::join_all;
use parking_lot::RwLock;
use rekey_core::{KeyMintPolicy, RekeyConfig, RekeyResult, ResourcePolicy, RetryConfig};
use rekey_effects::{MigrationCompletion, StateChange};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::apply::ConfigApplyController;
use crate::controller::{Controller, ReconcileOutcome};
use crate::effects::ControllerEffects;
use crate::migration::MigrationController;
use crate::mint::KeyMintController;
use crate::prune::PruneController;
use crate::runner::{ControllerRunner, RunnerHealth, Trigger};

/// Capacity of the fan-out trigger channel.
pub const TRIGGER_CHANNEL_CAPACITY: usize = 256;

// =============================================================================
// Controller Set
// =============================================================================

/// Key mint, configuration apply, migration, and prune controllers sharing one
/// effect bundle.
pub struct ControllerSet {
    effects: ControllerEffects,
    controllers: Vec<Arc<dyn Controller>>,
    resync_interval: std::time::Duration,
    retry: RetryConfig,
}

impl ControllerSet {
    /// Build the controllers for `config`, encrypting `resources`.
    pub fn new(effects: ControllerEffects, resources: ResourcePolicy, config: &RekeyConfig) -> Self {
        let controllers: Vec<Arc<dyn Controller>> = vec![
            Arc::new(KeyMintController::new(
                effects.clone(),
                resources.clone(),
                KeyMintPolicy::new(config.rotation_interval()),
            )),
            Arc::new(ConfigApplyController::new(effects.clone(), resources.clone())),
            Arc::new(MigrationController::new(effects.clone(), resources)),
            Arc::new(PruneController::new(effects.clone(), config.retention)),
        ];
        Self {
            effects,
            controllers,
            resync_interval: config.resync_interval(),
            retry: config.backoff.clone(),
        }
    }

    /// Controllers in pipeline order.
    pub fn controllers(&self) -> &[Arc<dyn Controller>] {
        &self.controllers
    }

    /// Run every controller once, in pipeline order, without retrying.
    pub async fn reconcile_once(&self) -> Vec<(&'static str, RekeyResult<ReconcileOutcome>)> {
        let mut results = Vec::with_capacity(self.controllers.len());
        for controller in &self.controllers {
            let result = controller.reconcile().await;
            results.push((controller.name(), result));
        }
        results
    }

    /// Spawn one runner per controller plus the trigger forwarders.
    ///
    /// `changes` is a subscription to the shared-state store backing the
    /// effects. Must be called from within a tokio runtime.
    pub fn spawn(&self, changes: broadcast::Receiver<StateChange>) -> RunningControllers {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (trigger_tx, _) = broadcast::channel(TRIGGER_CHANNEL_CAPACITY);

        let mut health = BTreeMap::new();
        let mut handles = Vec::with_capacity(self.controllers.len() + 2);
        for controller in &self.controllers {
            let runner = ControllerRunner::new(
                Arc::clone(controller),
                trigger_tx.subscribe(),
                shutdown_rx.clone(),
                self.resync_interval,
                self.retry.clone(),
            );
            health.insert(controller.name(), runner.health());
            handles.push(tokio::spawn(runner.run()));
        }

        handles.push(tokio::spawn(forward_state_changes(
            changes,
            trigger_tx.clone(),
            shutdown_rx.clone(),
        )));
        handles.push(tokio::spawn(forward_migrations(
            self.effects.migrations.subscribe(),
            trigger_tx,
            shutdown_rx,
        )));

        info!(controllers = self.controllers.len(), "controllers running");
        RunningControllers {
            shutdown: shutdown_tx,
            handles,
            health,
        }
    }
}

// =============================================================================
// Running Controllers
// =============================================================================

/// Handle to spawned runners.
pub struct RunningControllers {
    shutdown: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
    health: BTreeMap<&'static str, Arc<RwLock<RunnerHealth>>>,
}

impl RunningControllers {
    /// Current statistics of every runner, by controller name.
    pub fn health(&self) -> BTreeMap<&'static str, RunnerHealth> {
        self.health
            .iter()
            .map(|(name, health)| (*name, health.read().clone()))
            .collect()
    }

    /// Signal shutdown and wait for every task to stop. Passes in flight
    /// finish first.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for result in join_all(self.handles).await {
            if let Err(err) = result {
                warn!(error = %err, "controller task ended abnormally");
            }
        }
        info!("controllers stopped");
    }
}

// =============================================================================
// Trigger Forwarders
// =============================================================================

async fn forward_state_changes(
    mut changes: broadcast::Receiver<StateChange>,
    triggers: broadcast::Sender<Trigger>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            biased;

            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }

            received = changes.recv() => match received {
                Ok(change) => {
                    let _ = triggers.send(Trigger::StateChanged { name: change.name });
                }
                Err(RecvError::Lagged(skipped)) => {
                    debug!(skipped, "state change backlog dropped");
                    let _ = triggers.send(Trigger::Lagged);
                }
                Err(RecvError::Closed) => break,
            },
        }
    }
}

async fn forward_migrations(
    mut completions: broadcast::Receiver<MigrationCompletion>,
    triggers: broadcast::Sender<Trigger>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            biased;

            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }

            received = completions.recv() => match received {
                Ok(completion) => {
                    let _ = triggers.send(Trigger::MigrationFinished {
                        resource: completion.resource,
                        key: completion.key,
                    });
                }
                Err(RecvError::Lagged(skipped)) => {
                    debug!(skipped, "migration completion backlog dropped");
                    let _ = triggers.send(Trigger::Lagged);
                }
                Err(RecvError::Closed) => break,
            },
        }
    }
}
