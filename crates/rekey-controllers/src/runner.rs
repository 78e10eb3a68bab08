//! Reconciliation loop for one controller.
//!
//! A runner calls [`Controller::reconcile`] once at start-up, then again on
//! every trigger (a shared-state change or a finished migration) and on every
//! resync tick. Bursts of triggers collapse into a single pass. Transient
//! failures are retried after an exponential backoff; permanent failures are
//! logged and wait for the next trigger.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use rekey_core::{Backoff, GroupResource, KeyId, RetryConfig};
use serde::Serialize;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::sync::{broadcast, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, info_span, trace, warn, Instrument};

use crate::controller::{Controller, ReconcileOutcome};

// =============================================================================
// Triggers
// =============================================================================

/// Reason to run a pass before the next resync.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    /// A shared-state object was created, updated, or deleted.
    StateChanged {
        /// Name of the changed object.
        name: String,
    },
    /// A migration job finished, successfully or not.
    MigrationFinished {
        /// Migrated resource.
        resource: GroupResource,
        /// Key the job migrated to.
        key: KeyId,
    },
    /// Notifications were dropped; only a full pass catches up.
    Lagged,
}

// =============================================================================
// Runner Health
// =============================================================================

/// Pass statistics of one runner.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunnerHealth {
    /// Completed passes, failed or not.
    pub passes: u64,
    /// Passes that wrote to the shared state.
    pub applied: u64,
    /// Failures since the last successful pass.
    pub consecutive_failures: u32,
    /// Outcome of the last successful pass.
    pub last_outcome: Option<String>,
    /// Last failure, cleared by the next success.
    pub last_error: Option<String>,
}

impl RunnerHealth {
    fn record_success(&mut self, outcome: &ReconcileOutcome) {
        self.passes += 1;
        if outcome.is_applied() {
            self.applied += 1;
        }
        self.consecutive_failures = 0;
        self.last_outcome = Some(outcome.to_string());
        self.last_error = None;
    }

    fn record_failure(&mut self, error: String) {
        self.passes += 1;
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.last_error = Some(error);
    }
}

// =============================================================================
// Controller Runner
// =============================================================================

/// Drives one controller until shutdown.
pub struct ControllerRunner {
    controller: Arc<dyn Controller>,
    triggers: broadcast::Receiver<Trigger>,
    shutdown: watch::Receiver<bool>,
    resync_interval: Duration,
    retry: RetryConfig,
    health: Arc<RwLock<RunnerHealth>>,
}

impl ControllerRunner {
    /// Runner for `controller`, woken by `triggers` and every `resync_interval`.
    pub fn new(
        controller: Arc<dyn Controller>,
        triggers: broadcast::Receiver<Trigger>,
        shutdown: watch::Receiver<bool>,
        resync_interval: Duration,
        retry: RetryConfig,
    ) -> Self {
        Self {
            controller,
            triggers,
            shutdown,
            resync_interval,
            retry,
            health: Arc::new(RwLock::new(RunnerHealth::default())),
        }
    }

    /// Shared handle to the runner's statistics.
    pub fn health(&self) -> Arc<RwLock<RunnerHealth>> {
        Arc::clone(&self.health)
    }

    /// Run until the shutdown signal flips to `true` or its sender is dropped.
    pub async fn run(self) {
        let Self {
            controller,
            mut triggers,
            mut shutdown,
            resync_interval,
            retry,
            health,
        } = self;
        let name = controller.name();
        info!(controller = name, "controller started");

        let mut backoff = retry.backoff();
        let mut resync = tokio::time::interval_at(Instant::now() + resync_interval, resync_interval);
        resync.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut triggers_open = true;

        'run: loop {
            if *shutdown.borrow() {
                break;
            }

            if let Some(delay) = run_pass(controller.as_ref(), &mut backoff, &health).await {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => continue 'run,
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break 'run;
                        }
                        continue 'run;
                    }
                }
            }

            // Wait for the next reason to run a pass.
            loop {
                tokio::select! {
                    biased;

                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break 'run;
                        }
                    }

                    received = triggers.recv(), if triggers_open => match received {
                        Ok(trigger) => {
                            trace!(controller = name, ?trigger, "triggered");
                            drain(&mut triggers);
                            break;
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            debug!(controller = name, skipped, "trigger backlog dropped");
                            drain(&mut triggers);
                            break;
                        }
                        Err(RecvError::Closed) => {
                            debug!(controller = name, "trigger source closed; resync only");
                            triggers_open = false;
                        }
                    },

                    _ = resync.tick() => {
                        trace!(controller = name, "resync");
                        break;
                    }
                }
            }
        }

        info!(controller = name, "controller stopped");
    }
}

/// Run one pass. Returns the retry delay after a transient failure.
async fn run_pass(
    controller: &dyn Controller,
    backoff: &mut Backoff,
    health: &RwLock<RunnerHealth>,
) -> Option<Duration> {
    let name = controller.name();
    let span = info_span!("reconcile", controller = name);
    let result = controller.reconcile().instrument(span).await;

    match result {
        Ok(outcome) => {
            backoff.reset();
            match &outcome {
                ReconcileOutcome::Applied { .. } => info!(controller = name, %outcome, "pass finished"),
                _ => debug!(controller = name, %outcome, "pass finished"),
            }
            health.write().record_success(&outcome);
            None
        }
        Err(err) if err.is_transient() => {
            let delay = backoff.next_delay();
            warn!(
                controller = name,
                error = %err,
                attempt = backoff.attempts(),
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "pass failed; retrying"
            );
            health.write().record_failure(err.to_string());
            Some(delay)
        }
        Err(err) => {
            error!(controller = name, error = %err, "pass failed");
            backoff.reset();
            health.write().record_failure(err.to_string());
            None
        }
    }
}

fn drain(triggers: &mut broadcast::Receiver<Trigger>) {
    loop {
        match triggers.try_recv() {
            Ok(_) | Err(TryRecvError::Lagged(_)) => continue,
            Err(TryRecvError::Empty | TryRecvError::Closed) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use rekey_core::{RekeyError, RekeyResult};
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails transiently `failures` times, then reports idle.
    struct Flaky {
        failures: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl Controller for Flaky {
        fn name(&self) -> &'static str {
            "flaky"
        }

        async fn reconcile(&self) -> RekeyResult<ReconcileOutcome> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                Err(RekeyError::conflict("lost the race"))
            } else {
                Ok(ReconcileOutcome::Idle)
            }
        }
    }

    fn fast_retry() -> RetryConfig {
        RetryConfig {
            initial_delay_ms: 10,
            max_delay_ms: 50,
            ..RetryConfig::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_are_retried_until_success() {
        let controller = Arc::new(Flaky {
            failures: 3,
            calls: AtomicU32::new(0),
        });
        let (_trigger_tx, trigger_rx) = broadcast::channel(8);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let runner = ControllerRunner::new(
            controller.clone(),
            trigger_rx,
            shutdown_rx,
            Duration::from_secs(3600),
            fast_retry(),
        );
        let health = runner.health();
        let handle = tokio::spawn(runner.run());

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(controller.calls.load(Ordering::SeqCst), 4);
        {
            let health = health.read();
            assert_eq!(health.consecutive_failures, 0);
            assert_eq!(health.last_outcome.as_deref(), Some("idle"));
        }

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn trigger_bursts_collapse_into_one_pass() {
        let controller = Arc::new(Flaky {
            failures: 0,
            calls: AtomicU32::new(0),
        });
        let (trigger_tx, trigger_rx) = broadcast::channel(64);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let runner = ControllerRunner::new(
            controller.clone(),
            trigger_rx,
            shutdown_rx,
            Duration::from_secs(3600),
            fast_retry(),
        );
        let handle = tokio::spawn(runner.run());
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(controller.calls.load(Ordering::SeqCst), 1);

        for n in 0..10 {
            trigger_tx
                .send(Trigger::StateChanged {
                    name: format!("object-{n}"),
                })
                .unwrap();
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(controller.calls.load(Ordering::SeqCst), 2);

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn resync_runs_without_triggers() {
        let controller = Arc::new(Flaky {
            failures: 0,
            calls: AtomicU32::new(0),
        });
        let (trigger_tx, trigger_rx) = broadcast::channel(8);
        drop(trigger_tx);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let runner = ControllerRunner::new(
            controller.clone(),
            trigger_rx,
            shutdown_rx,
            Duration::from_secs(30),
            fast_retry(),
        );
        let handle = tokio::spawn(runner.run());

        tokio::time::sleep(Duration::from_secs(95)).await;
        assert_eq!(controller.calls.load(Ordering::SeqCst), 4);

        drop(shutdown_tx);
        handle.await.unwrap();
    }
}
