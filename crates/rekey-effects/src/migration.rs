//! Migration job tracking.
//!
//! Wraps a [`MigrationCollaborator`] so that a controller pass can ask "is the
//! migration of this resource to this key done?" without blocking on it. Jobs
//! run as spawned tasks; each completion is broadcast so the migration
//! controller wakes up immediately. Jobs for a key that is no longer the
//! write key are stopped rather than left to finish. Job state is
//! process-local: after a restart, jobs are simply issued again, which the
//! collaborator tolerates.

use parking_lot::Mutex;
use rekey_core::effects::MigrationCollaborator;
use rekey_core::{GroupResource, KeyId, KeyRef};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{broadcast, oneshot};
use tracing::{info, warn};

/// Capacity of the completion channel.
const COMPLETION_CHANNEL_CAPACITY: usize = 64;

/// Answer to [`MigrationTracker::ensure_migration`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationJobStatus {
    /// A job is running (possibly just started).
    InProgress,
    /// The job finished successfully.
    Succeeded,
    /// The job failed; it has been forgotten and the next call starts a new one.
    Failed(String),
}

/// A finished migration job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationCompletion {
    /// Migrated resource.
    pub resource: GroupResource,
    /// Target key.
    pub key: KeyId,
    /// Whether the job succeeded.
    pub succeeded: bool,
}

#[derive(Debug, Clone)]
enum JobState {
    Running,
    Succeeded,
    Failed(String),
}

type JobKey = (GroupResource, KeyId);

#[derive(Default)]
struct JobTable {
    jobs: HashMap<JobKey, JobState>,
    /// Stop signals of running jobs. Dropping a sender stops its job.
    stops: HashMap<JobKey, oneshot::Sender<()>>,
    /// Jobs told to stop whose task has not ended yet.
    stopping: HashSet<JobKey>,
}

/// Tracks migration jobs started through a collaborator.
#[derive(Clone)]
pub struct MigrationTracker {
    collaborator: Arc<dyn MigrationCollaborator>,
    table: Arc<Mutex<JobTable>>,
    completions: broadcast::Sender<MigrationCompletion>,
}

impl std::fmt::Debug for MigrationTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let table = self.table.lock();
        f.debug_struct("MigrationTracker")
            .field("jobs", &table.jobs.len())
            .field("stopping", &table.stopping.len())
            .finish_non_exhaustive()
    }
}

impl MigrationTracker {
    /// Track jobs run by `collaborator`.
    pub fn new(collaborator: Arc<dyn MigrationCollaborator>) -> Self {
        let (completions, _) = broadcast::channel(COMPLETION_CHANNEL_CAPACITY);
        Self {
            collaborator,
            table: Arc::new(Mutex::new(JobTable::default())),
            completions,
        }
    }

    /// Report the state of the migration of `resource` to `key`, starting a
    /// job if none is known.
    ///
    /// Must be called from within a tokio runtime.
    pub fn ensure_migration(&self, resource: &GroupResource, key: KeyRef) -> MigrationJobStatus {
        let job = (resource.clone(), key.id);
        let mut table = self.table.lock();
        let known = table.jobs.get(&job).cloned();
        match known {
            Some(JobState::Running) => MigrationJobStatus::InProgress,
            Some(JobState::Succeeded) => MigrationJobStatus::Succeeded,
            Some(JobState::Failed(reason)) => {
                table.jobs.remove(&job);
                MigrationJobStatus::Failed(reason)
            }
            None => {
                let (stop, stopped) = oneshot::channel();
                table.jobs.insert(job.clone(), JobState::Running);
                table.stops.insert(job, stop);
                drop(table);
                self.spawn(resource.clone(), key, stopped);
                MigrationJobStatus::InProgress
            }
        }
    }

    fn spawn(&self, resource: GroupResource, key: KeyRef, stopped: oneshot::Receiver<()>) {
        info!(resource = %resource, key_id = %key.id, "starting migration");
        let collaborator = Arc::clone(&self.collaborator);
        let table = Arc::clone(&self.table);
        let completions = self.completions.clone();
        tokio::spawn(async move {
            let job = (resource.clone(), key.id);
            // The collaborator future is dropped as soon as the job is told to
            // stop, so a stopped job never writes again.
            let result = tokio::select! {
                biased;
                _ = stopped => None,
                result = collaborator.migrate(&resource, &key) => Some(result),
            };
            let succeeded = matches!(result, Some(Ok(())));
            let state = match result {
                None => {
                    info!(resource = %resource, key_id = %key.id, "stale migration stopped");
                    None
                }
                Some(Ok(())) => {
                    info!(resource = %resource, key_id = %key.id, "migration finished");
                    Some(JobState::Succeeded)
                }
                Some(Err(err)) => {
                    warn!(resource = %resource, key_id = %key.id, error = %err, "migration failed");
                    Some(JobState::Failed(err.to_string()))
                }
            };
            {
                let mut table = table.lock();
                table.stops.remove(&job);
                table.stopping.remove(&job);
                // A job forgotten while running stays forgotten.
                if let (Some(entry), Some(state)) = (table.jobs.get_mut(&job), state) {
                    *entry = state;
                }
            }
            let _ = completions.send(MigrationCompletion {
                resource,
                key: key.id,
                succeeded,
            });
        });
    }

    /// Drop every job that does not target `key`, stopping the ones still
    /// running.
    ///
    /// Stopped jobs count as in flight until their task has ended; see
    /// [`MigrationTracker::stopping`].
    pub fn forget_except(&self, key: KeyId) {
        let mut table = self.table.lock();
        let table = &mut *table;
        table.jobs.retain(|(_, job_key), _| *job_key == key);
        let stale: Vec<JobKey> = table
            .stops
            .keys()
            .filter(|(_, job_key)| *job_key != key)
            .cloned()
            .collect();
        for job in stale {
            if table.stops.remove(&job).is_some() {
                warn!(resource = %job.0, key_id = %job.1, "stopping stale migration");
                table.stopping.insert(job);
            }
        }
    }

    /// Number of stopped jobs whose task may still write.
    pub fn stopping(&self) -> usize {
        self.table.lock().stopping.len()
    }

    /// Number of jobs still running, stopping ones included.
    pub fn in_flight(&self) -> usize {
        let table = self.table.lock();
        let running = table
            .jobs
            .values()
            .filter(|state| matches!(state, JobState::Running))
            .count();
        running + table.stopping.len()
    }

    /// Subscribe to job completions.
    pub fn subscribe(&self) -> broadcast::Receiver<MigrationCompletion> {
        self.completions.subscribe()
    }
}
