//! Simulated front-end replica fleet.
//!
//! Plays the part of the serving processes and their rollout tooling: every
//! rollout publishes the target as the observed configuration of a fresh
//! revision, then moves replicas onto it. Partial rollouts leave revision skew.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use rekey_core::effects::{ConfigurationStore, SharedStateStore};
use rekey_core::{ObjectNames, RekeyError, RekeyResult, ReplicaStatus, Revision, TargetConfiguration};
use rekey_effects::{StateReplicaRegistry, TargetConfigStore};
use tracing::debug;

#[derive(Debug, Default)]
struct FleetState {
    replicas: BTreeMap<String, ReplicaStatus>,
    revisions: u64,
    latest: Option<(Revision, TargetConfiguration)>,
}

/// Replicas that serve whatever revision they were last rolled to.
#[derive(Debug, Clone)]
pub struct SimulatedFleet<S> {
    configs: TargetConfigStore<S>,
    registry: StateReplicaRegistry<S>,
    state: Arc<Mutex<FleetState>>,
}

impl<S: SharedStateStore + Clone> SimulatedFleet<S> {
    pub fn new(store: S, names: ObjectNames) -> Self {
        Self {
            configs: TargetConfigStore::new(store.clone(), names.clone()),
            registry: StateReplicaRegistry::new(store, names),
            state: Arc::new(Mutex::new(FleetState::default())),
        }
    }

    /// Register `count` running replicas serving an empty configuration.
    pub async fn start(&self, count: usize) -> RekeyResult<Revision> {
        let revision = self.publish_revision(TargetConfiguration::new()).await?;
        let ids: Vec<String> = (0..count).map(|n| format!("replica-{n}")).collect();
        self.move_replicas(&ids, &revision).await?;
        Ok(revision)
    }

    /// Roll the current target out to every replica. Returns `None` when every
    /// replica already serves it.
    pub async fn rollout_all(&self) -> RekeyResult<Option<Revision>> {
        let target = self.current_target().await?;
        let (ids, up_to_date) = {
            let state = self.state.lock();
            let up_to_date = match &state.latest {
                Some((revision, config)) if config == &target => state
                    .replicas
                    .values()
                    .all(|replica| replica.running && replica.revision.as_ref() == Some(revision)),
                _ => false,
            };
            (state.replicas.keys().cloned().collect::<Vec<_>>(), up_to_date)
        };
        if up_to_date {
            return Ok(None);
        }
        let revision = self.revision_for(target).await?;
        self.move_replicas(&ids, &revision).await?;
        Ok(Some(revision))
    }

    /// Roll the current target out to the first `count` replicas only.
    pub async fn rollout_partial(&self, count: usize) -> RekeyResult<Revision> {
        let target = self.current_target().await?;
        let ids: Vec<String> = self.state.lock().replicas.keys().take(count).cloned().collect();
        let revision = self.revision_for(target).await?;
        self.move_replicas(&ids, &revision).await?;
        Ok(revision)
    }

    /// Stop a replica; it keeps the revision it was serving.
    pub async fn stop_replica(&self, id: &str) -> RekeyResult<()> {
        self.set_running(id, false).await
    }

    pub async fn start_replica(&self, id: &str) -> RekeyResult<()> {
        self.set_running(id, true).await
    }

    /// Revision each replica serves.
    pub fn replicas(&self) -> Vec<ReplicaStatus> {
        self.state.lock().replicas.values().cloned().collect()
    }

    /// Newest published revision.
    pub fn latest_revision(&self) -> Option<Revision> {
        self.state.lock().latest.as_ref().map(|(revision, _)| revision.clone())
    }

    async fn current_target(&self) -> RekeyResult<TargetConfiguration> {
        Ok(self
            .configs
            .current_target()
            .await?
            .map(|target| target.value)
            .unwrap_or_default())
    }

    /// Latest revision if it already serves `config`, else a new one.
    async fn revision_for(&self, config: TargetConfiguration) -> RekeyResult<Revision> {
        let existing = match &self.state.lock().latest {
            Some((revision, latest)) if latest == &config => Some(revision.clone()),
            _ => None,
        };
        match existing {
            Some(revision) => Ok(revision),
            None => self.publish_revision(config).await,
        }
    }

    async fn publish_revision(&self, config: TargetConfiguration) -> RekeyResult<Revision> {
        let revision = {
            let mut state = self.state.lock();
            state.revisions += 1;
            Revision::new(state.revisions.to_string())
        };
        self.configs.publish_observed(&revision, &config).await?;
        self.state.lock().latest = Some((revision.clone(), config));
        debug!(revision = %revision, "published revision");
        Ok(revision)
    }

    async fn move_replicas(&self, ids: &[String], revision: &Revision) -> RekeyResult<()> {
        let statuses: Vec<ReplicaStatus> = {
            let mut state = self.state.lock();
            ids.iter()
                .map(|id| {
                    let status = ReplicaStatus::running(id.clone(), revision.clone());
                    state.replicas.insert(id.clone(), status.clone());
                    status
                })
                .collect()
        };
        self.registry.report_all(statuses).await
    }

    async fn set_running(&self, id: &str, running: bool) -> RekeyResult<()> {
        let status = {
            let mut state = self.state.lock();
            let replica = state
                .replicas
                .get_mut(id)
                .ok_or_else(|| RekeyError::not_found(format!("replica {id}")))?;
            replica.running = running;
            replica.clone()
        };
        self.registry.report(status).await
    }
}
