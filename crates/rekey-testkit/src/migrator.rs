//! Scripted migration collaborator.
//!
//! Completes migrations instantly unless told to fail or to hold them, and
//! remembers which key each resource's data was last rewritten under.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use rekey_core::effects::{MigrationCollaborator, MigrationError};
use rekey_core::{GroupResource, KeyId, KeyRef};
use tokio::sync::watch;

#[derive(Debug, Default)]
struct MigratorState {
    calls: Vec<(GroupResource, KeyId)>,
    failures: HashMap<GroupResource, u32>,
    stored_under: BTreeMap<GroupResource, KeyRef>,
}

/// Which migrations are parked.
#[derive(Debug, Clone, Default)]
struct Holds {
    all: bool,
    keys: BTreeSet<KeyId>,
}

impl Holds {
    fn holds(&self, key: KeyId) -> bool {
        self.all || self.keys.contains(&key)
    }
}

/// In-memory stand-in for the storage rewrite job.
#[derive(Debug, Clone)]
pub struct ScriptedMigrator {
    state: Arc<Mutex<MigratorState>>,
    held: Arc<watch::Sender<Holds>>,
}

impl Default for ScriptedMigrator {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedMigrator {
    pub fn new() -> Self {
        let (held, _) = watch::channel(Holds::default());
        Self {
            state: Arc::new(Mutex::new(MigratorState::default())),
            held: Arc::new(held),
        }
    }

    /// Fail the next `times` migrations of `resource`.
    pub fn fail_next(&self, resource: GroupResource, times: u32) {
        self.state.lock().failures.insert(resource, times);
    }

    /// Park every migration until [`release`](Self::release).
    pub fn hold(&self) {
        self.held.send_modify(|holds| holds.all = true);
    }

    pub fn release(&self) {
        self.held.send_modify(|holds| holds.all = false);
    }

    /// Park migrations to `key` until [`release_key`](Self::release_key).
    pub fn hold_key(&self, key: KeyId) {
        self.held.send_modify(|holds| {
            holds.keys.insert(key);
        });
    }

    pub fn release_key(&self, key: KeyId) {
        self.held.send_modify(|holds| {
            holds.keys.remove(&key);
        });
    }

    /// Whether migrations to `key` are parked.
    pub fn is_held(&self, key: KeyId) -> bool {
        self.held.borrow().holds(key)
    }

    /// Every migration started so far, in order.
    pub fn calls(&self) -> Vec<(GroupResource, KeyId)> {
        self.state.lock().calls.clone()
    }

    /// Key the data of `resource` was last rewritten under.
    pub fn stored_under(&self, resource: &GroupResource) -> Option<KeyRef> {
        self.state.lock().stored_under.get(resource).copied()
    }
}

#[async_trait]
impl MigrationCollaborator for ScriptedMigrator {
    async fn migrate(&self, resource: &GroupResource, key: &KeyRef) -> Result<(), MigrationError> {
        self.state.lock().calls.push((resource.clone(), key.id));

        let mut held = self.held.subscribe();
        if held.wait_for(|holds| !holds.holds(key.id)).await.is_err() {
            return Err(MigrationError::Unavailable {
                reason: "migrator shut down".to_string(),
            });
        }

        let mut state = self.state.lock();
        if let Some(remaining) = state.failures.get_mut(resource) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(MigrationError::Failed {
                    resource: resource.clone(),
                    key: key.id,
                    reason: "scripted failure".to_string(),
                });
            }
        }
        state.stored_under.insert(resource.clone(), *key);
        Ok(())
    }
}
