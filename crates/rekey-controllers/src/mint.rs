//! Key mint controller.
//!
//! Creates a new key record when encryption is first enabled, when the
//! configured function changes, when the newest key is older than the rotation
//! interval, or when the resource policy grows. It never touches configuration;
//! the configuration apply controller picks the new key up.

use async_trait::async_trait;
use rekey_core::{EncryptionKey, KeyMintPolicy, RekeyResult, ResourcePolicy};
use tracing::{debug, info};

use crate::controller::{Controller, ReconcileOutcome};
use crate::effects::ControllerEffects;
use crate::snapshot::ClusterSnapshot;

/// Mints key records.
#[derive(Debug, Clone)]
pub struct KeyMintController {
    effects: ControllerEffects,
    resources: ResourcePolicy,
    policy: KeyMintPolicy,
}

impl KeyMintController {
    /// Mint controller for `resources`, rotating on `policy`.
    pub fn new(effects: ControllerEffects, resources: ResourcePolicy, policy: KeyMintPolicy) -> Self {
        Self {
            effects,
            resources,
            policy,
        }
    }
}

#[async_trait]
impl Controller for KeyMintController {
    fn name(&self) -> &'static str {
        "key-mint"
    }

    async fn reconcile(&self) -> RekeyResult<ReconcileOutcome> {
        let snapshot = ClusterSnapshot::load(&self.effects).await?;
        let now = self.effects.time.physical_time().await?;
        let mode = snapshot.mode();

        let Some(reason) = self.policy.needs_new_key(
            snapshot.newest_key(),
            mode,
            &self.resources,
            &snapshot.target(),
            now,
        ) else {
            debug!("no key needed");
            return Ok(ReconcileOutcome::Idle);
        };

        let id = self.effects.keys.next_key_id().await?;
        let material = if mode.requires_key_material() {
            Some(self.effects.random.generate_key_material().await)
        } else {
            None
        };
        let key = EncryptionKey::new(id, mode, material, now, reason)?;

        // Losing the id race surfaces as a transient conflict; the next pass
        // re-reads and usually finds the winner's key sufficient.
        let created = self.effects.keys.create_key(key).await?;
        info!(key_id = %created.value.id, function = %mode, reason = %reason, "minted key");
        Ok(ReconcileOutcome::applied(format!(
            "minted key {} ({reason})",
            created.value.id
        )))
    }
}
