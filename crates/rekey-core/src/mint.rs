//! Decision logic for minting new keys.

use std::time::Duration;

use crate::time::PhysicalTime;
use crate::types::{EncryptionFunction, EncryptionKey, MintReason, ResourcePolicy, TargetConfiguration};

/// Pure mint decision, evaluated by the mint controller on every pass.
#[derive(Debug, Clone, Copy)]
pub struct KeyMintPolicy {
    rotation_interval: Duration,
}

impl KeyMintPolicy {
    /// Policy rotating keys every `rotation_interval`.
    pub fn new(rotation_interval: Duration) -> Self {
        Self { rotation_interval }
    }

    /// Configured rotation interval.
    pub fn rotation_interval(&self) -> Duration {
        self.rotation_interval
    }

    /// Whether a key must be minted, and why.
    ///
    /// `newest` is the newest key not marked for deletion. Rotation and new
    /// resources only mint once the newest key has settled: it is the target's
    /// write key and migrated for every encrypted resource. A mode change always
    /// mints.
    pub fn needs_new_key(
        &self,
        newest: Option<&EncryptionKey>,
        mode: EncryptionFunction,
        policy: &ResourcePolicy,
        target: &TargetConfiguration,
        now: PhysicalTime,
    ) -> Option<MintReason> {
        let Some(newest) = newest else {
            return (!mode.is_identity()).then_some(MintReason::Enabled);
        };

        if newest.function != mode {
            return Some(MintReason::ModeChanged);
        }

        let settled = target.write_key() == Some(newest.key_ref())
            && newest.is_migrated_for_all(target.resources().map(|(resource, _)| resource));
        if !settled || newest.function.is_identity() {
            return None;
        }

        if now.saturating_since(newest.created_at) >= self.rotation_interval {
            return Some(MintReason::Rotation);
        }

        if policy.resources().any(|resource| !target.contains(resource)) {
            return Some(MintReason::NewResources);
        }

        None
    }
}
