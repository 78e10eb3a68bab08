//! Key retention and the guarded two-phase delete.
//!
//! [`select_prune_victims`] picks keys beyond the retention count; it is pure
//! and says nothing about whether deletion is safe. Safety is established by
//! [`DeletionGuard::verify`] against freshly read configurations, and the only
//! way to physically delete a key is with the [`DeletionPermit`] it returns.

use std::collections::{BTreeMap, BTreeSet};

use crate::effects::{VersionToken, Versioned};
use crate::errors::{RekeyError, RekeyResult};
use crate::types::{EncryptionKey, GroupResource, KeyId, TargetConfiguration};

/// Keys that exceed `retention` migrated keys for every resource they were
/// migrated for, oldest first.
///
/// Unmigrated keys and the newest key are never selected.
pub fn select_prune_victims(keys: &[EncryptionKey], retention: usize) -> Vec<KeyId> {
    let Some(newest) = keys.iter().map(|key| key.id).max() else {
        return Vec::new();
    };

    let mut per_resource: BTreeMap<&GroupResource, Vec<KeyId>> = BTreeMap::new();
    for key in keys.iter().filter(|key| key.migrated_at.is_some()) {
        for resource in &key.migrated_resources {
            per_resource.entry(resource).or_default().push(key.id);
        }
    }

    let mut retained: BTreeSet<KeyId> = BTreeSet::new();
    for ids in per_resource.values_mut() {
        ids.sort_unstable_by(|a, b| b.cmp(a));
        retained.extend(ids.iter().take(retention).copied());
    }

    let mut victims: Vec<KeyId> = keys
        .iter()
        .filter(|key| key.migrated_at.is_some() && !key.migrated_resources.is_empty())
        .map(|key| key.id)
        .filter(|id| *id != newest && !retained.contains(id))
        .collect();
    victims.sort_unstable();
    victims
}

/// Authorization to physically delete one key record at one version.
///
/// Only [`DeletionGuard::verify`] constructs permits, and a permit is consumed
/// by the delete.
#[derive(Debug, PartialEq, Eq)]
pub struct DeletionPermit {
    key_id: KeyId,
    version: VersionToken,
}

impl DeletionPermit {
    /// Key the permit covers.
    pub fn key_id(&self) -> KeyId {
        self.key_id
    }

    /// Version the record must still be at.
    pub fn version(&self) -> VersionToken {
        self.version
    }
}

/// Final safety check before a key record is removed.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeletionGuard;

impl DeletionGuard {
    /// Verify that `key` is safe to delete.
    ///
    /// `target` is the freshly read target configuration and `observed` the
    /// configurations of every running revision. The key must carry the deletion
    /// mark, be migrated, and be referenced by none of them.
    pub fn verify<'a>(
        key: &Versioned<EncryptionKey>,
        target: Option<&TargetConfiguration>,
        observed: impl IntoIterator<Item = &'a TargetConfiguration>,
    ) -> RekeyResult<DeletionPermit> {
        let record = &key.value;
        if !record.deletion_requested {
            return Err(RekeyError::invariant_violation(format!(
                "key {} is not marked for deletion",
                record.id
            )));
        }
        if record.migrated_at.is_none() {
            return Err(RekeyError::invariant_violation(format!(
                "key {} was never migrated",
                record.id
            )));
        }
        if target.is_some_and(|target| target.references(record.id)) {
            return Err(RekeyError::invariant_violation(format!(
                "key {} is still referenced by the target configuration",
                record.id
            )));
        }
        if observed.into_iter().any(|config| config.references(record.id)) {
            return Err(RekeyError::invariant_violation(format!(
                "key {} is still served by a running revision",
                record.id
            )));
        }
        Ok(DeletionPermit {
            key_id: record.id,
            version: key.version,
        })
    }
}
