//! Desired configuration computation.
//!
//! [`ConfigComputer::compute`] is the single source of truth for what the target
//! configuration should look like next. Every controller routes its decisions
//! through it, and concurrent controllers that read the same snapshot compute
//! the same answer, so no locking is needed to keep them consistent.
//!
//! Rules are evaluated in priority order and only the first match applies; the
//! result becomes the previous configuration of the next evaluation:
//!
//! 1. **AddResources**: a policy resource is missing. Add it with the plaintext
//!    passthrough as write provider, and refresh every resource's read keys.
//! 2. **SyncReadKeys**: some resource's key set differs from the desired read set.
//! 3. **PromoteWriteKey**: a newer key is readable on every replica; make it the
//!    write key of every encrypted resource.
//! 4. **DropRetiredKeys**: the write key is migrated for every encrypted
//!    resource; drop older keys and the plaintext fallback.
//!
//! Keys leave the read set only through rule 4, which is what keeps previously
//! written data decryptable.

use std::collections::BTreeMap;
use std::fmt;

use crate::errors::RekeyResult;
use crate::types::{
    EncryptionKey, GroupResource, KeyId, KeyRef, Provider, ResourcePolicy, ResourceProviders,
    TargetConfiguration,
};

/// Which rule produced a desired configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AppliedRule {
    /// No rule matched; desired equals previous.
    Unchanged,
    /// Rule 1.
    AddResources,
    /// Rule 2.
    SyncReadKeys,
    /// Rule 3.
    PromoteWriteKey,
    /// Rule 4.
    DropRetiredKeys,
}

impl fmt::Display for AppliedRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unchanged => "unchanged",
            Self::AddResources => "add-resources",
            Self::SyncReadKeys => "sync-read-keys",
            Self::PromoteWriteKey => "promote-write-key",
            Self::DropRetiredKeys => "drop-retired-keys",
        };
        f.write_str(name)
    }
}

/// Result of one evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComputeOutcome {
    /// Rule that fired.
    pub rule: AppliedRule,
    /// Next desired configuration.
    pub desired: TargetConfiguration,
}

impl ComputeOutcome {
    /// Whether the desired configuration differs from the previous one.
    pub fn is_change(&self) -> bool {
        self.rule != AppliedRule::Unchanged
    }
}

/// Pure, deterministic desired-state function.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConfigComputer;

impl ConfigComputer {
    /// Create a computer.
    pub fn new() -> Self {
        Self
    }

    /// Compute the next desired configuration.
    ///
    /// `keys` are the created key records, `previous` the current target, and
    /// `observed` the configuration served by the converged replica revision
    /// (`None` while replicas disagree). The result is checked against the
    /// configuration invariants before it is returned.
    pub fn compute(
        &self,
        keys: &[EncryptionKey],
        policy: &ResourcePolicy,
        previous: &TargetConfiguration,
        observed: Option<&TargetConfiguration>,
    ) -> RekeyResult<ComputeOutcome> {
        let outcome = self.evaluate(keys, policy, previous, observed);
        outcome.desired.check_invariants()?;
        tracing::trace!(rule = %outcome.rule, desired = %outcome.desired, "computed desired configuration");
        Ok(outcome)
    }

    fn evaluate(
        &self,
        keys: &[EncryptionKey],
        policy: &ResourcePolicy,
        previous: &TargetConfiguration,
        observed: Option<&TargetConfiguration>,
    ) -> ComputeOutcome {
        // Encryption has never been enabled.
        if keys.is_empty() && previous.is_empty() {
            return unchanged(previous);
        }

        let records: BTreeMap<KeyId, &EncryptionKey> = keys.iter().map(|key| (key.id, key)).collect();
        let read_set = desired_read_set(&records, previous);

        let missing: Vec<&GroupResource> = policy
            .resources()
            .filter(|resource| !previous.contains(resource))
            .collect();
        if !missing.is_empty() {
            let mut desired = rebuild(previous, &read_set, |providers| {
                (providers.write(), providers.has_identity_fallback())
            });
            for resource in missing {
                desired.insert(
                    resource.clone(),
                    ResourceProviders::new(Provider::Identity, read_set.values().copied(), false),
                );
            }
            return ComputeOutcome {
                rule: AppliedRule::AddResources,
                desired,
            };
        }

        let read_ids: Vec<KeyId> = read_set.keys().copied().collect();
        let out_of_sync = previous
            .resources()
            .any(|(_, providers)| !providers.key_ids().iter().eq(read_ids.iter()));
        if out_of_sync {
            return ComputeOutcome {
                rule: AppliedRule::SyncReadKeys,
                desired: rebuild(previous, &read_set, |providers| {
                    (providers.write(), providers.has_identity_fallback())
                }),
            };
        }

        if let Some(candidate) = observed.and_then(|observed| newest_observed(observed, previous, &read_set)) {
            let never_backward = previous
                .write_key()
                .map_or(true, |current| current.id <= candidate.id);
            let lagging = previous.resources().any(|(_, providers)| {
                providers
                    .write_key()
                    .map_or(true, |write| write.id < candidate.id)
            });
            if never_backward && lagging {
                return ComputeOutcome {
                    rule: AppliedRule::PromoteWriteKey,
                    desired: rebuild(previous, &read_set, |providers| {
                        // Plaintext data stays readable until the resource is
                        // migrated under the promoted key.
                        let fallback =
                            providers.has_identity_fallback() || providers.write().is_plaintext();
                        (Provider::Key(candidate), fallback)
                    }),
                };
            }
        }

        if let Some(write) = shared_write_key(previous) {
            let migrated = records.get(&write.id).is_some_and(|record| {
                record.is_migrated_for_all(previous.resources().map(|(resource, _)| resource))
            });
            let retired = previous.resources().any(|(_, providers)| {
                providers.has_identity_fallback()
                    || providers.key_ids().iter().any(|id| *id < write.id)
            });
            if migrated && retired {
                let retained: BTreeMap<KeyId, KeyRef> = read_set
                    .range(write.id..)
                    .map(|(id, key)| (*id, *key))
                    .collect();
                return ComputeOutcome {
                    rule: AppliedRule::DropRetiredKeys,
                    desired: rebuild(previous, &retained, |providers| (providers.write(), false)),
                };
            }
        }

        unchanged(previous)
    }
}

fn unchanged(previous: &TargetConfiguration) -> ComputeOutcome {
    ComputeOutcome {
        rule: AppliedRule::Unchanged,
        desired: previous.clone(),
    }
}

/// Keys every encrypted resource must accept: everything already referenced,
/// plus keys minted after the newest referenced one. Keys older than that and
/// not referenced were retired by rule 4 and must not come back.
fn desired_read_set(
    records: &BTreeMap<KeyId, &EncryptionKey>,
    previous: &TargetConfiguration,
) -> BTreeMap<KeyId, KeyRef> {
    let mut read_set = previous.referenced_keys();
    let newest_referenced = read_set.keys().next_back().copied();
    for record in records.values() {
        if record.deletion_requested {
            continue;
        }
        if newest_referenced.map_or(true, |newest| record.id > newest) {
            read_set.insert(record.id, record.key_ref());
        }
    }
    read_set
}

/// Rebuild every resource of `previous` with `read_set` as its key set and the
/// write provider and fallback chosen by `select`.
fn rebuild(
    previous: &TargetConfiguration,
    read_set: &BTreeMap<KeyId, KeyRef>,
    select: impl Fn(&ResourceProviders) -> (Provider, bool),
) -> TargetConfiguration {
    let mut desired = TargetConfiguration::new();
    for (resource, providers) in previous.resources() {
        let (write, fallback) = select(providers);
        desired.insert(
            resource.clone(),
            ResourceProviders::new(write, read_set.values().copied(), fallback),
        );
    }
    desired
}

/// Newest key the observed configuration accepts for every encrypted resource.
fn newest_observed(
    observed: &TargetConfiguration,
    previous: &TargetConfiguration,
    read_set: &BTreeMap<KeyId, KeyRef>,
) -> Option<KeyRef> {
    let mut common: Option<Vec<KeyId>> = None;
    for (resource, _) in previous.resources() {
        let observed_ids = observed.get(resource)?.key_ids();
        common = Some(match common {
            None => observed_ids.into_iter().collect(),
            Some(ids) => ids.into_iter().filter(|id| observed_ids.contains(id)).collect(),
        });
    }
    common?
        .into_iter()
        .filter_map(|id| read_set.get(&id).copied())
        .max_by_key(|key| key.id)
}

/// The write key if every encrypted resource writes with the same key.
fn shared_write_key(previous: &TargetConfiguration) -> Option<KeyRef> {
    let mut shared: Option<KeyRef> = None;
    for (_, providers) in previous.resources() {
        let write = providers.write_key()?;
        match shared {
            None => shared = Some(write),
            Some(current) if current != write => return None,
            Some(_) => {}
        }
    }
    shared
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::PhysicalTime;
    use crate::types::{EncryptionFunction, KeyMaterial, MintReason, KEY_MATERIAL_LEN};
    use assert_matches::assert_matches;
    use proptest::prelude::*;
    use std::collections::BTreeSet;

    fn secrets() -> GroupResource {
        GroupResource::core("secrets")
    }

    fn configmaps() -> GroupResource {
        GroupResource::core("configmaps")
    }

    fn policy() -> ResourcePolicy {
        ResourcePolicy::new([secrets(), configmaps()])
    }

    fn aes_key(id: u64) -> EncryptionKey {
        EncryptionKey::new(
            KeyId(id),
            EncryptionFunction::AesCbc,
            Some(KeyMaterial::from_bytes([id as u8; KEY_MATERIAL_LEN])),
            PhysicalTime::from_secs(id * 100),
            MintReason::Rotation,
        )
        .unwrap()
    }

    fn migrated(mut key: EncryptionKey, resources: &[GroupResource]) -> EncryptionKey {
        for resource in resources {
            key.record_migration(resource.clone(), PhysicalTime::from_secs(key.id.0 * 100 + 50));
        }
        key
    }

    /// Evaluate until nothing changes, treating every intermediate configuration
    /// as immediately observed by all replicas.
    fn settle(keys: &[EncryptionKey], start: TargetConfiguration) -> (TargetConfiguration, Vec<AppliedRule>) {
        let computer = ConfigComputer::new();
        let mut current = start;
        let mut rules = Vec::new();
        for _ in 0..16 {
            let outcome = computer
                .compute(keys, &policy(), &current, Some(&current))
                .unwrap();
            if !outcome.is_change() {
                return (current, rules);
            }
            rules.push(outcome.rule);
            current = outcome.desired;
        }
        panic!("configuration did not settle: {rules:?}");
    }

    #[test]
    fn never_enabled_stays_empty() {
        let outcome = ConfigComputer::new()
            .compute(&[], &policy(), &TargetConfiguration::new(), None)
            .unwrap();
        assert_eq!(outcome.rule, AppliedRule::Unchanged);
        assert!(outcome.desired.is_empty());
    }

    #[test]
    fn first_key_is_added_as_read_key_behind_plaintext_writes() {
        let keys = [aes_key(1)];
        let outcome = ConfigComputer::new()
            .compute(&keys, &policy(), &TargetConfiguration::new(), None)
            .unwrap();
        assert_eq!(outcome.rule, AppliedRule::AddResources);
        for resource in [secrets(), configmaps()] {
            let providers = outcome.desired.get(&resource).unwrap();
            assert_eq!(providers.write(), Provider::Identity);
            assert_eq!(providers.key_ids(), BTreeSet::from([KeyId(1)]));
        }
    }

    #[test]
    fn promotion_waits_for_observation() {
        let keys = [aes_key(1)];
        let computer = ConfigComputer::new();
        let added = computer
            .compute(&keys, &policy(), &TargetConfiguration::new(), None)
            .unwrap()
            .desired;

        let without_observation = computer.compute(&keys, &policy(), &added, None).unwrap();
        assert_eq!(without_observation.rule, AppliedRule::Unchanged);

        let stale_observation = computer
            .compute(&keys, &policy(), &added, Some(&TargetConfiguration::new()))
            .unwrap();
        assert_eq!(stale_observation.rule, AppliedRule::Unchanged);

        let promoted = computer.compute(&keys, &policy(), &added, Some(&added)).unwrap();
        assert_eq!(promoted.rule, AppliedRule::PromoteWriteKey);
        let providers = promoted.desired.get(&secrets()).unwrap();
        assert_eq!(providers.write_key().map(|key| key.id), Some(KeyId(1)));
        assert!(providers.has_identity_fallback());
    }

    #[test]
    fn rotation_keeps_old_key_until_new_key_is_migrated() {
        let (steady, _) = settle(
            &[migrated(aes_key(1), &[secrets(), configmaps()])],
            TargetConfiguration::new(),
        );
        assert_eq!(
            steady.get(&secrets()).unwrap().providers(),
            &[Provider::Key(aes_key(1).key_ref())]
        );

        // key 2 minted but not migrated: it becomes write key, key 1 stays readable
        let keys = [migrated(aes_key(1), &[secrets(), configmaps()]), aes_key(2)];
        let (rotated, rules) = settle(&keys, steady.clone());
        assert_eq!(rules, vec![AppliedRule::SyncReadKeys, AppliedRule::PromoteWriteKey]);
        let providers = rotated.get(&secrets()).unwrap();
        assert_eq!(providers.write_key().map(|key| key.id), Some(KeyId(2)));
        assert!(providers.references(KeyId(1)));
        assert!(!providers.has_identity_fallback());

        // partial migration keeps key 1
        let partial = [
            migrated(aes_key(1), &[secrets(), configmaps()]),
            migrated(aes_key(2), &[secrets()]),
        ];
        let outcome = ConfigComputer::new()
            .compute(&partial, &policy(), &rotated, Some(&rotated))
            .unwrap();
        assert_eq!(outcome.rule, AppliedRule::Unchanged);

        // full migration drops it
        let done = [
            migrated(aes_key(1), &[secrets(), configmaps()]),
            migrated(aes_key(2), &[secrets(), configmaps()]),
        ];
        let outcome = ConfigComputer::new()
            .compute(&done, &policy(), &rotated, Some(&rotated))
            .unwrap();
        assert_eq!(outcome.rule, AppliedRule::DropRetiredKeys);
        assert_eq!(outcome.desired.referenced_key_ids(), BTreeSet::from([KeyId(2)]));
    }

    #[test]
    fn retired_keys_are_not_readded() {
        let keys = [
            migrated(aes_key(1), &[secrets(), configmaps()]),
            migrated(aes_key(2), &[secrets(), configmaps()]),
        ];
        let (steady, _) = settle(&keys, TargetConfiguration::new());
        assert_eq!(steady.referenced_key_ids(), BTreeSet::from([KeyId(2)]));
        let again = ConfigComputer::new()
            .compute(&keys, &policy(), &steady, Some(&steady))
            .unwrap();
        assert_eq!(again.rule, AppliedRule::Unchanged);
    }

    #[test]
    fn new_resource_catches_up_on_plaintext_first() {
        let keys = [migrated(aes_key(1), &[secrets()])];
        let only_secrets = ResourcePolicy::new([secrets()]);
        let computer = ConfigComputer::new();

        let mut current = TargetConfiguration::new();
        for _ in 0..8 {
            let outcome = computer
                .compute(&keys, &only_secrets, &current, Some(&current))
                .unwrap();
            if !outcome.is_change() {
                break;
            }
            current = outcome.desired;
        }
        assert_eq!(current.referenced_key_ids(), BTreeSet::from([KeyId(1)]));

        let added = computer
            .compute(&keys, &policy(), &current, Some(&current))
            .unwrap();
        assert_eq!(added.rule, AppliedRule::AddResources);
        let new_entry = added.desired.get(&configmaps()).unwrap();
        assert_eq!(new_entry.write(), Provider::Identity);
        added.desired.check_invariants().unwrap();

        let promoted = computer
            .compute(&keys, &policy(), &added.desired, Some(&added.desired))
            .unwrap();
        assert_eq!(promoted.rule, AppliedRule::PromoteWriteKey);
        let new_entry = promoted.desired.get(&configmaps()).unwrap();
        assert_eq!(new_entry.write_key().map(|key| key.id), Some(KeyId(1)));
        assert!(new_entry.has_identity_fallback());
        assert!(!promoted.desired.get(&secrets()).unwrap().has_identity_fallback());
    }

    #[test]
    fn disabling_encryption_rotates_to_identity_key() {
        let identity = EncryptionKey::new(
            KeyId(2),
            EncryptionFunction::Identity,
            None,
            PhysicalTime::from_secs(500),
            MintReason::ModeChanged,
        )
        .unwrap();
        let keys = vec![
            migrated(aes_key(1), &[secrets(), configmaps()]),
            migrated(identity, &[secrets(), configmaps()]),
        ];
        let (settled, _) = settle(&keys, TargetConfiguration::new());
        let providers = settled.get(&secrets()).unwrap();
        assert_matches!(providers.write(), Provider::Key(KeyRef { id: KeyId(2), function: EncryptionFunction::Identity }));
        assert_eq!(providers.providers().len(), 1);
    }

    #[test]
    fn marked_keys_are_not_added() {
        let mut doomed = aes_key(1);
        doomed.deletion_requested = true;
        let outcome = ConfigComputer::new()
            .compute(&[doomed], &policy(), &TargetConfiguration::new(), None)
            .unwrap();
        assert!(outcome.desired.referenced_key_ids().is_empty());
    }

    fn arb_keys() -> impl Strategy<Value = Vec<EncryptionKey>> {
        prop::collection::vec((any::<bool>(), any::<bool>(), any::<bool>()), 0..6).prop_map(|flags| {
            flags
                .into_iter()
                .enumerate()
                .map(|(index, (identity, secrets_done, configmaps_done))| {
                    let id = index as u64 + 1;
                    let mut key = if identity {
                        EncryptionKey::new(
                            KeyId(id),
                            EncryptionFunction::Identity,
                            None,
                            PhysicalTime::from_secs(id),
                            MintReason::ModeChanged,
                        )
                        .unwrap()
                    } else {
                        aes_key(id)
                    };
                    if secrets_done {
                        key.record_migration(secrets(), PhysicalTime::from_secs(id + 1));
                    }
                    if configmaps_done {
                        key.record_migration(configmaps(), PhysicalTime::from_secs(id + 1));
                    }
                    key
                })
                .collect()
        })
    }

    proptest! {
        /// Identical inputs yield identical outputs.
        #[test]
        fn compute_is_idempotent(keys in arb_keys(), steps in 0usize..6) {
            let computer = ConfigComputer::new();
            let mut current = TargetConfiguration::new();
            for _ in 0..steps {
                current = computer.compute(&keys, &policy(), &current, Some(&current)).unwrap().desired;
            }
            let first = computer.compute(&keys, &policy(), &current, Some(&current)).unwrap();
            let second = computer.compute(&keys, &policy(), &current, Some(&current)).unwrap();
            prop_assert_eq!(first, second);
        }

        /// A key disappears from the read set only once a newer write key has
        /// been migrated for every encrypted resource.
        #[test]
        fn read_keys_only_leave_after_migration(keys in arb_keys()) {
            let computer = ConfigComputer::new();
            let records: BTreeMap<KeyId, &EncryptionKey> = keys.iter().map(|key| (key.id, key)).collect();
            let mut current = TargetConfiguration::new();
            for _ in 0..16 {
                let outcome = computer.compute(&keys, &policy(), &current, Some(&current)).unwrap();
                let before = current.referenced_key_ids();
                let after = outcome.desired.referenced_key_ids();
                for dropped in before.difference(&after) {
                    let write = outcome.desired.write_key().unwrap();
                    prop_assert!(write.id > *dropped);
                    let record = records[&write.id];
                    prop_assert!(record.is_migrated_for_all(current.resources().map(|(resource, _)| resource)));
                }
                if !outcome.is_change() {
                    break;
                }
                current = outcome.desired;
            }
        }

        /// Every computed configuration has a single write key.
        #[test]
        fn single_write_key(keys in arb_keys()) {
            let computer = ConfigComputer::new();
            let mut current = TargetConfiguration::new();
            for _ in 0..16 {
                let outcome = computer.compute(&keys, &policy(), &current, Some(&current)).unwrap();
                let writes: BTreeSet<KeyId> = outcome
                    .desired
                    .resources()
                    .filter_map(|(_, providers)| providers.write_key().map(|key| key.id))
                    .collect();
                prop_assert!(writes.len() <= 1);
                if !outcome.is_change() {
                    break;
                }
                current = outcome.desired;
            }
        }
    }
}
