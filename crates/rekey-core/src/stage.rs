//! Lifecycle stage of a key, derived for diagnostics.
//!
//! Stages are never stored; they are recomputed from the key record and the
//! target and observed configurations, and only ever move forward.

use std::fmt;

use crate::types::{EncryptionKey, TargetConfiguration};

/// Where a key sits in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum KeyStage {
    /// Minted, not referenced by the target yet.
    Created,
    /// Read key in the target.
    ConfiguredRead,
    /// Read key served by the replicas.
    ObservedRead,
    /// Write key in the target.
    ConfiguredWrite,
    /// Write key served by the replicas.
    ObservedWrite,
    /// All data rewritten under the key, or superseded by a newer write key.
    Migrated,
    /// Retired from the configuration or marked for deletion.
    Prunable,
}

impl KeyStage {
    /// Derive the stage of `key`.
    pub fn derive(
        key: &EncryptionKey,
        target: &TargetConfiguration,
        observed: Option<&TargetConfiguration>,
    ) -> Self {
        if key.deletion_requested {
            return Self::Prunable;
        }

        let newest_referenced = target.referenced_keys().into_keys().next_back();
        if !target.references(key.id) {
            return match newest_referenced {
                Some(newest) if newest > key.id => Self::Prunable,
                _ => Self::Created,
            };
        }

        match target.write_key() {
            Some(write) if write.id == key.id => {
                let served = observed.and_then(TargetConfiguration::write_key) == Some(write);
                if !served {
                    Self::ConfiguredWrite
                } else if key.is_migrated_for_all(target.resources().map(|(resource, _)| resource)) {
                    Self::Migrated
                } else {
                    Self::ObservedWrite
                }
            }
            Some(write) if write.id > key.id => Self::Migrated,
            _ => {
                if observed.is_some_and(|observed| observed.references(key.id)) {
                    Self::ObservedRead
                } else {
                    Self::ConfiguredRead
                }
            }
        }
    }
}

impl fmt::Display for KeyStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stage = match self {
            Self::Created => "created",
            Self::ConfiguredRead => "configured-read",
            Self::ObservedRead => "observed-read",
            Self::ConfiguredWrite => "configured-write",
            Self::ObservedWrite => "observed-write",
            Self::Migrated => "migrated",
            Self::Prunable => "prunable",
        };
        f.write_str(stage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::ConfigComputer;
    use crate::time::PhysicalTime;
    use crate::types::{
        EncryptionFunction, GroupResource, KeyId, KeyMaterial, MintReason, ResourcePolicy,
        KEY_MATERIAL_LEN,
    };

    fn aes_key(id: u64) -> EncryptionKey {
        EncryptionKey::new(
            KeyId(id),
            EncryptionFunction::AesCbc,
            Some(KeyMaterial::from_bytes([1; KEY_MATERIAL_LEN])),
            PhysicalTime::from_secs(id),
            MintReason::Enabled,
        )
        .unwrap()
    }

    #[test]
    fn stages_advance_with_the_configuration() {
        let policy = ResourcePolicy::new([GroupResource::core("secrets")]);
        let computer = ConfigComputer::new();
        let mut key = aes_key(1);
        let empty = TargetConfiguration::new();
        assert_eq!(KeyStage::derive(&key, &empty, None), KeyStage::Created);

        let read = computer
            .compute(std::slice::from_ref(&key), &policy, &empty, None)
            .unwrap()
            .desired;
        assert_eq!(KeyStage::derive(&key, &read, Some(&empty)), KeyStage::ConfiguredRead);
        assert_eq!(KeyStage::derive(&key, &read, Some(&read)), KeyStage::ObservedRead);

        let write = computer
            .compute(std::slice::from_ref(&key), &policy, &read, Some(&read))
            .unwrap()
            .desired;
        assert_eq!(KeyStage::derive(&key, &write, Some(&read)), KeyStage::ConfiguredWrite);
        assert_eq!(KeyStage::derive(&key, &write, Some(&write)), KeyStage::ObservedWrite);

        key.record_migration(GroupResource::core("secrets"), PhysicalTime::from_secs(5));
        assert_eq!(KeyStage::derive(&key, &write, Some(&write)), KeyStage::Migrated);

        key.deletion_requested = true;
        assert_eq!(KeyStage::derive(&key, &write, Some(&write)), KeyStage::Prunable);
    }

    #[test]
    fn stage_order_is_lifecycle_order() {
        assert!(KeyStage::Created < KeyStage::ConfiguredRead);
        assert!(KeyStage::ObservedWrite < KeyStage::Migrated);
        assert!(KeyStage::Migrated < KeyStage::Prunable);
    }
}
