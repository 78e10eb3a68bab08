//! Encryption key records.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::errors::{RekeyError, RekeyResult};
use crate::time::PhysicalTime;
use crate::types::resource::GroupResource;

/// Length of the secret for keyed functions (256 bits).
pub const KEY_MATERIAL_LEN: usize = 32;

/// Monotonically increasing key identity. Never reused, even after deletion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeyId(pub u64);

impl KeyId {
    /// Wrap a raw id.
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Raw id.
    pub const fn value(self) -> u64 {
        self.0
    }

    /// The id immediately after this one.
    pub fn next(self) -> RekeyResult<Self> {
        self.0
            .checked_add(1)
            .map(Self)
            .ok_or_else(|| RekeyError::internal("key id space exhausted"))
    }
}

impl fmt::Display for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Encryption function selected by the user-facing configuration.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum EncryptionFunction {
    /// No encryption; data is stored as written.
    #[default]
    Identity,
    /// AES-256 in CBC mode with PKCS#7 padding.
    AesCbc,
}

impl EncryptionFunction {
    /// Whether the function stores plaintext.
    pub fn is_identity(self) -> bool {
        matches!(self, Self::Identity)
    }

    /// Whether records for this function carry key material.
    pub fn requires_key_material(self) -> bool {
        !self.is_identity()
    }

    /// Stable identifier used in configuration objects.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Identity => "identity",
            Self::AesCbc => "aescbc",
        }
    }
}

impl fmt::Display for EncryptionFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EncryptionFunction {
    type Err = RekeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" | "identity" => Ok(Self::Identity),
            "aescbc" => Ok(Self::AesCbc),
            other => Err(RekeyError::invalid(format!(
                "unknown encryption function {other:?}"
            ))),
        }
    }
}

/// 256-bit secret for keyed functions.
///
/// Zeroized on drop, compared in constant time, and never rendered: `Debug`
/// prints a BLAKE3 fingerprint instead. Serialized as standard base64.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct KeyMaterial([u8; KEY_MATERIAL_LEN]);

impl KeyMaterial {
    /// Wrap raw secret bytes.
    pub fn from_bytes(bytes: [u8; KEY_MATERIAL_LEN]) -> Self {
        Self(bytes)
    }

    /// Raw secret bytes, for handing to the serving layer.
    pub fn expose_secret(&self) -> &[u8; KEY_MATERIAL_LEN] {
        &self.0
    }

    /// Short non-reversible identifier safe for logs.
    pub fn fingerprint(&self) -> String {
        let digest = blake3::hash(&self.0);
        hex::encode(&digest.as_bytes()[..8])
    }
}

impl PartialEq for KeyMaterial {
    fn eq(&self, other: &Self) -> bool {
        self.0.ct_eq(&other.0).into()
    }
}

impl Eq for KeyMaterial {}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyMaterial({})", self.fingerprint())
    }
}

impl Serialize for KeyMaterial {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(self.0))
    }
}

impl<'de> Deserialize<'de> for KeyMaterial {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        let mut decoded = STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)?;
        if decoded.len() != KEY_MATERIAL_LEN {
            let len = decoded.len();
            decoded.zeroize();
            return Err(serde::de::Error::custom(format!(
                "key material must be {KEY_MATERIAL_LEN} bytes, got {len}"
            )));
        }
        let mut bytes = [0u8; KEY_MATERIAL_LEN];
        bytes.copy_from_slice(&decoded);
        decoded.zeroize();
        Ok(Self(bytes))
    }
}

/// Why a key was minted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MintReason {
    /// Encryption was enabled and no key existed yet.
    Enabled,
    /// The configured encryption function changed.
    ModeChanged,
    /// The rotation interval elapsed since the newest key was created.
    Rotation,
    /// A resource type joined the encrypted set.
    NewResources,
}

impl fmt::Display for MintReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            Self::Enabled => "enabled",
            Self::ModeChanged => "mode-changed",
            Self::Rotation => "rotation",
            Self::NewResources => "new-resources",
        };
        f.write_str(reason)
    }
}

/// Reference to a key as it appears inside a configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct KeyRef {
    /// Referenced key.
    pub id: KeyId,
    /// Function the key was minted for.
    pub function: EncryptionFunction,
}

impl fmt::Display for KeyRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.function, self.id)
    }
}

/// Persisted key record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptionKey {
    /// Unique, never reused identity.
    pub id: KeyId,
    /// Function the key encrypts with.
    pub function: EncryptionFunction,
    /// Secret, present only for keyed functions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub material: Option<KeyMaterial>,
    /// When the key was minted.
    pub created_at: PhysicalTime,
    /// Last time a migration under this key completed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub migrated_at: Option<PhysicalTime>,
    /// Resource types whose stored data has been rewritten under this key.
    #[serde(default)]
    pub migrated_resources: BTreeSet<GroupResource>,
    /// Why the key was minted.
    pub reason: MintReason,
    /// First phase of the two-phase delete.
    #[serde(default)]
    pub deletion_requested: bool,
}

impl EncryptionKey {
    /// Create a fresh, unmigrated key record.
    ///
    /// Material must be present exactly when the function is keyed.
    pub fn new(
        id: KeyId,
        function: EncryptionFunction,
        material: Option<KeyMaterial>,
        created_at: PhysicalTime,
        reason: MintReason,
    ) -> RekeyResult<Self> {
        match (function.requires_key_material(), material.is_some()) {
            (true, false) => {
                return Err(RekeyError::invalid(format!(
                    "key {id}: function {function} requires key material"
                )))
            }
            (false, true) => {
                return Err(RekeyError::invalid(format!(
                    "key {id}: function {function} must not carry key material"
                )))
            }
            _ => {}
        }
        Ok(Self {
            id,
            function,
            material,
            created_at,
            migrated_at: None,
            migrated_resources: BTreeSet::new(),
            reason,
            deletion_requested: false,
        })
    }

    /// Reference used inside configurations.
    pub fn key_ref(&self) -> KeyRef {
        KeyRef {
            id: self.id,
            function: self.function,
        }
    }

    /// Whether data of `resource` has been rewritten under this key.
    pub fn is_migrated_for(&self, resource: &GroupResource) -> bool {
        self.migrated_at.is_some() && self.migrated_resources.contains(resource)
    }

    /// Whether every resource in `resources` has been migrated to this key.
    ///
    /// An empty set counts as not migrated: there is nothing to prove.
    pub fn is_migrated_for_all<'a>(
        &self,
        resources: impl IntoIterator<Item = &'a GroupResource>,
    ) -> bool {
        let mut any = false;
        for resource in resources {
            if !self.is_migrated_for(resource) {
                return false;
            }
            any = true;
        }
        any
    }

    /// Record a confirmed migration of `resource`.
    pub fn record_migration(&mut self, resource: GroupResource, now: PhysicalTime) {
        self.migrated_resources.insert(resource);
        self.migrated_at = Some(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn material(byte: u8) -> KeyMaterial {
        KeyMaterial::from_bytes([byte; KEY_MATERIAL_LEN])
    }

    #[test]
    fn key_refs_order_by_id_then_function() {
        let refs: std::collections::BTreeSet<KeyRef> = [
            KeyRef { id: KeyId(2), function: EncryptionFunction::Identity },
            KeyRef { id: KeyId(1), function: EncryptionFunction::AesCbc },
            KeyRef { id: KeyId(1), function: EncryptionFunction::Identity },
        ]
        .into_iter()
        .collect();
        let ordered: Vec<(u64, EncryptionFunction)> =
            refs.iter().map(|key| (key.id.0, key.function)).collect();
        assert_eq!(
            ordered,
            vec![
                (1, EncryptionFunction::Identity),
                (1, EncryptionFunction::AesCbc),
                (2, EncryptionFunction::Identity),
            ]
        );
    }

    #[test]
    fn material_presence_must_match_function() {
        let now = PhysicalTime::from_secs(1);
        assert!(EncryptionKey::new(
            KeyId(1),
            EncryptionFunction::AesCbc,
            None,
            now,
            MintReason::Enabled
        )
        .is_err());
        assert!(EncryptionKey::new(
            KeyId(1),
            EncryptionFunction::Identity,
            Some(material(1)),
            now,
            MintReason::ModeChanged
        )
        .is_err());
        assert!(EncryptionKey::new(
            KeyId(1),
            EncryptionFunction::AesCbc,
            Some(material(1)),
            now,
            MintReason::Enabled
        )
        .is_ok());
    }

    #[test]
    fn debug_never_prints_secret() {
        let secret = material(0xAB);
        let rendered = format!("{secret:?}");
        assert_eq!(rendered, format!("KeyMaterial({})", secret.fingerprint()));
        assert_eq!(secret.fingerprint().len(), 16);
        assert!(!rendered.contains(&STANDARD.encode(secret.expose_secret())[..8]));
    }

    #[test]
    fn record_survives_json() {
        let mut key = EncryptionKey::new(
            KeyId(7),
            EncryptionFunction::AesCbc,
            Some(material(9)),
            PhysicalTime::from_secs(100),
            MintReason::Rotation,
        )
        .unwrap();
        key.record_migration(GroupResource::core("secrets"), PhysicalTime::from_secs(200));

        let json = serde_json::to_string(&key).unwrap();
        assert!(json.contains("\"aescbc\""));
        assert!(json.contains("\"secrets\""));
        let restored: EncryptionKey = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, key);
    }

    #[test]
    fn short_material_is_rejected() {
        let json = format!("\"{}\"", STANDARD.encode([1u8; 16]));
        assert!(serde_json::from_str::<KeyMaterial>(&json).is_err());
    }

    #[test]
    fn migrated_for_all_requires_timestamp_and_members() {
        let secrets = GroupResource::core("secrets");
        let configmaps = GroupResource::core("configmaps");
        let mut key = EncryptionKey::new(
            KeyId(2),
            EncryptionFunction::AesCbc,
            Some(material(2)),
            PhysicalTime::from_secs(1),
            MintReason::Enabled,
        )
        .unwrap();
        assert!(!key.is_migrated_for_all([&secrets]));
        key.record_migration(secrets.clone(), PhysicalTime::from_secs(2));
        assert!(key.is_migrated_for_all([&secrets]));
        assert!(!key.is_migrated_for_all([&secrets, &configmaps]));
        assert!(!key.is_migrated_for_all(std::iter::empty()));
    }
}
