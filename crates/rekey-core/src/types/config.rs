//! Target and observed encryption configurations.
//!
//! A configuration maps each encrypted resource type to an ordered provider
//! list. The first provider encrypts new writes; every provider may decrypt.
//! [`ResourceProviders`] keeps the list in canonical order so that two
//! configurations describing the same state compare equal byte for byte.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::errors::{RekeyError, RekeyResult};
use crate::types::key::{KeyId, KeyRef};
use crate::types::resource::GroupResource;

/// Schema version written into configuration objects.
pub const CONFIGURATION_API_VERSION: &str = "rekey.io/v1";
/// Object kind written into configuration objects.
pub const CONFIGURATION_KIND: &str = "EncryptionConfiguration";

/// One entry of a resource's provider list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Provider {
    /// Plaintext passthrough that is not backed by a key record.
    Identity,
    /// A key record.
    Key(KeyRef),
}

impl Provider {
    /// Referenced key, if any.
    pub fn key_id(&self) -> Option<KeyId> {
        match self {
            Self::Identity => None,
            Self::Key(key) => Some(key.id),
        }
    }

    /// Referenced key, if any.
    pub fn key_ref(&self) -> Option<KeyRef> {
        match self {
            Self::Identity => None,
            Self::Key(key) => Some(*key),
        }
    }

    /// Whether this entry stores plaintext.
    pub fn is_plaintext(&self) -> bool {
        match self {
            Self::Identity => true,
            Self::Key(key) => key.function.is_identity(),
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Identity => f.write_str("identity"),
            Self::Key(key) => write!(f, "{key}"),
        }
    }
}

/// Canonically ordered provider list of one resource type.
///
/// Order: write provider, remaining key references by descending id, then the
/// plaintext fallback when the resource may still hold unencrypted data.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "Vec<Provider>", into = "Vec<Provider>")]
pub struct ResourceProviders {
    providers: Vec<Provider>,
}

impl ResourceProviders {
    /// Build a canonical list.
    ///
    /// `reads` may contain the write key; duplicates collapse. The fallback is
    /// ignored when the write provider is already plaintext.
    pub fn new(
        write: Provider,
        reads: impl IntoIterator<Item = KeyRef>,
        identity_fallback: bool,
    ) -> Self {
        let write_id = write.key_id();
        let reads: BTreeMap<KeyId, KeyRef> = reads
            .into_iter()
            .filter(|key| Some(key.id) != write_id)
            .map(|key| (key.id, key))
            .collect();

        let mut providers = Vec::with_capacity(reads.len() + 2);
        providers.push(write);
        providers.extend(reads.into_values().rev().map(Provider::Key));
        if identity_fallback && !write.is_plaintext() {
            providers.push(Provider::Identity);
        }
        Self { providers }
    }

    /// Provider used for new writes.
    pub fn write(&self) -> Provider {
        self.providers[0]
    }

    /// Key used for new writes, `None` while on the plaintext passthrough.
    pub fn write_key(&self) -> Option<KeyRef> {
        self.write().key_ref()
    }

    /// Every provider, write provider first.
    pub fn providers(&self) -> &[Provider] {
        &self.providers
    }

    /// Providers accepted only for decryption.
    pub fn read_only(&self) -> &[Provider] {
        &self.providers[1..]
    }

    /// All referenced keys, write key included.
    pub fn key_refs(&self) -> impl Iterator<Item = KeyRef> + '_ {
        self.providers.iter().filter_map(Provider::key_ref)
    }

    /// Ids of all referenced keys, write key included.
    pub fn key_ids(&self) -> BTreeSet<KeyId> {
        self.key_refs().map(|key| key.id).collect()
    }

    /// Whether the plaintext passthrough trails the list as a read provider.
    pub fn has_identity_fallback(&self) -> bool {
        self.read_only().contains(&Provider::Identity)
    }

    /// Whether `id` appears anywhere in the list.
    pub fn references(&self, id: KeyId) -> bool {
        self.key_refs().any(|key| key.id == id)
    }
}

impl TryFrom<Vec<Provider>> for ResourceProviders {
    type Error = RekeyError;

    fn try_from(providers: Vec<Provider>) -> Result<Self, Self::Error> {
        let Some((&write, rest)) = providers.split_first() else {
            return Err(RekeyError::invalid("provider list must not be empty"));
        };
        let fallback = rest.contains(&Provider::Identity);
        let reads: Vec<KeyRef> = rest.iter().filter_map(Provider::key_ref).collect();
        let canonical = Self::new(write, reads, fallback);
        if canonical.providers != providers {
            return Err(RekeyError::invalid(format!(
                "provider list is not in canonical order: {}",
                render(&providers)
            )));
        }
        Ok(canonical)
    }
}

impl From<ResourceProviders> for Vec<Provider> {
    fn from(value: ResourceProviders) -> Self {
        value.providers
    }
}

impl fmt::Display for ResourceProviders {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&render(&self.providers))
    }
}

fn render(providers: &[Provider]) -> String {
    let parts: Vec<String> = providers.iter().map(ToString::to_string).collect();
    format!("[{}]", parts.join(", "))
}

/// Desired (target) or served (observed) encryption configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TargetConfiguration {
    resources: BTreeMap<GroupResource, ResourceProviders>,
}

impl TargetConfiguration {
    /// Empty configuration: nothing encrypted.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether no resource type is configured.
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Providers of `resource`.
    pub fn get(&self, resource: &GroupResource) -> Option<&ResourceProviders> {
        self.resources.get(resource)
    }

    /// Whether `resource` is configured (i.e. encrypted).
    pub fn contains(&self, resource: &GroupResource) -> bool {
        self.resources.contains_key(resource)
    }

    /// Set the providers of `resource`.
    pub fn insert(&mut self, resource: GroupResource, providers: ResourceProviders) {
        self.resources.insert(resource, providers);
    }

    /// Configured resources in canonical order.
    pub fn resources(&self) -> impl Iterator<Item = (&GroupResource, &ResourceProviders)> + '_ {
        self.resources.iter()
    }

    /// The encrypted resource set.
    pub fn encrypted_resources(&self) -> BTreeSet<GroupResource> {
        self.resources.keys().cloned().collect()
    }

    /// Every key referenced by any resource.
    pub fn referenced_keys(&self) -> BTreeMap<KeyId, KeyRef> {
        self.resources
            .values()
            .flat_map(ResourceProviders::key_refs)
            .map(|key| (key.id, key))
            .collect()
    }

    /// Ids of every key referenced by any resource.
    pub fn referenced_key_ids(&self) -> BTreeSet<KeyId> {
        self.referenced_keys().into_keys().collect()
    }

    /// Whether any resource references `id`.
    pub fn references(&self, id: KeyId) -> bool {
        self.resources.values().any(|providers| providers.references(id))
    }

    /// The key used for writes by resources that have left the plaintext
    /// passthrough. Highest id wins if the configuration is inconsistent.
    pub fn write_key(&self) -> Option<KeyRef> {
        self.resources
            .values()
            .filter_map(ResourceProviders::write_key)
            .max_by_key(|key| key.id)
    }

    /// Verify the structural invariants every computed configuration must hold:
    /// all resources reference the same key set and at most one key is used for
    /// writes.
    pub fn check_invariants(&self) -> RekeyResult<()> {
        let mut entries = self.resources.iter();
        if let Some((first, first_providers)) = entries.next() {
            let first_ids = first_providers.key_ids();
            for (resource, providers) in entries {
                let ids = providers.key_ids();
                if ids != first_ids {
                    return Err(RekeyError::invariant_violation(format!(
                        "read keys of {resource} ({ids:?}) differ from {first} ({first_ids:?})"
                    )));
                }
            }
        }

        let write_ids: BTreeSet<KeyId> = self
            .resources
            .values()
            .filter_map(|providers| providers.write_key().map(|key| key.id))
            .collect();
        if write_ids.len() > 1 {
            return Err(RekeyError::invariant_violation(format!(
                "multiple write keys configured: {write_ids:?}"
            )));
        }
        Ok(())
    }
}

impl fmt::Display for TargetConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.resources.is_empty() {
            return f.write_str("{}");
        }
        let parts: Vec<String> = self
            .resources
            .iter()
            .map(|(resource, providers)| format!("{resource}: {providers}"))
            .collect();
        write!(f, "{{{}}}", parts.join("; "))
    }
}

/// Versioned wire document for configuration objects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigurationDocument {
    /// Schema version, [`CONFIGURATION_API_VERSION`].
    pub api_version: String,
    /// Object kind, [`CONFIGURATION_KIND`].
    pub kind: String,
    /// Configuration payload.
    #[serde(flatten)]
    pub configuration: TargetConfiguration,
}

impl ConfigurationDocument {
    /// Wrap a configuration with the current schema header.
    pub fn new(configuration: TargetConfiguration) -> Self {
        Self {
            api_version: CONFIGURATION_API_VERSION.to_string(),
            kind: CONFIGURATION_KIND.to_string(),
            configuration,
        }
    }

    /// Unwrap, rejecting documents of another kind or schema.
    pub fn into_configuration(self) -> RekeyResult<TargetConfiguration> {
        if self.kind != CONFIGURATION_KIND || self.api_version != CONFIGURATION_API_VERSION {
            return Err(RekeyError::serialization(format!(
                "unsupported configuration document {}/{}",
                self.api_version, self.kind
            )));
        }
        Ok(self.configuration)
    }
}
