//! Configuration and encryption-mode stores backed by a shared-state store.

use async_trait::async_trait;
use rekey_core::effects::{
    ConfigurationStore, EncryptionModeSource, SharedStateStore, VersionToken, Versioned,
};
use rekey_core::{
    ConfigurationDocument, EncryptionFunction, ObjectNames, RekeyResult, Revision,
    TargetConfiguration, ENCRYPTION_MODE_OBJECT,
};
use serde::{Deserialize, Serialize};
use tracing::info;

fn decode_configuration(bytes: &[u8]) -> RekeyResult<TargetConfiguration> {
    let document: ConfigurationDocument = serde_json::from_slice(bytes)?;
    document.into_configuration()
}

fn encode_configuration(config: &TargetConfiguration) -> RekeyResult<Vec<u8>> {
    Ok(serde_json::to_vec_pretty(&ConfigurationDocument::new(config.clone()))?)
}

/// Target and observed configurations of one component.
#[derive(Debug, Clone)]
pub struct TargetConfigStore<S> {
    store: S,
    names: ObjectNames,
}

impl<S: SharedStateStore> TargetConfigStore<S> {
    /// Configuration store for the component `names` belongs to.
    pub fn new(store: S, names: ObjectNames) -> Self {
        Self { store, names }
    }

    /// Publish the configuration a revision serves. Replicas (or the rollout
    /// tooling acting for them) call this before reporting the revision.
    pub async fn publish_observed(
        &self,
        revision: &Revision,
        config: &TargetConfiguration,
    ) -> RekeyResult<VersionToken> {
        let name = self.names.observed(revision);
        let value = encode_configuration(config)?;
        let version = match self.store.get(&name).await? {
            Some(existing) => self.store.update(&name, existing.version, value).await?,
            None => self.store.create(&name, value).await?,
        };
        info!(revision = %revision, config = %config, "published observed configuration");
        Ok(version)
    }
}

#[async_trait]
impl<S: SharedStateStore> ConfigurationStore for TargetConfigStore<S> {
    async fn current_target(&self) -> RekeyResult<Option<Versioned<TargetConfiguration>>> {
        match self.store.get(&self.names.target()).await? {
            Some(object) => {
                let config = decode_configuration(&object.value)?;
                Ok(Some(Versioned::new(object.version, config)))
            }
            None => Ok(None),
        }
    }

    async fn write_target(
        &self,
        config: &TargetConfiguration,
        expected: Option<VersionToken>,
    ) -> RekeyResult<VersionToken> {
        let name = self.names.target();
        let value = encode_configuration(config)?;
        let version = match expected {
            Some(expected) => self.store.update(&name, expected, value).await?,
            None => self.store.create(&name, value).await?,
        };
        Ok(version)
    }

    async fn observed_configuration(
        &self,
        revision: &Revision,
    ) -> RekeyResult<Option<TargetConfiguration>> {
        match self.store.get(&self.names.observed(revision)).await? {
            Some(object) => Ok(Some(decode_configuration(&object.value)?)),
            None => Ok(None),
        }
    }
}

/// Persisted form of the user-facing encryption mode.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptionModeDocument {
    /// Selected function; unset means identity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encryption_type: Option<EncryptionFunction>,
}

/// The shared `encryption-mode` object.
#[derive(Debug, Clone)]
pub struct EncryptionModeStore<S> {
    store: S,
}

impl<S: SharedStateStore> EncryptionModeStore<S> {
    /// Mode store over `store`.
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Set (or with `None`, unset) the encryption function.
    pub async fn set_mode(&self, function: Option<EncryptionFunction>) -> RekeyResult<VersionToken> {
        let value = serde_json::to_vec_pretty(&EncryptionModeDocument {
            encryption_type: function,
        })?;
        let version = match self.store.get(ENCRYPTION_MODE_OBJECT).await? {
            Some(existing) => {
                self.store
                    .update(ENCRYPTION_MODE_OBJECT, existing.version, value)
                    .await?
            }
            None => self.store.create(ENCRYPTION_MODE_OBJECT, value).await?,
        };
        info!(
            mode = function.map_or("unset", EncryptionFunction::as_str),
            "set encryption mode"
        );
        Ok(version)
    }
}

#[async_trait]
impl<S: SharedStateStore> EncryptionModeSource for EncryptionModeStore<S> {
    async fn encryption_function(&self) -> RekeyResult<EncryptionFunction> {
        let document = match self.store.get(ENCRYPTION_MODE_OBJECT).await? {
            Some(object) => serde_json::from_slice::<EncryptionModeDocument>(&object.value)?,
            None => EncryptionModeDocument::default(),
        };
        Ok(document.encryption_type.unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::MemoryStateStore;
    use assert_matches::assert_matches;
    use rekey_core::{GroupResource, KeyId, KeyRef, Provider, RekeyError, ResourceProviders};

    fn sample() -> TargetConfiguration {
        let mut config = TargetConfiguration::new();
        config.insert(
            GroupResource::core("secrets"),
            ResourceProviders::new(
                Provider::Key(KeyRef {
                    id: KeyId(1),
                    function: EncryptionFunction::AesCbc,
                }),
                [],
                true,
            ),
        );
        config
    }

    #[tokio::test]
    async fn target_writes_are_conditional() {
        let configs = TargetConfigStore::new(MemoryStateStore::new(), ObjectNames::new("kube-apiserver"));
        assert!(configs.current_target().await.unwrap().is_none());

        let v1 = configs.write_target(&TargetConfiguration::new(), None).await.unwrap();
        let v2 = configs.write_target(&sample(), Some(v1)).await.unwrap();
        assert_matches!(
            configs.write_target(&TargetConfiguration::new(), Some(v1)).await,
            Err(RekeyError::Conflict { .. })
        );

        let current = configs.current_target().await.unwrap().unwrap();
        assert_eq!(current.version, v2);
        assert_eq!(current.value, sample());
    }

    #[tokio::test]
    async fn observed_configurations_are_per_revision() {
        let configs = TargetConfigStore::new(MemoryStateStore::new(), ObjectNames::new("kube-apiserver"));
        configs.publish_observed(&Revision::new("3"), &sample()).await.unwrap();
        assert_eq!(
            configs.observed_configuration(&Revision::new("3")).await.unwrap(),
            Some(sample())
        );
        assert_eq!(configs.observed_configuration(&Revision::new("4")).await.unwrap(), None);
    }

    #[tokio::test]
    async fn unset_mode_reads_as_identity() {
        let modes = EncryptionModeStore::new(MemoryStateStore::new());
        assert_eq!(modes.encryption_function().await.unwrap(), EncryptionFunction::Identity);
        modes.set_mode(Some(EncryptionFunction::AesCbc)).await.unwrap();
        assert_eq!(modes.encryption_function().await.unwrap(), EncryptionFunction::AesCbc);
        modes.set_mode(None).await.unwrap();
        assert_eq!(modes.encryption_function().await.unwrap(), EncryptionFunction::Identity);
    }
}
