//! Key lifecycle domain types.

pub mod config;
pub mod key;
pub mod replica;
pub mod resource;

pub use config::{
    ConfigurationDocument, Provider, ResourceProviders, TargetConfiguration,
    CONFIGURATION_API_VERSION, CONFIGURATION_KIND,
};
pub use key::{
    EncryptionFunction, EncryptionKey, KeyId, KeyMaterial, KeyRef, MintReason, KEY_MATERIAL_LEN,
};
pub use replica::{ReplicaStatus, Revision};
pub use resource::{GroupResource, ResourcePolicy};
