//! Randomness effect used to generate key material.

use async_trait::async_trait;

use crate::types::{KeyMaterial, KEY_MATERIAL_LEN};

/// Source of cryptographically secure random bytes.
#[async_trait]
pub trait RandomEffects: Send + Sync {
    /// Fill a fresh 256-bit buffer.
    async fn random_bytes_32(&self) -> [u8; KEY_MATERIAL_LEN];

    /// Fresh key material for a keyed encryption function.
    async fn generate_key_material(&self) -> KeyMaterial {
        KeyMaterial::from_bytes(self.random_bytes_32().await)
    }
}

/// Blanket implementation for Arc<T> where T: RandomEffects
#[async_trait]
impl<T: RandomEffects + ?Sized> RandomEffects for std::sync::Arc<T> {
    async fn random_bytes_32(&self) -> [u8; KEY_MATERIAL_LEN] {
        (**self).random_bytes_32().await
    }
}
