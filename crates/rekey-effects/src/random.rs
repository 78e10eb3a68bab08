//! Random effect handler
//!
//! The one place key material comes from. Uses the operating system's CSPRNG
//! directly rather than a userspace generator.

use async_trait::async_trait;
use rand::rngs::OsRng;
use rand::RngCore;
use rekey_core::effects::RandomEffects;
use rekey_core::KEY_MATERIAL_LEN;

/// Real random handler using operating system randomness
#[derive(Debug, Clone, Copy, Default)]
pub struct RealRandomHandler;

impl RealRandomHandler {
    /// Create a new real random handler
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl RandomEffects for RealRandomHandler {
    async fn random_bytes_32(&self) -> [u8; KEY_MATERIAL_LEN] {
        let mut bytes = [0u8; KEY_MATERIAL_LEN];
        OsRng.fill_bytes(&mut bytes);
        bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn material_differs_between_calls() {
        let random = RealRandomHandler::new();
        let a = random.generate_key_material().await;
        let b = random.generate_key_material().await;
        assert_ne!(a, b);
    }
}
