//! Real time effect handler for production use

use async_trait::async_trait;
use rekey_core::effects::{PhysicalTimeEffects, TimeError};
use rekey_core::PhysicalTime;
use std::time::{SystemTime, UNIX_EPOCH};

/// System clock handler
#[derive(Debug, Clone, Copy, Default)]
pub struct RealTimeHandler;

impl RealTimeHandler {
    /// Create a new real time handler
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl PhysicalTimeEffects for RealTimeHandler {
    async fn physical_time(&self) -> Result<PhysicalTime, TimeError> {
        let since_epoch = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| TimeError::ClockUnavailable {
                reason: format!("system clock before Unix epoch: {e}"),
            })?;
        let ts_ms = u64::try_from(since_epoch.as_millis()).map_err(|_| TimeError::ClockUnavailable {
            reason: "system clock out of range".to_string(),
        })?;
        Ok(PhysicalTime::from_millis(ts_ms))
    }
}
