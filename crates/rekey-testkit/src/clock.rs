//! Controllable physical clock.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rekey_core::effects::{PhysicalTimeEffects, TimeError};
use rekey_core::PhysicalTime;

/// Fixed start: 2022-01-01 00:00:00 UTC.
pub const DEFAULT_START_MS: u64 = 1_640_995_200_000;

/// Clock that only moves when told to.
#[derive(Debug, Clone)]
pub struct ControllableClock {
    now_ms: Arc<Mutex<u64>>,
}

impl Default for ControllableClock {
    fn default() -> Self {
        Self::new(PhysicalTime::from_millis(DEFAULT_START_MS))
    }
}

impl ControllableClock {
    /// Clock frozen at `start`.
    pub fn new(start: PhysicalTime) -> Self {
        Self {
            now_ms: Arc::new(Mutex::new(start.ts_ms)),
        }
    }

    /// Move forward by `delta`.
    pub fn advance(&self, delta: Duration) {
        let mut now = self.now_ms.lock();
        *now = PhysicalTime::from_millis(*now).saturating_add(delta).ts_ms;
    }

    /// Jump to an absolute time, backwards included.
    pub fn set(&self, time: PhysicalTime) {
        *self.now_ms.lock() = time.ts_ms;
    }

    pub fn now(&self) -> PhysicalTime {
        PhysicalTime::from_millis(*self.now_ms.lock())
    }
}

#[async_trait]
impl PhysicalTimeEffects for ControllableClock {
    async fn physical_time(&self) -> Result<PhysicalTime, TimeError> {
        Ok(self.now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn advances_only_on_request() {
        let clock = ControllableClock::default();
        let start = clock.physical_time().await.unwrap();
        assert_eq!(clock.physical_time().await.unwrap(), start);

        clock.advance(Duration::from_secs(90));
        assert_eq!(
            clock.physical_time().await.unwrap().saturating_since(start),
            Duration::from_secs(90)
        );
    }
}
