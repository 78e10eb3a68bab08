//! Wall-clock timestamps carried on key records.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Unix wall-clock timestamp in milliseconds.
///
/// Obtained from [`PhysicalTimeEffects`](crate::effects::PhysicalTimeEffects) so
/// that controllers stay deterministic under test clocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PhysicalTime {
    /// Milliseconds since the Unix epoch.
    pub ts_ms: u64,
}

impl PhysicalTime {
    /// Construct from milliseconds since the Unix epoch.
    pub const fn from_millis(ts_ms: u64) -> Self {
        Self { ts_ms }
    }

    /// Construct from whole seconds since the Unix epoch.
    pub const fn from_secs(secs: u64) -> Self {
        Self {
            ts_ms: secs.saturating_mul(1000),
        }
    }

    /// Time elapsed since `earlier`, zero if `earlier` is in the future.
    pub fn saturating_since(self, earlier: PhysicalTime) -> Duration {
        Duration::from_millis(self.ts_ms.saturating_sub(earlier.ts_ms))
    }

    /// Timestamp `delta` later than `self`.
    pub fn saturating_add(self, delta: Duration) -> Self {
        let delta_ms = u64::try_from(delta.as_millis()).unwrap_or(u64::MAX);
        Self {
            ts_ms: self.ts_ms.saturating_add(delta_ms),
        }
    }
}

impl fmt::Display for PhysicalTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.ts_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn elapsed_saturates() {
        let earlier = PhysicalTime::from_secs(10);
        let later = PhysicalTime::from_secs(70);
        assert_eq!(later.saturating_since(earlier), Duration::from_secs(60));
        assert_eq!(earlier.saturating_since(later), Duration::ZERO);
        assert_eq!(earlier.saturating_add(Duration::from_secs(60)), later);
    }
}
