//! Controller configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::errors::{RekeyError, RekeyResult};
use crate::naming::ObjectNames;
use crate::reliability::RetryConfig;

/// Default managed component.
pub const DEFAULT_COMPONENT: &str = "kube-apiserver";
/// Default rotation interval: one week.
pub const DEFAULT_ROTATION_INTERVAL_SECS: u64 = 7 * 24 * 60 * 60;
/// Default number of migrated keys retained per resource.
pub const DEFAULT_RETENTION: usize = 10;
/// Default periodic resync interval.
pub const DEFAULT_RESYNC_INTERVAL_SECS: u64 = 30;

/// Settings shared by every controller of one component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RekeyConfig {
    /// Managed component, used to namespace shared-state objects
    pub component: String,
    /// Age after which a settled key is rotated
    pub rotation_interval_secs: u64,
    /// Migrated keys retained per resource
    pub retention: usize,
    /// Interval of the periodic resync that backs up change triggers
    pub resync_interval_secs: u64,
    /// Retry behavior after transient failures
    pub backoff: RetryConfig,
}

impl Default for RekeyConfig {
    fn default() -> Self {
        Self {
            component: DEFAULT_COMPONENT.to_string(),
            rotation_interval_secs: DEFAULT_ROTATION_INTERVAL_SECS,
            retention: DEFAULT_RETENTION,
            resync_interval_secs: DEFAULT_RESYNC_INTERVAL_SECS,
            backoff: RetryConfig::default(),
        }
    }
}

impl RekeyConfig {
    /// Parse a TOML document. Missing fields take their defaults.
    pub fn from_toml_str(content: &str) -> RekeyResult<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| RekeyError::invalid(format!("Invalid configuration: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file.
    pub fn load_from_file(path: &Path) -> RekeyResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            RekeyError::invalid(format!("Failed to read config file {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&content)
    }

    /// Reject settings no controller can run with.
    pub fn validate(&self) -> RekeyResult<()> {
        if self.component.trim().is_empty() {
            return Err(RekeyError::invalid("component must not be empty"));
        }
        if self.component.contains(char::is_whitespace) {
            return Err(RekeyError::invalid(format!(
                "component {:?} must not contain whitespace",
                self.component
            )));
        }
        if self.rotation_interval_secs == 0 {
            return Err(RekeyError::invalid("rotation_interval_secs must be positive"));
        }
        if self.retention == 0 {
            return Err(RekeyError::invalid("retention must be positive"));
        }
        if self.resync_interval_secs == 0 {
            return Err(RekeyError::invalid("resync_interval_secs must be positive"));
        }
        if self.backoff.max_delay_ms < self.backoff.initial_delay_ms {
            return Err(RekeyError::invalid(
                "backoff.max_delay_ms must not be below backoff.initial_delay_ms",
            ));
        }
        Ok(())
    }

    /// Rotation interval.
    pub fn rotation_interval(&self) -> Duration {
        Duration::from_secs(self.rotation_interval_secs)
    }

    /// Resync interval.
    pub fn resync_interval(&self) -> Duration {
        Duration::from_secs(self.resync_interval_secs)
    }

    /// Shared-state object names for the configured component.
    pub fn object_names(&self) -> ObjectNames {
        ObjectNames::new(self.component.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reliability::BackoffStrategy;

    #[test]
    fn defaults_are_valid() {
        let config = RekeyConfig::default();
        config.validate().unwrap();
        assert_eq!(config.rotation_interval(), Duration::from_secs(604_800));
        assert_eq!(config.retention, 10);
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let config = RekeyConfig::from_toml_str(
            r#"
            component = "openshift-apiserver"
            retention = 3

            [backoff]
            strategy = "fixed"
            "#,
        )
        .unwrap();
        assert_eq!(config.component, "openshift-apiserver");
        assert_eq!(config.retention, 3);
        assert_eq!(config.resync_interval_secs, DEFAULT_RESYNC_INTERVAL_SECS);
        assert_eq!(config.backoff.strategy, BackoffStrategy::Fixed);
        assert_eq!(config.backoff.initial_delay_ms, 200);
    }

    #[test]
    fn zero_retention_is_rejected() {
        assert!(RekeyConfig::from_toml_str("retention = 0").is_err());
        assert!(RekeyConfig::from_toml_str("component = \"\"").is_err());
        assert!(RekeyConfig::from_toml_str("retention = \"ten\"").is_err());
    }
}
