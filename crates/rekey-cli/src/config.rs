//! Controller settings: TOML file plus command-line overrides.

use anyhow::{Context, Result};
use clap::Args;
use rekey_core::RekeyConfig;
use std::path::Path;

/// Flags that take precedence over the config file.
#[derive(Args, Debug, Default, Clone)]
pub struct ConfigOverrides {
    /// Managed component
    #[arg(long, global = true)]
    pub component: Option<String>,

    /// Migrated keys retained per resource
    #[arg(long, global = true)]
    pub retention: Option<usize>,

    /// Rotation interval in seconds
    #[arg(long, global = true)]
    pub rotation_interval_secs: Option<u64>,

    /// Resync interval in seconds
    #[arg(long, global = true)]
    pub resync_interval_secs: Option<u64>,
}

impl ConfigOverrides {
    fn apply(&self, config: &mut RekeyConfig) {
        if let Some(component) = &self.component {
            config.component = component.clone();
        }
        if let Some(retention) = self.retention {
            config.retention = retention;
        }
        if let Some(secs) = self.rotation_interval_secs {
            config.rotation_interval_secs = secs;
        }
        if let Some(secs) = self.resync_interval_secs {
            config.resync_interval_secs = secs;
        }
    }
}

/// Load `path` (or defaults), apply `overrides`, and validate the result.
pub fn load_config(path: Option<&Path>, overrides: &ConfigOverrides) -> Result<RekeyConfig> {
    let mut config = match path {
        Some(path) => RekeyConfig::load_from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => RekeyConfig::default(),
    };
    overrides.apply(&mut config);
    config.validate().context("invalid configuration")?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use std::io::Write;

    fn config_file(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn defaults_without_a_file() {
        let config = load_config(None, &ConfigOverrides::default()).unwrap();
        assert_eq!(config.component, RekeyConfig::default().component);
        assert_eq!(config.retention, 10);
    }

    #[test]
    fn file_values_then_overrides() {
        let file = config_file(
            r#"
            component = "openshift-apiserver"
            retention = 4
            rotation_interval_secs = 3600
            "#,
        );
        let overrides = ConfigOverrides {
            retention: Some(2),
            ..ConfigOverrides::default()
        };

        let config = load_config(Some(file.path()), &overrides).unwrap();
        assert_eq!(config.component, "openshift-apiserver");
        assert_eq!(config.retention, 2);
        assert_eq!(config.rotation_interval_secs, 3600);
    }

    #[test]
    fn override_cannot_bypass_validation() {
        let overrides = ConfigOverrides {
            retention: Some(0),
            ..ConfigOverrides::default()
        };
        assert!(load_config(None, &overrides).is_err());
    }

    #[test]
    fn malformed_file_is_rejected() {
        let file = config_file("retention = \"many\"");
        let err = load_config(Some(file.path()), &ConfigOverrides::default()).unwrap_err();
        assert!(format!("{err:#}").contains("Invalid configuration"));
    }

    #[test]
    fn missing_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        assert!(load_config(Some(&path), &ConfigOverrides::default()).is_err());
    }
}
