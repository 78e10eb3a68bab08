//! Shared-state object names.

use crate::types::{KeyId, Revision};

/// Name of the user-facing encryption mode object.
pub const ENCRYPTION_MODE_OBJECT: &str = "encryption-mode";

/// Name of the per-store key id high-water object.
const KEY_HIGH_WATER_SUFFIX: &str = "high-water";

/// Object names for one managed component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectNames {
    component: String,
}

impl ObjectNames {
    /// Names for `component` (for example `kube-apiserver`).
    pub fn new(component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
        }
    }

    /// Managed component.
    pub fn component(&self) -> &str {
        &self.component
    }

    /// Prefix shared by every key record.
    pub fn key_prefix(&self) -> String {
        format!("encryption-key-{}-", self.component)
    }

    /// Key record object.
    pub fn key(&self, id: KeyId) -> String {
        format!("{}{}", self.key_prefix(), id)
    }

    /// Parse the id out of a key record object name.
    pub fn parse_key(&self, name: &str) -> Option<KeyId> {
        name.strip_prefix(&self.key_prefix())?
            .parse::<u64>()
            .ok()
            .map(KeyId)
    }

    /// Highest key id ever claimed, kept across deletions.
    pub fn key_high_water(&self) -> String {
        format!("{}{}", self.key_prefix(), KEY_HIGH_WATER_SUFFIX)
    }

    /// Target configuration object.
    pub fn target(&self) -> String {
        format!("encryption-config-{}", self.component)
    }

    /// Observed configuration published for `revision`.
    pub fn observed(&self, revision: &Revision) -> String {
        format!("{}-observed-{}", self.target(), revision)
    }

    /// Replica registry object.
    pub fn replicas(&self) -> String {
        format!("replicas-{}", self.component)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_names_roundtrip_and_skip_high_water() {
        let names = ObjectNames::new("kube-apiserver");
        assert_eq!(names.key(KeyId(12)), "encryption-key-kube-apiserver-12");
        assert_eq!(names.parse_key("encryption-key-kube-apiserver-12"), Some(KeyId(12)));
        assert_eq!(names.parse_key(&names.key_high_water()), None);
        assert_eq!(names.parse_key("encryption-key-other-12"), None);
    }

    #[test]
    fn configuration_names() {
        let names = ObjectNames::new("kube-apiserver");
        assert_eq!(names.target(), "encryption-config-kube-apiserver");
        assert_eq!(
            names.observed(&Revision::new("7")),
            "encryption-config-kube-apiserver-observed-7"
        );
    }

    #[test]
    fn observed_names_never_shadow_another_components_target() {
        let plain = ObjectNames::new("kube-apiserver");
        let numbered = ObjectNames::new("kube-apiserver-3");
        assert_ne!(plain.observed(&Revision::new("3")), numbered.target());
        assert_ne!(numbered.observed(&Revision::new("3")), plain.target());
    }
}
