//! Resource type identifiers and the static encryption policy.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::errors::RekeyError;

/// A class of stored objects, identified by API group and resource name.
///
/// Rendered as `resource.group`, or just `resource` for the core group. The same
/// string form is used as the map key of serialized configurations.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct GroupResource {
    /// API group, empty for the core group.
    pub group: String,
    /// Plural resource name.
    pub resource: String,
}

impl GroupResource {
    /// Create a group/resource pair.
    pub fn new(group: impl Into<String>, resource: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            resource: resource.into(),
        }
    }

    /// Resource in the core (empty) group.
    pub fn core(resource: impl Into<String>) -> Self {
        Self::new("", resource)
    }
}

impl fmt::Display for GroupResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.group.is_empty() {
            f.write_str(&self.resource)
        } else {
            write!(f, "{}.{}", self.resource, self.group)
        }
    }
}

impl FromStr for GroupResource {
    type Err = RekeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (resource, group) = match s.split_once('.') {
            Some((resource, group)) => (resource, group),
            None => (s, ""),
        };
        if resource.is_empty() {
            return Err(RekeyError::invalid(format!(
                "resource name missing in group resource {s:?}"
            )));
        }
        Ok(Self::new(group, resource))
    }
}

impl TryFrom<String> for GroupResource {
    type Error = RekeyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<GroupResource> for String {
    fn from(value: GroupResource) -> Self {
        value.to_string()
    }
}

/// Static, version-pinned list of resource types that must be encrypted.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ResourcePolicy {
    resources: BTreeSet<GroupResource>,
}

impl ResourcePolicy {
    /// Build a policy from an explicit resource list.
    pub fn new(resources: impl IntoIterator<Item = GroupResource>) -> Self {
        Self {
            resources: resources.into_iter().collect(),
        }
    }

    /// Resource types encrypted by this release.
    pub fn builtin() -> Self {
        Self::new([GroupResource::core("secrets"), GroupResource::core("configmaps")])
    }

    /// Resources in canonical order.
    pub fn resources(&self) -> impl Iterator<Item = &GroupResource> + '_ {
        self.resources.iter()
    }

    /// Whether `resource` must be encrypted.
    pub fn contains(&self, resource: &GroupResource) -> bool {
        self.resources.contains(resource)
    }

    /// Number of resource types in the policy.
    pub fn len(&self) -> usize {
        self.resources.len()
    }

    /// Whether the policy lists nothing.
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}
