//! Front-end server replica state.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Label identifying the software version and configuration a replica serves.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Revision(pub String);

impl Revision {
    /// Wrap a revision label.
    pub fn new(label: impl Into<String>) -> Self {
        Self(label.into())
    }

    /// Raw label.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Reported state of one replica.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaStatus {
    /// Stable replica identity.
    pub id: String,
    /// Whether the replica is up and serving.
    pub running: bool,
    /// Revision the replica reports, if it has reported one yet.
    #[serde(default)]
    pub revision: Option<Revision>,
}

impl ReplicaStatus {
    /// Running replica on `revision`.
    pub fn running(id: impl Into<String>, revision: Revision) -> Self {
        Self {
            id: id.into(),
            running: true,
            revision: Some(revision),
        }
    }
}
