//! Replica convergence view.
//!
//! Answers one question for the controllers: do all front-end replicas run, agree
//! on a single revision, and therefore serve one known configuration? Only then
//! may a configuration transition be applied or a migration started.

use std::collections::BTreeSet;
use std::fmt;

use crate::effects::{ConfigurationStore, ReplicaEffects};
use crate::errors::RekeyResult;
use crate::types::{ReplicaStatus, Revision, TargetConfiguration};

/// Convergence state of the replica set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConvergenceStatus {
    /// No replica is registered.
    NoReplicas,
    /// Some replicas are not running.
    ReplicasNotRunning {
        /// Ids of the stopped replicas.
        replicas: Vec<String>,
    },
    /// Some running replicas have not reported a revision yet.
    UnreportedRevision {
        /// Ids of the silent replicas.
        replicas: Vec<String>,
    },
    /// Running replicas disagree on the revision.
    RevisionSkew {
        /// Every revision currently served.
        revisions: BTreeSet<Revision>,
    },
    /// All replicas agree, but no configuration was published for the revision.
    ObservedUnknown {
        /// The shared revision.
        revision: Revision,
    },
    /// All replicas serve `observed` from `revision`.
    Converged {
        /// The shared revision.
        revision: Revision,
        /// Configuration the revision serves.
        observed: TargetConfiguration,
    },
}

impl fmt::Display for ConvergenceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoReplicas => f.write_str("no replicas"),
            Self::ReplicasNotRunning { replicas } => {
                write!(f, "replicas not running: {}", replicas.join(", "))
            }
            Self::UnreportedRevision { replicas } => {
                write!(f, "replicas without revision: {}", replicas.join(", "))
            }
            Self::RevisionSkew { revisions } => {
                let revisions: Vec<&str> = revisions.iter().map(Revision::as_str).collect();
                write!(f, "revision skew: {}", revisions.join(", "))
            }
            Self::ObservedUnknown { revision } => {
                write!(f, "no observed configuration for revision {revision}")
            }
            Self::Converged { revision, .. } => write!(f, "converged on revision {revision}"),
        }
    }
}

/// Snapshot of replica convergence, derived from the live replica set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicaConvergenceView {
    status: ConvergenceStatus,
    reported_revisions: BTreeSet<Revision>,
}

impl ReplicaConvergenceView {
    /// Classify a replica set. Returns the shared revision when the replicas
    /// agree, leaving the observed configuration lookup to the caller.
    pub fn classify(replicas: &[ReplicaStatus]) -> Result<Revision, ConvergenceStatus> {
        if replicas.is_empty() {
            return Err(ConvergenceStatus::NoReplicas);
        }

        let stopped: Vec<String> = replicas
            .iter()
            .filter(|replica| !replica.running)
            .map(|replica| replica.id.clone())
            .collect();
        if !stopped.is_empty() {
            return Err(ConvergenceStatus::ReplicasNotRunning { replicas: stopped });
        }

        let silent: Vec<String> = replicas
            .iter()
            .filter(|replica| replica.revision.is_none())
            .map(|replica| replica.id.clone())
            .collect();
        if !silent.is_empty() {
            return Err(ConvergenceStatus::UnreportedRevision { replicas: silent });
        }

        let revisions = Self::revisions_of(replicas);
        let mut iter = revisions.iter();
        match (iter.next(), iter.next()) {
            (Some(revision), None) => Ok(revision.clone()),
            _ => Err(ConvergenceStatus::RevisionSkew { revisions }),
        }
    }

    /// Build a view from a replica set and the observed configuration of its
    /// shared revision (if it has one).
    pub fn from_parts(
        replicas: &[ReplicaStatus],
        observed: impl FnOnce(&Revision) -> Option<TargetConfiguration>,
    ) -> Self {
        let reported_revisions = Self::revisions_of(replicas);
        let status = match Self::classify(replicas) {
            Err(status) => status,
            Ok(revision) => match observed(&revision) {
                Some(observed) => ConvergenceStatus::Converged { revision, observed },
                None => ConvergenceStatus::ObservedUnknown { revision },
            },
        };
        Self {
            status,
            reported_revisions,
        }
    }

    /// Read replica state and the matching observed configuration.
    pub async fn load(
        replicas: &dyn ReplicaEffects,
        configs: &dyn ConfigurationStore,
    ) -> RekeyResult<Self> {
        let replicas = replicas.replicas().await?;
        let observed = match Self::classify(&replicas) {
            Ok(revision) => configs.observed_configuration(&revision).await?,
            Err(_) => None,
        };
        Ok(Self::from_parts(&replicas, |_| observed))
    }

    /// Detailed status.
    pub fn status(&self) -> &ConvergenceStatus {
        &self.status
    }

    /// Whether every replica serves one known configuration.
    pub fn is_converged(&self) -> bool {
        matches!(self.status, ConvergenceStatus::Converged { .. })
    }

    /// Whether every replica serves exactly `target`.
    ///
    /// A converged revision without a published configuration serves nothing,
    /// which matches only an empty target.
    pub fn is_converged_on(&self, target: &TargetConfiguration) -> bool {
        match &self.status {
            ConvergenceStatus::Converged { observed, .. } => observed == target,
            ConvergenceStatus::ObservedUnknown { .. } => target.is_empty(),
            _ => false,
        }
    }

    /// Configuration served by the converged revision.
    pub fn observed(&self) -> Option<&TargetConfiguration> {
        match &self.status {
            ConvergenceStatus::Converged { observed, .. } => Some(observed),
            _ => None,
        }
    }

    /// The shared revision, when replicas agree.
    pub fn revision(&self) -> Option<&Revision> {
        match &self.status {
            ConvergenceStatus::Converged { revision, .. }
            | ConvergenceStatus::ObservedUnknown { revision } => Some(revision),
            _ => None,
        }
    }

    /// Every revision any replica reports, running or not. A stopped replica
    /// comes back on the revision it last served.
    pub fn reported_revisions(&self) -> &BTreeSet<Revision> {
        &self.reported_revisions
    }

    fn revisions_of(replicas: &[ReplicaStatus]) -> BTreeSet<Revision> {
        replicas
            .iter()
            .filter_map(|replica| replica.revision.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EncryptionFunction, GroupResource, KeyId, KeyRef, Provider, ResourceProviders};
    use assert_matches::assert_matches;

    fn config_with_key(id: u64) -> TargetConfiguration {
        let mut config = TargetConfiguration::new();
        config.insert(
            GroupResource::core("secrets"),
            ResourceProviders::new(
                Provider::Key(KeyRef {
                    id: KeyId(id),
                    function: EncryptionFunction::AesCbc,
                }),
                [],
                false,
            ),
        );
        config
    }

    #[test]
    fn empty_replica_set_is_not_converged() {
        let view = ReplicaConvergenceView::from_parts(&[], |_| Some(TargetConfiguration::new()));
        assert_eq!(view.status(), &ConvergenceStatus::NoReplicas);
        assert!(!view.is_converged_on(&TargetConfiguration::new()));
    }

    #[test]
    fn stopped_replica_blocks_convergence() {
        let mut stopped = ReplicaStatus::running("b", Revision::new("3"));
        stopped.running = false;
        let replicas = [ReplicaStatus::running("a", Revision::new("3")), stopped];
        let view = ReplicaConvergenceView::from_parts(&replicas, |_| Some(config_with_key(1)));
        assert_matches!(view.status(), ConvergenceStatus::ReplicasNotRunning { replicas } if replicas == &["b".to_string()]);
        assert!(view.observed().is_none());
    }

    #[test]
    fn skew_reports_every_revision() {
        let replicas = [
            ReplicaStatus::running("a", Revision::new("3")),
            ReplicaStatus::running("b", Revision::new("4")),
        ];
        let view = ReplicaConvergenceView::from_parts(&replicas, |_| Some(config_with_key(1)));
        assert_matches!(view.status(), ConvergenceStatus::RevisionSkew { revisions } if revisions.len() == 2);
        assert_eq!(view.reported_revisions().len(), 2);
        assert!(!view.is_converged());
    }

    #[test]
    fn converged_on_matching_target_only() {
        let replicas = [
            ReplicaStatus::running("a", Revision::new("5")),
            ReplicaStatus::running("b", Revision::new("5")),
        ];
        let view = ReplicaConvergenceView::from_parts(&replicas, |revision| {
            assert_eq!(revision.as_str(), "5");
            Some(config_with_key(2))
        });
        assert!(view.is_converged());
        assert!(view.is_converged_on(&config_with_key(2)));
        assert!(!view.is_converged_on(&config_with_key(3)));
        assert_eq!(view.revision(), Some(&Revision::new("5")));
    }

    #[test]
    fn unpublished_revision_matches_only_empty_target() {
        let replicas = [ReplicaStatus::running("a", Revision::new("1"))];
        let view = ReplicaConvergenceView::from_parts(&replicas, |_| None);
        assert!(!view.is_converged());
        assert!(view.is_converged_on(&TargetConfiguration::new()));
        assert!(!view.is_converged_on(&config_with_key(1)));
    }
}
