// Copyright 2024 The Quorate Authors
// SPDX-License-Identifier: Apache-2.0

//! Operation preconditions.
//!
//! Every cluster-state-dependent operation is looked up in a static rule
//! table. Classification is checked before the caller's role so that a denial
//! on a degraded cluster always names the classification.

use quorate_core::{
    CallerRole, DenyReason, Error, HealthClassification, Operation, Result, RoleRequirement,
};
use serde::{Deserialize, Serialize};

use HealthClassification::{AllOffline, NoQuorum, Ok as Healthy, OkPartial};

const READABLE: &[HealthClassification] = &[Healthy, OkPartial, NoQuorum];
const QUORUM: &[HealthClassification] = &[Healthy, OkPartial];
const OFFLINE: &[HealthClassification] = &[AllOffline];
const DROPPABLE: &[HealthClassification] = &[Healthy, OkPartial, AllOffline];
const ANY: &[HealthClassification] = &HealthClassification::ALL;
const NONE: &[HealthClassification] = &[];

/// Outcome of a precondition check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// The operation may proceed.
    Allow,
    /// The operation is denied.
    Deny(DenyReason),
}

impl Decision {
    /// Returns true for [`Decision::Allow`].
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow)
    }

    /// Converts a denial into [`Error::PreconditionDenied`].
    ///
    /// # Errors
    ///
    /// Returns the denial as an error.
    pub fn into_result(self, classification: HealthClassification, operation: Operation) -> Result<()> {
        match self {
            Self::Allow => Ok(()),
            Self::Deny(reason) => Err(Error::denied(classification, operation, reason)),
        }
    }
}

/// Authorization rule of one operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rule {
    /// Classifications in which the operation runs.
    pub allowed: &'static [HealthClassification],
    /// Additional classifications in which it runs with `force`.
    pub with_force: &'static [HealthClassification],
    /// Role the caller's session must have.
    pub role: RoleRequirement,
    /// Whether `force` is always required.
    pub force_required: bool,
}

impl Rule {
    fn new(allowed: &'static [HealthClassification], role: RoleRequirement) -> Self {
        Self { allowed, with_force: NONE, role, force_required: false }
    }

    fn forced_in(mut self, with_force: &'static [HealthClassification]) -> Self {
        self.with_force = with_force;
        self
    }

    fn always_forced(mut self) -> Self {
        self.force_required = true;
        self
    }

    fn all_allowed(&self) -> Vec<HealthClassification> {
        self.allowed.iter().chain(self.with_force).copied().collect()
    }
}

/// Returns the classification rule of `operation`, or `None` for operations
/// gated only on metadata presence (see [`check_metadata`]).
pub fn rule(operation: Operation) -> Option<Rule> {
    use RoleRequirement::{Any, Primary, SeedCandidate};

    let rule = match operation {
        Operation::Status | Operation::Describe => Rule::new(READABLE, Any),
        Operation::CheckInstanceState | Operation::ConfigureInstance => Rule::new(ANY, Any),
        Operation::AddInstance | Operation::Rescan => Rule::new(QUORUM, Primary),
        Operation::RemoveInstance | Operation::Dissolve => {
            Rule::new(QUORUM, Primary).forced_in(&[NoQuorum])
        }
        Operation::RejoinInstance => Rule::new(READABLE, Primary),
        Operation::RebootClusterFromCompleteOutage => Rule::new(OFFLINE, SeedCandidate),
        Operation::DropMetadataSchema => Rule::new(DROPPABLE, Primary).always_forced(),
        Operation::CreateCluster | Operation::GetCluster => return None,
    };
    Some(rule)
}

/// Decides whether `operation` may run.
///
/// `SeedCandidate` is not decided here: it depends on the session's address,
/// which the recovery plan validates.
pub fn authorize(
    classification: HealthClassification,
    operation: Operation,
    caller_role: CallerRole,
    force: bool,
) -> Decision {
    let Some(rule) = rule(operation) else {
        return Decision::Allow;
    };

    if !rule.allowed.contains(&classification) {
        if rule.with_force.contains(&classification) {
            if !force {
                return Decision::Deny(DenyReason::ForceRequired);
            }
        } else if operation == Operation::RebootClusterFromCompleteOutage {
            return Decision::Deny(DenyReason::NotCompletelyOffline);
        } else {
            return Decision::Deny(DenyReason::Classification { allowed: rule.all_allowed() });
        }
    }

    if rule.role == RoleRequirement::Primary && caller_role != CallerRole::Primary {
        // With no running group there is no primary; the metadata can only be
        // dropped from the detached instance holding it.
        let detached_drop = operation == Operation::DropMetadataSchema
            && classification == AllOffline
            && caller_role == CallerRole::Detached;
        if !detached_drop {
            return Decision::Deny(DenyReason::Role { required: rule.role, actual: caller_role });
        }
    }

    if rule.force_required && !force {
        return Decision::Deny(DenyReason::ForceRequired);
    }

    Decision::Allow
}

/// Whether cluster metadata exists for the target of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetadataPresence {
    /// No record.
    Absent,
    /// Exactly one consistent record.
    Present,
    /// Records exist but disagree with each other or with the instance.
    Inconsistent,
}

/// Decides whether `operation` may run given the metadata presence.
pub fn check_metadata(operation: Operation, presence: MetadataPresence) -> Decision {
    match (operation, presence) {
        (Operation::CheckInstanceState | Operation::ConfigureInstance, _) => Decision::Allow,
        (_, MetadataPresence::Inconsistent) => Decision::Deny(DenyReason::MetadataInconsistent),
        (Operation::CreateCluster, MetadataPresence::Present) => {
            Decision::Deny(DenyReason::MetadataAlreadyExists)
        }
        (Operation::CreateCluster, MetadataPresence::Absent) => Decision::Allow,
        (_, MetadataPresence::Absent) => Decision::Deny(DenyReason::MetadataMissing),
        (_, MetadataPresence::Present) => Decision::Allow,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remove_instance_needs_force_without_quorum() {
        assert_eq!(
            authorize(NoQuorum, Operation::RemoveInstance, CallerRole::Primary, false),
            Decision::Deny(DenyReason::ForceRequired)
        );
        assert!(authorize(NoQuorum, Operation::RemoveInstance, CallerRole::Primary, true)
            .is_allowed());
        assert!(authorize(Healthy, Operation::RemoveInstance, CallerRole::Primary, false)
            .is_allowed());
    }

    #[test]
    fn test_add_instance_denied_without_quorum() {
        let decision = authorize(NoQuorum, Operation::AddInstance, CallerRole::Primary, true);
        assert_eq!(
            decision,
            Decision::Deny(DenyReason::Classification { allowed: vec![Healthy, OkPartial] })
        );
    }

    #[test]
    fn test_classification_checked_before_role() {
        let decision = authorize(NoQuorum, Operation::AddInstance, CallerRole::Secondary, false);
        assert!(matches!(decision, Decision::Deny(DenyReason::Classification { .. })));

        let decision = authorize(Healthy, Operation::AddInstance, CallerRole::Secondary, false);
        assert_eq!(
            decision,
            Decision::Deny(DenyReason::Role {
                required: RoleRequirement::Primary,
                actual: CallerRole::Secondary
            })
        );
    }

    #[test]
    fn test_unknown_denied_for_cluster_operations() {
        for operation in Operation::ALL {
            let decision =
                authorize(HealthClassification::Unknown, operation, CallerRole::Primary, true);
            match operation {
                Operation::CheckInstanceState
                | Operation::ConfigureInstance
                | Operation::CreateCluster
                | Operation::GetCluster => assert!(decision.is_allowed(), "{}", operation),
                _ => assert!(!decision.is_allowed(), "{}", operation),
            }
        }
    }

    #[test]
    fn test_reboot_only_when_all_offline() {
        assert!(authorize(
            AllOffline,
            Operation::RebootClusterFromCompleteOutage,
            CallerRole::Detached,
            false
        )
        .is_allowed());

        for classification in [Healthy, OkPartial, NoQuorum] {
            assert_eq!(
                authorize(
                    classification,
                    Operation::RebootClusterFromCompleteOutage,
                    CallerRole::Primary,
                    false
                ),
                Decision::Deny(DenyReason::NotCompletelyOffline)
            );
        }
    }

    #[test]
    fn test_status_readable_without_quorum() {
        assert!(authorize(NoQuorum, Operation::Status, CallerRole::Detached, false).is_allowed());
        assert!(!authorize(AllOffline, Operation::Status, CallerRole::Detached, false).is_allowed());
        assert!(authorize(AllOffline, Operation::CheckInstanceState, CallerRole::Detached, false)
            .is_allowed());
    }

    #[test]
    fn test_drop_metadata_schema() {
        assert_eq!(
            authorize(Healthy, Operation::DropMetadataSchema, CallerRole::Primary, false),
            Decision::Deny(DenyReason::ForceRequired)
        );
        assert!(authorize(Healthy, Operation::DropMetadataSchema, CallerRole::Primary, true)
            .is_allowed());
        assert!(authorize(AllOffline, Operation::DropMetadataSchema, CallerRole::Detached, true)
            .is_allowed());
        assert!(matches!(
            authorize(Healthy, Operation::DropMetadataSchema, CallerRole::Detached, true),
            Decision::Deny(DenyReason::Role { .. })
        ));
        assert!(matches!(
            authorize(NoQuorum, Operation::DropMetadataSchema, CallerRole::Primary, true),
            Decision::Deny(DenyReason::Classification { .. })
        ));
    }

    #[test]
    fn test_metadata_presence() {
        assert_eq!(
            check_metadata(Operation::CreateCluster, MetadataPresence::Present),
            Decision::Deny(DenyReason::MetadataAlreadyExists)
        );
        assert!(check_metadata(Operation::CreateCluster, MetadataPresence::Absent).is_allowed());
        assert_eq!(
            check_metadata(Operation::GetCluster, MetadataPresence::Absent),
            Decision::Deny(DenyReason::MetadataMissing)
        );
        assert_eq!(
            check_metadata(Operation::GetCluster, MetadataPresence::Inconsistent),
            Decision::Deny(DenyReason::MetadataInconsistent)
        );
        assert!(
            check_metadata(Operation::CheckInstanceState, MetadataPresence::Absent).is_allowed()
        );
    }

    #[test]
    fn test_denial_converts_to_error() {
        let err = authorize(NoQuorum, Operation::Rescan, CallerRole::Primary, false)
            .into_result(NoQuorum, Operation::Rescan)
            .unwrap_err();
        assert!(err.to_string().contains("NO_QUORUM"));
    }
}
