// Copyright 2024 The Quorate Authors
// SPDX-License-Identifier: Apache-2.0

//! Administrative operations exposed by the engine.

use std::fmt;

use serde::{Deserialize, Serialize};

/// An administrative operation a caller may request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Operation {
    /// Cluster status with live member statuses.
    Status,
    /// Cluster structure without live statuses.
    Describe,
    /// Standalone check of one instance against the cluster.
    CheckInstanceState,
    /// Add a new instance to the group.
    AddInstance,
    /// Remove an instance from the group and metadata.
    RemoveInstance,
    /// Bring a declared member back into the group.
    RejoinInstance,
    /// Reconcile metadata against the live group.
    Rescan,
    /// Stop the group and delete the cluster metadata.
    Dissolve,
    /// Create a new cluster on a standalone instance.
    CreateCluster,
    /// Obtain a handle on an existing cluster.
    GetCluster,
    /// Recreate a group after every member stopped.
    RebootClusterFromCompleteOutage,
    /// Delete the metadata record without touching the group.
    DropMetadataSchema,
    /// Apply instance configuration (pass-through).
    ConfigureInstance,
}

impl Operation {
    /// Every operation, in table order.
    pub const ALL: [Self; 13] = [
        Self::Status,
        Self::Describe,
        Self::CheckInstanceState,
        Self::AddInstance,
        Self::RemoveInstance,
        Self::RejoinInstance,
        Self::Rescan,
        Self::Dissolve,
        Self::CreateCluster,
        Self::GetCluster,
        Self::RebootClusterFromCompleteOutage,
        Self::DropMetadataSchema,
        Self::ConfigureInstance,
    ];

    /// Returns the caller-facing name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Status => "status",
            Self::Describe => "describe",
            Self::CheckInstanceState => "checkInstanceState",
            Self::AddInstance => "addInstance",
            Self::RemoveInstance => "removeInstance",
            Self::RejoinInstance => "rejoinInstance",
            Self::Rescan => "rescan",
            Self::Dissolve => "dissolve",
            Self::CreateCluster => "createCluster",
            Self::GetCluster => "getCluster",
            Self::RebootClusterFromCompleteOutage => "rebootClusterFromCompleteOutage",
            Self::DropMetadataSchema => "dropMetadataSchema",
            Self::ConfigureInstance => "configureInstance",
        }
    }

    /// Returns true if the operation changes membership or metadata and must
    /// hold the exclusive per-cluster section.
    pub fn is_mutation(&self) -> bool {
        !matches!(
            self,
            Self::Status
                | Self::Describe
                | Self::CheckInstanceState
                | Self::GetCluster
                | Self::ConfigureInstance
        )
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for Operation {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        let wanted = s.trim().replace(['-', '_'], "");
        Self::ALL
            .into_iter()
            .find(|op| op.name().eq_ignore_ascii_case(&wanted))
            .ok_or_else(|| crate::Error::InvalidArgument(format!("unknown operation '{}'", s)))
    }
}

/// Role a caller's session must have for an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleRequirement {
    /// Any session.
    Any,
    /// A session bound to the writable member.
    Primary,
    /// A session bound to a declared member that can seed the group.
    SeedCandidate,
}

impl fmt::Display for RoleRequirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Any => "any session",
            Self::Primary => "a session to the primary member",
            Self::SeedCandidate => "a session to a declared member",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_accepts_cli_spellings() {
        assert_eq!("addInstance".parse::<Operation>().unwrap(), Operation::AddInstance);
        assert_eq!("add-instance".parse::<Operation>().unwrap(), Operation::AddInstance);
        assert_eq!(
            "reboot_cluster_from_complete_outage".parse::<Operation>().unwrap(),
            Operation::RebootClusterFromCompleteOutage
        );
        assert!("explode".parse::<Operation>().is_err());
    }

    #[test]
    fn test_mutations() {
        assert!(Operation::AddInstance.is_mutation());
        assert!(Operation::RebootClusterFromCompleteOutage.is_mutation());
        assert!(!Operation::Status.is_mutation());
        assert!(!Operation::CheckInstanceState.is_mutation());
    }
}
