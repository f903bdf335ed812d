// Copyright 2024 The Quorate Authors
// SPDX-License-Identifier: Apache-2.0

//! Structured operation results.
//!
//! Only the field sets are a contract; rendering is up to the caller.

use chrono::{DateTime, Utc};
use quorate_core::{
    HealthClassification, InstanceAddress, InstanceType, MemberRole, MemberStatus, SessionState,
    Topology,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One member line of a status report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberStatusReport {
    /// Member address.
    pub address: InstanceAddress,
    /// Member label.
    pub label: String,
    /// Declared role.
    pub role: MemberRole,
    /// Observed status.
    pub status: MemberStatus,
    /// False for members seen in the group but absent from the metadata.
    pub declared: bool,
}

/// Result of `status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReport {
    /// Cluster name.
    pub cluster_name: String,
    /// Cluster id.
    pub cluster_id: Uuid,
    /// Current classification.
    pub classification: HealthClassification,
    /// Metadata epoch.
    pub epoch: u64,
    /// Members in join order.
    pub members: Vec<MemberStatusReport>,
}

impl StatusReport {
    /// Builds a report from an observed topology.
    pub fn new(topology: &Topology, classification: HealthClassification) -> Self {
        Self {
            cluster_name: topology.cluster_name.clone(),
            cluster_id: topology.cluster_id,
            classification,
            epoch: topology.epoch,
            members: topology
                .members
                .iter()
                .map(|m| MemberStatusReport {
                    address: m.address.clone(),
                    label: m.label.clone(),
                    role: m.role,
                    status: m.status,
                    declared: m.declared,
                })
                .collect(),
        }
    }

    /// Looks up a member line.
    pub fn member(&self, address: &InstanceAddress) -> Option<&MemberStatusReport> {
        self.members.iter().find(|m| &m.address == address)
    }
}

/// One member line of a describe report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberDescription {
    /// Member address.
    pub address: InstanceAddress,
    /// Member label.
    pub label: String,
    /// Declared role.
    pub role: MemberRole,
    /// When the member was added.
    pub joined_at: DateTime<Utc>,
}

/// Result of `describe`: structure only, no live statuses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DescribeReport {
    /// Cluster name.
    pub cluster_name: String,
    /// Cluster id.
    pub cluster_id: Uuid,
    /// Metadata epoch.
    pub epoch: u64,
    /// Whether the cluster is multi-primary.
    pub multi_primary: bool,
    /// Declared members in join order.
    pub members: Vec<MemberDescription>,
}

impl From<&Topology> for DescribeReport {
    fn from(topology: &Topology) -> Self {
        Self {
            cluster_name: topology.cluster_name.clone(),
            cluster_id: topology.cluster_id,
            epoch: topology.epoch,
            multi_primary: topology.multi_primary,
            members: topology
                .declared()
                .map(|m| MemberDescription {
                    address: m.address.clone(),
                    label: m.label.clone(),
                    role: m.role,
                    joined_at: m.joined_at,
                })
                .collect(),
        }
    }
}

/// Result of `checkInstanceState`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceStateReport {
    /// Checked instance.
    pub address: InstanceAddress,
    /// Whether the instance answered.
    pub reachable: bool,
    /// Instance type derived from its state and the metadata.
    pub instance_type: InstanceType,
    /// State reported by the instance, if it answered.
    pub state: Option<SessionState>,
    /// Whether the instance is a declared member of the cluster.
    pub declared: bool,
    /// Status of the instance as seen by the cluster's group.
    pub status: Option<MemberStatus>,
}

/// Result of `rescan`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RescanReport {
    /// Cluster name.
    pub cluster_name: String,
    /// Group members that were missing from the metadata and got recorded.
    pub added: Vec<InstanceAddress>,
    /// Declared members currently reported missing.
    pub missing: Vec<InstanceAddress>,
    /// Metadata epoch after the rescan.
    pub epoch: u64,
}

/// A member-level failure recorded during a multi-member operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberFailure {
    /// Member address.
    pub address: InstanceAddress,
    /// Failure description.
    pub cause: String,
}

/// Result of `dissolve`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DissolveReport {
    /// Cluster name.
    pub cluster_name: String,
    /// Members that left the group.
    pub left: Vec<InstanceAddress>,
    /// Members that could not be told to leave.
    pub failures: Vec<MemberFailure>,
}

/// Result of `rebootClusterFromCompleteOutage`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RebootReport {
    /// Cluster name.
    pub cluster_name: String,
    /// Member the group was recreated on.
    pub seed: InstanceAddress,
    /// True iff the final classification holds quorum and no member failed.
    pub success: bool,
    /// Classification after the reboot.
    pub classification: HealthClassification,
    /// Metadata epoch after the reboot (unchanged if nothing was recorded).
    pub epoch: u64,
    /// Members that rejoined the new group.
    pub rejoined: Vec<InstanceAddress>,
    /// Members dropped from the metadata.
    pub removed: Vec<InstanceAddress>,
    /// Member operations that failed.
    pub failures: Vec<MemberFailure>,
    /// Declared members that are not part of the new group.
    pub not_joined: Vec<InstanceAddress>,
}
