// Copyright 2024 The Quorate Authors
// SPDX-License-Identifier: Apache-2.0

//! Member and topology model.
//!
//! A [`Topology`] is the in-memory form of one cluster's metadata record: an
//! ordered list of [`Member`]s (join order) stamped with an epoch. Member
//! statuses are the last values observed through the membership probe and are
//! only ever written by the quorum reconciler or the recovery orchestrator.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Network identity of a database instance (`host:port`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct InstanceAddress {
    host: String,
    port: u16,
}

impl InstanceAddress {
    /// Creates a new address.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidAddress`] if the host is empty or the port is 0.
    pub fn new(host: impl Into<String>, port: u16) -> Result<Self> {
        let host = host.into();
        if host.trim().is_empty() {
            return Err(Error::InvalidAddress("host must not be empty".to_string()));
        }
        if port == 0 {
            return Err(Error::InvalidAddress(format!("invalid port 0 for host '{}'", host)));
        }
        Ok(Self { host, port })
    }

    /// Returns the host part.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Returns the port.
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for InstanceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for InstanceAddress {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (host, port) = s
            .trim()
            .rsplit_once(':')
            .ok_or_else(|| Error::InvalidAddress(format!("'{}' is not in host:port form", s)))?;
        let port = port
            .parse::<u16>()
            .map_err(|e| Error::InvalidAddress(format!("invalid port in '{}': {}", s, e)))?;
        Self::new(host, port)
    }
}

impl TryFrom<String> for InstanceAddress {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<InstanceAddress> for String {
    fn from(value: InstanceAddress) -> Self {
        value.to_string()
    }
}

/// Declared role of a member in the metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberRole {
    /// The member the group is (re)started from in single-primary mode.
    PrimaryCandidate,
    /// Any other member.
    Secondary,
}

impl MemberRole {
    /// Returns the name of this role.
    pub fn name(&self) -> &'static str {
        match self {
            Self::PrimaryCandidate => "primary-candidate",
            Self::Secondary => "secondary",
        }
    }
}

impl fmt::Display for MemberRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Last observed status of a member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MemberStatus {
    /// Participating in the group.
    Online,
    /// Joined and catching up with the group.
    Recovering,
    /// Reachable but not participating in the group.
    Offline,
    /// Not answering; the group has not decided to expel it.
    Unreachable,
    /// Expelled by a quorum-holding group, presumed gone until it rejoins.
    Missing,
    /// Reachable but in an error state.
    Error,
}

impl MemberStatus {
    /// Returns true if the member counts towards quorum.
    #[inline]
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Online | Self::Recovering)
    }

    /// Returns the name used in reports.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Online => "ONLINE",
            Self::Recovering => "RECOVERING",
            Self::Offline => "OFFLINE",
            Self::Unreachable => "UNREACHABLE",
            Self::Missing => "MISSING",
            Self::Error => "ERROR",
        }
    }
}

impl fmt::Display for MemberStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Cluster-wide health derived from a topology snapshot. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HealthClassification {
    /// Quorum present and every declared member live.
    Ok,
    /// Quorum present, some declared members unreachable or missing.
    OkPartial,
    /// Live declared members are at most half of the declared total.
    NoQuorum,
    /// No declared member is live.
    AllOffline,
    /// No membership view could be obtained.
    Unknown,
}

impl HealthClassification {
    /// Every classification, in report order.
    pub const ALL: [Self; 5] =
        [Self::Ok, Self::OkPartial, Self::NoQuorum, Self::AllOffline, Self::Unknown];

    /// Returns true if the group holds a majority.
    #[inline]
    pub fn has_quorum(&self) -> bool {
        matches!(self, Self::Ok | Self::OkPartial)
    }

    /// Returns the name used in reports and messages.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::OkPartial => "OK_PARTIAL",
            Self::NoQuorum => "NO_QUORUM",
            Self::AllOffline => "ALL_OFFLINE",
            Self::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for HealthClassification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for HealthClassification {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|c| c.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| Error::InvalidArgument(format!("unknown classification '{}'", s)))
    }
}

/// What kind of instance a session is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceType {
    /// Plain instance with no group and no metadata.
    Standalone,
    /// Running a replication group that is not described by any metadata.
    GroupReplication,
    /// A managed cluster member.
    Cluster,
    /// Holds cluster metadata but is not currently in a running group.
    StandaloneWithMetadata,
    /// Could not be determined.
    Unknown,
}

impl fmt::Display for InstanceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Standalone => "standalone",
            Self::GroupReplication => "group-replication",
            Self::Cluster => "cluster",
            Self::StandaloneWithMetadata => "standalone-with-metadata",
            Self::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// State of the instance a session is bound to, as reported by that instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Online and writable (primary).
    OnlineReadWrite,
    /// Online and read-only (secondary).
    OnlineReadOnly,
    /// Joining the group.
    Recovering,
    /// Not in a group.
    Offline,
    /// Group reports the instance unreachable.
    Unreachable,
    /// In an error state.
    Error,
    /// Expelled from the group.
    Missing,
}

impl SessionState {
    /// Derives the caller role granted by this state.
    pub fn caller_role(&self) -> CallerRole {
        match self {
            Self::OnlineReadWrite => CallerRole::Primary,
            Self::OnlineReadOnly | Self::Recovering => CallerRole::Secondary,
            _ => CallerRole::Detached,
        }
    }
}

/// Role of the caller's session with respect to the group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallerRole {
    /// Bound to the writable member.
    Primary,
    /// Bound to a read-only member.
    Secondary,
    /// Bound to an instance outside any running group.
    Detached,
}

impl fmt::Display for CallerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Primary => "primary",
            Self::Secondary => "secondary",
            Self::Detached => "detached",
        };
        f.write_str(name)
    }
}

/// One database instance known to a cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Member {
    /// Network identity.
    pub address: InstanceAddress,
    /// Human-readable label.
    pub label: String,
    /// Declared role.
    pub role: MemberRole,
    /// Last observed status.
    pub status: MemberStatus,
    /// Whether the member is recorded in the metadata (false for transient
    /// members seen only in the live group).
    pub declared: bool,
    /// When the member was added to the metadata.
    pub joined_at: DateTime<Utc>,
}

impl Member {
    /// Creates a declared member with status `OFFLINE` until observed.
    pub fn new(address: InstanceAddress, role: MemberRole) -> Self {
        Self {
            label: address.to_string(),
            address,
            role,
            status: MemberStatus::Offline,
            declared: true,
            joined_at: Utc::now(),
        }
    }

    /// Sets the label.
    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Sets the observed status.
    #[must_use]
    pub fn with_status(mut self, status: MemberStatus) -> Self {
        self.status = status;
        self
    }

    /// Marks the member as transient (not in the metadata).
    #[must_use]
    pub fn transient(mut self) -> Self {
        self.declared = false;
        self
    }
}

/// Ordered membership of one cluster plus its metadata version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Topology {
    /// Cluster name.
    pub cluster_name: String,
    /// Cluster identifier.
    pub cluster_id: Uuid,
    /// Metadata epoch.
    pub epoch: u64,
    /// Whether several members may be primary candidates at once.
    pub multi_primary: bool,
    /// Members in join order.
    pub members: Vec<Member>,
}

impl Topology {
    /// Creates an empty topology at epoch 1.
    pub fn new(cluster_name: impl Into<String>) -> Self {
        Self {
            cluster_name: cluster_name.into(),
            cluster_id: Uuid::new_v4(),
            epoch: 1,
            multi_primary: false,
            members: Vec::new(),
        }
    }

    /// Appends a member at the end of the join order.
    #[must_use]
    pub fn with_member(mut self, member: Member) -> Self {
        self.members.push(member);
        self
    }

    /// Iterates over declared members in join order.
    pub fn declared(&self) -> impl Iterator<Item = &Member> {
        self.members.iter().filter(|m| m.declared)
    }

    /// Number of declared members.
    pub fn declared_total(&self) -> usize {
        self.declared().count()
    }

    /// Number of declared members currently ONLINE or RECOVERING.
    pub fn live_count(&self) -> usize {
        self.declared().filter(|m| m.status.is_live()).count()
    }

    /// Looks up a member by address.
    pub fn member(&self, address: &InstanceAddress) -> Option<&Member> {
        self.members.iter().find(|m| &m.address == address)
    }

    /// Looks up a member by address for mutation.
    pub fn member_mut(&mut self, address: &InstanceAddress) -> Option<&mut Member> {
        self.members.iter_mut().find(|m| &m.address == address)
    }

    /// Returns true if the address is a declared member.
    pub fn is_declared(&self, address: &InstanceAddress) -> bool {
        self.member(address).is_some_and(|m| m.declared)
    }

    /// Removes a member, returning it if present.
    pub fn remove_member(&mut self, address: &InstanceAddress) -> Option<Member> {
        let idx = self.members.iter().position(|m| &m.address == address)?;
        Some(self.members.remove(idx))
    }

    /// Returns a copy holding only the declared members.
    #[must_use]
    pub fn without_transient(&self) -> Self {
        let mut copy = self.clone();
        copy.members.retain(|m| m.declared);
        copy
    }

    /// Checks the structural invariants: unique addresses and at most one
    /// primary candidate unless the cluster is multi-primary.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidTopology`] describing the first violation.
    pub fn validate(&self) -> Result<()> {
        if self.cluster_name.trim().is_empty() {
            return Err(Error::InvalidTopology("cluster name must not be empty".to_string()));
        }

        let mut seen = HashSet::new();
        for member in &self.members {
            if !seen.insert(&member.address) {
                return Err(Error::InvalidTopology(format!(
                    "member {} appears more than once",
                    member.address
                )));
            }
        }

        let candidates =
            self.declared().filter(|m| m.role == MemberRole::PrimaryCandidate).count();
        if candidates > 1 && !self.multi_primary {
            return Err(Error::InvalidTopology(format!(
                "{} primary candidates in a single-primary cluster",
                candidates
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> InstanceAddress {
        s.parse().unwrap()
    }

    #[test]
    fn test_address_parse_and_display() {
        let a = addr("localhost:3310");
        assert_eq!(a.host(), "localhost");
        assert_eq!(a.port(), 3310);
        assert_eq!(a.to_string(), "localhost:3310");
    }

    #[test]
    fn test_address_rejects_garbage() {
        assert!("localhost".parse::<InstanceAddress>().is_err());
        assert!(":3306".parse::<InstanceAddress>().is_err());
        assert!("host:0".parse::<InstanceAddress>().is_err());
        assert!("host:99999".parse::<InstanceAddress>().is_err());
    }

    #[test]
    fn test_address_serde_as_string() {
        let json = serde_json::to_string(&addr("db1:3306")).unwrap();
        assert_eq!(json, "\"db1:3306\"");
        let parsed: InstanceAddress = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, addr("db1:3306"));
    }

    #[test]
    fn test_status_liveness() {
        assert!(MemberStatus::Online.is_live());
        assert!(MemberStatus::Recovering.is_live());
        assert!(!MemberStatus::Unreachable.is_live());
        assert!(!MemberStatus::Missing.is_live());
        assert!(!MemberStatus::Offline.is_live());
        assert!(!MemberStatus::Error.is_live());
    }

    #[test]
    fn test_classification_names_round_trip() {
        for c in HealthClassification::ALL {
            assert_eq!(c.name().parse::<HealthClassification>().unwrap(), c);
        }
        assert_eq!(
            serde_json::to_string(&HealthClassification::OkPartial).unwrap(),
            "\"OK_PARTIAL\""
        );
    }

    #[test]
    fn test_session_state_roles() {
        assert_eq!(SessionState::OnlineReadWrite.caller_role(), CallerRole::Primary);
        assert_eq!(SessionState::OnlineReadOnly.caller_role(), CallerRole::Secondary);
        assert_eq!(SessionState::Offline.caller_role(), CallerRole::Detached);
    }

    #[test]
    fn test_topology_counts_only_declared() {
        let topology = Topology::new("dev")
            .with_member(
                Member::new(addr("a:1"), MemberRole::PrimaryCandidate)
                    .with_status(MemberStatus::Online),
            )
            .with_member(
                Member::new(addr("b:1"), MemberRole::Secondary).with_status(MemberStatus::Online),
            )
            .with_member(
                Member::new(addr("c:1"), MemberRole::Secondary)
                    .with_status(MemberStatus::Online)
                    .transient(),
            );

        assert_eq!(topology.declared_total(), 2);
        assert_eq!(topology.live_count(), 2);
        assert!(topology.is_declared(&addr("a:1")));
        assert!(!topology.is_declared(&addr("c:1")));
    }

    #[test]
    fn test_topology_validate_duplicates() {
        let topology = Topology::new("dev")
            .with_member(Member::new(addr("a:1"), MemberRole::PrimaryCandidate))
            .with_member(Member::new(addr("a:1"), MemberRole::Secondary));
        assert!(matches!(topology.validate(), Err(Error::InvalidTopology(_))));
    }

    #[test]
    fn test_topology_validate_single_primary() {
        let mut topology = Topology::new("dev")
            .with_member(Member::new(addr("a:1"), MemberRole::PrimaryCandidate))
            .with_member(Member::new(addr("b:1"), MemberRole::PrimaryCandidate));
        assert!(topology.validate().is_err());

        topology.multi_primary = true;
        assert!(topology.validate().is_ok());
    }

    #[test]
    fn test_remove_member_keeps_order() {
        let mut topology = Topology::new("dev")
            .with_member(Member::new(addr("a:1"), MemberRole::PrimaryCandidate))
            .with_member(Member::new(addr("b:1"), MemberRole::Secondary))
            .with_member(Member::new(addr("c:1"), MemberRole::Secondary));

        assert!(topology.remove_member(&addr("b:1")).is_some());
        assert!(topology.remove_member(&addr("b:1")).is_none());
        let order: Vec<String> = topology.members.iter().map(|m| m.address.to_string()).collect();
        assert_eq!(order, vec!["a:1", "c:1"]);
    }
}
