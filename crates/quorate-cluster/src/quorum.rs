// Copyright 2024 The Quorate Authors
// SPDX-License-Identifier: Apache-2.0

//! Quorum evaluation.
//!
//! [`classify`] is a pure function of a topology snapshot. Observed statuses
//! are written into the snapshot beforehand by the [`StatusReconciler`], which
//! owns the one stateful rule: an unreachable member is only reported as
//! missing once the rest of the group, holding a majority on its own, has
//! had time to expel it.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use metrics::gauge;
use quorate_core::{
    HealthClassification, InstanceAddress, Member, MemberRole, MemberStatus, Topology,
};
use tokio::time::timeout;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::session::{MembershipProbe, ProbeError};

/// Returns true if `live` members form a strict majority of `total`.
#[inline]
pub fn has_majority(live: usize, total: usize) -> bool {
    live * 2 > total
}

/// Classifies a topology snapshot.
///
/// Only declared members count. Exactly half of the declared members is not a
/// majority.
pub fn classify(topology: &Topology) -> HealthClassification {
    let total = topology.declared_total();
    let live = topology.live_count();

    if live == 0 {
        HealthClassification::AllOffline
    } else if !has_majority(live, total) {
        HealthClassification::NoQuorum
    } else if live == total {
        HealthClassification::Ok
    } else {
        HealthClassification::OkPartial
    }
}

/// Classifies a snapshot that may be missing altogether.
pub fn classify_view(view: Option<&Topology>) -> HealthClassification {
    view.map_or(HealthClassification::Unknown, classify)
}

#[derive(Debug, Default, Clone, Copy)]
struct MemberRecord {
    unreachable_since: Option<Instant>,
    expelled: bool,
}

/// Turns raw probe observations into member statuses.
///
/// Records are kept per cluster id and member address for the life of the
/// reconciler; topologies themselves are never cached.
#[derive(Debug)]
pub struct StatusReconciler {
    missing_after: Duration,
    records: DashMap<(Uuid, InstanceAddress), MemberRecord>,
}

impl StatusReconciler {
    /// Creates a reconciler that reports a member missing after it has been
    /// unreachable for `missing_after` while the rest of the group held quorum.
    pub fn new(missing_after: Duration) -> Self {
        Self { missing_after, records: DashMap::new() }
    }

    /// Applies `observations` to `topology`.
    ///
    /// Declared members absent from `observations` are treated as unreachable.
    /// Transient members take the observed status as is.
    pub fn reconcile(
        &self,
        topology: &mut Topology,
        observations: &[(InstanceAddress, MemberStatus)],
        now: Instant,
    ) {
        let observed = |address: &InstanceAddress| {
            observations
                .iter()
                .find(|(a, _)| a == address)
                .map_or(MemberStatus::Unreachable, |(_, s)| *s)
        };

        let total = topology.declared_total();
        let live = topology.declared().filter(|m| observed(&m.address).is_live()).count();
        let rest_has_quorum = has_majority(live, total);
        let cluster_id = topology.cluster_id;

        for member in topology.members.iter_mut() {
            let status = observed(&member.address);
            if !member.declared {
                member.status = status;
                continue;
            }

            let key = (cluster_id, member.address.clone());
            let mut record = self.records.get(&key).map(|r| *r).unwrap_or_default();

            let next = match status {
                s if s.is_live() => {
                    record = MemberRecord::default();
                    s
                }
                MemberStatus::Missing => {
                    record.expelled = true;
                    MemberStatus::Missing
                }
                _ if record.expelled => MemberStatus::Missing,
                // The delay only runs while the rest of the group holds quorum.
                MemberStatus::Unreachable if !rest_has_quorum => {
                    record.unreachable_since = None;
                    MemberStatus::Unreachable
                }
                MemberStatus::Unreachable => {
                    let since = *record.unreachable_since.get_or_insert(now);
                    if now.saturating_duration_since(since) >= self.missing_after {
                        info!(
                            cluster = %topology.cluster_name,
                            address = %member.address,
                            "Member expelled by the remaining majority"
                        );
                        record.expelled = true;
                        MemberStatus::Missing
                    } else {
                        MemberStatus::Unreachable
                    }
                }
                other => {
                    record.unreachable_since = None;
                    other
                }
            };

            if next != member.status {
                debug!(
                    cluster = %topology.cluster_name,
                    address = %member.address,
                    from = %member.status,
                    to = %next,
                    "Member status changed"
                );
            }
            member.status = next;
            self.records.insert(key, record);
        }
    }

    /// Drops the record of one member, e.g. after it left the metadata.
    pub fn forget(&self, cluster_id: Uuid, address: &InstanceAddress) {
        self.records.remove(&(cluster_id, address.clone()));
    }

    /// Drops every record of a cluster.
    pub fn forget_cluster(&self, cluster_id: Uuid) {
        self.records.retain(|(id, _), _| *id != cluster_id);
    }

    /// Returns true if the member is currently recorded as expelled.
    pub fn is_expelled(&self, cluster_id: Uuid, address: &InstanceAddress) -> bool {
        self.records.get(&(cluster_id, address.clone())).is_some_and(|r| r.expelled)
    }
}

/// Probes every member of a topology and writes the reconciled statuses.
#[derive(Clone)]
pub struct MembershipObserver {
    probe: Arc<dyn MembershipProbe>,
    reconciler: Arc<StatusReconciler>,
    probe_timeout: Duration,
}

impl MembershipObserver {
    /// Creates an observer.
    pub fn new(
        probe: Arc<dyn MembershipProbe>,
        reconciler: Arc<StatusReconciler>,
        probe_timeout: Duration,
    ) -> Self {
        Self { probe, reconciler, probe_timeout }
    }

    /// The reconciler this observer writes through.
    pub fn reconciler(&self) -> &Arc<StatusReconciler> {
        &self.reconciler
    }

    /// Probes reachability with the configured timeout. A timeout reads as
    /// unreachable.
    pub async fn reachable(&self, address: &InstanceAddress) -> bool {
        timeout(self.probe_timeout, self.probe.reachable(address)).await.unwrap_or(false)
    }

    /// Refreshes member statuses in `topology`, appends live members the
    /// group knows but the metadata does not, and classifies the result.
    ///
    /// Returns `UNKNOWN` without touching the topology if no declared member
    /// produced any view.
    pub async fn observe(&self, topology: &mut Topology) -> HealthClassification {
        topology.members.retain(|m| m.declared);

        let mut observations = Vec::with_capacity(topology.members.len());
        let mut any_view = topology.members.is_empty();

        for member in topology.declared() {
            let status = match timeout(self.probe_timeout, self.probe.member_status(&member.address))
                .await
            {
                Ok(Ok(status)) => {
                    any_view = true;
                    status
                }
                Ok(Err(ProbeError::Unreachable(_))) => {
                    any_view = true;
                    MemberStatus::Unreachable
                }
                Ok(Err(e)) => {
                    warn!(address = %member.address, error = %e, "Membership probe failed");
                    MemberStatus::Unreachable
                }
                Err(_) => {
                    any_view = true;
                    trace!(address = %member.address, "Membership probe timed out");
                    MemberStatus::Unreachable
                }
            };
            observations.push((member.address.clone(), status));
        }

        if !any_view {
            warn!(cluster = %topology.cluster_name, "No membership view available");
            return classify_view(None);
        }

        self.reconciler.reconcile(topology, &observations, Instant::now());
        self.attach_transient(topology).await;

        gauge!("quorate_cluster_live_members", "cluster" => topology.cluster_name.clone())
            .set(topology.live_count() as f64);

        classify(topology)
    }

    async fn attach_transient(&self, topology: &mut Topology) {
        let Some(anchor) =
            topology.declared().find(|m| m.status.is_live()).map(|m| m.address.clone())
        else {
            return;
        };

        let group = match timeout(self.probe_timeout, self.probe.group_members(&anchor)).await {
            Ok(Ok(group)) => group,
            Ok(Err(e)) => {
                debug!(address = %anchor, error = %e, "Cannot list group members");
                return;
            }
            Err(_) => return,
        };

        for address in group {
            if topology.member(&address).is_none() {
                topology.members.push(
                    Member::new(address, MemberRole::Secondary)
                        .transient()
                        .with_status(MemberStatus::Online),
                );
            }
        }
    }
}

impl std::fmt::Debug for MembershipObserver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MembershipObserver")
            .field("probe_timeout", &self.probe_timeout)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> InstanceAddress {
        s.parse().unwrap()
    }

    fn three(statuses: [MemberStatus; 3]) -> Topology {
        let mut t = Topology::new("dev");
        for (i, status) in statuses.into_iter().enumerate() {
            let role = if i == 0 { MemberRole::PrimaryCandidate } else { MemberRole::Secondary };
            t = t.with_member(
                Member::new(addr(&format!("db{}:3306", i + 1)), role).with_status(status),
            );
        }
        t
    }

    use MemberStatus::{Missing, Offline, Online, Recovering, Unreachable};

    #[test]
    fn test_three_member_table() {
        assert_eq!(classify(&three([Online, Online, Online])), HealthClassification::Ok);
        assert_eq!(
            classify(&three([Online, Online, Unreachable])),
            HealthClassification::OkPartial
        );
        assert_eq!(
            classify(&three([Online, Unreachable, Missing])),
            HealthClassification::NoQuorum
        );
        assert_eq!(
            classify(&three([Offline, Unreachable, Missing])),
            HealthClassification::AllOffline
        );
    }

    #[test]
    fn test_recovering_counts_as_live() {
        assert_eq!(classify(&three([Online, Recovering, Recovering])), HealthClassification::Ok);
    }

    #[test]
    fn test_exactly_half_is_not_quorum() {
        let t = Topology::new("dev")
            .with_member(Member::new(addr("a:1"), MemberRole::PrimaryCandidate).with_status(Online))
            .with_member(Member::new(addr("b:1"), MemberRole::Secondary).with_status(Online))
            .with_member(Member::new(addr("c:1"), MemberRole::Secondary).with_status(Unreachable))
            .with_member(Member::new(addr("d:1"), MemberRole::Secondary).with_status(Unreachable));
        assert_eq!(classify(&t), HealthClassification::NoQuorum);
    }

    #[test]
    fn test_transient_members_do_not_count() {
        let t = three([Online, Unreachable, Unreachable])
            .with_member(Member::new(addr("x:1"), MemberRole::Secondary).transient().with_status(Online))
            .with_member(Member::new(addr("y:1"), MemberRole::Secondary).transient().with_status(Online));
        assert_eq!(classify(&t), HealthClassification::NoQuorum);
    }

    #[test]
    fn test_empty_and_missing_views() {
        assert_eq!(classify(&Topology::new("empty")), HealthClassification::AllOffline);
        assert_eq!(classify_view(None), HealthClassification::Unknown);
    }

    #[test]
    fn test_classify_is_deterministic() {
        let t = three([Online, Unreachable, Online]);
        assert_eq!(classify(&t), classify(&t.clone()));
    }

    #[test]
    fn test_unreachable_becomes_missing_only_under_quorum() {
        let reconciler = StatusReconciler::new(Duration::ZERO);
        let now = Instant::now();
        let mut t = three([Online, Online, Online]);

        // db2 dies while db1 and db3 hold a majority.
        reconciler.reconcile(
            &mut t,
            &[(addr("db1:3306"), Online), (addr("db2:3306"), Unreachable), (addr("db3:3306"), Online)],
            now,
        );
        assert_eq!(t.members[1].status, Missing);

        // db3 dies; db1 alone has no majority.
        reconciler.reconcile(
            &mut t,
            &[(addr("db1:3306"), Online), (addr("db2:3306"), Unreachable), (addr("db3:3306"), Unreachable)],
            now,
        );
        assert_eq!(t.members[1].status, Missing);
        assert_eq!(t.members[2].status, Unreachable);
        assert_eq!(classify(&t), HealthClassification::NoQuorum);
    }

    #[test]
    fn test_missing_after_delay() {
        let reconciler = StatusReconciler::new(Duration::from_secs(5));
        let start = Instant::now();
        let mut t = three([Online, Online, Online]);
        let obs = [
            (addr("db1:3306"), Online),
            (addr("db2:3306"), Online),
            (addr("db3:3306"), Unreachable),
        ];

        reconciler.reconcile(&mut t, &obs, start);
        assert_eq!(t.members[2].status, Unreachable);

        reconciler.reconcile(&mut t, &obs, start + Duration::from_secs(2));
        assert_eq!(t.members[2].status, Unreachable);

        reconciler.reconcile(&mut t, &obs, start + Duration::from_secs(5));
        assert_eq!(t.members[2].status, Missing);
        assert!(reconciler.is_expelled(t.cluster_id, &addr("db3:3306")));
    }

    #[test]
    fn test_missing_delay_starts_when_quorum_returns() {
        let reconciler = StatusReconciler::new(Duration::from_secs(5));
        let start = Instant::now();
        let mut t = three([Online, Online, Online]);

        // db1 alone: no quorum, nobody can be expelled.
        let alone = [(addr("db1:3306"), Online)];
        reconciler.reconcile(&mut t, &alone, start);
        assert_eq!(t.members[2].status, Unreachable);

        let back = [(addr("db1:3306"), Online), (addr("db2:3306"), Online)];
        reconciler.reconcile(&mut t, &back, start + Duration::from_secs(10));
        assert_eq!(t.members[1].status, Online);
        assert_eq!(t.members[2].status, Unreachable);

        reconciler.reconcile(&mut t, &back, start + Duration::from_secs(12));
        assert_eq!(t.members[2].status, Unreachable);

        reconciler.reconcile(&mut t, &back, start + Duration::from_secs(15));
        assert_eq!(t.members[2].status, Missing);
    }

    #[test]
    fn test_expelled_member_stays_missing_until_live() {
        let reconciler = StatusReconciler::new(Duration::ZERO);
        let now = Instant::now();
        let mut t = three([Online, Online, Online]);
        let id = t.cluster_id;

        reconciler.reconcile(
            &mut t,
            &[(addr("db1:3306"), Online), (addr("db2:3306"), Online), (addr("db3:3306"), Missing)],
            now,
        );
        assert!(reconciler.is_expelled(id, &addr("db3:3306")));

        // Restarted but not rejoined.
        reconciler.reconcile(
            &mut t,
            &[(addr("db1:3306"), Online), (addr("db2:3306"), Online), (addr("db3:3306"), Offline)],
            now,
        );
        assert_eq!(t.members[2].status, Missing);

        reconciler.reconcile(
            &mut t,
            &[(addr("db1:3306"), Online), (addr("db2:3306"), Online), (addr("db3:3306"), Recovering)],
            now,
        );
        assert_eq!(t.members[2].status, Recovering);
        assert!(!reconciler.is_expelled(id, &addr("db3:3306")));
    }

    #[test]
    fn test_forget() {
        let reconciler = StatusReconciler::new(Duration::ZERO);
        let mut t = three([Online, Online, Online]);
        reconciler.reconcile(
            &mut t,
            &[(addr("db1:3306"), Online), (addr("db2:3306"), Online)],
            Instant::now(),
        );
        assert!(reconciler.is_expelled(t.cluster_id, &addr("db3:3306")));

        reconciler.forget(t.cluster_id, &addr("db3:3306"));
        assert!(!reconciler.is_expelled(t.cluster_id, &addr("db3:3306")));

        reconciler.reconcile(
            &mut t,
            &[(addr("db1:3306"), Online), (addr("db2:3306"), Online)],
            Instant::now(),
        );
        reconciler.forget_cluster(t.cluster_id);
        assert!(!reconciler.is_expelled(t.cluster_id, &addr("db3:3306")));
    }
}
