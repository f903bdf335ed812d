// Copyright 2024 The Quorate Authors
// SPDX-License-Identifier: Apache-2.0

//! The administrative operation surface.
//!
//! Every operation runs the same gate before doing any work:
//! 1. the caller's session must be connected and bound to an instance
//! 2. options must be accepted by the operation
//! 3. the per-cluster section is taken (shared for reads, exclusive for
//!    mutations)
//! 4. the topology is loaded fresh from the metadata store and observed
//! 5. the classification and the caller's role are authorized
//!
//! Mutations persist with the epoch read in step 4.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use quorate_core::{
    DenyReason, EngineConfig, Error, HealthClassification, InstanceAddress, InstanceType, Member,
    MemberRole, MemberStatus, Operation, Result, Topology,
};
use quorate_metadata::{ClusterSummary, MetadataStore, StoreError};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::lock::{ClusterGuard, ClusterLocks};
use crate::options::OperationOptions;
use crate::preconditions::{authorize, check_metadata, MetadataPresence};
use crate::quorum::{MembershipObserver, StatusReconciler};
use crate::recovery::{RecoveryControl, RecoveryOrchestrator, RecoveryPlan};
use crate::report::{
    DescribeReport, DissolveReport, InstanceStateReport, MemberFailure, RebootReport,
    RescanReport, StatusReport,
};
use crate::session::{
    describe, InstanceInfo, MembershipProbe, Session, SessionCommand, SessionError,
    SessionProvider,
};

/// A loaded and observed cluster, held under its section.
struct Prepared {
    topology: Topology,
    classification: HealthClassification,
    caller: InstanceAddress,
    _guard: ClusterGuard,
}

/// Entry point for every administrative operation.
pub struct AdminEngine {
    metadata: Arc<dyn MetadataStore>,
    sessions: Arc<dyn SessionProvider>,
    observer: MembershipObserver,
    orchestrator: RecoveryOrchestrator,
    locks: ClusterLocks,
    session_timeout: Duration,
    command_timeout: Duration,
}

impl AdminEngine {
    /// Creates an engine over the given boundaries.
    pub fn new(
        config: EngineConfig,
        metadata: Arc<dyn MetadataStore>,
        sessions: Arc<dyn SessionProvider>,
        probe: Arc<dyn MembershipProbe>,
    ) -> Self {
        let reconciler = Arc::new(StatusReconciler::new(config.missing_after_duration()));
        let observer = MembershipObserver::new(probe, reconciler, config.probe_timeout_duration());
        let orchestrator = RecoveryOrchestrator::new(
            Arc::clone(&sessions),
            Arc::clone(&metadata),
            observer.clone(),
            &config,
        );

        Self {
            metadata,
            sessions,
            observer,
            orchestrator,
            locks: ClusterLocks::new(),
            session_timeout: config.session_timeout_duration(),
            command_timeout: config.rejoin_timeout_duration(),
        }
    }

    /// Creates a cluster with the session's instance as its only member.
    ///
    /// # Errors
    ///
    /// Denied if the name is taken or the instance already belongs to a
    /// cluster. Fails if the group cannot be started.
    pub async fn create_cluster(
        &self,
        session: &dyn Session,
        cluster_name: &str,
        options: &OperationOptions,
    ) -> Result<StatusReport> {
        let operation = Operation::CreateCluster;
        let caller = begin(operation, session)?;
        if cluster_name.trim().is_empty() {
            return Err(Error::InvalidArgument("the cluster name cannot be empty".to_string()));
        }
        options.ensure_accepted(operation)?;

        let _guard = self.locks.exclusive(cluster_name).await;

        let presence = match self.metadata.load_topology(cluster_name).await {
            Ok(_) => MetadataPresence::Present,
            Err(StoreError::Ambiguous { .. }) => MetadataPresence::Inconsistent,
            Err(StoreError::NotFound { .. }) => {
                if self.declaring_cluster(&caller).await?.is_some() {
                    MetadataPresence::Present
                } else {
                    MetadataPresence::Absent
                }
            }
            Err(e) => return Err(e.into()),
        };
        gate(
            check_metadata(operation, presence)
                .into_result(HealthClassification::Unknown, operation),
            operation,
        )?;

        let info = self.describe_caller(session, &caller).await?;
        if info.in_group {
            return Err(Error::InvalidArgument(format!(
                "{} already runs a replication group that no metadata describes",
                caller
            )));
        }

        self.execute_on(session, &caller, SessionCommand::BootstrapGroup { clear_read_only: false })
            .await
            .map_err(|e| member_failed(&caller, e))?;

        let mut topology = Topology::new(cluster_name)
            .with_member(Member::new(caller.clone(), MemberRole::PrimaryCandidate));
        topology.validate()?;
        self.metadata.create_topology(&topology).await?;
        info!(cluster = %cluster_name, seed = %caller, id = %topology.cluster_id, "Cluster created");

        let classification = self.observer.observe(&mut topology).await;
        Ok(StatusReport::new(&topology, classification))
    }

    /// Returns the stored record of a cluster.
    ///
    /// With no name, the only stored cluster is returned.
    ///
    /// # Errors
    ///
    /// Denied if no record, no record of that name, or conflicting records
    /// exist.
    pub async fn get_cluster(
        &self,
        session: &dyn Session,
        cluster_name: Option<&str>,
    ) -> Result<Topology> {
        let operation = Operation::GetCluster;
        begin(operation, session)?;

        let name = self.resolve_name(operation, cluster_name).await?;
        let _guard = self.locks.shared(&name).await;
        let topology = self.load_for(operation, &name).await?;
        Ok(topology.without_transient())
    }

    /// Reports the classification and the live status of every member.
    ///
    /// # Errors
    ///
    /// Denied when the cluster is `ALL_OFFLINE` or `UNKNOWN`.
    pub async fn status(
        &self,
        session: &dyn Session,
        cluster_name: Option<&str>,
    ) -> Result<StatusReport> {
        let prepared = self
            .prepare(Operation::Status, session, cluster_name, &OperationOptions::new())
            .await?;
        Ok(StatusReport::new(&prepared.topology, prepared.classification))
    }

    /// Reports the declared structure of a cluster.
    ///
    /// # Errors
    ///
    /// Denied when the cluster is `ALL_OFFLINE` or `UNKNOWN`.
    pub async fn describe(
        &self,
        session: &dyn Session,
        cluster_name: Option<&str>,
    ) -> Result<DescribeReport> {
        let prepared = self
            .prepare(Operation::Describe, session, cluster_name, &OperationOptions::new())
            .await?;
        Ok(DescribeReport::from(&prepared.topology))
    }

    /// Checks one instance against a cluster. Runs in any classification.
    ///
    /// # Errors
    ///
    /// Fails only on session, metadata or storage problems.
    pub async fn check_instance_state(
        &self,
        session: &dyn Session,
        cluster_name: Option<&str>,
        target: &InstanceAddress,
    ) -> Result<InstanceStateReport> {
        let prepared = self
            .prepare(Operation::CheckInstanceState, session, cluster_name, &OperationOptions::new())
            .await?;

        let reachable = self.observer.reachable(target).await;
        let declared = prepared.topology.is_declared(target);
        let status = prepared.topology.member(target).map(|m| m.status);

        let info = if reachable {
            match self.open_member(target).await {
                Ok(member) => describe_within(member.as_ref(), target, self.command_timeout)
                    .await
                    .map_err(|e| debug!(address = %target, error = %e, "Describe failed"))
                    .ok(),
                Err(e) => {
                    debug!(address = %target, error = %e, "Cannot open session");
                    None
                }
            }
        } else {
            None
        };

        let instance_type = match &info {
            None => InstanceType::Unknown,
            Some(info) => instance_type(declared, info.in_group),
        };

        Ok(InstanceStateReport {
            address: target.clone(),
            reachable,
            instance_type,
            state: info.map(|i| i.state),
            declared,
            status,
        })
    }

    /// Adds an instance to the group and the metadata.
    ///
    /// # Errors
    ///
    /// Denied without quorum or from a non-primary session. Fails if the
    /// instance is already declared or cannot join.
    pub async fn add_instance(
        &self,
        session: &dyn Session,
        cluster_name: Option<&str>,
        target: &InstanceAddress,
        options: &OperationOptions,
    ) -> Result<StatusReport> {
        let prepared = self.prepare(Operation::AddInstance, session, cluster_name, options).await?;
        let topology = &prepared.topology;

        if topology.is_declared(target) {
            return Err(Error::InvalidArgument(format!(
                "{} is already a member of cluster '{}'",
                target, topology.cluster_name
            )));
        }

        self.run_on(target, SessionCommand::JoinGroup { seed: prepared.caller.clone() })
            .await
            .map_err(|e| member_failed(target, e))?;

        let mut updated = topology.without_transient();
        updated.members.push(Member::new(target.clone(), MemberRole::Secondary));
        updated.validate()?;
        self.persist(&mut updated, topology.epoch).await?;
        info!(cluster = %updated.cluster_name, address = %target, epoch = updated.epoch, "Instance added");

        let classification = self.observer.observe(&mut updated).await;
        Ok(StatusReport::new(&updated, classification))
    }

    /// Removes a declared member from the group and the metadata.
    ///
    /// With `force`, a member that cannot be told to leave is dropped from
    /// the metadata anyway.
    ///
    /// # Errors
    ///
    /// Denied without quorum unless forced. Fails if the target is not
    /// declared, is the caller's own instance, or cannot leave (unforced).
    pub async fn remove_instance(
        &self,
        session: &dyn Session,
        cluster_name: Option<&str>,
        target: &InstanceAddress,
        options: &OperationOptions,
    ) -> Result<StatusReport> {
        let prepared =
            self.prepare(Operation::RemoveInstance, session, cluster_name, options).await?;
        let topology = &prepared.topology;

        if !topology.is_declared(target) {
            return Err(not_a_member(target, topology));
        }
        if target == &prepared.caller {
            return Err(Error::InvalidArgument(format!(
                "cannot remove {}: the session is bound to it",
                target
            )));
        }

        if let Err(e) = self.run_on(target, SessionCommand::LeaveGroup).await {
            if !options.is_forced() {
                return Err(member_failed(target, e));
            }
            warn!(address = %target, error = %e, "Member did not leave the group, removing anyway");
        }

        let mut updated = topology.without_transient();
        updated.remove_member(target);
        self.persist(&mut updated, topology.epoch).await?;
        self.observer.reconciler().forget(updated.cluster_id, target);
        info!(cluster = %updated.cluster_name, address = %target, epoch = updated.epoch, "Instance removed");

        let classification = self.observer.observe(&mut updated).await;
        Ok(StatusReport::new(&updated, classification))
    }

    /// Brings a declared member back into the running group.
    ///
    /// # Errors
    ///
    /// Denied on `ALL_OFFLINE` or from a non-primary session. Fails if the
    /// target is not declared, already live, or cannot join.
    pub async fn rejoin_instance(
        &self,
        session: &dyn Session,
        cluster_name: Option<&str>,
        target: &InstanceAddress,
        options: &OperationOptions,
    ) -> Result<StatusReport> {
        let prepared =
            self.prepare(Operation::RejoinInstance, session, cluster_name, options).await?;
        let mut topology = prepared.topology;

        match topology.member(target) {
            Some(member) if member.declared && member.status.is_live() => {
                return Err(Error::InvalidArgument(format!(
                    "{} is already {} in the group",
                    target, member.status
                )));
            }
            Some(member) if member.declared => {}
            _ => return Err(not_a_member(target, &topology)),
        }

        self.run_on(target, SessionCommand::JoinGroup { seed: prepared.caller.clone() })
            .await
            .map_err(|e| member_failed(target, e))?;
        info!(cluster = %topology.cluster_name, address = %target, "Instance rejoined");

        let classification = self.observer.observe(&mut topology).await;
        Ok(StatusReport::new(&topology, classification))
    }

    /// Records group members the metadata does not know and reports declared
    /// members that are missing.
    ///
    /// # Errors
    ///
    /// Denied without quorum or from a non-primary session.
    pub async fn rescan(
        &self,
        session: &dyn Session,
        cluster_name: Option<&str>,
    ) -> Result<RescanReport> {
        let prepared = self
            .prepare(Operation::Rescan, session, cluster_name, &OperationOptions::new())
            .await?;
        let topology = prepared.topology;

        let added: Vec<InstanceAddress> =
            topology.members.iter().filter(|m| !m.declared).map(|m| m.address.clone()).collect();
        let missing: Vec<InstanceAddress> = topology
            .declared()
            .filter(|m| m.status == MemberStatus::Missing)
            .map(|m| m.address.clone())
            .collect();

        let mut epoch = topology.epoch;
        if !added.is_empty() {
            let mut updated = topology.without_transient();
            for address in &added {
                updated.members.push(Member::new(address.clone(), MemberRole::Secondary));
            }
            updated.validate()?;
            self.persist(&mut updated, topology.epoch).await?;
            epoch = updated.epoch;
            info!(cluster = %topology.cluster_name, added = added.len(), epoch, "Rescan recorded new members");
        }

        Ok(RescanReport { cluster_name: topology.cluster_name, added, missing, epoch })
    }

    /// Stops the group on every member and deletes the cluster record.
    ///
    /// # Errors
    ///
    /// Denied without quorum unless forced, and denied unforced while any
    /// declared member is not live.
    pub async fn dissolve(
        &self,
        session: &dyn Session,
        cluster_name: Option<&str>,
        options: &OperationOptions,
    ) -> Result<DissolveReport> {
        let operation = Operation::Dissolve;
        let prepared = self.prepare(operation, session, cluster_name, options).await?;
        let topology = &prepared.topology;

        let unavailable = topology.declared().any(|m| !m.status.is_live());
        if unavailable && !options.is_forced() {
            return gate(
                Err(Error::denied(prepared.classification, operation, DenyReason::ForceRequired)),
                operation,
            );
        }

        let mut report =
            DissolveReport { cluster_name: topology.cluster_name.clone(), ..Default::default() };

        // The caller's own instance leaves last.
        let others = topology
            .declared()
            .filter(|m| m.status.is_live() && m.address != prepared.caller)
            .map(|m| m.address.clone());
        for address in others {
            match self.run_on(&address, SessionCommand::LeaveGroup).await {
                Ok(()) => report.left.push(address),
                Err(e) => {
                    warn!(address = %address, error = %e, "Member did not leave the group");
                    report.failures.push(MemberFailure { address, cause: e.to_string() });
                }
            }
        }
        if topology.member(&prepared.caller).is_some_and(|m| m.status.is_live()) {
            match self.execute_on(session, &prepared.caller, SessionCommand::LeaveGroup).await {
                Ok(()) => report.left.push(prepared.caller.clone()),
                Err(e) => report
                    .failures
                    .push(MemberFailure { address: prepared.caller.clone(), cause: e.to_string() }),
            }
        }

        self.metadata.drop_topology(&topology.cluster_name, topology.epoch).await?;
        self.observer.reconciler().forget_cluster(topology.cluster_id);
        info!(
            cluster = %topology.cluster_name,
            left = report.left.len(),
            failed = report.failures.len(),
            "Cluster dissolved"
        );
        Ok(report)
    }

    /// Recreates a group whose members have all stopped.
    ///
    /// The session must be bound to a declared member; it becomes the seed.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidArgument`] for an empty name
    /// - [`Error::InvalidOption`] for options reboot does not accept
    /// - [`Error::MetadataNotFound`] / [`Error::MetadataAmbiguous`]
    /// - [`Error::PreconditionDenied`] unless the cluster is `ALL_OFFLINE`
    /// - [`Error::PlanValidation`] for inconsistent lists
    /// - [`Error::ReseededButUnrecorded`] if the result could not be recorded
    /// - [`Error::Aborted`] if `control` was aborted
    pub async fn reboot_cluster_from_complete_outage(
        &self,
        session: &dyn Session,
        cluster_name: &str,
        options: &OperationOptions,
        control: &RecoveryControl,
    ) -> Result<RebootReport> {
        let operation = Operation::RebootClusterFromCompleteOutage;
        let seed = begin(operation, session)?;
        if cluster_name.trim().is_empty() {
            return Err(Error::InvalidArgument("the cluster name cannot be empty".to_string()));
        }
        options.ensure_accepted(operation)?;

        let _guard = self.locks.exclusive(cluster_name).await;
        let mut topology = self.load_for(operation, cluster_name).await?;
        let info = self.describe_caller(session, &seed).await?;

        let classification = self.observer.observe(&mut topology).await;
        gate(
            authorize(classification, operation, info.state.caller_role(), false)
                .into_result(classification, operation),
            operation,
        )?;

        let plan = RecoveryPlan::validate(&topology, &seed, options, &self.observer).await?;
        self.orchestrator.execute(&plan, topology, session, control).await
    }

    /// Deletes a cluster record without touching the group.
    ///
    /// # Errors
    ///
    /// Denied without `force`, without metadata, without quorum, or from a
    /// session that is neither the primary nor the detached holder of the
    /// metadata.
    pub async fn drop_metadata_schema(
        &self,
        session: &dyn Session,
        cluster_name: Option<&str>,
        options: &OperationOptions,
    ) -> Result<()> {
        let prepared =
            self.prepare(Operation::DropMetadataSchema, session, cluster_name, options).await?;
        let topology = &prepared.topology;

        self.metadata.drop_topology(&topology.cluster_name, topology.epoch).await?;
        self.observer.reconciler().forget_cluster(topology.cluster_id);
        info!(cluster = %topology.cluster_name, "Cluster metadata dropped");
        Ok(())
    }

    /// Prepares an instance for group membership. `target` defaults to the
    /// session's instance; `mycnfPath` is passed through.
    ///
    /// # Errors
    ///
    /// Fails if the instance cannot be reached or rejects the command.
    pub async fn configure_instance(
        &self,
        session: &dyn Session,
        target: Option<&InstanceAddress>,
        options: &OperationOptions,
    ) -> Result<InstanceInfo> {
        let operation = Operation::ConfigureInstance;
        let caller = begin(operation, session)?;
        options.ensure_accepted(operation)?;

        let command =
            SessionCommand::ConfigureInstance { mycnf_path: options.mycnf().map(str::to_string) };

        let info = match target.filter(|t| **t != caller) {
            None => {
                self.execute_on(session, &caller, command)
                    .await
                    .map_err(|e| member_failed(&caller, e))?;
                self.describe_caller(session, &caller).await?
            }
            Some(target) => {
                let member = self.open_member(target).await.map_err(|e| member_failed(target, e))?;
                self.execute_on(member.as_ref(), target, command)
                    .await
                    .map_err(|e| member_failed(target, e))?;
                describe_within(member.as_ref(), target, self.command_timeout).await?
            }
        };
        info!(address = %info.address, "Instance configured");
        Ok(info)
    }

    /// Lists stored clusters.
    ///
    /// # Errors
    ///
    /// Fails on storage errors.
    pub async fn list_clusters(&self) -> Result<Vec<ClusterSummary>> {
        Ok(self.metadata.list_clusters().await?)
    }

    /// Runs the common gate of cluster operations.
    async fn prepare(
        &self,
        operation: Operation,
        session: &dyn Session,
        cluster_name: Option<&str>,
        options: &OperationOptions,
    ) -> Result<Prepared> {
        let caller = begin(operation, session)?;
        options.ensure_accepted(operation)?;

        let name = self.resolve_name(operation, cluster_name).await?;
        let guard = self.locks.acquire(&name, operation.is_mutation()).await;
        let mut topology = self.load_for(operation, &name).await?;
        let info = self.describe_caller(session, &caller).await?;

        let classification = self.observer.observe(&mut topology).await;
        gate(
            authorize(classification, operation, info.state.caller_role(), options.is_forced())
                .into_result(classification, operation),
            operation,
        )?;

        debug!(
            operation = %operation,
            cluster = %topology.cluster_name,
            classification = %classification,
            "Operation authorized"
        );
        Ok(Prepared { topology, classification, caller, _guard: guard })
    }

    /// Returns the cluster name to lock, resolving the default cluster.
    async fn resolve_name(&self, operation: Operation, cluster_name: Option<&str>) -> Result<String> {
        match cluster_name {
            Some(name) => Ok(name.to_string()),
            None => match self.metadata.load_default().await {
                Ok(topology) => Ok(topology.cluster_name),
                Err(e) => Err(self.metadata_error(operation, None, e).await),
            },
        }
    }

    /// Loads the record of `name` for `operation`.
    async fn load_for(&self, operation: Operation, name: &str) -> Result<Topology> {
        match self.metadata.load_topology(name).await {
            Ok(topology) => Ok(topology),
            Err(e) => Err(self.metadata_error(operation, Some(name), e).await),
        }
    }

    async fn metadata_error(
        &self,
        operation: Operation,
        name: Option<&str>,
        error: StoreError,
    ) -> Error {
        if operation == Operation::RebootClusterFromCompleteOutage {
            return error.into();
        }

        let reason = match error {
            StoreError::NotFound { .. } => {
                let others = self.metadata.list_clusters().await.map(|c| !c.is_empty());
                match (name, others) {
                    (Some(name), Ok(true)) => {
                        DenyReason::UnknownCluster { name: name.to_string() }
                    }
                    _ => DenyReason::MetadataMissing,
                }
            }
            StoreError::Ambiguous { .. } => DenyReason::MetadataInconsistent,
            other => return other.into(),
        };
        counter!("quorate_operations_denied_total", "operation" => operation.name()).increment(1);
        Error::denied(HealthClassification::Unknown, operation, reason)
    }

    /// Name of the cluster that declares `address`, if any.
    async fn declaring_cluster(&self, address: &InstanceAddress) -> Result<Option<String>> {
        for summary in self.metadata.list_clusters().await? {
            match self.metadata.load_topology(&summary.name).await {
                Ok(topology) if topology.is_declared(address) => {
                    return Ok(Some(topology.cluster_name))
                }
                Ok(_) | Err(StoreError::Ambiguous { .. }) => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(None)
    }

    async fn describe_caller(
        &self,
        session: &dyn Session,
        caller: &InstanceAddress,
    ) -> Result<InstanceInfo> {
        Ok(describe_within(session, caller, self.session_timeout).await?)
    }

    async fn open_member(
        &self,
        address: &InstanceAddress,
    ) -> std::result::Result<Box<dyn Session>, SessionError> {
        within(self.session_timeout, address, self.sessions.open(address)).await
    }

    async fn execute_on(
        &self,
        session: &dyn Session,
        address: &InstanceAddress,
        command: SessionCommand,
    ) -> std::result::Result<(), SessionError> {
        debug!(address = %address, command = command.name(), "Executing");
        within(self.command_timeout, address, session.execute(command)).await.map(|_| ())
    }

    /// Opens a session to `address` and runs `command` on it.
    async fn run_on(
        &self,
        address: &InstanceAddress,
        command: SessionCommand,
    ) -> std::result::Result<(), SessionError> {
        let member = self.open_member(address).await?;
        self.execute_on(member.as_ref(), address, command).await
    }

    async fn persist(&self, topology: &mut Topology, expected_epoch: u64) -> Result<()> {
        topology.epoch = self.metadata.save_topology(topology, expected_epoch).await?;
        Ok(())
    }
}

impl std::fmt::Debug for AdminEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdminEngine")
            .field("observer", &self.observer)
            .field("orchestrator", &self.orchestrator)
            .finish_non_exhaustive()
    }
}

/// Counts the operation and checks the session. Returns the session's address.
fn begin(operation: Operation, session: &dyn Session) -> Result<InstanceAddress> {
    counter!("quorate_operations_total", "operation" => operation.name()).increment(1);

    if !session.is_connected() {
        return Err(Error::Session(format!("{}: the session is not connected", operation)));
    }
    session.current_member().ok_or_else(|| {
        Error::Session(format!("{}: the session is not bound to an instance", operation))
    })
}

/// Counts denials on their way out.
fn gate<T>(result: Result<T>, operation: Operation) -> Result<T> {
    if let Err(Error::PreconditionDenied { classification, reason, .. }) = &result {
        counter!("quorate_operations_denied_total", "operation" => operation.name()).increment(1);
        info!(
            operation = %operation,
            classification = %classification,
            reason = %reason,
            "Operation denied"
        );
    }
    result
}

fn instance_type(declared: bool, in_group: bool) -> InstanceType {
    match (declared, in_group) {
        (true, true) => InstanceType::Cluster,
        (true, false) => InstanceType::StandaloneWithMetadata,
        (false, true) => InstanceType::GroupReplication,
        (false, false) => InstanceType::Standalone,
    }
}

fn member_failed(address: &InstanceAddress, error: SessionError) -> Error {
    Error::MemberOperationFailed { address: address.clone(), cause: error.to_string() }
}

fn not_a_member(address: &InstanceAddress, topology: &Topology) -> Error {
    Error::InvalidArgument(format!(
        "{} is not a member of cluster '{}'",
        address, topology.cluster_name
    ))
}

async fn within<T>(
    limit: Duration,
    address: &InstanceAddress,
    future: impl Future<Output = std::result::Result<T, SessionError>>,
) -> std::result::Result<T, SessionError> {
    timeout(limit, future).await.map_err(|_| SessionError::Timeout(address.clone()))?
}

async fn describe_within(
    session: &dyn Session,
    address: &InstanceAddress,
    limit: Duration,
) -> std::result::Result<InstanceInfo, SessionError> {
    within(limit, address, describe(session, address)).await
}
