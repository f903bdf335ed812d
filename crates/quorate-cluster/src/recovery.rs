// Copyright 2024 The Quorate Authors
// SPDX-License-Identifier: Apache-2.0

//! Reboot from complete outage.
//!
//! When every member of a group has stopped, the group is recreated on one
//! seed member and the others are asked to rejoin it. The process has two
//! phases:
//!
//! 1. **Validation** builds a [`RecoveryPlan`]. Nothing is changed; any
//!    problem with the caller's lists is reported before the first step runs.
//! 2. **Execution** runs the plan step by step:
//!    - reseed a single-member group on the seed
//!    - rejoin the other members with bounded concurrency
//!    - drop the removal list from the metadata record
//!    - persist the record against the epoch read at the start
//!    - re-observe and classify the new group
//!
//! A failed step stops the later ones. Nothing is rolled back.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use metrics::counter;
use quorate_core::{
    DenyReason, EngineConfig, Error, HealthClassification, InstanceAddress, Operation, Result,
    Topology,
};
use quorate_metadata::MetadataStore;
use tokio::sync::Semaphore;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::options::OperationOptions;
use crate::quorum::MembershipObserver;
use crate::report::{MemberFailure, RebootReport};
use crate::session::{Session, SessionCommand, SessionProvider};

/// Lets a caller stop a running reboot between steps.
#[derive(Debug, Clone, Default)]
pub struct RecoveryControl {
    aborted: Arc<AtomicBool>,
}

impl RecoveryControl {
    /// Creates a control handle.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests that no further step be started.
    pub fn abort(&self) {
        self.aborted.store(true, Ordering::SeqCst);
    }

    /// Returns true once [`RecoveryControl::abort`] was called.
    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }
}

/// A validated reboot plan.
///
/// Only [`RecoveryPlan::validate`] creates plans, so every plan satisfies:
/// the rejoin and removal lists are disjoint, the seed is not on the removal
/// list, and every member on the rejoin list was reachable at validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryPlan {
    cluster_name: String,
    seed: InstanceAddress,
    rejoin: Vec<InstanceAddress>,
    remove: Vec<InstanceAddress>,
    clear_read_only: bool,
    expected_epoch: u64,
}

impl RecoveryPlan {
    /// Validates a reboot request against `topology`.
    ///
    /// Probes reachability of every declared member; members not on the
    /// removal list that answer are scheduled to rejoin even if not listed.
    ///
    /// # Errors
    ///
    /// - [`Error::PreconditionDenied`] if `seed` is not a declared member
    /// - [`Error::PlanValidation`] if the lists overlap, name unknown members,
    ///   put the seed on the removal list, or list an unreachable member for
    ///   rejoin
    pub async fn validate(
        topology: &Topology,
        seed: &InstanceAddress,
        options: &OperationOptions,
        observer: &MembershipObserver,
    ) -> Result<Self> {
        if !topology.is_declared(seed) {
            return Err(Error::denied(
                HealthClassification::AllOffline,
                Operation::RebootClusterFromCompleteOutage,
                DenyReason::NotSeedCandidate { address: Some(seed.clone()) },
            ));
        }

        let requested = options.rejoin_list();
        let remove = options.remove_list();

        if let Some(both) = requested.iter().find(|a| remove.contains(a)) {
            return Err(Error::plan(format!(
                "{} cannot appear on both the rejoinInstances and removeInstances lists",
                both
            )));
        }

        for address in requested.iter().chain(remove) {
            if !topology.is_declared(address) {
                return Err(Error::plan(format!(
                    "{} is not a member of cluster '{}'",
                    address, topology.cluster_name
                )));
            }
        }

        if remove.contains(seed) {
            return Err(Error::plan(format!(
                "the seed instance {} cannot be on the removeInstances list",
                seed
            )));
        }

        for address in requested.iter().filter(|a| *a != seed) {
            if !observer.reachable(address).await {
                return Err(Error::plan(format!(
                    "{} is unreachable: an unreachable instance cannot be on the rejoinInstances list",
                    address
                )));
            }
        }

        let mut rejoin = Vec::new();
        for member in topology.declared() {
            let address = &member.address;
            if address == seed || remove.contains(address) {
                continue;
            }
            if requested.contains(address) || observer.reachable(address).await {
                rejoin.push(address.clone());
            } else {
                debug!(address = %address, "Unreachable member left out of the rejoin set");
            }
        }

        Ok(Self {
            cluster_name: topology.cluster_name.clone(),
            seed: seed.clone(),
            rejoin,
            remove: remove.to_vec(),
            clear_read_only: options.clears_read_only(),
            expected_epoch: topology.epoch,
        })
    }

    /// Cluster the plan applies to.
    pub fn cluster_name(&self) -> &str {
        &self.cluster_name
    }

    /// Member the group is recreated on.
    pub fn seed(&self) -> &InstanceAddress {
        &self.seed
    }

    /// Members to rejoin, in join order.
    pub fn rejoin(&self) -> &[InstanceAddress] {
        &self.rejoin
    }

    /// Members to drop from the metadata.
    pub fn remove(&self) -> &[InstanceAddress] {
        &self.remove
    }

    /// Whether super-read-only is cleared on the seed.
    pub fn clear_read_only(&self) -> bool {
        self.clear_read_only
    }

    /// Epoch the metadata must still have when the plan is recorded.
    pub fn expected_epoch(&self) -> u64 {
        self.expected_epoch
    }

    /// Epoch the metadata has after the plan is recorded.
    pub fn target_epoch(&self) -> u64 {
        self.expected_epoch + 1
    }
}

/// Executes validated reboot plans.
pub struct RecoveryOrchestrator {
    sessions: Arc<dyn SessionProvider>,
    metadata: Arc<dyn MetadataStore>,
    observer: MembershipObserver,
    session_timeout: Duration,
    rejoin_timeout: Duration,
    max_concurrent_rejoins: usize,
}

impl RecoveryOrchestrator {
    /// Creates an orchestrator.
    pub fn new(
        sessions: Arc<dyn SessionProvider>,
        metadata: Arc<dyn MetadataStore>,
        observer: MembershipObserver,
        config: &EngineConfig,
    ) -> Self {
        Self {
            sessions,
            metadata,
            observer,
            session_timeout: config.session_timeout_duration(),
            rejoin_timeout: config.rejoin_timeout_duration(),
            max_concurrent_rejoins: config.max_concurrent_rejoins.max(1),
        }
    }

    /// Runs `plan` against `topology`, the record it was validated on.
    ///
    /// Member-level rejoin failures are collected in the report. A failed
    /// reseed ends the run with an unsuccessful report.
    ///
    /// # Errors
    ///
    /// - [`Error::Aborted`] if `control` was aborted before a step started
    /// - [`Error::ReseededButUnrecorded`] if the metadata could not be written
    pub async fn execute(
        &self,
        plan: &RecoveryPlan,
        topology: Topology,
        seed_session: &dyn Session,
        control: &RecoveryControl,
    ) -> Result<RebootReport> {
        let start = Instant::now();
        let mut completed_steps = 0;
        let mut updated = topology.without_transient();

        info!(
            cluster = %plan.cluster_name,
            seed = %plan.seed,
            rejoin = plan.rejoin.len(),
            remove = plan.remove.len(),
            "Rebooting cluster from complete outage"
        );

        // Step 1: reseed.
        checkpoint(control, completed_steps)?;
        let reseed = timeout(
            self.rejoin_timeout,
            seed_session
                .execute(SessionCommand::BootstrapGroup { clear_read_only: plan.clear_read_only }),
        )
        .await;
        let reseed_failure = match reseed {
            Ok(Ok(_)) => None,
            Ok(Err(e)) => Some(e.to_string()),
            Err(_) => Some(format!("timed out after {}ms", self.rejoin_timeout.as_millis())),
        };
        if let Some(cause) = reseed_failure {
            error!(cluster = %plan.cluster_name, seed = %plan.seed, cause = %cause, "Reseed failed");
            counter!("quorate_reboots_total", "outcome" => "failed").increment(1);
            let classification = self.observer.observe(&mut updated).await;
            return Ok(RebootReport {
                cluster_name: plan.cluster_name.clone(),
                seed: plan.seed.clone(),
                success: false,
                classification,
                epoch: plan.expected_epoch,
                rejoined: Vec::new(),
                removed: Vec::new(),
                failures: vec![MemberFailure { address: plan.seed.clone(), cause }],
                not_joined: not_joined(&updated, &plan.seed),
            });
        }
        info!(cluster = %plan.cluster_name, seed = %plan.seed, "Group reseeded");
        completed_steps += 1;

        // Step 2: rejoin.
        checkpoint(control, completed_steps)?;
        let (rejoined, failures, interrupted) = self.rejoin_all(plan, control).await;
        if interrupted {
            return Err(Error::Aborted { completed_steps });
        }
        completed_steps += 1;

        // Step 3: drop the removal list.
        checkpoint(control, completed_steps)?;
        let mut removed = Vec::with_capacity(plan.remove.len());
        for address in &plan.remove {
            if updated.remove_member(address).is_some() {
                self.observer.reconciler().forget(updated.cluster_id, address);
                removed.push(address.clone());
            }
        }
        completed_steps += 1;

        // Step 4: record.
        checkpoint(control, completed_steps)?;
        match self.metadata.save_topology(&updated, plan.expected_epoch).await {
            Ok(epoch) => updated.epoch = epoch,
            Err(e) => {
                let source: Error = e.into();
                error!(cluster = %plan.cluster_name, error = %source, "Reseeded group was not recorded");
                counter!("quorate_reboots_total", "outcome" => "unrecorded").increment(1);
                return Err(Error::ReseededButUnrecorded { source: Box::new(source) });
            }
        }

        // Step 5: observe the new group.
        let classification = self.observer.observe(&mut updated).await;
        let success = classification.has_quorum() && failures.is_empty();

        let outcome = if success { "success" } else { "partial" };
        counter!("quorate_reboots_total", "outcome" => outcome).increment(1);
        info!(
            cluster = %plan.cluster_name,
            classification = %classification,
            epoch = updated.epoch,
            rejoined = rejoined.len(),
            failed = failures.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Reboot finished"
        );

        Ok(RebootReport {
            cluster_name: plan.cluster_name.clone(),
            seed: plan.seed.clone(),
            success,
            classification,
            epoch: updated.epoch,
            not_joined: not_joined(&updated, &plan.seed),
            rejoined,
            removed,
            failures,
        })
    }

    /// Rejoins every planned member. Returns the members that rejoined, the
    /// failures, and whether dispatch stopped early on abort.
    async fn rejoin_all(
        &self,
        plan: &RecoveryPlan,
        control: &RecoveryControl,
    ) -> (Vec<InstanceAddress>, Vec<MemberFailure>, bool) {
        let semaphore = Arc::new(Semaphore::new(self.max_concurrent_rejoins));
        let mut handles = Vec::with_capacity(plan.rejoin.len());
        let mut interrupted = false;

        for address in &plan.rejoin {
            if control.is_aborted() {
                interrupted = true;
                break;
            }

            let permit = match semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };
            let sessions = Arc::clone(&self.sessions);
            let address = address.clone();
            let seed = plan.seed.clone();
            let session_timeout = self.session_timeout;
            let rejoin_timeout = self.rejoin_timeout;

            let target = address.clone();
            let handle = tokio::spawn(async move {
                let _permit = permit;
                timeout(
                    rejoin_timeout,
                    rejoin_member(sessions.as_ref(), &target, &seed, session_timeout),
                )
                .await
                .unwrap_or_else(|_| Err(format!("timed out after {}ms", rejoin_timeout.as_millis())))
            });
            handles.push((address, handle));
        }

        let mut rejoined = Vec::new();
        let mut failures = Vec::new();
        for (address, handle) in handles {
            match handle.await {
                Ok(Ok(())) => {
                    info!(address = %address, "Member rejoined");
                    rejoined.push(address);
                }
                Ok(Err(cause)) => {
                    warn!(address = %address, cause = %cause, "Member failed to rejoin");
                    failures.push(MemberFailure { address, cause });
                }
                Err(e) => {
                    error!(address = %address, error = %e, "Rejoin task failed");
                    let cause = format!("rejoin task failed: {e}");
                    failures.push(MemberFailure { address, cause });
                }
            }
        }

        if !failures.is_empty() {
            counter!("quorate_rejoin_failures_total").increment(failures.len() as u64);
        }
        (rejoined, failures, interrupted)
    }
}

impl std::fmt::Debug for RecoveryOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecoveryOrchestrator")
            .field("rejoin_timeout", &self.rejoin_timeout)
            .field("max_concurrent_rejoins", &self.max_concurrent_rejoins)
            .finish_non_exhaustive()
    }
}

async fn rejoin_member(
    sessions: &dyn SessionProvider,
    address: &InstanceAddress,
    seed: &InstanceAddress,
    session_timeout: Duration,
) -> std::result::Result<(), String> {
    let session = timeout(session_timeout, sessions.open(address))
        .await
        .map_err(|_| format!("no session within {}ms", session_timeout.as_millis()))?
        .map_err(|e| e.to_string())?;
    session
        .execute(SessionCommand::JoinGroup { seed: seed.clone() })
        .await
        .map(|_| ())
        .map_err(|e| e.to_string())
}

fn checkpoint(control: &RecoveryControl, completed_steps: usize) -> Result<()> {
    if control.is_aborted() {
        warn!(completed_steps, "Reboot aborted by caller");
        return Err(Error::Aborted { completed_steps });
    }
    Ok(())
}

fn not_joined(topology: &Topology, seed: &InstanceAddress) -> Vec<InstanceAddress> {
    topology
        .declared()
        .filter(|m| &m.address != seed && !m.status.is_live())
        .map(|m| m.address.clone())
        .collect()
}
