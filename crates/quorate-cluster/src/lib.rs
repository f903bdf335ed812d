// Copyright 2024 The Quorate Authors
// SPDX-License-Identifier: Apache-2.0

//! Cluster administration for Quorate.
//!
//! This crate decides whether an administrative operation may run against a
//! replicated cluster and carries out recovery when every member is down:
//!
//! - [`quorum`]: membership observation, status reconciliation and the
//!   health classification of a topology
//! - [`preconditions`]: the operation rule table and authorization
//! - [`recovery`]: plan validation and execution of
//!   `rebootClusterFromCompleteOutage`
//! - [`engine`]: the [`AdminEngine`] tying sessions, metadata and the above
//!   together under per-cluster sections
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   ┌───────────────────┐   ┌──────────────────┐
//! │   Session    │──▶│    AdminEngine    │──▶│  MetadataStore   │
//! └──────────────┘   └───────────────────┘   └──────────────────┘
//!                      │       │       │
//!             ┌────────┘       │       └─────────┐
//!             ▼                ▼                 ▼
//!   ┌──────────────────┐ ┌─────────────┐ ┌──────────────────────┐
//!   │MembershipObserver│ │  authorize  │ │ RecoveryOrchestrator │
//!   └──────────────────┘ └─────────────┘ └──────────────────────┘
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod engine;
pub mod lock;
pub mod options;
pub mod preconditions;
pub mod quorum;
pub mod recovery;
pub mod report;
pub mod session;

#[cfg(feature = "simulation")]
pub mod simulation;

pub use engine::AdminEngine;
pub use lock::{ClusterGuard, ClusterLocks};
pub use options::{accepted_keys, OperationOptions, OptionKey};
pub use preconditions::{authorize, check_metadata, rule, Decision, MetadataPresence, Rule};
pub use quorum::{classify, classify_view, has_majority, MembershipObserver, StatusReconciler};
pub use recovery::{RecoveryControl, RecoveryOrchestrator, RecoveryPlan};
pub use report::{
    DescribeReport, DissolveReport, InstanceStateReport, MemberDescription, MemberFailure,
    MemberStatusReport, RebootReport, RescanReport, StatusReport,
};
pub use session::{
    CommandOutcome, InstanceInfo, MembershipProbe, NoOpMembershipProbe, ProbeError, Session,
    SessionCommand, SessionError, SessionProvider,
};
#[cfg(feature = "simulation")]
pub use simulation::{SimulatedFleet, SimulatedInstance, SimulatedSession};
