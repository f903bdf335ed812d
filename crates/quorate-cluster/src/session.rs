// Copyright 2024 The Quorate Authors
// SPDX-License-Identifier: Apache-2.0

//! Boundaries to the instances the engine administers.
//!
//! The engine never speaks a wire protocol itself. It drives instances through
//! a [`Session`] (bound to one instance), opens further sessions through a
//! [`SessionProvider`], and reads the group's view of each member through a
//! [`MembershipProbe`]. Timeouts are applied by the caller of these traits.

use async_trait::async_trait;
use quorate_core::{Error, InstanceAddress, MemberStatus, SessionState};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised by sessions.
#[derive(Debug, Clone, Error)]
pub enum SessionError {
    /// The session is closed.
    #[error("session is not connected")]
    Disconnected,

    /// A session to the instance could not be opened.
    #[error("cannot connect to {address}: {message}")]
    Connect {
        /// Target instance.
        address: InstanceAddress,
        /// Failure description.
        message: String,
    },

    /// The instance rejected or failed a command.
    #[error("command failed on {address}: {message}")]
    Command {
        /// Target instance.
        address: InstanceAddress,
        /// Failure description.
        message: String,
    },

    /// The operation did not complete in time.
    #[error("timed out talking to {0}")]
    Timeout(InstanceAddress),
}

impl From<SessionError> for Error {
    fn from(e: SessionError) -> Self {
        Error::Session(e.to_string())
    }
}

/// Errors raised by membership probes.
#[derive(Debug, Clone, Error)]
pub enum ProbeError {
    /// The instance did not answer.
    #[error("{0} is unreachable")]
    Unreachable(InstanceAddress),

    /// The probe could not produce a view at all.
    #[error("probe of {address} failed: {message}")]
    Failed {
        /// Probed instance.
        address: InstanceAddress,
        /// Failure description.
        message: String,
    },
}

/// Commands a session can run against its instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCommand {
    /// Report the instance's own state.
    DescribeInstance,
    /// Start a new single-member group on this instance.
    BootstrapGroup {
        /// Clear super-read-only before starting the group.
        clear_read_only: bool,
    },
    /// Join the group running on `seed`.
    JoinGroup {
        /// Member the group runs on.
        seed: InstanceAddress,
    },
    /// Leave the current group.
    LeaveGroup,
    /// Prepare the instance for group membership.
    ConfigureInstance {
        /// Option file to update, passed through untouched.
        mycnf_path: Option<String>,
    },
}

impl SessionCommand {
    /// Short name used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::DescribeInstance => "describe-instance",
            Self::BootstrapGroup { .. } => "bootstrap-group",
            Self::JoinGroup { .. } => "join-group",
            Self::LeaveGroup => "leave-group",
            Self::ConfigureInstance { .. } => "configure-instance",
        }
    }
}

/// What an instance reports about itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceInfo {
    /// Instance address.
    pub address: InstanceAddress,
    /// Instance state.
    pub state: SessionState,
    /// Whether the instance runs a replication group.
    pub in_group: bool,
    /// Whether super-read-only is set.
    pub super_read_only: bool,
}

/// Result of a session command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    /// Answer to [`SessionCommand::DescribeInstance`].
    Described(InstanceInfo),
    /// The command completed.
    Done,
}

/// A connection bound to one instance.
#[async_trait]
pub trait Session: Send + Sync {
    /// The instance this session is bound to, if any.
    fn current_member(&self) -> Option<InstanceAddress>;

    /// Returns true while the session is usable.
    fn is_connected(&self) -> bool;

    /// Runs a command on the bound instance.
    async fn execute(&self, command: SessionCommand) -> Result<CommandOutcome, SessionError>;
}

/// Opens sessions to other instances.
#[async_trait]
pub trait SessionProvider: Send + Sync {
    /// Opens a session to `address`.
    async fn open(&self, address: &InstanceAddress) -> Result<Box<dyn Session>, SessionError>;
}

/// Read-only view of group membership as the transport exposes it.
#[async_trait]
pub trait MembershipProbe: Send + Sync {
    /// Returns true if the instance answers at all.
    async fn reachable(&self, address: &InstanceAddress) -> bool;

    /// Returns the member's status as seen by the group.
    async fn member_status(&self, address: &InstanceAddress) -> Result<MemberStatus, ProbeError>;

    /// Returns every member of the group `address` is running in, itself
    /// included. Empty if the instance runs no group.
    async fn group_members(
        &self,
        address: &InstanceAddress,
    ) -> Result<Vec<InstanceAddress>, ProbeError>;
}

/// Asks a session to describe its instance.
pub(crate) async fn describe(
    session: &dyn Session,
    address: &InstanceAddress,
) -> Result<InstanceInfo, SessionError> {
    match session.execute(SessionCommand::DescribeInstance).await? {
        CommandOutcome::Described(info) => Ok(info),
        CommandOutcome::Done => Err(SessionError::Command {
            address: address.clone(),
            message: "instance returned no description".to_string(),
        }),
    }
}

/// A probe that sees nothing; every member reads as unreachable.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpMembershipProbe;

#[async_trait]
impl MembershipProbe for NoOpMembershipProbe {
    async fn reachable(&self, _address: &InstanceAddress) -> bool {
        false
    }

    async fn member_status(&self, address: &InstanceAddress) -> Result<MemberStatus, ProbeError> {
        Err(ProbeError::Unreachable(address.clone()))
    }

    async fn group_members(
        &self,
        _address: &InstanceAddress,
    ) -> Result<Vec<InstanceAddress>, ProbeError> {
        Ok(Vec::new())
    }
}
