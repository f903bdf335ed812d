// Copyright 2024 The Quorate Authors
// SPDX-License-Identifier: Apache-2.0

//! Error types for Quorate with stable error codes.

use std::fmt;

use thiserror::Error;

use crate::operation::{Operation, RoleRequirement};
use crate::types::{CallerRole, HealthClassification, InstanceAddress};

/// A specialized `Result` type for Quorate operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Stable error codes reported to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// No usable session.
    SessionError,
    /// No metadata for the requested cluster.
    MetadataNotFound,
    /// More than one metadata record matches.
    MetadataAmbiguous,
    /// The operation is not allowed in the current state.
    PreconditionDenied,
    /// An option key or value was rejected.
    InvalidOption,
    /// A recovery plan was rejected before execution.
    PlanValidationError,
    /// A single member operation failed.
    MemberOperationFailed,
    /// The metadata changed underneath the operation.
    PersistenceConflict,
    /// The group was recreated but the metadata was not updated.
    ReseededButUnrecorded,
    /// The caller aborted the operation.
    Aborted,
    /// Metadata storage failure.
    StorageError,
    /// Invalid configuration.
    ConfigError,
    /// Invalid argument.
    InvalidArgument,
}

impl ErrorCode {
    /// Returns the error code string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::SessionError => "SessionError",
            Self::MetadataNotFound => "MetadataNotFound",
            Self::MetadataAmbiguous => "MetadataAmbiguous",
            Self::PreconditionDenied => "PreconditionDenied",
            Self::InvalidOption => "InvalidOption",
            Self::PlanValidationError => "PlanValidationError",
            Self::MemberOperationFailed => "MemberOperationFailed",
            Self::PersistenceConflict => "PersistenceConflict",
            Self::ReseededButUnrecorded => "ReseededButUnrecorded",
            Self::Aborted => "Aborted",
            Self::StorageError => "StorageError",
            Self::ConfigError => "ConfigError",
            Self::InvalidArgument => "InvalidArgument",
        }
    }

    /// Returns the process exit code the CLI uses for this error.
    #[must_use]
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::InvalidOption | Self::InvalidArgument | Self::ConfigError => 2,
            Self::SessionError => 3,
            Self::MetadataNotFound | Self::MetadataAmbiguous => 4,
            Self::PreconditionDenied | Self::PlanValidationError => 5,
            Self::PersistenceConflict | Self::ReseededButUnrecorded => 6,
            Self::MemberOperationFailed | Self::Aborted | Self::StorageError => 1,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why the precondition checker denied an operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DenyReason {
    /// The cluster is not in one of the allowed classifications.
    Classification {
        /// Classifications the operation accepts.
        allowed: Vec<HealthClassification>,
    },
    /// Only allowed in the current classification with `force`.
    ForceRequired,
    /// The caller's session does not have the required role.
    Role {
        /// Required role.
        required: RoleRequirement,
        /// Role the session has.
        actual: CallerRole,
    },
    /// The operation needs cluster metadata and there is none.
    MetadataMissing,
    /// The operation needs an instance without cluster metadata.
    MetadataAlreadyExists,
    /// The metadata does not agree with the instance it was read from.
    MetadataInconsistent,
    /// No cluster with the given name is recorded.
    UnknownCluster {
        /// Requested name.
        name: String,
    },
    /// The session is not bound to a declared member.
    NotSeedCandidate {
        /// The session's instance, if known.
        address: Option<InstanceAddress>,
    },
    /// Reboot requested while some member is still live.
    NotCompletelyOffline,
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Classification { allowed } => {
                let names: Vec<&str> = allowed.iter().map(|c| c.name()).collect();
                write!(f, "allowed only when the cluster is {}", names.join(", "))
            }
            Self::ForceRequired => {
                f.write_str("the force option is required in the current cluster state")
            }
            Self::Role { required, actual } => {
                write!(f, "requires {} but the session is {}", required, actual)
            }
            Self::MetadataMissing => f.write_str("no cluster metadata found on this instance"),
            Self::MetadataAlreadyExists => {
                f.write_str("the instance already holds cluster metadata")
            }
            Self::MetadataInconsistent => {
                f.write_str("the cluster metadata is inconsistent with the instance")
            }
            Self::UnknownCluster { name } => {
                write!(f, "the cluster with the name '{}' does not exist", name)
            }
            Self::NotSeedCandidate { address: Some(address) } => {
                write!(f, "the session instance {} is not a member of the cluster", address)
            }
            Self::NotSeedCandidate { address: None } => {
                f.write_str("the session is not bound to a cluster member")
            }
            Self::NotCompletelyOffline => f.write_str(
                "the cluster is not completely offline; use the normal recovery operations instead",
            ),
        }
    }
}

/// Errors that can occur during Quorate operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The session is missing, disconnected or unusable.
    #[error("session error: {0}")]
    Session(String),

    /// No metadata record for the cluster.
    #[error("cluster metadata not found: {0}")]
    MetadataNotFound(String),

    /// More than one metadata record matched.
    #[error("cluster name '{name}' matches {count} metadata records")]
    MetadataAmbiguous {
        /// Requested name (empty when none was given).
        name: String,
        /// Number of matching records.
        count: usize,
    },

    /// The precondition checker denied the operation.
    #[error("{operation} is not allowed: {reason} (cluster status: {classification})")]
    PreconditionDenied {
        /// Classification at the time of the check.
        classification: HealthClassification,
        /// Requested operation.
        operation: Operation,
        /// Specific reason.
        reason: DenyReason,
    },

    /// An option key or value was rejected.
    #[error("invalid option '{key}': {message}")]
    InvalidOption {
        /// Offending key.
        key: String,
        /// What was wrong with it.
        message: String,
    },

    /// A recovery plan failed validation; nothing was changed.
    #[error("recovery plan rejected: {reason}")]
    PlanValidation {
        /// Why the plan was rejected.
        reason: String,
    },

    /// A single member operation failed.
    #[error("operation on {address} failed: {cause}")]
    MemberOperationFailed {
        /// Member address.
        address: InstanceAddress,
        /// Failure description.
        cause: String,
    },

    /// The metadata epoch moved since it was loaded.
    #[error(
        "concurrent modification: expected metadata epoch {expected_epoch}, found {actual_epoch}"
    )]
    PersistenceConflict {
        /// Epoch the caller loaded.
        expected_epoch: u64,
        /// Epoch currently stored.
        actual_epoch: u64,
    },

    /// The group was reseeded but the metadata could not be written.
    #[error(
        "the group was recreated but the metadata was not recorded ({source}); \
         the cluster may be in a reseeded-but-unrecorded state, re-run discovery"
    )]
    ReseededButUnrecorded {
        /// Persistence failure.
        #[source]
        source: Box<Error>,
    },

    /// The caller aborted a multi-step operation.
    #[error("operation aborted after {completed_steps} completed step(s)")]
    Aborted {
        /// Steps finished before the abort was observed.
        completed_steps: usize,
    },

    /// Metadata storage failure.
    #[error("storage error: {0}")]
    Storage(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Invalid instance address.
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// A topology broke a structural invariant.
    #[error("invalid topology: {0}")]
    InvalidTopology(String),

    /// Invalid argument.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl Error {
    /// Creates a precondition denial.
    #[must_use]
    pub fn denied(
        classification: HealthClassification,
        operation: Operation,
        reason: DenyReason,
    ) -> Self {
        Self::PreconditionDenied { classification, operation, reason }
    }

    /// Creates a plan validation error.
    #[must_use]
    pub fn plan(reason: impl Into<String>) -> Self {
        Self::PlanValidation { reason: reason.into() }
    }

    /// Creates an invalid option error.
    #[must_use]
    pub fn invalid_option(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidOption { key: key.into(), message: message.into() }
    }

    /// Returns the stable error code.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Session(_) => ErrorCode::SessionError,
            Self::MetadataNotFound(_) => ErrorCode::MetadataNotFound,
            Self::MetadataAmbiguous { .. } => ErrorCode::MetadataAmbiguous,
            Self::PreconditionDenied { .. } => ErrorCode::PreconditionDenied,
            Self::InvalidOption { .. } => ErrorCode::InvalidOption,
            Self::PlanValidation { .. } => ErrorCode::PlanValidationError,
            Self::MemberOperationFailed { .. } => ErrorCode::MemberOperationFailed,
            Self::PersistenceConflict { .. } => ErrorCode::PersistenceConflict,
            Self::ReseededButUnrecorded { .. } => ErrorCode::ReseededButUnrecorded,
            Self::Aborted { .. } => ErrorCode::Aborted,
            Self::Storage(_) => ErrorCode::StorageError,
            Self::Config(_) => ErrorCode::ConfigError,
            Self::InvalidAddress(_) | Self::InvalidTopology(_) | Self::InvalidArgument(_) => {
                ErrorCode::InvalidArgument
            }
        }
    }

    /// Returns the deny reason, if this is a precondition denial.
    #[must_use]
    pub const fn deny_reason(&self) -> Option<&DenyReason> {
        match self {
            Self::PreconditionDenied { reason, .. } => Some(reason),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_denial_message_names_classification() {
        let err = Error::denied(
            HealthClassification::NoQuorum,
            Operation::AddInstance,
            DenyReason::Classification {
                allowed: vec![HealthClassification::Ok, HealthClassification::OkPartial],
            },
        );
        let msg = err.to_string();
        assert!(msg.contains("addInstance"));
        assert!(msg.contains("NO_QUORUM"));
        assert!(msg.contains("OK, OK_PARTIAL"));
        assert_eq!(err.code(), ErrorCode::PreconditionDenied);
    }

    #[test]
    fn test_reboot_denial_message() {
        let err = Error::denied(
            HealthClassification::Ok,
            Operation::RebootClusterFromCompleteOutage,
            DenyReason::NotCompletelyOffline,
        );
        assert!(err.to_string().contains("not completely offline"));
        assert_eq!(err.deny_reason(), Some(&DenyReason::NotCompletelyOffline));
    }

    #[test]
    fn test_reseeded_wraps_conflict() {
        let err = Error::ReseededButUnrecorded {
            source: Box::new(Error::PersistenceConflict { expected_epoch: 3, actual_epoch: 4 }),
        };
        assert_eq!(err.code(), ErrorCode::ReseededButUnrecorded);
        assert!(err.to_string().contains("expected metadata epoch 3, found 4"));
        assert!(err.to_string().contains("re-run discovery"));
    }

    #[test]
    fn test_exit_codes_are_distinct_for_main_classes() {
        assert_ne!(ErrorCode::SessionError.exit_code(), ErrorCode::PreconditionDenied.exit_code());
        assert_ne!(
            ErrorCode::PreconditionDenied.exit_code(),
            ErrorCode::PersistenceConflict.exit_code()
        );
    }
}
