// Copyright 2024 The Quorate Authors
// SPDX-License-Identifier: Apache-2.0

//! Core types and utilities for the Quorate cluster recovery engine.
//!
//! This crate provides the building blocks shared by every Quorate component:
//! - The member and topology model with health classifications
//! - The administrative operation catalogue
//! - Error types with stable error codes and typed denial reasons
//! - Configuration management

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod operation;
pub mod types;

pub use config::{Config, EngineConfig, LogFormat, LoggingConfig, MetadataConfig};
pub use error::{DenyReason, Error, ErrorCode, Result};
pub use operation::{Operation, RoleRequirement};
pub use types::{
    CallerRole, HealthClassification, InstanceAddress, InstanceType, Member, MemberRole,
    MemberStatus, SessionState, Topology,
};
