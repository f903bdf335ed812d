// Copyright 2024 The Quorate Authors
// SPDX-License-Identifier: Apache-2.0

//! Command line interface definition.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use quorate_core::{CallerRole, HealthClassification, InstanceAddress, Operation};

/// Quorate: precondition checks and outage recovery for replicated database
/// clusters.
#[derive(Parser)]
#[command(name = "quorate")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Options shared by every command.
    #[command(flatten)]
    pub global: GlobalArgs,

    /// Command to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Options shared by every command.
#[derive(Args)]
pub struct GlobalArgs {
    /// Path to configuration file.
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Metadata file (overrides config).
    #[arg(short, long, global = true)]
    pub metadata: Option<PathBuf>,

    /// Fleet description file. Instance state changes are written back.
    #[arg(short, long, global = true)]
    pub fleet: Option<PathBuf>,

    /// Instance the session is bound to (host:port).
    #[arg(short, long, global = true)]
    pub session: Option<InstanceAddress>,

    /// Output format (text, json).
    #[arg(short, long, global = true, default_value = "text")]
    pub output: OutputFormat,
}

/// Available commands.
#[derive(Subcommand)]
pub enum Commands {
    /// Show the classification and member statuses of a cluster.
    Status(ClusterArgs),
    /// Show the declared structure of a cluster.
    Describe(ClusterArgs),
    /// Check one instance against a cluster.
    CheckInstance(InstanceArgs),
    /// Create a cluster on the session's instance.
    CreateCluster(CreateArgs),
    /// Add an instance to a cluster.
    AddInstance(InstanceArgs),
    /// Remove an instance from a cluster.
    RemoveInstance(ForcedInstanceArgs),
    /// Bring a declared member back into the group.
    RejoinInstance(InstanceArgs),
    /// Record unmanaged group members and report missing ones.
    Rescan(ClusterArgs),
    /// Stop the group on every member and delete the cluster.
    Dissolve(ForcedClusterArgs),
    /// Recreate a group whose members have all stopped.
    Reboot(RebootArgs),
    /// Delete a cluster's metadata, leaving the group untouched.
    DropMetadata(ForcedClusterArgs),
    /// Prepare an instance for group membership.
    ConfigureInstance(ConfigureArgs),
    /// List stored clusters.
    List,
    /// Evaluate the rule table without touching any instance.
    Authorize(AuthorizeArgs),
    /// Print version information.
    Version,
}

/// Cluster selection.
#[derive(Args)]
pub struct ClusterArgs {
    /// Cluster name. Defaults to the only stored cluster.
    #[arg(long)]
    pub cluster: Option<String>,
}

/// Cluster selection with `force`.
#[derive(Args)]
pub struct ForcedClusterArgs {
    /// Cluster name. Defaults to the only stored cluster.
    #[arg(long)]
    pub cluster: Option<String>,

    /// Proceed in states that otherwise deny the operation.
    #[arg(long)]
    pub force: bool,
}

/// An instance within a cluster.
#[derive(Args)]
pub struct InstanceArgs {
    /// Instance address (host:port).
    pub address: InstanceAddress,

    /// Cluster name. Defaults to the only stored cluster.
    #[arg(long)]
    pub cluster: Option<String>,
}

/// An instance within a cluster, with `force`.
#[derive(Args)]
pub struct ForcedInstanceArgs {
    /// Instance address (host:port).
    pub address: InstanceAddress,

    /// Cluster name. Defaults to the only stored cluster.
    #[arg(long)]
    pub cluster: Option<String>,

    /// Remove the instance from the metadata even if it cannot leave.
    #[arg(long)]
    pub force: bool,
}

/// Arguments for create-cluster.
#[derive(Args)]
pub struct CreateArgs {
    /// Name of the new cluster.
    pub name: String,
}

/// Arguments for reboot.
#[derive(Args)]
pub struct RebootArgs {
    /// Cluster name.
    pub name: String,

    /// Members to rejoin (comma-separated host:port).
    #[arg(long, value_delimiter = ',')]
    pub rejoin: Vec<InstanceAddress>,

    /// Members to drop from the metadata (comma-separated host:port).
    #[arg(long, value_delimiter = ',')]
    pub remove: Vec<InstanceAddress>,

    /// Clear super-read-only on the seed.
    #[arg(long)]
    pub clear_read_only: bool,

    /// Raw options object, e.g. '{"rejoinInstances": ["db2:3306"]}'.
    /// Conflicts with the flags above.
    #[arg(long, conflicts_with_all = ["rejoin", "remove", "clear_read_only"])]
    pub options: Option<String>,
}

/// Arguments for configure-instance.
#[derive(Args)]
pub struct ConfigureArgs {
    /// Instance to configure. Defaults to the session's instance.
    pub address: Option<InstanceAddress>,

    /// Option file to update.
    #[arg(long)]
    pub mycnf_path: Option<String>,
}

/// Arguments for authorize.
#[derive(Args)]
pub struct AuthorizeArgs {
    /// Operation name, e.g. addInstance or add-instance.
    pub operation: Operation,

    /// Cluster classification, e.g. NO_QUORUM.
    #[arg(long)]
    pub classification: HealthClassification,

    /// Role of the caller's session.
    #[arg(long, default_value = "primary")]
    pub role: RoleArg,

    /// Whether `force` is set.
    #[arg(long)]
    pub force: bool,
}

/// Caller role as given on the command line.
#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum RoleArg {
    /// Bound to the writable member.
    Primary,
    /// Bound to a read-only member.
    Secondary,
    /// Bound to an instance outside any running group.
    Detached,
}

impl From<RoleArg> for CallerRole {
    fn from(role: RoleArg) -> Self {
        match role {
            RoleArg::Primary => CallerRole::Primary,
            RoleArg::Secondary => CallerRole::Secondary,
            RoleArg::Detached => CallerRole::Detached,
        }
    }
}

/// Output format for CLI commands.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output.
    #[default]
    Text,
    /// JSON output for scripting.
    Json,
}
