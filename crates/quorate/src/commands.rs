// Copyright 2024 The Quorate Authors
// SPDX-License-Identifier: Apache-2.0

//! Command handlers.
//!
//! Every cluster command runs against a simulated fleet loaded from the
//! `--fleet` file and a redb metadata file. Instance state changes are written
//! back to the fleet file when the command finishes, successful or not.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use quorate_cluster::{
    authorize, AdminEngine, Decision, DescribeReport, DissolveReport, InstanceInfo,
    InstanceStateReport, OperationOptions, RebootReport, RecoveryControl, RescanReport, Session,
    SessionProvider, SimulatedFleet, StatusReport,
};
use quorate_core::{Config, Error, Operation};
use quorate_metadata::{ClusterSummary, MetadataStore, RedbMetadataStore};
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use crate::cli::{AuthorizeArgs, Commands, GlobalArgs, OutputFormat, RebootArgs};

/// Opens the metadata file named by the configuration.
pub fn open_store(config: &Config) -> Result<Arc<RedbMetadataStore>> {
    let store = RedbMetadataStore::open(&config.metadata.path)
        .map_err(Error::from)
        .with_context(|| format!("Failed to open metadata at {}", config.metadata.path.display()))?;
    Ok(Arc::new(store))
}

/// Handles `list`.
pub async fn list(store: &dyn MetadataStore, output: OutputFormat) -> Result<()> {
    let clusters = store.list_clusters().await.map_err(Error::from)?;
    match output {
        OutputFormat::Json => print_json(&clusters)?,
        OutputFormat::Text => print_clusters(&clusters),
    }
    Ok(())
}

/// Handles `authorize`.
pub fn authorize_command(args: AuthorizeArgs, output: OutputFormat) -> Result<()> {
    let decision = authorize(args.classification, args.operation, args.role.into(), args.force);
    match output {
        OutputFormat::Json => {
            let reason = match &decision {
                Decision::Allow => Value::Null,
                Decision::Deny(reason) => Value::String(reason.to_string()),
            };
            print_json(&json!({
                "operation": args.operation,
                "classification": args.classification,
                "allowed": decision.is_allowed(),
                "reason": reason,
            }))?;
        }
        OutputFormat::Text => match decision {
            Decision::Allow => {
                println!("✓ {} is allowed when the cluster is {}", args.operation, args.classification)
            }
            Decision::Deny(reason) => println!("✗ {}: {}", args.operation, reason),
        },
    }
    Ok(())
}

/// Engine, fleet and session of one cluster command.
pub struct Runtime {
    engine: AdminEngine,
    fleet: SimulatedFleet,
    fleet_path: PathBuf,
    session: Box<dyn Session>,
    output: OutputFormat,
}

impl Runtime {
    /// Loads the fleet, opens the metadata and binds the session.
    pub async fn open(global: &GlobalArgs, config: &Config) -> Result<Self> {
        let fleet_path =
            global.fleet.clone().context("A --fleet file is required for cluster commands")?;
        let address =
            global.session.clone().context("A --session instance is required for cluster commands")?;

        let fleet = SimulatedFleet::load(&fleet_path)
            .with_context(|| format!("Failed to load fleet from {}", fleet_path.display()))?;
        let session = fleet
            .open(&address)
            .await
            .map_err(Error::from)
            .with_context(|| format!("Failed to open a session to {}", address))?;

        let store = open_store(config)?;
        let engine = AdminEngine::new(
            config.engine.clone(),
            store,
            Arc::new(fleet.clone()),
            Arc::new(fleet.clone()),
        );
        debug!(session = %address, fleet = %fleet_path.display(), "Runtime ready");

        Ok(Self { engine, fleet, fleet_path, session, output: global.output })
    }

    /// Runs a cluster command and saves the fleet.
    pub async fn run(self, command: Commands) -> Result<()> {
        let result = self.dispatch(command).await;
        self.fleet
            .save(&self.fleet_path)
            .with_context(|| format!("Failed to save fleet to {}", self.fleet_path.display()))?;
        result
    }

    async fn dispatch(&self, command: Commands) -> Result<()> {
        let engine = &self.engine;
        let session = self.session.as_ref();

        match command {
            Commands::Status(args) => {
                let report = engine.status(session, args.cluster.as_deref()).await?;
                self.emit(&report, print_status)
            }
            Commands::Describe(args) => {
                let report = engine.describe(session, args.cluster.as_deref()).await?;
                self.emit(&report, print_describe)
            }
            Commands::CheckInstance(args) => {
                let report = engine
                    .check_instance_state(session, args.cluster.as_deref(), &args.address)
                    .await?;
                self.emit(&report, print_instance_state)
            }
            Commands::CreateCluster(args) => {
                let options = parse_options(Operation::CreateCluster, Map::new())?;
                let report = engine.create_cluster(session, &args.name, &options).await?;
                self.emit(&report, print_status)
            }
            Commands::AddInstance(args) => {
                let options = parse_options(Operation::AddInstance, Map::new())?;
                let report = engine
                    .add_instance(session, args.cluster.as_deref(), &args.address, &options)
                    .await?;
                self.emit(&report, print_status)
            }
            Commands::RemoveInstance(args) => {
                let options = parse_options(Operation::RemoveInstance, force_map(args.force))?;
                let report = engine
                    .remove_instance(session, args.cluster.as_deref(), &args.address, &options)
                    .await?;
                self.emit(&report, print_status)
            }
            Commands::RejoinInstance(args) => {
                let options = parse_options(Operation::RejoinInstance, Map::new())?;
                let report = engine
                    .rejoin_instance(session, args.cluster.as_deref(), &args.address, &options)
                    .await?;
                self.emit(&report, print_status)
            }
            Commands::Rescan(args) => {
                let report = engine.rescan(session, args.cluster.as_deref()).await?;
                self.emit(&report, print_rescan)
            }
            Commands::Dissolve(args) => {
                let options = parse_options(Operation::Dissolve, force_map(args.force))?;
                let report = engine.dissolve(session, args.cluster.as_deref(), &options).await?;
                self.emit(&report, print_dissolve)
            }
            Commands::Reboot(args) => self.reboot(args).await,
            Commands::DropMetadata(args) => {
                let options = parse_options(Operation::DropMetadataSchema, force_map(args.force))?;
                engine.drop_metadata_schema(session, args.cluster.as_deref(), &options).await?;
                match self.output {
                    OutputFormat::Json => print_json(&json!({ "dropped": true })),
                    OutputFormat::Text => {
                        println!("✓ Cluster metadata dropped");
                        Ok(())
                    }
                }
            }
            Commands::ConfigureInstance(args) => {
                let mut map = Map::new();
                if let Some(path) = args.mycnf_path {
                    map.insert("mycnfPath".to_string(), Value::String(path));
                }
                let options = parse_options(Operation::ConfigureInstance, map)?;
                let info =
                    engine.configure_instance(session, args.address.as_ref(), &options).await?;
                self.emit(&info, print_instance_info)
            }
            Commands::List | Commands::Authorize(_) | Commands::Version => {
                anyhow::bail!("not a cluster command")
            }
        }
    }

    async fn reboot(&self, args: RebootArgs) -> Result<()> {
        let operation = Operation::RebootClusterFromCompleteOutage;
        let options = match &args.options {
            Some(raw) => OperationOptions::parse_str(operation, raw)?,
            None => {
                let mut map = Map::new();
                if !args.rejoin.is_empty() {
                    map.insert("rejoinInstances".to_string(), address_list(&args.rejoin));
                }
                if !args.remove.is_empty() {
                    map.insert("removeInstances".to_string(), address_list(&args.remove));
                }
                if args.clear_read_only {
                    map.insert("clearReadOnly".to_string(), Value::Bool(true));
                }
                parse_options(operation, map)?
            }
        };

        let control = RecoveryControl::new();
        let watcher = {
            let control = control.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("Interrupt received, aborting reboot at the next step");
                    control.abort();
                }
            })
        };

        let result = self
            .engine
            .reboot_cluster_from_complete_outage(self.session.as_ref(), &args.name, &options, &control)
            .await;
        watcher.abort();

        let report = result?;
        info!(cluster = %report.cluster_name, success = report.success, "Reboot complete");
        self.emit(&report, print_reboot)?;
        if !report.success {
            anyhow::bail!("the cluster was rebooted but is not fully recovered");
        }
        Ok(())
    }

    fn emit<T: serde::Serialize>(&self, value: &T, text: fn(&T)) -> Result<()> {
        match self.output {
            OutputFormat::Json => print_json(value),
            OutputFormat::Text => {
                text(value);
                Ok(())
            }
        }
    }
}

fn parse_options(operation: Operation, map: Map<String, Value>) -> Result<OperationOptions> {
    Ok(OperationOptions::parse(operation, &Value::Object(map))?)
}

fn force_map(force: bool) -> Map<String, Value> {
    let mut map = Map::new();
    if force {
        map.insert("force".to_string(), Value::Bool(true));
    }
    map
}

fn address_list(addresses: &[quorate_core::InstanceAddress]) -> Value {
    Value::Array(addresses.iter().map(|a| Value::String(a.to_string())).collect())
}

fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_status(report: &StatusReport) {
    let icon = if report.classification.has_quorum() { "✓" } else { "✗" };
    println!("\n  Cluster '{}': {} {}", report.cluster_name, icon, report.classification);
    println!("  ─────────────────────────────────────────────");
    println!("  Epoch:          {}", report.epoch);
    println!();
    println!("  {:<24}  {:<18}  {:<12}  {}", "ADDRESS", "ROLE", "STATUS", "MANAGED");
    for member in &report.members {
        let managed = if member.declared { "yes" } else { "no" };
        println!(
            "  {:<24}  {:<18}  {:<12}  {}",
            member.address, member.role, member.status, managed
        );
    }
    println!();
}

fn print_describe(report: &DescribeReport) {
    let mode = if report.multi_primary { "multi-primary" } else { "single-primary" };
    println!("\n  Cluster '{}' ({})", report.cluster_name, report.cluster_id);
    println!("  ─────────────────────────────────────────────");
    println!("  Mode:           {}", mode);
    println!("  Epoch:          {}", report.epoch);
    println!();
    for member in &report.members {
        println!(
            "  {:<24}  {:<18}  joined {}",
            member.address,
            member.role,
            member.joined_at.format("%Y-%m-%d %H:%M:%S")
        );
    }
    println!();
}

fn print_instance_state(report: &InstanceStateReport) {
    println!("\n  Instance {}", report.address);
    println!("  ─────────────────────────────────────────────");
    println!("  Reachable:      {}", if report.reachable { "yes" } else { "no" });
    println!("  Type:           {}", report.instance_type);
    println!(
        "  State:          {}",
        report.state.map(|s| format!("{:?}", s)).unwrap_or_else(|| "unknown".to_string())
    );
    println!("  Declared:       {}", if report.declared { "yes" } else { "no" });
    if let Some(status) = report.status {
        println!("  Group status:   {}", status);
    }
    println!();
}

fn print_rescan(report: &RescanReport) {
    println!("✓ Rescan of '{}' finished (epoch {})", report.cluster_name, report.epoch);
    for address in &report.added {
        println!("  + {} recorded in the metadata", address);
    }
    for address in &report.missing {
        println!("  ! {} is missing", address);
    }
}

fn print_dissolve(report: &DissolveReport) {
    println!("✓ Cluster '{}' dissolved", report.cluster_name);
    for address in &report.left {
        println!("  - {} left the group", address);
    }
    for failure in &report.failures {
        println!("  ✗ {}: {}", failure.address, failure.cause);
    }
}

fn print_reboot(report: &RebootReport) {
    let icon = if report.success { "✓" } else { "✗" };
    println!(
        "{} Cluster '{}' rebooted from {} ({}, epoch {})",
        icon, report.cluster_name, report.seed, report.classification, report.epoch
    );
    for address in &report.rejoined {
        println!("  + {} rejoined", address);
    }
    for address in &report.removed {
        println!("  - {} removed", address);
    }
    for failure in &report.failures {
        println!("  ✗ {}: {}", failure.address, failure.cause);
    }
    for address in &report.not_joined {
        println!("  ! {} is not part of the group", address);
    }
}

fn print_instance_info(info: &InstanceInfo) {
    println!("✓ Instance {} configured ({:?})", info.address, info.state);
}

fn print_clusters(clusters: &[ClusterSummary]) {
    if clusters.is_empty() {
        println!("No clusters recorded.");
        return;
    }
    println!("  {:<20}  {:>6}  {:>8}  {}", "NAME", "EPOCH", "MEMBERS", "ID");
    for cluster in clusters {
        println!(
            "  {:<20}  {:>6}  {:>8}  {}",
            cluster.name, cluster.epoch, cluster.members, cluster.cluster_id
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_force_map() {
        assert!(force_map(false).is_empty());
        let options = parse_options(Operation::Dissolve, force_map(true)).unwrap();
        assert!(options.is_forced());
    }

    #[test]
    fn test_flags_go_through_option_validation() {
        let err = parse_options(Operation::AddInstance, force_map(true)).unwrap_err();
        let err = err.downcast_ref::<Error>().unwrap();
        assert!(matches!(err, Error::InvalidOption { .. }));
    }

    #[test]
    fn test_address_list() {
        let addresses = vec!["db2:3306".parse().unwrap(), "db3:3306".parse().unwrap()];
        assert_eq!(address_list(&addresses), json!(["db2:3306", "db3:3306"]));
    }

    #[tokio::test]
    async fn test_runtime_requires_fleet_and_session() {
        let global = GlobalArgs {
            config: None,
            metadata: None,
            fleet: None,
            session: None,
            output: OutputFormat::Text,
        };
        let err = Runtime::open(&global, &Config::default()).await.err().unwrap();
        assert!(err.to_string().contains("--fleet"));
    }
}
