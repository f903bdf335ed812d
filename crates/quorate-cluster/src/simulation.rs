// Copyright 2024 The Quorate Authors
// SPDX-License-Identifier: Apache-2.0

//! In-process simulated fleet.
//!
//! [`SimulatedFleet`] stands in for a set of database instances. It is both
//! the [`SessionProvider`] and the [`MembershipProbe`] of an engine, and it
//! exposes fault controls (stop, start, refuse joins, stall, blind probes) so
//! tests and the CLI can drive the engine through outages without a network.
//!
//! ```ignore
//! let fleet = SimulatedFleet::new();
//! fleet.form_group(&[a.clone(), b.clone(), c.clone()]);
//! fleet.stop(&b);
//! let session = fleet.session(&a);
//! ```

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use quorate_core::{Error, InstanceAddress, MemberStatus, Result, SessionState};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::session::{
    CommandOutcome, InstanceInfo, MembershipProbe, ProbeError, Session, SessionCommand,
    SessionError, SessionProvider,
};

/// State of one simulated instance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatedInstance {
    /// Whether the process is up.
    pub running: bool,
    /// Group the instance runs in.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group: Option<u64>,
    /// Whether the instance is the group's writable member.
    pub primary: bool,
    /// Whether the instance reports an error state.
    pub error: bool,
    /// Whether join requests are refused.
    pub refuse_join: bool,
    /// Whether commands never complete.
    pub stalled: bool,
    /// Whether super-read-only is set.
    pub super_read_only: bool,
    /// Option file the instance was last configured with.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mycnf_path: Option<String>,
}

/// Serialized form of a fleet.
#[derive(Debug, Default, Serialize, Deserialize)]
struct FleetFile {
    #[serde(default, rename = "instance")]
    instances: Vec<InstanceEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
struct InstanceEntry {
    address: InstanceAddress,
    #[serde(flatten)]
    state: SimulatedInstance,
}

#[derive(Debug, Default)]
struct FleetInner {
    instances: DashMap<InstanceAddress, SimulatedInstance>,
    commands: DashMap<InstanceAddress, Vec<&'static str>>,
    next_group: AtomicU64,
    blind: AtomicBool,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

/// Counts one running command until dropped.
struct InFlight<'a>(&'a FleetInner);

impl<'a> InFlight<'a> {
    fn enter(inner: &'a FleetInner) -> Self {
        let running = inner.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        inner.peak_in_flight.fetch_max(running, Ordering::SeqCst);
        Self(inner)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A set of simulated instances. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct SimulatedFleet {
    inner: Arc<FleetInner>,
}

impl SimulatedFleet {
    /// Creates an empty fleet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads a fleet from a TOML file with one `[[instance]]` table per
    /// instance.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read fleet file: {}", e)))?;
        Self::from_toml(&content)
    }

    /// Parses a fleet from TOML.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] on malformed input.
    pub fn from_toml(content: &str) -> Result<Self> {
        let file: FleetFile = toml::from_str(content)
            .map_err(|e| Error::Config(format!("failed to parse fleet file: {}", e)))?;

        let fleet = Self::new();
        let mut top_group = 0;
        for entry in file.instances {
            top_group = top_group.max(entry.state.group.unwrap_or(0));
            fleet.inner.instances.insert(entry.address, entry.state);
        }
        fleet.inner.next_group.store(top_group, Ordering::SeqCst);
        Ok(fleet)
    }

    /// Renders the fleet as TOML, instances sorted by address.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if serialization fails.
    pub fn to_toml(&self) -> Result<String> {
        let mut instances: Vec<InstanceEntry> = self
            .inner
            .instances
            .iter()
            .map(|e| InstanceEntry { address: e.key().clone(), state: e.value().clone() })
            .collect();
        instances.sort_by(|a, b| a.address.cmp(&b.address));
        toml::to_string(&FleetFile { instances })
            .map_err(|e| Error::Config(format!("failed to serialize fleet: {}", e)))
    }

    /// Writes the fleet back to `path`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the file cannot be written.
    pub fn save(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.to_toml()?)
            .map_err(|e| Error::Config(format!("failed to write fleet file: {}", e)))
    }

    /// Adds a running instance outside any group.
    pub fn add_instance(&self, address: &InstanceAddress) {
        self.inner
            .instances
            .insert(address.clone(), SimulatedInstance { running: true, ..Default::default() });
    }

    /// Starts every address in one new group. The first one is primary.
    pub fn form_group(&self, addresses: &[InstanceAddress]) -> u64 {
        let group = self.new_group();
        for (i, address) in addresses.iter().enumerate() {
            let mut entry = self.inner.instances.entry(address.clone()).or_default();
            entry.running = true;
            entry.group = Some(group);
            entry.primary = i == 0;
        }
        group
    }

    /// Stops an instance. It loses its group membership; if it was primary,
    /// the next member of its group by address takes over.
    pub fn stop(&self, address: &InstanceAddress) {
        let previous = self.inner.instances.get_mut(address).map(|mut entry| {
            let previous = (entry.group, entry.primary);
            entry.running = false;
            entry.group = None;
            entry.primary = false;
            previous
        });
        if let Some((Some(group), true)) = previous {
            self.elect(group);
        }
        debug!(address = %address, "Simulated instance stopped");
    }

    /// Starts a stopped instance. It comes back outside any group.
    pub fn start(&self, address: &InstanceAddress) {
        if let Some(mut entry) = self.inner.instances.get_mut(address) {
            entry.running = true;
        }
        debug!(address = %address, "Simulated instance started");
    }

    /// Makes join requests on `address` fail.
    pub fn refuse_join(&self, address: &InstanceAddress, refuse: bool) {
        self.update(address, |i| i.refuse_join = refuse);
    }

    /// Puts `address` into (or out of) an error state.
    pub fn set_error(&self, address: &InstanceAddress, error: bool) {
        self.update(address, |i| i.error = error);
    }

    /// Makes every command on `address` hang.
    pub fn stall(&self, address: &InstanceAddress, stalled: bool) {
        self.update(address, |i| i.stalled = stalled);
    }

    /// Makes every membership probe fail without a view.
    pub fn set_blind(&self, blind: bool) {
        self.inner.blind.store(blind, Ordering::SeqCst);
    }

    /// Highest number of session commands that ran at the same time.
    pub fn peak_in_flight(&self) -> usize {
        self.inner.peak_in_flight.load(Ordering::SeqCst)
    }

    /// Returns a copy of an instance's state.
    pub fn instance(&self, address: &InstanceAddress) -> Option<SimulatedInstance> {
        self.inner.instances.get(address).map(|e| e.value().clone())
    }

    /// Commands executed on `address`, oldest first.
    pub fn commands(&self, address: &InstanceAddress) -> Vec<&'static str> {
        self.inner.commands.get(address).map(|c| c.value().clone()).unwrap_or_default()
    }

    /// Opens a session bound to `address` without any checks.
    pub fn session(&self, address: &InstanceAddress) -> SimulatedSession {
        SimulatedSession {
            fleet: self.clone(),
            address: Some(address.clone()),
            connected: AtomicBool::new(true),
        }
    }

    /// Opens a connected session that is not bound to any instance.
    pub fn unbound_session(&self) -> SimulatedSession {
        SimulatedSession { fleet: self.clone(), address: None, connected: AtomicBool::new(true) }
    }

    fn new_group(&self) -> u64 {
        self.inner.next_group.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn update(&self, address: &InstanceAddress, f: impl FnOnce(&mut SimulatedInstance)) {
        if let Some(mut entry) = self.inner.instances.get_mut(address) {
            f(entry.value_mut());
        }
    }

    fn members_of(&self, group: u64) -> Vec<InstanceAddress> {
        let mut members: Vec<InstanceAddress> = self
            .inner
            .instances
            .iter()
            .filter(|e| e.running && e.group == Some(group))
            .map(|e| e.key().clone())
            .collect();
        members.sort();
        members
    }

    fn elect(&self, group: u64) {
        if let Some(next) = self.members_of(group).into_iter().next() {
            self.update(&next, |i| i.primary = true);
            debug!(address = %next, group, "Simulated primary elected");
        }
    }

    fn record(&self, address: &InstanceAddress, command: &SessionCommand) {
        self.inner.commands.entry(address.clone()).or_default().push(command.name());
    }

    fn run(
        &self,
        address: &InstanceAddress,
        command: SessionCommand,
    ) -> std::result::Result<CommandOutcome, SessionError> {
        let failed = |message: &str| SessionError::Command {
            address: address.clone(),
            message: message.to_string(),
        };

        let state = self.instance(address).ok_or_else(|| failed("unknown instance"))?;
        if !state.running {
            return Err(failed("instance is not running"));
        }

        match command {
            SessionCommand::DescribeInstance => {
                let session_state = match (state.error, state.group, state.primary) {
                    (true, _, _) => SessionState::Error,
                    (false, Some(_), true) => SessionState::OnlineReadWrite,
                    (false, Some(_), false) => SessionState::OnlineReadOnly,
                    (false, None, _) => SessionState::Offline,
                };
                Ok(CommandOutcome::Described(InstanceInfo {
                    address: address.clone(),
                    state: session_state,
                    in_group: state.group.is_some(),
                    super_read_only: state.super_read_only,
                }))
            }
            SessionCommand::BootstrapGroup { clear_read_only } => {
                if state.error {
                    return Err(failed("instance is in an error state"));
                }
                if state.group.is_some() {
                    return Err(failed("instance already runs a group"));
                }
                let group = self.new_group();
                self.update(address, |i| {
                    i.group = Some(group);
                    i.primary = true;
                    if clear_read_only {
                        i.super_read_only = false;
                    }
                });
                Ok(CommandOutcome::Done)
            }
            SessionCommand::JoinGroup { seed } => {
                if state.refuse_join || state.error {
                    return Err(failed("join request refused"));
                }
                if state.group.is_some() {
                    return Err(failed("instance already runs a group"));
                }
                let group = self
                    .instance(&seed)
                    .filter(|s| s.running)
                    .and_then(|s| s.group)
                    .ok_or_else(|| failed(&format!("{} runs no group", seed)))?;
                self.update(address, |i| {
                    i.group = Some(group);
                    i.primary = false;
                });
                Ok(CommandOutcome::Done)
            }
            SessionCommand::LeaveGroup => {
                self.update(address, |i| {
                    i.group = None;
                    i.primary = false;
                });
                if let (Some(group), true) = (state.group, state.primary) {
                    self.elect(group);
                }
                Ok(CommandOutcome::Done)
            }
            SessionCommand::ConfigureInstance { mycnf_path } => {
                self.update(address, |i| i.mycnf_path = mycnf_path);
                Ok(CommandOutcome::Done)
            }
        }
    }
}

#[async_trait]
impl SessionProvider for SimulatedFleet {
    async fn open(&self, address: &InstanceAddress) -> std::result::Result<Box<dyn Session>, SessionError> {
        match self.instance(address) {
            Some(state) if state.running => Ok(Box::new(self.session(address))),
            Some(_) => Err(SessionError::Connect {
                address: address.clone(),
                message: "instance is not running".to_string(),
            }),
            None => Err(SessionError::Connect {
                address: address.clone(),
                message: "unknown instance".to_string(),
            }),
        }
    }
}

#[async_trait]
impl MembershipProbe for SimulatedFleet {
    async fn reachable(&self, address: &InstanceAddress) -> bool {
        self.instance(address).is_some_and(|i| i.running)
    }

    async fn member_status(
        &self,
        address: &InstanceAddress,
    ) -> std::result::Result<MemberStatus, ProbeError> {
        if self.inner.blind.load(Ordering::SeqCst) {
            return Err(ProbeError::Failed {
                address: address.clone(),
                message: "membership view unavailable".to_string(),
            });
        }
        let state = match self.instance(address) {
            Some(state) if state.running => state,
            _ => return Err(ProbeError::Unreachable(address.clone())),
        };
        Ok(match (state.error, state.group) {
            (true, _) => MemberStatus::Error,
            (false, Some(_)) => MemberStatus::Online,
            (false, None) => MemberStatus::Offline,
        })
    }

    async fn group_members(
        &self,
        address: &InstanceAddress,
    ) -> std::result::Result<Vec<InstanceAddress>, ProbeError> {
        if self.inner.blind.load(Ordering::SeqCst) {
            return Err(ProbeError::Failed {
                address: address.clone(),
                message: "membership view unavailable".to_string(),
            });
        }
        match self.instance(address) {
            Some(state) if state.running => {
                Ok(state.group.map(|g| self.members_of(g)).unwrap_or_default())
            }
            _ => Err(ProbeError::Unreachable(address.clone())),
        }
    }
}

/// A session on a [`SimulatedFleet`].
#[derive(Debug)]
pub struct SimulatedSession {
    fleet: SimulatedFleet,
    address: Option<InstanceAddress>,
    connected: AtomicBool,
}

impl SimulatedSession {
    /// Closes the session.
    pub fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }
}

#[async_trait]
impl Session for SimulatedSession {
    fn current_member(&self) -> Option<InstanceAddress> {
        self.address.clone()
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn execute(
        &self,
        command: SessionCommand,
    ) -> std::result::Result<CommandOutcome, SessionError> {
        if !self.is_connected() {
            return Err(SessionError::Disconnected);
        }
        let address = self.address.as_ref().ok_or(SessionError::Disconnected)?;
        let _running = InFlight::enter(&self.fleet.inner);

        if self.fleet.instance(address).is_some_and(|i| i.stalled) {
            trace!(address = %address, command = command.name(), "Simulated instance stalled");
            std::future::pending::<()>().await;
        }

        self.fleet.record(address, &command);
        self.fleet.run(address, command)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> InstanceAddress {
        s.parse().unwrap()
    }

    #[tokio::test]
    async fn test_primary_moves_on_stop() {
        let fleet = SimulatedFleet::new();
        let (a, b, c) = (addr("db1:3306"), addr("db2:3306"), addr("db3:3306"));
        fleet.form_group(&[a.clone(), b.clone(), c.clone()]);

        fleet.stop(&a);
        assert!(fleet.instance(&b).unwrap().primary);
        assert_eq!(fleet.group_members(&b).await.unwrap(), vec![b.clone(), c.clone()]);
        assert!(matches!(fleet.member_status(&a).await, Err(ProbeError::Unreachable(_))));

        fleet.start(&a);
        assert_eq!(fleet.member_status(&a).await.unwrap(), MemberStatus::Offline);
    }

    #[tokio::test]
    async fn test_bootstrap_and_join() {
        let fleet = SimulatedFleet::new();
        let (a, b) = (addr("db1:3306"), addr("db2:3306"));
        fleet.add_instance(&a);
        fleet.add_instance(&b);

        fleet.session(&a).execute(SessionCommand::BootstrapGroup { clear_read_only: true }).await.unwrap();
        let joiner = fleet.open(&b).await.unwrap();
        joiner.execute(SessionCommand::JoinGroup { seed: a.clone() }).await.unwrap();

        assert_eq!(fleet.instance(&a).unwrap().group, fleet.instance(&b).unwrap().group);
        assert_eq!(fleet.commands(&b), vec!["join-group"]);

        let info = match fleet.session(&b).execute(SessionCommand::DescribeInstance).await.unwrap() {
            CommandOutcome::Described(info) => info,
            CommandOutcome::Done => panic!("expected a description"),
        };
        assert_eq!(info.state, SessionState::OnlineReadOnly);
    }

    #[tokio::test]
    async fn test_refused_join_and_stopped_open() {
        let fleet = SimulatedFleet::new();
        let (a, b) = (addr("db1:3306"), addr("db2:3306"));
        fleet.form_group(&[a.clone()]);
        fleet.add_instance(&b);
        fleet.refuse_join(&b, true);

        let err = fleet.session(&b).execute(SessionCommand::JoinGroup { seed: a.clone() }).await;
        assert!(matches!(err, Err(SessionError::Command { .. })));

        fleet.stop(&b);
        assert!(matches!(fleet.open(&b).await, Err(SessionError::Connect { .. })));
    }

    #[tokio::test]
    async fn test_blind_probe() {
        let fleet = SimulatedFleet::new();
        let a = addr("db1:3306");
        fleet.form_group(&[a.clone()]);
        fleet.set_blind(true);
        assert!(matches!(fleet.member_status(&a).await, Err(ProbeError::Failed { .. })));
    }

    #[tokio::test]
    async fn test_disconnected_session() {
        let fleet = SimulatedFleet::new();
        let a = addr("db1:3306");
        fleet.add_instance(&a);
        let session = fleet.session(&a);
        session.disconnect();
        assert!(matches!(
            session.execute(SessionCommand::DescribeInstance).await,
            Err(SessionError::Disconnected)
        ));
    }

    #[test]
    fn test_toml_round_trip() {
        let fleet = SimulatedFleet::from_toml(
            r#"
            [[instance]]
            address = "db1:3306"
            running = true
            group = 4
            primary = true

            [[instance]]
            address = "db2:3306"
            "#,
        )
        .unwrap();

        let db1 = fleet.instance(&addr("db1:3306")).unwrap();
        assert_eq!(db1.group, Some(4));
        assert!(!fleet.instance(&addr("db2:3306")).unwrap().running);
        assert_eq!(fleet.new_group(), 5);

        let reparsed = SimulatedFleet::from_toml(&fleet.to_toml().unwrap()).unwrap();
        assert_eq!(reparsed.instance(&addr("db1:3306")), Some(db1));
    }
}
