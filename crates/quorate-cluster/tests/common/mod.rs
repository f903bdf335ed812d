// Copyright 2024 The Quorate Authors
// SPDX-License-Identifier: Apache-2.0

//! Shared fixtures for the engine integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use quorate_cluster::{AdminEngine, OperationOptions, SimulatedFleet};
use quorate_core::{EngineConfig, InstanceAddress, Topology};
use quorate_metadata::{InMemoryMetadataStore, MetadataStore};

pub fn addr(s: &str) -> InstanceAddress {
    s.parse().unwrap()
}

pub fn config() -> EngineConfig {
    EngineConfig { session_timeout_ms: 200, ..EngineConfig::default() }
        .probe_timeout(Duration::from_millis(200))
        .rejoin_timeout(Duration::from_millis(300))
        .missing_after(Duration::ZERO)
}

pub struct Harness {
    pub fleet: SimulatedFleet,
    pub store: Arc<dyn MetadataStore>,
    pub engine: AdminEngine,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_store(Arc::new(InMemoryMetadataStore::new()))
    }

    pub fn with_store(store: Arc<dyn MetadataStore>) -> Self {
        Self::with_config(config(), store)
    }

    pub fn with_config(config: EngineConfig, store: Arc<dyn MetadataStore>) -> Self {
        let fleet = SimulatedFleet::new();
        let engine = AdminEngine::new(
            config,
            Arc::clone(&store),
            Arc::new(fleet.clone()),
            Arc::new(fleet.clone()),
        );
        Self { fleet, store, engine }
    }

    /// Creates cluster `name` on the first address and adds the rest through
    /// the engine.
    pub async fn cluster(&self, name: &str, members: &[&str]) -> Vec<InstanceAddress> {
        let addresses: Vec<InstanceAddress> = members.iter().map(|m| addr(m)).collect();
        for address in &addresses {
            self.fleet.add_instance(address);
        }

        let seed = self.fleet.session(&addresses[0]);
        self.engine.create_cluster(&seed, name, &OperationOptions::new()).await.unwrap();
        for address in &addresses[1..] {
            self.engine
                .add_instance(&seed, Some(name), address, &OperationOptions::new())
                .await
                .unwrap();
        }
        addresses
    }

    /// Builds `dev` with three members: db1 (primary), db2, db3.
    pub async fn three_node(&self) -> (InstanceAddress, InstanceAddress, InstanceAddress) {
        let members = self.cluster("dev", &["db1:3306", "db2:3306", "db3:3306"]).await;
        (members[0].clone(), members[1].clone(), members[2].clone())
    }

    pub async fn stored(&self, name: &str) -> Topology {
        self.store.load_topology(name).await.unwrap()
    }
}
