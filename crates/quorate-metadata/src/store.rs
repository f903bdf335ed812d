// Copyright 2024 The Quorate Authors
// SPDX-License-Identifier: Apache-2.0

//! The metadata store boundary.
//!
//! The engine treats the store as transactional per call: every method either
//! applies completely or not at all. Records are keyed by cluster id; names are
//! expected to be unique but the store reports duplicates instead of picking
//! one.

use async_trait::async_trait;
use quorate_core::{Error, Topology};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Result type for metadata store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Errors returned by metadata stores.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// No record matched.
    #[error("no metadata for cluster '{name}'")]
    NotFound {
        /// Requested cluster name (empty for a default lookup).
        name: String,
    },

    /// Several records matched.
    #[error("cluster name '{name}' matches {count} records")]
    Ambiguous {
        /// Requested cluster name (empty for a default lookup).
        name: String,
        /// Number of matching records.
        count: usize,
    },

    /// A record with the same name already exists.
    #[error("cluster '{name}' already exists")]
    AlreadyExists {
        /// Cluster name.
        name: String,
    },

    /// The stored epoch differs from the caller's.
    #[error("epoch conflict: expected {expected}, found {actual}")]
    EpochConflict {
        /// Epoch the caller loaded.
        expected: u64,
        /// Epoch currently stored.
        actual: u64,
    },

    /// Underlying database failure.
    #[error("database error: {0}")]
    Database(String),

    /// Record encoding failure.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<StoreError> for Error {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound { name } => Error::MetadataNotFound(name),
            StoreError::Ambiguous { name, count } => Error::MetadataAmbiguous { name, count },
            StoreError::EpochConflict { expected, actual } => {
                Error::PersistenceConflict { expected_epoch: expected, actual_epoch: actual }
            }
            other => Error::Storage(other.to_string()),
        }
    }
}

/// Summary of one stored cluster record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterSummary {
    /// Cluster name.
    pub name: String,
    /// Cluster id.
    pub cluster_id: Uuid,
    /// Stored epoch.
    pub epoch: u64,
    /// Number of declared members.
    pub members: usize,
}

impl From<&Topology> for ClusterSummary {
    fn from(t: &Topology) -> Self {
        Self {
            name: t.cluster_name.clone(),
            cluster_id: t.cluster_id,
            epoch: t.epoch,
            members: t.declared_total(),
        }
    }
}

/// Persistence of the authoritative member list.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Loads the record whose name is `cluster_name`.
    async fn load_topology(&self, cluster_name: &str) -> StoreResult<Topology>;

    /// Loads the only stored record; used when the caller names no cluster.
    async fn load_default(&self) -> StoreResult<Topology>;

    /// Replaces the record with id `topology.cluster_id` if its stored epoch
    /// equals `expected_epoch`. The stored copy gets epoch `expected_epoch + 1`,
    /// which is returned.
    async fn save_topology(&self, topology: &Topology, expected_epoch: u64) -> StoreResult<u64>;

    /// Inserts a new record. Fails if a record with the same name exists.
    async fn create_topology(&self, topology: &Topology) -> StoreResult<()>;

    /// Deletes the record named `cluster_name` if its stored epoch equals
    /// `expected_epoch`.
    async fn drop_topology(&self, cluster_name: &str, expected_epoch: u64) -> StoreResult<()>;

    /// Lists every stored record.
    async fn list_clusters(&self) -> StoreResult<Vec<ClusterSummary>>;
}

/// Picks exactly one record out of the candidates matching a lookup.
pub(crate) fn single_match(name: &str, mut matches: Vec<Topology>) -> StoreResult<Topology> {
    match matches.len() {
        0 => Err(StoreError::NotFound { name: name.to_string() }),
        1 => Ok(matches.remove(0)),
        count => Err(StoreError::Ambiguous { name: name.to_string(), count }),
    }
}

/// Fails unless `stored` is still at `expected_epoch`.
pub(crate) fn check_epoch(stored: &Topology, expected_epoch: u64) -> StoreResult<()> {
    if stored.epoch != expected_epoch {
        return Err(StoreError::EpochConflict { expected: expected_epoch, actual: stored.epoch });
    }
    Ok(())
}

/// Builds the record stored by a successful save.
pub(crate) fn next_revision(
    stored: &Topology,
    incoming: &Topology,
    expected_epoch: u64,
) -> StoreResult<Topology> {
    check_epoch(stored, expected_epoch)?;
    let mut next = incoming.clone();
    next.epoch = expected_epoch + 1;
    Ok(next)
}
