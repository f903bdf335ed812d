// Copyright 2024 The Quorate Authors
// SPDX-License-Identifier: Apache-2.0

//! In-memory metadata store.

use std::collections::HashMap;

use async_trait::async_trait;
use quorate_core::Topology;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::store::{
    check_epoch, next_revision, single_match, ClusterSummary, MetadataStore, StoreError,
    StoreResult,
};

/// Metadata store holding records in process memory.
#[derive(Debug, Default)]
pub struct InMemoryMetadataStore {
    records: RwLock<HashMap<Uuid, Topology>>,
}

impl InMemoryMetadataStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a record as-is, without the name uniqueness check.
    ///
    /// Used to import records written by other tools, which may disagree with
    /// each other.
    pub async fn import(&self, topology: Topology) {
        self.records.write().await.insert(topology.cluster_id, topology);
    }

    /// Number of stored records.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    /// Returns true if the store holds no record.
    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl MetadataStore for InMemoryMetadataStore {
    async fn load_topology(&self, cluster_name: &str) -> StoreResult<Topology> {
        let records = self.records.read().await;
        let matches =
            records.values().filter(|t| t.cluster_name == cluster_name).cloned().collect();
        single_match(cluster_name, matches)
    }

    async fn load_default(&self) -> StoreResult<Topology> {
        let records = self.records.read().await;
        single_match("", records.values().cloned().collect())
    }

    async fn save_topology(&self, topology: &Topology, expected_epoch: u64) -> StoreResult<u64> {
        let mut records = self.records.write().await;
        let stored = records
            .get(&topology.cluster_id)
            .ok_or_else(|| StoreError::NotFound { name: topology.cluster_name.clone() })?;

        let next = next_revision(stored, topology, expected_epoch)?;
        let epoch = next.epoch;
        records.insert(next.cluster_id, next);

        debug!(cluster = %topology.cluster_name, epoch, "Saved topology");
        Ok(epoch)
    }

    async fn create_topology(&self, topology: &Topology) -> StoreResult<()> {
        let mut records = self.records.write().await;
        if records.values().any(|t| t.cluster_name == topology.cluster_name) {
            return Err(StoreError::AlreadyExists { name: topology.cluster_name.clone() });
        }
        records.insert(topology.cluster_id, topology.clone());
        Ok(())
    }

    async fn drop_topology(&self, cluster_name: &str, expected_epoch: u64) -> StoreResult<()> {
        let mut records = self.records.write().await;
        let matches: Vec<Topology> =
            records.values().filter(|t| t.cluster_name == cluster_name).cloned().collect();
        let target = single_match(cluster_name, matches)?;
        check_epoch(&target, expected_epoch)?;
        records.remove(&target.cluster_id);
        Ok(())
    }

    async fn list_clusters(&self) -> StoreResult<Vec<ClusterSummary>> {
        let records = self.records.read().await;
        let mut summaries: Vec<ClusterSummary> = records.values().map(Into::into).collect();
        summaries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(summaries)
    }
}

#[cfg(test)]
mod tests {
    use quorate_core::{Member, MemberRole};

    use super::*;

    fn topology(name: &str) -> Topology {
        Topology::new(name)
            .with_member(Member::new("a:3306".parse().unwrap(), MemberRole::PrimaryCandidate))
            .with_member(Member::new("b:3306".parse().unwrap(), MemberRole::Secondary))
    }

    #[tokio::test]
    async fn test_save_then_load_round_trip() {
        let store = InMemoryMetadataStore::new();
        let original = topology("dev");
        store.create_topology(&original).await.unwrap();

        let epoch = store.save_topology(&original, original.epoch).await.unwrap();
        assert_eq!(epoch, original.epoch + 1);

        let loaded = store.load_topology("dev").await.unwrap();
        assert_eq!(loaded.members, original.members);
        assert_eq!(loaded.cluster_id, original.cluster_id);
        assert_eq!(loaded.epoch, original.epoch + 1);
    }

    #[tokio::test]
    async fn test_stale_epoch_rejected() {
        let store = InMemoryMetadataStore::new();
        let original = topology("dev");
        store.create_topology(&original).await.unwrap();
        store.save_topology(&original, 1).await.unwrap();

        let err = store.save_topology(&original, 1).await.unwrap_err();
        assert!(matches!(err, StoreError::EpochConflict { expected: 1, actual: 2 }));
    }

    #[tokio::test]
    async fn test_create_rejects_duplicate_name() {
        let store = InMemoryMetadataStore::new();
        store.create_topology(&topology("dev")).await.unwrap();
        let err = store.create_topology(&topology("dev")).await.unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists { .. }));
    }

    #[tokio::test]
    async fn test_default_lookup() {
        let store = InMemoryMetadataStore::new();
        assert!(matches!(store.load_default().await, Err(StoreError::NotFound { .. })));

        store.create_topology(&topology("dev")).await.unwrap();
        assert_eq!(store.load_default().await.unwrap().cluster_name, "dev");

        store.create_topology(&topology("prod")).await.unwrap();
        assert!(matches!(store.load_default().await, Err(StoreError::Ambiguous { count: 2, .. })));
    }

    #[tokio::test]
    async fn test_imported_duplicates_are_ambiguous() {
        let store = InMemoryMetadataStore::new();
        store.import(topology("dev")).await;
        store.import(topology("dev")).await;

        let err = store.load_topology("dev").await.unwrap_err();
        assert!(matches!(err, StoreError::Ambiguous { count: 2, .. }));
    }

    #[tokio::test]
    async fn test_drop_and_list() {
        let store = InMemoryMetadataStore::new();
        store.create_topology(&topology("prod")).await.unwrap();
        store.create_topology(&topology("dev")).await.unwrap();

        let names: Vec<String> =
            store.list_clusters().await.unwrap().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["dev", "prod"]);

        store.drop_topology("dev", 1).await.unwrap();
        assert_eq!(store.len().await, 1);
        assert!(matches!(store.drop_topology("dev", 1).await, Err(StoreError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_drop_after_concurrent_save_rejected() {
        let store = InMemoryMetadataStore::new();
        let original = topology("dev");
        store.create_topology(&original).await.unwrap();
        store.save_topology(&original, 1).await.unwrap();

        let err = store.drop_topology("dev", 1).await.unwrap_err();
        assert!(matches!(err, StoreError::EpochConflict { expected: 1, actual: 2 }));
        assert_eq!(store.len().await, 1);
    }
}
