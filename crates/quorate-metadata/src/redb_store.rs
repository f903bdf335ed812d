// Copyright 2024 The Quorate Authors
// SPDX-License-Identifier: Apache-2.0

//! Redb-backed metadata store.
//!
//! One table maps the cluster id (hyphenated string) to a bincode-encoded
//! [`Topology`]. Name lookups scan the table; a metadata file holds a handful
//! of clusters at most. Transactions run on the blocking pool.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use quorate_core::Topology;
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use tracing::{debug, info};

use crate::store::{
    check_epoch, next_revision, single_match, ClusterSummary, MetadataStore, StoreError,
    StoreResult,
};

/// Key: cluster id, Value: bincode-serialized Topology.
const CLUSTERS_TABLE: TableDefinition<'static, &'static str, &'static [u8]> =
    TableDefinition::new("clusters");

impl StoreError {
    fn from_redb<E: std::error::Error>(e: E) -> Self {
        StoreError::Database(e.to_string())
    }

    fn from_bincode(e: bincode::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

fn encode(topology: &Topology) -> StoreResult<Vec<u8>> {
    bincode::serialize(topology).map_err(StoreError::from_bincode)
}

fn decode(bytes: &[u8]) -> StoreResult<Topology> {
    bincode::deserialize(bytes).map_err(StoreError::from_bincode)
}

/// Metadata store persisted in a redb file.
pub struct RedbMetadataStore {
    db: Arc<Database>,
}

impl std::fmt::Debug for RedbMetadataStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbMetadataStore").finish_non_exhaustive()
    }
}

impl RedbMetadataStore {
    /// Opens or creates the metadata file at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or created.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        let db = Database::create(path).map_err(StoreError::from_redb)?;

        let write_txn = db.begin_write().map_err(StoreError::from_redb)?;
        {
            let _ = write_txn.open_table(CLUSTERS_TABLE).map_err(StoreError::from_redb)?;
        }
        write_txn.commit().map_err(StoreError::from_redb)?;

        info!(path = %path.display(), "Opened metadata store");
        Ok(Self { db: Arc::new(db) })
    }

    /// Runs a blocking database closure on the blocking pool.
    async fn with_db<T, F>(&self, f: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Database) -> StoreResult<T> + Send + 'static,
    {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || f(&db)).await.map_err(StoreError::from_redb)?
    }
}

fn read_all(db: &Database) -> StoreResult<Vec<Topology>> {
    let read_txn = db.begin_read().map_err(StoreError::from_redb)?;
    let table = read_txn.open_table(CLUSTERS_TABLE).map_err(StoreError::from_redb)?;

    let mut records = Vec::new();
    for entry in table.iter().map_err(StoreError::from_redb)? {
        let (_, value) = entry.map_err(StoreError::from_redb)?;
        records.push(decode(value.value())?);
    }
    Ok(records)
}

/// Records in `table` named `cluster_name`.
fn named<T: ReadableTable<&'static str, &'static [u8]>>(
    table: &T,
    cluster_name: &str,
) -> StoreResult<Vec<Topology>> {
    let mut matches = Vec::new();
    for entry in table.iter().map_err(StoreError::from_redb)? {
        let (_, value) = entry.map_err(StoreError::from_redb)?;
        let topology = decode(value.value())?;
        if topology.cluster_name == cluster_name {
            matches.push(topology);
        }
    }
    Ok(matches)
}

#[async_trait]
impl MetadataStore for RedbMetadataStore {
    async fn load_topology(&self, cluster_name: &str) -> StoreResult<Topology> {
        let name = cluster_name.to_string();
        self.with_db(move |db| {
            let read_txn = db.begin_read().map_err(StoreError::from_redb)?;
            let table = read_txn.open_table(CLUSTERS_TABLE).map_err(StoreError::from_redb)?;
            single_match(&name, named(&table, &name)?)
        })
        .await
    }

    async fn load_default(&self) -> StoreResult<Topology> {
        self.with_db(|db| single_match("", read_all(db)?)).await
    }

    async fn save_topology(&self, topology: &Topology, expected_epoch: u64) -> StoreResult<u64> {
        let incoming = topology.clone();

        let epoch = self
            .with_db(move |db| {
                let key = incoming.cluster_id.to_string();
                let write_txn = db.begin_write().map_err(StoreError::from_redb)?;
                let epoch = {
                    let mut table =
                        write_txn.open_table(CLUSTERS_TABLE).map_err(StoreError::from_redb)?;
                    let stored = match table.get(key.as_str()).map_err(StoreError::from_redb)? {
                        Some(value) => decode(value.value())?,
                        None => {
                            return Err(StoreError::NotFound { name: incoming.cluster_name.clone() })
                        }
                    };

                    let next = next_revision(&stored, &incoming, expected_epoch)?;
                    let bytes = encode(&next)?;
                    table.insert(key.as_str(), bytes.as_slice()).map_err(StoreError::from_redb)?;
                    next.epoch
                };
                write_txn.commit().map_err(StoreError::from_redb)?;
                Ok(epoch)
            })
            .await?;

        debug!(cluster = %topology.cluster_name, epoch, "Saved topology");
        Ok(epoch)
    }

    async fn create_topology(&self, topology: &Topology) -> StoreResult<()> {
        let key = topology.cluster_id.to_string();
        let name = topology.cluster_name.clone();
        let bytes = encode(topology)?;

        self.with_db(move |db| {
            let write_txn = db.begin_write().map_err(StoreError::from_redb)?;
            {
                let mut table =
                    write_txn.open_table(CLUSTERS_TABLE).map_err(StoreError::from_redb)?;
                if !named(&table, &name)?.is_empty() {
                    return Err(StoreError::AlreadyExists { name });
                }
                table.insert(key.as_str(), bytes.as_slice()).map_err(StoreError::from_redb)?;
            }
            write_txn.commit().map_err(StoreError::from_redb)
        })
        .await?;

        info!(cluster = %topology.cluster_name, id = %topology.cluster_id, "Created cluster record");
        Ok(())
    }

    async fn drop_topology(&self, cluster_name: &str, expected_epoch: u64) -> StoreResult<()> {
        let name = cluster_name.to_string();

        self.with_db(move |db| {
            let write_txn = db.begin_write().map_err(StoreError::from_redb)?;
            {
                let mut table =
                    write_txn.open_table(CLUSTERS_TABLE).map_err(StoreError::from_redb)?;
                let target = single_match(&name, named(&table, &name)?)?;
                check_epoch(&target, expected_epoch)?;
                let key = target.cluster_id.to_string();
                table.remove(key.as_str()).map_err(StoreError::from_redb)?;
            }
            write_txn.commit().map_err(StoreError::from_redb)
        })
        .await?;

        info!(cluster = %cluster_name, epoch = expected_epoch, "Dropped cluster record");
        Ok(())
    }

    async fn list_clusters(&self) -> StoreResult<Vec<ClusterSummary>> {
        let records = self.with_db(read_all).await?;
        let mut summaries: Vec<ClusterSummary> = records.iter().map(Into::into).collect();
        summaries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(summaries)
    }
}

#[cfg(test)]
mod tests {
    use quorate_core::{Member, MemberRole, MemberStatus};
    use tempfile::tempdir;

    use super::*;

    fn topology(name: &str) -> Topology {
        Topology::new(name)
            .with_member(
                Member::new("db1:3306".parse().unwrap(), MemberRole::PrimaryCandidate)
                    .with_label("db1")
                    .with_status(MemberStatus::Online),
            )
            .with_member(Member::new("db2:3306".parse().unwrap(), MemberRole::Secondary))
    }

    #[tokio::test]
    async fn test_save_then_load_round_trip() {
        let dir = tempdir().unwrap();
        let store = RedbMetadataStore::open(dir.path().join("meta.redb")).unwrap();

        let original = topology("dev");
        store.create_topology(&original).await.unwrap();
        let epoch = store.save_topology(&original, original.epoch).await.unwrap();

        let loaded = store.load_topology("dev").await.unwrap();
        assert_eq!(epoch, original.epoch + 1);
        assert_eq!(loaded.epoch, epoch);
        assert_eq!(loaded.members, original.members);
        assert_eq!(loaded.cluster_id, original.cluster_id);
    }

    #[tokio::test]
    async fn test_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("meta.redb");
        let original = topology("dev");
        {
            let store = RedbMetadataStore::open(&path).unwrap();
            store.create_topology(&original).await.unwrap();
        }

        let store = RedbMetadataStore::open(&path).unwrap();
        let loaded = store.load_default().await.unwrap();
        assert_eq!(loaded.cluster_name, "dev");
        assert_eq!(loaded.declared_total(), 2);
    }

    #[tokio::test]
    async fn test_stale_epoch_leaves_record_unchanged() {
        let dir = tempdir().unwrap();
        let store = RedbMetadataStore::open(dir.path().join("meta.redb")).unwrap();
        let original = topology("dev");
        store.create_topology(&original).await.unwrap();
        store.save_topology(&original, 1).await.unwrap();

        let mut stale = original.clone();
        stale.remove_member(&"db2:3306".parse().unwrap());
        let err = store.save_topology(&stale, 1).await.unwrap_err();
        assert!(matches!(err, StoreError::EpochConflict { expected: 1, actual: 2 }));

        let loaded = store.load_topology("dev").await.unwrap();
        assert_eq!(loaded.declared_total(), 2);
        assert_eq!(loaded.epoch, 2);
    }

    #[tokio::test]
    async fn test_create_drop_list() {
        let dir = tempdir().unwrap();
        let store = RedbMetadataStore::open(dir.path().join("meta.redb")).unwrap();

        store.create_topology(&topology("dev")).await.unwrap();
        store.create_topology(&topology("prod")).await.unwrap();
        assert!(matches!(
            store.create_topology(&topology("dev")).await,
            Err(StoreError::AlreadyExists { .. })
        ));
        assert!(matches!(store.load_default().await, Err(StoreError::Ambiguous { count: 2, .. })));

        store.drop_topology("dev", 1).await.unwrap();
        let clusters = store.list_clusters().await.unwrap();
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].name, "prod");
        assert!(matches!(store.load_topology("dev").await, Err(StoreError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_drop_with_stale_epoch_keeps_record() {
        let dir = tempdir().unwrap();
        let store = RedbMetadataStore::open(dir.path().join("meta.redb")).unwrap();
        let original = topology("dev");
        store.create_topology(&original).await.unwrap();
        store.save_topology(&original, 1).await.unwrap();

        let err = store.drop_topology("dev", 1).await.unwrap_err();
        assert!(matches!(err, StoreError::EpochConflict { expected: 1, actual: 2 }));
        assert_eq!(store.load_topology("dev").await.unwrap().epoch, 2);

        store.drop_topology("dev", 2).await.unwrap();
        assert!(store.list_clusters().await.unwrap().is_empty());
    }
}
