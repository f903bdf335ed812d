// Copyright 2024 The Quorate Authors
// SPDX-License-Identifier: Apache-2.0

//! Per-cluster advisory sections.
//!
//! Mutations hold the exclusive side for their whole duration, reads the
//! shared side. Sections are cooperative and local to this process; races
//! with other processes are caught by the metadata epoch check.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};
use tracing::trace;

/// Guard held for the duration of one operation.
#[derive(Debug)]
pub enum ClusterGuard {
    /// Shared section.
    Shared {
        /// Held until the guard drops.
        _guard: OwnedRwLockReadGuard<()>,
    },
    /// Exclusive section.
    Exclusive {
        /// Held until the guard drops.
        _guard: OwnedRwLockWriteGuard<()>,
    },
}

/// Reader/writer sections keyed by cluster name.
#[derive(Debug, Default)]
pub struct ClusterLocks {
    sections: DashMap<String, Arc<RwLock<()>>>,
}

impl ClusterGuard {
    /// Returns true for an exclusive section.
    pub fn is_exclusive(&self) -> bool {
        matches!(self, Self::Exclusive { .. })
    }
}

impl ClusterLocks {
    /// Creates an empty lock table.
    pub fn new() -> Self {
        Self::default()
    }

    fn section(&self, cluster: &str) -> Arc<RwLock<()>> {
        // Sections nobody holds or waits on are only referenced by the table.
        self.sections.retain(|name, section| name == cluster || Arc::strong_count(section) > 1);
        self.sections.entry(cluster.to_string()).or_default().clone()
    }

    /// Number of sections in the table.
    pub fn len(&self) -> usize {
        self.sections.len()
    }

    /// Returns true if the table holds no section.
    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    /// Waits for the shared section of `cluster`.
    pub async fn shared(&self, cluster: &str) -> ClusterGuard {
        trace!(cluster = %cluster, "Acquiring shared section");
        ClusterGuard::Shared { _guard: self.section(cluster).read_owned().await }
    }

    /// Waits for the exclusive section of `cluster`.
    pub async fn exclusive(&self, cluster: &str) -> ClusterGuard {
        trace!(cluster = %cluster, "Acquiring exclusive section");
        ClusterGuard::Exclusive { _guard: self.section(cluster).write_owned().await }
    }

    /// Takes the section `mutation` calls for.
    pub async fn acquire(&self, cluster: &str, mutation: bool) -> ClusterGuard {
        if mutation {
            self.exclusive(cluster).await
        } else {
            self.shared(cluster).await
        }
    }
}
