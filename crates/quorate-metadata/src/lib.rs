// Copyright 2024 The Quorate Authors
// SPDX-License-Identifier: Apache-2.0

//! Metadata stores for Quorate.
//!
//! The metadata is the authoritative record of which instances belong to a
//! cluster. Two stores are provided:
//! - [`InMemoryMetadataStore`] for tests and simulations
//! - [`RedbMetadataStore`] persisting records in a redb file

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod memory;
pub mod redb_store;
pub mod store;

pub use memory::InMemoryMetadataStore;
pub use redb_store::RedbMetadataStore;
pub use store::{ClusterSummary, MetadataStore, StoreError, StoreResult};
