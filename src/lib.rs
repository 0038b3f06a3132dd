//! # Metaindex
//!
//! Partitioned block metadata index: tracks immutable data blocks per
//! tenant, shard and time window, and answers label-filtered range queries
//! over their datasets.
//!
//! ## Features
//!
//! - **Time partitions**: blocks are bucketed by the time embedded in their ULID
//! - **Shared string tables**: block strings are interned per tenant shard
//! - **Bounded cache**: a few partitions per tenant stay in memory, current ones always
//! - **Selector queries**: Prometheus-style label matchers over dataset labels
//! - **Retention**: tenant data is dropped once its partition ages out
//!
//! ## Modules
//!
//! - [`block`]: block metadata records, IDs and string tables
//! - [`index`]: partitions, shards, cache and the `Index` itself
//! - [`query`]: selector parsing and query execution
//! - [`storage`]: the store interface and its SQLite implementation
//! - [`config`]: file and environment configuration
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use metaindex::block::{BlockIdGenerator, BlockList, BlockMeta};
//! use metaindex::index::{Index, IndexConfig};
//! use metaindex::query::MetadataQuery;
//! use metaindex::storage::{open_database, SqliteStore};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut conn = open_database("index.db".as_ref())?;
//!     let index = Index::new(SqliteStore::new(), IndexConfig::default());
//!     index.init(&conn)?;
//!     index.restore(&conn)?;
//!
//!     let ids = BlockIdGenerator::new();
//!     let block = BlockMeta {
//!         id: ids.generate()?,
//!         string_table: vec!["".into(), "tenant-a".into()],
//!         tenant: 1,
//!         shard: 1,
//!         ..Default::default()
//!     };
//!     let tx = conn.transaction()?;
//!     index.insert_block(&tx, block.clone())?;
//!     tx.commit()?;
//!
//!     let found = index.find_blocks(&conn, &BlockList::new("tenant-a", 1, vec![block.id]))?;
//!     println!("Found {} blocks", found.len());
//!
//!     let query = MetadataQuery::new(r#"{service_name="api"}"#, 0, i64::MAX).tenant("tenant-a");
//!     let blocks = index.query_metadata(&conn, &query)?;
//!     println!("Matched {} blocks", blocks.len());
//!
//!     Ok(())
//! }
//! ```

pub mod block;
pub mod config;
pub mod index;
pub mod query;
pub mod storage;

#[cfg(test)]
mod testing;

// Re-export top-level types for convenience
pub use block::{BlockIdGenerator, BlockList, BlockMeta, CompactedBlocks, Dataset, TenantStats};

pub use index::{Index, IndexConfig, IndexError, IndexResult, PartitionKey, PartitionMeta};

pub use query::{MetadataQuery, QueryError};

pub use storage::{open_database, SqliteStore, StorageError, StorageResult, Store};

pub use config::{Config, ConfigError};
