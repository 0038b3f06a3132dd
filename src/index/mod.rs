//! Metadata Index
//!
//! Tracks block metadata in time partitions:
//!
//! - **Partition**: fixed-size time buckets keyed as `<time>.<duration>`
//! - **Shard**: blocks of one `(partition, shard, tenant)` with a shared string table
//! - **Cache**: loaded partitions per tenant, bounded and protected near "now"
//! - **Retention**: policies deciding which tenant data to drop
//!
//! # Architecture
//!
//! ```text
//! Index
//!   partitions: [20240922.1d, 20240923.1d, ...]   (sorted, tenants per partition)
//!   cache:      (20240923.1d, tenant-a) -> shards {1: IndexShard, 2: IndexShard}
//!        ↓
//! Store (SQLite): partition → shard → tenant → block records + string ranges
//! ```

mod cache;
mod error;
mod manager;
mod partition;
mod retention;
mod shard;

pub use cache::{CacheKey, IndexPartition, PartitionCache, PROTECTION_WINDOW};
pub use error::{IndexError, IndexResult};
pub use manager::{Index, IndexConfig};
pub use partition::{PartitionKey, PartitionMeta};
pub use retention::{RetentionPolicy, TimeBasedRetentionPolicy, Tombstone};
pub use shard::{IndexShard, ShardKey};
