//! Store interface
//!
//! The narrow contract the index uses against the durable key-value store.
//! Every method takes the caller's transaction; the store owns the bucket
//! hierarchy (`partition → shard → tenant → block`) and the record encoding.
//!
//! A bucket that does not exist reads as empty.

use crate::block::BlockMeta;
use crate::index::PartitionKey;
use crate::storage::error::StorageResult;
use rusqlite::Connection;

/// A persisted range of shard strings starting at `offset`
pub type StringRange = (u32, Vec<String>);

/// Durable storage of the index
pub trait Store: Send + Sync {
    /// Create the top-level buckets
    fn create_buckets(&self, tx: &Connection) -> StorageResult<()>;

    /// Persist a block whose string references point into the shard table
    fn store_block(
        &self,
        tx: &Connection,
        partition: &PartitionKey,
        shard: u32,
        tenant: &str,
        block: &BlockMeta,
    ) -> StorageResult<()>;

    /// Persist strings appended to a shard table, starting at `offset`
    fn store_strings(
        &self,
        tx: &Connection,
        partition: &PartitionKey,
        shard: u32,
        tenant: &str,
        offset: u32,
        strings: &[String],
    ) -> StorageResult<()>;

    /// Load every persisted string range of a shard in offset order
    fn load_strings(
        &self,
        tx: &Connection,
        partition: &PartitionKey,
        shard: u32,
        tenant: &str,
    ) -> StorageResult<Vec<StringRange>>;

    /// Delete blocks of a shard
    fn delete_block_list(
        &self,
        tx: &Connection,
        partition: &PartitionKey,
        shard: u32,
        tenant: &str,
        blocks: &[String],
    ) -> StorageResult<()>;

    /// List all partitions
    fn list_partitions(&self, tx: &Connection) -> StorageResult<Vec<PartitionKey>>;

    /// List the shards of a partition
    fn list_shards(&self, tx: &Connection, partition: &PartitionKey) -> StorageResult<Vec<u32>>;

    /// List the tenants of a partition shard
    fn list_tenants(
        &self,
        tx: &Connection,
        partition: &PartitionKey,
        shard: u32,
    ) -> StorageResult<Vec<String>>;

    /// Load every block of a tenant shard
    fn list_blocks(
        &self,
        tx: &Connection,
        partition: &PartitionKey,
        shard: u32,
        tenant: &str,
    ) -> StorageResult<Vec<BlockMeta>>;

    /// Delete a tenant shard with all its blocks and strings
    fn delete_shard(
        &self,
        tx: &Connection,
        partition: &PartitionKey,
        shard: u32,
        tenant: &str,
    ) -> StorageResult<()>;

    /// Delete a partition with everything in it
    fn delete_partition(&self, tx: &Connection, partition: &PartitionKey) -> StorageResult<()>;
}
