//! SQLite-backed index store
//!
//! Maps the bucket hierarchy onto two tables keyed by
//! `(partition_key, shard, tenant, ...)`:
//!
//! ```text
//! index_blocks:  (partition_key, shard, tenant, block_id)     → bincode(BlockMeta)
//! index_strings: (partition_key, shard, tenant, start_offset) → encoded string range
//! ```
//!
//! A partition, shard or tenant exists as long as any row references it.
//! Transactions belong to the caller: every method runs against the
//! connection (or `rusqlite::Transaction`) it is given.

use crate::block::BlockMeta;
use crate::index::PartitionKey;
use crate::storage::encoding::{decode_block, decode_strings, encode_block, encode_strings};
use crate::storage::error::StorageResult;
use crate::storage::store::{Store, StringRange};
use rusqlite::{params, Connection, OpenFlags};
use std::path::Path;

const CREATE_BUCKETS: &str = "
    CREATE TABLE IF NOT EXISTS index_blocks (
        partition_key TEXT NOT NULL,
        shard INTEGER NOT NULL,
        tenant TEXT NOT NULL,
        block_id TEXT NOT NULL,
        meta BLOB NOT NULL,
        PRIMARY KEY (partition_key, shard, tenant, block_id)
    ) WITHOUT ROWID;

    CREATE TABLE IF NOT EXISTS index_strings (
        partition_key TEXT NOT NULL,
        shard INTEGER NOT NULL,
        tenant TEXT NOT NULL,
        start_offset INTEGER NOT NULL,
        strings BLOB NOT NULL,
        PRIMARY KEY (partition_key, shard, tenant, start_offset)
    ) WITHOUT ROWID;
";

/// Open (or create) an index database
pub fn open_database(path: &Path) -> StorageResult<Connection> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )?;

    conn.execute_batch(
        "
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA cache_size = 10000;
        PRAGMA temp_store = MEMORY;
        ",
    )?;

    Ok(conn)
}

/// Index store over SQLite tables
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteStore;

impl SqliteStore {
    pub fn new() -> Self {
        Self
    }
}

fn record_key(partition: &PartitionKey, shard: u32, tenant: &str, name: &str) -> String {
    format!("{}/{}/{}/{}", partition, shard, tenant, name)
}

impl Store for SqliteStore {
    fn create_buckets(&self, tx: &Connection) -> StorageResult<()> {
        tx.execute_batch(CREATE_BUCKETS)?;
        Ok(())
    }

    fn store_block(
        &self,
        tx: &Connection,
        partition: &PartitionKey,
        shard: u32,
        tenant: &str,
        block: &BlockMeta,
    ) -> StorageResult<()> {
        let value = encode_block(block)?;
        let mut stmt = tx.prepare_cached(
            "INSERT OR REPLACE INTO index_blocks (partition_key, shard, tenant, block_id, meta)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )?;
        stmt.execute(params![partition.as_str(), shard, tenant, block.id, value])?;
        Ok(())
    }

    fn store_strings(
        &self,
        tx: &Connection,
        partition: &PartitionKey,
        shard: u32,
        tenant: &str,
        offset: u32,
        strings: &[String],
    ) -> StorageResult<()> {
        let value = encode_strings(strings);
        let mut stmt = tx.prepare_cached(
            "INSERT OR REPLACE INTO index_strings (partition_key, shard, tenant, start_offset, strings)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )?;
        stmt.execute(params![partition.as_str(), shard, tenant, offset, value])?;
        Ok(())
    }

    fn load_strings(
        &self,
        tx: &Connection,
        partition: &PartitionKey,
        shard: u32,
        tenant: &str,
    ) -> StorageResult<Vec<StringRange>> {
        let mut stmt = tx.prepare_cached(
            "SELECT start_offset, strings FROM index_strings
             WHERE partition_key = ?1 AND shard = ?2 AND tenant = ?3
             ORDER BY start_offset",
        )?;
        let rows = stmt
            .query_map(params![partition.as_str(), shard, tenant], |row| {
                Ok((row.get::<_, u32>(0)?, row.get::<_, Vec<u8>>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(offset, data)| {
                let key = record_key(partition, shard, tenant, &format!("strings@{}", offset));
                Ok((offset, decode_strings(&key, &data)?))
            })
            .collect()
    }

    fn delete_block_list(
        &self,
        tx: &Connection,
        partition: &PartitionKey,
        shard: u32,
        tenant: &str,
        blocks: &[String],
    ) -> StorageResult<()> {
        let mut stmt = tx.prepare_cached(
            "DELETE FROM index_blocks
             WHERE partition_key = ?1 AND shard = ?2 AND tenant = ?3 AND block_id = ?4",
        )?;
        for id in blocks {
            stmt.execute(params![partition.as_str(), shard, tenant, id])?;
        }
        Ok(())
    }

    fn list_partitions(&self, tx: &Connection) -> StorageResult<Vec<PartitionKey>> {
        let mut stmt = tx.prepare_cached(
            "SELECT partition_key FROM index_blocks
             UNION
             SELECT partition_key FROM index_strings",
        )?;
        let keys = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(keys.into_iter().map(PartitionKey::from).collect())
    }

    fn list_shards(&self, tx: &Connection, partition: &PartitionKey) -> StorageResult<Vec<u32>> {
        let mut stmt = tx.prepare_cached(
            "SELECT shard FROM index_blocks WHERE partition_key = ?1
             UNION
             SELECT shard FROM index_strings WHERE partition_key = ?1
             ORDER BY shard",
        )?;
        let shards = stmt
            .query_map(params![partition.as_str()], |row| row.get::<_, u32>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(shards)
    }

    fn list_tenants(
        &self,
        tx: &Connection,
        partition: &PartitionKey,
        shard: u32,
    ) -> StorageResult<Vec<String>> {
        let mut stmt = tx.prepare_cached(
            "SELECT tenant FROM index_blocks WHERE partition_key = ?1 AND shard = ?2
             UNION
             SELECT tenant FROM index_strings WHERE partition_key = ?1 AND shard = ?2
             ORDER BY tenant",
        )?;
        let tenants = stmt
            .query_map(params![partition.as_str(), shard], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(tenants)
    }

    fn list_blocks(
        &self,
        tx: &Connection,
        partition: &PartitionKey,
        shard: u32,
        tenant: &str,
    ) -> StorageResult<Vec<BlockMeta>> {
        let mut stmt = tx.prepare_cached(
            "SELECT block_id, meta FROM index_blocks
             WHERE partition_key = ?1 AND shard = ?2 AND tenant = ?3
             ORDER BY block_id",
        )?;
        let rows = stmt
            .query_map(params![partition.as_str(), shard, tenant], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, Vec<u8>>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(id, data)| decode_block(&record_key(partition, shard, tenant, &id), &data))
            .collect()
    }

    fn delete_shard(
        &self,
        tx: &Connection,
        partition: &PartitionKey,
        shard: u32,
        tenant: &str,
    ) -> StorageResult<()> {
        for table in ["index_blocks", "index_strings"] {
            let mut stmt = tx.prepare_cached(&format!(
                "DELETE FROM {} WHERE partition_key = ?1 AND shard = ?2 AND tenant = ?3",
                table
            ))?;
            stmt.execute(params![partition.as_str(), shard, tenant])?;
        }
        Ok(())
    }

    fn delete_partition(&self, tx: &Connection, partition: &PartitionKey) -> StorageResult<()> {
        for table in ["index_blocks", "index_strings"] {
            let mut stmt =
                tx.prepare_cached(&format!("DELETE FROM {} WHERE partition_key = ?1", table))?;
            stmt.execute(params![partition.as_str()])?;
        }
        Ok(())
    }
}
