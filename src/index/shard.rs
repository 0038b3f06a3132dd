//! Tenant shards
//!
//! An `IndexShard` holds the blocks of one `(partition, shard, tenant)` triple
//! together with the shard's cumulative string table. Blocks are kept with
//! their references rewritten to shard offsets; reads export them back into
//! self-contained records.

use crate::block::{BlockMeta, StringTable};
use crate::index::error::IndexResult;
use crate::index::partition::PartitionKey;
use crate::storage::Store;
use rusqlite::Connection;
use std::collections::HashMap;
use tracing::debug;

/// Identity of a tenant shard
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShardKey {
    pub partition: PartitionKey,
    pub shard: u32,
    pub tenant: String,
}

impl ShardKey {
    pub fn new(partition: PartitionKey, shard: u32, tenant: impl Into<String>) -> Self {
        Self {
            partition,
            shard,
            tenant: tenant.into(),
        }
    }
}

/// Blocks of a single tenant shard within a partition
#[derive(Debug, Clone)]
pub struct IndexShard {
    key: ShardKey,
    blocks: HashMap<String, BlockMeta>,
    strings: StringTable,
    /// Length of the table prefix present in the store
    persisted: usize,
    min_time: i64,
    max_time: i64,
}

impl IndexShard {
    pub fn new(key: ShardKey) -> Self {
        Self {
            key,
            blocks: HashMap::new(),
            strings: StringTable::new(),
            persisted: 1,
            min_time: i64::MAX,
            max_time: i64::MIN,
        }
    }

    /// Load a shard from the store: blocks, then their strings.
    ///
    /// Returns `None` when the store holds no blocks for it. A shard whose
    /// blocks only reference `""` has no persisted strings.
    pub fn load<S: Store + ?Sized>(
        tx: &Connection,
        store: &S,
        key: ShardKey,
    ) -> IndexResult<Option<Self>> {
        let blocks = store.list_blocks(tx, &key.partition, key.shard, &key.tenant)?;
        if blocks.is_empty() {
            return Ok(None);
        }
        let ranges = store.load_strings(tx, &key.partition, key.shard, &key.tenant)?;

        let mut shard = Self::new(key);
        shard.strings.load(ranges)?;
        shard.persisted = shard.strings.len();
        for block in blocks {
            shard.widen(&block);
            shard.blocks.insert(block.id.clone(), block);
        }

        debug!(
            partition = %shard.key.partition,
            shard = shard.key.shard,
            tenant = %shard.key.tenant,
            blocks = shard.blocks.len(),
            strings = shard.strings.len(),
            "Loaded shard"
        );
        Ok(Some(shard))
    }

    pub fn key(&self) -> &ShardKey {
        &self.key
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Earliest block start, `i64::MAX` while empty
    pub fn min_time(&self) -> i64 {
        self.min_time
    }

    /// Latest block end, `i64::MIN` while empty
    pub fn max_time(&self) -> i64 {
        self.max_time
    }

    pub fn strings(&self) -> &StringTable {
        &self.strings
    }

    pub fn contains(&self, id: &str) -> bool {
        self.blocks.contains_key(id)
    }

    /// Whether any block of the shard may overlap `[start, end]`
    pub fn overlaps(&self, start: i64, end: i64) -> bool {
        self.min_time <= end && self.max_time >= start
    }

    /// Stored blocks, references still in shard offsets
    pub(crate) fn raw_blocks(&self) -> impl Iterator<Item = &BlockMeta> {
        self.blocks.values()
    }

    /// Insert a block and persist it. Returns `false` if the ID is already
    /// present; nothing is written in that case.
    pub fn insert<S: Store + ?Sized>(
        &mut self,
        tx: &Connection,
        store: &S,
        mut block: BlockMeta,
    ) -> IndexResult<bool> {
        if self.blocks.contains_key(&block.id) {
            return Ok(false);
        }

        let n = self.strings.len();
        self.strings.import(&mut block);
        if let Err(e) = self.persist(tx, store, &block) {
            self.strings.truncate(n);
            return Err(e);
        }
        self.persisted = self.strings.len();

        self.widen(&block);
        self.blocks.insert(block.id.clone(), block);
        Ok(true)
    }

    fn persist<S: Store + ?Sized>(
        &self,
        tx: &Connection,
        store: &S,
        block: &BlockMeta,
    ) -> IndexResult<()> {
        let key = &self.key;
        // Also covers strings added by earlier in-memory inserts.
        let offset = self.persisted;
        if self.strings.len() > offset {
            store.store_strings(
                tx,
                &key.partition,
                key.shard,
                &key.tenant,
                offset as u32,
                &self.strings.strings()[offset..],
            )?;
        }
        store.store_block(tx, &key.partition, key.shard, &key.tenant, block)?;
        Ok(())
    }

    /// Insert a block in memory only. Returns `false` if the ID is present.
    ///
    /// New strings stay unpersisted until the next checked `insert`, which
    /// writes them together with its own.
    pub fn insert_in_memory(&mut self, mut block: BlockMeta) -> bool {
        if self.blocks.contains_key(&block.id) {
            return false;
        }
        self.strings.import(&mut block);
        self.widen(&block);
        self.blocks.insert(block.id.clone(), block);
        true
    }

    /// A copy of the block with its own string table
    pub fn get(&self, id: &str) -> Option<BlockMeta> {
        let mut block = self.blocks.get(id)?.clone();
        self.strings.export(&mut block);
        Some(block)
    }

    /// Remove blocks from memory. Time bounds are left as they are.
    pub fn delete(&mut self, ids: &[String]) {
        for id in ids {
            self.blocks.remove(id);
        }
    }

    fn widen(&mut self, block: &BlockMeta) {
        self.min_time = self.min_time.min(block.min_time);
        self.max_time = self.max_time.max(block.max_time);
    }
}
