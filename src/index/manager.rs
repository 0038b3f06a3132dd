//! Index - partitioned block metadata index
//!
//! Coordinates the partition list, the partition cache and the store:
//!
//! ```text
//! insert_block(id=01J8..., tenant=a, shard=1)
//!
//! 1. Partition key from the ID's embedded time: 20240923.1d
//! 2. Cache slot (20240923.1d, a): cached, loaded from the store, or new
//! 3. Shard 1 of the slot: intern strings, persist, add the block
//! 4. Record tenant a in the partition metadata
//! ```
//!
//! Every operation takes the caller's transaction. A single mutex guards the
//! in-memory state; store errors propagate as they are.

use crate::block::{block_time, BlockList, BlockMeta, CompactedBlocks, Labels, TenantStats};
use crate::index::cache::{CacheKey, PartitionCache, PROTECTION_WINDOW};
use crate::index::error::{IndexError, IndexResult};
use crate::index::partition::{PartitionKey, PartitionMeta};
use crate::index::retention::{RetentionPolicy, Tombstone};
use crate::query::iterator::ShardIterator;
use crate::query::{BlockMetadataQuerier, MetadataLabelQuerier, MetadataQuery};
use crate::storage::{SqliteStore, Store};
use chrono::Utc;
use rusqlite::Connection;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info};

/// Configuration for the index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexConfig {
    /// Size of a time partition; a whole number of minutes
    pub partition_duration: Duration,
    /// Partitions this far outside a query range are still visited
    pub query_lookaround_period: Duration,
    /// Cached partitions per tenant
    pub partition_cache_size: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        let partition_duration = Duration::from_secs(24 * 60 * 60);
        Self {
            partition_duration,
            query_lookaround_period: partition_duration,
            partition_cache_size: 7,
        }
    }
}

struct IndexState {
    /// Sorted by partition key
    partitions: Vec<PartitionMeta>,
    cache: PartitionCache,
}

/// Partitioned block metadata index
pub struct Index<S: Store = SqliteStore> {
    config: IndexConfig,
    store: S,
    state: Mutex<IndexState>,
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

fn find_partition<'a>(partitions: &'a [PartitionMeta], key: &PartitionKey) -> Option<&'a PartitionMeta> {
    partitions
        .binary_search_by(|p| p.key().cmp(key))
        .ok()
        .map(|i| &partitions[i])
}

impl<S: Store> Index<S> {
    pub fn new(store: S, config: IndexConfig) -> Self {
        let cache = PartitionCache::new(config.partition_cache_size);
        Self {
            config,
            store,
            state: Mutex::new(IndexState {
                partitions: Vec::new(),
                cache,
            }),
        }
    }

    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    fn lock(&self) -> IndexResult<MutexGuard<'_, IndexState>> {
        self.state
            .lock()
            .map_err(|e| IndexError::Lock(format!("Failed to acquire index lock: {}", e)))
    }

    /// Create the store buckets
    pub fn init(&self, tx: &Connection) -> IndexResult<()> {
        self.store.create_buckets(tx)?;
        Ok(())
    }

    /// Rebuild the in-memory state from the store
    pub fn restore(&self, tx: &Connection) -> IndexResult<()> {
        self.load_partitions(tx)
    }

    /// Rebuild the partition list from the store and load the partitions
    /// around the current time. Replaces the whole in-memory state.
    pub fn load_partitions(&self, tx: &Connection) -> IndexResult<()> {
        let mut partitions = Vec::new();
        for key in self.store.list_partitions(tx)? {
            let mut meta = PartitionMeta::from_key(key)?;
            for shard in self.store.list_shards(tx, meta.key())? {
                for tenant in self.store.list_tenants(tx, meta.key(), shard)? {
                    meta.add_tenant(&tenant);
                }
            }
            debug!(
                partition = %meta.key(),
                tenants = meta.tenants().len(),
                "Found index partition"
            );
            partitions.push(meta);
        }
        partitions.sort_by(|a, b| a.key().cmp(b.key()));

        let now = now_ms();
        let window = PROTECTION_WINDOW.as_millis() as i64;
        let mut cache = PartitionCache::new(self.config.partition_cache_size);
        let mut loaded = 0;
        for meta in partitions.iter().filter(|p| p.overlaps(now - window, now + window)) {
            for tenant in meta.tenants() {
                if cache.get_or_load(tx, &self.store, meta, tenant, now)?.is_some() {
                    loaded += 1;
                }
            }
        }

        info!(
            partitions = partitions.len(),
            loaded = loaded,
            "Loaded index partitions"
        );
        let mut state = self.lock()?;
        *state = IndexState { partitions, cache };
        Ok(())
    }

    /// Insert a block and persist it.
    ///
    /// Fails with `IndexError::BlockExists` if the shard already holds it.
    pub fn insert_block(&self, tx: &Connection, block: BlockMeta) -> IndexResult<()> {
        let mut guard = self.lock()?;
        self.insert_locked(&mut guard, tx, block, now_ms())
    }

    /// Insert a block that is already durable: duplicates are ignored and
    /// nothing is written to the store.
    pub fn insert_block_trusted(&self, tx: &Connection, block: BlockMeta) -> IndexResult<()> {
        let mut guard = self.lock()?;
        let state = &mut *guard;
        let meta = self.partition_for(&state.partitions, &block.id)?;
        let tenant = block.tenant_name().to_string();
        let shard = block.shard;
        state
            .cache
            .get_or_create(tx, &self.store, &meta, &tenant, now_ms())?
            .shard_mut(shard)
            .insert_in_memory(block);
        add_partition_tenant(&mut state.partitions, meta, &tenant);
        Ok(())
    }

    fn insert_locked(
        &self,
        state: &mut IndexState,
        tx: &Connection,
        block: BlockMeta,
        now_ms: i64,
    ) -> IndexResult<()> {
        let meta = self.partition_for(&state.partitions, &block.id)?;
        let tenant = block.tenant_name().to_string();
        let shard = block.shard;

        let partition = state
            .cache
            .get_or_create(tx, &self.store, &meta, &tenant, now_ms)?;
        if !partition.shard_mut(shard).insert(tx, &self.store, block)? {
            return Err(IndexError::BlockExists);
        }
        add_partition_tenant(&mut state.partitions, meta, &tenant);
        Ok(())
    }

    /// Metadata of the partition the block belongs to, new if unknown
    fn partition_for(&self, partitions: &[PartitionMeta], id: &str) -> IndexResult<PartitionMeta> {
        let ts = block_time(id)?;
        let key = PartitionKey::new(ts, self.config.partition_duration);
        Ok(match find_partition(partitions, &key) {
            Some(meta) => meta.clone(),
            None => PartitionMeta::for_timestamp(ts, self.config.partition_duration),
        })
    }

    /// Group block IDs by partition, in partition order
    fn partitioned<'a>(&self, ids: &'a [String]) -> IndexResult<BTreeMap<PartitionKey, Vec<&'a String>>> {
        let mut groups: BTreeMap<PartitionKey, Vec<&String>> = BTreeMap::new();
        for id in ids {
            let key = PartitionKey::new(block_time(id)?, self.config.partition_duration);
            groups.entry(key).or_default().push(id);
        }
        Ok(groups)
    }

    /// Look up blocks of one tenant shard. Unknown IDs are skipped; each ID
    /// is returned at most once.
    pub fn find_blocks(&self, tx: &Connection, list: &BlockList) -> IndexResult<Vec<BlockMeta>> {
        let groups = self.partitioned(&list.blocks)?;
        let now = now_ms();

        let mut guard = self.lock()?;
        let IndexState { partitions, cache } = &mut *guard;

        let mut seen = HashSet::new();
        let mut found = Vec::with_capacity(list.blocks.len());
        for (key, ids) in groups {
            let Some(meta) = find_partition(partitions, &key) else {
                continue;
            };
            if !meta.has_tenant(&list.tenant) {
                continue;
            }
            let Some(partition) = cache.get_or_load(tx, &self.store, meta, &list.tenant, now)? else {
                continue;
            };
            let Some(shard) = partition.shards.get(&list.shard) else {
                continue;
            };
            for id in ids {
                if seen.insert(id) {
                    found.extend(shard.get(id));
                }
            }
        }
        Ok(found)
    }

    /// Insert the compacted blocks and delete their sources.
    ///
    /// New blocks already present are not an error. The first failure is
    /// returned; the caller's transaction is expected to be rolled back.
    pub fn replace_blocks(&self, tx: &Connection, compacted: &CompactedBlocks) -> IndexResult<()> {
        let source = &compacted.source_blocks;
        let groups = self.partitioned(&source.blocks)?;
        let now = now_ms();

        let mut guard = self.lock()?;
        let state = &mut *guard;

        for block in &compacted.new_blocks {
            match self.insert_locked(state, tx, block.clone(), now) {
                Ok(()) | Err(IndexError::BlockExists) => {}
                Err(e) => return Err(e),
            }
        }

        for (key, ids) in groups {
            let ids: Vec<String> = ids.into_iter().cloned().collect();
            self.store
                .delete_block_list(tx, &key, source.shard, &source.tenant, &ids)?;
            let slot = CacheKey::new(key, source.tenant.as_str());
            if let Some(partition) = state.cache.peek_mut(&slot) {
                if let Some(shard) = partition.shards.get_mut(&source.shard) {
                    shard.delete(&ids);
                }
            }
        }

        debug!(
            tenant = %source.tenant,
            shard = source.shard,
            new_blocks = compacted.new_blocks.len(),
            source_blocks = source.blocks.len(),
            "Replaced blocks"
        );
        Ok(())
    }

    /// Partition span of the tenant's data; zeroed if it has none
    pub fn get_tenant_stats(&self, tenant: &str) -> IndexResult<TenantStats> {
        let state = self.lock()?;
        let mut stats = TenantStats {
            data_ingested: false,
            oldest_profile_time: i64::MAX,
            newest_profile_time: i64::MIN,
        };
        for p in state.partitions.iter().filter(|p| p.has_tenant(tenant)) {
            stats.data_ingested = true;
            stats.oldest_profile_time = stats.oldest_profile_time.min(p.start_time());
            stats.newest_profile_time = stats.newest_profile_time.max(p.end_time());
        }
        if !stats.data_ingested {
            return Ok(TenantStats::default());
        }
        Ok(stats)
    }

    /// Blocks with datasets matching the query
    pub fn query_metadata(&self, tx: &Connection, query: &MetadataQuery) -> IndexResult<Vec<BlockMeta>> {
        let query = query.compile()?;
        let mut guard = self.lock()?;
        let IndexState { partitions, cache } = &mut *guard;

        let mut querier = BlockMetadataQuerier::new(&query);
        ShardIterator::new(
            tx,
            &self.store,
            partitions,
            cache,
            &query,
            self.config.query_lookaround_period,
            now_ms(),
        )
        .for_each(|shard| querier.visit(shard))?;
        Ok(querier.into_blocks())
    }

    /// Distinct label sets of datasets matching the query
    pub fn query_metadata_labels(&self, tx: &Connection, query: &MetadataQuery) -> IndexResult<Vec<Labels>> {
        let query = query.compile()?;
        let mut guard = self.lock()?;
        let IndexState { partitions, cache } = &mut *guard;

        let mut querier = MetadataLabelQuerier::new(&query);
        ShardIterator::new(
            tx,
            &self.store,
            partitions,
            cache,
            &query,
            self.config.query_lookaround_period,
            now_ms(),
        )
        .for_each(|shard| querier.visit(shard))?;
        Ok(querier.into_labels())
    }

    /// Snapshot of the partition list
    pub fn partitions(&self) -> IndexResult<Vec<PartitionMeta>> {
        Ok(self.lock()?.partitions.clone())
    }

    /// Apply the retention policy: delete the tombstoned tenant shards and
    /// drop partitions left without tenants.
    pub fn truncate_index(
        &self,
        tx: &Connection,
        policy: &mut dyn RetentionPolicy,
    ) -> IndexResult<Vec<Tombstone>> {
        let mut guard = self.lock()?;
        let state = &mut *guard;

        let tombstones = policy.create_tombstones(&state.partitions);
        for t in &tombstones {
            for shard in self.store.list_shards(tx, &t.partition)? {
                self.store.delete_shard(tx, &t.partition, shard, &t.tenant)?;
            }
            state
                .cache
                .remove(&CacheKey::new(t.partition.clone(), t.tenant.as_str()));
        }

        let affected: BTreeSet<&PartitionKey> = tombstones.iter().map(|t| &t.partition).collect();
        for key in affected {
            let mut tenants = Vec::new();
            for shard in self.store.list_shards(tx, key)? {
                tenants.extend(self.store.list_tenants(tx, key, shard)?);
            }
            let Ok(i) = state.partitions.binary_search_by(|p| p.key().cmp(key)) else {
                continue;
            };
            if tenants.is_empty() {
                self.store.delete_partition(tx, key)?;
                state.partitions.remove(i);
                state.cache.remove_partition(key);
                info!(partition = %key, "Deleted empty partition");
            } else {
                state.partitions[i].set_tenants(tenants);
            }
        }

        if !tombstones.is_empty() {
            info!(tombstones = tombstones.len(), "Truncated index");
        }
        Ok(tombstones)
    }
}

fn add_partition_tenant(partitions: &mut Vec<PartitionMeta>, mut meta: PartitionMeta, tenant: &str) {
    match partitions.binary_search_by(|p| p.key().cmp(meta.key())) {
        Ok(i) => partitions[i].add_tenant(tenant),
        Err(i) => {
            meta.add_tenant(tenant);
            debug!(partition = %meta.key(), tenant, "Created partition");
            partitions.insert(i, meta);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::{BlockIdGenerator, Dataset, LabelPair, StringTable};
    use crate::index::retention::TimeBasedRetentionPolicy;
    use crate::storage::{open_database, StorageResult, StringRange};
    use crate::testing::{millis, temp_db, ulid};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;

    const HOUR: Duration = Duration::from_secs(3600);

    fn new_index() -> Index {
        Index::new(SqliteStore::new(), IndexConfig::default())
    }

    /// Block of `tenant` with one dataset labelled `service_name=<service>`
    fn block(id: String, tenant: &str, shard: u32, service: &str) -> BlockMeta {
        let mut strings = StringTable::new();
        let t = strings.put(tenant);
        let created_by = strings.put("ingester");
        let dataset_tenant = strings.put(if tenant.is_empty() { "tenant-a" } else { tenant });
        let name = strings.put(service);
        let label = strings.put("service_name");
        let time = block_time(&id).unwrap();
        BlockMeta {
            id,
            tenant: t,
            shard,
            min_time: time,
            max_time: time + 1_000,
            created_by,
            datasets: vec![Dataset {
                tenant: dataset_tenant,
                name,
                min_time: time,
                max_time: time + 1_000,
                labels: vec![1, label, name],
                ..Default::default()
            }],
            string_table: strings.into_strings(),
            ..Default::default()
        }
    }

    fn ids(blocks: &[BlockMeta]) -> Vec<&str> {
        blocks.iter().map(|b| b.id.as_str()).collect()
    }

    #[test]
    fn test_insert_is_idempotent() {
        let (_dir, conn) = temp_db();
        let index = new_index();
        let md = block(ulid("2024-09-23T08:00:00.001Z"), "tenant-a", 1, "svc");

        index.insert_block(&conn, md.clone()).unwrap();
        let err = index.insert_block(&conn, md.clone()).unwrap_err();
        assert!(matches!(err, IndexError::BlockExists));

        let list = BlockList::new("tenant-a", 1, vec![md.id.clone(), md.id.clone()]);
        assert_eq!(index.find_blocks(&conn, &list).unwrap(), vec![md.clone()]);

        // The trusted path ignores duplicates.
        index.insert_block_trusted(&conn, md.clone()).unwrap();
        assert_eq!(index.find_blocks(&conn, &list).unwrap().len(), 1);
    }

    #[test]
    fn test_insert_invalid_id() {
        let (_dir, conn) = temp_db();
        let md = BlockMeta {
            id: "not-a-block-id".into(),
            ..Default::default()
        };
        let err = new_index().insert_block(&conn, md).unwrap_err();
        assert!(matches!(err, IndexError::BlockId(_)));
    }

    #[test]
    fn test_insert_block_trusted_does_not_persist() {
        let (_dir, conn) = temp_db();
        let index = new_index();
        let md = block(ulid("2024-09-23T08:00:00.001Z"), "tenant-a", 1, "svc");
        index.insert_block_trusted(&conn, md.clone()).unwrap();

        let list = BlockList::new("tenant-a", 1, vec![md.id.clone()]);
        assert_eq!(index.find_blocks(&conn, &list).unwrap(), vec![md]);
        assert!(SqliteStore::new().list_partitions(&conn).unwrap().is_empty());
    }

    #[test]
    fn test_checked_insert_after_trusted_insert() {
        let (_dir, conn) = temp_db();
        let index = new_index();
        let trusted = block(ulid("2024-09-23T08:00:00.001Z"), "tenant-a", 1, "svc-a");
        let checked = block(ulid("2024-09-23T08:00:00.002Z"), "tenant-a", 1, "svc-b");
        index.insert_block_trusted(&conn, trusted).unwrap();
        index.insert_block(&conn, checked.clone()).unwrap();

        // The stored string table has no holes: the shard loads back.
        let restored = new_index();
        restored.restore(&conn).unwrap();
        let list = BlockList::new("tenant-a", 1, vec![checked.id.clone()]);
        assert_eq!(restored.find_blocks(&conn, &list).unwrap(), vec![checked]);
    }

    #[test]
    fn test_block_without_strings_survives_restore() {
        let (_dir, conn) = temp_db();
        let index = new_index();
        let md = BlockMeta {
            id: ulid("2024-09-23T08:00:00.001Z"),
            shard: 1,
            string_table: vec![String::new()],
            ..Default::default()
        };
        index.insert_block(&conn, md.clone()).unwrap();

        let list = BlockList::new("", 1, vec![md.id.clone()]);
        assert_eq!(index.find_blocks(&conn, &list).unwrap(), vec![md.clone()]);

        let restored = new_index();
        restored.restore(&conn).unwrap();
        assert_eq!(restored.find_blocks(&conn, &list).unwrap(), vec![md]);
    }

    #[test]
    fn test_concurrent_queries_see_whole_replacements() {
        const ROUNDS: usize = 50;
        const READERS: usize = 4;

        let (dir, _conn) = temp_db();
        let path = dir.path().join("index.db");
        let index = new_index();
        let source = block(ulid("2024-09-23T08:00:00.001Z"), "", 1, "svc-a");
        let compacted = block(ulid("2024-09-23T08:10:00.000Z"), "tenant-a", 1, "svc-b");
        let replace = CompactedBlocks {
            source_blocks: BlockList::new("", 1, vec![source.id.clone()]),
            new_blocks: vec![compacted.clone()],
        };
        let delete = CompactedBlocks {
            source_blocks: BlockList::new("tenant-a", 1, vec![compacted.id.clone()]),
            new_blocks: vec![],
        };
        let done = AtomicBool::new(false);

        let mut writer = open_database(&path).unwrap();
        let readers: Vec<Connection> = (0..READERS).map(|_| open_database(&path).unwrap()).collect();
        let (index, done) = (&index, &done);
        let (source, compacted) = (&source, &compacted);
        let (replace, delete) = (&replace, &delete);

        std::thread::scope(|s| {
            s.spawn(move || {
                for _ in 0..ROUNDS {
                    let tx = writer.transaction().unwrap();
                    index.insert_block(&tx, source.clone()).unwrap();
                    tx.commit().unwrap();

                    let tx = writer.transaction().unwrap();
                    index.replace_blocks(&tx, replace).unwrap();
                    tx.commit().unwrap();

                    let tx = writer.transaction().unwrap();
                    index.replace_blocks(&tx, delete).unwrap();
                    tx.commit().unwrap();
                }
                done.store(true, Ordering::SeqCst);
            });

            for conn in readers {
                s.spawn(move || {
                    let query = MetadataQuery::new("{}", source.min_time, compacted.max_time)
                        .tenant("tenant-a");
                    let labels = query.clone().label("service_name");
                    let sources = BlockList::new("", 1, vec![source.id.clone()]);
                    let results = BlockList::new("tenant-a", 1, vec![compacted.id.clone()]);

                    for _ in 0..ROUNDS * 10 {
                        if done.load(Ordering::SeqCst) {
                            break;
                        }
                        let found = index.query_metadata(&conn, &query).unwrap();
                        let found = ids(&found);
                        assert!(
                            found.is_empty()
                                || found == [source.id.as_str()]
                                || found == [compacted.id.as_str()],
                            "{:?}",
                            found
                        );

                        let sets = index.query_metadata_labels(&conn, &labels).unwrap();
                        assert!(sets.len() <= 1, "{:?}", sets);

                        assert!(index.find_blocks(&conn, &sources).unwrap().len() <= 1);
                        assert!(index.find_blocks(&conn, &results).unwrap().len() <= 1);
                    }
                });
            }
        });

        // Every round ends with the compacted block deleted.
        let conn = open_database(&path).unwrap();
        let restored = new_index();
        restored.restore(&conn).unwrap();
        let query = MetadataQuery::new("{}", source.min_time, compacted.max_time).tenant("tenant-a");
        assert!(restored.query_metadata(&conn, &query).unwrap().is_empty());
    }

    #[test]
    fn test_find_blocks_across_partitions() {
        let (_dir, conn) = temp_db();
        let index = Index::new(
            SqliteStore::new(),
            IndexConfig {
                partition_duration: HOUR,
                ..Default::default()
            },
        );
        let a = block(ulid("2024-09-23T10:00:00.000Z"), "tenant-a", 1, "svc");
        let b = block(ulid("2024-09-23T08:00:00.000Z"), "tenant-a", 1, "svc");
        let c = block(ulid("2024-09-23T08:30:00.000Z"), "tenant-a", 1, "svc");
        for md in [&a, &b, &c] {
            index.insert_block(&conn, md.clone()).unwrap();
        }

        let missing = ulid("2024-09-23T09:00:00.000Z");
        let list = BlockList::new("tenant-a", 1, vec![a.id.clone(), missing, c.id.clone(), b.id.clone()]);
        let found = index.find_blocks(&conn, &list).unwrap();
        // Partition order, then list order.
        assert_eq!(ids(&found), vec![c.id.as_str(), b.id.as_str(), a.id.as_str()]);

        let other = BlockList::new("tenant-b", 1, vec![a.id.clone()]);
        assert!(index.find_blocks(&conn, &other).unwrap().is_empty());
        let other_shard = BlockList::new("tenant-a", 2, vec![a.id.clone()]);
        assert!(index.find_blocks(&conn, &other_shard).unwrap().is_empty());
    }

    #[test]
    fn test_replace_blocks() {
        let (_dir, mut conn) = temp_db();
        let index = new_index();

        let sources: Vec<BlockMeta> = ["2024-09-23T08:00:00.001Z", "2024-09-23T08:00:00.002Z"]
            .iter()
            .map(|ts| block(ulid(ts), "", 1, "svc"))
            .collect();
        for md in &sources {
            index.insert_block(&conn, md.clone()).unwrap();
        }

        let compacted = block(ulid("2024-09-23T08:10:00.000Z"), "tenant-a", 1, "svc");
        let replacement = CompactedBlocks {
            source_blocks: BlockList::new("", 1, sources.iter().map(|b| b.id.clone()).collect()),
            new_blocks: vec![compacted.clone()],
        };
        let tx = conn.transaction().unwrap();
        index.replace_blocks(&tx, &replacement).unwrap();
        // Replaying the replacement is harmless.
        index.replace_blocks(&tx, &replacement).unwrap();
        tx.commit().unwrap();

        let old = BlockList::new("", 1, sources.iter().map(|b| b.id.clone()).collect());
        assert!(index.find_blocks(&conn, &old).unwrap().is_empty());
        let new = BlockList::new("tenant-a", 1, vec![compacted.id.clone()]);
        assert_eq!(index.find_blocks(&conn, &new).unwrap(), vec![compacted.clone()]);

        // The store agrees.
        let restored = new_index();
        restored.restore(&conn).unwrap();
        assert!(restored.find_blocks(&conn, &old).unwrap().is_empty());
        assert_eq!(restored.find_blocks(&conn, &new).unwrap(), vec![compacted]);
    }

    #[test]
    fn test_tenant_stats() {
        let (_dir, conn) = temp_db();
        let index = Index::new(
            SqliteStore::new(),
            IndexConfig {
                partition_duration: 6 * HOUR,
                ..Default::default()
            },
        );
        index
            .insert_block(&conn, block(ulid("2024-09-23T08:00:00.000Z"), "tenant-a", 1, "svc"))
            .unwrap();
        index
            .insert_block(&conn, block(ulid("2024-09-24T13:00:00.000Z"), "tenant-a", 2, "svc"))
            .unwrap();
        index
            .insert_block(&conn, block(ulid("2024-09-25T00:00:00.000Z"), "tenant-b", 1, "svc"))
            .unwrap();

        assert_eq!(
            index.get_tenant_stats("tenant-a").unwrap(),
            TenantStats {
                data_ingested: true,
                oldest_profile_time: millis("2024-09-23T06:00:00.000Z"),
                newest_profile_time: millis("2024-09-24T18:00:00.000Z"),
            }
        );
        assert_eq!(index.get_tenant_stats("tenant-c").unwrap(), TenantStats::default());
    }

    #[test]
    fn test_partitions_sorted() {
        let (_dir, conn) = temp_db();
        let index = new_index();
        for ts in ["2024-09-25T00:00:00.000Z", "2024-09-23T00:00:00.000Z", "2024-09-24T00:00:00.000Z"] {
            index.insert_block(&conn, block(ulid(ts), "t", 0, "svc")).unwrap();
        }
        let keys: Vec<String> = index
            .partitions()
            .unwrap()
            .iter()
            .map(|p| p.key().to_string())
            .collect();
        assert_eq!(keys, vec!["20240923.1d", "20240924.1d", "20240925.1d"]);
    }

    #[test]
    fn test_invalid_query() {
        let (_dir, conn) = temp_db();
        let err = new_index()
            .query_metadata(&conn, &MetadataQuery::new("{}", 0, 1))
            .unwrap_err();
        assert!(matches!(err, IndexError::InvalidQuery(_)));

        let err = new_index()
            .query_metadata_labels(&conn, &MetadataQuery::new("{a=~\"(\"}", 0, 1).tenant("t"))
            .unwrap_err();
        assert!(matches!(err, IndexError::InvalidQuery(_)));
    }

    /// Store wrapper counting `list_shards` calls, i.e. partition loads
    #[derive(Clone, Default)]
    struct CountingStore {
        inner: SqliteStore,
        list_shards: Arc<AtomicUsize>,
    }

    impl CountingStore {
        fn loads(&self) -> usize {
            self.list_shards.swap(0, Ordering::SeqCst)
        }
    }

    impl Store for CountingStore {
        fn create_buckets(&self, tx: &Connection) -> StorageResult<()> {
            self.inner.create_buckets(tx)
        }
        fn store_block(&self, tx: &Connection, p: &PartitionKey, shard: u32, tenant: &str, block: &BlockMeta) -> StorageResult<()> {
            self.inner.store_block(tx, p, shard, tenant, block)
        }
        fn store_strings(&self, tx: &Connection, p: &PartitionKey, shard: u32, tenant: &str, offset: u32, strings: &[String]) -> StorageResult<()> {
            self.inner.store_strings(tx, p, shard, tenant, offset, strings)
        }
        fn load_strings(&self, tx: &Connection, p: &PartitionKey, shard: u32, tenant: &str) -> StorageResult<Vec<StringRange>> {
            self.inner.load_strings(tx, p, shard, tenant)
        }
        fn delete_block_list(&self, tx: &Connection, p: &PartitionKey, shard: u32, tenant: &str, blocks: &[String]) -> StorageResult<()> {
            self.inner.delete_block_list(tx, p, shard, tenant, blocks)
        }
        fn list_partitions(&self, tx: &Connection) -> StorageResult<Vec<PartitionKey>> {
            self.inner.list_partitions(tx)
        }
        fn list_shards(&self, tx: &Connection, p: &PartitionKey) -> StorageResult<Vec<u32>> {
            self.list_shards.fetch_add(1, Ordering::SeqCst);
            self.inner.list_shards(tx, p)
        }
        fn list_tenants(&self, tx: &Connection, p: &PartitionKey, shard: u32) -> StorageResult<Vec<String>> {
            self.inner.list_tenants(tx, p, shard)
        }
        fn list_blocks(&self, tx: &Connection, p: &PartitionKey, shard: u32, tenant: &str) -> StorageResult<Vec<BlockMeta>> {
            self.inner.list_blocks(tx, p, shard, tenant)
        }
        fn delete_shard(&self, tx: &Connection, p: &PartitionKey, shard: u32, tenant: &str) -> StorageResult<()> {
            self.inner.delete_shard(tx, p, shard, tenant)
        }
        fn delete_partition(&self, tx: &Connection, p: &PartitionKey) -> StorageResult<()> {
            self.inner.delete_partition(tx, p)
        }
    }

    #[test]
    fn test_cache_is_bounded() {
        let (_dir, conn) = temp_db();
        let store = CountingStore::default();
        let index = Index::new(store.clone(), IndexConfig::default());

        let day = 24 * 3_600_000;
        let base = millis("2024-09-01T12:00:00.000Z");
        for d in 0..10 {
            let id = block_id_at_ms(base + d * day);
            index.insert_block(&conn, block(id, "tenant-a", 1, "svc")).unwrap();
        }
        assert_eq!(index.lock().unwrap().cache.tenant_len("tenant-a"), 7);
        store.loads();

        let restored = Index::new(store.clone(), IndexConfig::default());
        restored.restore(&conn).unwrap();
        // Nothing is current: restore lists shards per partition only.
        assert_eq!(store.loads(), 10);
        assert!(restored.lock().unwrap().cache.is_empty());

        let query = MetadataQuery::new("{}", base, base + 9 * day).tenant("tenant-a");
        assert_eq!(restored.query_metadata(&conn, &query).unwrap().len(), 10);
        assert_eq!(store.loads(), 10);
        assert_eq!(restored.lock().unwrap().cache.tenant_len("tenant-a"), 7);

        // The last days stay cached.
        let recent = MetadataQuery::new("{}", base + 7 * day, base + 9 * day)
            .tenant("tenant-a");
        let lookaround = IndexConfig {
            query_lookaround_period: Duration::ZERO,
            ..Default::default()
        };
        let restored = Index::new(store.clone(), lookaround);
        restored.restore(&conn).unwrap();
        store.loads();
        assert_eq!(restored.query_metadata(&conn, &recent).unwrap().len(), 3);
        assert_eq!(store.loads(), 3);
        assert_eq!(restored.query_metadata(&conn, &recent).unwrap().len(), 3);
        assert_eq!(store.loads(), 0);

        // A full scan leaves the first days evicted: they are read once more.
        assert_eq!(restored.query_metadata(&conn, &query).unwrap().len(), 10);
        assert_eq!(store.loads(), 10);
        assert_eq!(restored.query_metadata(&conn, &recent).unwrap().len(), 3);
        assert_eq!(store.loads(), 0);
        let first = MetadataQuery::new("{}", base, base).tenant("tenant-a");
        assert_eq!(restored.query_metadata(&conn, &first).unwrap().len(), 1);
        assert_eq!(store.loads(), 1);
        assert_eq!(restored.query_metadata(&conn, &first).unwrap().len(), 1);
        assert_eq!(store.loads(), 0);
        assert_eq!(restored.lock().unwrap().cache.tenant_len("tenant-a"), 7);
    }

    fn block_id_at_ms(ts: i64) -> String {
        crate::block::block_id_at(ts, 7).unwrap()
    }

    #[test]
    fn test_current_partitions_are_protected() {
        let (_dir, conn) = temp_db();
        let config = IndexConfig {
            partition_cache_size: 1,
            ..Default::default()
        };
        let index = Index::new(SqliteStore::new(), config.clone());
        let ids = BlockIdGenerator::new();

        let current = block(ids.generate().unwrap(), "tenant-a", 1, "svc");
        index.insert_block(&conn, current.clone()).unwrap();
        for ts in ["2024-09-01T00:00:00.000Z", "2024-09-02T00:00:00.000Z"] {
            index.insert_block(&conn, block(ulid(ts), "tenant-a", 1, "svc")).unwrap();
        }

        let current_key = CacheKey::new(
            PartitionKey::new(block_time(&current.id).unwrap(), config.partition_duration),
            "tenant-a",
        );
        {
            let state = index.lock().unwrap();
            assert!(state.cache.contains(&current_key));
            assert_eq!(state.cache.tenant_len("tenant-a"), 2);
        }

        // Restore loads only the current partition.
        let restored = Index::new(SqliteStore::new(), config);
        restored.restore(&conn).unwrap();
        let state = restored.lock().unwrap();
        assert_eq!(state.partitions.len(), 3);
        assert_eq!(state.cache.len(), 1);
        assert!(state.cache.contains(&current_key));
    }

    #[test]
    fn test_truncate_index() {
        let (_dir, conn) = temp_db();
        let index = new_index();
        let old = ["2024-09-01T00:00:00.000Z", "2024-09-02T00:00:00.000Z"];
        for ts in old {
            index.insert_block(&conn, block(ulid(ts), "tenant-a", 1, "svc")).unwrap();
            index.insert_block(&conn, block(ulid(ts), "", 1, "svc")).unwrap();
        }
        index
            .insert_block(&conn, block(ulid("2024-09-02T01:00:00.000Z"), "tenant-b", 1, "svc"))
            .unwrap();

        let now = millis("2024-10-01T00:00:00.000Z");
        let mut policy = TimeBasedRetentionPolicy::new(None, Duration::ZERO, 100, now)
            .with_override("tenant-a", Some(Duration::from_secs(7 * 24 * 3600)));

        // First pass: named tenants only; tenant-b is kept forever.
        let tombstones = index.truncate_index(&conn, &mut policy).unwrap();
        assert_eq!(tombstones.len(), 2);
        let partitions = index.partitions().unwrap();
        assert_eq!(partitions[0].tenants(), &[""]);
        assert_eq!(partitions[1].tenants(), &["", "tenant-b"]);

        // Second pass: the anonymous tenant of the first partition goes.
        let tombstones = index.truncate_index(&conn, &mut policy).unwrap();
        assert_eq!(tombstones.len(), 1);
        let keys: Vec<String> = index
            .partitions()
            .unwrap()
            .iter()
            .map(|p| p.key().to_string())
            .collect();
        assert_eq!(keys, vec!["20240902.1d"]);
        assert_eq!(
            SqliteStore::new().list_partitions(&conn).unwrap(),
            vec![PartitionKey::from("20240902.1d".to_string())]
        );

        let list = BlockList::new("tenant-a", 1, vec![ulid(old[1])]);
        assert!(index.find_blocks(&conn, &list).unwrap().is_empty());
    }

    #[test]
    fn test_restore_equivalence() {
        let (_dir, conn) = temp_db();
        let index = new_index();
        let mut blocks = Vec::new();
        for (ts, tenant, shard) in [
            ("2024-09-23T08:00:00.001Z", "tenant-a", 1),
            ("2024-09-23T09:00:00.001Z", "tenant-b", 1),
            ("2024-09-24T08:00:00.001Z", "tenant-a", 2),
            ("2024-09-24T09:00:00.001Z", "", 1),
        ] {
            let md = block(ulid(ts), tenant, shard, "svc");
            index.insert_block(&conn, md.clone()).unwrap();
            blocks.push(md);
        }

        let restored = new_index();
        restored.restore(&conn).unwrap();
        assert_eq!(restored.partitions().unwrap(), index.partitions().unwrap());

        let query = MetadataQuery::new(
            "{service_name=\"svc\"}",
            millis("2024-09-23T00:00:00.000Z"),
            millis("2024-09-25T00:00:00.000Z"),
        )
        .tenant("tenant-a")
        .tenant("tenant-b")
        .label("service_name");
        assert_eq!(
            restored.query_metadata(&conn, &query).unwrap(),
            index.query_metadata(&conn, &query).unwrap()
        );
        assert_eq!(index.query_metadata(&conn, &query).unwrap().len(), 4);
        for md in blocks {
            let tenant = md.tenant_name().to_string();
            let list = BlockList::new(tenant, md.shard, vec![md.id.clone()]);
            assert_eq!(restored.find_blocks(&conn, &list).unwrap(), vec![md]);
        }
    }

    mod query {
        use super::*;

        struct Fixture {
            min_t: i64,
            max_t: i64,
            md: BlockMeta,
            md2: BlockMeta,
            md3: BlockMeta,
        }

        fn strings(s: &[&str]) -> Vec<String> {
            s.iter().map(|s| s.to_string()).collect()
        }

        fn fixture() -> Fixture {
            let min_t = millis("2024-09-23T08:00:00.000Z");
            let max_t = millis("2024-09-23T09:00:00.000Z");
            let dataset = |tenant, name, labels: Vec<i32>| Dataset {
                tenant,
                name,
                min_time: min_t,
                max_time: max_t,
                labels,
                ..Default::default()
            };
            let md = BlockMeta {
                id: ulid("2024-09-23T08:00:00.001Z"),
                tenant: 0,
                min_time: min_t,
                max_time: max_t,
                created_by: 1,
                datasets: vec![
                    dataset(2, 3, vec![2, 4, 3, 5, 6]),
                    dataset(7, 8, vec![2, 4, 8, 5, 9]),
                ],
                string_table: strings(&[
                    "", "ingester", "tenant-a", "dataset-a", "service_name", "__profile_type__",
                    "1", "tenant-b", "dataset-b", "4",
                ]),
                ..Default::default()
            };
            let tenant_a_block = |ts| BlockMeta {
                id: ulid(ts),
                tenant: 1,
                shard: 1,
                min_time: min_t,
                max_time: max_t,
                created_by: 2,
                datasets: vec![dataset(1, 3, vec![2, 4, 3, 5, 6])],
                string_table: strings(&[
                    "", "tenant-a", "ingester", "dataset-a", "service_name", "__profile_type__", "1",
                ]),
                ..Default::default()
            };
            Fixture {
                min_t,
                max_t,
                md,
                md2: tenant_a_block("2024-09-23T08:00:00.002Z"),
                md3: tenant_a_block("2024-09-23T08:30:00.003Z"),
            }
        }

        fn pared(md: &BlockMeta, datasets: Vec<Dataset>, table: &[&str]) -> BlockMeta {
            BlockMeta {
                id: md.id.clone(),
                tenant: md.tenant,
                shard: md.shard,
                min_time: md.min_time,
                max_time: md.max_time,
                created_by: md.created_by,
                datasets,
                string_table: strings(table),
                ..Default::default()
            }
        }

        fn run_queries(index: &Index, conn: &Connection, f: &Fixture) {
            let Fixture { min_t, max_t, md, md2, md3 } = f;
            let (min_t, max_t) = (*min_t, *max_t);
            let dataset = |tenant, name, labels: Vec<i32>| Dataset {
                tenant,
                name,
                min_time: min_t,
                max_time: max_t,
                labels,
                ..Default::default()
            };

            // Point lookups.
            let found = index.find_blocks(conn, &BlockList::new("", 0, vec![md.id.clone()])).unwrap();
            assert_eq!(found, vec![md.clone()]);
            let list = BlockList::new("tenant-a", 1, vec![md2.id.clone(), md3.id.clone()]);
            assert_eq!(index.find_blocks(conn, &list).unwrap(), vec![md2.clone(), md3.clone()]);
            let list = BlockList::new("tenant-b", 1, vec![md.id.clone()]);
            assert!(index.find_blocks(conn, &list).unwrap().is_empty());
            let list = BlockList::new("", 1, vec![md.id.clone()]);
            assert!(index.find_blocks(conn, &list).unwrap().is_empty());

            // Dataset filter.
            let query = MetadataQuery::new("{service_name=~\"dataset-a\"}", min_t, max_t)
                .tenant("tenant-a")
                .tenant("tenant-b");
            let a_table = ["", "tenant-a", "ingester", "dataset-a"];
            assert_eq!(
                index.query_metadata(conn, &query).unwrap(),
                vec![
                    pared(md, vec![dataset(2, 3, vec![])], &["", "ingester", "tenant-a", "dataset-a"]),
                    pared(md2, vec![dataset(1, 3, vec![])], &a_table),
                    pared(md3, vec![dataset(1, 3, vec![])], &a_table),
                ]
            );

            // Dataset tenant filter.
            let query = MetadataQuery::new("{}", min_t, max_t + 1).tenant("tenant-b");
            assert_eq!(
                index.query_metadata(conn, &query).unwrap(),
                vec![pared(md, vec![dataset(2, 3, vec![])], &["", "ingester", "tenant-b", "dataset-b"])]
            );
            let query = MetadataQuery::new("{}", min_t, max_t + 1).tenant("tenant-not-found");
            assert!(index.query_metadata(conn, &query).unwrap().is_empty());

            // Dataset filter keeping labels.
            let query = MetadataQuery::new("{service_name=~\"dataset-a\"}", min_t, max_t)
                .tenant("tenant-a")
                .tenant("tenant-b")
                .label("service_name");
            let a_table = ["", "tenant-a", "ingester", "dataset-a", "service_name"];
            assert_eq!(
                index.query_metadata(conn, &query).unwrap(),
                vec![
                    pared(
                        md,
                        vec![dataset(2, 3, vec![1, 4, 3])],
                        &["", "ingester", "tenant-a", "dataset-a", "service_name"]
                    ),
                    pared(md2, vec![dataset(1, 3, vec![1, 4, 3])], &a_table),
                    pared(md3, vec![dataset(1, 3, vec![1, 4, 3])], &a_table),
                ]
            );

            // Time range filter: dataset-b starts at min_t.
            let query = MetadataQuery::new("{service_name=~\"dataset-b\"}", min_t - 3, min_t - 1)
                .tenant("tenant-b");
            assert!(index.query_metadata(conn, &query).unwrap().is_empty());

            // Label sets.
            let query = MetadataQuery::new("{service_name=~\"dataset.*\"}", min_t, max_t)
                .tenant("tenant-a")
                .label("__profile_type__")
                .label("service_name");
            assert_eq!(
                index.query_metadata_labels(conn, &query).unwrap(),
                vec![Labels {
                    labels: vec![
                        LabelPair::new("__profile_type__", "1"),
                        LabelPair::new("service_name", "dataset-a"),
                    ]
                }]
            );
            let query = MetadataQuery::new("{}", min_t, max_t)
                .tenant("tenant-b")
                .label("__profile_type__")
                .label("service_name");
            assert_eq!(
                index.query_metadata_labels(conn, &query).unwrap(),
                vec![Labels {
                    labels: vec![
                        LabelPair::new("__profile_type__", "4"),
                        LabelPair::new("service_name", "dataset-b"),
                    ]
                }]
            );
        }

        #[test]
        fn test_query_before_and_after_restore() {
            let (_dir, conn) = temp_db();
            let f = fixture();
            let index = new_index();
            for md in [&f.md, &f.md2, &f.md3] {
                index.insert_block(&conn, md.clone()).unwrap();
            }
            run_queries(&index, &conn, &f);

            let restored = new_index();
            restored.restore(&conn).unwrap();
            run_queries(&restored, &conn, &f);
        }

        #[test]
        fn test_unmatchable_selector_skips_shards() {
            let (_dir, conn) = temp_db();
            let f = fixture();
            let index = new_index();
            index.insert_block(&conn, f.md.clone()).unwrap();

            for expr in ["{service_name=\"unknown\"}", "{unknown=~\".+\"}"] {
                let query = MetadataQuery::new(expr, f.min_t, f.max_t).tenant("tenant-a");
                assert!(index.query_metadata(&conn, &query).unwrap().is_empty(), "{}", expr);
            }
            let query = MetadataQuery::new("{service_name!=\"dataset-b\"}", f.min_t, f.max_t)
                .tenant("tenant-a")
                .tenant("tenant-b");
            let found = index.query_metadata(&conn, &query).unwrap();
            assert_eq!(found.len(), 1);
            assert_eq!(found[0].datasets.len(), 1);
        }
    }
}
