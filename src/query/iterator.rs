//! Shard resolution for queries
//!
//! Walks the partitions overlapping the query range (widened by the
//! lookaround period), loads the queried tenants' slots and hands every shard
//! to a visitor, ordered by `(tenant, shard)` within a partition.

use crate::index::{CacheKey, IndexResult, IndexShard, PartitionCache, PartitionMeta};
use crate::query::metadata::CompiledQuery;
use crate::storage::Store;
use rusqlite::Connection;
use std::time::Duration;

pub(crate) struct ShardIterator<'a, S: Store + ?Sized> {
    tx: &'a Connection,
    store: &'a S,
    partitions: &'a [PartitionMeta],
    cache: &'a mut PartitionCache,
    query: &'a CompiledQuery,
    lookaround: Duration,
    now_ms: i64,
}

impl<'a, S: Store + ?Sized> ShardIterator<'a, S> {
    pub(crate) fn new(
        tx: &'a Connection,
        store: &'a S,
        partitions: &'a [PartitionMeta],
        cache: &'a mut PartitionCache,
        query: &'a CompiledQuery,
        lookaround: Duration,
        now_ms: i64,
    ) -> Self {
        Self {
            tx,
            store,
            partitions,
            cache,
            query,
            lookaround,
            now_ms,
        }
    }

    /// Visit every shard that may hold matching blocks
    pub(crate) fn for_each<F>(self, mut f: F) -> IndexResult<()>
    where
        F: FnMut(&IndexShard),
    {
        let lookaround = self.lookaround.as_millis() as i64;
        let start = self.query.start_time().saturating_sub(lookaround);
        let end = self.query.end_time().saturating_add(lookaround);

        for meta in self.partitions.iter().filter(|p| p.overlaps(start, end)) {
            // Load first: slots of one partition never evict each other,
            // eviction is per tenant.
            let mut loaded = Vec::new();
            for tenant in self.query.shard_tenants() {
                if !meta.has_tenant(tenant) {
                    continue;
                }
                let slot =
                    self.cache
                        .get_or_load(self.tx, self.store, meta, tenant, self.now_ms)?;
                if slot.is_some() {
                    loaded.push(CacheKey::new(meta.key().clone(), tenant.as_str()));
                }
            }

            for key in &loaded {
                if let Some(partition) = self.cache.peek(key) {
                    partition.shards.values().for_each(&mut f);
                }
            }
        }
        Ok(())
    }
}
