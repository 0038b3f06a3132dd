//! Partition cache
//!
//! Loaded partitions are cached per `(partition, tenant)`. The number of
//! slots per tenant is bounded; the least recently accessed slot is evicted
//! first, except slots close to the current time which are never evicted.
//! Eviction only drops the in-memory copy.

use crate::index::error::IndexResult;
use crate::index::partition::{PartitionKey, PartitionMeta};
use crate::index::shard::{IndexShard, ShardKey};
use crate::storage::Store;
use rusqlite::Connection;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tracing::debug;

/// Partitions overlapping `[now - window, now + window]` are never evicted
pub const PROTECTION_WINDOW: Duration = Duration::from_secs(30 * 60);

/// Cache slot identity
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub partition: PartitionKey,
    pub tenant: String,
}

impl CacheKey {
    pub fn new(partition: PartitionKey, tenant: impl Into<String>) -> Self {
        Self {
            partition,
            tenant: tenant.into(),
        }
    }
}

/// The shards of one tenant within one partition
#[derive(Debug, Clone)]
pub struct IndexPartition {
    pub key: PartitionKey,
    pub start: i64,
    pub end: i64,
    pub tenant: String,
    accessed_at: u64,
    pub shards: BTreeMap<u32, IndexShard>,
}

impl IndexPartition {
    pub fn new(meta: &PartitionMeta, tenant: impl Into<String>) -> Self {
        Self {
            key: meta.key().clone(),
            start: meta.start_time(),
            end: meta.end_time(),
            tenant: tenant.into(),
            accessed_at: 0,
            shards: BTreeMap::new(),
        }
    }

    /// Load every shard the tenant has in the partition.
    ///
    /// Returns `None` if the store has nothing for the tenant.
    pub fn load<S: Store + ?Sized>(
        tx: &Connection,
        store: &S,
        meta: &PartitionMeta,
        tenant: &str,
    ) -> IndexResult<Option<Self>> {
        let mut partition = Self::new(meta, tenant);
        for shard in store.list_shards(tx, meta.key())? {
            let key = ShardKey::new(meta.key().clone(), shard, tenant);
            if let Some(s) = IndexShard::load(tx, store, key)? {
                partition.shards.insert(shard, s);
            }
        }
        if partition.shards.is_empty() {
            return Ok(None);
        }
        Ok(Some(partition))
    }

    /// The shard, created empty if absent
    pub fn shard_mut(&mut self, shard: u32) -> &mut IndexShard {
        let key = &self.key;
        let tenant = &self.tenant;
        self.shards
            .entry(shard)
            .or_insert_with(|| IndexShard::new(ShardKey::new(key.clone(), shard, tenant.clone())))
    }

    /// Logical tick of the last access
    pub fn accessed_at(&self) -> u64 {
        self.accessed_at
    }

    fn is_protected(&self, now_ms: i64) -> bool {
        let window = PROTECTION_WINDOW.as_millis() as i64;
        now_ms - window < self.end && now_ms + window >= self.start
    }
}

/// Bounded map of loaded partitions
#[derive(Debug)]
pub struct PartitionCache {
    capacity: usize,
    clock: u64,
    slots: HashMap<CacheKey, IndexPartition>,
}

impl PartitionCache {
    /// `capacity` is the number of slots kept per tenant
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            clock: 0,
            slots: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Number of slots held for the tenant
    pub fn tenant_len(&self, tenant: &str) -> usize {
        self.slots.keys().filter(|k| k.tenant == tenant).count()
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.slots.contains_key(key)
    }

    /// Look up a slot without refreshing its access time
    pub fn peek(&self, key: &CacheKey) -> Option<&IndexPartition> {
        self.slots.get(key)
    }

    pub fn peek_mut(&mut self, key: &CacheKey) -> Option<&mut IndexPartition> {
        self.slots.get_mut(key)
    }

    /// Look up a slot and refresh its access time
    pub fn get_mut(&mut self, key: &CacheKey) -> Option<&mut IndexPartition> {
        self.clock += 1;
        let tick = self.clock;
        let slot = self.slots.get_mut(key)?;
        slot.accessed_at = tick;
        Some(slot)
    }

    /// Add a slot, evict the tenant's surplus and return the new slot
    pub fn insert(&mut self, mut partition: IndexPartition, now_ms: i64) -> &mut IndexPartition {
        self.clock += 1;
        partition.accessed_at = self.clock;
        let key = CacheKey::new(partition.key.clone(), partition.tenant.clone());
        self.slots.remove(&key);
        self.evict(&key.tenant, 1, now_ms);
        self.slots.entry(key).or_insert(partition)
    }

    /// The cached slot, or the tenant's data loaded from the store.
    ///
    /// Nothing is cached when the store has no data for the tenant.
    pub fn get_or_load<S: Store + ?Sized>(
        &mut self,
        tx: &Connection,
        store: &S,
        meta: &PartitionMeta,
        tenant: &str,
        now_ms: i64,
    ) -> IndexResult<Option<&mut IndexPartition>> {
        let key = CacheKey::new(meta.key().clone(), tenant);
        let partition = match self.slots.remove(&key) {
            Some(p) => p,
            None => match IndexPartition::load(tx, store, meta, tenant)? {
                Some(p) => {
                    debug!(partition = %key.partition, tenant, shards = p.shards.len(), "Loaded partition");
                    p
                }
                None => return Ok(None),
            },
        };
        Ok(Some(self.insert(partition, now_ms)))
    }

    /// The cached slot, loaded from the store or created empty
    pub fn get_or_create<S: Store + ?Sized>(
        &mut self,
        tx: &Connection,
        store: &S,
        meta: &PartitionMeta,
        tenant: &str,
        now_ms: i64,
    ) -> IndexResult<&mut IndexPartition> {
        let key = CacheKey::new(meta.key().clone(), tenant);
        let partition = match self.slots.remove(&key) {
            Some(p) => p,
            None => IndexPartition::load(tx, store, meta, tenant)?
                .unwrap_or_else(|| IndexPartition::new(meta, tenant)),
        };
        Ok(self.insert(partition, now_ms))
    }

    pub fn remove(&mut self, key: &CacheKey) -> Option<IndexPartition> {
        self.slots.remove(key)
    }

    /// Drop every slot of the partition
    pub fn remove_partition(&mut self, partition: &PartitionKey) {
        self.slots.retain(|k, _| &k.partition != partition);
    }

    pub fn clear(&mut self) {
        self.slots.clear();
    }

    /// Evict the tenant's least recently accessed slots until it is within
    /// capacity, making room for `incoming` more. Protected slots stay.
    fn evict(&mut self, tenant: &str, incoming: usize, now_ms: i64) {
        let mut candidates: Vec<(u64, CacheKey)> = self
            .slots
            .iter()
            .filter(|(k, _)| k.tenant == tenant)
            .map(|(k, p)| (p.accessed_at, k.clone()))
            .collect();
        let mut surplus = (candidates.len() + incoming).saturating_sub(self.capacity);
        if surplus == 0 {
            return;
        }

        candidates.sort_by_key(|(tick, _)| *tick);
        for (_, key) in candidates {
            if surplus == 0 {
                break;
            }
            let protected = self
                .slots
                .get(&key)
                .map_or(false, |p| p.is_protected(now_ms));
            if protected {
                continue;
            }
            self.slots.remove(&key);
            surplus -= 1;
            debug!(partition = %key.partition, tenant = %key.tenant, "Evicted partition");
        }
    }
}
