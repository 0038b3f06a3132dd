//! Retention policies
//!
//! A policy inspects the partition list (oldest first) and decides which
//! tenants' data should be dropped from which partitions. The index applies
//! the resulting tombstones in `Index::truncate_index`.

use crate::index::partition::{PartitionKey, PartitionMeta};
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

/// All shards of `tenant` in `partition` are to be deleted
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Tombstone {
    pub partition: PartitionKey,
    pub tenant: String,
}

/// Decides which parts of the index are deleted
pub trait RetentionPolicy {
    /// Inspect the partitions, oldest first, and return the tombstones
    fn create_tombstones(&mut self, partitions: &[PartitionMeta]) -> Vec<Tombstone>;
}

/// Drops tenant data once its partition ended more than the retention
/// period (plus a grace period) ago.
#[derive(Debug, Clone)]
pub struct TimeBasedRetentionPolicy {
    now_ms: i64,
    default_period: Option<Duration>,
    overrides: HashMap<String, Option<Duration>>,
    grace_period: Duration,
    max_tombstones: usize,
}

impl TimeBasedRetentionPolicy {
    /// `default_period` of `None` keeps data of tenants without an override
    /// forever.
    pub fn new(
        default_period: Option<Duration>,
        grace_period: Duration,
        max_tombstones: usize,
        now_ms: i64,
    ) -> Self {
        Self {
            now_ms,
            default_period,
            overrides: HashMap::new(),
            grace_period,
            max_tombstones,
        }
    }

    /// Set the tenant's retention period; `None` keeps its data forever
    pub fn with_override(mut self, tenant: impl Into<String>, period: Option<Duration>) -> Self {
        self.overrides.insert(tenant.into(), period);
        self
    }

    /// Data of partitions ending before the deadline is deleted
    fn deadline(&self, tenant: &str) -> Option<i64> {
        let period = match self.overrides.get(tenant) {
            Some(period) => *period,
            None => self.default_period,
        };
        period.map(|p| self.now_ms - p.as_millis() as i64)
    }

    fn latest_deadline(&self) -> Option<i64> {
        self.overrides
            .values()
            .chain(std::iter::once(&self.default_period))
            .flatten()
            .map(|p| self.now_ms - p.as_millis() as i64)
            .max()
    }
}

impl RetentionPolicy for TimeBasedRetentionPolicy {
    fn create_tombstones(&mut self, partitions: &[PartitionMeta]) -> Vec<Tombstone> {
        let mut tombstones = Vec::new();
        let Some(latest) = self.latest_deadline() else {
            debug!("No retention periods defined, skipping");
            return tombstones;
        };
        let grace = self.grace_period.as_millis() as i64;

        for p in partitions {
            let end = p.end_time() + grace;
            if end >= latest {
                // Later partitions end even later.
                break;
            }

            let mut named = false;
            for tenant in p.tenants().iter().filter(|t| !t.is_empty()) {
                named = true;
                if tombstones.len() >= self.max_tombstones {
                    return tombstones;
                }
                if matches!(self.deadline(tenant), Some(deadline) if end < deadline) {
                    tombstones.push(Tombstone {
                        partition: p.key().clone(),
                        tenant: tenant.clone(),
                    });
                }
            }

            // Anonymous shards hold uncompacted data of any tenant: they go
            // only once the named tenants are gone.
            if !named && p.has_tenant("") {
                if tombstones.len() >= self.max_tombstones {
                    return tombstones;
                }
                tombstones.push(Tombstone {
                    partition: p.key().clone(),
                    tenant: String::new(),
                });
            }
        }
        tombstones
    }
}
