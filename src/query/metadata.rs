//! Metadata queries
//!
//! A `MetadataQuery` selects the datasets of the given tenants whose time
//! range overlaps `[start_time, end_time]` and which have a label set
//! satisfying the selector. Compiling validates the query once; the compiled
//! form is then applied shard by shard.

use crate::block::{BlockMeta, Dataset};
use crate::index::IndexShard;
use crate::query::error::{QueryError, QueryResult};
use crate::query::matcher::{LabelMatcher, Matcher};
use crate::query::parser::parse_selector;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Label-filtered time range query over block metadata
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataQuery {
    /// Label selector, e.g. `{service_name="api"}`
    pub expr: String,
    /// Unix timestamp in milliseconds
    pub start_time: i64,
    /// Unix timestamp in milliseconds
    pub end_time: i64,
    pub tenant: Vec<String>,
    /// Label names to keep in the results; labels are dropped when empty
    #[serde(default)]
    pub labels: Vec<String>,
}

impl MetadataQuery {
    pub fn new(expr: impl Into<String>, start_time: i64, end_time: i64) -> Self {
        Self {
            expr: expr.into(),
            start_time,
            end_time,
            ..Default::default()
        }
    }

    pub fn tenant(mut self, tenant: impl Into<String>) -> Self {
        self.tenant.push(tenant.into());
        self
    }

    pub fn label(mut self, name: impl Into<String>) -> Self {
        self.labels.push(name.into());
        self
    }

    /// Validate and compile the query
    pub fn compile(&self) -> QueryResult<CompiledQuery> {
        if self.tenant.is_empty() {
            return Err(QueryError::MissingTenant);
        }
        let matchers = parse_selector(&self.expr)?;

        // Blocks not yet compacted live in the anonymous tenant shards.
        let mut shard_tenants = self.tenant.clone();
        shard_tenants.push(String::new());
        shard_tenants.sort();
        shard_tenants.dedup();

        Ok(CompiledQuery {
            start_time: self.start_time,
            end_time: self.end_time,
            matchers,
            tenants: self.tenant.iter().cloned().collect(),
            shard_tenants,
            labels: self.labels.clone(),
        })
    }
}

/// A validated metadata query
#[derive(Debug, Clone)]
pub struct CompiledQuery {
    start_time: i64,
    end_time: i64,
    matchers: Vec<Matcher>,
    tenants: HashSet<String>,
    shard_tenants: Vec<String>,
    labels: Vec<String>,
}

/// A dataset that satisfied the query with the label sets that matched
pub(crate) struct DatasetMatch<'s> {
    pub dataset: &'s Dataset,
    pub sets: Vec<&'s [i32]>,
}

impl CompiledQuery {
    pub fn start_time(&self) -> i64 {
        self.start_time
    }

    pub fn end_time(&self) -> i64 {
        self.end_time
    }

    /// Tenants whose shards are visited, in visiting order
    pub fn shard_tenants(&self) -> &[String] {
        &self.shard_tenants
    }

    /// Requested label names
    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// Call `f` for every block of the shard with at least one matching
    /// dataset. References stay in shard offsets.
    pub(crate) fn scan<'s, F>(&self, shard: &'s IndexShard, mut f: F)
    where
        F: FnMut(&'s BlockMeta, Vec<DatasetMatch<'s>>),
    {
        if !shard.overlaps(self.start_time, self.end_time) {
            return;
        }
        let strings = shard.strings();
        let matcher = LabelMatcher::new(strings, &self.matchers);
        if !matcher.is_valid() {
            return;
        }

        for block in shard.raw_blocks() {
            if !block.overlaps(self.start_time, self.end_time) {
                continue;
            }
            let matches: Vec<DatasetMatch<'s>> = block
                .datasets
                .iter()
                .filter(|ds| self.tenants.contains(strings.lookup(ds.tenant)))
                .filter(|ds| ds.overlaps(self.start_time, self.end_time))
                .filter_map(|ds| {
                    if ds.labels.is_empty() {
                        return matcher.matches(&[]).then(|| DatasetMatch {
                            dataset: ds,
                            sets: Vec::new(),
                        });
                    }
                    let sets: Vec<&'s [i32]> =
                        ds.label_sets().filter(|set| matcher.matches(set)).collect();
                    (!sets.is_empty()).then(|| DatasetMatch { dataset: ds, sets })
                })
                .collect();
            if !matches.is_empty() {
                f(block, matches);
            }
        }
    }
}
