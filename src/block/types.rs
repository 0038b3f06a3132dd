//! Block metadata records
//!
//! The index consumes these records but does not own their format:
//! - `BlockMeta`: one immutable data block (ID, tenant, shard, time range)
//! - `Dataset`: a per-dataset sub-record with its own time range and labels
//! - `BlockList` / `CompactedBlocks`: request shapes for lookups and replacement
//!
//! All string-valued fields (`tenant`, `created_by`, `name`, label names and
//! values) are `i32` references into the record's own `string_table`.

use serde::{Deserialize, Serialize};

/// Metadata of a single immutable data block
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockMeta {
    #[serde(default)]
    pub format_version: u32,
    /// Time-ordered block identifier (ULID)
    pub id: String,
    /// Reference to the tenant name; 0 is the anonymous tenant
    #[serde(default)]
    pub tenant: i32,
    #[serde(default)]
    pub shard: u32,
    #[serde(default)]
    pub compaction_level: u32,
    /// Unix timestamp in milliseconds
    pub min_time: i64,
    /// Unix timestamp in milliseconds
    pub max_time: i64,
    /// Reference to the name of the writer that created the block
    #[serde(default)]
    pub created_by: i32,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub datasets: Vec<Dataset>,
    /// Strings referenced by the record; index 0 is always the empty string
    #[serde(default)]
    pub string_table: Vec<String>,
}

/// A dataset stored within a block
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dataset {
    #[serde(default)]
    pub tenant: i32,
    #[serde(default)]
    pub name: i32,
    pub min_time: i64,
    pub max_time: i64,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub table_of_contents: Vec<u64>,
    /// Label sets: `[n, name_1, value_1, ..., name_n, value_n, m, ...]`
    #[serde(default)]
    pub labels: Vec<i32>,
}

impl BlockMeta {
    /// Resolve a string reference against the record's own table
    pub fn string(&self, reference: i32) -> &str {
        usize::try_from(reference)
            .ok()
            .and_then(|i| self.string_table.get(i))
            .map(String::as_str)
            .unwrap_or("")
    }

    /// Name of the tenant the block belongs to ("" for anonymous blocks)
    pub fn tenant_name(&self) -> &str {
        self.string(self.tenant)
    }

    /// Whether the block's time range overlaps `[start, end]` (inclusive)
    pub fn overlaps(&self, start: i64, end: i64) -> bool {
        self.min_time <= end && self.max_time >= start
    }
}

impl Dataset {
    /// Whether the dataset's time range overlaps `[start, end]` (inclusive)
    pub fn overlaps(&self, start: i64, end: i64) -> bool {
        self.min_time <= end && self.max_time >= start
    }

    /// Iterate over the label sets of the dataset
    pub fn label_sets(&self) -> LabelSets<'_> {
        LabelSets {
            labels: &self.labels,
        }
    }
}

/// Iterator over the label sets encoded in `Dataset::labels`
///
/// Each item is the flat `[name, value, name, value, ...]` slice of one set.
/// A malformed tail (count exceeding the remaining entries) ends iteration.
pub struct LabelSets<'a> {
    labels: &'a [i32],
}

impl<'a> Iterator for LabelSets<'a> {
    type Item = &'a [i32];

    fn next(&mut self) -> Option<Self::Item> {
        let (&count, rest) = self.labels.split_first()?;
        let len = usize::try_from(count).ok()? * 2;
        if rest.len() < len {
            self.labels = &[];
            return None;
        }
        let (set, rest) = rest.split_at(len);
        self.labels = rest;
        Some(set)
    }
}

/// A list of block IDs within a single tenant shard
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockList {
    #[serde(default)]
    pub tenant: String,
    #[serde(default)]
    pub shard: u32,
    #[serde(default)]
    pub blocks: Vec<String>,
}

impl BlockList {
    pub fn new(tenant: impl Into<String>, shard: u32, blocks: Vec<String>) -> Self {
        Self {
            tenant: tenant.into(),
            shard,
            blocks,
        }
    }
}

/// Result of a compaction job: new blocks replacing the source blocks
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompactedBlocks {
    #[serde(default)]
    pub source_blocks: BlockList,
    #[serde(default)]
    pub new_blocks: Vec<BlockMeta>,
}

/// Summary of the data a tenant has in the index
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantStats {
    pub data_ingested: bool,
    /// Start of the oldest partition with tenant data (Unix ms)
    pub oldest_profile_time: i64,
    /// End of the newest partition with tenant data (Unix ms)
    pub newest_profile_time: i64,
}

/// A single label name/value pair
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LabelPair {
    pub name: String,
    pub value: String,
}

impl LabelPair {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// A set of labels
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Labels {
    pub labels: Vec<LabelPair>,
}
