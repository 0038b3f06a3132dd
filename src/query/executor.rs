//! Query result assembly
//!
//! Two queriers share the shard scan:
//!
//! - `BlockMetadataQuerier` rebuilds pared-down block records, each with a
//!   fresh string table holding only the strings the record references.
//! - `MetadataLabelQuerier` collects the distinct label sets of matching
//!   datasets without assembling records.

use crate::block::{BlockMeta, Dataset, LabelPair, Labels, StringTable};
use crate::index::IndexShard;
use crate::query::metadata::{CompiledQuery, DatasetMatch};
use std::collections::BTreeSet;

/// Collects the matching block records
pub struct BlockMetadataQuerier<'q> {
    query: &'q CompiledQuery,
    blocks: Vec<BlockMeta>,
}

impl<'q> BlockMetadataQuerier<'q> {
    pub fn new(query: &'q CompiledQuery) -> Self {
        Self {
            query,
            blocks: Vec::new(),
        }
    }

    /// Append the shard's matches, sorted by block ID
    pub fn visit(&mut self, shard: &IndexShard) {
        let strings = shard.strings();
        // Offsets of the requested label names in the shard table.
        let names: Vec<i32> = self
            .query
            .labels()
            .iter()
            .filter_map(|name| strings.find(name))
            .collect();

        let mut found = Vec::new();
        self.query.scan(shard, |block, matches| {
            found.push(pare_block(strings, block, &matches, &names));
        });
        found.sort_by(|a, b| a.id.cmp(&b.id));
        self.blocks.extend(found);
    }

    pub fn into_blocks(self) -> Vec<BlockMeta> {
        self.blocks
    }
}

/// Copy the block with only the matching datasets; strings are re-interned
/// in reference order.
fn pare_block(
    strings: &StringTable,
    block: &BlockMeta,
    matches: &[DatasetMatch<'_>],
    names: &[i32],
) -> BlockMeta {
    let mut table = StringTable::new();
    let tenant = table.put(strings.lookup(block.tenant));
    let created_by = table.put(strings.lookup(block.created_by));

    let datasets = matches
        .iter()
        .map(|m| {
            let ds = m.dataset;
            let tenant = table.put(strings.lookup(ds.tenant));
            let name = table.put(strings.lookup(ds.name));
            let mut labels = Vec::new();
            if !names.is_empty() {
                let mut seen: Vec<Vec<i32>> = Vec::new();
                for set in &m.sets {
                    let projected = project(set, names);
                    if projected.is_empty() || seen.contains(&projected) {
                        continue;
                    }
                    labels.push((projected.len() / 2) as i32);
                    labels.extend(projected.iter().map(|&r| table.put(strings.lookup(r))));
                    seen.push(projected);
                }
            }
            Dataset {
                tenant,
                name,
                min_time: ds.min_time,
                max_time: ds.max_time,
                size: ds.size,
                table_of_contents: ds.table_of_contents.clone(),
                labels,
            }
        })
        .collect();

    BlockMeta {
        format_version: block.format_version,
        id: block.id.clone(),
        tenant,
        shard: block.shard,
        compaction_level: block.compaction_level,
        min_time: block.min_time,
        max_time: block.max_time,
        created_by,
        size: block.size,
        datasets,
        string_table: table.into_strings(),
    }
}

/// The `[name, value, ...]` pairs of `set` named in `names`, in `names` order
fn project(set: &[i32], names: &[i32]) -> Vec<i32> {
    let mut projected = Vec::with_capacity(names.len() * 2);
    for &name in names {
        if let Some(pair) = set.chunks_exact(2).find(|pair| pair[0] == name) {
            projected.extend_from_slice(pair);
        }
    }
    projected
}

/// Collects the distinct label sets of matching datasets
pub struct MetadataLabelQuerier<'q> {
    query: &'q CompiledQuery,
    labels: BTreeSet<Labels>,
}

impl<'q> MetadataLabelQuerier<'q> {
    pub fn new(query: &'q CompiledQuery) -> Self {
        Self {
            query,
            labels: BTreeSet::new(),
        }
    }

    pub fn visit(&mut self, shard: &IndexShard) {
        let strings = shard.strings();
        let requested = self.query.labels();
        let labels = &mut self.labels;

        self.query.scan(shard, |_, matches| {
            for set in matches.iter().flat_map(|m| m.sets.iter()) {
                let pairs = set
                    .chunks_exact(2)
                    .map(|pair| LabelPair::new(strings.lookup(pair[0]), strings.lookup(pair[1])));
                let mut pairs: Vec<LabelPair> = if requested.is_empty() {
                    let mut all: Vec<LabelPair> = pairs.collect();
                    all.sort();
                    all
                } else {
                    let all: Vec<LabelPair> = pairs.collect();
                    requested
                        .iter()
                        .filter_map(|name| all.iter().find(|p| &p.name == name).cloned())
                        .collect()
                };
                pairs.dedup();
                if !pairs.is_empty() {
                    labels.insert(Labels { labels: pairs });
                }
            }
        });
    }

    /// Distinct label sets, sorted
    pub fn into_labels(self) -> Vec<Labels> {
        self.labels.into_iter().collect()
    }
}
