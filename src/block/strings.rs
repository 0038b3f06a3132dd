//! String interning for block metadata
//!
//! Block records carry their own small string table. The index keeps one
//! cumulative table per shard instead: on insert the record's references are
//! rewritten to shard offsets (`import`), on read they are rewritten back into
//! a fresh, self-contained table (`export`).
//!
//! Offset 0 always holds the empty string and is never persisted.

use crate::block::types::BlockMeta;
use crate::storage::StorageError;
use std::collections::HashMap;

/// Append-only string table with reverse lookup
#[derive(Debug, Clone)]
pub struct StringTable {
    strings: Vec<String>,
    dict: HashMap<String, i32>,
}

impl Default for StringTable {
    fn default() -> Self {
        Self::new()
    }
}

impl StringTable {
    pub fn new() -> Self {
        let mut dict = HashMap::new();
        dict.insert(String::new(), 0);
        Self {
            strings: vec![String::new()],
            dict,
        }
    }

    /// Number of strings, including the empty string at offset 0
    pub fn len(&self) -> usize {
        self.strings.len()
    }

    /// True if the table holds nothing but the empty string
    pub fn is_empty(&self) -> bool {
        self.strings.len() <= 1
    }

    pub fn strings(&self) -> &[String] {
        &self.strings
    }

    pub fn into_strings(self) -> Vec<String> {
        self.strings
    }

    /// Intern a string, returning its offset
    pub fn put(&mut self, s: &str) -> i32 {
        if let Some(&offset) = self.dict.get(s) {
            return offset;
        }
        let offset = self.strings.len() as i32;
        self.strings.push(s.to_string());
        self.dict.insert(s.to_string(), offset);
        offset
    }

    /// Resolve an offset; unknown offsets resolve to the empty string
    pub fn lookup(&self, offset: i32) -> &str {
        usize::try_from(offset)
            .ok()
            .and_then(|i| self.strings.get(i))
            .map(String::as_str)
            .unwrap_or("")
    }

    /// Offset of a string, if interned
    pub fn find(&self, s: &str) -> Option<i32> {
        self.dict.get(s).copied()
    }

    /// Drop every string at or after `len`
    pub fn truncate(&mut self, len: usize) {
        if len == 0 || len >= self.strings.len() {
            return;
        }
        for s in self.strings.drain(len..) {
            self.dict.remove(&s);
        }
    }

    /// Append persisted string ranges, given as `(offset, strings)` pairs in
    /// offset order. Every range must start exactly where the table ends.
    pub fn load<I>(&mut self, ranges: I) -> Result<(), StorageError>
    where
        I: IntoIterator<Item = (u32, Vec<String>)>,
    {
        for (offset, strings) in ranges {
            if offset as usize != self.strings.len() {
                return Err(StorageError::Corruption(format!(
                    "string table range at offset {} does not follow offset {}",
                    offset,
                    self.strings.len()
                )));
            }
            for s in strings {
                let next = self.strings.len() as i32;
                self.dict.entry(s.clone()).or_insert(next);
                self.strings.push(s);
            }
        }
        Ok(())
    }

    /// Rewrite the block's references from its own table to this table and
    /// clear the block's table
    pub fn import(&mut self, md: &mut BlockMeta) {
        let source = std::mem::take(&mut md.string_table);
        rewrite_references(md, |r| {
            let s = usize::try_from(r)
                .ok()
                .and_then(|i| source.get(i))
                .map(String::as_str)
                .unwrap_or("");
            self.put(s)
        });
    }

    /// Rewrite the block's references from this table into a new table
    /// embedded in the block
    pub fn export(&self, md: &mut BlockMeta) {
        let mut local = StringTable::new();
        rewrite_references(md, |r| local.put(self.lookup(r)));
        md.string_table = local.into_strings();
    }
}

/// Visit every string reference of a block in a fixed order: block tenant,
/// creator, then per dataset its tenant, name and label names and values.
pub(crate) fn rewrite_references<F>(md: &mut BlockMeta, mut f: F)
where
    F: FnMut(i32) -> i32,
{
    md.tenant = f(md.tenant);
    md.created_by = f(md.created_by);
    for ds in &mut md.datasets {
        ds.tenant = f(ds.tenant);
        ds.name = f(ds.name);
        let mut i = 0;
        while i < ds.labels.len() {
            let pairs = usize::try_from(ds.labels[i]).unwrap_or(0);
            i += 1;
            let end = (i + pairs * 2).min(ds.labels.len());
            for r in &mut ds.labels[i..end] {
                *r = f(*r);
            }
            i = end;
        }
    }
}
