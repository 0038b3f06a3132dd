//! Block metadata model
//!
//! - **types**: block and dataset records, request shapes
//! - **strings**: string interning used to de-duplicate strings per shard
//! - **id**: block ID time extraction and monotonic ID generation

pub mod id;
pub mod strings;
pub mod types;

pub use id::{block_id_at, block_time, BlockIdError, BlockIdGenerator};
pub use strings::StringTable;
pub use types::{
    BlockList, BlockMeta, CompactedBlocks, Dataset, LabelPair, LabelSets, Labels, TenantStats,
};
