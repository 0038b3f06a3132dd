//! Block identifiers
//!
//! Block IDs are ULIDs: the leading 48 bits hold the creation time in Unix
//! milliseconds, which is all the index needs to place a block in a partition.

use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use ulid::{Generator, Ulid};

/// Errors produced when parsing or generating block IDs
#[derive(Error, Debug)]
pub enum BlockIdError {
    #[error("Invalid block ID {id:?}: {reason}")]
    Invalid { id: String, reason: String },

    #[error("Block ID sequence exhausted for the current millisecond")]
    Exhausted,

    #[error("Invalid block ID timestamp: {0}")]
    InvalidTimestamp(i64),
}

/// Extract the creation time (Unix ms) embedded in a block ID
pub fn block_time(id: &str) -> Result<i64, BlockIdError> {
    let ulid = Ulid::from_string(id).map_err(|e| BlockIdError::Invalid {
        id: id.to_string(),
        reason: e.to_string(),
    })?;
    Ok(ulid.timestamp_ms() as i64)
}

/// Build a block ID for the given time with the given entropy
pub fn block_id_at(timestamp_ms: i64, random: u128) -> Result<String, BlockIdError> {
    let ms = u64::try_from(timestamp_ms).map_err(|_| BlockIdError::InvalidTimestamp(timestamp_ms))?;
    Ok(Ulid::from_parts(ms, random).to_string())
}

/// Monotonic block ID sequence
///
/// IDs generated within the same millisecond are strictly increasing.
/// Construct one per process and share it by reference.
pub struct BlockIdGenerator {
    inner: Mutex<Generator>,
}

impl Default for BlockIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for BlockIdGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockIdGenerator").finish_non_exhaustive()
    }
}

impl BlockIdGenerator {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Generator::new()),
        }
    }

    /// Next ID for the current time
    pub fn generate(&self) -> Result<String, BlockIdError> {
        self.generate_at_time(SystemTime::now())
    }

    /// Next ID for the given Unix millisecond timestamp
    pub fn generate_at(&self, timestamp_ms: i64) -> Result<String, BlockIdError> {
        let ms = u64::try_from(timestamp_ms).map_err(|_| BlockIdError::InvalidTimestamp(timestamp_ms))?;
        self.generate_at_time(UNIX_EPOCH + Duration::from_millis(ms))
    }

    fn generate_at_time(&self, time: SystemTime) -> Result<String, BlockIdError> {
        let mut generator = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        generator
            .generate_from_datetime(time)
            .map(|id| id.to_string())
            .map_err(|_| BlockIdError::Exhausted)
    }
}
