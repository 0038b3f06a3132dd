//! Index error types

use crate::block::BlockIdError;
use crate::query::QueryError;
use crate::storage::StorageError;
use thiserror::Error;

/// Errors that can occur in index operations
#[derive(Error, Debug)]
pub enum IndexError {
    /// The checked insert found the block already present
    #[error("block already exists")]
    BlockExists,

    /// A partition key could not be parsed
    #[error("Invalid partition key: {0}")]
    InvalidPartitionKey(String),

    /// A block ID does not embed a usable timestamp
    #[error(transparent)]
    BlockId(#[from] BlockIdError),

    /// The query is malformed; never retried
    #[error("Invalid query: {0}")]
    InvalidQuery(#[from] QueryError),

    /// Storage layer error
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Lock acquisition failed
    #[error("Lock error: {0}")]
    Lock(String),
}

/// Result type alias for index operations
pub type IndexResult<T> = Result<T, IndexError>;
