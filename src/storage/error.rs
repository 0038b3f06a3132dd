//! Storage error types
//!
//! Defines all errors that can occur in the durable index store.

use thiserror::Error;

/// Errors that can occur in the index store
#[derive(Error, Debug)]
pub enum StorageError {
    /// I/O operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Database operation failed
    #[error("Database error: {0}")]
    Database(String),

    /// A bucket (table) required by the operation does not exist
    #[error("Bucket not found: {0}")]
    NotFound(String),

    /// Serialization failed
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A stored record could not be decoded
    #[error("Corrupt data: {0}")]
    Corruption(String),
}

impl From<rusqlite::Error> for StorageError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(_, Some(msg)) if msg.starts_with("no such table") => {
                StorageError::NotFound(msg.clone())
            }
            _ => StorageError::Database(err.to_string()),
        }
    }
}

impl From<bincode::Error> for StorageError {
    fn from(err: bincode::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

/// Result type alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;
