//! Query error types
//!
//! Every variant describes a malformed query; none of them is retryable.

use thiserror::Error;

/// Errors that can occur while compiling a metadata query
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    /// The query names no tenant
    #[error("tenant_id is required")]
    MissingTenant,

    /// The label selector could not be parsed
    #[error("Parse error: {0}")]
    Parse(String),

    /// A regex matcher does not compile
    #[error("Invalid regex {pattern:?}: {reason}")]
    InvalidRegex { pattern: String, reason: String },
}

/// Result type for query operations
pub type QueryResult<T> = Result<T, QueryError>;
