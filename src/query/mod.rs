//! Metadata Query Engine
//!
//! Resolves a label selector plus a time range into block metadata:
//!
//! - **Parser**: label selector syntax (`{name="value", other=~"re"}`)
//! - **Matcher**: label matchers bound to shard string tables
//! - **Metadata**: `MetadataQuery` and its compiled form
//! - **Iterator**: partition and shard resolution
//! - **Executor**: result assembly (block records or label sets)
//!
//! # Examples
//!
//! ```rust,ignore
//! use metaindex::query::MetadataQuery;
//!
//! let query = MetadataQuery::new(r#"{service_name=~"api-.*"}"#, start, end)
//!     .tenant("tenant-a")
//!     .label("service_name");
//!
//! let blocks = index.query_metadata(&tx, &query)?;
//! let labels = index.query_metadata_labels(&tx, &query)?;
//! ```

mod error;
mod executor;
pub(crate) mod iterator;
mod matcher;
mod metadata;
mod parser;

pub use error::{QueryError, QueryResult};
pub use executor::{BlockMetadataQuerier, MetadataLabelQuerier};
pub use matcher::{LabelMatcher, MatchType, Matcher};
pub use metadata::{CompiledQuery, MetadataQuery};
pub use parser::parse_selector;
