//! Index Storage
//!
//! The durable side of the index:
//!
//! - **store**: the `Store` trait the index consumes
//! - **sqlite**: `Store` implementation over SQLite transactions
//! - **encoding**: record encoding (bincode blocks, length-prefixed strings)
//! - **error**: error types
//!
//! # Layout
//!
//! ```text
//! partition → shard → tenant → { blocks, strings }
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use metaindex::storage::{open_database, SqliteStore, Store};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut conn = open_database(std::path::Path::new("./index.db"))?;
//!     let store = SqliteStore::new();
//!
//!     let tx = conn.transaction()?;
//!     store.create_buckets(&tx)?;
//!     tx.commit()?;
//!
//!     println!("{} partitions", store.list_partitions(&conn)?.len());
//!     Ok(())
//! }
//! ```

pub mod encoding;
pub mod error;
pub mod sqlite;
pub mod store;

pub use error::{StorageError, StorageResult};
pub use sqlite::{open_database, SqliteStore};
pub use store::{Store, StringRange};
