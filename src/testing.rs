//! Shared test helpers

use crate::block::block_id_at;
use crate::storage::{open_database, SqliteStore, Store};
use rusqlite::Connection;
use tempfile::TempDir;

/// Unix milliseconds of an RFC 3339 timestamp
pub fn millis(ts: &str) -> i64 {
    chrono::DateTime::parse_from_rfc3339(ts)
        .unwrap()
        .timestamp_millis()
}

/// Block ID embedding the given time
pub fn ulid(ts: &str) -> String {
    block_id_at(millis(ts), 0x0f0f_0f0f_0f0f_0f0f).unwrap()
}

/// Fresh on-disk index database with buckets created
pub fn temp_db() -> (TempDir, Connection) {
    let dir = tempfile::tempdir().unwrap();
    let conn = open_database(&dir.path().join("index.db")).unwrap();
    SqliteStore::new().create_buckets(&conn).unwrap();
    (dir, conn)
}
