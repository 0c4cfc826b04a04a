//! Connection handle and schema bootstrap.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use tokio::sync::Mutex;

use crate::error::StorageError;

/// Shared handle to the client database.
///
/// A single connection behind an async mutex: the client is the only
/// process touching the store, and every store method is one lock section,
/// which makes it atomic with respect to concurrent engine callers.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open (and migrate) the database file at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    /// Fresh in-memory database, used by tests.
    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self, StorageError> {
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub(crate) fn conn(&self) -> &Arc<Mutex<Connection>> {
        &self.conn
    }
}

fn init_schema(conn: &Connection) -> Result<(), StorageError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS readings (
            local_id TEXT PRIMARY KEY,
            remote_id INTEGER,
            value REAL NOT NULL,
            unit TEXT NOT NULL,
            recorded_at TEXT NOT NULL,
            notes TEXT,
            context TEXT NOT NULL,
            synced INTEGER NOT NULL DEFAULT 0
        );
        CREATE INDEX IF NOT EXISTS idx_readings_remote_id ON readings (remote_id);
        CREATE INDEX IF NOT EXISTS idx_readings_synced ON readings (synced);

        CREATE TABLE IF NOT EXISTS sync_queue (
            id TEXT PRIMARY KEY,
            op TEXT NOT NULL,
            reading_local_id TEXT NOT NULL,
            payload TEXT,
            retry_count INTEGER NOT NULL DEFAULT 0,
            last_error TEXT,
            status TEXT,
            processing_started_at TEXT,
            enqueued_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_sync_queue_status ON sync_queue (status);
        CREATE INDEX IF NOT EXISTS idx_sync_queue_reading ON sync_queue (reading_local_id);

        CREATE TABLE IF NOT EXISTS conflicts (
            id TEXT PRIMARY KEY,
            reading_local_id TEXT NOT NULL,
            local_snapshot TEXT NOT NULL,
            remote_snapshot TEXT NOT NULL,
            status TEXT NOT NULL,
            created_at TEXT NOT NULL,
            resolved_at TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_conflicts_status ON conflicts (status);

        CREATE TABLE IF NOT EXISTS audit_entries (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            reading_local_id TEXT NOT NULL,
            strategy TEXT NOT NULL,
            local_snapshot TEXT NOT NULL,
            remote_snapshot TEXT NOT NULL,
            logged_at TEXT NOT NULL
        );",
    )?;
    Ok(())
}

/// Persist an enum as its serde string form ("mg_dl", "pending", ...).
pub(crate) fn enum_to_db<T: serde::Serialize>(value: &T) -> Result<String, StorageError> {
    Ok(serde_json::to_string(value)?.trim_matches('"').to_string())
}

pub(crate) fn enum_from_db<T: serde::de::DeserializeOwned>(
    value: &str,
) -> Result<T, StorageError> {
    Ok(serde_json::from_str(&format!("\"{}\"", value))?)
}

pub(crate) fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, StorageError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|err| StorageError::Corrupt(format!("bad timestamp '{value}': {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creates_all_tables() {
        let db = Database::open_in_memory().expect("open");
        let conn = db.conn.try_lock().expect("lock");
        for table in ["readings", "sync_queue", "conflicts", "audit_entries"] {
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
                    [table],
                    |row| row.get(0),
                )
                .expect("query sqlite_master");
            assert_eq!(count, 1, "missing table {table}");
        }
    }

    #[test]
    fn opening_the_same_file_twice_is_idempotent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("glucolog.db");
        Database::open(&path).expect("first open");
        Database::open(&path).expect("second open");
    }

    #[test]
    fn enum_round_trip_uses_serde_names() {
        use glucolog_core::readings::ReadingUnit;

        let stored = enum_to_db(&ReadingUnit::MgDl).expect("to db");
        assert_eq!(stored, "mg_dl");
        let back: ReadingUnit = enum_from_db(&stored).expect("from db");
        assert_eq!(back, ReadingUnit::MgDl);
    }
}
