//! Sqlite-backed conflict store.

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};

use glucolog_core::errors::Result;
use glucolog_core::sync::{Conflict, ConflictStatus, ConflictStore};

use crate::db::{enum_from_db, enum_to_db, parse_timestamp, Database};
use crate::error::StorageError;

const SELECT_COLUMNS: &str =
    "id, reading_local_id, local_snapshot, remote_snapshot, status, created_at, resolved_at";

struct ConflictRow {
    id: String,
    reading_local_id: String,
    local_snapshot: String,
    remote_snapshot: String,
    status: String,
    created_at: String,
    resolved_at: Option<String>,
}

impl ConflictRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            reading_local_id: row.get(1)?,
            local_snapshot: row.get(2)?,
            remote_snapshot: row.get(3)?,
            status: row.get(4)?,
            created_at: row.get(5)?,
            resolved_at: row.get(6)?,
        })
    }

    fn into_conflict(self) -> std::result::Result<Conflict, StorageError> {
        Ok(Conflict {
            id: self.id,
            reading_local_id: self.reading_local_id,
            local: serde_json::from_str(&self.local_snapshot)?,
            remote: serde_json::from_str(&self.remote_snapshot)?,
            status: enum_from_db(&self.status)?,
            created_at: parse_timestamp(&self.created_at)?,
            resolved_at: self
                .resolved_at
                .as_deref()
                .map(parse_timestamp)
                .transpose()?,
        })
    }
}

pub struct SqliteConflictStore {
    db: Database,
}

impl SqliteConflictStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ConflictStore for SqliteConflictStore {
    async fn insert(&self, conflict: Conflict) -> Result<()> {
        let local_snapshot = serde_json::to_string(&conflict.local).map_err(StorageError::from)?;
        let remote_snapshot =
            serde_json::to_string(&conflict.remote).map_err(StorageError::from)?;
        let conn = self.db.conn().lock().await;
        conn.execute(
            "INSERT INTO conflicts (id, reading_local_id, local_snapshot, remote_snapshot, status, created_at, resolved_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                conflict.id,
                conflict.reading_local_id,
                local_snapshot,
                remote_snapshot,
                enum_to_db(&conflict.status).map_err(StorageError::from)?,
                conflict.created_at.to_rfc3339(),
                conflict.resolved_at.map(|at| at.to_rfc3339()),
            ],
        )
        .map_err(StorageError::from)?;
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Conflict>> {
        let conn = self.db.conn().lock().await;
        let row = conn
            .query_row(
                &format!("SELECT {SELECT_COLUMNS} FROM conflicts WHERE id = ?1"),
                [id],
                ConflictRow::from_row,
            )
            .optional()
            .map_err(StorageError::from)?;
        row.map(|row| row.into_conflict().map_err(Into::into))
            .transpose()
    }

    async fn list_pending(&self) -> Result<Vec<Conflict>> {
        let conn = self.db.conn().lock().await;
        let rows = {
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {SELECT_COLUMNS} FROM conflicts WHERE status = 'pending' ORDER BY created_at, id"
                ))
                .map_err(StorageError::from)?;
            let rows = stmt
                .query_map([], ConflictRow::from_row)
                .map_err(StorageError::from)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(StorageError::from)?;
            rows
        };
        rows.into_iter()
            .map(|row| row.into_conflict().map_err(Into::into))
            .collect()
    }

    async fn find_pending_for_reading(&self, reading_local_id: &str) -> Result<Option<Conflict>> {
        let conn = self.db.conn().lock().await;
        let row = conn
            .query_row(
                &format!(
                    "SELECT {SELECT_COLUMNS} FROM conflicts
                     WHERE status = 'pending' AND reading_local_id = ?1
                     ORDER BY created_at LIMIT 1"
                ),
                [reading_local_id],
                ConflictRow::from_row,
            )
            .optional()
            .map_err(StorageError::from)?;
        row.map(|row| row.into_conflict().map_err(Into::into))
            .transpose()
    }

    async fn mark_resolved(&self, id: &str) -> Result<()> {
        let conn = self.db.conn().lock().await;
        let changed = conn
            .execute(
                "UPDATE conflicts SET status = 'resolved', resolved_at = ?2 WHERE id = ?1",
                params![id, Utc::now().to_rfc3339()],
            )
            .map_err(StorageError::from)?;
        if changed == 0 {
            return Err(glucolog_core::Error::storage(format!(
                "no conflict with id {id}"
            )));
        }
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        let conn = self.db.conn().lock().await;
        conn.execute("DELETE FROM conflicts", [])
            .map_err(StorageError::from)?;
        Ok(())
    }
}
