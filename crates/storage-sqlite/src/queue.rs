//! Sqlite-backed sync queue with transactional claim-and-mark.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Row, TransactionBehavior};

use glucolog_core::errors::Result;
use glucolog_core::readings::ReadingPayload;
use glucolog_core::sync::{QueueItemStatus, SyncOperation, SyncQueueItem, SyncQueueStore};

use crate::db::{enum_from_db, enum_to_db, parse_timestamp, Database};
use crate::error::StorageError;

const SELECT_COLUMNS: &str = "id, op, reading_local_id, payload, retry_count, last_error, status, processing_started_at, enqueued_at";

struct QueueRow {
    id: String,
    op: String,
    reading_local_id: String,
    payload: Option<String>,
    retry_count: i32,
    last_error: Option<String>,
    status: Option<String>,
    processing_started_at: Option<String>,
    enqueued_at: String,
}

impl QueueRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            op: row.get(1)?,
            reading_local_id: row.get(2)?,
            payload: row.get(3)?,
            retry_count: row.get(4)?,
            last_error: row.get(5)?,
            status: row.get(6)?,
            processing_started_at: row.get(7)?,
            enqueued_at: row.get(8)?,
        })
    }

    fn into_item(self) -> std::result::Result<SyncQueueItem, StorageError> {
        let payload: Option<ReadingPayload> = self
            .payload
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?;
        let op: SyncOperation = enum_from_db(&self.op)?;
        // Rows written before the status column existed count as pending.
        let status: QueueItemStatus = match self.status.as_deref() {
            None => QueueItemStatus::Pending,
            Some(value) => enum_from_db(value)?,
        };
        Ok(SyncQueueItem {
            id: self.id,
            op,
            reading_local_id: self.reading_local_id,
            payload,
            retry_count: self.retry_count,
            last_error: self.last_error,
            status,
            processing_started_at: self
                .processing_started_at
                .as_deref()
                .map(parse_timestamp)
                .transpose()?,
            enqueued_at: parse_timestamp(&self.enqueued_at)?,
        })
    }
}

pub struct SqliteSyncQueue {
    db: Database,
}

impl SqliteSyncQueue {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl SyncQueueStore for SqliteSyncQueue {
    async fn enqueue(&self, item: SyncQueueItem) -> Result<()> {
        let payload = item
            .payload
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(StorageError::from)?;
        let conn = self.db.conn().lock().await;
        conn.execute(
            "INSERT INTO sync_queue (id, op, reading_local_id, payload, retry_count, last_error, status, processing_started_at, enqueued_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                item.id,
                enum_to_db(&item.op).map_err(StorageError::from)?,
                item.reading_local_id,
                payload,
                item.retry_count,
                item.last_error,
                enum_to_db(&item.status).map_err(StorageError::from)?,
                item.processing_started_at.map(|at| at.to_rfc3339()),
                item.enqueued_at.to_rfc3339(),
            ],
        )
        .map_err(StorageError::from)?;
        Ok(())
    }

    async fn claim_pending(&self) -> Result<Vec<SyncQueueItem>> {
        let mut conn = self.db.conn().lock().await;
        // IMMEDIATE takes the write lock up front, so select-and-stamp is
        // one atomic unit: two concurrent claims can never both retrieve
        // the same item.
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(StorageError::from)?;
        let now = Utc::now();

        let rows = {
            let mut stmt = tx
                .prepare(&format!(
                    "SELECT {SELECT_COLUMNS} FROM sync_queue
                     WHERE status IS NULL OR status = 'pending'
                     ORDER BY enqueued_at, id"
                ))
                .map_err(StorageError::from)?;
            let rows = stmt
                .query_map([], QueueRow::from_row)
                .map_err(StorageError::from)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(StorageError::from)?;
            rows
        };

        let mut items = Vec::with_capacity(rows.len());
        for row in rows {
            let mut item = row.into_item().map_err(StorageError::from)?;
            tx.execute(
                "UPDATE sync_queue SET status = 'processing', processing_started_at = ?2 WHERE id = ?1",
                params![item.id, now.to_rfc3339()],
            )
            .map_err(StorageError::from)?;
            item.status = QueueItemStatus::Processing;
            item.processing_started_at = Some(now);
            items.push(item);
        }

        tx.commit().map_err(StorageError::from)?;
        Ok(items)
    }

    async fn recover_stale(&self, threshold: Duration) -> Result<usize> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(threshold).map_err(|err| {
                glucolog_core::Error::storage(format!("bad stale threshold: {err}"))
            })?;
        let conn = self.db.conn().lock().await;
        let recovered = conn
            .execute(
                "UPDATE sync_queue SET status = 'pending', processing_started_at = NULL
                 WHERE status = 'processing'
                   AND (processing_started_at IS NULL OR processing_started_at < ?1)",
                [cutoff.to_rfc3339()],
            )
            .map_err(StorageError::from)?;
        Ok(recovered)
    }

    async fn release(&self, id: &str, retry_count: i32, last_error: Option<String>) -> Result<()> {
        let conn = self.db.conn().lock().await;
        let changed = conn
            .execute(
                "UPDATE sync_queue SET status = 'pending', processing_started_at = NULL,
                        retry_count = ?2, last_error = ?3
                 WHERE id = ?1",
                params![id, retry_count, last_error],
            )
            .map_err(StorageError::from)?;
        if changed == 0 {
            return Err(glucolog_core::Error::storage(format!(
                "no queue item with id {id}"
            )));
        }
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let conn = self.db.conn().lock().await;
        conn.execute("DELETE FROM sync_queue WHERE id = ?1", [id])
            .map_err(StorageError::from)?;
        Ok(())
    }

    async fn delete_creates_for_reading(&self, reading_local_id: &str) -> Result<usize> {
        let conn = self.db.conn().lock().await;
        let deleted = conn
            .execute(
                "DELETE FROM sync_queue WHERE reading_local_id = ?1 AND op = 'create'",
                [reading_local_id],
            )
            .map_err(StorageError::from)?;
        Ok(deleted)
    }

    async fn list(&self) -> Result<Vec<SyncQueueItem>> {
        let conn = self.db.conn().lock().await;
        let rows = {
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {SELECT_COLUMNS} FROM sync_queue ORDER BY enqueued_at, id"
                ))
                .map_err(StorageError::from)?;
            let rows = stmt
                .query_map([], QueueRow::from_row)
                .map_err(StorageError::from)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(StorageError::from)?;
            rows
        };
        rows.into_iter()
            .map(|row| row.into_item().map_err(Into::into))
            .collect()
    }

    async fn has_item_for_reading(&self, reading_local_id: &str) -> Result<bool> {
        let conn = self.db.conn().lock().await;
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sync_queue WHERE reading_local_id = ?1",
                [reading_local_id],
                |row| row.get(0),
            )
            .map_err(StorageError::from)?;
        Ok(count > 0)
    }

    async fn clear(&self) -> Result<()> {
        let conn = self.db.conn().lock().await;
        conn.execute("DELETE FROM sync_queue", [])
            .map_err(StorageError::from)?;
        Ok(())
    }
}
