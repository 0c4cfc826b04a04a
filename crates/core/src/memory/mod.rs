//! In-memory implementations of the store contracts.
//!
//! Back the engine's integration tests and are handy for previews; the
//! real client wires the sqlite-backed stores instead. All methods take a
//! single mutex section, which makes each call atomic with respect to
//! concurrent callers, including the claim-and-mark step.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use crate::errors::{Error, Result};
use crate::readings::{Reading, ReadingStore, RemoteReading};
use crate::sync::{
    AuditLog, Conflict, ConflictResolution, ConflictStatus, ConflictStore, QueueItemStatus,
    SyncOperation, SyncQueueItem, SyncQueueStore,
};

/// Mutex-protected reading table.
#[derive(Default)]
pub struct MemoryReadingStore {
    rows: Mutex<HashMap<String, Reading>>,
}

impl MemoryReadingStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ReadingStore for MemoryReadingStore {
    async fn insert(&self, reading: Reading) -> Result<()> {
        let mut rows = self.rows.lock().expect("reading store lock poisoned");
        if rows.contains_key(&reading.local_id) {
            return Err(Error::storage(format!(
                "reading {} already exists",
                reading.local_id
            )));
        }
        rows.insert(reading.local_id.clone(), reading);
        Ok(())
    }

    async fn get(&self, local_id: &str) -> Result<Option<Reading>> {
        let rows = self.rows.lock().expect("reading store lock poisoned");
        Ok(rows.get(local_id).cloned())
    }

    async fn find_by_remote_id(&self, remote_id: i64) -> Result<Option<Reading>> {
        let rows = self.rows.lock().expect("reading store lock poisoned");
        Ok(rows
            .values()
            .find(|reading| reading.remote_id == Some(remote_id))
            .cloned())
    }

    async fn update(&self, reading: &Reading) -> Result<()> {
        let mut rows = self.rows.lock().expect("reading store lock poisoned");
        match rows.get_mut(&reading.local_id) {
            Some(slot) => {
                *slot = reading.clone();
                Ok(())
            }
            None => Err(Error::storage(format!(
                "no reading with id {}",
                reading.local_id
            ))),
        }
    }

    async fn delete(&self, local_id: &str) -> Result<()> {
        let mut rows = self.rows.lock().expect("reading store lock poisoned");
        rows.remove(local_id);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<Reading>> {
        let rows = self.rows.lock().expect("reading store lock poisoned");
        let mut out: Vec<Reading> = rows.values().cloned().collect();
        out.sort_by(|a, b| a.recorded_at.cmp(&b.recorded_at));
        Ok(out)
    }

    async fn list_unsynced(&self) -> Result<Vec<Reading>> {
        let rows = self.rows.lock().expect("reading store lock poisoned");
        let mut out: Vec<Reading> = rows
            .values()
            .filter(|reading| !reading.synced)
            .cloned()
            .collect();
        out.sort_by(|a, b| a.recorded_at.cmp(&b.recorded_at));
        Ok(out)
    }

    async fn clear(&self) -> Result<()> {
        self.rows
            .lock()
            .expect("reading store lock poisoned")
            .clear();
        Ok(())
    }
}

/// Mutex-protected queue. The mutex section is the atomic claim unit.
#[derive(Default)]
pub struct MemoryQueueStore {
    rows: Mutex<Vec<SyncQueueItem>>,
}

impl MemoryQueueStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SyncQueueStore for MemoryQueueStore {
    async fn enqueue(&self, item: SyncQueueItem) -> Result<()> {
        self.rows.lock().expect("queue lock poisoned").push(item);
        Ok(())
    }

    async fn claim_pending(&self) -> Result<Vec<SyncQueueItem>> {
        let mut rows = self.rows.lock().expect("queue lock poisoned");
        let now = Utc::now();
        let mut claimed = Vec::new();
        for item in rows.iter_mut() {
            if item.status == QueueItemStatus::Pending {
                item.status = QueueItemStatus::Processing;
                item.processing_started_at = Some(now);
                claimed.push(item.clone());
            }
        }
        claimed.sort_by(|a, b| a.enqueued_at.cmp(&b.enqueued_at).then(a.id.cmp(&b.id)));
        Ok(claimed)
    }

    async fn recover_stale(&self, threshold: Duration) -> Result<usize> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(threshold)
                .map_err(|err| Error::storage(format!("bad stale threshold: {err}")))?;
        let mut rows = self.rows.lock().expect("queue lock poisoned");
        let mut recovered = 0;
        for item in rows.iter_mut() {
            if item.status == QueueItemStatus::Processing
                && item
                    .processing_started_at
                    .map(|at| at < cutoff)
                    .unwrap_or(true)
            {
                item.status = QueueItemStatus::Pending;
                item.processing_started_at = None;
                recovered += 1;
            }
        }
        Ok(recovered)
    }

    async fn release(&self, id: &str, retry_count: i32, last_error: Option<String>) -> Result<()> {
        let mut rows = self.rows.lock().expect("queue lock poisoned");
        let item = rows
            .iter_mut()
            .find(|item| item.id == id)
            .ok_or_else(|| Error::storage(format!("no queue item with id {id}")))?;
        item.status = QueueItemStatus::Pending;
        item.processing_started_at = None;
        item.retry_count = retry_count;
        item.last_error = last_error;
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let mut rows = self.rows.lock().expect("queue lock poisoned");
        rows.retain(|item| item.id != id);
        Ok(())
    }

    async fn delete_creates_for_reading(&self, reading_local_id: &str) -> Result<usize> {
        let mut rows = self.rows.lock().expect("queue lock poisoned");
        let before = rows.len();
        rows.retain(|item| {
            !(item.op == SyncOperation::Create && item.reading_local_id == reading_local_id)
        });
        Ok(before - rows.len())
    }

    async fn list(&self) -> Result<Vec<SyncQueueItem>> {
        let mut rows = self.rows.lock().expect("queue lock poisoned").clone();
        rows.sort_by(|a, b| a.enqueued_at.cmp(&b.enqueued_at).then(a.id.cmp(&b.id)));
        Ok(rows)
    }

    async fn has_item_for_reading(&self, reading_local_id: &str) -> Result<bool> {
        let rows = self.rows.lock().expect("queue lock poisoned");
        Ok(rows
            .iter()
            .any(|item| item.reading_local_id == reading_local_id))
    }

    async fn clear(&self) -> Result<()> {
        self.rows.lock().expect("queue lock poisoned").clear();
        Ok(())
    }
}

/// Mutex-protected conflict table.
#[derive(Default)]
pub struct MemoryConflictStore {
    rows: Mutex<Vec<Conflict>>,
}

impl MemoryConflictStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConflictStore for MemoryConflictStore {
    async fn insert(&self, conflict: Conflict) -> Result<()> {
        self.rows
            .lock()
            .expect("conflict store lock poisoned")
            .push(conflict);
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Conflict>> {
        let rows = self.rows.lock().expect("conflict store lock poisoned");
        Ok(rows.iter().find(|conflict| conflict.id == id).cloned())
    }

    async fn list_pending(&self) -> Result<Vec<Conflict>> {
        let rows = self.rows.lock().expect("conflict store lock poisoned");
        Ok(rows
            .iter()
            .filter(|conflict| conflict.status == ConflictStatus::Pending)
            .cloned()
            .collect())
    }

    async fn find_pending_for_reading(&self, reading_local_id: &str) -> Result<Option<Conflict>> {
        let rows = self.rows.lock().expect("conflict store lock poisoned");
        Ok(rows
            .iter()
            .find(|conflict| {
                conflict.status == ConflictStatus::Pending
                    && conflict.reading_local_id == reading_local_id
            })
            .cloned())
    }

    async fn mark_resolved(&self, id: &str) -> Result<()> {
        let mut rows = self.rows.lock().expect("conflict store lock poisoned");
        let conflict = rows
            .iter_mut()
            .find(|conflict| conflict.id == id)
            .ok_or_else(|| Error::storage(format!("no conflict with id {id}")))?;
        conflict.status = ConflictStatus::Resolved;
        conflict.resolved_at = Some(Utc::now());
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.rows
            .lock()
            .expect("conflict store lock poisoned")
            .clear();
        Ok(())
    }
}

/// One appended audit entry, kept for assertions in tests.
#[derive(Debug, Clone)]
pub struct AuditEntry {
    pub reading_local_id: String,
    pub strategy: ConflictResolution,
    pub local: Reading,
    pub remote: RemoteReading,
}

/// Append-only in-memory audit log.
#[derive(Default)]
pub struct MemoryAuditLog {
    entries: Mutex<Vec<AuditEntry>>,
}

impl MemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries.lock().expect("audit lock poisoned").clone()
    }
}

#[async_trait]
impl AuditLog for MemoryAuditLog {
    async fn log_conflict_resolution(
        &self,
        reading_local_id: &str,
        strategy: ConflictResolution,
        local: &Reading,
        remote: &RemoteReading,
    ) -> Result<()> {
        self.entries
            .lock()
            .expect("audit lock poisoned")
            .push(AuditEntry {
                reading_local_id: reading_local_id.to_string(),
                strategy,
                local: local.clone(),
                remote: remote.clone(),
            });
        Ok(())
    }
}
