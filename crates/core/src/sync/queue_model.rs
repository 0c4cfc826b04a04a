//! Durable operation queue: models and storage contract.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::Result;
use crate::readings::ReadingPayload;

/// Mutation kinds that propagate to the remote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncOperation {
    Create,
    Update,
    Delete,
}

/// Processing state of a queue item.
///
/// Rows persisted before this field existed read back as `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueItemStatus {
    Pending,
    Processing,
}

/// One pending mutation referencing a reading by local identity.
///
/// Deletion is the sole terminal state: an item leaves the queue only after
/// the remote confirms success, the operation is locally satisfied, or the
/// retry budget is exhausted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncQueueItem {
    pub id: String,
    pub op: SyncOperation,
    pub reading_local_id: String,
    /// Snapshot of the reading at enqueue time; absent for deletes.
    pub payload: Option<ReadingPayload>,
    pub retry_count: i32,
    pub last_error: Option<String>,
    pub status: QueueItemStatus,
    /// Set only while `status == Processing`.
    pub processing_started_at: Option<DateTime<Utc>>,
    pub enqueued_at: DateTime<Utc>,
}

impl SyncQueueItem {
    pub fn new(op: SyncOperation, reading_local_id: impl Into<String>, payload: Option<ReadingPayload>) -> Self {
        Self {
            // v7 ids are time-ordered, which keeps claim order stable when
            // two items share an enqueue timestamp.
            id: Uuid::now_v7().to_string(),
            op,
            reading_local_id: reading_local_id.into(),
            payload,
            retry_count: 0,
            last_error: None,
            status: QueueItemStatus::Pending,
            processing_started_at: None,
            enqueued_at: Utc::now(),
        }
    }
}

/// Storage contract for the sync queue.
#[async_trait]
pub trait SyncQueueStore: Send + Sync {
    /// Append a pending item. Pure append, no other side effects.
    async fn enqueue(&self, item: SyncQueueItem) -> Result<()>;

    /// Atomically select every pending item, stamp it `Processing` with the
    /// current time, and return the stamped snapshot in enqueue order.
    ///
    /// The select-and-stamp must be a single atomic unit against the store:
    /// two concurrent claims must never both retrieve the same item.
    async fn claim_pending(&self) -> Result<Vec<SyncQueueItem>>;

    /// Reset `Processing` items whose stamp is older than `threshold` back
    /// to `Pending`. Sole recovery mechanism for a crash mid-push; returns
    /// the number of items recovered.
    async fn recover_stale(&self, threshold: Duration) -> Result<usize>;

    /// Return a claimed item to `Pending` with the given retry bookkeeping.
    ///
    /// Passing the item's current `retry_count` releases it un-advanced
    /// (breaker-blocked or auth-aborted dispatch); passing an incremented
    /// count records a failed attempt.
    async fn release(&self, id: &str, retry_count: i32, last_error: Option<String>) -> Result<()>;

    /// Remove an item. The only terminal transition.
    async fn delete(&self, id: &str) -> Result<()>;

    /// Remove pending create items referencing a reading. Used when a pull
    /// pass links the reading to an existing remote record: the create
    /// intent is already satisfied, and pushing it would duplicate the
    /// record remotely.
    async fn delete_creates_for_reading(&self, reading_local_id: &str) -> Result<usize>;

    async fn list(&self) -> Result<Vec<SyncQueueItem>>;

    /// True when any queue item references the given reading.
    async fn has_item_for_reading(&self, reading_local_id: &str) -> Result<bool>;

    async fn clear(&self) -> Result<()>;
}
