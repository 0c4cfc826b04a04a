//! Local-mutation front door: every write pairs with a queue entry.

use std::sync::Arc;

use log::debug;

use crate::errors::{Error, Result};
use crate::readings::{Reading, ReadingPayload, ReadingStore};
use crate::sync::{SyncOperation, SyncQueueItem, SyncQueueStore};

/// Records, edits and deletes readings, enqueueing the matching mutation
/// so the change propagates on the next push pass.
pub struct ReadingService {
    readings: Arc<dyn ReadingStore>,
    queue: Arc<dyn SyncQueueStore>,
}

impl ReadingService {
    pub fn new(readings: Arc<dyn ReadingStore>, queue: Arc<dyn SyncQueueStore>) -> Self {
        Self { readings, queue }
    }

    /// Persist a user-entered reading and queue its create.
    pub async fn record_reading(&self, payload: ReadingPayload) -> Result<Reading> {
        let reading = Reading::from_payload(payload);
        self.readings.insert(reading.clone()).await?;
        self.queue
            .enqueue(SyncQueueItem::new(
                SyncOperation::Create,
                reading.local_id.clone(),
                Some(reading.payload()),
            ))
            .await?;
        debug!("[Readings] recorded reading {}", reading.local_id);
        Ok(reading)
    }

    /// Apply user edits to a reading and queue an update-intent.
    pub async fn update_reading(&self, local_id: &str, payload: ReadingPayload) -> Result<Reading> {
        let mut reading = self
            .readings
            .get(local_id)
            .await?
            .ok_or_else(|| Error::Validation(format!("no reading with id {local_id}")))?;
        reading.value = payload.value;
        reading.unit = payload.unit;
        reading.recorded_at = payload.recorded_at;
        reading.notes = payload.notes.clone();
        reading.context = payload.context;
        reading.synced = false;
        self.readings.update(&reading).await?;
        self.queue
            .enqueue(SyncQueueItem::new(
                SyncOperation::Update,
                reading.local_id.clone(),
                Some(payload),
            ))
            .await?;
        Ok(reading)
    }

    /// Delete a reading locally and queue the delete.
    pub async fn delete_reading(&self, local_id: &str) -> Result<()> {
        if self.readings.get(local_id).await?.is_none() {
            return Err(Error::Validation(format!("no reading with id {local_id}")));
        }
        self.readings.delete(local_id).await?;
        self.queue
            .enqueue(SyncQueueItem::new(SyncOperation::Delete, local_id, None))
            .await?;
        debug!("[Readings] deleted reading {local_id}");
        Ok(())
    }

    pub async fn list_readings(&self) -> Result<Vec<Reading>> {
        self.readings.list().await
    }
}
