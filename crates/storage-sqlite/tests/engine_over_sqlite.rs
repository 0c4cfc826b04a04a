//! The full engine driven over the sqlite stores.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{TimeZone, Utc};

use glucolog_core::errors::TransportError;
use glucolog_core::readings::{
    MealContext, ReadingPayload, ReadingService, ReadingStore, ReadingUnit, RemoteReading,
};
use glucolog_core::sync::{
    ChannelNetworkMonitor, ProfileService, SyncCollaborators, SyncConfig, SyncEngine,
    SyncQueueStore, SyncTransport,
};
use glucolog_storage_sqlite::{
    Database, SqliteAuditLog, SqliteConflictStore, SqliteReadingStore, SqliteSyncQueue,
};

/// Transport double: scripted create outcomes, fixed remote set.
#[derive(Default)]
struct ScriptedTransport {
    creates: Mutex<VecDeque<Result<i64, TransportError>>>,
    remote_set: Mutex<Vec<RemoteReading>>,
}

#[async_trait]
impl SyncTransport for ScriptedTransport {
    async fn create_reading(
        &self,
        payload: &ReadingPayload,
    ) -> Result<RemoteReading, TransportError> {
        let outcome = self
            .creates
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(1_000));
        outcome.map(|id| RemoteReading {
            id,
            value: payload.value,
            unit: payload.unit,
            recorded_at: payload.recorded_at,
            notes: payload.notes.clone(),
            context: payload.context,
        })
    }

    async fn list_my_readings(&self) -> Result<Vec<RemoteReading>, TransportError> {
        Ok(self.remote_set.lock().unwrap().clone())
    }

    async fn list_latest_readings(
        &self,
        _limit: usize,
    ) -> Result<Vec<RemoteReading>, TransportError> {
        Ok(self.remote_set.lock().unwrap().clone())
    }
}

struct NoopProfile;

#[async_trait]
impl ProfileService for NoopProfile {
    async fn refresh(&self) -> Result<(), TransportError> {
        Ok(())
    }
}

fn glucose(value: f64) -> ReadingPayload {
    ReadingPayload {
        value,
        unit: ReadingUnit::MgDl,
        recorded_at: Utc.with_ymd_and_hms(2026, 3, 1, 8, 0, 0).unwrap(),
        notes: None,
        context: MealContext::Fasting,
    }
}

struct SqliteHarness {
    readings: Arc<SqliteReadingStore>,
    queue: Arc<SqliteSyncQueue>,
    transport: Arc<ScriptedTransport>,
    engine: SyncEngine,
    service: ReadingService,
}

fn sqlite_harness() -> SqliteHarness {
    let db = Database::open_in_memory().expect("open db");
    let readings = Arc::new(SqliteReadingStore::new(db.clone()));
    let queue = Arc::new(SqliteSyncQueue::new(db.clone()));
    let conflicts = Arc::new(SqliteConflictStore::new(db.clone()));
    let audit = Arc::new(SqliteAuditLog::new(db));
    let transport = Arc::new(ScriptedTransport::default());
    let network = Arc::new(ChannelNetworkMonitor::new(true));

    let engine = SyncEngine::new(
        SyncCollaborators {
            readings: readings.clone(),
            queue: queue.clone(),
            conflicts,
            transport: transport.clone(),
            network,
            audit,
            profile: Some(Arc::new(NoopProfile)),
        },
        SyncConfig::default(),
    );
    let service = ReadingService::new(readings.clone(), queue.clone());

    SqliteHarness {
        readings,
        queue,
        transport,
        engine,
        service,
    }
}

#[tokio::test]
async fn accepted_create_persists_link_through_sqlite() {
    let h = sqlite_harness();
    let reading = h.service.record_reading(glucose(150.0)).await.unwrap();
    h.transport.creates.lock().unwrap().push_back(Ok(999));

    let summary = h.engine.sync_pending_readings().await.unwrap();
    assert_eq!(summary.pushed, 1);

    let stored = h.readings.get(&reading.local_id).await.unwrap().unwrap();
    assert!(stored.synced);
    assert_eq!(stored.remote_id, Some(999));
    assert!(h.queue.list().await.unwrap().is_empty());
}

#[tokio::test]
async fn persistent_server_errors_exhaust_retries_over_sqlite() {
    let h = sqlite_harness();
    let reading = h.service.record_reading(glucose(180.0)).await.unwrap();
    for _ in 0..3 {
        h.transport
            .creates
            .lock()
            .unwrap()
            .push_back(Err(TransportError::api(500, "internal error")));
    }
    let mut failures = h.engine.subscribe_failures();

    for _ in 0..3 {
        h.engine.sync_pending_readings().await.unwrap();
    }

    assert!(h.queue.list().await.unwrap().is_empty());
    let stored = h.readings.get(&reading.local_id).await.unwrap().unwrap();
    assert!(!stored.synced);
    let event = failures.recv().await.unwrap();
    assert_eq!(event.reading_local_id, reading.local_id);
    assert_eq!(*h.engine.failed_count().borrow(), 1);
}

#[tokio::test]
async fn pull_merge_and_resolution_round_trip_over_sqlite() {
    let h = sqlite_harness();
    let reading = h.service.record_reading(glucose(150.0)).await.unwrap();
    h.transport.creates.lock().unwrap().push_back(Ok(9));
    h.engine.sync_pending_readings().await.unwrap();

    h.service
        .update_reading(&reading.local_id, glucose(160.0))
        .await
        .unwrap();
    *h.transport.remote_set.lock().unwrap() = vec![RemoteReading {
        id: 9,
        value: 150.0,
        unit: ReadingUnit::MgDl,
        recorded_at: Utc.with_ymd_and_hms(2026, 3, 1, 8, 0, 0).unwrap(),
        notes: None,
        context: MealContext::Fasting,
    }];

    let summary = h.engine.fetch_from_backend().await.unwrap();
    assert_eq!(summary.conflicts, 1);

    let conflict = h.engine.pending_conflicts().await.unwrap().remove(0);
    h.engine
        .resolve_conflict(
            &conflict.id,
            glucolog_core::sync::ConflictResolution::KeepServer,
        )
        .await
        .unwrap();

    let stored = h.readings.get(&reading.local_id).await.unwrap().unwrap();
    assert_eq!(stored.value, 150.0);
    assert!(stored.synced);
    assert!(h.engine.pending_conflicts().await.unwrap().is_empty());
}
