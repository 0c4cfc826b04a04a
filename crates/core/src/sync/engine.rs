//! Sync orchestrator: push, pull/merge, full sync, conflict resolution.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::Shared;
use futures::FutureExt;
use log::{debug, info, warn};
use serde::Serialize;
use tokio::sync::{broadcast, watch, Mutex};

use crate::errors::{Error, Result, SyncRetryClass};
use crate::readings::{
    diverges, values_match, within_link_window, Reading, ReadingStore, RemoteReading,
};
use crate::sync::{
    AuditLog, CircuitBreaker, Conflict, ConflictResolution, ConflictStatus, ConflictStore,
    NetworkMonitor, ProfileService, QueueItemStatus, SyncConfig, SyncOperation, SyncQueueItem,
    SyncQueueStore, SyncTransport,
};

/// Counts from one push pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PushSummary {
    /// Items claimed at the start of the pass.
    pub attempted: usize,
    /// Creates the remote accepted.
    pub pushed: usize,
    /// Updates/deletes satisfied without a remote call.
    pub completed_locally: usize,
    /// Items released back to pending with an advanced retry count.
    pub retried: usize,
    /// Items dropped after retry exhaustion.
    pub failed_permanently: usize,
    /// Items left untouched because dispatch was suppressed.
    pub skipped: usize,
}

/// Counts from one pull/merge pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PullSummary {
    pub fetched: usize,
    pub linked: usize,
    pub created: usize,
    /// Synced locals overwritten from an authoritative remote change.
    pub updated: usize,
    /// Unsynced locals found identical to the remote and flipped synced.
    pub marked_synced: usize,
    pub conflicts: usize,
}

/// Combined result of a bidirectional sync.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FullSyncReport {
    pub push: PushSummary,
    pub pull: PullSummary,
}

/// Emitted when a queue item exhausts its retry budget and is dropped.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PermanentSyncFailure {
    pub reading_local_id: String,
    pub error: String,
    pub occurred_at: DateTime<Utc>,
}

/// Collaborator handles, constructed once at process start and injected.
pub struct SyncCollaborators {
    pub readings: Arc<dyn ReadingStore>,
    pub queue: Arc<dyn SyncQueueStore>,
    pub conflicts: Arc<dyn ConflictStore>,
    pub transport: Arc<dyn SyncTransport>,
    pub network: Arc<dyn NetworkMonitor>,
    pub audit: Arc<dyn AuditLog>,
    /// Optional: gamification/profile refresh after successful pushes.
    pub profile: Option<Arc<dyn ProfileService>>,
}

type PassFuture<T> = Shared<Pin<Box<dyn Future<Output = Result<T>> + Send>>>;

/// Single-flight gate: a concurrent caller joins the in-flight pass and is
/// handed its result instead of starting a second one.
struct Flight<T: Clone> {
    slot: Mutex<Option<(u64, PassFuture<T>)>>,
    next_id: AtomicU64,
}

impl<T: Clone + Send + 'static> Flight<T> {
    fn new() -> Self {
        Self {
            slot: Mutex::new(None),
            next_id: AtomicU64::new(0),
        }
    }

    async fn join_or_run<F>(&self, make: F) -> Result<T>
    where
        F: FnOnce() -> Pin<Box<dyn Future<Output = Result<T>> + Send>>,
    {
        let (fut, started) = {
            let mut slot = self.slot.lock().await;
            match slot.as_ref() {
                Some((_, fut)) => (fut.clone(), None),
                None => {
                    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                    let fut = make().shared();
                    *slot = Some((id, fut.clone()));
                    (fut, Some(id))
                }
            }
        };

        let out = fut.await;

        // Only the caller that started the pass clears the slot, and only
        // if a newer pass has not replaced it in the meantime.
        if let Some(id) = started {
            let mut slot = self.slot.lock().await;
            if matches!(slot.as_ref(), Some((held, _)) if *held == id) {
                *slot = None;
            }
        }
        out
    }
}

enum PullScope {
    Mine,
    Latest,
}

/// The top-level sync engine.
///
/// A cheap-to-clone handle over shared internals: the breaker, the
/// single-flight gates, and the injected stores. The engine reads current
/// state through the stores before acting, never caching records across
/// passes. Passes run to completion over their claimed item set; there is
/// no mid-pass cancellation; a process kill is recovered afterwards by the
/// stale-claim reset.
#[derive(Clone)]
pub struct SyncEngine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    readings: Arc<dyn ReadingStore>,
    queue: Arc<dyn SyncQueueStore>,
    conflicts: Arc<dyn ConflictStore>,
    transport: Arc<dyn SyncTransport>,
    network: Arc<dyn NetworkMonitor>,
    audit: Arc<dyn AuditLog>,
    profile: Option<Arc<dyn ProfileService>>,
    breaker: CircuitBreaker,
    config: SyncConfig,
    push_flight: Flight<PushSummary>,
    pull_flight: Flight<PullSummary>,
    failures_tx: broadcast::Sender<PermanentSyncFailure>,
    failed_count_tx: watch::Sender<usize>,
}

impl SyncEngine {
    pub fn new(collaborators: SyncCollaborators, config: SyncConfig) -> Self {
        let (failures_tx, _) = broadcast::channel(64);
        let (failed_count_tx, _) = watch::channel(0);
        let breaker = CircuitBreaker::new(
            config.breaker_failure_threshold,
            config.breaker_recovery_timeout,
        );
        Self {
            inner: Arc::new(EngineInner {
                readings: collaborators.readings,
                queue: collaborators.queue,
                conflicts: collaborators.conflicts,
                transport: collaborators.transport,
                network: collaborators.network,
                audit: collaborators.audit,
                profile: collaborators.profile,
                breaker,
                config,
                push_flight: Flight::new(),
                pull_flight: Flight::new(),
                failures_tx,
                failed_count_tx,
            }),
        }
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.inner.breaker
    }

    /// Stream of permanent push failures (record identity, error text,
    /// timestamp), for toast/badge surfaces.
    pub fn subscribe_failures(&self) -> broadcast::Receiver<PermanentSyncFailure> {
        self.inner.failures_tx.subscribe()
    }

    /// Current count of permanently-unsynced, queue-absent readings.
    pub fn failed_count(&self) -> watch::Receiver<usize> {
        self.inner.failed_count_tx.subscribe()
    }

    pub async fn pending_conflicts(&self) -> Result<Vec<Conflict>> {
        self.inner.conflicts.list_pending().await
    }

    /// Push queued local mutations to the remote. Single-flight: a caller
    /// arriving while a push pass is running gets that pass's result.
    pub async fn sync_pending_readings(&self) -> Result<PushSummary> {
        let inner = Arc::clone(&self.inner);
        self.inner
            .push_flight
            .join_or_run(move || async move { inner.run_push_pass().await }.boxed())
            .await
    }

    /// Fetch the caller's remote record set and merge it. Single-flight
    /// with any other pull pass.
    pub async fn fetch_from_backend(&self) -> Result<PullSummary> {
        let inner = Arc::clone(&self.inner);
        self.inner
            .pull_flight
            .join_or_run(move || async move { inner.run_pull_pass(PullScope::Mine).await }.boxed())
            .await
    }

    /// Fetch the most recent remote records and merge them.
    pub async fn fetch_latest_from_backend(&self) -> Result<PullSummary> {
        let inner = Arc::clone(&self.inner);
        self.inner
            .pull_flight
            .join_or_run(
                move || async move { inner.run_pull_pass(PullScope::Latest).await }.boxed(),
            )
            .await
    }

    /// Push, then pull. Triggered by reconnects, manual "sync now", or the
    /// app's periodic driver.
    pub async fn perform_full_sync(&self) -> Result<FullSyncReport> {
        let push = self.sync_pending_readings().await?;
        let pull = self.fetch_from_backend().await?;
        Ok(FullSyncReport { push, pull })
    }

    /// Recompute the permanently-failed count (unsynced readings with no
    /// remote identity and no queue entry) and publish it.
    pub async fn refresh_failed_count(&self) -> Result<usize> {
        self.inner.refresh_failed_count().await
    }

    /// Watch connectivity and run a full sync on every offline→online
    /// transition, resetting the breaker first.
    pub fn spawn_reconnect_listener(&self) -> tokio::task::JoinHandle<()> {
        let engine = self.clone();
        let mut rx = self.inner.network.subscribe();
        tokio::spawn(async move {
            let mut was_online = *rx.borrow();
            while rx.changed().await.is_ok() {
                let online = *rx.borrow();
                if online && !was_online {
                    info!("[Sync] connectivity restored, starting full sync");
                    // A fresh network path deserves a fresh attempt.
                    engine.inner.breaker.reset();
                    match engine.perform_full_sync().await {
                        Ok(report) => debug!(
                            "[Sync] reconnect sync: pushed={} fetched={}",
                            report.push.pushed, report.pull.fetched
                        ),
                        Err(err) => warn!("[Sync] reconnect sync failed: {err}"),
                    }
                }
                was_online = online;
            }
        })
    }

    /// Apply a user-selected strategy to a pending conflict.
    ///
    /// The resolution is appended to the audit log before the conflict
    /// flips resolved; an audit failure fails the resolution.
    pub async fn resolve_conflict(
        &self,
        conflict_id: &str,
        strategy: ConflictResolution,
    ) -> Result<()> {
        self.inner.resolve_conflict(conflict_id, strategy).await
    }
}

impl EngineInner {
    async fn run_push_pass(&self) -> Result<PushSummary> {
        let mut summary = PushSummary::default();

        let recovered = self
            .queue
            .recover_stale(self.config.stale_claim_threshold)
            .await?;
        if recovered > 0 {
            info!("[Sync] recovered {recovered} stale queue claims from a previous crash");
        }

        if !self.network.is_online() {
            let pending = self
                .queue
                .list()
                .await?
                .into_iter()
                .filter(|item| item.status == QueueItemStatus::Pending)
                .count();
            summary.skipped = pending;
            debug!("[Sync] offline, leaving {pending} items queued");
            return Ok(summary);
        }

        let mut claimed: VecDeque<SyncQueueItem> = self.queue.claim_pending().await?.into();
        summary.attempted = claimed.len();
        let mut successes = 0usize;

        while let Some(item) = claimed.pop_front() {
            match item.op {
                // The remote has no update or delete endpoints; local
                // state is already authoritative for both.
                SyncOperation::Update | SyncOperation::Delete => {
                    self.queue.delete(&item.id).await?;
                    summary.completed_locally += 1;
                }
                SyncOperation::Create => {
                    if !self.breaker.can_make_request() {
                        // Suppressed dispatch: no retry advance.
                        self.queue
                            .release(&item.id, item.retry_count, item.last_error.clone())
                            .await?;
                        summary.skipped += 1;
                        continue;
                    }
                    let Some(payload) = item.payload.clone() else {
                        warn!(
                            "[Sync] dropping create item {} with no payload snapshot",
                            item.id
                        );
                        self.queue.delete(&item.id).await?;
                        self.emit_permanent_failure(
                            &item.reading_local_id,
                            "create item had no payload snapshot",
                        );
                        summary.failed_permanently += 1;
                        continue;
                    };
                    match self.transport.create_reading(&payload).await {
                        Ok(remote) => {
                            self.breaker.record_success();
                            if let Some(mut reading) =
                                self.readings.get(&item.reading_local_id).await?
                            {
                                reading.remote_id = Some(remote.id);
                                reading.synced = true;
                                self.readings.update(&reading).await?;
                            }
                            self.queue.delete(&item.id).await?;
                            summary.pushed += 1;
                            successes += 1;
                        }
                        Err(err) if err.retry_class() == SyncRetryClass::ReauthRequired => {
                            // No item in this batch can succeed without a
                            // credential: release everything un-advanced
                            // and fail the pass.
                            self.queue
                                .release(&item.id, item.retry_count, Some(err.to_string()))
                                .await?;
                            for rest in claimed.drain(..) {
                                self.queue
                                    .release(&rest.id, rest.retry_count, rest.last_error.clone())
                                    .await?;
                            }
                            warn!("[Sync] push pass aborted: {err}");
                            return Err(Error::Auth(err.to_string()));
                        }
                        Err(err) => {
                            self.breaker.record_failure();
                            let attempts = item.retry_count + 1;
                            if attempts < self.config.retry_limit {
                                self.queue
                                    .release(&item.id, attempts, Some(err.to_string()))
                                    .await?;
                                summary.retried += 1;
                            } else {
                                // Terminal: drop the item, keep the reading
                                // unsynced, and surface the stuck state
                                // instead of retrying forever.
                                self.queue.delete(&item.id).await?;
                                self.emit_permanent_failure(
                                    &item.reading_local_id,
                                    &err.to_string(),
                                );
                                summary.failed_permanently += 1;
                                warn!(
                                    "[Sync] reading {} dropped from queue after {} attempts: {err}",
                                    item.reading_local_id, attempts
                                );
                            }
                        }
                    }
                }
            }
        }

        self.refresh_failed_count().await?;

        if successes > 0 {
            self.spawn_profile_refresh();
        }
        debug!(
            "[Sync] push pass complete: pushed={} local={} retried={} failed={} skipped={}",
            summary.pushed,
            summary.completed_locally,
            summary.retried,
            summary.failed_permanently,
            summary.skipped
        );
        Ok(summary)
    }

    fn emit_permanent_failure(&self, reading_local_id: &str, error: &str) {
        // Send fails only when nobody is subscribed, which is fine.
        let _ = self.failures_tx.send(PermanentSyncFailure {
            reading_local_id: reading_local_id.to_string(),
            error: error.to_string(),
            occurred_at: Utc::now(),
        });
    }

    async fn refresh_failed_count(&self) -> Result<usize> {
        let mut count = 0usize;
        for reading in self.readings.list_unsynced().await? {
            if reading.remote_id.is_none()
                && !self.queue.has_item_for_reading(&reading.local_id).await?
            {
                count += 1;
            }
        }
        self.failed_count_tx.send_replace(count);
        Ok(count)
    }

    fn spawn_profile_refresh(&self) {
        let Some(profile) = self.profile.as_ref() else {
            return;
        };
        let profile = Arc::clone(profile);
        tokio::spawn(async move {
            if let Err(err) = profile.refresh().await {
                debug!("[Sync] profile refresh after push failed: {err}");
            }
        });
    }

    async fn run_pull_pass(&self, scope: PullScope) -> Result<PullSummary> {
        let mut summary = PullSummary::default();

        if !self.network.is_online() {
            debug!("[Sync] offline, skipping pull");
            return Ok(summary);
        }
        if !self.breaker.can_make_request() {
            debug!("[Sync] circuit breaker open, skipping pull");
            return Ok(summary);
        }

        let fetched = match scope {
            PullScope::Mine => self.transport.list_my_readings().await,
            PullScope::Latest => {
                self.transport
                    .list_latest_readings(self.config.pull_fetch_limit)
                    .await
            }
        };
        let mut remotes = match fetched {
            Ok(remotes) => {
                self.breaker.record_success();
                remotes
            }
            Err(err) if err.retry_class() == SyncRetryClass::ReauthRequired => {
                return Err(Error::Auth(err.to_string()));
            }
            Err(err) => {
                self.breaker.record_failure();
                return Err(err.into());
            }
        };

        // The remote does not page: oldest-first, truncated to the most
        // recent N.
        remotes.sort_by_key(|remote| remote.recorded_at);
        if remotes.len() > self.config.pull_fetch_limit {
            let excess = remotes.len() - self.config.pull_fetch_limit;
            remotes.drain(..excess);
        }
        summary.fetched = remotes.len();

        for remote in &remotes {
            self.merge_remote(remote, &mut summary).await?;
        }
        debug!(
            "[Sync] pull pass complete: fetched={} linked={} created={} updated={} conflicts={}",
            summary.fetched, summary.linked, summary.created, summary.updated, summary.conflicts
        );
        Ok(summary)
    }

    async fn merge_remote(&self, remote: &RemoteReading, summary: &mut PullSummary) -> Result<()> {
        let Some(local) = self.readings.find_by_remote_id(remote.id).await? else {
            return self.link_or_create(remote, summary).await;
        };

        let divergent = diverges(&local, remote, self.config.value_match_tolerance);
        if !local.synced && divergent {
            // Divergent unsynced local: adjudication belongs to the user,
            // overwrite neither side. A pending conflict for this reading
            // already represents the divergence.
            if self
                .conflicts
                .find_pending_for_reading(&local.local_id)
                .await?
                .is_none()
            {
                info!(
                    "[Sync] conflict detected for reading {} (remote {})",
                    local.local_id, remote.id
                );
                self.conflicts
                    .insert(Conflict::new(local, remote.clone()))
                    .await?;
                summary.conflicts += 1;
            }
        } else if !local.synced {
            let mut local = local;
            local.synced = true;
            self.readings.update(&local).await?;
            summary.marked_synced += 1;
        } else if divergent {
            // Already synced and the remote has since changed: the remote
            // is authoritative.
            let mut local = local;
            local.value = remote.value;
            local.unit = remote.unit;
            local.recorded_at = remote.recorded_at;
            local.notes = remote.notes.clone();
            local.context = remote.context;
            local.synced = true;
            self.readings.update(&local).await?;
            summary.updated += 1;
        }
        Ok(())
    }

    async fn link_or_create(
        &self,
        remote: &RemoteReading,
        summary: &mut PullSummary,
    ) -> Result<()> {
        let candidate = self
            .readings
            .list_unsynced()
            .await?
            .into_iter()
            .filter(|reading| reading.remote_id.is_none())
            .filter(|reading| {
                values_match(
                    reading.value,
                    reading.unit,
                    remote.value,
                    remote.unit,
                    self.config.value_match_tolerance,
                )
            })
            .filter(|reading| {
                within_link_window(
                    reading.recorded_at,
                    remote.recorded_at,
                    self.config.link_window_secs,
                )
            })
            .min_by_key(|reading| {
                (reading.recorded_at - remote.recorded_at)
                    .num_milliseconds()
                    .abs()
            });

        match candidate {
            Some(mut local) => {
                local.remote_id = Some(remote.id);
                local.synced = true;
                // Remote time wins on link to avoid clock-skew drift.
                local.recorded_at = remote.recorded_at;
                self.readings.update(&local).await?;
                // The create intent is satisfied by the remote record we
                // just linked; pushing it would duplicate the row.
                let dropped = self
                    .queue
                    .delete_creates_for_reading(&local.local_id)
                    .await?;
                if dropped > 0 {
                    debug!(
                        "[Sync] dropped {dropped} satisfied create item(s) for linked reading {}",
                        local.local_id
                    );
                }
                summary.linked += 1;
            }
            None => {
                self.readings.insert(Reading::from_remote(remote)).await?;
                summary.created += 1;
            }
        }
        Ok(())
    }

    async fn resolve_conflict(
        &self,
        conflict_id: &str,
        strategy: ConflictResolution,
    ) -> Result<()> {
        let conflict = self
            .conflicts
            .get(conflict_id)
            .await?
            .ok_or_else(|| Error::conflict(format!("no conflict with id {conflict_id}")))?;
        if conflict.status == ConflictStatus::Resolved {
            return Err(Error::conflict(format!(
                "conflict {conflict_id} is already resolved"
            )));
        }
        let current = self
            .readings
            .get(&conflict.reading_local_id)
            .await?
            .ok_or_else(|| {
                Error::conflict(format!(
                    "reading {} for conflict {conflict_id} no longer exists",
                    conflict.reading_local_id
                ))
            })?;

        match strategy {
            ConflictResolution::KeepMine => {
                self.requeue_unsynced(current).await?;
            }
            ConflictResolution::KeepServer => {
                // Overwrite in place, preserving the local identity to
                // avoid a duplicate row.
                let mut updated = current;
                updated.value = conflict.remote.value;
                updated.unit = conflict.remote.unit;
                updated.recorded_at = conflict.remote.recorded_at;
                updated.notes = conflict.remote.notes.clone();
                updated.context = conflict.remote.context;
                updated.remote_id = Some(conflict.remote.id);
                updated.synced = true;
                self.readings.update(&updated).await?;
            }
            ConflictResolution::KeepBoth => {
                self.requeue_unsynced(current).await?;
                let mut twin = Reading::from_remote(&conflict.remote);
                // Two local rows must not claim the same remote identity.
                twin.remote_id = None;
                self.readings.insert(twin).await?;
            }
        }

        self.audit
            .log_conflict_resolution(
                &conflict.reading_local_id,
                strategy,
                &conflict.local,
                &conflict.remote,
            )
            .await?;
        self.conflicts.mark_resolved(&conflict.id).await?;
        info!(
            "[Sync] conflict {} resolved with {:?}",
            conflict.id, strategy
        );
        Ok(())
    }

    /// Keep the local side unsynced and record an update-intent in the
    /// queue, so `synced` stays accurately false until the reading is
    /// reconciled again.
    async fn requeue_unsynced(&self, mut reading: Reading) -> Result<()> {
        if reading.synced {
            reading.synced = false;
            self.readings.update(&reading).await?;
        }
        let payload = reading.payload();
        self.queue
            .enqueue(SyncQueueItem::new(
                SyncOperation::Update,
                reading.local_id,
                Some(payload),
            ))
            .await
    }
}
