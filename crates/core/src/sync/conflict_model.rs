//! Conflict records awaiting user adjudication.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::Result;
use crate::readings::{Reading, RemoteReading};

/// Lifecycle of a conflict: pending → resolved, one-way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictStatus {
    Pending,
    Resolved,
}

/// User-selected resolution strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictResolution {
    KeepMine,
    KeepServer,
    KeepBoth,
}

/// A detected divergence between an unsynced local reading and the remote
/// record it is linked to. Conflicts are never destroyed; resolved ones
/// remain for audit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conflict {
    pub id: String,
    pub reading_local_id: String,
    pub local: Reading,
    pub remote: RemoteReading,
    pub status: ConflictStatus,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Conflict {
    pub fn new(local: Reading, remote: RemoteReading) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            reading_local_id: local.local_id.clone(),
            local,
            remote,
            status: ConflictStatus::Pending,
            created_at: Utc::now(),
            resolved_at: None,
        }
    }
}

/// Storage contract for the conflict table.
#[async_trait]
pub trait ConflictStore: Send + Sync {
    async fn insert(&self, conflict: Conflict) -> Result<()>;

    async fn get(&self, id: &str) -> Result<Option<Conflict>>;

    async fn list_pending(&self) -> Result<Vec<Conflict>>;

    /// The pending conflict for a reading, if one exists. Used to keep
    /// repeated pulls from raising duplicates for the same divergence.
    async fn find_pending_for_reading(&self, reading_local_id: &str) -> Result<Option<Conflict>>;

    /// Flip a conflict to resolved, stamping `resolved_at`.
    async fn mark_resolved(&self, id: &str) -> Result<()>;

    async fn clear(&self) -> Result<()>;
}
