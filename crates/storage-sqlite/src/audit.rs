//! Append-only audit table for conflict resolutions.

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::params;

use glucolog_core::errors::Result;
use glucolog_core::readings::{Reading, RemoteReading};
use glucolog_core::sync::{AuditLog, ConflictResolution};

use crate::db::{enum_to_db, Database};
use crate::error::StorageError;

pub struct SqliteAuditLog {
    db: Database,
}

impl SqliteAuditLog {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Number of appended entries; used by status surfaces and tests.
    pub async fn len(&self) -> Result<usize> {
        let conn = self.db.conn().lock().await;
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM audit_entries", [], |row| row.get(0))
            .map_err(StorageError::from)?;
        Ok(count as usize)
    }

    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }
}

#[async_trait]
impl AuditLog for SqliteAuditLog {
    async fn log_conflict_resolution(
        &self,
        reading_local_id: &str,
        strategy: ConflictResolution,
        local: &Reading,
        remote: &RemoteReading,
    ) -> Result<()> {
        let local_snapshot = serde_json::to_string(local).map_err(StorageError::from)?;
        let remote_snapshot = serde_json::to_string(remote).map_err(StorageError::from)?;
        let conn = self.db.conn().lock().await;
        conn.execute(
            "INSERT INTO audit_entries (reading_local_id, strategy, local_snapshot, remote_snapshot, logged_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                reading_local_id,
                enum_to_db(&strategy).map_err(StorageError::from)?,
                local_snapshot,
                remote_snapshot,
                Utc::now().to_rfc3339(),
            ],
        )
        .map_err(StorageError::from)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use glucolog_core::readings::{MealContext, ReadingPayload, ReadingUnit};

    #[tokio::test]
    async fn resolutions_are_appended_with_both_snapshots() {
        let db = Database::open_in_memory().unwrap();
        let audit = SqliteAuditLog::new(db.clone());
        let local = Reading::from_payload(ReadingPayload {
            value: 160.0,
            unit: ReadingUnit::MgDl,
            recorded_at: Utc.with_ymd_and_hms(2026, 3, 1, 8, 0, 0).unwrap(),
            notes: None,
            context: MealContext::Fasting,
        });
        let remote = RemoteReading {
            id: 9,
            value: 150.0,
            unit: ReadingUnit::MgDl,
            recorded_at: Utc.with_ymd_and_hms(2026, 3, 1, 8, 0, 0).unwrap(),
            notes: None,
            context: MealContext::Fasting,
        };

        audit
            .log_conflict_resolution(
                &local.local_id,
                ConflictResolution::KeepServer,
                &local,
                &remote,
            )
            .await
            .unwrap();
        audit
            .log_conflict_resolution(
                &local.local_id,
                ConflictResolution::KeepBoth,
                &local,
                &remote,
            )
            .await
            .unwrap();

        assert_eq!(audit.len().await.unwrap(), 2);

        let conn = db.conn().lock().await;
        let (strategy, local_snapshot): (String, String) = conn
            .query_row(
                "SELECT strategy, local_snapshot FROM audit_entries ORDER BY id LIMIT 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert_eq!(strategy, "keep_server");
        let snapshot: Reading = serde_json::from_str(&local_snapshot).unwrap();
        assert_eq!(snapshot.value, 160.0);
    }
}
