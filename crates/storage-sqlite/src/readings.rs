//! Sqlite-backed reading store.

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension, Row};

use glucolog_core::errors::Result;
use glucolog_core::readings::{Reading, ReadingStore};

use crate::db::{enum_from_db, enum_to_db, parse_timestamp, Database};
use crate::error::StorageError;

const SELECT_COLUMNS: &str =
    "local_id, remote_id, value, unit, recorded_at, notes, context, synced";

/// Raw row shape; converted to the domain type outside the rusqlite
/// closure so parse failures surface as storage errors.
struct ReadingRow {
    local_id: String,
    remote_id: Option<i64>,
    value: f64,
    unit: String,
    recorded_at: String,
    notes: Option<String>,
    context: String,
    synced: i64,
}

impl ReadingRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            local_id: row.get(0)?,
            remote_id: row.get(1)?,
            value: row.get(2)?,
            unit: row.get(3)?,
            recorded_at: row.get(4)?,
            notes: row.get(5)?,
            context: row.get(6)?,
            synced: row.get(7)?,
        })
    }

    fn into_reading(self) -> std::result::Result<Reading, StorageError> {
        Ok(Reading {
            local_id: self.local_id,
            remote_id: self.remote_id,
            value: self.value,
            unit: enum_from_db(&self.unit)?,
            recorded_at: parse_timestamp(&self.recorded_at)?,
            notes: self.notes,
            context: enum_from_db(&self.context)?,
            synced: self.synced != 0,
        })
    }
}

pub struct SqliteReadingStore {
    db: Database,
}

impl SqliteReadingStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    fn query_many(
        conn: &Connection,
        sql: &str,
    ) -> std::result::Result<Vec<Reading>, StorageError> {
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt
            .query_map([], ReadingRow::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(ReadingRow::into_reading).collect()
    }
}

#[async_trait]
impl ReadingStore for SqliteReadingStore {
    async fn insert(&self, reading: Reading) -> Result<()> {
        let conn = self.db.conn().lock().await;
        conn.execute(
            "INSERT INTO readings (local_id, remote_id, value, unit, recorded_at, notes, context, synced)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                reading.local_id,
                reading.remote_id,
                reading.value,
                enum_to_db(&reading.unit).map_err(StorageError::from)?,
                reading.recorded_at.to_rfc3339(),
                reading.notes,
                enum_to_db(&reading.context).map_err(StorageError::from)?,
                reading.synced as i64,
            ],
        )
        .map_err(StorageError::from)?;
        Ok(())
    }

    async fn get(&self, local_id: &str) -> Result<Option<Reading>> {
        let conn = self.db.conn().lock().await;
        let row = conn
            .query_row(
                &format!("SELECT {SELECT_COLUMNS} FROM readings WHERE local_id = ?1"),
                [local_id],
                ReadingRow::from_row,
            )
            .optional()
            .map_err(StorageError::from)?;
        row.map(|row| row.into_reading().map_err(Into::into))
            .transpose()
    }

    async fn find_by_remote_id(&self, remote_id: i64) -> Result<Option<Reading>> {
        let conn = self.db.conn().lock().await;
        let row = conn
            .query_row(
                &format!("SELECT {SELECT_COLUMNS} FROM readings WHERE remote_id = ?1"),
                [remote_id],
                ReadingRow::from_row,
            )
            .optional()
            .map_err(StorageError::from)?;
        row.map(|row| row.into_reading().map_err(Into::into))
            .transpose()
    }

    async fn update(&self, reading: &Reading) -> Result<()> {
        let conn = self.db.conn().lock().await;
        let changed = conn
            .execute(
                "UPDATE readings SET remote_id = ?2, value = ?3, unit = ?4, recorded_at = ?5,
                        notes = ?6, context = ?7, synced = ?8
                 WHERE local_id = ?1",
                params![
                    reading.local_id,
                    reading.remote_id,
                    reading.value,
                    enum_to_db(&reading.unit).map_err(StorageError::from)?,
                    reading.recorded_at.to_rfc3339(),
                    reading.notes,
                    enum_to_db(&reading.context).map_err(StorageError::from)?,
                    reading.synced as i64,
                ],
            )
            .map_err(StorageError::from)?;
        if changed == 0 {
            return Err(glucolog_core::Error::storage(format!(
                "no reading with id {}",
                reading.local_id
            )));
        }
        Ok(())
    }

    async fn delete(&self, local_id: &str) -> Result<()> {
        let conn = self.db.conn().lock().await;
        conn.execute("DELETE FROM readings WHERE local_id = ?1", [local_id])
            .map_err(StorageError::from)?;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<Reading>> {
        let conn = self.db.conn().lock().await;
        Self::query_many(
            &conn,
            &format!("SELECT {SELECT_COLUMNS} FROM readings ORDER BY recorded_at, local_id"),
        )
        .map_err(Into::into)
    }

    async fn list_unsynced(&self) -> Result<Vec<Reading>> {
        let conn = self.db.conn().lock().await;
        Self::query_many(
            &conn,
            &format!(
                "SELECT {SELECT_COLUMNS} FROM readings WHERE synced = 0 ORDER BY recorded_at, local_id"
            ),
        )
        .map_err(Into::into)
    }

    async fn clear(&self) -> Result<()> {
        let conn = self.db.conn().lock().await;
        conn.execute("DELETE FROM readings", [])
            .map_err(StorageError::from)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use glucolog_core::readings::{MealContext, ReadingPayload, ReadingUnit};

    fn sample_reading(value: f64) -> Reading {
        Reading::from_payload(ReadingPayload {
            value,
            unit: ReadingUnit::MgDl,
            recorded_at: Utc.with_ymd_and_hms(2026, 3, 1, 8, 0, 0).unwrap(),
            notes: Some("before breakfast".to_string()),
            context: MealContext::Fasting,
        })
    }

    #[tokio::test]
    async fn round_trips_a_reading() {
        let store = SqliteReadingStore::new(Database::open_in_memory().unwrap());
        let reading = sample_reading(118.0);
        store.insert(reading.clone()).await.unwrap();

        let loaded = store.get(&reading.local_id).await.unwrap().unwrap();
        assert_eq!(loaded, reading);
    }

    #[tokio::test]
    async fn finds_by_remote_identity_after_link() {
        let store = SqliteReadingStore::new(Database::open_in_memory().unwrap());
        let mut reading = sample_reading(118.0);
        store.insert(reading.clone()).await.unwrap();

        assert!(store.find_by_remote_id(42).await.unwrap().is_none());
        reading.remote_id = Some(42);
        reading.synced = true;
        store.update(&reading).await.unwrap();

        let linked = store.find_by_remote_id(42).await.unwrap().unwrap();
        assert_eq!(linked.local_id, reading.local_id);
        assert!(linked.synced);
    }

    #[tokio::test]
    async fn unsynced_scan_excludes_synced_rows() {
        let store = SqliteReadingStore::new(Database::open_in_memory().unwrap());
        let mut synced = sample_reading(100.0);
        synced.synced = true;
        store.insert(synced).await.unwrap();
        store.insert(sample_reading(200.0)).await.unwrap();

        let unsynced = store.list_unsynced().await.unwrap();
        assert_eq!(unsynced.len(), 1);
        assert_eq!(unsynced[0].value, 200.0);
    }

    #[tokio::test]
    async fn updating_a_missing_row_is_an_error() {
        let store = SqliteReadingStore::new(Database::open_in_memory().unwrap());
        let reading = sample_reading(100.0);
        let err = store.update(&reading).await.unwrap_err();
        assert!(matches!(err, glucolog_core::Error::Storage(_)));
    }
}
