//! Persisted pairing records.
//!
//! One key-value slot per device category. A slot holds the identity captured
//! during the last successful pairing; clearing a slot deletes the row
//! entirely so a later load unambiguously reports "no record". Saves are
//! Result-typed; the engine decides whether a failure is surfaced (it logs
//! and carries on, preserving the original best-effort behavior).

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous},
    Row, SqlitePool,
};
use thiserror::Error;
use tracing::debug;

use crate::model::DeviceCategory;

/// Identity of a paired peripheral, one per category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairedRecord {
    pub identifier: String,
    pub display_name: Option<String>,
    pub physical_address: Option<String>,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage backend: {0}")]
    Backend(#[from] sqlx::Error),
    #[error("record encoding: {0}")]
    Encoding(#[from] serde_json::Error),
}

#[async_trait]
pub trait PairedStore: Send + Sync {
    /// Persist (`Some`) or clear (`None`) the slot for `category`.
    async fn save(
        &self,
        category: DeviceCategory,
        record: Option<&PairedRecord>,
    ) -> Result<(), StoreError>;

    /// Current record per category. Called at engine start and before every
    /// reconnect attempt, to pick up writes made by other processes.
    async fn load_all(&self) -> Result<HashMap<DeviceCategory, PairedRecord>, StoreError>;
}

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub async fn new(database_url: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(5));

        // Pairing slots see a handful of writes per session; one connection
        // is plenty and keeps in-memory databases coherent.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS paired_devices (
                 category TEXT PRIMARY KEY,
                 record   TEXT NOT NULL
             )",
        )
        .execute(&pool)
        .await?;

        Ok(Self { pool })
    }
}

#[async_trait]
impl PairedStore for SqliteStore {
    async fn save(
        &self,
        category: DeviceCategory,
        record: Option<&PairedRecord>,
    ) -> Result<(), StoreError> {
        match record {
            Some(record) => {
                let encoded = serde_json::to_string(record)?;
                sqlx::query(
                    "INSERT OR REPLACE INTO paired_devices (category, record) VALUES (?, ?)",
                )
                .bind(category.slot_key())
                .bind(encoded)
                .execute(&self.pool)
                .await?;
            }
            None => {
                sqlx::query("DELETE FROM paired_devices WHERE category = ?")
                    .bind(category.slot_key())
                    .execute(&self.pool)
                    .await?;
            }
        }
        Ok(())
    }

    async fn load_all(&self) -> Result<HashMap<DeviceCategory, PairedRecord>, StoreError> {
        let rows = sqlx::query("SELECT category, record FROM paired_devices")
            .fetch_all(&self.pool)
            .await?;

        let mut records = HashMap::new();
        for row in rows {
            let key: String = row.get("category");
            let category = match DeviceCategory::from_slot_key(&key) {
                Some(category) => category,
                None => {
                    debug!("skipping unknown pairing slot '{}'", key);
                    continue;
                }
            };
            let record: PairedRecord = serde_json::from_str(row.get("record"))?;
            records.insert(category, record);
        }
        Ok(records)
    }
}

/// In-memory store used by tests and ephemeral sessions.
#[derive(Default)]
pub struct MemoryStore {
    slots: Mutex<HashMap<DeviceCategory, PairedRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a slot directly, bypassing the save path.
    pub fn seed(&self, category: DeviceCategory, record: PairedRecord) {
        self.slots.lock().unwrap().insert(category, record);
    }
}

#[async_trait]
impl PairedStore for MemoryStore {
    async fn save(
        &self,
        category: DeviceCategory,
        record: Option<&PairedRecord>,
    ) -> Result<(), StoreError> {
        let mut slots = self.slots.lock().unwrap();
        match record {
            Some(record) => {
                slots.insert(category, record.clone());
            }
            None => {
                slots.remove(&category);
            }
        }
        Ok(())
    }

    async fn load_all(&self) -> Result<HashMap<DeviceCategory, PairedRecord>, StoreError> {
        Ok(self.slots.lock().unwrap().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str) -> PairedRecord {
        PairedRecord {
            identifier: id.to_string(),
            display_name: Some("QN-Rope-01".to_string()),
            physical_address: None,
        }
    }

    #[tokio::test]
    async fn save_then_clear_leaves_no_record() {
        let store = MemoryStore::new();
        store
            .save(DeviceCategory::JumpRope, Some(&record("abc")))
            .await
            .unwrap();
        assert_eq!(store.load_all().await.unwrap().len(), 1);

        store.save(DeviceCategory::JumpRope, None).await.unwrap();
        assert!(store.load_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn slots_are_independent_per_category() {
        let store = MemoryStore::new();
        store
            .save(DeviceCategory::JumpRope, Some(&record("rope")))
            .await
            .unwrap();
        store
            .save(DeviceCategory::Scale, Some(&record("scale")))
            .await
            .unwrap();

        store.save(DeviceCategory::JumpRope, None).await.unwrap();
        let records = store.load_all().await.unwrap();
        assert!(!records.contains_key(&DeviceCategory::JumpRope));
        assert_eq!(records[&DeviceCategory::Scale].identifier, "scale");
    }

    #[tokio::test]
    async fn sqlite_round_trip() {
        let store = SqliteStore::new("sqlite::memory:").await.unwrap();
        store
            .save(DeviceCategory::Thermometer, Some(&record("therm")))
            .await
            .unwrap();

        let records = store.load_all().await.unwrap();
        assert_eq!(records[&DeviceCategory::Thermometer], record("therm"));

        store.save(DeviceCategory::Thermometer, None).await.unwrap();
        assert!(store.load_all().await.unwrap().is_empty());
    }
}
