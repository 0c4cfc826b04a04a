//! Persistence contract for the reading table.

use async_trait::async_trait;

use crate::errors::Result;
use crate::readings::Reading;

/// Storage contract for locally persisted readings.
///
/// The engine holds no private copies: it reads current state before acting
/// and writes back per record. Implementations must make each method
/// atomic with respect to concurrent callers.
#[async_trait]
pub trait ReadingStore: Send + Sync {
    async fn insert(&self, reading: Reading) -> Result<()>;

    async fn get(&self, local_id: &str) -> Result<Option<Reading>>;

    /// Look up the local record already linked to a remote identity.
    async fn find_by_remote_id(&self, remote_id: i64) -> Result<Option<Reading>>;

    /// Overwrite the stored record identified by `reading.local_id`.
    async fn update(&self, reading: &Reading) -> Result<()>;

    async fn delete(&self, local_id: &str) -> Result<()>;

    async fn list(&self) -> Result<Vec<Reading>>;

    /// Readings with `synced == false`, in no particular order.
    async fn list_unsynced(&self) -> Result<Vec<Reading>>;

    async fn clear(&self) -> Result<()>;
}
