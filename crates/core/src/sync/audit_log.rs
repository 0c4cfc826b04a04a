//! Append-only record of conflict-resolution decisions.

use async_trait::async_trait;

use crate::errors::Result;
use crate::readings::{Reading, RemoteReading};
use crate::sync::ConflictResolution;

/// Write-only audit sink for conflict resolutions.
///
/// Resolution is destructive, so every decision is appended with both
/// snapshots before the conflict flips resolved; this is a correctness
/// requirement, not cosmetic logging. Implementations must persist the
/// entry before returning.
#[async_trait]
pub trait AuditLog: Send + Sync {
    async fn log_conflict_resolution(
        &self,
        reading_local_id: &str,
        strategy: ConflictResolution,
        local: &Reading,
        remote: &RemoteReading,
    ) -> Result<()>;
}
