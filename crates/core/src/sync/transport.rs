//! Remote-call contracts consumed by the engine.

use async_trait::async_trait;

use crate::errors::TransportError;
use crate::readings::{ReadingPayload, RemoteReading};

/// Named remote operations the engine invokes.
///
/// The engine never constructs raw requests; implementations own URL
/// construction, auth headers, and response decoding, and hand back a
/// normalized success/error envelope. The remote has no update or delete
/// endpoints in this system; create and the two list shapes are the whole
/// surface.
#[async_trait]
pub trait SyncTransport: Send + Sync {
    /// Submit a locally recorded reading. Success yields the remote's
    /// canonical view of it, including the assigned remote identity.
    async fn create_reading(
        &self,
        payload: &ReadingPayload,
    ) -> std::result::Result<RemoteReading, TransportError>;

    /// The caller's full remote record set.
    async fn list_my_readings(&self) -> std::result::Result<Vec<RemoteReading>, TransportError>;

    /// The most recent `limit` remote records.
    async fn list_latest_readings(
        &self,
        limit: usize,
    ) -> std::result::Result<Vec<RemoteReading>, TransportError>;
}

/// Best-effort refresh of user-profile/gamification data after a
/// successful push. Fire-and-forget: a failure here must never fail the
/// sync pass.
#[async_trait]
pub trait ProfileService: Send + Sync {
    async fn refresh(&self) -> std::result::Result<(), TransportError>;
}
