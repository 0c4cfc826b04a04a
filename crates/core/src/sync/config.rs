//! Engine constants and tunables.

use std::time::Duration;

/// Attempts per queue item before it is dropped and surfaced as stuck.
pub const SYNC_RETRY_LIMIT: i32 = 3;

/// A `Processing` claim older than this is presumed orphaned by a crash.
pub const STALE_CLAIM_THRESHOLD_SECS: u64 = 300;

/// Absolute value tolerance for pull matching, in the remote record's unit.
pub const VALUE_MATCH_TOLERANCE: f64 = 0.5;

/// Timestamp window for linking an unsynced local reading to a remote one.
pub const LINK_WINDOW_SECS: i64 = 600;

/// Upper bound on the remote record set fetched per pull pass.
pub const PULL_FETCH_LIMIT: usize = 100;

/// Consecutive remote-call failures before the breaker opens.
pub const BREAKER_FAILURE_THRESHOLD: u32 = 5;

/// Cooldown before an open breaker admits a probe call.
pub const BREAKER_RECOVERY_TIMEOUT_SECS: u64 = 30;

/// Engine tunables. `Default` is the constants above; tests narrow the
/// windows and timeouts.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub retry_limit: i32,
    pub stale_claim_threshold: Duration,
    pub value_match_tolerance: f64,
    pub link_window_secs: i64,
    pub pull_fetch_limit: usize,
    pub breaker_failure_threshold: u32,
    pub breaker_recovery_timeout: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            retry_limit: SYNC_RETRY_LIMIT,
            stale_claim_threshold: Duration::from_secs(STALE_CLAIM_THRESHOLD_SECS),
            value_match_tolerance: VALUE_MATCH_TOLERANCE,
            link_window_secs: LINK_WINDOW_SECS,
            pull_fetch_limit: PULL_FETCH_LIMIT,
            breaker_failure_threshold: BREAKER_FAILURE_THRESHOLD,
            breaker_recovery_timeout: Duration::from_secs(BREAKER_RECOVERY_TIMEOUT_SECS),
        }
    }
}
