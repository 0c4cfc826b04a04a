//! Failure-counting gate in front of every remote call.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::sync::config::{BREAKER_FAILURE_THRESHOLD, BREAKER_RECOVERY_TIMEOUT_SECS};

/// Breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    /// A half-open breaker admits exactly one probe until it settles.
    probe_in_flight: bool,
}

/// Tracks consecutive remote-call failures and gates new dispatch.
///
/// Independent of the queue's own retry counters: while the breaker is
/// open, items stay queued and their counters do not advance; only new
/// dispatch is suppressed. The OPEN→HALF_OPEN transition happens lazily
/// inside [`CircuitBreaker::can_make_request`], not via a background timer.
#[derive(Debug)]
pub struct CircuitBreaker {
    inner: Mutex<BreakerInner>,
    failure_threshold: u32,
    recovery_timeout: Duration,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(
            BREAKER_FAILURE_THRESHOLD,
            Duration::from_secs(BREAKER_RECOVERY_TIMEOUT_SECS),
        )
    }
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, recovery_timeout: Duration) -> Self {
        Self {
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                probe_in_flight: false,
            }),
            failure_threshold,
            recovery_timeout,
        }
    }

    /// The single gate every remote call consults before dispatch.
    pub fn can_make_request(&self) -> bool {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let elapsed = inner
                    .opened_at
                    .map(|at| at.elapsed() >= self.recovery_timeout)
                    .unwrap_or(true);
                if elapsed {
                    inner.state = CircuitState::HalfOpen;
                    inner.probe_in_flight = true;
                    true
                } else {
                    false
                }
            }
            CircuitState::HalfOpen => {
                if inner.probe_in_flight {
                    false
                } else {
                    inner.probe_in_flight = true;
                    true
                }
            }
        }
    }

    /// Record a successful remote call.
    pub fn record_success(&self) {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        inner.state = CircuitState::Closed;
        inner.consecutive_failures = 0;
        inner.opened_at = None;
        inner.probe_in_flight = false;
    }

    /// Record a failed remote call.
    pub fn record_failure(&self) {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        match inner.state {
            CircuitState::HalfOpen => {
                // The probe failed: trip straight back open.
                inner.state = CircuitState::Open;
                inner.opened_at = Some(Instant::now());
                inner.probe_in_flight = false;
            }
            _ => {
                inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
                if inner.consecutive_failures >= self.failure_threshold {
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(Instant::now());
                }
            }
        }
    }

    /// Unconditional reset to closed. A fresh network path deserves a
    /// fresh attempt, so the reconnect handler calls this regardless of
    /// counters.
    pub fn reset(&self) {
        self.record_success();
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().expect("breaker lock poisoned").state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.inner
            .lock()
            .expect("breaker lock poisoned")
            .consecutive_failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_after_exactly_threshold_failures() {
        let breaker = CircuitBreaker::new(5, Duration::from_secs(30));
        for _ in 0..4 {
            breaker.record_failure();
            assert_eq!(breaker.state(), CircuitState::Closed);
        }
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(!breaker.can_make_request());
    }

    #[test]
    fn success_resets_the_failure_run() {
        let breaker = CircuitBreaker::new(3, Duration::from_secs(30));
        breaker.record_failure();
        breaker.record_failure();
        breaker.record_success();
        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn half_open_admits_one_probe_after_timeout() {
        let breaker = CircuitBreaker::new(1, Duration::from_millis(10));
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(!breaker.can_make_request());

        std::thread::sleep(Duration::from_millis(20));
        assert!(breaker.can_make_request());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        // Second caller is held back while the probe is in flight.
        assert!(!breaker.can_make_request());
    }

    #[test]
    fn probe_success_closes_and_probe_failure_reopens() {
        let breaker = CircuitBreaker::new(1, Duration::from_millis(5));
        breaker.record_failure();
        std::thread::sleep(Duration::from_millis(10));
        assert!(breaker.can_make_request());
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);

        std::thread::sleep(Duration::from_millis(10));
        assert!(breaker.can_make_request());
        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(breaker.can_make_request());
    }

    #[test]
    fn reconnect_reset_overrides_open_state() {
        let breaker = CircuitBreaker::new(2, Duration::from_secs(300));
        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);

        breaker.reset();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.consecutive_failures(), 0);
        assert!(breaker.can_make_request());
    }
}
