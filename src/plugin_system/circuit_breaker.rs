//! Per-plugin three-state failure gate used by the [`super::supervisor::Supervisor`].
//!
//! The breaker is strictly advisory: it never triggers anything on its
//! own, it only answers `allow_request` and ingests outcomes reported by
//! its owner.
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Circuit breaker state, per §4.3.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    last_state_change: Instant,
}

/// Configuration for a [`CircuitBreaker`], defaulting to the values in §4.3.
#[derive(Debug, Clone, Copy)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: crate::kernel::constants::DEFAULT_CIRCUIT_FAILURE_THRESHOLD,
            timeout: Duration::from_millis(crate::kernel::constants::DEFAULT_CIRCUIT_TIMEOUT_MS),
        }
    }
}

/// A single plugin's circuit breaker. Synchronous and lock-guarded; no
/// I/O happens under the lock so a `std::sync::Mutex` is appropriate
/// (unlike the async-facing components elsewhere in this crate, which
/// use `tokio::sync::Mutex`).
#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                consecutive_successes: 0,
                last_state_change: Instant::now(),
            }),
        }
    }

    /// Current state, for diagnostics and tests.
    pub fn state(&self) -> CircuitState {
        self.inner.lock().expect("circuit breaker mutex poisoned").state
    }

    /// Whether a request/attempt should be allowed through right now. If
    /// the breaker is `Open` and its timeout has elapsed, this call itself
    /// performs the `Open -> HalfOpen` transition and allows the one
    /// probing request.
    pub fn allow_request(&self) -> bool {
        let mut guard = self.inner.lock().expect("circuit breaker mutex poisoned");
        match guard.state {
            CircuitState::Closed => true,
            CircuitState::HalfOpen => true,
            CircuitState::Open => {
                if guard.last_state_change.elapsed() >= self.config.timeout {
                    guard.state = CircuitState::HalfOpen;
                    guard.last_state_change = Instant::now();
                    guard.consecutive_successes = 0;
                    true
                } else {
                    false
                }
            }
        }
    }

    /// How much longer an `Open` breaker will keep denying requests;
    /// `Duration::ZERO` if a request would be allowed right now (`Closed`,
    /// `HalfOpen`, or an `Open` breaker whose timeout has already
    /// elapsed). Lets a caller that was just denied reschedule its next
    /// attempt instead of abandoning it, without having to busy-poll
    /// `allow_request`.
    pub fn time_until_allowed(&self) -> Duration {
        let guard = self.inner.lock().expect("circuit breaker mutex poisoned");
        match guard.state {
            CircuitState::Closed | CircuitState::HalfOpen => Duration::ZERO,
            CircuitState::Open => self.config.timeout.saturating_sub(guard.last_state_change.elapsed()),
        }
    }

    /// Record a successful attempt.
    pub fn record_success(&self) {
        let mut guard = self.inner.lock().expect("circuit breaker mutex poisoned");
        match guard.state {
            CircuitState::Closed => {
                guard.consecutive_failures = 0;
            }
            CircuitState::HalfOpen => {
                guard.consecutive_successes += 1;
                if guard.consecutive_successes >= 2 {
                    guard.state = CircuitState::Closed;
                    guard.consecutive_failures = 0;
                    guard.consecutive_successes = 0;
                    guard.last_state_change = Instant::now();
                }
            }
            CircuitState::Open => {}
        }
    }

    /// Record a failed attempt.
    pub fn record_failure(&self) {
        let mut guard = self.inner.lock().expect("circuit breaker mutex poisoned");
        match guard.state {
            CircuitState::Closed => {
                guard.consecutive_failures += 1;
                if guard.consecutive_failures >= self.config.failure_threshold {
                    guard.state = CircuitState::Open;
                    guard.last_state_change = Instant::now();
                }
            }
            CircuitState::HalfOpen => {
                guard.state = CircuitState::Open;
                guard.consecutive_successes = 0;
                guard.last_state_change = Instant::now();
            }
            CircuitState::Open => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 3,
            timeout: Duration::from_millis(30_000),
        })
    }

    #[test]
    fn trips_open_after_threshold_failures() {
        let cb = breaker();
        assert_eq!(cb.state(), CircuitState::Closed);
        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.allow_request());
    }

    #[test]
    fn success_resets_closed_counter() {
        let cb = breaker();
        cb.record_failure();
        cb.record_failure();
        cb.record_success();
        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn half_open_needs_two_successes_to_close() {
        let cb = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 1,
            timeout: Duration::from_millis(0),
        });
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(cb.allow_request());
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        cb.record_success();
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn time_until_allowed_is_zero_when_closed_and_positive_when_open() {
        let cb = breaker();
        assert_eq!(cb.time_until_allowed(), Duration::ZERO);
        cb.record_failure();
        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(cb.time_until_allowed() > Duration::ZERO);
        assert!(cb.time_until_allowed() <= Duration::from_millis(30_000));
    }

    #[test]
    fn half_open_failure_reopens() {
        let cb = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 1,
            timeout: Duration::from_millis(0),
        });
        cb.record_failure();
        assert!(cb.allow_request());
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
    }
}
