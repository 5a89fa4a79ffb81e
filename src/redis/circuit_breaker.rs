//! Circuit breaker guarding registry storage calls

use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Requests flow through normally
    Closed,
    /// Requests are rejected until the reset timeout elapses
    Open,
    /// Trial requests are allowed
    HalfOpen,
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening
    pub failure_threshold: u32,
    /// Successes in half-open state before closing
    pub success_threshold: u32,
    /// Time spent open before allowing a trial request
    pub reset_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            reset_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failures: u32,
    successes: u32,
    changed_at: Instant,
}

/// Stops hammering a store that is already failing.
pub struct CircuitBreaker {
    inner: Mutex<BreakerInner>,
    config: CircuitBreakerConfig,
}

impl CircuitBreaker {
    pub fn new() -> Self {
        Self::with_config(CircuitBreakerConfig::default())
    }

    pub fn with_config(config: CircuitBreakerConfig) -> Self {
        Self {
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failures: 0,
                successes: 0,
                changed_at: Instant::now(),
            }),
            config,
        }
    }

    /// Current state, promoting Open to HalfOpen once the reset timeout has passed
    pub fn state(&self) -> CircuitState {
        let mut inner = self.inner.lock();
        if inner.state == CircuitState::Open
            && inner.changed_at.elapsed() >= self.config.reset_timeout
        {
            Self::transition(&mut inner, CircuitState::HalfOpen);
            tracing::info!("Registry circuit breaker half-open, allowing trial request");
        }
        inner.state
    }

    pub fn allow_request(&self) -> bool {
        self.state() != CircuitState::Open
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => inner.failures = 0,
            CircuitState::HalfOpen => {
                inner.successes += 1;
                if inner.successes >= self.config.success_threshold {
                    Self::transition(&mut inner, CircuitState::Closed);
                    tracing::info!("Registry circuit breaker closed after recovery");
                }
            }
            CircuitState::Open => {}
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => {
                inner.failures += 1;
                if inner.failures >= self.config.failure_threshold {
                    let failures = inner.failures;
                    Self::transition(&mut inner, CircuitState::Open);
                    tracing::warn!(failures, "Registry circuit breaker opened");
                }
            }
            CircuitState::HalfOpen => {
                Self::transition(&mut inner, CircuitState::Open);
                tracing::warn!("Registry circuit breaker reopened after trial failure");
            }
            CircuitState::Open => inner.changed_at = Instant::now(),
        }
    }

    fn transition(inner: &mut BreakerInner, state: CircuitState) {
        inner.state = state;
        inner.successes = 0;
        inner.changed_at = Instant::now();
        if state == CircuitState::Closed {
            inner.failures = 0;
        }
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(failure_threshold: u32, reset_ms: u64) -> CircuitBreaker {
        CircuitBreaker::with_config(CircuitBreakerConfig {
            failure_threshold,
            success_threshold: 2,
            reset_timeout: Duration::from_millis(reset_ms),
        })
    }

    #[test]
    fn test_opens_after_threshold() {
        let cb = breaker(3, 1000);
        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);

        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.allow_request());
    }

    #[test]
    fn test_success_resets_failure_streak() {
        let cb = breaker(3, 1000);
        cb.record_failure();
        cb.record_failure();
        cb.record_success();
        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_half_open_then_closed() {
        let cb = breaker(1, 10);
        cb.record_failure();
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        cb.record_success();
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_half_open_failure_reopens() {
        let cb = breaker(1, 10);
        cb.record_failure();
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        cb.record_failure();
        assert!(!cb.allow_request());
    }
}
