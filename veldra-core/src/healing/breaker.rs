//! Circuit breaker gating recovery attempts per plugin.

use parking_lot::Mutex;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Consecutive half-open successes required to close the circuit.
const HALF_OPEN_SUCCESS_THRESHOLD: u32 = 2;

/// State of a circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation; requests pass through.
    Closed,
    /// Too many failures; requests are blocked until the timeout elapses.
    Open,
    /// Probing whether the plugin recovered.
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => f.write_str("CLOSED"),
            Self::Open => f.write_str("OPEN"),
            Self::HalfOpen => f.write_str("HALF_OPEN"),
        }
    }
}

#[derive(Debug)]
struct CircuitInner {
    state: CircuitState,
    failures: u32,
    successes: u32,
    last_state_change: Instant,
}

/// Three-state failure gate.
///
/// The breaker is strictly advisory: it never triggers actions itself, it
/// only answers [`allow_request`](CircuitBreaker::allow_request) and ingests
/// outcomes. Opening happens after `failure_threshold` consecutive failures;
/// an open circuit transitions to half-open once `timeout` has elapsed, at
/// which point one probing request is let through.
#[derive(Debug)]
pub struct CircuitBreaker {
    plugin: String,
    failure_threshold: u32,
    timeout: Duration,
    inner: Mutex<CircuitInner>,
}

impl CircuitBreaker {
    /// Create a breaker for the named plugin.
    pub fn new(plugin: impl Into<String>, failure_threshold: u32, timeout: Duration) -> Self {
        Self {
            plugin: plugin.into(),
            failure_threshold,
            timeout,
            inner: Mutex::new(CircuitInner {
                state: CircuitState::Closed,
                failures: 0,
                successes: 0,
                last_state_change: Instant::now(),
            }),
        }
    }

    /// Record a successful operation.
    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::HalfOpen => {
                inner.successes += 1;
                if inner.successes >= HALF_OPEN_SUCCESS_THRESHOLD {
                    self.close(&mut inner);
                }
            },
            CircuitState::Closed => {
                inner.failures = 0;
            },
            CircuitState::Open => {},
        }
    }

    /// Record a failed operation.
    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        inner.failures += 1;
        match inner.state {
            CircuitState::Closed => {
                if inner.failures >= self.failure_threshold {
                    self.open(&mut inner);
                }
            },
            CircuitState::HalfOpen => self.open(&mut inner),
            CircuitState::Open => {},
        }
    }

    /// Check whether a request may proceed.
    ///
    /// An open circuit whose timeout has elapsed transitions to half-open
    /// here and lets the caller through as the probing request.
    pub fn allow_request(&self) -> bool {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                if inner.last_state_change.elapsed() >= self.timeout {
                    self.half_open(&mut inner);
                    true
                } else {
                    false
                }
            },
        }
    }

    fn open(&self, inner: &mut CircuitInner) {
        inner.state = CircuitState::Open;
        inner.last_state_change = Instant::now();
        inner.successes = 0;
        warn!(plugin = %self.plugin, failures = inner.failures, "circuit breaker opened");
    }

    fn close(&self, inner: &mut CircuitInner) {
        inner.state = CircuitState::Closed;
        inner.last_state_change = Instant::now();
        inner.failures = 0;
        inner.successes = 0;
        info!(plugin = %self.plugin, "circuit breaker closed");
    }

    fn half_open(&self, inner: &mut CircuitInner) {
        inner.state = CircuitState::HalfOpen;
        inner.last_state_change = Instant::now();
        inner.successes = 0;
        info!(plugin = %self.plugin, "circuit breaker half-open, probing recovery");
    }

    /// Current breaker state.
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Current consecutive-failure count.
    pub fn failure_count(&self) -> u32 {
        self.inner.lock().failures
    }

    /// Force the breaker back to closed.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        self.close(&mut inner);
        info!(plugin = %self.plugin, "circuit breaker reset");
    }
}
