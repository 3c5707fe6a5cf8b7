use crate::metrics::StoreMetrics;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
}

/// Fails store calls fast while the store keeps erroring.
///
/// A flush against a dead store would otherwise pay the full request
/// timeout once per key.
#[derive(Debug)]
pub struct CircuitBreaker {
    inner: Mutex<BreakerState>,
    failure_threshold: u32,
    reset_timeout: Duration,
    metrics: Option<Arc<StoreMetrics>>,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, reset_timeout: Duration) -> Self {
        Self {
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
            }),
            failure_threshold: failure_threshold.max(1),
            reset_timeout,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<StoreMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BreakerState> {
        // State stays consistent even if a holder panicked
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether a call may go through. Moves Open to HalfOpen once the reset
    /// timeout has elapsed.
    pub fn can_execute(&self) -> bool {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => match inner.opened_at {
                Some(at) if at.elapsed() >= self.reset_timeout => {
                    inner.state = CircuitState::HalfOpen;
                    debug!("Circuit breaker transitioning to half-open");
                    true
                }
                _ => false,
            },
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.lock();
        inner.consecutive_failures = 0;
        if inner.state != CircuitState::Closed {
            inner.state = CircuitState::Closed;
            inner.opened_at = None;
            if let Some(metrics) = &self.metrics {
                metrics.record_circuit_breaker_close();
            }
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self.lock();
        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);

        // A failed probe while half-open reopens immediately
        let should_open = inner.state == CircuitState::HalfOpen
            || (inner.state == CircuitState::Closed
                && inner.consecutive_failures >= self.failure_threshold);

        if should_open {
            tracing::warn!(
                failures = inner.consecutive_failures,
                "Circuit breaker opened"
            );
            inner.state = CircuitState::Open;
            inner.opened_at = Some(Instant::now());
            if let Some(metrics) = &self.metrics {
                metrics.record_circuit_breaker_open();
            }
        }
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }
}
