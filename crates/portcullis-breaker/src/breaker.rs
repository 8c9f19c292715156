use crate::config::{CircuitBreakerBuilder, Config};
use crate::error::BreakerError;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Instant;

#[cfg(feature = "metrics")]
use metrics::counter;

/// Represents the state of the circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CircuitState {
    /// The circuit is closed and calls are allowed.
    Closed = 0,
    /// The circuit is open and calls are rejected.
    Open = 1,
    /// The circuit is half-open and a limited number of probes are allowed.
    HalfOpen = 2,
}

impl CircuitState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => CircuitState::Open,
            2 => CircuitState::HalfOpen,
            _ => CircuitState::Closed,
        }
    }

    /// Lower-case name, for logs and metrics labels.
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

struct CircuitInner {
    state: CircuitState,
    consecutive_failures: usize,
    half_open_successes: usize,
    half_open_inflight: usize,
    last_state_change: Instant,
}

struct Shared<E> {
    inner: Mutex<CircuitInner>,
    state_atomic: AtomicU8,
    config: Config<E>,
}

/// A three-state circuit breaker shared by all request handlers.
///
/// Cloning is cheap; clones share the same circuit.
pub struct CircuitBreaker<E> {
    shared: Arc<Shared<E>>,
}

impl<E> Clone for CircuitBreaker<E> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

enum Acquire {
    Rejected,
    Pass,
    Probe,
}

impl<E> CircuitBreaker<E> {
    /// Creates a builder with default thresholds.
    pub fn builder() -> CircuitBreakerBuilder<E> {
        CircuitBreakerBuilder::new()
    }

    pub(crate) fn from_config(config: Config<E>) -> Self {
        Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(CircuitInner {
                    state: CircuitState::Closed,
                    consecutive_failures: 0,
                    half_open_successes: 0,
                    half_open_inflight: 0,
                    last_state_change: Instant::now(),
                }),
                state_atomic: AtomicU8::new(CircuitState::Closed as u8),
                config,
            }),
        }
    }

    /// Current state, readable without taking the lock.
    pub fn state(&self) -> CircuitState {
        CircuitState::from_u8(self.shared.state_atomic.load(Ordering::Acquire))
    }

    /// Executes `fut` under the breaker.
    ///
    /// Returns [`BreakerError::OpenCircuit`] without running the future when
    /// the circuit rejects the call, so callers can tell "breaker rejected"
    /// apart from "call failed" and apply their fail policy.
    pub async fn execute<T, Fut>(&self, fut: Fut) -> Result<T, BreakerError<E>>
    where
        Fut: Future<Output = Result<T, E>>,
    {
        let acquired = self.acquire();
        if matches!(acquired, Acquire::Rejected) {
            #[cfg(feature = "metrics")]
            counter!("breaker_calls_total", "breaker" => self.shared.config.name.clone(), "outcome" => "rejected")
                .increment(1);
            return Err(BreakerError::OpenCircuit);
        }

        // If the probe future is dropped mid-flight, give the slot back so
        // the half-open state cannot wedge with phantom probes.
        let mut slot = ProbeSlot {
            shared: matches!(acquired, Acquire::Probe).then(|| Arc::clone(&self.shared)),
        };

        let result = fut.await;
        slot.release();

        let is_failure = match &result {
            Ok(_) => false,
            Err(e) => (self.shared.config.classifier)(e),
        };
        if is_failure {
            self.record_failure();
        } else {
            self.record_success();
        }

        #[cfg(feature = "metrics")]
        counter!(
            "breaker_calls_total",
            "breaker" => self.shared.config.name.clone(),
            "outcome" => if is_failure { "failure" } else { "success" }
        )
        .increment(1);

        result.map_err(BreakerError::Inner)
    }

    fn acquire(&self) -> Acquire {
        let mut inner = self.shared.inner.lock();
        match inner.state {
            CircuitState::Closed => Acquire::Pass,
            CircuitState::Open => {
                if inner.last_state_change.elapsed() >= self.shared.config.open_timeout {
                    self.transition_to(&mut inner, CircuitState::HalfOpen);
                    inner.half_open_inflight = 1;
                    Acquire::Probe
                } else {
                    Acquire::Rejected
                }
            }
            CircuitState::HalfOpen => {
                if inner.half_open_inflight < self.shared.config.half_open_max_probes {
                    inner.half_open_inflight += 1;
                    Acquire::Probe
                } else {
                    Acquire::Rejected
                }
            }
        }
    }

    fn record_success(&self) {
        let mut inner = self.shared.inner.lock();
        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures = 0;
            }
            CircuitState::HalfOpen => {
                inner.half_open_successes += 1;
                if inner.half_open_successes >= self.shared.config.success_threshold {
                    self.transition_to(&mut inner, CircuitState::Closed);
                }
            }
            // A call that was admitted before a forced transition; nothing
            // meaningful to count against the open circuit.
            CircuitState::Open => {}
        }
    }

    fn record_failure(&self) {
        let mut inner = self.shared.inner.lock();
        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.shared.config.failure_threshold {
                    self.transition_to(&mut inner, CircuitState::Open);
                }
            }
            CircuitState::HalfOpen => {
                self.transition_to(&mut inner, CircuitState::Open);
            }
            CircuitState::Open => {}
        }
    }

    /// Forces the circuit open. Intended for tests and operational tooling.
    pub fn force_open(&self) {
        let mut inner = self.shared.inner.lock();
        self.transition_to(&mut inner, CircuitState::Open);
    }

    /// Resets the circuit to closed, clearing all counters.
    pub fn reset(&self) {
        let mut inner = self.shared.inner.lock();
        self.transition_to(&mut inner, CircuitState::Closed);
    }

    fn transition_to(&self, inner: &mut CircuitInner, state: CircuitState) {
        if inner.state == state {
            return;
        }
        let from = inner.state;

        #[cfg(feature = "tracing")]
        tracing::info!(
            breaker = %self.shared.config.name,
            from = from.as_str(),
            to = state.as_str(),
            "Circuit state transition"
        );

        #[cfg(feature = "metrics")]
        counter!(
            "breaker_transitions_total",
            "breaker" => self.shared.config.name.clone(),
            "from" => from.as_str(),
            "to" => state.as_str()
        )
        .increment(1);

        inner.state = state;
        inner.consecutive_failures = 0;
        inner.half_open_successes = 0;
        inner.half_open_inflight = 0;
        inner.last_state_change = Instant::now();
        self.shared
            .state_atomic
            .store(state as u8, Ordering::Release);

        if let Some(listener) = &self.shared.config.on_transition {
            listener(from, state);
        }
    }
}

struct ProbeSlot<E> {
    shared: Option<Arc<Shared<E>>>,
}

impl<E> ProbeSlot<E> {
    fn release(&mut self) {
        if let Some(shared) = self.shared.take() {
            let mut inner = shared.inner.lock();
            inner.half_open_inflight = inner.half_open_inflight.saturating_sub(1);
        }
    }
}

impl<E> Drop for ProbeSlot<E> {
    fn drop(&mut self) {
        self.release();
    }
}
