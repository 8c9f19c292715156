use crate::breaker::{CircuitBreaker, CircuitState};
use std::sync::Arc;
use std::time::Duration;

pub(crate) type FailureClassifier<E> = Arc<dyn Fn(&E) -> bool + Send + Sync>;
pub(crate) type TransitionListener = Arc<dyn Fn(CircuitState, CircuitState) + Send + Sync>;

pub(crate) struct Config<E> {
    pub(crate) failure_threshold: usize,
    pub(crate) success_threshold: usize,
    pub(crate) open_timeout: Duration,
    pub(crate) half_open_max_probes: usize,
    pub(crate) classifier: FailureClassifier<E>,
    pub(crate) on_transition: Option<TransitionListener>,
    pub(crate) name: String,
}

/// Builder for configuring and constructing a [`CircuitBreaker`].
pub struct CircuitBreakerBuilder<E> {
    failure_threshold: usize,
    success_threshold: usize,
    open_timeout: Duration,
    half_open_max_probes: usize,
    classifier: FailureClassifier<E>,
    on_transition: Option<TransitionListener>,
    name: String,
}

impl<E> CircuitBreakerBuilder<E> {
    /// Creates a new builder with default values.
    pub fn new() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            open_timeout: Duration::from_secs(30),
            half_open_max_probes: 2,
            classifier: Arc::new(|_| true),
            on_transition: None,
            name: String::from("<unnamed>"),
        }
    }

    /// Consecutive failures that open the circuit.
    ///
    /// Default: 5
    pub fn failure_threshold(mut self, n: usize) -> Self {
        self.failure_threshold = n.max(1);
        self
    }

    /// Probe successes required to close a half-open circuit.
    ///
    /// Default: 2
    pub fn success_threshold(mut self, n: usize) -> Self {
        self.success_threshold = n.max(1);
        self
    }

    /// How long the circuit stays open before admitting a probe.
    ///
    /// Default: 30 seconds
    pub fn open_timeout(mut self, timeout: Duration) -> Self {
        self.open_timeout = timeout;
        self
    }

    /// Concurrent probes admitted in the half-open state.
    ///
    /// Default: 2
    pub fn half_open_max_probes(mut self, n: usize) -> Self {
        self.half_open_max_probes = n.max(1);
        self
    }

    /// Decides which errors count toward the failure threshold.
    ///
    /// Errors the classifier rejects (client errors, cancellations) reset
    /// the consecutive-failure count, since the collaborator did respond.
    ///
    /// Default: every error counts
    pub fn failure_classifier<F>(mut self, classifier: F) -> Self
    where
        F: Fn(&E) -> bool + Send + Sync + 'static,
    {
        self.classifier = Arc::new(classifier);
        self
    }

    /// Register a callback for state transitions.
    pub fn on_state_transition<F>(mut self, f: F) -> Self
    where
        F: Fn(CircuitState, CircuitState) + Send + Sync + 'static,
    {
        self.on_transition = Some(Arc::new(f));
        self
    }

    /// Give this breaker a human-readable name for observability.
    ///
    /// Default: `<unnamed>`
    pub fn name<N: Into<String>>(mut self, name: N) -> Self {
        self.name = name.into();
        self
    }

    /// Builds the circuit breaker.
    pub fn build(self) -> CircuitBreaker<E> {
        CircuitBreaker::from_config(Config {
            failure_threshold: self.failure_threshold,
            success_threshold: self.success_threshold,
            open_timeout: self.open_timeout,
            half_open_max_probes: self.half_open_max_probes,
            classifier: self.classifier,
            on_transition: self.on_transition,
            name: self.name,
        })
    }
}

impl<E> Default for CircuitBreakerBuilder<E> {
    fn default() -> Self {
        Self::new()
    }
}
