//! Circuit breaker for gateway collaborators.
//!
//! A circuit breaker prevents cascading failures: when an identity or
//! authorization service degrades, the breaker opens and the gateway fails
//! fast instead of queueing doomed calls behind a sick collaborator.
//!
//! ## States
//! - **Closed**: normal operation; consecutive failures are counted and
//!   reaching the threshold opens the circuit
//! - **Open**: calls are rejected immediately with [`BreakerError::OpenCircuit`];
//!   after the open timeout the next call becomes a probe
//! - **Half-Open**: a limited number of probes are admitted; enough
//!   consecutive successes close the circuit, any failure re-opens it
//!
//! ## Example
//!
//! ```rust
//! use portcullis_breaker::{CircuitBreaker, CircuitState};
//! use std::time::Duration;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let breaker: CircuitBreaker<String> = CircuitBreaker::builder()
//!     .name("identity-service")
//!     .failure_threshold(5)
//!     .open_timeout(Duration::from_secs(30))
//!     .build();
//!
//! let result = breaker.execute(async { Ok::<_, String>(42) }).await;
//! assert_eq!(result.unwrap(), 42);
//! assert_eq!(breaker.state(), CircuitState::Closed);
//! # }
//! ```
//!
//! ## Failure classification
//!
//! Not every error means the collaborator is unhealthy. A classifier
//! decides which errors count toward the trip threshold:
//!
//! ```rust
//! use portcullis_breaker::CircuitBreaker;
//!
//! #[derive(Clone, Debug)]
//! enum CallError { Timeout, BadRequest }
//!
//! let breaker: CircuitBreaker<CallError> = CircuitBreaker::builder()
//!     .failure_classifier(|e| matches!(e, CallError::Timeout))
//!     .build();
//! ```
//!
//! Errors the classifier rejects (client errors, cancellations) are treated
//! as proof of liveness and reset the consecutive-failure count.

mod breaker;
mod config;
mod error;

pub use breaker::{CircuitBreaker, CircuitState};
pub use config::CircuitBreakerBuilder;
pub use error::BreakerError;
