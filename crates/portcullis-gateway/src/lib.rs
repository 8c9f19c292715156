//! Portcullis: the request-admission gateway of the platform.
//!
//! Every external request enters here and is identified, authorized,
//! rate-limited, and forwarded to a catalog-discovered backend. A
//! companion control loop (the route reconciler) keeps the edge proxy's
//! route table a deterministic function of the service catalog.
//!
//! The admission pipeline composes the resilience crates:
//!
//! ```text
//! ingress -> admission pipeline
//!              -> rate limiter
//!              -> cache / coalescer / breaker -> identity client
//!              -> registry client
//!          -> forward to backend
//! ```
//!
//! See [`admission`] for the per-request pipeline and [`reconciler`] for
//! the control loop.

pub mod admission;
pub mod config;
pub mod error;
pub mod identity;
pub mod principal;
pub mod proxy;
pub mod reconciler;
pub mod registry;
pub mod server;
