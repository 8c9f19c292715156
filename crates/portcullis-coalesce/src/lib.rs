//! Request coalescing for outbound calls.
//!
//! When a cache entry expires while many requests hold the same token, all
//! of them would otherwise verify it upstream at once. The coalescer
//! collapses that thundering herd: while a call for a given key is in
//! flight, concurrent calls with the same key wait for it and share its
//! result. Once the in-flight call returns, the key is vacated — the
//! coalescer is not a cache, and the next call executes again.
//!
//! ## Example
//!
//! ```rust
//! use portcullis_coalesce::Coalescer;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let flight: Coalescer<String, u32, String> = Coalescer::new("token-verify");
//!
//! let value = flight
//!     .run("key".to_string(), async { Ok::<_, String>(42) })
//!     .await
//!     .unwrap();
//! assert_eq!(value, 42);
//! # }
//! ```
//!
//! The first caller for a key becomes the *leader* and executes the
//! future; everyone else becomes a *waiter* and receives a clone of the
//! leader's result, error included. If the leader's future is dropped
//! before completing, waiters observe [`CoalesceError::LeaderGone`].

mod flight;

pub use flight::{CoalesceError, Coalescer};
