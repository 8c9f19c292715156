//! Tier-aware token-bucket rate limiting.
//!
//! One bucket per caller identity, lazily created, continuously refilled.
//! The bucket key follows a strict precedence decided by the caller:
//! authenticated user id, then API-key prefix, then client IP. Higher
//! subscription tiers get a higher refill rate and a larger burst.
//!
//! ## Example
//!
//! ```rust
//! use portcullis_ratelimit::{RateKey, Tier, TieredLimiter};
//!
//! let limiter = TieredLimiter::builder()
//!     .tier_rps(Tier::Free, 10.0)
//!     .tier_rps(Tier::Pro, 100.0)
//!     .build();
//!
//! let key = RateKey::user("u-1");
//! let decision = limiter.check(&key, Tier::Free);
//! assert!(decision.allowed);
//! assert_eq!(decision.limit, 10);
//! ```
//!
//! Every decision carries the data the gateway needs for its response
//! headers: the limit, the remaining budget, how long until the bucket is
//! full again, and (on rejection) how long to wait before retrying.
//!
//! Buckets for callers that have gone quiet are reclaimed by a background
//! sweep ([`TieredLimiter::spawn_sweeper`]).

mod config;
mod limiter;

pub use config::TieredLimiterBuilder;
pub use limiter::{RateDecision, RateKey, Tier, TieredLimiter};
