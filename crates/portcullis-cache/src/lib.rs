//! Bounded in-memory TTL cache.
//!
//! Fronts the identity and authorization services with a keyed store whose
//! entries expire individually. Values are opaque to the cache; the only
//! policy it owns is expiry and LRU bounding, so memory stays bounded even
//! under adversarial key distributions.
//!
//! ## Example
//!
//! ```rust
//! use portcullis_cache::Cache;
//! use std::time::Duration;
//!
//! let cache: Cache<String, String> = Cache::builder()
//!     .capacity(10_000)
//!     .default_ttl(Duration::from_secs(300))
//!     .name("token-verifications")
//!     .build();
//!
//! cache.insert("key".to_string(), "value".to_string());
//! assert_eq!(cache.get(&"key".to_string()), Some("value".to_string()));
//! ```
//!
//! A get on an expired entry is a miss and lazily evicts the entry. Inserts
//! overwrite. For values that carry their own expiry (a token that expires
//! in ten seconds must not be trusted for five minutes), use
//! [`Cache::insert_clamped`], which caps the TTL at the value's hard expiry.

mod config;
mod store;

pub use config::CacheBuilder;
pub use store::Cache;
