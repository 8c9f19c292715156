//! Cache storage implementation.

use crate::config::CacheBuilder;
use lru::LruCache;
use parking_lot::Mutex;
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

#[cfg(feature = "metrics")]
use metrics::counter;

/// Entry in the cache with its own expiry deadline.
#[derive(Clone, Debug)]
struct CacheEntry<V> {
    value: V,
    expires_at: Instant,
}

impl<V> CacheEntry<V> {
    fn new(value: V, ttl: Duration) -> Self {
        Self {
            value,
            expires_at: Instant::now() + ttl,
        }
    }

    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

/// A bounded, thread-safe keyed cache with per-entry TTL.
///
/// Cloning is cheap; all clones share the same store.
pub struct Cache<K, V> {
    inner: Arc<Mutex<LruCache<K, CacheEntry<V>>>>,
    default_ttl: Duration,
    #[cfg_attr(not(any(feature = "metrics", feature = "tracing")), allow(dead_code))]
    name: Arc<str>,
}

impl<K, V> Clone for Cache<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            default_ttl: self.default_ttl,
            name: Arc::clone(&self.name),
        }
    }
}

impl<K: Hash + Eq, V: Clone> Cache<K, V> {
    /// Creates a builder for configuring a cache.
    pub fn builder() -> CacheBuilder<K, V> {
        CacheBuilder::new()
    }

    pub(crate) fn from_builder(builder: CacheBuilder<K, V>) -> Self {
        let cap = NonZeroUsize::new(builder.capacity)
            .unwrap_or_else(|| NonZeroUsize::new(1024).unwrap());
        Self {
            inner: Arc::new(Mutex::new(LruCache::new(cap))),
            default_ttl: builder.default_ttl,
            name: builder.name.into(),
        }
    }

    /// Gets a value if it exists and has not expired.
    ///
    /// Expired entries are evicted on read.
    pub fn get(&self, key: &K) -> Option<V> {
        let mut inner = self.inner.lock();
        let expired = match inner.get(key) {
            None => {
                #[cfg(feature = "metrics")]
                counter!("cache_requests_total", "cache" => self.name.to_string(), "outcome" => "miss")
                    .increment(1);
                return None;
            }
            Some(entry) => entry.is_expired(),
        };

        if expired {
            inner.pop(key);
            #[cfg(feature = "tracing")]
            tracing::debug!(cache = %self.name, "Expired entry evicted on read");
            #[cfg(feature = "metrics")]
            counter!("cache_requests_total", "cache" => self.name.to_string(), "outcome" => "expired")
                .increment(1);
            None
        } else {
            #[cfg(feature = "metrics")]
            counter!("cache_requests_total", "cache" => self.name.to_string(), "outcome" => "hit")
                .increment(1);
            inner.get(key).map(|e| e.value.clone())
        }
    }

    /// Inserts a value with the default TTL, overwriting any existing entry.
    pub fn insert(&self, key: K, value: V) {
        self.insert_with_ttl(key, value, self.default_ttl);
    }

    /// Inserts a value with an explicit TTL.
    pub fn insert_with_ttl(&self, key: K, value: V, ttl: Duration) {
        let mut inner = self.inner.lock();
        inner.push(key, CacheEntry::new(value, ttl));
    }

    /// Inserts a value whose trustworthiness ends at `hard_expiry`.
    ///
    /// The effective TTL is `min(default_ttl, hard_expiry - now)`. Values
    /// already past their expiry are not inserted. Returns whether the
    /// value was stored.
    pub fn insert_clamped(&self, key: K, value: V, hard_expiry: SystemTime) -> bool {
        let remaining = match hard_expiry.duration_since(SystemTime::now()) {
            Ok(d) if !d.is_zero() => d,
            _ => return false,
        };
        self.insert_with_ttl(key, value, self.default_ttl.min(remaining));
        true
    }

    /// Removes an entry.
    pub fn remove(&self, key: &K) -> Option<V> {
        self.inner.lock().pop(key).map(|e| e.value)
    }

    /// Returns the number of entries, including any not-yet-evicted expired ones.
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Returns true if the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops all entries.
    pub fn clear(&self) {
        self.inner.lock().clear();
    }
}
