//! Configuration for the cache.

use crate::Cache;
use std::hash::Hash;
use std::marker::PhantomData;
use std::time::Duration;

/// Builder for configuring and constructing a [`Cache`].
#[derive(Debug)]
pub struct CacheBuilder<K, V> {
    pub(crate) capacity: usize,
    pub(crate) default_ttl: Duration,
    pub(crate) name: String,
    _marker: PhantomData<fn() -> (K, V)>,
}

impl<K, V> CacheBuilder<K, V> {
    /// Creates a new builder with default values.
    pub fn new() -> Self {
        Self {
            capacity: 1024,
            default_ttl: Duration::from_secs(300),
            name: String::from("<unnamed>"),
            _marker: PhantomData,
        }
    }

    /// Sets the maximum number of entries held at once.
    ///
    /// Default: 1024
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Sets the TTL applied by [`Cache::insert`].
    ///
    /// Default: 300 seconds
    pub fn default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    /// Give this cache a human-readable name for observability.
    ///
    /// Default: `<unnamed>`
    pub fn name<N: Into<String>>(mut self, name: N) -> Self {
        self.name = name.into();
        self
    }

    /// Builds the cache.
    pub fn build(self) -> Cache<K, V>
    where
        K: Hash + Eq,
        V: Clone,
    {
        Cache::from_builder(self)
    }
}

impl<K, V> Default for CacheBuilder<K, V> {
    fn default() -> Self {
        Self::new()
    }
}
