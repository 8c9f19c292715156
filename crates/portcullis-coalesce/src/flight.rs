//! Single-flight execution over keyed futures.

use hashbrown::HashMap;
use parking_lot::Mutex;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;

#[cfg(feature = "metrics")]
use metrics::counter;

/// Error type for coalesced calls.
#[derive(Debug, Clone, Error)]
pub enum CoalesceError<E> {
    /// The underlying call returned an error (shared by all waiters).
    #[error("coalesced call failed: {0}")]
    Service(E),

    /// The leader was cancelled before producing a result.
    #[error("coalesce leader was cancelled before completing")]
    LeaderGone,
}

impl<E> CoalesceError<E> {
    /// Returns the underlying service error, if any.
    pub fn into_service(self) -> Option<E> {
        match self {
            CoalesceError::Service(e) => Some(e),
            CoalesceError::LeaderGone => None,
        }
    }
}

type InFlightMap<K, T, E> = Mutex<HashMap<K, broadcast::Sender<Result<T, E>>>>;

/// Deduplicates concurrent identical outbound calls.
///
/// Cloning is cheap; all clones share the same in-flight table.
pub struct Coalescer<K, T, E> {
    inflight: Arc<InFlightMap<K, T, E>>,
    #[cfg_attr(not(any(feature = "metrics", feature = "tracing")), allow(dead_code))]
    name: Arc<str>,
}

impl<K, T, E> Clone for Coalescer<K, T, E> {
    fn clone(&self) -> Self {
        Self {
            inflight: Arc::clone(&self.inflight),
            name: Arc::clone(&self.name),
        }
    }
}

impl<K, T, E> Coalescer<K, T, E>
where
    K: Hash + Eq + Clone,
    T: Clone,
    E: Clone,
{
    /// Creates a coalescer. The name shows up in metrics and logs only.
    pub fn new<N: Into<String>>(name: N) -> Self {
        Self {
            inflight: Arc::new(Mutex::new(HashMap::new())),
            name: name.into().into(),
        }
    }

    /// Runs `fut` under the given key, sharing its result with every
    /// concurrent caller that used the same key.
    ///
    /// At most one future per key is in flight at any time. The leader's
    /// result (value or error) is observed by all callers. Once it
    /// completes, the key is vacated and the next call executes afresh.
    pub async fn run<Fut>(&self, key: K, fut: Fut) -> Result<T, CoalesceError<E>>
    where
        Fut: Future<Output = Result<T, E>>,
    {
        let waiter = {
            let mut inflight = self.inflight.lock();
            if let Some(sender) = inflight.get(&key) {
                Some(sender.subscribe())
            } else {
                // Capacity 1: exactly one result is ever sent per flight.
                let (tx, _rx) = broadcast::channel(1);
                inflight.insert(key.clone(), tx);
                None
            }
        };

        match waiter {
            Some(mut rx) => {
                #[cfg(feature = "metrics")]
                counter!("coalesce_requests_total", "coalesce" => self.name.to_string(), "role" => "waiter")
                    .increment(1);
                #[cfg(feature = "tracing")]
                tracing::debug!(coalesce = %self.name, "Joined in-flight call as waiter");

                match rx.recv().await {
                    Ok(result) => result.map_err(CoalesceError::Service),
                    Err(_) => Err(CoalesceError::LeaderGone),
                }
            }
            None => {
                #[cfg(feature = "metrics")]
                counter!("coalesce_requests_total", "coalesce" => self.name.to_string(), "role" => "leader")
                    .increment(1);
                #[cfg(feature = "tracing")]
                tracing::debug!(coalesce = %self.name, "Executing as leader");

                // The guard vacates the key if this future is dropped before
                // completing, so waiters see LeaderGone instead of hanging.
                let mut guard = LeaderGuard {
                    inflight: Arc::clone(&self.inflight),
                    key: Some(key),
                };

                let result = fut.await;
                guard.complete(clone_result(&result));
                result.map_err(CoalesceError::Service)
            }
        }
    }

    /// Number of keys currently in flight.
    pub fn in_flight(&self) -> usize {
        self.inflight.lock().len()
    }
}

fn clone_result<T: Clone, E: Clone>(result: &Result<T, E>) -> Result<T, E> {
    match result {
        Ok(v) => Ok(v.clone()),
        Err(e) => Err(e.clone()),
    }
}

struct LeaderGuard<K: Hash + Eq, T, E> {
    inflight: Arc<InFlightMap<K, T, E>>,
    key: Option<K>,
}

impl<K: Hash + Eq, T, E> LeaderGuard<K, T, E> {
    /// Vacates the key and fans the result out to all waiters.
    fn complete(&mut self, result: Result<T, E>) {
        if let Some(key) = self.key.take() {
            let sender = self.inflight.lock().remove(&key);
            if let Some(sender) = sender {
                // No receivers is fine: nobody joined this flight.
                let _ = sender.send(result);
            }
        }
    }
}

impl<K: Hash + Eq, T, E> Drop for LeaderGuard<K, T, E> {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            // Dropping the sender closes every waiter's receiver.
            self.inflight.lock().remove(&key);
        }
    }
}
