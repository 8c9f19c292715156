//! Token revocation list.
//!
//! A set of SHA-256 token fingerprints sourced from the registry KV store.
//! Consulted before a verify-token cache hit is honored, so a revocation
//! takes effect within one refresh interval even while the cached verdict
//! is still fresh.

use crate::registry::RegistryClient;
use parking_lot::RwLock;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone, Default)]
pub struct RevocationList {
    inner: Arc<RwLock<HashSet<String>>>,
}

impl RevocationList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, fingerprint: &str) -> bool {
        self.inner.read().contains(fingerprint)
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    /// Replaces the whole set with a new snapshot.
    pub fn replace<I: IntoIterator<Item = String>>(&self, fingerprints: I) {
        let next: HashSet<String> = fingerprints.into_iter().collect();
        *self.inner.write() = next;
    }

    /// Refreshes once from the KV key holding newline-separated fingerprints.
    ///
    /// A missing key means an empty list. Registry errors leave the current
    /// snapshot in place: a registry blip must not un-revoke tokens.
    pub async fn refresh(&self, registry: &RegistryClient, kv_key: &str) {
        match registry.kv_get(kv_key).await {
            Ok(value) => {
                let fingerprints = value
                    .unwrap_or_default()
                    .lines()
                    .map(str::trim)
                    .filter(|line| !line.is_empty())
                    .map(str::to_string)
                    .collect::<Vec<_>>();
                let count = fingerprints.len();
                self.replace(fingerprints);
                metrics::gauge!("gateway_revoked_tokens").set(count as f64);
                tracing::debug!(count, "Refreshed token revocation list");
            }
            Err(err) => {
                tracing::warn!(error = %err, "Failed to refresh revocation list; keeping previous snapshot");
            }
        }
    }

    /// Spawns the periodic refresher.
    pub fn spawn_refresher(
        &self,
        registry: RegistryClient,
        kv_key: String,
        interval: Duration,
    ) -> tokio::task::JoinHandle<()> {
        let list = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                list.refresh(&registry, &kv_key).await;
            }
        })
    }
}
