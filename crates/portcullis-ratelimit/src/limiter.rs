use crate::config::{Config, TieredLimiterBuilder};
use hashbrown::HashMap;
use parking_lot::Mutex;
use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[cfg(feature = "metrics")]
use metrics::counter;

/// Subscription tier of the caller, affecting rate and burst budgets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Tier {
    /// The tier assumed before authentication.
    #[default]
    Free,
    Pro,
    Enterprise,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Free => "free",
            Tier::Pro => "pro",
            Tier::Enterprise => "enterprise",
        }
    }

    /// Parses a tier name, defaulting unknown values to `Free`.
    pub fn parse(s: &str) -> Self {
        match s {
            "pro" => Tier::Pro,
            "enterprise" => Tier::Enterprise,
            _ => Tier::Free,
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity a bucket is keyed by. Strict precedence: `User` when the
/// request has a validated user id, else `ApiKey`, else `Ip`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RateKey {
    /// Single process-wide bucket (the `global` limiting mode).
    Global,
    User(String),
    /// Only the first characters of the key, never the full secret.
    ApiKey(String),
    Ip(IpAddr),
}

impl RateKey {
    pub fn user<S: Into<String>>(id: S) -> Self {
        RateKey::User(id.into())
    }

    /// Keys by a truncated prefix so full secrets never sit in the bucket map.
    pub fn api_key(raw: &str) -> Self {
        RateKey::ApiKey(raw.chars().take(10).collect())
    }

    pub fn ip(addr: IpAddr) -> Self {
        RateKey::Ip(addr)
    }
}

impl fmt::Display for RateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RateKey::Global => write!(f, "global"),
            RateKey::User(id) => write!(f, "user:{}", id),
            RateKey::ApiKey(prefix) => write!(f, "apikey:{}", prefix),
            RateKey::Ip(addr) => write!(f, "ip:{}", addr),
        }
    }
}

/// Outcome of a rate-limit check, with everything the response headers need.
#[derive(Debug, Clone)]
pub struct RateDecision {
    pub allowed: bool,
    /// Requests per second for this caller's tier.
    pub limit: u32,
    /// Whole tokens left in the bucket.
    pub remaining: u32,
    /// Time until the bucket is full again.
    pub reset_after: Duration,
    /// On rejection, how long until one token is available.
    pub retry_after: Option<Duration>,
    pub tier: Tier,
}

struct Bucket {
    tokens: f64,
    last_refill: Instant,
    last_access: Instant,
}

/// Token buckets keyed by caller identity.
///
/// The outer map lock is held only to fetch or create a bucket handle, so
/// checks against different keys do not contend.
pub struct TieredLimiter {
    buckets: Arc<Mutex<HashMap<RateKey, Arc<Mutex<Bucket>>>>>,
    config: Arc<Config>,
}

impl Clone for TieredLimiter {
    fn clone(&self) -> Self {
        Self {
            buckets: Arc::clone(&self.buckets),
            config: Arc::clone(&self.config),
        }
    }
}

impl TieredLimiter {
    /// Creates a builder with default tier budgets.
    pub fn builder() -> TieredLimiterBuilder {
        TieredLimiterBuilder::new()
    }

    pub(crate) fn from_config(config: Config) -> Self {
        Self {
            buckets: Arc::new(Mutex::new(HashMap::new())),
            config: Arc::new(config),
        }
    }

    /// Checks (and consumes from) the bucket for `key`.
    ///
    /// Tier budgets are re-read on every check, so a tier change takes
    /// effect on the caller's next request without resetting the bucket.
    pub fn check(&self, key: &RateKey, tier: Tier) -> RateDecision {
        let rps = self.config.rps_for(tier);
        let burst = rps * self.config.burst_multiplier_for(tier);
        let now = Instant::now();

        let bucket = {
            let mut buckets = self.buckets.lock();
            Arc::clone(buckets.entry(key.clone()).or_insert_with(|| {
                Arc::new(Mutex::new(Bucket {
                    tokens: burst,
                    last_refill: now,
                    last_access: now,
                }))
            }))
        };

        let mut bucket = bucket.lock();
        let elapsed = now.saturating_duration_since(bucket.last_refill);
        bucket.tokens = (bucket.tokens + elapsed.as_secs_f64() * rps).min(burst);
        bucket.last_refill = now;
        bucket.last_access = now;

        let allowed = bucket.tokens >= 1.0;
        let retry_after = if allowed {
            bucket.tokens -= 1.0;
            None
        } else {
            let wait = (1.0 - bucket.tokens) / rps;
            Some(Duration::from_secs_f64(wait.max(0.0)))
        };

        #[cfg(feature = "metrics")]
        counter!(
            "ratelimit_checks_total",
            "tier" => tier.as_str(),
            "outcome" => if allowed { "allowed" } else { "rejected" }
        )
        .increment(1);

        RateDecision {
            allowed,
            limit: rps.round() as u32,
            remaining: bucket.tokens.floor().max(0.0) as u32,
            reset_after: Duration::from_secs_f64(((burst - bucket.tokens) / rps).max(0.0)),
            retry_after,
            tier,
        }
    }

    /// Removes buckets idle longer than the configured horizon.
    /// Returns how many were reclaimed.
    pub fn sweep(&self) -> usize {
        let horizon = self.config.idle_after;
        let mut buckets = self.buckets.lock();
        let before = buckets.len();
        buckets.retain(|_, bucket| bucket.lock().last_access.elapsed() < horizon);
        let removed = before - buckets.len();

        #[cfg(feature = "tracing")]
        if removed > 0 {
            tracing::debug!(removed, remaining = buckets.len(), "Reclaimed idle buckets");
        }

        removed
    }

    /// Spawns a background task sweeping idle buckets on an interval.
    pub fn spawn_sweeper(&self, interval: Duration) -> tokio::task::JoinHandle<()> {
        let limiter = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                limiter.sweep();
            }
        })
    }

    /// Number of live buckets.
    pub fn bucket_count(&self) -> usize {
        self.buckets.lock().len()
    }
}
