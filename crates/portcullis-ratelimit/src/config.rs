use crate::limiter::{Tier, TieredLimiter};
use std::time::Duration;

pub(crate) struct Config {
    pub(crate) free_rps: f64,
    pub(crate) pro_rps: f64,
    pub(crate) enterprise_rps: f64,
    pub(crate) free_burst: f64,
    pub(crate) pro_burst: f64,
    pub(crate) enterprise_burst: f64,
    pub(crate) idle_after: Duration,
}

impl Config {
    pub(crate) fn rps_for(&self, tier: Tier) -> f64 {
        match tier {
            Tier::Free => self.free_rps,
            Tier::Pro => self.pro_rps,
            Tier::Enterprise => self.enterprise_rps,
        }
    }

    pub(crate) fn burst_multiplier_for(&self, tier: Tier) -> f64 {
        match tier {
            Tier::Free => self.free_burst,
            Tier::Pro => self.pro_burst,
            Tier::Enterprise => self.enterprise_burst,
        }
    }
}

/// Builder for configuring and constructing a [`TieredLimiter`].
#[derive(Debug, Clone)]
pub struct TieredLimiterBuilder {
    free_rps: f64,
    pro_rps: f64,
    enterprise_rps: f64,
    free_burst: f64,
    pro_burst: f64,
    enterprise_burst: f64,
    idle_after: Duration,
}

impl TieredLimiterBuilder {
    /// Creates a new builder with default values.
    pub fn new() -> Self {
        Self {
            free_rps: 10.0,
            pro_rps: 100.0,
            enterprise_rps: 1000.0,
            free_burst: 2.0,
            pro_burst: 3.0,
            enterprise_burst: 5.0,
            idle_after: Duration::from_secs(600),
        }
    }

    /// Requests per second for a tier.
    ///
    /// Defaults: free 10, pro 100, enterprise 1000
    pub fn tier_rps(mut self, tier: Tier, rps: f64) -> Self {
        let rps = rps.max(0.001);
        match tier {
            Tier::Free => self.free_rps = rps,
            Tier::Pro => self.pro_rps = rps,
            Tier::Enterprise => self.enterprise_rps = rps,
        }
        self
    }

    /// Burst multiplier for a tier: burst capacity = rps × multiplier.
    ///
    /// Defaults: free 2, pro 3, enterprise 5
    pub fn burst_multiplier(mut self, tier: Tier, multiplier: f64) -> Self {
        let multiplier = multiplier.max(1.0);
        match tier {
            Tier::Free => self.free_burst = multiplier,
            Tier::Pro => self.pro_burst = multiplier,
            Tier::Enterprise => self.enterprise_burst = multiplier,
        }
        self
    }

    /// How long a bucket may stay idle before the sweeper reclaims it.
    ///
    /// Default: 10 minutes
    pub fn idle_after(mut self, horizon: Duration) -> Self {
        self.idle_after = horizon;
        self
    }

    /// Builds the limiter.
    pub fn build(self) -> TieredLimiter {
        TieredLimiter::from_config(Config {
            free_rps: self.free_rps,
            pro_rps: self.pro_rps,
            enterprise_rps: self.enterprise_rps,
            free_burst: self.free_burst,
            pro_burst: self.pro_burst,
            enterprise_burst: self.enterprise_burst,
            idle_after: self.idle_after,
        })
    }
}

impl Default for TieredLimiterBuilder {
    fn default() -> Self {
        Self::new()
    }
}
