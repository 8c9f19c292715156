//! Gateway configuration.
//!
//! Loaded from a TOML file selected on the command line. Every key has a
//! default so a bare config file (or none at all) yields a runnable
//! gateway pointed at local collaborators. Unknown keys are rejected:
//! a typo in a fail-policy key must not silently weaken admission.

use serde::Deserialize;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Unrecoverable configuration failure; the process exits non-zero.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
}

/// What to do when a collaborator is unavailable (breaker open, transport
/// failure, timeout).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailPolicy {
    /// Admit the request and let downstream decide.
    FailOpen,
    /// Reject the request with 503.
    FailClosed,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub bind: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".parse().unwrap(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheSettings {
    pub enabled: bool,
    pub ttl_secs: u64,
    pub capacity: usize,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_secs: 300,
            capacity: 10_000,
        }
    }
}

impl CacheSettings {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BreakerSettings {
    pub enabled: bool,
    /// Consecutive failures that open the circuit.
    pub threshold: usize,
    /// Seconds the circuit stays open before probing.
    pub timeout_secs: u64,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: 5,
            timeout_secs: 30,
        }
    }
}

impl BreakerSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// The `[auth]` block: the identity service collaborator.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AuthConfig {
    /// Fallback URL used when discovery is disabled or fails.
    pub service_url: String,
    /// Logical name of the identity service in the catalog.
    pub consul_service: String,
    pub use_consul: bool,
    pub timeout_secs: u64,
    pub fail_policy: FailPolicy,
    /// Admit loopback requests from programmatic clients as a synthetic
    /// local service. Development only.
    pub allow_local_bypass: bool,
    pub cache: CacheSettings,
    pub circuit_breaker: BreakerSettings,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            service_url: "http://127.0.0.1:8001".to_string(),
            consul_service: "identity-service".to_string(),
            use_consul: true,
            timeout_secs: 5,
            fail_policy: FailPolicy::FailClosed,
            allow_local_bypass: false,
            cache: CacheSettings::default(),
            circuit_breaker: BreakerSettings::default(),
        }
    }
}

impl AuthConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// The `[authorization]` block: the authorization service collaborator.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AuthorizationConfig {
    pub service_url: String,
    pub consul_service: String,
    pub use_consul: bool,
    pub timeout_secs: u64,
    pub fail_policy: FailPolicy,
    pub cache: CacheSettings,
    pub circuit_breaker: BreakerSettings,
}

impl Default for AuthorizationConfig {
    fn default() -> Self {
        Self {
            service_url: "http://127.0.0.1:8002".to_string(),
            consul_service: "authorization-service".to_string(),
            use_consul: true,
            timeout_secs: 5,
            // Matches the source deployment's posture: availability of the
            // platform wins over strictness of permission checks.
            fail_policy: FailPolicy::FailOpen,
            cache: CacheSettings {
                enabled: true,
                ttl_secs: 30,
                capacity: 10_000,
            },
            circuit_breaker: BreakerSettings::default(),
        }
    }
}

impl AuthorizationConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Permission decisions go stale fast; the cache TTL is hard-capped.
    pub fn effective_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache.ttl_secs.min(60))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitingMode {
    /// One process-wide bucket.
    Global,
    /// Per-caller buckets, one flat rate.
    PerUser,
    /// Per-caller buckets with tier-dependent rates.
    Tiered,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RateLimitingConfig {
    #[serde(rename = "type")]
    pub mode: RateLimitingMode,
    pub default_rps: f64,
    pub burst_multiplier: f64,
    pub free_rps: f64,
    pub pro_rps: f64,
    pub enterprise_rps: f64,
    pub sweep_interval_secs: u64,
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            mode: RateLimitingMode::Tiered,
            default_rps: 10.0,
            burst_multiplier: 2.0,
            free_rps: 10.0,
            pro_rps: 100.0,
            enterprise_rps: 1000.0,
            sweep_interval_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RegistryConfig {
    pub url: String,
    /// KV prefix under which gateway-owned keys live
    /// (service secrets, the token revocation list).
    pub kv_prefix: String,
    pub catalog_cache_ttl_secs: u64,
    pub revocation_refresh_secs: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:8500".to_string(),
            kv_prefix: "portcullis".to_string(),
            catalog_cache_ttl_secs: 2,
            revocation_refresh_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReconcilerConfig {
    pub enabled: bool,
    pub interval_secs: u64,
    pub edge_admin_url: String,
    pub edge_admin_key: String,
    /// Services that expose routes at `/` but are mounted under a base
    /// path; the reconciler attaches a path-rewrite plugin for them.
    pub path_rewrite_services: Vec<String>,
    /// Pass DNS node addresses through to the edge proxy unresolved.
    /// Leave off in bridged container networks, where the gateway must
    /// resolve the name itself.
    pub pass_dns_names: bool,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 15,
            edge_admin_url: "http://127.0.0.1:9180".to_string(),
            edge_admin_key: String::new(),
            path_rewrite_services: Vec::new(),
            pass_dns_names: false,
        }
    }
}

impl ReconcilerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PublicConfig {
    /// Path prefixes that skip the admission pipeline entirely.
    pub prefixes: Vec<String>,
}

impl Default for PublicConfig {
    fn default() -> Self {
        Self {
            prefixes: vec!["/health".to_string(), "/ready".to_string()],
        }
    }
}

/// Top-level gateway configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GatewayConfig {
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub authorization: AuthorizationConfig,
    pub rate_limiting: RateLimitingConfig,
    pub registry: RegistryConfig,
    pub reconciler: ReconcilerConfig,
    pub public: PublicConfig,
}

impl GatewayConfig {
    /// Loads and validates a config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn is_public_path(&self, path: &str) -> bool {
        self.public.prefixes.iter().any(|p| path.starts_with(p))
    }
}
