//! Wire types of the identity and authorization services.

use crate::principal::AccessLevel;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::time::{Duration, SystemTime};

/// SHA-256 hex of a raw credential. Used as the cache key so raw tokens
/// and API keys never sit in the cache or appear in logs.
pub fn token_fingerprint(raw: &str) -> String {
    let digest = Sha256::digest(raw.as_bytes());
    let mut out = String::with_capacity(64);
    for byte in digest {
        out.push_str(&format!("{:02x}", byte));
    }
    out
}

/// Verdict of `POST /api/v1/auth/verify-token`.
#[derive(Debug, Clone, Deserialize)]
pub struct VerifiedToken {
    #[serde(default)]
    pub valid: bool,
    pub provider: Option<String>,
    pub user_id: Option<String>,
    pub email: Option<String>,
    /// Unix seconds; bounds how long the verdict may be cached.
    pub expires_at: Option<i64>,
    /// Subscription tier, when the identity service knows it.
    #[serde(default)]
    pub tier: Option<String>,
    pub error: Option<String>,
}

impl VerifiedToken {
    /// A synthetic invalid verdict for tokens on the revocation list.
    pub fn revoked() -> Self {
        Self {
            valid: false,
            provider: None,
            user_id: None,
            email: None,
            expires_at: None,
            tier: None,
            error: Some("token has been revoked".to_string()),
        }
    }

    /// The token's own expiry as wall-clock time, if it has one.
    pub fn hard_expiry(&self) -> Option<SystemTime> {
        self.expires_at
            .filter(|&secs| secs > 0)
            .map(|secs| SystemTime::UNIX_EPOCH + Duration::from_secs(secs as u64))
    }
}

/// Verdict of `POST /api/v1/auth/verify-api-key`.
#[derive(Debug, Clone, Deserialize)]
pub struct VerifiedApiKey {
    #[serde(default)]
    pub valid: bool,
    pub key_id: Option<String>,
    pub organization_id: Option<String>,
    pub name: Option<String>,
    #[serde(default)]
    pub permissions: Vec<String>,
    pub created_at: Option<String>,
    pub last_used: Option<String>,
    #[serde(default)]
    pub tier: Option<String>,
    pub error: Option<String>,
}

/// Verdict of `POST /api/v1/authorization/check-access`.
#[derive(Debug, Clone, Deserialize)]
pub struct AccessDecision {
    #[serde(default)]
    pub has_access: bool,
    pub user_access_level: Option<String>,
    pub permission_source: Option<String>,
    pub subscription_tier: Option<String>,
    pub organization_plan: Option<String>,
    pub reason: Option<String>,
    /// Unix seconds; bounds how long the decision may be cached.
    pub expires_at: Option<i64>,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

impl AccessDecision {
    pub fn hard_expiry(&self) -> Option<SystemTime> {
        self.expires_at
            .filter(|&secs| secs > 0)
            .map(|secs| SystemTime::UNIX_EPOCH + Duration::from_secs(secs as u64))
    }
}

/// Cache key of an access decision.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AccessKey {
    pub subject: String,
    pub resource_type: String,
    pub resource_name: String,
    pub required_level: AccessLevel,
}
