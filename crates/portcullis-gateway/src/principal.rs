//! Request-scoped identity.

use crate::identity::{VerifiedApiKey, VerifiedToken};
use portcullis_ratelimit::Tier;
use serde::{Deserialize, Serialize};

/// How a request authenticated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMethod {
    Internal,
    Jwt,
    ApiKey,
}

impl AuthMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthMethod::Internal => "internal",
            AuthMethod::Jwt => "jwt",
            AuthMethod::ApiKey => "api_key",
        }
    }
}

/// Access level required by a resource or granted by a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessLevel {
    None,
    ReadOnly,
    ReadWrite,
    Admin,
}

impl AccessLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessLevel::None => "none",
            AccessLevel::ReadOnly => "read_only",
            AccessLevel::ReadWrite => "read_write",
            AccessLevel::Admin => "admin",
        }
    }
}

/// The authenticated identity of a request. Built per request from
/// identity responses, never persisted, and forwarded to the backend as
/// request attributes.
#[derive(Debug, Clone)]
pub enum Principal {
    Anonymous,
    User {
        user_id: String,
        email: Option<String>,
        tier: Tier,
    },
    ApiKey {
        key_id: String,
        organization_id: Option<String>,
        permissions: Vec<String>,
        tier: Tier,
    },
    InternalService {
        name: String,
    },
}

impl Principal {
    pub fn from_token(token: &VerifiedToken) -> Self {
        Principal::User {
            user_id: token.user_id.clone().unwrap_or_default(),
            email: token.email.clone(),
            tier: token
                .tier
                .as_deref()
                .map(Tier::parse)
                .unwrap_or_default(),
        }
    }

    pub fn from_api_key(key: &VerifiedApiKey) -> Self {
        Principal::ApiKey {
            key_id: key.key_id.clone().unwrap_or_default(),
            organization_id: key.organization_id.clone(),
            permissions: key.permissions.clone(),
            tier: key.tier.as_deref().map(Tier::parse).unwrap_or_default(),
        }
    }

    pub fn internal<S: Into<String>>(name: S) -> Self {
        Principal::InternalService { name: name.into() }
    }

    pub fn is_anonymous(&self) -> bool {
        matches!(self, Principal::Anonymous)
    }

    /// The identifier authorization decisions are keyed by: the user id
    /// for users, the key id for API keys.
    pub fn subject(&self) -> Option<&str> {
        match self {
            Principal::User { user_id, .. } => Some(user_id),
            Principal::ApiKey { key_id, .. } => Some(key_id),
            Principal::InternalService { name } => Some(name),
            Principal::Anonymous => None,
        }
    }

    pub fn auth_method(&self) -> Option<AuthMethod> {
        match self {
            Principal::User { .. } => Some(AuthMethod::Jwt),
            Principal::ApiKey { .. } => Some(AuthMethod::ApiKey),
            Principal::InternalService { .. } => Some(AuthMethod::Internal),
            Principal::Anonymous => None,
        }
    }

    /// Rate-limit tier. Internal services get the widest budget; anonymous
    /// callers the narrowest.
    pub fn tier(&self) -> Tier {
        match self {
            Principal::User { tier, .. } | Principal::ApiKey { tier, .. } => *tier,
            Principal::InternalService { .. } => Tier::Enterprise,
            Principal::Anonymous => Tier::Free,
        }
    }
}
