//! The identity/authorization client.

use crate::identity::revocation::RevocationList;
use crate::identity::types::{
    token_fingerprint, AccessDecision, AccessKey, VerifiedApiKey, VerifiedToken,
};
use crate::principal::AccessLevel;
use portcullis_breaker::{BreakerError, CircuitBreaker};
use portcullis_cache::Cache;
use portcullis_coalesce::{CoalesceError, Coalescer};
use serde::de::DeserializeOwned;
use serde_json::json;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

/// A single outbound call's failure. Cloneable so coalesced waiters can
/// share it; message strings only, never credentials.
#[derive(Debug, Clone, Error)]
pub enum CallError {
    #[error("call timed out")]
    Timeout,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("upstream returned status {0}")]
    Status(u16),

    #[error("failed to decode upstream response: {0}")]
    Decode(String),
}

impl CallError {
    fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            CallError::Timeout
        } else {
            CallError::Transport(err.to_string())
        }
    }

    /// Whether this error is evidence of collaborator sickness. Client
    /// errors are proof the collaborator is alive and do not trip the
    /// breaker.
    pub fn counts_as_breaker_failure(&self) -> bool {
        match self {
            CallError::Timeout | CallError::Transport(_) | CallError::Decode(_) => true,
            CallError::Status(status) => *status >= 500,
        }
    }
}

/// Failure of an identity-client operation, classified for the pipeline's
/// fail policies.
#[derive(Debug, Clone, Error)]
pub enum IdentityError {
    /// The collaborator's circuit is open; no call was made.
    #[error("collaborator circuit is open")]
    BreakerOpen,

    /// Transport failure, timeout, or 5xx.
    #[error("collaborator unavailable: {0}")]
    Unavailable(CallError),

    /// The collaborator answered with a client error.
    #[error("collaborator rejected the request with status {0}")]
    Rejected(u16),

    /// The coalesced leader vanished before producing a result.
    #[error("coalesced verification was cancelled")]
    CoalesceFailed,
}

impl IdentityError {
    /// True when the fail policy (rather than an outright rejection)
    /// decides what happens next.
    pub fn is_unavailable(&self) -> bool {
        !matches!(self, IdentityError::Rejected(_))
    }
}

type FlightResult<T> = Result<T, CoalesceError<BreakerError<CallError>>>;

/// Typed facade over the identity and authorization services.
///
/// Cloning is cheap; clones share caches, coalescers, and breakers.
#[derive(Clone)]
pub struct IdentityClient {
    http: reqwest::Client,
    auth_base: String,
    authz_base: String,
    auth_timeout: Duration,
    authz_timeout: Duration,
    token_cache: Option<Cache<String, VerifiedToken>>,
    key_cache: Option<Cache<String, VerifiedApiKey>>,
    access_cache: Option<Cache<AccessKey, AccessDecision>>,
    token_flight: Coalescer<String, VerifiedToken, BreakerError<CallError>>,
    key_flight: Coalescer<String, VerifiedApiKey, BreakerError<CallError>>,
    access_flight: Coalescer<AccessKey, AccessDecision, BreakerError<CallError>>,
    auth_breaker: Option<CircuitBreaker<CallError>>,
    authz_breaker: Option<CircuitBreaker<CallError>>,
    revocations: RevocationList,
}

impl IdentityClient {
    pub fn builder() -> IdentityClientBuilder {
        IdentityClientBuilder::new()
    }

    /// State of the identity-service breaker, for health reporting.
    pub fn auth_breaker(&self) -> Option<&CircuitBreaker<CallError>> {
        self.auth_breaker.as_ref()
    }

    /// State of the authorization-service breaker.
    pub fn authz_breaker(&self) -> Option<&CircuitBreaker<CallError>> {
        self.authz_breaker.as_ref()
    }

    /// Verifies a bearer token.
    ///
    /// Revoked tokens short-circuit to an invalid verdict without touching
    /// cache or collaborator. A cached verdict is returned as-is; otherwise
    /// concurrent verifications of the same token coalesce into one
    /// breaker-guarded upstream call, and a successful verdict is cached
    /// with its TTL clamped to the token's own expiry.
    pub async fn verify_token(&self, raw_token: &str) -> Result<VerifiedToken, IdentityError> {
        let fingerprint = token_fingerprint(raw_token);
        if self.revocations.contains(&fingerprint) {
            tracing::info!(token = %&fingerprint[..16], "Rejected revoked token");
            return Ok(VerifiedToken::revoked());
        }
        if let Some(cache) = &self.token_cache {
            if let Some(token) = cache.get(&fingerprint) {
                return Ok(token);
            }
        }

        let http = self.http.clone();
        let url = format!("{}/api/v1/auth/verify-token", self.auth_base);
        let body = json!({ "token": raw_token });
        let timeout = self.auth_timeout;
        let breaker = self.auth_breaker.clone();
        let cache = self.token_cache.clone();
        let cache_key = fingerprint.clone();

        let outcome: FlightResult<VerifiedToken> = self
            .token_flight
            .run(fingerprint, async move {
                let token: VerifiedToken =
                    execute_guarded(breaker.as_ref(), post_json(http, url, body, timeout)).await?;
                if let Some(cache) = &cache {
                    match token.hard_expiry() {
                        Some(expiry) => {
                            cache.insert_clamped(cache_key, token.clone(), expiry);
                        }
                        None => cache.insert(cache_key, token.clone()),
                    }
                }
                Ok(token)
            })
            .await;
        map_flight(outcome)
    }

    /// Verifies an opaque API key. Same composition as [`Self::verify_token`].
    pub async fn verify_api_key(&self, raw_key: &str) -> Result<VerifiedApiKey, IdentityError> {
        let fingerprint = token_fingerprint(raw_key);
        if let Some(cache) = &self.key_cache {
            if let Some(key) = cache.get(&fingerprint) {
                return Ok(key);
            }
        }

        let http = self.http.clone();
        let url = format!("{}/api/v1/auth/verify-api-key", self.auth_base);
        let body = json!({ "api_key": raw_key });
        let timeout = self.auth_timeout;
        let breaker = self.auth_breaker.clone();
        let cache = self.key_cache.clone();
        let cache_key = fingerprint.clone();

        let outcome: FlightResult<VerifiedApiKey> = self
            .key_flight
            .run(fingerprint, async move {
                let key: VerifiedApiKey =
                    execute_guarded(breaker.as_ref(), post_json(http, url, body, timeout)).await?;
                if let Some(cache) = &cache {
                    cache.insert(cache_key, key.clone());
                }
                Ok(key)
            })
            .await;
        map_flight(outcome)
    }

    /// Asks the authorization service whether `subject` may use a resource.
    ///
    /// Runs on its own breaker: authorization degrading must not trip
    /// authentication, and vice versa.
    pub async fn check_access(
        &self,
        subject: &str,
        resource_type: &str,
        resource_name: &str,
        required_level: AccessLevel,
    ) -> Result<AccessDecision, IdentityError> {
        let key = AccessKey {
            subject: subject.to_string(),
            resource_type: resource_type.to_string(),
            resource_name: resource_name.to_string(),
            required_level,
        };
        if let Some(cache) = &self.access_cache {
            if let Some(decision) = cache.get(&key) {
                return Ok(decision);
            }
        }

        let http = self.http.clone();
        let url = format!("{}/api/v1/authorization/check-access", self.authz_base);
        let body = json!({
            "user_id": subject,
            "resource_type": resource_type,
            "resource_name": resource_name,
            "required_access_level": required_level.as_str(),
        });
        let timeout = self.authz_timeout;
        let breaker = self.authz_breaker.clone();
        let cache = self.access_cache.clone();
        let cache_key = key.clone();

        let outcome: FlightResult<AccessDecision> = self
            .access_flight
            .run(key, async move {
                let decision: AccessDecision =
                    execute_guarded(breaker.as_ref(), post_json(http, url, body, timeout)).await?;
                if let Some(cache) = &cache {
                    match decision.hard_expiry() {
                        Some(expiry) => {
                            cache.insert_clamped(cache_key, decision.clone(), expiry);
                        }
                        None => cache.insert(cache_key, decision.clone()),
                    }
                }
                Ok(decision)
            })
            .await;
        map_flight(outcome)
    }
}

async fn execute_guarded<T, Fut>(
    breaker: Option<&CircuitBreaker<CallError>>,
    fut: Fut,
) -> Result<T, BreakerError<CallError>>
where
    Fut: Future<Output = Result<T, CallError>>,
{
    match breaker {
        Some(breaker) => breaker.execute(fut).await,
        None => fut.await.map_err(BreakerError::Inner),
    }
}

async fn post_json<T: DeserializeOwned>(
    http: reqwest::Client,
    url: String,
    body: serde_json::Value,
    timeout: Duration,
) -> Result<T, CallError> {
    let response = http
        .post(&url)
        .json(&body)
        .timeout(timeout)
        .send()
        .await
        .map_err(CallError::from_reqwest)?;

    let status = response.status();
    if !status.is_success() {
        return Err(CallError::Status(status.as_u16()));
    }
    response
        .json::<T>()
        .await
        .map_err(|e| CallError::Decode(e.to_string()))
}

fn map_flight<T>(outcome: FlightResult<T>) -> Result<T, IdentityError> {
    match outcome {
        Ok(value) => Ok(value),
        Err(CoalesceError::LeaderGone) => Err(IdentityError::CoalesceFailed),
        Err(CoalesceError::Service(BreakerError::OpenCircuit)) => Err(IdentityError::BreakerOpen),
        Err(CoalesceError::Service(BreakerError::Inner(call))) => Err(match call {
            CallError::Status(status) if (400..500).contains(&status) => {
                IdentityError::Rejected(status)
            }
            other => IdentityError::Unavailable(other),
        }),
    }
}

/// Builder for [`IdentityClient`].
pub struct IdentityClientBuilder {
    http: reqwest::Client,
    auth_base: String,
    authz_base: String,
    auth_timeout: Duration,
    authz_timeout: Duration,
    auth_cache: Option<(usize, Duration)>,
    authz_cache: Option<(usize, Duration)>,
    auth_breaker: Option<(usize, Duration)>,
    authz_breaker: Option<(usize, Duration)>,
    revocations: RevocationList,
}

impl IdentityClientBuilder {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
            auth_base: "http://127.0.0.1:8001".to_string(),
            authz_base: "http://127.0.0.1:8002".to_string(),
            auth_timeout: Duration::from_secs(5),
            authz_timeout: Duration::from_secs(5),
            auth_cache: Some((10_000, Duration::from_secs(300))),
            authz_cache: Some((10_000, Duration::from_secs(30))),
            auth_breaker: Some((5, Duration::from_secs(30))),
            authz_breaker: Some((5, Duration::from_secs(30))),
            revocations: RevocationList::new(),
        }
    }

    /// Shared HTTP client (connection pool) for all collaborator calls.
    pub fn http(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    /// Base URL of the identity service.
    pub fn auth_base<S: Into<String>>(mut self, base: S) -> Self {
        self.auth_base = base.into();
        self
    }

    /// Base URL of the authorization service.
    pub fn authz_base<S: Into<String>>(mut self, base: S) -> Self {
        self.authz_base = base.into();
        self
    }

    pub fn auth_timeout(mut self, timeout: Duration) -> Self {
        self.auth_timeout = timeout;
        self
    }

    pub fn authz_timeout(mut self, timeout: Duration) -> Self {
        self.authz_timeout = timeout;
        self
    }

    /// Token/API-key verification cache, or `None` to disable caching.
    pub fn auth_cache(mut self, cache: Option<(usize, Duration)>) -> Self {
        self.auth_cache = cache;
        self
    }

    /// Access-decision cache. The TTL is capped at 60 seconds: permission
    /// decisions must stay fresh.
    pub fn authz_cache(mut self, cache: Option<(usize, Duration)>) -> Self {
        self.authz_cache = cache.map(|(cap, ttl)| (cap, ttl.min(Duration::from_secs(60))));
        self
    }

    /// Identity-service breaker `(consecutive failures, open timeout)`,
    /// or `None` to disable it.
    pub fn auth_breaker(mut self, breaker: Option<(usize, Duration)>) -> Self {
        self.auth_breaker = breaker;
        self
    }

    /// Authorization-service breaker. Independent of the identity breaker.
    pub fn authz_breaker(mut self, breaker: Option<(usize, Duration)>) -> Self {
        self.authz_breaker = breaker;
        self
    }

    pub fn revocations(mut self, revocations: RevocationList) -> Self {
        self.revocations = revocations;
        self
    }

    pub fn build(self) -> IdentityClient {
        let classifier = |e: &CallError| e.counts_as_breaker_failure();
        let make_breaker = |name: &str, settings: Option<(usize, Duration)>| {
            settings.map(|(threshold, timeout)| {
                CircuitBreaker::builder()
                    .name(name)
                    .failure_threshold(threshold)
                    .open_timeout(timeout)
                    .failure_classifier(classifier)
                    .build()
            })
        };

        IdentityClient {
            http: self.http,
            auth_base: self.auth_base.trim_end_matches('/').to_string(),
            authz_base: self.authz_base.trim_end_matches('/').to_string(),
            auth_timeout: self.auth_timeout,
            authz_timeout: self.authz_timeout,
            token_cache: self.auth_cache.map(|(capacity, ttl)| {
                Cache::builder()
                    .capacity(capacity)
                    .default_ttl(ttl)
                    .name("token-verifications")
                    .build()
            }),
            key_cache: self.auth_cache.map(|(capacity, ttl)| {
                Cache::builder()
                    .capacity(capacity)
                    .default_ttl(ttl)
                    .name("apikey-verifications")
                    .build()
            }),
            access_cache: self.authz_cache.map(|(capacity, ttl)| {
                Cache::builder()
                    .capacity(capacity)
                    .default_ttl(ttl)
                    .name("access-decisions")
                    .build()
            }),
            token_flight: Coalescer::new("verify-token"),
            key_flight: Coalescer::new("verify-api-key"),
            access_flight: Coalescer::new("check-access"),
            auth_breaker: make_breaker("identity-service", self.auth_breaker),
            authz_breaker: make_breaker("authorization-service", self.authz_breaker),
            revocations: self.revocations,
        }
    }
}

impl Default for IdentityClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}
