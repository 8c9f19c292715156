//! The admission pipeline.
//!
//! Applied to every request except the configured public paths. Steps, in
//! order: public bypass, internal-service auth, JWT auth, API-key auth,
//! rate limiting, resource authorization, attribute propagation. Steps
//! within a request are strictly sequential; requests are independent.

pub mod resource;

pub use resource::{ResourceDescriptor, ResourceTable};

use crate::config::{FailPolicy, GatewayConfig, RateLimitingMode};
use crate::error::GatewayError;
use crate::identity::{AccessDecision, IdentityClient, IdentityError};
use crate::principal::Principal;
use crate::registry::RegistryClient;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderMap, HeaderValue};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use portcullis_ratelimit::{RateDecision, RateKey, Tier, TieredLimiter};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use uuid::Uuid;

/// Attribute headers forwarded to backends. Stripped from inbound
/// requests first so external callers cannot spoof them.
const ATTRIBUTE_HEADERS: [&str; 7] = [
    "x-user-id",
    "x-organization-id",
    "x-user-email",
    "x-auth-method",
    "x-access-level",
    "x-permission-source",
    "x-subscription-tier",
];

/// User-Agent substrings of programmatic clients eligible for the local
/// development bypass.
const PROGRAMMATIC_AGENTS: [&str; 8] = [
    "python-requests",
    "python-httpx",
    "curl",
    "axios",
    "node-fetch",
    "go-http-client",
    "okhttp",
    "reqwest",
];

/// Everything the pipeline needs, owned explicitly rather than captured in
/// closures at construction time.
#[derive(Clone)]
pub struct AdmissionContext {
    pub config: Arc<GatewayConfig>,
    pub identity: IdentityClient,
    pub registry: RegistryClient,
    pub limiter: TieredLimiter,
    pub resources: Arc<ResourceTable>,
    pub http: reqwest::Client,
}

/// Ensures every response carries an `X-Request-Id`, generating one when
/// the client did not send one.
pub async fn request_id(mut req: Request, next: Next) -> Response {
    let id = req
        .headers()
        .get("x-request-id")
        .cloned()
        .unwrap_or_else(|| {
            HeaderValue::from_str(&Uuid::new_v4().to_string())
                .expect("uuid is a valid header value")
        });
    req.headers_mut().insert("x-request-id", id.clone());

    let mut response = next.run(req).await;
    response.headers_mut().insert("x-request-id", id);
    response
}

/// The admission middleware.
pub async fn admit(
    State(ctx): State<AdmissionContext>,
    mut req: Request,
    next: Next,
) -> Response {
    let path = req.uri().path().to_string();

    // Step 1: public bypass.
    if ctx.config.is_public_path(&path) {
        return next.run(req).await;
    }

    // External callers must not be able to forge backend attributes.
    for header in ATTRIBUTE_HEADERS {
        req.headers_mut().remove(header);
    }

    // Step 2: internal-service auth.
    let mut principal = match internal_auth(&ctx, req.headers(), client_ip(&req)).await {
        Ok(principal) => principal.unwrap_or(Principal::Anonymous),
        Err(err) => return err.into_response(),
    };

    // Steps 3 and 4: external auth (JWT wins over API key).
    if principal.is_anonymous() {
        principal = match external_auth(&ctx, req.headers(), api_key(&req)).await {
            Ok(principal) => principal,
            Err(err) => return err.into_response(),
        };
    }

    // Step 5: rate limiting.
    let tier = match ctx.config.rate_limiting.mode {
        RateLimitingMode::Tiered => principal.tier(),
        _ => Tier::Free,
    };
    let key = rate_key(&ctx, &req, &principal);
    let decision = ctx.limiter.check(&key, tier);
    if !decision.allowed {
        let retry_after_secs = decision
            .retry_after
            .map(|d| d.as_secs_f64().ceil().max(1.0) as u64)
            .unwrap_or(1);
        tracing::info!(key = %key, tier = %tier, "Rate limit exceeded");
        let mut response = GatewayError::RateLimited {
            tier,
            retry_after_secs,
        }
        .into_response();
        apply_rate_headers(response.headers_mut(), &decision);
        return response;
    }

    // Step 6: resource authorization.
    let access = match ctx.resources.match_path(&path) {
        Some(descriptor) => match authorize(&ctx, &principal, &descriptor).await {
            Ok(access) => access,
            Err(err) => {
                let mut response = err.into_response();
                apply_rate_headers(response.headers_mut(), &decision);
                return response;
            }
        },
        None => None,
    };

    // Step 7: attribute propagation.
    propagate_attributes(req.headers_mut(), &principal, access.as_ref());

    metrics::counter!("gateway_admissions_total").increment(1);
    let mut response = next.run(req).await;
    apply_rate_headers(response.headers_mut(), &decision);
    response
}

/// Internal-service authentication: explicit headers validated against the
/// registry, or the loopback development bypass.
async fn internal_auth(
    ctx: &AdmissionContext,
    headers: &HeaderMap,
    ip: IpAddr,
) -> Result<Option<Principal>, GatewayError> {
    let name = headers
        .get("x-service-name")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());
    let secret = headers
        .get("x-service-secret")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());

    if let (Some(name), Some(secret)) = (name, secret) {
        let name = name.as_str();
        let secret = secret.as_str();
        let registered = ctx.registry.has_service(name).await.map_err(|err| {
            tracing::warn!(error = %err, "Registry unavailable during internal auth");
            GatewayError::UpstreamUnavailable("service registry unavailable".to_string())
        })?;
        if !registered {
            tracing::warn!(service = name, "Internal auth from unregistered service");
            return Err(GatewayError::Unauthenticated(
                "unknown internal service".to_string(),
            ));
        }

        let kv_key = format!("{}/service-secrets/{}", ctx.config.registry.kv_prefix, name);
        let expected = ctx.registry.kv_get(&kv_key).await.map_err(|err| {
            tracing::warn!(error = %err, "Registry unavailable during internal auth");
            GatewayError::UpstreamUnavailable("service registry unavailable".to_string())
        })?;

        return match expected {
            Some(expected) if constant_time_eq(expected.as_bytes(), secret.as_bytes()) => {
                Ok(Some(Principal::internal(name)))
            }
            Some(_) => {
                tracing::warn!(service = name, "Internal auth with wrong secret");
                Err(GatewayError::Unauthenticated(
                    "invalid service secret".to_string(),
                ))
            }
            // A registered service with no provisioned secret is denied;
            // registration alone is not identity.
            None => {
                tracing::warn!(service = name, "Internal auth but no secret provisioned");
                Err(GatewayError::Unauthenticated(
                    "no secret provisioned for service".to_string(),
                ))
            }
        };
    }

    if ctx.config.auth.allow_local_bypass
        && ip.is_loopback()
        && is_programmatic_agent(headers)
    {
        tracing::debug!("Admitted loopback programmatic client as local service");
        return Ok(Some(Principal::internal("local-dev")));
    }

    Ok(None)
}

/// JWT then API-key authentication, with the auth fail policy applied on
/// collaborator unavailability.
async fn external_auth(
    ctx: &AdmissionContext,
    headers: &HeaderMap,
    raw_key: Option<String>,
) -> Result<Principal, GatewayError> {
    if let Some(token) = bearer_token(headers).map(|t| t.to_string()) {
        return match ctx.identity.verify_token(&token).await {
            Ok(verdict) if verdict.valid => Ok(Principal::from_token(&verdict)),
            // An invalid JWT never falls through to API-key auth.
            Ok(_) => {
                tracing::info!("Rejected invalid bearer token");
                Err(GatewayError::Unauthenticated(
                    "invalid bearer token".to_string(),
                ))
            }
            Err(err) => auth_fail_policy(ctx, err, "bearer token"),
        };
    }

    if let Some(raw_key) = raw_key {
        return match ctx.identity.verify_api_key(&raw_key).await {
            Ok(verdict) if verdict.valid => Ok(Principal::from_api_key(&verdict)),
            Ok(_) => {
                tracing::info!("Rejected invalid API key");
                Err(GatewayError::Unauthenticated("invalid API key".to_string()))
            }
            Err(err) => auth_fail_policy(ctx, err, "API key"),
        };
    }

    Ok(Principal::Anonymous)
}

fn auth_fail_policy(
    ctx: &AdmissionContext,
    err: IdentityError,
    credential: &str,
) -> Result<Principal, GatewayError> {
    if !err.is_unavailable() {
        tracing::info!(error = %err, "Identity service rejected {credential} verification");
        return Err(GatewayError::Unauthenticated(format!(
            "could not verify {credential}"
        )));
    }
    metrics::counter!("gateway_upstream_unavailable_total", "collaborator" => "identity")
        .increment(1);
    match ctx.config.auth.fail_policy {
        FailPolicy::FailClosed => {
            tracing::warn!(error = %err, "Identity service unavailable; failing closed");
            Err(GatewayError::UpstreamUnavailable(
                "identity service unavailable".to_string(),
            ))
        }
        FailPolicy::FailOpen => {
            tracing::warn!(error = %err, "Identity service unavailable; failing open as anonymous");
            Ok(Principal::Anonymous)
        }
    }
}

/// Resource authorization with its own fail policy.
async fn authorize(
    ctx: &AdmissionContext,
    principal: &Principal,
    descriptor: &ResourceDescriptor,
) -> Result<Option<AccessDecision>, GatewayError> {
    let subject = match principal {
        // Internal services are trusted past the resource check.
        Principal::InternalService { .. } => return Ok(None),
        Principal::Anonymous => {
            return Err(GatewayError::Unauthenticated(
                "authentication required for this resource".to_string(),
            ))
        }
        Principal::User { user_id, .. } => user_id.as_str(),
        Principal::ApiKey { key_id, .. } => key_id.as_str(),
    };

    match ctx
        .identity
        .check_access(
            subject,
            descriptor.resource_type,
            descriptor.resource_name,
            descriptor.required_level,
        )
        .await
    {
        Ok(decision) if decision.has_access => Ok(Some(decision)),
        Ok(decision) => {
            let reason = decision
                .reason
                .unwrap_or_else(|| "access denied".to_string());
            tracing::info!(
                subject,
                resource = descriptor.resource_name,
                reason = %reason,
                "Access denied"
            );
            Err(GatewayError::Forbidden { reason })
        }
        Err(err) if err.is_unavailable() => {
            metrics::counter!("gateway_upstream_unavailable_total", "collaborator" => "authorization")
                .increment(1);
            match ctx.config.authorization.fail_policy {
                FailPolicy::FailOpen => {
                    tracing::warn!(error = %err, "Authorization service unavailable; failing open");
                    Ok(None)
                }
                FailPolicy::FailClosed => {
                    tracing::warn!(error = %err, "Authorization service unavailable; failing closed");
                    Err(GatewayError::UpstreamUnavailable(
                        "authorization service unavailable".to_string(),
                    ))
                }
            }
        }
        Err(err) => {
            tracing::info!(error = %err, "Authorization request rejected");
            Err(GatewayError::Forbidden {
                reason: "authorization request rejected".to_string(),
            })
        }
    }
}

/// Bucket key precedence: validated user id, then API-key prefix, then
/// client IP. The `global` mode collapses everything onto one bucket.
fn rate_key(ctx: &AdmissionContext, req: &Request, principal: &Principal) -> RateKey {
    if ctx.config.rate_limiting.mode == RateLimitingMode::Global {
        return RateKey::Global;
    }
    match principal {
        Principal::User { user_id, .. } if !user_id.is_empty() => RateKey::user(user_id.clone()),
        _ => match api_key(req) {
            Some(raw) => RateKey::api_key(&raw),
            None => RateKey::ip(client_ip(req)),
        },
    }
}

fn apply_rate_headers(headers: &mut HeaderMap, decision: &RateDecision) {
    let set = |headers: &mut HeaderMap, name: &'static str, value: String| {
        if let Ok(value) = HeaderValue::from_str(&value) {
            headers.insert(name, value);
        }
    };
    set(headers, "x-ratelimit-limit", decision.limit.to_string());
    set(
        headers,
        "x-ratelimit-remaining",
        decision.remaining.to_string(),
    );
    set(
        headers,
        "x-ratelimit-reset",
        (decision.reset_after.as_secs_f64().ceil() as u64).to_string(),
    );
}

fn propagate_attributes(
    headers: &mut HeaderMap,
    principal: &Principal,
    access: Option<&AccessDecision>,
) {
    let set = |headers: &mut HeaderMap, name: &'static str, value: &str| {
        if let Ok(value) = HeaderValue::from_str(value) {
            headers.insert(name, value);
        }
    };

    match principal {
        Principal::User {
            user_id,
            email,
            tier,
        } => {
            set(headers, "x-user-id", user_id);
            if let Some(email) = email {
                set(headers, "x-user-email", email);
            }
            set(headers, "x-subscription-tier", tier.as_str());
        }
        Principal::ApiKey {
            key_id,
            organization_id,
            tier,
            ..
        } => {
            set(headers, "x-user-id", key_id);
            if let Some(org) = organization_id {
                set(headers, "x-organization-id", org);
            }
            set(headers, "x-subscription-tier", tier.as_str());
        }
        Principal::InternalService { name } => {
            set(headers, "x-user-id", name);
        }
        Principal::Anonymous => {}
    }

    if let Some(method) = principal.auth_method() {
        set(headers, "x-auth-method", method.as_str());
    }

    if let Some(access) = access {
        if let Some(level) = &access.user_access_level {
            set(headers, "x-access-level", level);
        }
        if let Some(source) = &access.permission_source {
            set(headers, "x-permission-source", source);
        }
        if let Some(tier) = &access.subscription_tier {
            set(headers, "x-subscription-tier", tier);
        }
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// API-key extraction. Precedence: header, query parameter, cookie.
fn api_key(req: &Request) -> Option<String> {
    if let Some(key) = req
        .headers()
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .filter(|k| !k.is_empty())
    {
        return Some(key.to_string());
    }

    if let Some(query) = req.uri().query() {
        for pair in query.split('&') {
            if let Some(value) = pair.strip_prefix("api_key=") {
                if !value.is_empty() {
                    return Some(value.to_string());
                }
            }
        }
    }

    if let Some(cookies) = req.headers().get("cookie").and_then(|v| v.to_str().ok()) {
        for cookie in cookies.split(';') {
            if let Some(value) = cookie.trim().strip_prefix("api_key=") {
                if !value.is_empty() {
                    return Some(value.to_string());
                }
            }
        }
    }

    None
}

fn client_ip(req: &Request) -> IpAddr {
    if let Some(forwarded) = req
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
    {
        if let Some(first) = forwarded.split(',').next() {
            if let Ok(ip) = first.trim().parse() {
                return ip;
            }
        }
    }
    if let Some(real) = req.headers().get("x-real-ip").and_then(|v| v.to_str().ok()) {
        if let Ok(ip) = real.trim().parse() {
            return ip;
        }
    }
    if let Some(ConnectInfo(addr)) = req.extensions().get::<ConnectInfo<SocketAddr>>() {
        return addr.ip();
    }
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn is_programmatic_agent(headers: &HeaderMap) -> bool {
    headers
        .get("user-agent")
        .and_then(|v| v.to_str().ok())
        .map(|ua| {
            let ua = ua.to_ascii_lowercase();
            PROGRAMMATIC_AGENTS.iter().any(|known| ua.contains(known))
        })
        .unwrap_or(false)
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b) {
        diff |= x ^ y;
    }
    diff == 0
}
