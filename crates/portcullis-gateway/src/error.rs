//! The HTTP-facing error taxonomy.
//!
//! Errors never cross the admission boundary verbatim: collaborator and
//! pipeline failures are classified into one of these kinds and emitted as
//! a consistent status plus `{error, message}` JSON body. Raw tokens,
//! secrets, and API keys must never reach a message here.

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use portcullis_ratelimit::Tier;
use serde_json::json;
use thiserror::Error;

/// A classified admission failure.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Malformed credentials or request shape.
    #[error("{0}")]
    BadRequest(String),

    /// Credentials missing or invalid.
    #[error("{0}")]
    Unauthenticated(String),

    /// Authenticated, but the access check denied.
    #[error("access denied: {reason}")]
    Forbidden { reason: String },

    /// The caller's bucket is exhausted.
    #[error("rate limit exceeded for tier {tier}")]
    RateLimited { tier: Tier, retry_after_secs: u64 },

    /// A collaborator is unavailable and the fail policy is closed.
    #[error("{0}")]
    UpstreamUnavailable(String),

    /// No backend service owns the requested path.
    #[error("no backend service for this path")]
    NotFound,

    /// The resolved backend could not be reached.
    #[error("{0}")]
    BadGateway(String),
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::BadRequest(_) => StatusCode::BAD_REQUEST,
            GatewayError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            GatewayError::Forbidden { .. } => StatusCode::FORBIDDEN,
            GatewayError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            GatewayError::UpstreamUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::NotFound => StatusCode::NOT_FOUND,
            GatewayError::BadGateway(_) => StatusCode::BAD_GATEWAY,
        }
    }

    /// Stable machine-readable kind for the JSON body.
    pub fn kind(&self) -> &'static str {
        match self {
            GatewayError::BadRequest(_) => "bad_request",
            GatewayError::Unauthenticated(_) => "unauthenticated",
            GatewayError::Forbidden { .. } => "forbidden",
            GatewayError::RateLimited { .. } => "rate_limit_exceeded",
            GatewayError::UpstreamUnavailable(_) => "upstream_unavailable",
            GatewayError::NotFound => "not_found",
            GatewayError::BadGateway(_) => "bad_gateway",
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        metrics::counter!("gateway_rejections_total", "kind" => self.kind()).increment(1);

        let body = match &self {
            GatewayError::RateLimited {
                tier,
                retry_after_secs,
            } => json!({
                "error": self.kind(),
                "current_tier": tier.as_str(),
                "retry_after": retry_after_secs,
            }),
            _ => json!({
                "error": self.kind(),
                "message": self.to_string(),
            }),
        };

        let mut response = (self.status(), Json(body)).into_response();
        if let GatewayError::RateLimited {
            retry_after_secs, ..
        } = &self
        {
            if let Ok(value) = HeaderValue::from_str(&retry_after_secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}
