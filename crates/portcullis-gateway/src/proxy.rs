//! Forwarding admitted requests to catalog-discovered backends.
//!
//! The owning backend is the catalog service whose `api_path` (or
//! `base_path`) metadata is the longest prefix of the request path. The
//! attribute headers set by the admission pipeline ride along unchanged.

use crate::admission::AdmissionContext;
use crate::error::GatewayError;
use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};

/// Largest request body the gateway will buffer for forwarding.
const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

pub async fn forward(State(ctx): State<AdmissionContext>, req: Request) -> Response {
    match try_forward(&ctx, req).await {
        Ok(response) => response,
        Err(err) => err.into_response(),
    }
}

async fn try_forward(ctx: &AdmissionContext, req: Request) -> Result<Response, GatewayError> {
    let path = req.uri().path().to_string();
    let (service, base_path) = find_backend(ctx, &path).await?;

    let (host, port) = ctx.registry.resolve_healthy(&service).await.map_err(|err| {
        tracing::warn!(service = %service, error = %err, "No healthy backend instance");
        GatewayError::BadGateway(format!("no healthy instance of {}", service))
    })?;

    let target_path = if ctx
        .config
        .reconciler
        .path_rewrite_services
        .contains(&service)
    {
        rewrite_path(&path, &base_path)
    } else {
        path.clone()
    };
    let query = req
        .uri()
        .query()
        .map(|q| format!("?{}", q))
        .unwrap_or_default();
    let url = format!("http://{}:{}{}{}", host, port, target_path, query);

    let (parts, body) = req.into_parts();
    let bytes = axum::body::to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|_| GatewayError::BadRequest("failed to read request body".to_string()))?;

    let mut headers = parts.headers;
    headers.remove(header::HOST);
    headers.remove(header::CONTENT_LENGTH);

    tracing::debug!(service = %service, url = %url, "Forwarding request");
    let upstream = ctx
        .http
        .request(parts.method, &url)
        .headers(headers)
        .body(bytes)
        .send()
        .await
        .map_err(|err| {
            tracing::warn!(service = %service, error = %err, "Backend request failed");
            GatewayError::BadGateway(format!("backend {} unreachable", service))
        })?;

    let status = upstream.status();
    let mut headers = upstream.headers().clone();
    headers.remove(header::TRANSFER_ENCODING);
    headers.remove(header::CONNECTION);
    let body = upstream
        .bytes()
        .await
        .map_err(|_| GatewayError::BadGateway(format!("backend {} sent a broken body", service)))?;

    let mut response = Response::builder()
        .status(status)
        .body(Body::from(body))
        .expect("status and body are valid");
    *response.headers_mut() = headers;
    Ok(response)
}

/// The catalog service owning a path: longest `api_path`/`base_path`
/// prefix wins.
async fn find_backend(
    ctx: &AdmissionContext,
    path: &str,
) -> Result<(String, String), GatewayError> {
    let services = ctx.registry.list_services().await.map_err(|err| {
        tracing::warn!(error = %err, "Registry unavailable while routing");
        GatewayError::UpstreamUnavailable("service registry unavailable".to_string())
    })?;

    let mut best: Option<(String, String)> = None;
    for service in services {
        if service == "consul" {
            continue;
        }
        let instances = match ctx.registry.describe_service(&service).await {
            Ok(instances) => instances,
            Err(err) => {
                tracing::debug!(service = %service, error = %err, "Skipping undescribable service");
                continue;
            }
        };
        let Some(meta) = instances.first().map(|i| i.meta.clone()) else {
            continue;
        };
        let Some(base) = meta.get("api_path").or_else(|| meta.get("base_path")) else {
            continue;
        };
        let owns = path == base || path.starts_with(&format!("{}/", base));
        if owns && best.as_ref().map_or(true, |(_, b)| base.len() > b.len()) {
            best = Some((service, base.clone()));
        }
    }
    best.ok_or(GatewayError::NotFound)
}

/// Strips the mount prefix for services that expose their routes at `/`.
fn rewrite_path(path: &str, base: &str) -> String {
    match path.strip_prefix(base) {
        Some("") | None => "/".to_string(),
        Some(rest) => rest.to_string(),
    }
}
