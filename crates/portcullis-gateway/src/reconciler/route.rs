//! Route specs for the edge proxy.

use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

/// Label marking a route as owned by this reconciler. Routes without it
/// are hand-authored and must never be touched.
pub const MANAGED_BY: &str = "portcullis-reconciler";

/// Stable route id for a logical service.
pub fn route_id(service: &str) -> String {
    format!("{}_route", service)
}

/// Routing metadata a service must publish in the catalog to be exposed.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteMeta {
    /// URI under which the edge proxy exposes the service.
    pub api_path: String,
    pub auth_required: bool,
    /// Requests per minute enforced at the edge.
    pub rate_limit: u32,
}

impl RouteMeta {
    /// Reads the metadata of a catalog instance. `None` when the service
    /// does not publish a path, which means it is skipped, not failed.
    pub fn from_catalog(meta: &HashMap<String, String>) -> Option<Self> {
        let api_path = meta
            .get("api_path")
            .or_else(|| meta.get("base_path"))?
            .clone();
        Some(Self {
            api_path,
            auth_required: meta
                .get("auth_required")
                .map(|v| v == "true")
                .unwrap_or(false),
            rate_limit: meta
                .get("rate_limit")
                .and_then(|v| v.parse().ok())
                .unwrap_or(100),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UpstreamTimeout {
    pub connect: u64,
    pub send: u64,
    pub read: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KeepalivePool {
    pub size: u32,
    pub idle_timeout: u64,
    pub requests: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Upstream {
    #[serde(rename = "type")]
    pub kind: String,
    /// `host:port` -> weight.
    pub nodes: BTreeMap<String, u32>,
    pub timeout: UpstreamTimeout,
    pub keepalive_pool: KeepalivePool,
    pub pass_host: String,
}

/// The admin-API body of one managed route.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RouteSpec {
    pub name: String,
    pub desc: String,
    pub uris: Vec<String>,
    pub upstream: Upstream,
    pub plugins: serde_json::Map<String, serde_json::Value>,
    pub enable_websocket: bool,
    pub status: u8,
    pub labels: BTreeMap<String, String>,
}

/// Composes the desired route for a service.
pub fn build_route(
    service: &str,
    meta: &RouteMeta,
    nodes: BTreeMap<String, u32>,
    rewrite: bool,
) -> RouteSpec {
    let mut plugins = serde_json::Map::new();
    plugins.insert(
        "cors".to_string(),
        serde_json::json!({
            "allow_origins": "*",
            "allow_methods": "*",
            "allow_headers": "Authorization,Content-Type,X-API-Key,X-Request-Id",
        }),
    );
    plugins.insert(
        "limit-count".to_string(),
        serde_json::json!({
            "count": meta.rate_limit,
            "time_window": 60,
            "rejected_code": 429,
            "key_type": "var",
            "key": "remote_addr",
            "policy": "local",
        }),
    );
    plugins.insert(
        "request-id".to_string(),
        serde_json::json!({ "include_in_response": true }),
    );
    plugins.insert("prometheus".to_string(), serde_json::json!({}));

    if meta.auth_required {
        plugins.insert("jwt-auth".to_string(), serde_json::json!({}));
    }
    if rewrite {
        // The service answers at /, but is mounted under its api_path.
        plugins.insert(
            "proxy-rewrite".to_string(),
            serde_json::json!({
                "regex_uri": [format!("^{}(/.*)$", meta.api_path), "$1"],
            }),
        );
    }

    let mut labels = BTreeMap::new();
    labels.insert("managed-by".to_string(), MANAGED_BY.to_string());
    labels.insert("service-name".to_string(), service.to_string());

    RouteSpec {
        name: route_id(service),
        desc: format!("Route for {} (reconciled from the service catalog)", service),
        uris: vec![meta.api_path.clone(), format!("{}/*", meta.api_path)],
        upstream: Upstream {
            kind: "roundrobin".to_string(),
            nodes,
            timeout: UpstreamTimeout {
                connect: 6,
                send: 6,
                read: 10,
            },
            keepalive_pool: KeepalivePool {
                size: 320,
                idle_timeout: 60,
                requests: 1000,
            },
            pass_host: "pass".to_string(),
        },
        plugins,
        enable_websocket: true,
        status: 1,
        labels,
    }
}
