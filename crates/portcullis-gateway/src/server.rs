//! Wiring and serving.

use crate::admission::{self, AdmissionContext, ResourceTable};
use crate::config::{GatewayConfig, RateLimitingConfig, RateLimitingMode};
use crate::identity::{IdentityClient, RevocationList};
use crate::reconciler::{AdminClient, Reconciler};
use crate::registry::{resolve_collaborator, RegistryClient};
use crate::proxy;
use axum::extract::State;
use axum::middleware;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use portcullis_ratelimit::{Tier, TieredLimiter};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

#[derive(Debug, Error)]
pub enum ServeError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("server error: {0}")]
    Io(#[from] std::io::Error),
}

/// A fully wired gateway, not yet serving.
pub struct Gateway {
    pub ctx: AdmissionContext,
    pub revocations: RevocationList,
}

/// Builds all shared components from configuration. Collaborator
/// endpoints are resolved (discovery or fallback) once, here.
pub async fn build(config: GatewayConfig) -> Gateway {
    let config = Arc::new(config);
    let http = reqwest::Client::builder()
        .pool_max_idle_per_host(32)
        .pool_idle_timeout(Duration::from_secs(30))
        .build()
        .expect("HTTP client construction cannot fail with static options");

    let registry = RegistryClient::new(
        http.clone(),
        &config.registry.url,
        Duration::from_secs(config.registry.catalog_cache_ttl_secs),
    );

    let auth_endpoint = resolve_collaborator(
        &registry,
        config.auth.use_consul,
        &config.auth.consul_service,
        &config.auth.service_url,
    )
    .await;
    let authz_endpoint = resolve_collaborator(
        &registry,
        config.authorization.use_consul,
        &config.authorization.consul_service,
        &config.authorization.service_url,
    )
    .await;

    let revocations = RevocationList::new();
    let identity = IdentityClient::builder()
        .http(http.clone())
        .auth_base(auth_endpoint.base_url())
        .authz_base(authz_endpoint.base_url())
        .auth_timeout(config.auth.timeout())
        .authz_timeout(config.authorization.timeout())
        .auth_cache(
            config
                .auth
                .cache
                .enabled
                .then(|| (config.auth.cache.capacity, config.auth.cache.ttl())),
        )
        .authz_cache(config.authorization.cache.enabled.then(|| {
            (
                config.authorization.cache.capacity,
                config.authorization.effective_cache_ttl(),
            )
        }))
        .auth_breaker(config.auth.circuit_breaker.enabled.then(|| {
            (
                config.auth.circuit_breaker.threshold,
                config.auth.circuit_breaker.timeout(),
            )
        }))
        .authz_breaker(config.authorization.circuit_breaker.enabled.then(|| {
            (
                config.authorization.circuit_breaker.threshold,
                config.authorization.circuit_breaker.timeout(),
            )
        }))
        .revocations(revocations.clone())
        .build();

    let limiter = build_limiter(&config.rate_limiting);

    Gateway {
        ctx: AdmissionContext {
            config,
            identity,
            registry,
            limiter,
            resources: Arc::new(ResourceTable::standard()),
            http,
        },
        revocations,
    }
}

/// Tier budgets from config. In `global` and `per_user` modes every tier
/// collapses onto the flat default rate.
fn build_limiter(config: &RateLimitingConfig) -> TieredLimiter {
    let mut builder = TieredLimiter::builder();
    match config.mode {
        RateLimitingMode::Tiered => {
            builder = builder
                .tier_rps(Tier::Free, config.free_rps)
                .tier_rps(Tier::Pro, config.pro_rps)
                .tier_rps(Tier::Enterprise, config.enterprise_rps)
                .burst_multiplier(Tier::Free, config.burst_multiplier)
                .burst_multiplier(Tier::Pro, config.burst_multiplier * 1.5)
                .burst_multiplier(Tier::Enterprise, config.burst_multiplier * 2.5);
        }
        RateLimitingMode::Global | RateLimitingMode::PerUser => {
            for tier in [Tier::Free, Tier::Pro, Tier::Enterprise] {
                builder = builder
                    .tier_rps(tier, config.default_rps)
                    .burst_multiplier(tier, config.burst_multiplier);
            }
        }
    }
    builder.build()
}

/// The gateway's router: public probes plus the admitted catch-all proxy.
pub fn build_router(ctx: AdmissionContext) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready))
        .fallback(proxy::forward)
        .layer(middleware::from_fn_with_state(ctx.clone(), admission::admit))
        .layer(middleware::from_fn(admission::request_id))
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

async fn ready(State(ctx): State<AdmissionContext>) -> impl IntoResponse {
    let breaker_state = |breaker: Option<&portcullis_breaker::CircuitBreaker<_>>| {
        breaker.map(|b| b.state().as_str()).unwrap_or("disabled")
    };
    Json(json!({
        "status": "ready",
        "auth_breaker": breaker_state(ctx.identity.auth_breaker()),
        "authorization_breaker": breaker_state(ctx.identity.authz_breaker()),
    }))
}

/// Builds the gateway, spawns the background loops, and serves until
/// interrupted.
pub async fn run(config: GatewayConfig) -> Result<(), ServeError> {
    let gateway = build(config).await;
    let config = Arc::clone(&gateway.ctx.config);
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    gateway
        .ctx
        .limiter
        .spawn_sweeper(Duration::from_secs(config.rate_limiting.sweep_interval_secs));
    gateway.revocations.spawn_refresher(
        gateway.ctx.registry.clone(),
        format!("{}/revoked-tokens", config.registry.kv_prefix),
        Duration::from_secs(config.registry.revocation_refresh_secs),
    );

    if config.reconciler.enabled {
        let admin = AdminClient::new(
            gateway.ctx.http.clone(),
            &config.reconciler.edge_admin_url,
            &config.reconciler.edge_admin_key,
        );
        let reconciler = Reconciler::new(
            gateway.ctx.registry.clone(),
            admin,
            config.reconciler.clone(),
        );
        tokio::spawn(reconciler.run(shutdown_rx));
    }

    let app = build_router(gateway.ctx);
    let listener = TcpListener::bind(config.server.bind)
        .await
        .map_err(|source| ServeError::Bind {
            addr: config.server.bind,
            source,
        })?;
    tracing::info!(addr = %config.server.bind, "Gateway listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(shutdown_tx))
    .await?;
    Ok(())
}

async fn shutdown_signal(shutdown_tx: tokio::sync::watch::Sender<bool>) {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "Failed to listen for shutdown signal");
        return;
    }
    tracing::info!("Shutdown signal received; draining");
    let _ = shutdown_tx.send(true);
}
