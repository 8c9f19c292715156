//! The registry-to-edge-proxy route reconciler.
//!
//! A control loop that makes the edge proxy's route table a deterministic
//! function of the service catalog. Each tick snapshots the catalog,
//! composes the desired route set, upserts it, and garbage-collects
//! managed routes whose service left the catalog. Partial failure is
//! reported but never fatal: one sick service must not block the rest,
//! and the next tick retries.

mod admin;
mod route;

pub use admin::{AdminClient, AdminError, ExistingRoute};
pub use route::{build_route, route_id, RouteMeta, RouteSpec, MANAGED_BY};

use crate::config::ReconcilerConfig;
use crate::registry::{RegistryClient, RegistryError, ServiceInstance};
use std::collections::{BTreeMap, HashSet};
use thiserror::Error;

/// Per-tick outcome counts, exported as metrics so stuck services surface
/// without log-trawling.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickStats {
    pub synced: usize,
    pub skipped: usize,
    pub failed: usize,
    pub deleted: usize,
}

#[derive(Debug, Error)]
enum ReconcileError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Admin(#[from] AdminError),

    #[error("no resolvable upstream nodes")]
    NoNodes,
}

pub struct Reconciler {
    registry: RegistryClient,
    admin: AdminClient,
    config: ReconcilerConfig,
}

impl Reconciler {
    pub fn new(registry: RegistryClient, admin: AdminClient, config: ReconcilerConfig) -> Self {
        Self {
            registry,
            admin,
            config,
        }
    }

    /// One reconciliation pass.
    pub async fn tick(&self) -> TickStats {
        let mut stats = TickStats::default();

        let services = match self.registry.list_services().await {
            Ok(services) => services
                .into_iter()
                .filter(|s| s != "consul")
                .collect::<Vec<_>>(),
            Err(err) => {
                tracing::warn!(error = %err, "Reconciler could not snapshot the catalog");
                stats.failed += 1;
                return stats;
            }
        };

        for service in &services {
            match self.sync_service(service).await {
                Ok(true) => stats.synced += 1,
                Ok(false) => {
                    tracing::debug!(service = %service, "Skipped service without routing metadata");
                    stats.skipped += 1;
                }
                Err(err) => {
                    tracing::warn!(service = %service, error = %err, "Failed to sync route");
                    stats.failed += 1;
                }
            }
        }

        stats.deleted = self.collect_garbage(&services, &mut stats.failed).await;

        metrics::gauge!("reconciler_services_synced").set(stats.synced as f64);
        metrics::gauge!("reconciler_services_skipped").set(stats.skipped as f64);
        metrics::gauge!("reconciler_services_failed").set(stats.failed as f64);
        metrics::counter!("reconciler_routes_deleted_total").increment(stats.deleted as u64);

        tracing::info!(
            synced = stats.synced,
            skipped = stats.skipped,
            failed = stats.failed,
            deleted = stats.deleted,
            "Reconciliation tick complete"
        );
        stats
    }

    /// Upserts one service's route. `Ok(false)` means the service does not
    /// publish routing metadata and was skipped.
    async fn sync_service(&self, service: &str) -> Result<bool, ReconcileError> {
        let instances = self.registry.describe_service(service).await?;
        let Some(meta) = instances.first().and_then(|i| RouteMeta::from_catalog(&i.meta)) else {
            return Ok(false);
        };

        let nodes = self.resolve_nodes(&instances).await;
        if nodes.is_empty() {
            return Err(ReconcileError::NoNodes);
        }

        let rewrite = self
            .config
            .path_rewrite_services
            .iter()
            .any(|s| s == service);
        let spec = build_route(service, &meta, nodes, rewrite);
        self.admin.put_route(&route_id(service), &spec).await?;
        Ok(true)
    }

    /// Builds the upstream node table. Addresses that will not resolve to a
    /// usable endpoint are logged and omitted.
    async fn resolve_nodes(&self, instances: &[ServiceInstance]) -> BTreeMap<String, u32> {
        let mut nodes = BTreeMap::new();
        for instance in instances {
            let endpoint = format!("{}:{}", instance.address, instance.port);
            if instance.address.parse::<std::net::IpAddr>().is_ok() {
                nodes.insert(endpoint, 1);
            } else if self.config.pass_dns_names {
                // The substrate resolves names itself.
                nodes.insert(endpoint, 1);
            } else {
                match tokio::net::lookup_host(endpoint.clone()).await {
                    Ok(mut addrs) => match addrs.next() {
                        Some(addr) => {
                            nodes.insert(addr.to_string(), 1);
                        }
                        None => {
                            tracing::warn!(endpoint = %endpoint, "Address resolved to nothing; omitting node");
                        }
                    },
                    Err(err) => {
                        tracing::warn!(endpoint = %endpoint, error = %err, "Failed to resolve node address; omitting");
                    }
                }
            }
        }
        nodes
    }

    /// Deletes managed routes whose service left the catalog. Routes
    /// without the managed-by label are never touched.
    async fn collect_garbage(&self, services: &[String], failed: &mut usize) -> usize {
        let catalog: HashSet<&str> = services.iter().map(String::as_str).collect();
        let routes = match self.admin.list_routes().await {
            Ok(routes) => routes,
            Err(err) => {
                tracing::warn!(error = %err, "Could not list edge routes for garbage collection");
                *failed += 1;
                return 0;
            }
        };

        let mut deleted = 0;
        for route in routes.iter().filter(|r| r.is_managed()) {
            let Some(service) = route.service_name() else {
                continue;
            };
            if catalog.contains(service) {
                continue;
            }
            match self.admin.delete_route(&route.id).await {
                Ok(()) => {
                    tracing::info!(route = %route.id, service, "Deleted orphaned managed route");
                    deleted += 1;
                }
                Err(err) => {
                    tracing::warn!(route = %route.id, error = %err, "Failed to delete orphaned route");
                    *failed += 1;
                }
            }
        }
        deleted
    }

    /// Runs the control loop until shutdown is signalled.
    pub async fn run(self, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.interval());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tracing::info!(
            interval_secs = self.config.interval_secs,
            "Route reconciler started"
        );
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        tracing::info!("Route reconciler stopping");
                        return;
                    }
                }
            }
        }
    }
}
