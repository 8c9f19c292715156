//! Service registry client.
//!
//! Consumes the catalog, health, and KV interfaces of the registry. The
//! request path only ever sees short-lived snapshots: the catalog and
//! per-service instance lists are cached for a couple of seconds so a
//! burst of admissions does not turn into a burst of registry reads.

use base64::Engine;
use portcullis_cache::Cache;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("registry request failed: {0}")]
    Transport(String),

    #[error("registry returned status {0}")]
    Status(u16),

    #[error("failed to decode registry response: {0}")]
    Decode(String),

    #[error("no healthy instance of service '{0}'")]
    NoHealthyInstance(String),
}

impl RegistryError {
    fn from_reqwest(err: reqwest::Error) -> Self {
        RegistryError::Transport(err.to_string())
    }
}

/// Aggregated health of one service instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthSummary {
    Passing,
    Warning,
    Critical,
}

/// Snapshot of one instance from the health endpoint.
#[derive(Debug, Clone)]
pub struct ServiceInstance {
    pub service: String,
    pub address: String,
    pub port: u16,
    pub tags: Vec<String>,
    pub meta: HashMap<String, String>,
    pub health: HealthSummary,
}

impl ServiceInstance {
    pub fn is_passing(&self) -> bool {
        self.health == HealthSummary::Passing
    }
}

// Wire shapes of the registry's health endpoint.

#[derive(Debug, Deserialize)]
struct HealthEntry {
    #[serde(rename = "Service")]
    service: HealthEntryService,
    #[serde(rename = "Checks", default)]
    checks: Vec<HealthCheck>,
}

#[derive(Debug, Deserialize)]
struct HealthEntryService {
    #[serde(rename = "Service")]
    name: String,
    #[serde(rename = "Address", default)]
    address: String,
    #[serde(rename = "Port")]
    port: u16,
    #[serde(rename = "Tags", default)]
    tags: Vec<String>,
    #[serde(rename = "Meta", default)]
    meta: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct HealthCheck {
    #[serde(rename = "Status")]
    status: String,
}

#[derive(Debug, Deserialize)]
struct KvEntry {
    #[serde(rename = "Value")]
    value: Option<String>,
}

impl HealthEntry {
    fn into_instance(self) -> ServiceInstance {
        // The instance is only as healthy as its worst check.
        let mut health = HealthSummary::Passing;
        for check in &self.checks {
            match check.status.as_str() {
                "critical" => {
                    health = HealthSummary::Critical;
                    break;
                }
                "warning" => health = HealthSummary::Warning,
                _ => {}
            }
        }
        ServiceInstance {
            service: self.service.name,
            address: self.service.address,
            port: self.service.port,
            tags: self.service.tags,
            meta: self.service.meta,
            health,
        }
    }
}

/// An endpoint decision for a collaborator, made once at boot.
#[derive(Debug, Clone)]
pub enum ResolvedEndpoint {
    Discovered { host: String, port: u16 },
    Fallback { url: String },
}

impl ResolvedEndpoint {
    pub fn base_url(&self) -> String {
        match self {
            ResolvedEndpoint::Discovered { host, port } => format!("http://{}:{}", host, port),
            ResolvedEndpoint::Fallback { url } => url.trim_end_matches('/').to_string(),
        }
    }
}

/// Client for the registry's catalog, health, and KV APIs.
#[derive(Clone)]
pub struct RegistryClient {
    http: reqwest::Client,
    base_url: String,
    catalog_cache: Cache<String, Vec<String>>,
    instance_cache: Cache<String, Vec<ServiceInstance>>,
}

impl RegistryClient {
    pub fn new(http: reqwest::Client, base_url: &str, snapshot_ttl: Duration) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            catalog_cache: Cache::builder()
                .capacity(4)
                .default_ttl(snapshot_ttl)
                .name("registry-catalog")
                .build(),
            instance_cache: Cache::builder()
                .capacity(256)
                .default_ttl(snapshot_ttl)
                .name("registry-instances")
                .build(),
        }
    }

    /// All logical service names in the catalog.
    pub async fn list_services(&self) -> Result<Vec<String>, RegistryError> {
        let key = "catalog".to_string();
        if let Some(names) = self.catalog_cache.get(&key) {
            return Ok(names);
        }

        let url = format!("{}/v1/catalog/services", self.base_url);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(RegistryError::from_reqwest)?;
        if !response.status().is_success() {
            return Err(RegistryError::Status(response.status().as_u16()));
        }
        let services: HashMap<String, Vec<String>> = response
            .json()
            .await
            .map_err(|e| RegistryError::Decode(e.to_string()))?;

        let mut names: Vec<String> = services.into_keys().collect();
        names.sort();
        self.catalog_cache.insert(key, names.clone());
        Ok(names)
    }

    /// Whether a logical service is registered at all.
    pub async fn has_service(&self, name: &str) -> Result<bool, RegistryError> {
        Ok(self.list_services().await?.iter().any(|s| s == name))
    }

    /// All instances of a service, with tags, metadata, and health summary.
    pub async fn describe_service(
        &self,
        name: &str,
    ) -> Result<Vec<ServiceInstance>, RegistryError> {
        if let Some(instances) = self.instance_cache.get(&name.to_string()) {
            return Ok(instances);
        }

        let url = format!("{}/v1/health/service/{}", self.base_url, name);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(RegistryError::from_reqwest)?;
        if !response.status().is_success() {
            return Err(RegistryError::Status(response.status().as_u16()));
        }
        let entries: Vec<HealthEntry> = response
            .json()
            .await
            .map_err(|e| RegistryError::Decode(e.to_string()))?;

        let instances: Vec<ServiceInstance> =
            entries.into_iter().map(HealthEntry::into_instance).collect();
        self.instance_cache
            .insert(name.to_string(), instances.clone());
        Ok(instances)
    }

    /// One healthy `(host, port)` for a service: the first passing instance.
    pub async fn resolve_healthy(&self, name: &str) -> Result<(String, u16), RegistryError> {
        let instances = self.describe_service(name).await?;
        instances
            .into_iter()
            .find(ServiceInstance::is_passing)
            .map(|i| (i.address, i.port))
            .ok_or_else(|| RegistryError::NoHealthyInstance(name.to_string()))
    }

    /// Reads a KV value. `Ok(None)` when the key does not exist.
    pub async fn kv_get(&self, key: &str) -> Result<Option<String>, RegistryError> {
        let url = format!("{}/v1/kv/{}", self.base_url, key);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(RegistryError::from_reqwest)?;
        if response.status().as_u16() == 404 {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(RegistryError::Status(response.status().as_u16()));
        }
        let entries: Vec<KvEntry> = response
            .json()
            .await
            .map_err(|e| RegistryError::Decode(e.to_string()))?;

        match entries.into_iter().next().and_then(|e| e.value) {
            None => Ok(None),
            Some(encoded) => {
                let bytes = base64::engine::general_purpose::STANDARD
                    .decode(encoded)
                    .map_err(|e| RegistryError::Decode(e.to_string()))?;
                String::from_utf8(bytes)
                    .map(Some)
                    .map_err(|e| RegistryError::Decode(e.to_string()))
            }
        }
    }
}

/// Decides, once at boot, whether a collaborator is reached through
/// discovery or through its configured fallback URL. The decision is
/// logged here so the request path does not re-log it per call.
pub async fn resolve_collaborator(
    registry: &RegistryClient,
    use_discovery: bool,
    service_name: &str,
    fallback_url: &str,
) -> ResolvedEndpoint {
    if use_discovery {
        match registry.resolve_healthy(service_name).await {
            Ok((host, port)) => {
                tracing::info!(
                    service = service_name,
                    host = %host,
                    port,
                    "Resolved collaborator via catalog"
                );
                return ResolvedEndpoint::Discovered { host, port };
            }
            Err(err) => {
                tracing::warn!(
                    service = service_name,
                    error = %err,
                    fallback = fallback_url,
                    "Discovery failed; using configured fallback URL"
                );
            }
        }
    }
    ResolvedEndpoint::Fallback {
        url: fallback_url.to_string(),
    }
}
