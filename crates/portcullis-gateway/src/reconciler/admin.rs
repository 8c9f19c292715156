//! Edge-proxy admin API client.

use crate::reconciler::route::{RouteSpec, MANAGED_BY};
use serde::Deserialize;
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AdminError {
    #[error("admin API request failed: {0}")]
    Transport(String),

    #[error("admin API returned status {0}")]
    Status(u16),

    #[error("failed to decode admin API response: {0}")]
    Decode(String),
}

impl AdminError {
    fn from_reqwest(err: reqwest::Error) -> Self {
        AdminError::Transport(err.to_string())
    }
}

/// A route as listed by the admin API.
#[derive(Debug, Clone)]
pub struct ExistingRoute {
    pub id: String,
    pub name: Option<String>,
    pub labels: BTreeMap<String, String>,
}

impl ExistingRoute {
    pub fn is_managed(&self) -> bool {
        self.labels.get("managed-by").map(String::as_str) == Some(MANAGED_BY)
    }

    pub fn service_name(&self) -> Option<&str> {
        self.labels.get("service-name").map(String::as_str)
    }
}

#[derive(Debug, Deserialize)]
struct RouteList {
    #[serde(default)]
    list: Vec<RouteItem>,
}

#[derive(Debug, Deserialize)]
struct RouteItem {
    value: RouteValue,
}

#[derive(Debug, Deserialize)]
struct RouteValue {
    // The admin API emits numeric ids for hand-created routes.
    id: Option<serde_json::Value>,
    name: Option<String>,
    #[serde(default)]
    labels: BTreeMap<String, String>,
}

/// Client for the edge proxy's admin API.
#[derive(Clone)]
pub struct AdminClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl AdminClient {
    pub fn new(http: reqwest::Client, base_url: &str, api_key: &str) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        }
    }

    /// Upserts a route.
    pub async fn put_route(&self, id: &str, spec: &RouteSpec) -> Result<(), AdminError> {
        let url = format!("{}/apisix/admin/routes/{}", self.base_url, id);
        let response = self
            .http
            .put(&url)
            .header("X-API-KEY", &self.api_key)
            .json(spec)
            .send()
            .await
            .map_err(AdminError::from_reqwest)?;
        if !response.status().is_success() {
            return Err(AdminError::Status(response.status().as_u16()));
        }
        Ok(())
    }

    /// Deletes a route. Missing routes are fine: the desired state holds.
    pub async fn delete_route(&self, id: &str) -> Result<(), AdminError> {
        let url = format!("{}/apisix/admin/routes/{}", self.base_url, id);
        let response = self
            .http
            .delete(&url)
            .header("X-API-KEY", &self.api_key)
            .send()
            .await
            .map_err(AdminError::from_reqwest)?;
        if !response.status().is_success() && response.status().as_u16() != 404 {
            return Err(AdminError::Status(response.status().as_u16()));
        }
        Ok(())
    }

    /// Lists all routes on the edge proxy, managed or not.
    pub async fn list_routes(&self) -> Result<Vec<ExistingRoute>, AdminError> {
        let url = format!("{}/apisix/admin/routes", self.base_url);
        let response = self
            .http
            .get(&url)
            .header("X-API-KEY", &self.api_key)
            .send()
            .await
            .map_err(AdminError::from_reqwest)?;
        if !response.status().is_success() {
            return Err(AdminError::Status(response.status().as_u16()));
        }
        let parsed: RouteList = response
            .json()
            .await
            .map_err(|e| AdminError::Decode(e.to_string()))?;

        Ok(parsed
            .list
            .into_iter()
            .map(|item| ExistingRoute {
                id: item
                    .value
                    .id
                    .map(|id| match id {
                        serde_json::Value::String(s) => s,
                        other => other.to_string(),
                    })
                    .unwrap_or_default(),
                name: item.value.name,
                labels: item.value.labels,
            })
            .collect())
    }
}
