//! Reverse-Proxy Route Manager (spec §2 component F, §4.3, §6.3).
//!
//! The teacher terminates TLS itself with an embedded `ProxyServer`. Here
//! the proxy is an external collaborator: this module is a thin `reqwest`
//! client issuing declarative route CRUD against its admin HTTP API, plus
//! certificate-liveness queries. K reconciles the desired route set
//! against what this reports.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize)]
struct SetRouteRequest<'a> {
    hostname: &'a str,
    backend_host: &'a str,
    backend_port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Route {
    pub hostname: String,
    pub backend_host: String,
    pub backend_port: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CertStatus {
    Active,
    Pending,
    None,
}

#[derive(Debug, Deserialize)]
struct CertStatusResponse {
    status: CertStatus,
}

pub struct ProxyAdapter {
    client: reqwest::Client,
    admin_url: String,
}

impl ProxyAdapter {
    pub fn new(admin_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            admin_url: admin_url.into(),
        }
    }

    pub async fn set_route(&self, hostname: &str, backend_host: &str, backend_port: u16) -> Result<()> {
        let url = format!("{}/routes", self.admin_url);
        let body = SetRouteRequest {
            hostname,
            backend_host,
            backend_port,
        };
        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .context("proxy admin API unreachable while setting route")?;

        if !response.status().is_success() {
            anyhow::bail!("proxy admin rejected set_route for {hostname}: {}", response.status());
        }
        Ok(())
    }

    pub async fn remove_route(&self, hostname: &str) -> Result<()> {
        let url = format!("{}/routes/{}", self.admin_url, hostname);
        let response = self
            .client
            .delete(&url)
            .send()
            .await
            .context("proxy admin API unreachable while removing route")?;

        if !response.status().is_success() && response.status() != reqwest::StatusCode::NOT_FOUND {
            anyhow::bail!("proxy admin rejected remove_route for {hostname}: {}", response.status());
        }
        Ok(())
    }

    pub async fn list_routes(&self) -> Result<Vec<Route>> {
        let url = format!("{}/routes", self.admin_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .context("proxy admin API unreachable while listing routes")?
            .error_for_status()
            .context("proxy admin returned an error listing routes")?;

        response.json().await.context("malformed routes response from proxy admin")
    }

    pub async fn cert_status(&self, hostname: &str) -> Result<CertStatus> {
        let url = format!("{}/certificates/{}", self.admin_url, hostname);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .context("proxy admin API unreachable while querying cert status")?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(CertStatus::None);
        }

        let parsed: CertStatusResponse = response
            .error_for_status()
            .context("proxy admin returned an error querying cert status")?
            .json()
            .await
            .context("malformed cert status response from proxy admin")?;
        Ok(parsed.status)
    }
}
