//! Reconciler (spec §2 component K, §4.8).
//!
//! Boot-time and periodic three-phase pass: adopt still-running
//! deployments, remove orphaned containers, rebuild the route set.
//! Grounded on the teacher's `main::restore_routes` + periodic-tick shape
//! of `engine::container_monitor`.

use crate::db::DbPool;
use crate::fleet::FleetController;
use crate::proxy::ProxyAdapter;
use crate::runtime::ContainerRuntime;
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;

pub struct Reconciler {
    db: DbPool,
    runtime: Arc<dyn ContainerRuntime>,
    fleet: Arc<FleetController>,
    proxy: Arc<ProxyAdapter>,
    interval_secs: u64,
}

impl Reconciler {
    pub fn new(
        db: DbPool,
        runtime: Arc<dyn ContainerRuntime>,
        fleet: Arc<FleetController>,
        proxy: Arc<ProxyAdapter>,
        interval_secs: u64,
    ) -> Self {
        Self {
            db,
            runtime,
            fleet,
            proxy,
            interval_secs,
        }
    }

    /// Full three-phase reconciliation, run once at boot.
    pub async fn reconcile_on_boot(&self) -> Result<()> {
        self.adopt_running_deployments().await?;
        self.remove_orphaned_containers().await?;
        self.reconcile_routes().await?;
        Ok(())
    }

    /// Phase 1: for each application whose most recent deployment claims
    /// `running`, confirm the container still exists; if missing, mark the
    /// application `stopped` without auto-redeploying.
    async fn adopt_running_deployments(&self) -> Result<()> {
        let rows: Vec<(String, String, String, String, Option<i64>)> = sqlx::query_as(
            "SELECT d.id, d.app_id, d.container_id, a.name, d.host_port
             FROM deployments d
             JOIN applications a ON a.id = d.app_id
             WHERE d.status = 'running' AND d.container_id IS NOT NULL",
        )
        .fetch_all(&self.db)
        .await?;

        for (deployment_id, app_id, container_id, app_name, host_port) in rows {
            match self.runtime.inspect(&container_id).await {
                Ok(info) if info.running => {
                    let container_name = format!("{app_name}-{deployment_id}");
                    self.fleet
                        .adopt(&app_id, &container_id, &container_name, host_port.map(|p| p as u16))
                        .await;
                }
                _ => {
                    sqlx::query("UPDATE applications SET status = 'stopped' WHERE id = ?")
                        .bind(&app_id)
                        .execute(&self.db)
                        .await?;
                    tracing::warn!(app_id = %app_id, "running deployment's container is gone, marking stopped");
                }
            }
        }
        Ok(())
    }

    /// Phase 2: remove containers labeled `ployer.app_id` that point at
    /// applications no longer present.
    async fn remove_orphaned_containers(&self) -> Result<()> {
        let containers = self.runtime.list_labeled().await?;
        for container in containers {
            let Some(app_id) = &container.app_id else { continue };
            let exists: Option<(String,)> = sqlx::query_as("SELECT id FROM applications WHERE id = ?")
                .bind(app_id)
                .fetch_optional(&self.db)
                .await?;
            if exists.is_none() {
                tracing::info!(container_id = %container.id, app_id = %app_id, "removing orphaned container");
                let _ = self.runtime.stop(&container.id).await;
                let _ = self.runtime.remove(&container.id).await;
            }
        }
        Ok(())
    }

    /// Phase 3 (also the periodic-only repeat): rebuild the desired route
    /// set from Domains × running deployments and install it via F.
    async fn reconcile_routes(&self) -> Result<()> {
        let desired: Vec<(String, i64, String)> = sqlx::query_as(
            "SELECT dom.hostname, d.host_port, a.name
             FROM domains dom
             JOIN applications a ON a.id = dom.app_id
             JOIN deployments d ON d.app_id = a.id AND d.status = 'running'
             WHERE d.host_port IS NOT NULL",
        )
        .fetch_all(&self.db)
        .await?;

        let mut desired_hostnames = std::collections::HashSet::new();
        for (hostname, host_port, _app_name) in &desired {
            desired_hostnames.insert(hostname.clone());
            if let Err(e) = self.proxy.set_route(hostname, "127.0.0.1", *host_port as u16).await {
                tracing::warn!(hostname = %hostname, error = %e, "failed to reconcile route");
            }
        }

        match self.proxy.list_routes().await {
            Ok(current) => {
                for route in current {
                    if !desired_hostnames.contains(&route.hostname) {
                        let _ = self.proxy.remove_route(&route.hostname).await;
                    }
                }
            }
            Err(e) => tracing::warn!(error = %e, "failed to list routes during reconciliation"),
        }

        Ok(())
    }

    /// Periodic loop: route reconciliation only (spec §4.8).
    pub async fn run_periodic(self: Arc<Self>) {
        let mut ticker = interval(Duration::from_secs(self.interval_secs.max(1)));
        loop {
            ticker.tick().await;
            if let Err(e) = self.reconcile_routes().await {
                tracing::warn!(error = %e, "periodic route reconciliation failed");
            }
        }
    }
}
