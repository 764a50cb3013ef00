//! Health & Stats Monitor (spec §2 component I, §4.7).
//!
//! Tick-loop shape grounded on the teacher's `engine::container_monitor`,
//! trimmed of its exponential-backoff restart policy (not named by the
//! spec) down to the two ticks it actually calls for: HTTP liveness
//! probing with consecutive-success/failure counters, and container
//! stats sampling with retention.

use crate::db::{DbPool, HealthCheck, ProbeStatus};
use crate::events::EventBus;
use crate::fleet::FleetController;
use crate::runtime::ContainerRuntime;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::interval;

struct AppHealthState {
    consec_ok: u32,
    consec_fail: u32,
    healthy: bool,
}

impl Default for AppHealthState {
    fn default() -> Self {
        Self {
            consec_ok: 0,
            consec_fail: 0,
            healthy: true,
        }
    }
}

pub struct HealthMonitor {
    db: DbPool,
    events: Arc<EventBus>,
    runtime: Arc<dyn ContainerRuntime>,
    fleet: Arc<FleetController>,
    client: reqwest::Client,
    tick_interval_secs: u64,
    stats_interval_secs: u64,
    stats_retention_hours: i64,
    state: Mutex<HashMap<String, AppHealthState>>,
}

/// A single liveness probe, reusable by the Deployment Orchestrator's
/// `running`-state health gate (spec §4.1 state 4) and by the periodic
/// tick loop below.
pub async fn probe_once(client: &reqwest::Client, port: u16, check: &HealthCheck) -> (ProbeStatus, Option<i64>, Option<i64>, Option<String>) {
    let url = format!("http://127.0.0.1:{port}{}", check.path);
    let timeout = Duration::from_secs(check.timeout_seconds.max(1) as u64);
    let started = std::time::Instant::now();

    match client.get(&url).timeout(timeout).send().await {
        Ok(response) => {
            let elapsed_ms = started.elapsed().as_millis() as i64;
            let status_code = response.status().as_u16() as i64;
            if response.status().is_success() {
                (ProbeStatus::Healthy, Some(elapsed_ms), Some(status_code), None)
            } else {
                (ProbeStatus::Unhealthy, Some(elapsed_ms), Some(status_code), None)
            }
        }
        Err(e) => (ProbeStatus::Unhealthy, None, None, Some(e.to_string())),
    }
}

impl HealthMonitor {
    pub fn new(
        db: DbPool,
        events: Arc<EventBus>,
        runtime: Arc<dyn ContainerRuntime>,
        fleet: Arc<FleetController>,
        tick_interval_secs: u64,
        stats_interval_secs: u64,
        stats_retention_hours: i64,
    ) -> Self {
        Self {
            db,
            events,
            runtime,
            fleet,
            client: reqwest::Client::new(),
            tick_interval_secs,
            stats_interval_secs,
            stats_retention_hours,
            state: Mutex::new(HashMap::new()),
        }
    }

    pub async fn run(self: Arc<Self>) {
        let mut probe_tick = interval(Duration::from_secs(self.tick_interval_secs.max(1)));
        let mut stats_tick = interval(Duration::from_secs(self.stats_interval_secs.max(1)));
        loop {
            tokio::select! {
                _ = probe_tick.tick() => {
                    if let Err(e) = self.probe_all().await {
                        tracing::warn!(error = %e, "health probe tick failed");
                    }
                }
                _ = stats_tick.tick() => {
                    if let Err(e) = self.sample_stats().await {
                        tracing::warn!(error = %e, "stats sampling tick failed");
                    }
                }
            }
        }
    }

    async fn probe_all(&self) -> anyhow::Result<()> {
        let rows: Vec<(String, String, i64, String, i64, i64, i64, i64)> = sqlx::query_as(
            "SELECT d.app_id, d.container_id, d.host_port, hc.path, hc.interval_seconds, hc.timeout_seconds, hc.healthy_threshold, hc.unhealthy_threshold
             FROM deployments d
             JOIN health_checks hc ON hc.app_id = d.app_id
             WHERE d.status = 'running' AND d.host_port IS NOT NULL",
        )
        .fetch_all(&self.db)
        .await?;

        for (app_id, container_id, host_port, path, interval_seconds, timeout_seconds, healthy_threshold, unhealthy_threshold) in rows {
            let check = HealthCheck {
                app_id: app_id.clone(),
                path,
                interval_seconds,
                timeout_seconds,
                healthy_threshold,
                unhealthy_threshold,
            };

            let (status, response_time_ms, status_code, error_message) =
                probe_once(&self.client, host_port as u16, &check).await;

            sqlx::query(
                "INSERT INTO health_check_results (id, app_id, container_id, status, response_time_ms, status_code, error_message, checked_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(uuid::Uuid::new_v4().to_string())
            .bind(&app_id)
            .bind(&container_id)
            .bind(status.to_string())
            .bind(response_time_ms)
            .bind(status_code)
            .bind(&error_message)
            .bind(Utc::now().to_rfc3339())
            .execute(&self.db)
            .await?;

            let mut state_map = self.state.lock().await;
            let app_state = state_map.entry(app_id.clone()).or_default();

            let was_healthy = app_state.healthy;
            match status {
                ProbeStatus::Healthy => {
                    app_state.consec_ok += 1;
                    app_state.consec_fail = 0;
                    if !was_healthy && app_state.consec_ok >= healthy_threshold as u32 {
                        app_state.healthy = true;
                    }
                }
                _ => {
                    app_state.consec_fail += 1;
                    app_state.consec_ok = 0;
                    if was_healthy && app_state.consec_fail >= unhealthy_threshold as u32 {
                        app_state.healthy = false;
                    }
                }
            }
            let became_unhealthy = was_healthy && !app_state.healthy;
            drop(state_map);

            self.events.publish(
                format!("app:{app_id}"),
                serde_json::json!({ "status": status.to_string(), "response_time_ms": response_time_ms }),
            );

            if became_unhealthy {
                tracing::warn!(app_id = %app_id, "application transitioned to unhealthy, restarting");
                if let Err(e) = self.fleet.restart(&app_id).await {
                    tracing::error!(app_id = %app_id, error = %e, "failed to restart unhealthy application");
                }
            }
        }
        Ok(())
    }

    async fn sample_stats(&self) -> anyhow::Result<()> {
        let running: Vec<(String, String)> = sqlx::query_as(
            "SELECT app_id, container_id FROM deployments WHERE status = 'running' AND container_id IS NOT NULL",
        )
        .fetch_all(&self.db)
        .await?;

        for (app_id, container_id) in running {
            let stats = match self.runtime.stats(&container_id).await {
                Ok(s) => s,
                Err(e) => {
                    tracing::debug!(container_id = %container_id, error = %e, "stats sample failed");
                    continue;
                }
            };

            sqlx::query(
                "INSERT INTO container_stats (id, container_id, app_id, cpu_percent, memory_mb, memory_limit_mb, network_rx_mb, network_tx_mb, recorded_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(uuid::Uuid::new_v4().to_string())
            .bind(&container_id)
            .bind(&app_id)
            .bind(stats.cpu_percent)
            .bind(stats.memory_mb)
            .bind(stats.memory_limit_mb)
            .bind(stats.network_rx_mb)
            .bind(stats.network_tx_mb)
            .bind(Utc::now().to_rfc3339())
            .execute(&self.db)
            .await?;

            self.events.publish(
                format!("container:{container_id}:stats"),
                serde_json::json!(stats),
            );
        }

        let cutoff = Utc::now() - chrono::Duration::hours(self.stats_retention_hours);
        sqlx::query("DELETE FROM container_stats WHERE recorded_at < ?")
            .bind(cutoff.to_rfc3339())
            .execute(&self.db)
            .await?;

        Ok(())
    }
}
