//! Fleet Controller (spec §2 component H, §4.2).
//!
//! Owns the mapping application → running container. Grounded on the
//! teacher's `engine::pipeline` roll logic and `engine::container_monitor`'s
//! in-place restart, generalized behind an explicit contract (`roll`,
//! `restart`, `stop`, `remove`, `current`) and serialized per application
//! with a lock map rather than the teacher's single global deployment mpsc.

use crate::proxy::ProxyAdapter;
use crate::runtime::{ContainerRuntime, PortMapping, RunConfig};
use anyhow::{Context, Result};
use dashmap::DashMap;
use std::collections::HashMap;
use std::net::TcpListener;
use std::sync::Arc;
use tokio::sync::Mutex;

struct AppState {
    container_id: Option<String>,
    container_name: Option<String>,
    host_port: Option<u16>,
}

/// Serializes `roll`/`restart`/`stop`/`remove` per application (spec §5:
/// "it is an error for two roll operations to overlap for the same app").
pub struct FleetController {
    runtime: Arc<dyn ContainerRuntime>,
    proxy: Arc<ProxyAdapter>,
    base_domain: String,
    locks: DashMap<String, Arc<Mutex<AppState>>>,
}

fn pick_free_port() -> Result<u16> {
    let listener = TcpListener::bind("127.0.0.1:0").context("failed to bind an ephemeral port")?;
    Ok(listener.local_addr()?.port())
}

impl FleetController {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, proxy: Arc<ProxyAdapter>, base_domain: impl Into<String>) -> Self {
        Self {
            runtime,
            proxy,
            base_domain: base_domain.into(),
            locks: DashMap::new(),
        }
    }

    fn state_for(&self, app_id: &str) -> Arc<Mutex<AppState>> {
        self.locks
            .entry(app_id.to_string())
            .or_insert_with(|| {
                Arc::new(Mutex::new(AppState {
                    container_id: None,
                    container_name: None,
                    host_port: None,
                }))
            })
            .clone()
    }

    /// Create a new container for `image_tag` and run it through
    /// `health_gate` (the caller's startup-grace + probe logic, spec
    /// §4.1 state `running`). The per-app lock is held for the whole
    /// operation so two rolls for the same app can never interleave
    /// (spec §5). On gate success, wire routes then retire the previous
    /// container (route switch precedes shutdown, spec §4.2 ordering).
    /// On gate failure, remove only the new container and leave the
    /// previous one serving.
    pub async fn roll<F, Fut>(
        &self,
        app_id: &str,
        app_name: &str,
        deployment_id: &str,
        hostnames: &[String],
        image_tag: &str,
        env: HashMap<String, String>,
        container_port: Option<u16>,
        health_gate: F,
    ) -> Result<(String, Option<u16>)>
    where
        F: FnOnce(Option<u16>) -> Fut,
        Fut: std::future::Future<Output = Result<()>>,
    {
        let state_lock = self.state_for(app_id);
        let mut state = state_lock.lock().await;

        let container_name = format!("{app_name}-{deployment_id}");
        let host_port = match container_port {
            Some(_) => Some(pick_free_port()?),
            None => None,
        };

        let run_config = RunConfig {
            name: container_name.clone(),
            image: image_tag.to_string(),
            env,
            port_mapping: container_port.zip(host_port).map(|(container_port, host_port)| PortMapping {
                host_port,
                container_port,
            }),
            app_id: app_id.to_string(),
        };

        let info = self.runtime.run(&run_config).await?;

        if let Err(e) = health_gate(host_port).await {
            let _ = self.runtime.stop(&info.id).await;
            let _ = self.runtime.remove(&info.id).await;
            return Err(e);
        }

        if let Some(port) = host_port {
            let auto_subdomain = format!("{app_name}.{}", self.base_domain);
            let mut targets = hostnames.to_vec();
            if !targets.contains(&auto_subdomain) {
                targets.push(auto_subdomain);
            }
            for hostname in &targets {
                self.proxy.set_route(hostname, "127.0.0.1", port).await?;
            }
        }

        let previous_container_id = state.container_id.take();
        state.container_id = Some(info.id.clone());
        state.container_name = Some(container_name);
        state.host_port = host_port;
        drop(state);

        if let Some(previous) = previous_container_id {
            let _ = self.runtime.stop(&previous).await;
            let _ = self.runtime.remove(&previous).await;
        }

        Ok((info.id, host_port))
    }

    pub async fn stop(&self, app_id: &str) -> Result<()> {
        let state_lock = self.state_for(app_id);
        let mut state = state_lock.lock().await;
        if let Some(id) = state.container_id.take() {
            self.runtime.stop(&id).await?;
        }
        state.container_name = None;
        state.host_port = None;
        Ok(())
    }

    pub async fn remove(&self, app_id: &str) -> Result<()> {
        let state_lock = self.state_for(app_id);
        let mut state = state_lock.lock().await;
        if let Some(id) = state.container_id.take() {
            let _ = self.runtime.stop(&id).await;
            self.runtime.remove(&id).await?;
        }
        state.container_name = None;
        state.host_port = None;
        Ok(())
    }

    /// Restart the currently-tracked container for `app_id` in place (spec
    /// §4.7: a healthy→unhealthy transition calls `H.restart(app)`).
    /// Grounded on the teacher's `container_monitor`'s crash-restart path,
    /// which restarts the existing container rather than rolling a new
    /// one: `roll` already owns replacement-on-deploy, this is recovery of
    /// the deployment already in place.
    pub async fn restart(&self, app_id: &str) -> Result<()> {
        let state_lock = self.state_for(app_id);
        let state = state_lock.lock().await;
        let Some(id) = state.container_id.clone() else {
            anyhow::bail!("no container tracked for app {app_id}");
        };
        self.runtime.stop(&id).await.ok();
        self.runtime.start(&id).await
    }

    pub async fn current(&self, app_id: &str) -> Option<String> {
        let state_lock = self.state_for(app_id);
        let state = state_lock.lock().await;
        state.container_id.clone()
    }

    /// Adopt an already-running container discovered at boot (reconciler, K).
    pub async fn adopt(&self, app_id: &str, container_id: &str, container_name: &str, host_port: Option<u16>) {
        let state_lock = self.state_for(app_id);
        let mut state = state_lock.lock().await;
        state.container_id = Some(container_id.to_string());
        state.container_name = Some(container_name.to_string());
        state.host_port = host_port;
    }
}
