//! Container Runtime Adapter (spec §2 component D, §4.2, §6.3).
//!
//! Thin wrapper over an external container daemon. Adapted from the
//! teacher's `runtime::ContainerRuntime` trait, trimmed to the operations
//! the orchestrator actually drives: build, run, stop, remove, inspect,
//! logs, stats, and listing by label (used by the reconciler, §4.8).

mod docker;

pub use docker::DockerRuntime;

use anyhow::Result;
use async_trait::async_trait;
use futures::Stream;
use std::collections::HashMap;
use std::pin::Pin;

/// Build context: a tagged variant per build strategy (spec §4.1 "building",
/// REDESIGN FLAGS "avoid dynamic dispatch through a base class"). `build`
/// matches on the variant rather than going through a `dyn BuildStrategy`.
pub enum BuildContext {
    /// Tar `path` as the build context and hand `dockerfile` (relative to
    /// `path`) to the daemon.
    Dockerfile { path: String, dockerfile: String, tag: String },
    /// Hand `path` to the external `nixpacks` builder directly; no
    /// Dockerfile is read or written.
    Nixpacks { path: String, tag: String },
    /// A docker-compose service resolved by the tie-break at the parse
    /// site (`orchestrator::resolve_compose_service`): its own build
    /// context and Dockerfile, built the same way as a plain Dockerfile
    /// build once resolved.
    DockerCompose { path: String, dockerfile: String, tag: String, service: String },
}

impl BuildContext {
    pub fn tag(&self) -> &str {
        match self {
            Self::Dockerfile { tag, .. } | Self::Nixpacks { tag, .. } | Self::DockerCompose { tag, .. } => tag,
        }
    }
}

pub struct PortMapping {
    pub host_port: u16,
    pub container_port: u16,
}

pub struct RunConfig {
    pub name: String,
    pub image: String,
    pub env: HashMap<String, String>,
    pub port_mapping: Option<PortMapping>,
    /// Container label `ployer.app_id` (spec §4.2) so the reconciler can
    /// recover ownership after a process restart.
    pub app_id: String,
}

#[derive(Debug, Clone)]
pub struct ContainerInfo {
    pub id: String,
    pub name: String,
    pub running: bool,
    /// Host port bound to the container's primary exposed port, if any.
    pub host_port: Option<u16>,
    pub app_id: Option<String>,
}

pub type LogLine = String;
pub type LogStream = Pin<Box<dyn Stream<Item = Result<LogLine>> + Send>>;

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct ContainerStats {
    pub cpu_percent: f64,
    pub memory_mb: f64,
    pub memory_limit_mb: Option<f64>,
    pub network_rx_mb: f64,
    pub network_tx_mb: f64,
}

#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    fn name(&self) -> &'static str;

    /// Build an image from `ctx`, streaming log lines as they arrive.
    async fn build(&self, ctx: &BuildContext, on_log: &mut (dyn FnMut(String) + Send)) -> Result<String>;

    async fn run(&self, config: &RunConfig) -> Result<ContainerInfo>;

    /// Restart an existing (stopped) container in place, without recreating it.
    async fn start(&self, container_id: &str) -> Result<()>;

    async fn stop(&self, container_id: &str) -> Result<()>;

    async fn remove(&self, container_id: &str) -> Result<()>;

    async fn inspect(&self, container_id: &str) -> Result<ContainerInfo>;

    async fn logs(&self, container_id: &str, tail: usize, follow: bool) -> Result<LogStream>;

    async fn stats(&self, container_id: &str) -> Result<ContainerStats>;

    /// List containers carrying the `ployer.app_id` label (spec §4.2/§4.8).
    async fn list_labeled(&self) -> Result<Vec<ContainerInfo>>;
}

/// Detect and connect to the configured container daemon.
pub async fn detect_runtime(socket_path: &str) -> Result<std::sync::Arc<dyn ContainerRuntime>> {
    let runtime = DockerRuntime::new(socket_path)?;
    Ok(std::sync::Arc::new(runtime))
}
