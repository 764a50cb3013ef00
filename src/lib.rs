pub mod api;
pub mod config;
pub mod crypto;
pub mod db;
pub mod error;
pub mod events;
pub mod fleet;
pub mod git;
pub mod health;
pub mod orchestrator;
pub mod proxy;
pub mod reconciler;
pub mod runtime;
pub mod webhooks;

use crate::config::Config;
use crate::db::DbPool;
use crate::events::EventBus;
use crate::fleet::FleetController;
use crate::orchestrator::Orchestrator;
use crate::proxy::ProxyAdapter;
use crate::runtime::ContainerRuntime;
use std::sync::Arc;

/// Shared application state, mirroring the teacher's `AppState` handle
/// threaded through every axum route.
pub struct AppState {
    pub db: DbPool,
    pub config: Arc<Config>,
    pub events: Arc<EventBus>,
    pub runtime: Arc<dyn ContainerRuntime>,
    pub fleet: Arc<FleetController>,
    pub proxy: Arc<ProxyAdapter>,
    pub orchestrator: Arc<Orchestrator>,
}
