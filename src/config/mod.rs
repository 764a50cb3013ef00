//! Configuration loading.
//!
//! Mirrors the teacher's nested `Config`/`ServerConfig` shape, narrowed to
//! the options spec §6.5 enumerates plus the ambient subsystem tuning
//! knobs SPEC_FULL.md §10 adds.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub proxy: ProxyConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub event_bus: EventBusConfig,
    #[serde(default)]
    pub health_monitor: HealthMonitorConfig,
    #[serde(default)]
    pub timeouts: TimeoutsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            auth: AuthConfig::default(),
            runtime: RuntimeConfig::default(),
            proxy: ProxyConfig::default(),
            logging: LoggingConfig::default(),
            event_bus: EventBusConfig::default(),
            health_monitor: HealthMonitorConfig::default(),
            timeouts: TimeoutsConfig::default(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::warn!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        let config: Config = toml::from_str(&raw)
            .with_context(|| format!("parsing config file {}", path.display()))?;
        Ok(config)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub base_domain: String,
    pub public_url: String,
    #[serde(default = "default_allowed_origins")]
    pub allowed_origins: Vec<String>,
    pub data_dir: String,
}

fn default_allowed_origins() -> Vec<String> {
    vec!["*".to_string()]
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            base_domain: "ployer.local".to_string(),
            public_url: "http://localhost:8080".to_string(),
            allowed_origins: default_allowed_origins(),
            data_dir: "./data".to_string(),
        }
    }
}

impl ServerConfig {
    pub fn database_path(&self) -> std::path::PathBuf {
        Path::new(&self.data_dir).join("ployer.db")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Root secret: seeds the Secret Box key (§4.6) and external auth. Not
    /// used by this crate for session handling — identity is out of scope.
    pub jwt_secret: String,
    pub token_expiry_hours: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: "change-me-in-production".to_string(),
            token_expiry_hours: 24,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    pub container_socket_path: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            container_socket_path: "/var/run/docker.sock".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    pub admin_url: String,
    pub reconcile_interval_secs: u64,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            admin_url: "http://127.0.0.1:9000".to_string(),
            reconcile_interval_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    /// `plain` or `json`
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "plain".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventBusConfig {
    pub subscriber_inbox_size: usize,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            subscriber_inbox_size: 256,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthMonitorConfig {
    pub tick_interval_secs: u64,
    pub stats_interval_secs: u64,
    pub stats_retention_hours: i64,
}

impl Default for HealthMonitorConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: 15,
            stats_interval_secs: 60,
            stats_retention_hours: 24,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutsConfig {
    pub clone_secs: u64,
    pub build_secs: u64,
    pub container_start_secs: u64,
    pub proxy_apply_secs: u64,
    pub startup_grace_secs: u64,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            clone_secs: 300,
            build_secs: 1800,
            container_start_secs: 60,
            proxy_apply_secs: 10,
            startup_grace_secs: 5,
        }
    }
}
