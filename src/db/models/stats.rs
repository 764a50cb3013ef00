//! Container stats sample (spec §3, §4.7). Retained for 24h (policy-driven).

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ContainerStatsSample {
    pub id: i64,
    pub container_id: String,
    pub app_id: Option<String>,
    pub cpu_percent: f64,
    pub memory_mb: f64,
    pub memory_limit_mb: Option<f64>,
    pub network_rx_mb: f64,
    pub network_tx_mb: f64,
    pub recorded_at: String,
}
