//! Deploy key model (spec §3): exactly one per application with a git URL.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct DeployKey {
    pub id: String,
    pub app_id: String,
    pub public_key: String,
    /// Encrypted via the Secret Box.
    pub private_key: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployKeyResponse {
    pub public_key: String,
    pub created_at: String,
}

impl From<DeployKey> for DeployKeyResponse {
    fn from(k: DeployKey) -> Self {
        Self {
            public_key: k.public_key,
            created_at: k.created_at,
        }
    }
}
