//! Domain model (spec §3).

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Domain {
    pub id: String,
    pub app_id: String,
    pub hostname: String,
    pub is_primary: i64,
    pub ssl_active: i64,
    pub created_at: String,
}

impl Domain {
    pub fn is_primary(&self) -> bool {
        self.is_primary != 0
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateDomainRequest {
    pub hostname: String,
    #[serde(default)]
    pub is_primary: bool,
}
