//! Deployment target model (spec §3 Server).

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerStatus {
    Online,
    Offline,
    Unknown,
}

impl std::fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Online => write!(f, "online"),
            Self::Offline => write!(f, "offline"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

impl From<String> for ServerStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "online" => Self::Online,
            "offline" => Self::Offline,
            _ => Self::Unknown,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Server {
    pub id: String,
    pub name: String,
    pub host: String,
    pub port: i64,
    pub username: String,
    /// Encrypted via the Secret Box (§4.6); `None` for the local server.
    pub ssh_private_key: Option<String>,
    pub is_local: i64,
    pub status: String,
    pub last_seen_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl Server {
    pub fn is_local(&self) -> bool {
        self.is_local != 0
    }

    pub fn status_enum(&self) -> ServerStatus {
        ServerStatus::from(self.status.clone())
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateServerRequest {
    pub name: String,
    pub host: String,
    pub port: i64,
    pub username: String,
    pub ssh_private_key: Option<String>,
}
