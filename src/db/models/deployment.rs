//! Deployment model and pipeline status (spec §3, §4.1).

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStatus {
    Queued,
    Cloning,
    Building,
    Deploying,
    Running,
    Failed,
    Cancelled,
    /// Not one of spec §3's pipeline states: a bookkeeping state applied to
    /// a deployment that already reached `Running` once a later deployment
    /// of the same app takes over, so exactly one `running` row exists per
    /// app (spec §3 "most recent running deployment is authoritative").
    Superseded,
}

impl DeploymentStatus {
    /// Terminal states per spec §3/§8 invariant 1.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Running | Self::Failed | Self::Cancelled | Self::Superseded)
    }
}

impl std::fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Queued => write!(f, "queued"),
            Self::Cloning => write!(f, "cloning"),
            Self::Building => write!(f, "building"),
            Self::Deploying => write!(f, "deploying"),
            Self::Running => write!(f, "running"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Superseded => write!(f, "superseded"),
        }
    }
}

impl From<String> for DeploymentStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "queued" => Self::Queued,
            "cloning" => Self::Cloning,
            "building" => Self::Building,
            "deploying" => Self::Deploying,
            "running" => Self::Running,
            "failed" => Self::Failed,
            "cancelled" => Self::Cancelled,
            "superseded" => Self::Superseded,
            _ => Self::Queued,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentTrigger {
    Manual,
    Webhook,
}

impl std::fmt::Display for DeploymentTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Manual => write!(f, "manual"),
            Self::Webhook => write!(f, "webhook"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Deployment {
    pub id: String,
    pub app_id: String,
    pub server_id: String,
    pub commit_sha: Option<String>,
    pub commit_message: Option<String>,
    pub status: String,
    pub build_log: String,
    pub container_id: Option<String>,
    pub host_port: Option<i64>,
    pub image_tag: String,
    pub trigger: String,
    pub error_message: Option<String>,
    pub started_at: String,
    pub finished_at: Option<String>,
}

impl Deployment {
    pub fn status_enum(&self) -> DeploymentStatus {
        DeploymentStatus::from(self.status.clone())
    }

    pub fn image_tag_for(app_name: &str, deployment_id: &str) -> String {
        format!("ployer-{app_name}:{deployment_id}")
    }
}
