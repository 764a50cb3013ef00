//! Application model (spec §3).

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildStrategy {
    Dockerfile,
    Nixpacks,
    DockerCompose,
}

impl std::fmt::Display for BuildStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Dockerfile => write!(f, "dockerfile"),
            Self::Nixpacks => write!(f, "nixpacks"),
            Self::DockerCompose => write!(f, "docker_compose"),
        }
    }
}

impl std::str::FromStr for BuildStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "dockerfile" => Ok(Self::Dockerfile),
            "nixpacks" => Ok(Self::Nixpacks),
            "docker_compose" => Ok(Self::DockerCompose),
            other => Err(format!("unknown build strategy: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppStatus {
    Pending,
    Deploying,
    Running,
    Stopped,
    Failed,
}

impl std::fmt::Display for AppStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Deploying => write!(f, "deploying"),
            Self::Running => write!(f, "running"),
            Self::Stopped => write!(f, "stopped"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Application {
    pub id: String,
    pub name: String,
    pub server_id: String,
    pub git_url: Option<String>,
    pub git_branch: Option<String>,
    pub build_strategy: String,
    pub dockerfile_path: Option<String>,
    pub port: Option<i64>,
    pub auto_deploy: i64,
    pub status: String,
    pub created_at: String,
    pub updated_at: String,
}

impl Application {
    pub fn build_strategy_enum(&self) -> BuildStrategy {
        self.build_strategy.parse().unwrap_or(BuildStrategy::Dockerfile)
    }

    pub fn auto_deploy(&self) -> bool {
        self.auto_deploy != 0
    }

    pub fn container_name(&self, deployment_id: &str) -> String {
        format!("{}-{}", self.name, deployment_id)
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateApplicationRequest {
    pub name: String,
    pub server_id: String,
    pub git_url: Option<String>,
    pub git_branch: Option<String>,
    #[serde(default)]
    pub build_strategy: Option<String>,
    pub dockerfile_path: Option<String>,
    pub port: Option<i64>,
    #[serde(default = "default_true")]
    pub auto_deploy: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Default)]
pub struct UpdateApplicationRequest {
    pub name: Option<String>,
    pub git_url: Option<String>,
    pub git_branch: Option<String>,
    pub build_strategy: Option<String>,
    pub dockerfile_path: Option<String>,
    pub port: Option<i64>,
    pub auto_deploy: Option<bool>,
}
