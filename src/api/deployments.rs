use crate::db::{Deployment, DeploymentTrigger};
use crate::error::{AppError, AppResult};
use crate::AppState;
use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub application_id: Option<String>,
}

pub async fn list(State(state): State<Arc<AppState>>, Query(q): Query<ListQuery>) -> AppResult<Json<Vec<Deployment>>> {
    let rows: Vec<Deployment> = match q.application_id {
        Some(app_id) => {
            sqlx::query_as("SELECT * FROM deployments WHERE app_id = ? ORDER BY started_at DESC")
                .bind(app_id)
                .fetch_all(&state.db)
                .await?
        }
        None => sqlx::query_as("SELECT * FROM deployments ORDER BY started_at DESC").fetch_all(&state.db).await?,
    };
    Ok(Json(rows))
}

pub async fn get(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> AppResult<Json<Deployment>> {
    let row: Option<Deployment> = sqlx::query_as("SELECT * FROM deployments WHERE id = ?")
        .bind(&id)
        .fetch_optional(&state.db)
        .await?;
    row.map(Json).ok_or_else(|| AppError::NotFound(format!("deployment {id}")))
}

pub async fn trigger(State(state): State<Arc<AppState>>, Path(app_id): Path<String>) -> AppResult<Json<Deployment>> {
    let deployment = state
        .orchestrator
        .enqueue(&app_id, DeploymentTrigger::Manual)
        .await
        .map_err(|e| AppError::Internal(e.to_string()))?;
    Ok(Json(deployment))
}

pub async fn cancel(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> AppResult<()> {
    state.orchestrator.cancel(&id).await.map_err(|e| AppError::Conflict(e.to_string()))
}
