use crate::db::{HealthCheck, HealthCheckResult, UpsertHealthCheckRequest};
use crate::error::AppResult;
use crate::AppState;
use axum::extract::{Path, State};
use axum::Json;
use std::sync::Arc;

pub async fn get_config(State(state): State<Arc<AppState>>, Path(app_id): Path<String>) -> AppResult<Json<HealthCheck>> {
    let row: Option<HealthCheck> = sqlx::query_as("SELECT * FROM health_checks WHERE app_id = ?")
        .bind(&app_id)
        .fetch_optional(&state.db)
        .await?;
    Ok(Json(row.unwrap_or_else(|| HealthCheck {
        app_id,
        ..HealthCheck::default()
    })))
}

pub async fn upsert_config(
    State(state): State<Arc<AppState>>,
    Path(app_id): Path<String>,
    Json(req): Json<UpsertHealthCheckRequest>,
) -> AppResult<Json<HealthCheck>> {
    sqlx::query(
        "INSERT INTO health_checks (app_id, path, interval_seconds, timeout_seconds, healthy_threshold, unhealthy_threshold)
         VALUES (?, ?, ?, ?, ?, ?)
         ON CONFLICT(app_id) DO UPDATE SET path = excluded.path, interval_seconds = excluded.interval_seconds,
            timeout_seconds = excluded.timeout_seconds, healthy_threshold = excluded.healthy_threshold,
            unhealthy_threshold = excluded.unhealthy_threshold",
    )
    .bind(&app_id)
    .bind(&req.path)
    .bind(req.interval_seconds)
    .bind(req.timeout_seconds)
    .bind(req.healthy_threshold)
    .bind(req.unhealthy_threshold)
    .execute(&state.db)
    .await?;

    let row: HealthCheck = sqlx::query_as("SELECT * FROM health_checks WHERE app_id = ?").bind(&app_id).fetch_one(&state.db).await?;
    Ok(Json(row))
}

pub async fn list_results(State(state): State<Arc<AppState>>, Path(app_id): Path<String>) -> AppResult<Json<Vec<HealthCheckResult>>> {
    let rows = sqlx::query_as("SELECT * FROM health_check_results WHERE app_id = ? ORDER BY checked_at DESC LIMIT 100")
        .bind(&app_id)
        .fetch_all(&state.db)
        .await?;
    Ok(Json(rows))
}
