use crate::db::{CreateDomainRequest, Domain};
use crate::error::{AppError, AppResult};
use crate::proxy::CertStatus;
use crate::AppState;
use axum::extract::{Path, State};
use axum::Json;
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;

pub async fn list(State(state): State<Arc<AppState>>, Path(app_id): Path<String>) -> AppResult<Json<Vec<Domain>>> {
    let rows = sqlx::query_as("SELECT * FROM domains WHERE app_id = ?").bind(&app_id).fetch_all(&state.db).await?;
    Ok(Json(rows))
}

pub async fn create(
    State(state): State<Arc<AppState>>,
    Path(app_id): Path<String>,
    Json(req): Json<CreateDomainRequest>,
) -> AppResult<Json<Domain>> {
    let id = uuid::Uuid::new_v4().to_string();
    let now = Utc::now().to_rfc3339();

    let mut tx = state.db.begin().await?;
    if req.is_primary {
        sqlx::query("UPDATE domains SET is_primary = 0 WHERE app_id = ?").bind(&app_id).execute(&mut *tx).await?;
    }
    sqlx::query(
        "INSERT INTO domains (id, app_id, hostname, is_primary, ssl_active, created_at) VALUES (?, ?, ?, ?, 0, ?)",
    )
    .bind(&id)
    .bind(&app_id)
    .bind(&req.hostname)
    .bind(req.is_primary as i64)
    .bind(&now)
    .execute(&mut *tx)
    .await?;
    tx.commit().await?;

    let row: Domain = sqlx::query_as("SELECT * FROM domains WHERE id = ?").bind(&id).fetch_one(&state.db).await?;
    Ok(Json(row))
}

pub async fn remove(State(state): State<Arc<AppState>>, Path((app_id, hostname)): Path<(String, String)>) -> AppResult<()> {
    let result = sqlx::query("DELETE FROM domains WHERE app_id = ? AND hostname = ?")
        .bind(&app_id)
        .bind(&hostname)
        .execute(&state.db)
        .await?;
    if result.rows_affected() == 0 {
        return Err(AppError::NotFound(format!("domain {hostname}")));
    }
    let _ = state.proxy.remove_route(&hostname).await;
    Ok(())
}

/// Atomically clears the previous primary then sets the new one (spec §3 invariant).
pub async fn set_primary(State(state): State<Arc<AppState>>, Path((app_id, hostname)): Path<(String, String)>) -> AppResult<()> {
    let mut tx = state.db.begin().await?;
    sqlx::query("UPDATE domains SET is_primary = 0 WHERE app_id = ?").bind(&app_id).execute(&mut *tx).await?;
    let result = sqlx::query("UPDATE domains SET is_primary = 1 WHERE app_id = ? AND hostname = ?")
        .bind(&app_id)
        .bind(&hostname)
        .execute(&mut *tx)
        .await?;
    if result.rows_affected() == 0 {
        return Err(AppError::NotFound(format!("domain {hostname}")));
    }
    tx.commit().await?;
    Ok(())
}

#[derive(Serialize)]
pub struct VerifyResponse {
    ssl_active: bool,
}

/// Recomputes `ssl_active` by polling F (spec §6.1).
pub async fn verify(State(state): State<Arc<AppState>>, Path((app_id, hostname)): Path<(String, String)>) -> AppResult<Json<VerifyResponse>> {
    let status = state.proxy.cert_status(&hostname).await.map_err(|e| AppError::Upstream(e.to_string()))?;
    let active = matches!(status, CertStatus::Active);
    sqlx::query("UPDATE domains SET ssl_active = ? WHERE app_id = ? AND hostname = ?")
        .bind(active as i64)
        .bind(&app_id)
        .bind(&hostname)
        .execute(&state.db)
        .await?;
    Ok(Json(VerifyResponse { ssl_active: active }))
}
