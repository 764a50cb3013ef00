use crate::db::{DeployKey, DeployKeyResponse};
use crate::error::{AppError, AppResult};
use crate::AppState;
use axum::extract::{Path, State};
use axum::Json;
use chrono::Utc;
use std::sync::Arc;

pub async fn get(State(state): State<Arc<AppState>>, Path(app_id): Path<String>) -> AppResult<Json<DeployKeyResponse>> {
    let key: DeployKey = sqlx::query_as("SELECT * FROM deploy_keys WHERE app_id = ?")
        .bind(&app_id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("deploy key for application {app_id}")))?;
    Ok(Json(key.into()))
}

/// Regenerate, replacing the old key atomically in one transaction (spec §3).
pub async fn regenerate(State(state): State<Arc<AppState>>, Path(app_id): Path<String>) -> AppResult<Json<DeployKeyResponse>> {
    let app_name: (String,) = sqlx::query_as("SELECT name FROM applications WHERE id = ?")
        .bind(&app_id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("application {app_id}")))?;

    let keypair = crate::git::generate_keypair(&app_name.0).await.map_err(|e| AppError::Upstream(e.to_string()))?;
    let root_key = crate::crypto::derive_key(&state.config.auth.jwt_secret);
    let encrypted = crate::crypto::encrypt(&keypair.private_key, &root_key).map_err(|e| AppError::Crypto(e.to_string()))?;
    let now = Utc::now().to_rfc3339();

    let mut tx = state.db.begin().await?;
    sqlx::query("DELETE FROM deploy_keys WHERE app_id = ?").bind(&app_id).execute(&mut *tx).await?;
    sqlx::query("INSERT INTO deploy_keys (id, app_id, public_key, private_key, created_at) VALUES (?, ?, ?, ?, ?)")
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(&app_id)
        .bind(&keypair.public_key)
        .bind(&encrypted)
        .bind(&now)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    Ok(Json(DeployKeyResponse {
        public_key: keypair.public_key,
        created_at: now,
    }))
}
