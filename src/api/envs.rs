use crate::crypto;
use crate::db::{CreateEnvVarRequest, EnvVar, EnvVarResponse, UpdateEnvVarRequest};
use crate::error::{AppError, AppResult};
use crate::AppState;
use axum::extract::{Path, State};
use axum::Json;
use chrono::Utc;
use std::sync::Arc;

fn to_response(row: EnvVar, key: &[u8; 32]) -> AppResult<EnvVarResponse> {
    let value = crypto::decrypt_if_encrypted(&row.value, Some(key)).map_err(|e| AppError::Crypto(e.to_string()))?;
    Ok(EnvVarResponse {
        id: row.id,
        app_id: row.app_id,
        key: row.key,
        value,
        created_at: row.created_at,
        updated_at: row.updated_at,
    })
}

pub async fn list(State(state): State<Arc<AppState>>, Path(app_id): Path<String>) -> AppResult<Json<Vec<EnvVarResponse>>> {
    let rows: Vec<EnvVar> = sqlx::query_as("SELECT * FROM environment_variables WHERE app_id = ? ORDER BY key")
        .bind(&app_id)
        .fetch_all(&state.db)
        .await?;
    let key = crypto::derive_key(&state.config.auth.jwt_secret);
    let out: AppResult<Vec<EnvVarResponse>> = rows.into_iter().map(|r| to_response(r, &key)).collect();
    Ok(Json(out?))
}

pub async fn create(
    State(state): State<Arc<AppState>>,
    Path(app_id): Path<String>,
    Json(req): Json<CreateEnvVarRequest>,
) -> AppResult<Json<EnvVarResponse>> {
    let key = crypto::derive_key(&state.config.auth.jwt_secret);
    let ciphertext = crypto::encrypt(&req.value, &key).map_err(|e| AppError::Crypto(e.to_string()))?;
    let id = uuid::Uuid::new_v4().to_string();
    let now = Utc::now().to_rfc3339();

    sqlx::query(
        "INSERT INTO environment_variables (id, app_id, key, value, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(&id)
    .bind(&app_id)
    .bind(&req.key)
    .bind(&ciphertext)
    .bind(&now)
    .bind(&now)
    .execute(&state.db)
    .await?;

    Ok(Json(EnvVarResponse {
        id,
        app_id,
        key: req.key,
        value: req.value,
        created_at: now.clone(),
        updated_at: now,
    }))
}

pub async fn update(
    State(state): State<Arc<AppState>>,
    Path((app_id, key_name)): Path<(String, String)>,
    Json(req): Json<UpdateEnvVarRequest>,
) -> AppResult<Json<EnvVarResponse>> {
    let key = crypto::derive_key(&state.config.auth.jwt_secret);
    let ciphertext = crypto::encrypt(&req.value, &key).map_err(|e| AppError::Crypto(e.to_string()))?;
    let now = Utc::now().to_rfc3339();

    let result = sqlx::query("UPDATE environment_variables SET value = ?, updated_at = ? WHERE app_id = ? AND key = ?")
        .bind(&ciphertext)
        .bind(&now)
        .bind(&app_id)
        .bind(&key_name)
        .execute(&state.db)
        .await?;
    if result.rows_affected() == 0 {
        return Err(AppError::NotFound(format!("env var {key_name}")));
    }

    let row: EnvVar = sqlx::query_as("SELECT * FROM environment_variables WHERE app_id = ? AND key = ?")
        .bind(&app_id)
        .bind(&key_name)
        .fetch_one(&state.db)
        .await?;
    Ok(Json(to_response(row, &key)?))
}

pub async fn delete(State(state): State<Arc<AppState>>, Path((app_id, key_name)): Path<(String, String)>) -> AppResult<()> {
    let result = sqlx::query("DELETE FROM environment_variables WHERE app_id = ? AND key = ?")
        .bind(&app_id)
        .bind(&key_name)
        .execute(&state.db)
        .await?;
    if result.rows_affected() == 0 {
        return Err(AppError::NotFound(format!("env var {key_name}")));
    }
    Ok(())
}
