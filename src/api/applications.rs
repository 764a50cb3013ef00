use crate::db::{Application, CreateApplicationRequest, UpdateApplicationRequest};
use crate::error::{AppError, AppResult};
use crate::AppState;
use axum::extract::{Path, State};
use axum::Json;
use chrono::Utc;
use std::sync::Arc;

pub async fn list(State(state): State<Arc<AppState>>) -> AppResult<Json<Vec<Application>>> {
    let apps = sqlx::query_as("SELECT * FROM applications ORDER BY created_at DESC")
        .fetch_all(&state.db)
        .await?;
    Ok(Json(apps))
}

pub async fn get(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> AppResult<Json<Application>> {
    let app: Option<Application> = sqlx::query_as("SELECT * FROM applications WHERE id = ?")
        .bind(&id)
        .fetch_optional(&state.db)
        .await?;
    app.map(Json).ok_or_else(|| AppError::NotFound(format!("application {id}")))
}

pub async fn create(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateApplicationRequest>,
) -> AppResult<Json<Application>> {
    if req.name.trim().is_empty() {
        return Err(AppError::Validation("name must not be empty".into()));
    }
    let id = uuid::Uuid::new_v4().to_string();
    let now = Utc::now().to_rfc3339();
    let build_strategy = req.build_strategy.clone().unwrap_or_else(|| "dockerfile".to_string());

    sqlx::query(
        "INSERT INTO applications (id, name, server_id, git_url, git_branch, build_strategy, dockerfile_path, port, auto_deploy, status, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 'pending', ?, ?)",
    )
    .bind(&id)
    .bind(&req.name)
    .bind(&req.server_id)
    .bind(&req.git_url)
    .bind(&req.git_branch)
    .bind(&build_strategy)
    .bind(&req.dockerfile_path)
    .bind(req.port)
    .bind(req.auto_deploy as i64)
    .bind(&now)
    .bind(&now)
    .execute(&state.db)
    .await?;

    if req.git_url.is_some() {
        let keypair = crate::git::generate_keypair(&req.name)
            .await
            .map_err(|e| AppError::Upstream(e.to_string()))?;
        let root_key = crate::crypto::derive_key(&state.config.auth.jwt_secret);
        let encrypted = crate::crypto::encrypt(&keypair.private_key, &root_key).map_err(|e| AppError::Crypto(e.to_string()))?;
        sqlx::query(
            "INSERT INTO deploy_keys (id, app_id, public_key, private_key, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(&id)
        .bind(&keypair.public_key)
        .bind(&encrypted)
        .bind(&now)
        .execute(&state.db)
        .await?;
    }

    let app: Application = sqlx::query_as("SELECT * FROM applications WHERE id = ?")
        .bind(&id)
        .fetch_one(&state.db)
        .await?;
    Ok(Json(app))
}

pub async fn update(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<UpdateApplicationRequest>,
) -> AppResult<Json<Application>> {
    let existing: Application = sqlx::query_as("SELECT * FROM applications WHERE id = ?")
        .bind(&id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("application {id}")))?;

    let name = req.name.unwrap_or(existing.name);
    let git_url = req.git_url.or(existing.git_url);
    let git_branch = req.git_branch.or(existing.git_branch);
    let build_strategy = req.build_strategy.unwrap_or(existing.build_strategy);
    let dockerfile_path = req.dockerfile_path.or(existing.dockerfile_path);
    let port = req.port.or(existing.port);
    let auto_deploy = req.auto_deploy.map(|v| v as i64).unwrap_or(existing.auto_deploy);

    sqlx::query(
        "UPDATE applications SET name = ?, git_url = ?, git_branch = ?, build_strategy = ?, dockerfile_path = ?, port = ?, auto_deploy = ?, updated_at = ? WHERE id = ?",
    )
    .bind(&name)
    .bind(&git_url)
    .bind(&git_branch)
    .bind(&build_strategy)
    .bind(&dockerfile_path)
    .bind(port)
    .bind(auto_deploy)
    .bind(Utc::now().to_rfc3339())
    .bind(&id)
    .execute(&state.db)
    .await?;

    let app: Application = sqlx::query_as("SELECT * FROM applications WHERE id = ?")
        .bind(&id)
        .fetch_one(&state.db)
        .await?;
    Ok(Json(app))
}

pub async fn delete(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> AppResult<()> {
    let in_flight: Option<(String,)> = sqlx::query_as(
        "SELECT id FROM deployments WHERE app_id = ?
         AND status IN ('queued', 'cloning', 'building', 'deploying')
         ORDER BY started_at DESC LIMIT 1",
    )
    .bind(&id)
    .fetch_optional(&state.db)
    .await?;
    if let Some((deployment_id,)) = in_flight {
        let _ = state.orchestrator.cancel(&deployment_id).await;
    }
    let _ = state.fleet.remove(&id).await;

    let domains: Vec<(String,)> = sqlx::query_as("SELECT hostname FROM domains WHERE app_id = ?")
        .bind(&id)
        .fetch_all(&state.db)
        .await?;
    for (hostname,) in domains {
        let _ = state.proxy.remove_route(&hostname).await;
    }

    let result = sqlx::query("DELETE FROM applications WHERE id = ?").bind(&id).execute(&state.db).await?;
    if result.rows_affected() == 0 {
        return Err(AppError::NotFound(format!("application {id}")));
    }
    Ok(())
}
