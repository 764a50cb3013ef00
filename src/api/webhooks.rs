use crate::db::{CreateWebhookRequest, Webhook, WebhookDelivery};
use crate::error::{AppError, AppResult};
use crate::webhooks as ingress;
use crate::AppState;
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::Json;
use chrono::Utc;
use rand::Rng;
use serde::Deserialize;
use std::sync::Arc;

fn random_secret() -> String {
    rand::rng()
        .sample_iter(&rand::distr::Alphanumeric)
        .take(32)
        .map(char::from)
        .collect()
}

pub async fn get_config(State(state): State<Arc<AppState>>, Path(app_id): Path<String>) -> AppResult<Json<Webhook>> {
    let row: Webhook = sqlx::query_as("SELECT * FROM webhooks WHERE app_id = ?")
        .bind(&app_id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("webhook for application {app_id}")))?;
    Ok(Json(row))
}

pub async fn upsert_config(
    State(state): State<Arc<AppState>>,
    Path(app_id): Path<String>,
    Json(req): Json<CreateWebhookRequest>,
) -> AppResult<Json<Webhook>> {
    let secret = random_secret();
    let now = Utc::now().to_rfc3339();
    sqlx::query(
        "INSERT INTO webhooks (app_id, provider, secret, enabled, created_at) VALUES (?, ?, ?, 1, ?)
         ON CONFLICT(app_id) DO UPDATE SET provider = excluded.provider, secret = excluded.secret, enabled = 1",
    )
    .bind(&app_id)
    .bind(&req.provider)
    .bind(&secret)
    .bind(&now)
    .execute(&state.db)
    .await?;

    let row: Webhook = sqlx::query_as("SELECT * FROM webhooks WHERE app_id = ?").bind(&app_id).fetch_one(&state.db).await?;
    Ok(Json(row))
}

pub async fn remove_config(State(state): State<Arc<AppState>>, Path(app_id): Path<String>) -> AppResult<()> {
    sqlx::query("DELETE FROM webhooks WHERE app_id = ?").bind(&app_id).execute(&state.db).await?;
    Ok(())
}

pub async fn list_deliveries(State(state): State<Arc<AppState>>, Path(app_id): Path<String>) -> AppResult<Json<Vec<WebhookDelivery>>> {
    let rows = sqlx::query_as("SELECT * FROM webhook_deliveries WHERE app_id = ? ORDER BY delivered_at DESC")
        .bind(&app_id)
        .fetch_all(&state.db)
        .await?;
    Ok(Json(rows))
}

#[derive(Debug, Deserialize)]
pub struct IngressQuery {
    pub app_id: String,
}

pub async fn github_ingress(
    State(state): State<Arc<AppState>>,
    Query(q): Query<IngressQuery>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> AppResult<()> {
    let webhook: Webhook = sqlx::query_as("SELECT * FROM webhooks WHERE app_id = ? AND provider = 'github'")
        .bind(&q.app_id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| AppError::NotFound("webhook not configured".into()))?;

    let signature = match headers.get("X-Hub-Signature-256").and_then(|h| h.to_str().ok()) {
        Some(s) => s,
        None => {
            record_rejected_delivery(&state, &q.app_id, "github").await;
            return Err(AppError::Unauthorized("missing signature".into()));
        }
    };

    if ingress::verify_github(&body, &webhook.secret, signature).is_err() {
        record_rejected_delivery(&state, &q.app_id, "github").await;
        return Err(AppError::Unauthorized("signature mismatch".into()));
    }

    let payload: serde_json::Value = serde_json::from_slice(&body).map_err(|e| AppError::Validation(e.to_string()))?;
    let event = ingress::parse_github_push(&payload);
    let branch = branch_for(&state, &q.app_id).await?;
    ingress::handle_delivery(&state.db, &state.orchestrator, &q.app_id, "github", event, &branch)
        .await
        .map_err(|e| AppError::Internal(e.to_string()))
}

pub async fn gitlab_ingress(
    State(state): State<Arc<AppState>>,
    Query(q): Query<IngressQuery>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> AppResult<()> {
    let webhook: Webhook = sqlx::query_as("SELECT * FROM webhooks WHERE app_id = ? AND provider = 'gitlab'")
        .bind(&q.app_id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| AppError::NotFound("webhook not configured".into()))?;

    let token = match headers.get("X-Gitlab-Token").and_then(|h| h.to_str().ok()) {
        Some(t) => t,
        None => {
            record_rejected_delivery(&state, &q.app_id, "gitlab").await;
            return Err(AppError::Unauthorized("missing token".into()));
        }
    };

    if ingress::verify_gitlab(&webhook.secret, token).is_err() {
        record_rejected_delivery(&state, &q.app_id, "gitlab").await;
        return Err(AppError::Unauthorized("token mismatch".into()));
    }

    let payload: serde_json::Value = serde_json::from_slice(&body).map_err(|e| AppError::Validation(e.to_string()))?;
    let event = ingress::parse_gitlab_push(&payload);
    let branch = branch_for(&state, &q.app_id).await?;
    ingress::handle_delivery(&state.db, &state.orchestrator, &q.app_id, "gitlab", event, &branch)
        .await
        .map_err(|e| AppError::Internal(e.to_string()))
}

/// A rejected signature/token never reaches `ingress::handle_delivery`'s
/// normal call site, so record the `failed` delivery directly here (spec
/// §4.4: "any verification failure records a failed delivery"). Errors
/// from this are swallowed: the 401 we're about to return already reports
/// the real problem to the caller.
async fn record_rejected_delivery(state: &AppState, app_id: &str, provider: &str) {
    if let Err(e) = ingress::handle_delivery(&state.db, &state.orchestrator, app_id, provider, None, "").await {
        tracing::warn!(app_id = %app_id, provider = %provider, error = %e, "failed to record rejected webhook delivery");
    }
}

async fn branch_for(state: &AppState, app_id: &str) -> AppResult<String> {
    let row: Option<(Option<String>,)> = sqlx::query_as("SELECT git_branch FROM applications WHERE id = ?")
        .bind(app_id)
        .fetch_optional(&state.db)
        .await?;
    Ok(row.and_then(|(b,)| b).unwrap_or_else(|| "main".to_string()))
}
