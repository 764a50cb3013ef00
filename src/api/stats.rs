use crate::db::ContainerStatsSample;
use crate::error::AppResult;
use crate::AppState;
use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::{Duration, Utc};
use serde::Deserialize;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
pub struct StatsQuery {
    hours: Option<i64>,
}

/// `GET /applications/{id}/stats?hours=N` (spec §6.1), default window 1h.
pub async fn get_stats(
    State(state): State<Arc<AppState>>,
    Path(app_id): Path<String>,
    Query(query): Query<StatsQuery>,
) -> AppResult<Json<Vec<ContainerStatsSample>>> {
    let since = (Utc::now() - Duration::hours(query.hours.unwrap_or(1).max(1))).to_rfc3339();
    let rows = sqlx::query_as(
        "SELECT * FROM container_stats WHERE app_id = ? AND recorded_at >= ? ORDER BY recorded_at ASC",
    )
    .bind(&app_id)
    .bind(&since)
    .fetch_all(&state.db)
    .await?;
    Ok(Json(rows))
}
