//! Unified error taxonomy for the orchestrator core.
//!
//! Every fallible operation at a component boundary returns `AppError`.
//! Internal plumbing (file I/O, process spawn) is free to use
//! `anyhow::Result` and convert at the boundary.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("validation: {0}")]
    Validation(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("upstream: {0}")]
    Upstream(String),

    #[error("crypto: {0}")]
    Crypto(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("cancelled")]
    Cancelled,

    #[error("internal: {0}")]
    Internal(String),
}

impl AppError {
    fn status(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::Timeout(_) | AppError::Cancelled => StatusCode::from_u16(499).unwrap(),
            AppError::Upstream(_) | AppError::Internal(_) | AppError::Crypto(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if matches!(self, AppError::Internal(_) | AppError::Upstream(_) | AppError::Crypto(_)) {
            tracing::error!(error = %self, "request failed");
        }
        let status = self.status();
        (status, Json(ErrorBody { error: self.to_string() })).into_response()
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => AppError::NotFound("resource not found".into()),
            sqlx::Error::Database(db_err) => {
                let msg = db_err.message();
                if msg.contains("UNIQUE constraint failed") {
                    AppError::Conflict("resource already exists".into())
                } else if msg.contains("FOREIGN KEY constraint failed") {
                    AppError::Validation("referenced resource does not exist".into())
                } else {
                    AppError::Internal(format!("database error: {msg}"))
                }
            }
            other => AppError::Internal(format!("database error: {other}")),
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

pub type AppResult<T> = Result<T, AppError>;
