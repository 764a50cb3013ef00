//! Environment variable model (spec §3). Values are stored encrypted via
//! the Secret Box (§4.6), plaintext on the wire — mirrors the teacher's
//! `EnvVar`/`EnvVarResponse` split.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct EnvVar {
    pub id: String,
    pub app_id: String,
    pub key: String,
    /// Ciphertext as stored (see `crypto::encrypt`).
    pub value: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvVarResponse {
    pub id: String,
    pub app_id: String,
    pub key: String,
    pub value: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateEnvVarRequest {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateEnvVarRequest {
    pub value: String,
}
