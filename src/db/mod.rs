mod models;

pub use models::*;

use anyhow::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteSynchronous};
use std::path::Path;
use std::str::FromStr;
use tracing::info;

pub type DbPool = sqlx::SqlitePool;

pub async fn init(db_path: &Path) -> Result<DbPool> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    info!(path = %db_path.display(), "initializing database");

    // `foreign_keys` is a per-connection pragma; setting it once against
    // the pool only affects whichever connection happens to run the
    // query, leaving the rest of the `max_connections(5)` pool without it
    // (spec §3 cascade-delete invariant needs every connection to have it).
    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))?
        .create_if_missing(true)
        .foreign_keys(true)
        .synchronous(SqliteSynchronous::Normal)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    run_migrations(&pool).await?;

    info!("database initialized");
    Ok(pool)
}

async fn run_migrations(pool: &DbPool) -> Result<()> {
    execute_sql(pool, include_str!("../../migrations/001_initial.sql")).await?;
    Ok(())
}

async fn execute_sql(pool: &DbPool, sql: &str) -> Result<()> {
    for statement in sql.split(';') {
        let cleaned: String = statement
            .lines()
            .filter(|line| !line.trim().starts_with("--"))
            .collect::<Vec<_>>()
            .join("\n");
        let trimmed = cleaned.trim();
        if !trimmed.is_empty() {
            sqlx::query(trimmed).execute(pool).await?;
        }
    }
    Ok(())
}

/// Ensure exactly one server is `is_local = true`, auto-registering it on
/// first boot. Spec §3 Server invariant.
pub async fn ensure_local_server(pool: &DbPool) -> Result<String> {
    let existing: Option<(String,)> =
        sqlx::query_as("SELECT id FROM servers WHERE is_local = 1")
            .fetch_optional(pool)
            .await?;
    if let Some((id,)) = existing {
        return Ok(id);
    }

    let id = uuid::Uuid::new_v4().to_string();
    let now = chrono::Utc::now().to_rfc3339();
    sqlx::query(
        "INSERT INTO servers (id, name, host, port, username, ssh_private_key, is_local, status, last_seen_at, created_at, updated_at)
         VALUES (?, 'local', '127.0.0.1', 0, '', NULL, 1, 'online', ?, ?, ?)",
    )
    .bind(&id)
    .bind(&now)
    .bind(&now)
    .bind(&now)
    .execute(pool)
    .await?;

    info!(server_id = %id, "auto-registered local server");
    Ok(id)
}
