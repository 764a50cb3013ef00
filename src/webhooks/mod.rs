//! Webhook Ingress (spec §2 component J, §4.4, §6.2).
//!
//! GitHub HMAC-SHA256 and GitLab shared-token verification, grounded on
//! the teacher's `api::webhooks` signature-checking pattern (Gitea
//! dropped, not named by the spec).

use crate::db::{DbPool, DeploymentTrigger};
use crate::orchestrator::Orchestrator;
use anyhow::Result;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::sync::Arc;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug)]
pub enum VerifyError {
    BadSignature,
    MissingSecret,
}

pub fn verify_github(body: &[u8], secret: &str, signature_header: &str) -> Result<(), VerifyError> {
    let hex_sig = signature_header.strip_prefix("sha256=").ok_or(VerifyError::BadSignature)?;
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| VerifyError::MissingSecret)?;
    mac.update(body);
    let expected = hex::encode(mac.finalize().into_bytes());
    if expected.as_bytes().ct_eq(hex_sig.as_bytes()).into() {
        Ok(())
    } else {
        Err(VerifyError::BadSignature)
    }
}

pub fn verify_gitlab(secret: &str, token_header: &str) -> Result<(), VerifyError> {
    if secret.as_bytes().ct_eq(token_header.as_bytes()).into() {
        Ok(())
    } else {
        Err(VerifyError::BadSignature)
    }
}

pub struct PushEvent {
    pub branch: String,
    pub commit_sha: Option<String>,
    pub commit_message: Option<String>,
    pub author: Option<String>,
}

pub fn parse_github_push(body: &serde_json::Value) -> Option<PushEvent> {
    let branch = body.get("ref")?.as_str()?.strip_prefix("refs/heads/")?.to_string();
    let head_commit = body.get("head_commit");
    Some(PushEvent {
        branch,
        commit_sha: head_commit.and_then(|c| c.get("id")).and_then(|v| v.as_str()).map(String::from),
        commit_message: head_commit.and_then(|c| c.get("message")).and_then(|v| v.as_str()).map(String::from),
        author: head_commit
            .and_then(|c| c.get("author"))
            .and_then(|a| a.get("name"))
            .and_then(|v| v.as_str())
            .map(String::from),
    })
}

pub fn parse_gitlab_push(body: &serde_json::Value) -> Option<PushEvent> {
    let branch = body.get("ref")?.as_str()?.strip_prefix("refs/heads/")?.to_string();
    let first_commit = body.get("commits").and_then(|c| c.as_array()).and_then(|a| a.first());
    Some(PushEvent {
        branch,
        commit_sha: body.get("checkout_sha").and_then(|v| v.as_str()).map(String::from),
        commit_message: first_commit.and_then(|c| c.get("message")).and_then(|v| v.as_str()).map(String::from),
        author: first_commit
            .and_then(|c| c.get("author"))
            .and_then(|a| a.get("name"))
            .and_then(|v| v.as_str())
            .map(String::from),
    })
}

/// Record an ingress outcome (spec §4.4: append-only delivery log) and, on
/// a branch match, enqueue a deployment via G.
pub async fn handle_delivery(
    db: &DbPool,
    orchestrator: &Arc<Orchestrator>,
    app_id: &str,
    provider: &str,
    event: Option<PushEvent>,
    configured_branch: &str,
) -> Result<()> {
    let (status, deployment_id, branch, commit_sha, commit_message, author) = match event {
        None => ("failed".to_string(), None, None, None, None, None),
        Some(ev) if ev.branch != configured_branch => {
            ("skipped".to_string(), None, Some(ev.branch), ev.commit_sha, ev.commit_message, ev.author)
        }
        Some(ev) => {
            let deployment = orchestrator.enqueue(app_id, DeploymentTrigger::Webhook).await?;
            (
                "success".to_string(),
                Some(deployment.id),
                Some(ev.branch),
                ev.commit_sha,
                ev.commit_message,
                ev.author,
            )
        }
    };

    sqlx::query(
        "INSERT INTO webhook_deliveries (id, app_id, provider, event_type, branch, commit_sha, commit_message, author, status, deployment_id, delivered_at)
         VALUES (?, ?, ?, 'push', ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(uuid::Uuid::new_v4().to_string())
    .bind(app_id)
    .bind(provider)
    .bind(&branch)
    .bind(&commit_sha)
    .bind(&commit_message)
    .bind(&author)
    .bind(&status)
    .bind(&deployment_id)
    .bind(chrono::Utc::now().to_rfc3339())
    .execute(db)
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn github_signature_roundtrip() {
        let secret = "topsecret";
        let body = b"{\"ref\":\"refs/heads/main\"}";
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        let sig = format!("sha256={}", hex::encode(mac.finalize().into_bytes()));
        assert!(verify_github(body, secret, &sig).is_ok());
        assert!(verify_github(body, "wrong", &sig).is_err());
    }

    #[test]
    fn gitlab_token_equality() {
        assert!(verify_gitlab("abc123", "abc123").is_ok());
        assert!(verify_gitlab("abc123", "nope").is_err());
    }

    #[test]
    fn github_push_strips_branch_prefix() {
        let body = serde_json::json!({
            "ref": "refs/heads/main",
            "head_commit": { "id": "deadbeef", "message": "fix", "author": { "name": "a" } }
        });
        let event = parse_github_push(&body).unwrap();
        assert_eq!(event.branch, "main");
        assert_eq!(event.commit_sha.as_deref(), Some("deadbeef"));
    }

    #[test]
    fn gitlab_push_uses_checkout_sha() {
        let body = serde_json::json!({
            "ref": "refs/heads/develop",
            "checkout_sha": "cafebabe",
            "commits": [{ "message": "m", "author": { "name": "b" } }]
        });
        let event = parse_gitlab_push(&body).unwrap();
        assert_eq!(event.branch, "develop");
        assert_eq!(event.commit_sha.as_deref(), Some("cafebabe"));
    }

    #[test]
    fn gitlab_push_keeps_slashes_in_branch_name() {
        let body = serde_json::json!({
            "ref": "refs/heads/feature/login-page",
            "checkout_sha": "cafebabe",
            "commits": []
        });
        let event = parse_gitlab_push(&body).unwrap();
        assert_eq!(event.branch, "feature/login-page");
    }
}
