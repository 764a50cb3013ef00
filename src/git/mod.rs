//! Git Adapter (spec §2 component E, §4.1 state `cloning`).
//!
//! Shells out to the `git` binary via `tokio::process::Command`, grounded
//! on the teacher's `engine::pipeline::clone_repository`/`clone_with_ssh_key`.
//! Keypair generation shells out to `ssh-keygen` in the same idiom rather
//! than pulling in an RSA crate the teacher never reaches for.

use anyhow::{Context, Result};
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;

pub struct CommitInfo {
    pub sha: String,
    pub message: String,
}

pub fn is_ssh_url(url: &str) -> bool {
    url.starts_with("git@") || url.starts_with("ssh://")
}

/// Clone `branch` of `url` into `dest` (shallow). If `ssh_private_key` is
/// set and the URL is an SSH URL, authenticate with it.
pub async fn clone(url: &str, branch: &str, dest: &Path, ssh_private_key: Option<&str>) -> Result<()> {
    tokio::fs::create_dir_all(dest).await?;

    if let Some(key) = ssh_private_key {
        if is_ssh_url(url) {
            return clone_with_ssh_key(url, branch, dest, key).await;
        }
    }

    let output = Command::new("git")
        .args(["clone", "--depth", "1", "--branch", branch, url, &dest.to_string_lossy()])
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .context("failed to execute git clone")?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        anyhow::bail!("git clone failed: {stderr}");
    }
    Ok(())
}

async fn clone_with_ssh_key(url: &str, branch: &str, dest: &Path, private_key: &str) -> Result<()> {
    let temp_dir = std::env::temp_dir();
    let key_file = temp_dir.join(format!("ployer-ssh-{}", uuid::Uuid::new_v4()));

    tokio::fs::write(&key_file, private_key).await?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = tokio::fs::metadata(&key_file).await?.permissions();
        perms.set_mode(0o600);
        tokio::fs::set_permissions(&key_file, perms).await?;
    }

    let git_ssh_command = format!(
        "ssh -i {} -o StrictHostKeyChecking=accept-new -o UserKnownHostsFile=/dev/null",
        key_file.display()
    );

    let output = Command::new("git")
        .env("GIT_SSH_COMMAND", &git_ssh_command)
        .args(["clone", "--depth", "1", "--branch", branch, url, &dest.to_string_lossy()])
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .context("failed to execute git clone with SSH key");

    let _ = tokio::fs::remove_file(&key_file).await;
    let output = output?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        anyhow::bail!("git clone with SSH failed: {stderr}");
    }
    Ok(())
}

/// Fetch and fast-forward `branch` in an existing clone at `dest`.
pub async fn fetch_fast_forward(dest: &Path, branch: &str) -> Result<()> {
    let fetch = Command::new("git")
        .current_dir(dest)
        .args(["fetch", "origin", branch])
        .output()
        .await
        .context("failed to execute git fetch")?;
    if !fetch.status.success() {
        anyhow::bail!("git fetch failed: {}", String::from_utf8_lossy(&fetch.stderr));
    }

    let merge = Command::new("git")
        .current_dir(dest)
        .args(["merge", "--ff-only", &format!("origin/{branch}")])
        .output()
        .await
        .context("failed to execute git merge")?;
    if !merge.status.success() {
        anyhow::bail!("git fast-forward failed: {}", String::from_utf8_lossy(&merge.stderr));
    }
    Ok(())
}

/// Read HEAD's commit id and message from a clone at `dest`.
pub async fn head_commit(dest: &Path) -> Result<CommitInfo> {
    let output = Command::new("git")
        .current_dir(dest)
        .args(["log", "-1", "--format=%H%x1f%s"])
        .output()
        .await
        .context("failed to execute git log")?;

    if !output.status.success() {
        anyhow::bail!("git log failed: {}", String::from_utf8_lossy(&output.stderr));
    }

    let raw = String::from_utf8_lossy(&output.stdout);
    let mut parts = raw.trim().splitn(2, '\u{1f}');
    let sha = parts.next().unwrap_or_default().to_string();
    let message = parts.next().unwrap_or_default().to_string();
    Ok(CommitInfo { sha, message })
}

pub struct GeneratedKeyPair {
    pub public_key: String,
    pub private_key: String,
}

/// Generate a fresh RSA keypair for a DeployKey (spec §3/§6.1).
pub async fn generate_keypair(label: &str) -> Result<GeneratedKeyPair> {
    let temp_dir = std::env::temp_dir();
    let key_path = temp_dir.join(format!("ployer-keygen-{}", uuid::Uuid::new_v4()));

    let output = Command::new("ssh-keygen")
        .args([
            "-t",
            "rsa",
            "-b",
            "4096",
            "-f",
            &key_path.to_string_lossy(),
            "-N",
            "",
            "-C",
            label,
            "-q",
        ])
        .output()
        .await
        .context("failed to execute ssh-keygen")?;

    if !output.status.success() {
        anyhow::bail!("ssh-keygen failed: {}", String::from_utf8_lossy(&output.stderr));
    }

    let private_key = tokio::fs::read_to_string(&key_path).await?;
    let public_key = tokio::fs::read_to_string(key_path.with_extension("pub")).await?;

    let _ = tokio::fs::remove_file(&key_path).await;
    let _ = tokio::fs::remove_file(key_path.with_extension("pub")).await;

    Ok(GeneratedKeyPair {
        public_key: public_key.trim().to_string(),
        private_key,
    })
}
