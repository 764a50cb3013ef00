//! Deployment Orchestrator (spec §2 component G, §4.1).
//!
//! Generalizes the teacher's single global deployment `mpsc` (`engine::mod`)
//! into an explicit per-application FIFO: `enqueue` spawns a worker the
//! first time an app has work, later enqueues while that worker is busy
//! collapse into a single pending slot (spec §4.1: "only the newest needs
//! to run"). Pipeline stepping follows `engine::pipeline`'s state shape.

use crate::config::Config;
use crate::crypto;
use crate::db::{DbPool, Deployment, DeploymentStatus, DeploymentTrigger};
use crate::events::EventBus;
use crate::fleet::FleetController;
use crate::git;
use crate::health::probe_once;
use crate::runtime::{BuildContext, ContainerRuntime};
use anyhow::{bail, Context, Result};
use chrono::Utc;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

const BUILD_LOG_CAP: usize = 1024 * 1024;
const REDACTION_MARKER: &str = "...[earlier output truncated]...\n";

struct PendingJob {
    deployment_id: String,
}

struct AppQueue {
    active: AtomicBool,
    pending: Mutex<Option<PendingJob>>,
}

pub struct Orchestrator {
    db: DbPool,
    events: Arc<EventBus>,
    runtime: Arc<dyn ContainerRuntime>,
    fleet: Arc<FleetController>,
    config: Arc<Config>,
    queues: DashMap<String, Arc<AppQueue>>,
    cancel_flags: DashMap<String, Arc<AtomicBool>>,
}

impl Orchestrator {
    pub fn new(
        db: DbPool,
        events: Arc<EventBus>,
        runtime: Arc<dyn ContainerRuntime>,
        fleet: Arc<FleetController>,
        config: Arc<Config>,
    ) -> Arc<Self> {
        Arc::new(Self {
            db,
            events,
            runtime,
            fleet,
            config,
            queues: DashMap::new(),
            cancel_flags: DashMap::new(),
        })
    }

    fn queue_for(&self, app_id: &str) -> Arc<AppQueue> {
        self.queues
            .entry(app_id.to_string())
            .or_insert_with(|| {
                Arc::new(AppQueue {
                    active: AtomicBool::new(false),
                    pending: Mutex::new(None),
                })
            })
            .clone()
    }

    /// Create a new queued Deployment for `app_id` and schedule it (spec
    /// §4.1 contract). Returns the created row.
    pub async fn enqueue(self: &Arc<Self>, app_id: &str, trigger: DeploymentTrigger) -> Result<Deployment> {
        let app: (String, String) = sqlx::query_as("SELECT name, server_id FROM applications WHERE id = ?")
            .bind(app_id)
            .fetch_optional(&self.db)
            .await?
            .context("application not found")?;
        let (app_name, server_id) = app;

        let deployment_id = uuid::Uuid::new_v4().to_string();
        let image_tag = Deployment::image_tag_for(&app_name, &deployment_id);
        let now = Utc::now().to_rfc3339();

        sqlx::query(
            "INSERT INTO deployments (id, app_id, server_id, status, build_log, image_tag, trigger, started_at)
             VALUES (?, ?, ?, 'queued', '', ?, ?, ?)",
        )
        .bind(&deployment_id)
        .bind(app_id)
        .bind(&server_id)
        .bind(&image_tag)
        .bind(trigger.to_string())
        .bind(&now)
        .execute(&self.db)
        .await?;

        self.events.publish(
            format!("deployment:{deployment_id}"),
            serde_json::json!({ "status": "queued" }),
        );

        let queue = self.queue_for(app_id);
        if queue.active.swap(true, Ordering::SeqCst) {
            let mut pending = queue.pending.lock().await;
            if let Some(previous) = pending.take() {
                self.mark_terminal(&previous.deployment_id, DeploymentStatus::Cancelled, None).await?;
            }
            *pending = Some(PendingJob { deployment_id: deployment_id.clone() });
        } else {
            let this = self.clone();
            let app_id = app_id.to_string();
            let first = deployment_id.clone();
            tokio::spawn(async move { this.drain_queue(app_id, first).await });
        }

        sqlx::query_as("SELECT * FROM deployments WHERE id = ?")
            .bind(&deployment_id)
            .fetch_one(&self.db)
            .await
            .map_err(Into::into)
    }

    async fn drain_queue(self: Arc<Self>, app_id: String, first: String) {
        let mut current = first;
        loop {
            if let Err(e) = self.run_pipeline(&app_id, &current).await {
                tracing::error!(deployment_id = %current, error = %e, "deployment pipeline failed");
            }
            self.cancel_flags.remove(&current);

            let queue = self.queue_for(&app_id);
            let mut pending = queue.pending.lock().await;
            match pending.take() {
                Some(job) => {
                    drop(pending);
                    current = job.deployment_id;
                }
                None => {
                    queue.active.store(false, Ordering::SeqCst);
                    break;
                }
            }
        }
    }

    /// Cancel a deployment if it is still in a non-terminal pre-running
    /// state (spec §4.1 contract).
    pub async fn cancel(&self, deployment_id: &str) -> Result<()> {
        if let Some(flag) = self.cancel_flags.get(deployment_id) {
            flag.store(true, Ordering::SeqCst);
            return Ok(());
        }

        let status: Option<(String, String)> =
            sqlx::query_as("SELECT status, app_id FROM deployments WHERE id = ?")
                .bind(deployment_id)
                .fetch_optional(&self.db)
                .await?;
        let Some((status, app_id)) = status else {
            bail!("deployment not found");
        };
        let status = DeploymentStatus::from(status);
        if status != DeploymentStatus::Queued {
            bail!("deployment is not cancellable from state {status}");
        }

        let queue = self.queue_for(&app_id);
        let mut pending = queue.pending.lock().await;
        if pending.as_ref().map(|j| j.deployment_id.as_str()) == Some(deployment_id) {
            *pending = None;
            drop(pending);
            self.mark_terminal(deployment_id, DeploymentStatus::Cancelled, None).await?;
            Ok(())
        } else {
            bail!("deployment already started")
        }
    }

    fn is_cancelled(&self, deployment_id: &str) -> bool {
        self.cancel_flags
            .get(deployment_id)
            .map(|f| f.load(Ordering::SeqCst))
            .unwrap_or(false)
    }

    async fn set_status(&self, deployment_id: &str, status: DeploymentStatus) -> Result<()> {
        sqlx::query("UPDATE deployments SET status = ? WHERE id = ?")
            .bind(status.to_string())
            .bind(deployment_id)
            .execute(&self.db)
            .await?;
        self.events.publish(
            format!("deployment:{deployment_id}"),
            serde_json::json!({ "status": status.to_string() }),
        );
        Ok(())
    }

    async fn mark_terminal(&self, deployment_id: &str, status: DeploymentStatus, error: Option<&str>) -> Result<()> {
        sqlx::query("UPDATE deployments SET status = ?, error_message = ?, finished_at = ? WHERE id = ?")
            .bind(status.to_string())
            .bind(error)
            .bind(Utc::now().to_rfc3339())
            .bind(deployment_id)
            .execute(&self.db)
            .await?;
        self.events.publish(
            format!("deployment:{deployment_id}"),
            serde_json::json!({ "status": status.to_string(), "error": error }),
        );
        Ok(())
    }

    /// Append a line to `build_log`, capping at ~1 MiB with a redaction
    /// marker for dropped history (spec §4.1 "Build log discipline").
    async fn append_log_line(&self, deployment_id: &str, line: &str) -> Result<()> {
        let current: Option<(String,)> = sqlx::query_as("SELECT build_log FROM deployments WHERE id = ?")
            .bind(deployment_id)
            .fetch_optional(&self.db)
            .await?;
        let mut log = current.map(|(l,)| l).unwrap_or_default();
        log.push_str(line);
        log.push('\n');
        if log.len() > BUILD_LOG_CAP {
            let keep_from = log.len() - BUILD_LOG_CAP + REDACTION_MARKER.len();
            let boundary = log
                .char_indices()
                .find(|&(i, _)| i >= keep_from)
                .map(|(i, _)| i)
                .unwrap_or(log.len());
            log = format!("{REDACTION_MARKER}{}", &log[boundary..]);
        }
        sqlx::query("UPDATE deployments SET build_log = ? WHERE id = ?")
            .bind(&log)
            .bind(deployment_id)
            .execute(&self.db)
            .await?;
        self.events.publish(
            format!("deployment:{deployment_id}"),
            serde_json::json!({ "log_line": line }),
        );
        Ok(())
    }

    async fn run_pipeline(&self, app_id: &str, deployment_id: &str) -> Result<()> {
        self.cancel_flags.insert(deployment_id.to_string(), Arc::new(AtomicBool::new(false)));

        let app: crate::db::Application = sqlx::query_as("SELECT * FROM applications WHERE id = ?")
            .bind(app_id)
            .fetch_one(&self.db)
            .await?;

        // --- cloning ---
        self.set_status(deployment_id, DeploymentStatus::Cloning).await?;
        let work_dir = std::path::PathBuf::from(&self.config.server.data_dir)
            .join("work")
            .join(deployment_id);

        if let Some(git_url) = &app.git_url {
            let branch = app.git_branch.clone().unwrap_or_else(|| "main".to_string());
            let key: Option<(String,)> = sqlx::query_as("SELECT private_key FROM deploy_keys WHERE app_id = ?")
                .bind(app_id)
                .fetch_optional(&self.db)
                .await?;
            let root_key = crypto::derive_key(&self.config.auth.jwt_secret);
            let ssh_key = match key {
                Some((ciphertext,)) => Some(crypto::decrypt_if_encrypted(&ciphertext, Some(&root_key))?),
                None => None,
            };

            git::clone(git_url, &branch, &work_dir, ssh_key.as_deref()).await?;
            let commit = git::head_commit(&work_dir).await?;

            sqlx::query("UPDATE deployments SET commit_sha = ?, commit_message = ? WHERE id = ?")
                .bind(&commit.sha)
                .bind(&commit.message)
                .bind(deployment_id)
                .execute(&self.db)
                .await?;
        } else {
            tokio::fs::create_dir_all(&work_dir).await?;
        }

        if self.is_cancelled(deployment_id) {
            return self.cleanup_cancelled(deployment_id, &work_dir, None).await;
        }

        // --- building ---
        self.set_status(deployment_id, DeploymentStatus::Building).await?;
        let image_tag: (String,) = sqlx::query_as("SELECT image_tag FROM deployments WHERE id = ?")
            .bind(deployment_id)
            .fetch_one(&self.db)
            .await?;
        let path = work_dir.to_string_lossy().to_string();
        let ctx = match app.build_strategy_enum() {
            crate::db::BuildStrategy::Dockerfile => BuildContext::Dockerfile {
                dockerfile: app.dockerfile_path.clone().unwrap_or_else(|| "Dockerfile".to_string()),
                path,
                tag: image_tag.0.clone(),
            },
            crate::db::BuildStrategy::Nixpacks => BuildContext::Nixpacks { path, tag: image_tag.0.clone() },
            crate::db::BuildStrategy::DockerCompose => {
                let service = resolve_compose_service(&work_dir)?;
                BuildContext::DockerCompose {
                    dockerfile: service.dockerfile,
                    path: service.context,
                    tag: image_tag.0.clone(),
                    service: service.name,
                }
            }
        };

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<String>();
        let mut on_log = move |line: String| {
            let _ = tx.send(line);
        };
        let build_task = self.runtime.build(&ctx, &mut on_log);

        let logger = async {
            while let Some(line) = rx.recv().await {
                let _ = self.append_log_line(deployment_id, &line).await;
            }
        };

        let (build_result, ()) = tokio::join!(build_task, logger);
        build_result.context("image build failed")?;

        if self.is_cancelled(deployment_id) {
            return self.cleanup_cancelled(deployment_id, &work_dir, None).await;
        }

        // --- deploying ---
        self.set_status(deployment_id, DeploymentStatus::Deploying).await?;

        let env_rows: Vec<(String, String)> = sqlx::query_as("SELECT key, value FROM environment_variables WHERE app_id = ?")
            .bind(app_id)
            .fetch_all(&self.db)
            .await?;
        let root_key = crypto::derive_key(&self.config.auth.jwt_secret);
        let mut env = HashMap::new();
        for (key, ciphertext) in env_rows {
            env.insert(key, crypto::decrypt_if_encrypted(&ciphertext, Some(&root_key))?);
        }

        let domain_rows: Vec<(String,)> = sqlx::query_as("SELECT hostname FROM domains WHERE app_id = ?")
            .bind(app_id)
            .fetch_all(&self.db)
            .await?;
        let hostnames: Vec<String> = domain_rows.into_iter().map(|(h,)| h).collect();

        let container_port = app.port.map(|p| p as u16);
        let health_check: Option<crate::db::HealthCheck> =
            sqlx::query_as("SELECT * FROM health_checks WHERE app_id = ?")
                .bind(app_id)
                .fetch_optional(&self.db)
                .await?;

        let startup_grace = self.config.timeouts.startup_grace_secs;
        let proxy_client = reqwest::Client::new();
        let health_check_clone = health_check.clone();
        let roll_result = self
            .fleet
            .roll(
                app_id,
                &app.name,
                deployment_id,
                &hostnames,
                &image_tag.0,
                env,
                container_port,
                move |host_port| async move {
                    tokio::time::sleep(std::time::Duration::from_secs(startup_grace)).await;
                    let Some(port) = host_port else { return Ok(()) };
                    match health_check_clone {
                        Some(check) => {
                            let threshold = check.healthy_threshold.max(1);
                            let mut consec_ok = 0;
                            for _ in 0..(threshold * 3).max(3) {
                                let (status, ..) = probe_once(&proxy_client, port, &check).await;
                                if status == crate::db::ProbeStatus::Healthy {
                                    consec_ok += 1;
                                    if consec_ok >= threshold {
                                        return Ok(());
                                    }
                                } else {
                                    consec_ok = 0;
                                }
                                tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                            }
                            bail!("health gate failed: threshold not reached")
                        }
                        None => Ok(()),
                    }
                },
            )
            .await;

        let (container_id, host_port) = match roll_result {
            Ok(v) => v,
            Err(e) => {
                self.mark_terminal(deployment_id, DeploymentStatus::Failed, Some(&e.to_string())).await?;
                let _ = tokio::fs::remove_dir_all(&work_dir).await;
                return Err(e);
            }
        };

        sqlx::query("UPDATE deployments SET container_id = ?, host_port = ? WHERE id = ?")
            .bind(&container_id)
            .bind(host_port.map(|p| p as i64))
            .bind(deployment_id)
            .execute(&self.db)
            .await?;

        // --- running ---
        if hostnames.is_empty() {
            let hostname = format!("{}.{}", app.name, self.config.server.base_domain);
            let now = Utc::now().to_rfc3339();
            sqlx::query(
                "INSERT INTO domains (id, app_id, hostname, is_primary, ssl_active, created_at) VALUES (?, ?, ?, 1, 0, ?)",
            )
            .bind(uuid::Uuid::new_v4().to_string())
            .bind(app_id)
            .bind(&hostname)
            .bind(&now)
            .execute(&self.db)
            .await?;
        }

        sqlx::query("UPDATE applications SET status = 'running' WHERE id = ?")
            .bind(app_id)
            .execute(&self.db)
            .await?;

        // Demote any previously-running deployment for this app so the
        // reconciler and health monitor's `WHERE status = 'running'`
        // queries see exactly one authoritative row per app (spec §3).
        sqlx::query("UPDATE deployments SET status = 'superseded' WHERE app_id = ? AND status = 'running' AND id != ?")
            .bind(app_id)
            .bind(deployment_id)
            .execute(&self.db)
            .await?;

        self.mark_terminal(deployment_id, DeploymentStatus::Running, None).await?;
        let _ = tokio::fs::remove_dir_all(&work_dir).await;
        Ok(())
    }

    async fn cleanup_cancelled(&self, deployment_id: &str, work_dir: &std::path::Path, container_id: Option<&str>) -> Result<()> {
        if let Some(id) = container_id {
            let _ = self.runtime.stop(id).await;
            let _ = self.runtime.remove(id).await;
        }
        let _ = tokio::fs::remove_dir_all(work_dir).await;
        self.mark_terminal(deployment_id, DeploymentStatus::Cancelled, None).await
    }
}

struct ComposeService {
    name: String,
    /// Build context directory, resolved relative to the compose file.
    context: String,
    dockerfile: String,
}

const COMPOSE_FILENAMES: &[&str] = &["docker-compose.yml", "docker-compose.yaml", "compose.yml", "compose.yaml"];

/// Parse site (spec §4.1 "building", SPEC_FULL §11.1): locate the compose
/// file in `work_dir` and pick the application service to build.
fn resolve_compose_service(work_dir: &std::path::Path) -> Result<ComposeService> {
    let compose_path = COMPOSE_FILENAMES
        .iter()
        .map(|name| work_dir.join(name))
        .find(|p| p.exists())
        .context("no docker-compose file found in repository root")?;

    let raw = std::fs::read_to_string(&compose_path).context("reading docker-compose file")?;
    let doc: serde_yaml::Value = serde_yaml::from_str(&raw).context("parsing docker-compose file")?;
    let services = doc
        .get("services")
        .and_then(|v| v.as_mapping())
        .context("docker-compose file has no 'services' mapping")?;

    // Tie-break (documented per SPEC_FULL §11.1): a compose file can define
    // several services with no single one marked as "the app". We build the
    // first service (in file order) that declares a port mapping, since
    // that's the one meant to receive traffic; the rest are treated as
    // supporting services (databases, caches) this orchestrator doesn't
    // build or run itself.
    for (key, value) in services {
        let has_ports = value
            .get("ports")
            .and_then(|p| p.as_sequence())
            .map(|seq| !seq.is_empty())
            .unwrap_or(false);
        if !has_ports {
            continue;
        }
        let name = key.as_str().unwrap_or_default().to_string();
        let build = value.get("build");
        let (context, dockerfile) = match build {
            Some(serde_yaml::Value::String(ctx)) => (ctx.clone(), "Dockerfile".to_string()),
            Some(serde_yaml::Value::Mapping(map)) => {
                let ctx = map
                    .get(serde_yaml::Value::String("context".to_string()))
                    .and_then(|v| v.as_str())
                    .unwrap_or(".")
                    .to_string();
                let dockerfile = map
                    .get(serde_yaml::Value::String("dockerfile".to_string()))
                    .and_then(|v| v.as_str())
                    .unwrap_or("Dockerfile")
                    .to_string();
                (ctx, dockerfile)
            }
            _ => bail!("compose service '{name}' has no 'build' section to build from"),
        };

        let context_dir = work_dir.join(&context).to_string_lossy().to_string();
        return Ok(ComposeService { name, context: context_dir, dockerfile });
    }

    bail!("no compose service with a port mapping found (expected exactly one application service)")
}

#[cfg(test)]
mod compose_tests {
    use super::resolve_compose_service;

    fn write_compose(dir: &std::path::Path, contents: &str) {
        std::fs::write(dir.join("docker-compose.yml"), contents).unwrap();
    }

    #[test]
    fn picks_first_service_with_ports() {
        let dir = std::env::temp_dir().join(format!("ployer-compose-test-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        write_compose(
            &dir,
            r#"
services:
  db:
    image: postgres:16
  web:
    build:
      context: ./web
      dockerfile: Dockerfile.web
    ports:
      - "3000:3000"
  worker:
    build: ./worker
    ports:
      - "4000:4000"
"#,
        );

        let service = resolve_compose_service(&dir).unwrap();
        assert_eq!(service.name, "web");
        assert_eq!(service.dockerfile, "Dockerfile.web");
        assert!(service.context.ends_with("web"));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn errors_when_no_service_has_ports() {
        let dir = std::env::temp_dir().join(format!("ployer-compose-test-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        write_compose(
            &dir,
            r#"
services:
  db:
    image: postgres:16
"#,
        );

        assert!(resolve_compose_service(&dir).is_err());
        std::fs::remove_dir_all(&dir).ok();
    }
}
