//! Bollard-based Docker adapter, trimmed and retargeted from the teacher's
//! `runtime::docker::DockerRuntime`.

use anyhow::{Context, Result};
use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, ListContainersOptions, LogOutput, LogsOptions,
    RemoveContainerOptions, StatsOptions, StopContainerOptions,
};
use bollard::image::BuildImageOptions;
use bollard::Docker;
use bytes::Bytes;
use futures::StreamExt;
use std::collections::HashMap;

use super::{BuildContext, ContainerInfo, ContainerRuntime, ContainerStats, LogStream, RunConfig};

pub struct DockerRuntime {
    client: Docker,
}

impl DockerRuntime {
    pub fn new(socket: &str) -> Result<Self> {
        let client = if cfg!(windows) || socket.starts_with("npipe://") || socket.starts_with("tcp://") {
            Docker::connect_with_local_defaults()?
        } else {
            Docker::connect_with_socket(socket, 120, bollard::API_DEFAULT_VERSION)?
        };
        Ok(Self { client })
    }

    fn container_info_from_inspect(info: bollard::models::ContainerInspectResponse) -> ContainerInfo {
        let host_port = info
            .network_settings
            .as_ref()
            .and_then(|ns| ns.ports.as_ref())
            .and_then(|ports| {
                ports.values().next().and_then(|bindings| {
                    bindings.as_ref().and_then(|b| {
                        b.first()
                            .and_then(|p| p.host_port.as_ref())
                            .and_then(|p| p.parse().ok())
                    })
                })
            });
        let running = info.state.as_ref().and_then(|s| s.running).unwrap_or(false);
        let app_id = info
            .config
            .as_ref()
            .and_then(|c| c.labels.as_ref())
            .and_then(|l| l.get("ployer.app_id"))
            .cloned();

        ContainerInfo {
            id: info.id.unwrap_or_default(),
            name: info.name.unwrap_or_default().trim_start_matches('/').to_string(),
            running,
            host_port,
            app_id,
        }
    }

    async fn build_from_dockerfile(
        &self,
        path: &str,
        dockerfile: &str,
        tag: &str,
        on_log: &mut (dyn FnMut(String) + Send),
    ) -> Result<String> {
        let tar_path = format!("{path}.tar");
        let tar_file = std::fs::File::create(&tar_path)?;
        let mut tar_builder = tar::Builder::new(tar_file);
        tar_builder.append_dir_all(".", path)?;
        tar_builder.finish()?;
        let tar_data = std::fs::read(&tar_path)?;
        std::fs::remove_file(&tar_path)?;

        let options = BuildImageOptions {
            dockerfile: dockerfile.trim_start_matches("./"),
            t: tag,
            rm: true,
            ..Default::default()
        };

        let mut stream = self.client.build_image(options, None, Some(Bytes::from(tar_data)));

        while let Some(result) = stream.next().await {
            match result {
                Ok(output) => {
                    if let Some(line) = output.stream {
                        on_log(line.trim_end().to_string());
                    }
                    if let Some(error) = output.error {
                        on_log(format!("ERR: {error}"));
                        anyhow::bail!("build error: {error}");
                    }
                }
                Err(e) => anyhow::bail!("build failed: {e}"),
            }
        }

        Ok(tag.to_string())
    }

    /// Shells out to the `nixpacks` CLI (teacher's `engine::nixpacks::build_image`
    /// idiom), streaming combined stdout/stderr through `on_log` as it arrives
    /// instead of buffering the whole output.
    async fn build_with_nixpacks(
        &self,
        path: &str,
        tag: &str,
        on_log: &mut (dyn FnMut(String) + Send),
    ) -> Result<String> {
        use tokio::io::{AsyncBufReadExt, BufReader};
        use tokio::process::Command;

        let mut child = Command::new("nixpacks")
            .arg("build")
            .arg(path)
            .arg("--name")
            .arg(tag)
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .spawn()
            .context("failed to spawn nixpacks (is it installed?)")?;

        let stdout = child.stdout.take().context("nixpacks stdout not piped")?;
        let stderr = child.stderr.take().context("nixpacks stderr not piped")?;
        let mut stdout_lines = BufReader::new(stdout).lines();
        let mut stderr_lines = BufReader::new(stderr).lines();

        loop {
            tokio::select! {
                line = stdout_lines.next_line() => {
                    match line? {
                        Some(line) => on_log(line),
                        None => break,
                    }
                }
                line = stderr_lines.next_line() => {
                    if let Some(line) = line? {
                        on_log(line);
                    }
                }
            }
        }
        while let Some(line) = stderr_lines.next_line().await? {
            on_log(line);
        }

        let status = child.wait().await.context("nixpacks process failed")?;
        if !status.success() {
            anyhow::bail!("nixpacks build failed with status {status}");
        }

        Ok(tag.to_string())
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    fn name(&self) -> &'static str {
        "Docker"
    }

    async fn build(&self, ctx: &BuildContext, on_log: &mut (dyn FnMut(String) + Send)) -> Result<String> {
        match ctx {
            BuildContext::Dockerfile { path, dockerfile, tag } => {
                self.build_from_dockerfile(path, dockerfile, tag, on_log).await
            }
            BuildContext::DockerCompose { path, dockerfile, tag, .. } => {
                self.build_from_dockerfile(path, dockerfile, tag, on_log).await
            }
            BuildContext::Nixpacks { path, tag } => self.build_with_nixpacks(path, tag, on_log).await,
        }
    }

    async fn run(&self, config: &RunConfig) -> Result<ContainerInfo> {
        let env: Vec<String> = config.env.iter().map(|(k, v)| format!("{k}={v}")).collect();

        let mut port_bindings: HashMap<String, Option<Vec<bollard::service::PortBinding>>> = HashMap::new();
        let mut exposed_ports: HashMap<String, HashMap<(), ()>> = HashMap::new();

        if let Some(mapping) = &config.port_mapping {
            let key = format!("{}/tcp", mapping.container_port);
            let host_port = if mapping.host_port == 0 {
                None
            } else {
                Some(mapping.host_port.to_string())
            };
            port_bindings.insert(
                key.clone(),
                Some(vec![bollard::service::PortBinding {
                    host_ip: Some("0.0.0.0".to_string()),
                    host_port,
                }]),
            );
            exposed_ports.insert(key, HashMap::new());
        }

        let mut labels = HashMap::new();
        labels.insert("ployer.app_id".to_string(), config.app_id.clone());

        let restart_policy = bollard::service::RestartPolicy {
            name: Some(bollard::service::RestartPolicyNameEnum::UNLESS_STOPPED),
            maximum_retry_count: None,
        };

        let host_config = bollard::service::HostConfig {
            port_bindings: Some(port_bindings),
            restart_policy: Some(restart_policy),
            ..Default::default()
        };

        let container_config = Config {
            image: Some(config.image.clone()),
            env: Some(env),
            exposed_ports: Some(exposed_ports),
            host_config: Some(host_config),
            labels: Some(labels),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: config.name.clone(),
            platform: None,
        };

        let response = self
            .client
            .create_container(Some(options), container_config)
            .await
            .context("failed to create container")?;

        self.client
            .start_container::<String>(&response.id, None)
            .await
            .context("failed to start container")?;

        self.inspect(&response.id).await
    }

    async fn start(&self, container_id: &str) -> Result<()> {
        self.client
            .start_container::<String>(container_id, None)
            .await
            .context("failed to start container")?;
        Ok(())
    }

    async fn stop(&self, container_id: &str) -> Result<()> {
        let options = StopContainerOptions { t: 10 };
        self.client
            .stop_container(container_id, Some(options))
            .await
            .context("failed to stop container")?;
        Ok(())
    }

    async fn remove(&self, container_id: &str) -> Result<()> {
        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };
        self.client
            .remove_container(container_id, Some(options))
            .await
            .context("failed to remove container")?;
        Ok(())
    }

    async fn inspect(&self, container_id: &str) -> Result<ContainerInfo> {
        let info = self
            .client
            .inspect_container(container_id, None)
            .await
            .context("failed to inspect container")?;
        Ok(Self::container_info_from_inspect(info))
    }

    async fn logs(&self, container_id: &str, tail: usize, follow: bool) -> Result<LogStream> {
        let options = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            follow,
            timestamps: false,
            tail: tail.to_string(),
            ..Default::default()
        };

        let stream = self.client.logs(container_id, Some(options));
        let mapped = stream.filter_map(|result| async move {
            match result {
                Ok(LogOutput::StdOut { message } | LogOutput::StdErr { message }) => {
                    Some(Ok(String::from_utf8_lossy(&message).trim_end().to_string()))
                }
                Ok(_) => None,
                Err(e) => Some(Err(anyhow::anyhow!("log stream error: {e}"))),
            }
        });
        Ok(Box::pin(mapped))
    }

    async fn stats(&self, container_id: &str) -> Result<ContainerStats> {
        let options = StatsOptions {
            stream: true,
            one_shot: false,
        };
        let mut stream = self.client.stats(container_id, Some(options));

        let first = stream
            .next()
            .await
            .context("no stats received for container")??;
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        let second = stream
            .next()
            .await
            .context("no second stats sample received")??;

        let cpu_delta =
            second.cpu_stats.cpu_usage.total_usage as f64 - first.cpu_stats.cpu_usage.total_usage as f64;
        let system_delta = second.cpu_stats.system_cpu_usage.unwrap_or(0) as f64
            - first.cpu_stats.system_cpu_usage.unwrap_or(0) as f64;
        let num_cpus = second
            .cpu_stats
            .online_cpus
            .or(second.cpu_stats.cpu_usage.percpu_usage.as_ref().map(|v| v.len() as u64))
            .unwrap_or(1) as f64;

        let cpu_percent = if system_delta > 0.0 && cpu_delta > 0.0 {
            (cpu_delta / system_delta) * num_cpus * 100.0
        } else {
            0.0
        };

        let memory_usage = second.memory_stats.usage.unwrap_or(0) as f64 / (1024.0 * 1024.0);
        let memory_limit = second.memory_stats.limit.filter(|l| *l > 0).map(|l| l as f64 / (1024.0 * 1024.0));

        let (rx, tx) = second
            .networks
            .as_ref()
            .map(|networks| {
                networks.values().fold((0f64, 0f64), |(rx, tx), n| {
                    (rx + n.rx_bytes as f64, tx + n.tx_bytes as f64)
                })
            })
            .unwrap_or((0.0, 0.0));

        Ok(ContainerStats {
            cpu_percent,
            memory_mb: memory_usage,
            memory_limit_mb: memory_limit,
            network_rx_mb: rx / (1024.0 * 1024.0),
            network_tx_mb: tx / (1024.0 * 1024.0),
        })
    }

    async fn list_labeled(&self) -> Result<Vec<ContainerInfo>> {
        let mut filters = HashMap::new();
        filters.insert("label".to_string(), vec!["ployer.app_id".to_string()]);

        let options = ListContainersOptions {
            all: true,
            filters,
            ..Default::default()
        };

        let summaries = self
            .client
            .list_containers(Some(options))
            .await
            .context("failed to list containers")?;

        let mut out = Vec::with_capacity(summaries.len());
        for summary in summaries {
            if let Some(id) = summary.id {
                out.push(self.inspect(&id).await?);
            }
        }
        Ok(out)
    }
}
