//! `bollard`-backed implementation of [`ContainerEngine`] (§4.3).
//!
//! Grounded in the teacher's `runtime::docker::DockerRuntime`: same client
//! construction, same `tar`-the-context-then-`build_image` build path, same
//! `create_exec`/`start_exec` exec path. `bollard`'s `LogOutput` enum is
//! already the demultiplexed view of the engine's 8-byte-framed exec stream
//! (`StdOut`/`StdErr` variants), so the Command Gateway's demux boundary is
//! this enum rather than hand-rolled frame parsing.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use bollard::container::{
    Config as ContainerConfig, CreateContainerOptions, ListContainersOptions, LogOutput,
    LogsOptions, RemoveContainerOptions, StopContainerOptions,
};
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::image::BuildImageOptions;
use bollard::service::{HostConfig, PortBinding};
use bollard::Docker;
use bytes::Bytes;
use futures::StreamExt;
use tracing::{info, instrument, warn};

use super::{allocate_host_port, ContainerEngine, ExecOutput, ResourceLimits};
use crate::error::CoreError;

/// How many trailing build-output chunks are kept for a failure message
/// (§4.3: "Collects the last ~20 chunks of output").
const BUILD_LOG_TAIL: usize = 20;

pub struct DockerRuntime {
    client: Docker,
}

impl DockerRuntime {
    pub fn connect(socket: &str) -> anyhow::Result<Self> {
        let client = if cfg!(windows) || socket.starts_with("tcp://") {
            Docker::connect_with_local_defaults()?
        } else {
            Docker::connect_with_socket(socket, 120, bollard::API_DEFAULT_VERSION)?
        };
        Ok(Self { client })
    }
}

#[async_trait]
impl ContainerEngine for DockerRuntime {
    #[instrument(skip(self), fields(tag = %tag))]
    async fn build_image(
        &self,
        context_dir: &Path,
        tag: &str,
        framework: crate::db::Framework,
    ) -> Result<String, CoreError> {
        let tar_data = tar_context(context_dir)
            .map_err(|e| CoreError::BuildFailed(format!("packing build context: {e}")))?;

        let options = BuildImageOptions {
            dockerfile: "Dockerfile",
            t: tag,
            rm: true,
            ..Default::default()
        };

        let mut stream = self
            .client
            .build_image(options, None, Some(Bytes::from(tar_data)));

        let mut tail: std::collections::VecDeque<String> = std::collections::VecDeque::new();
        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(output) => {
                    if let Some(line) = output.stream {
                        push_tail(&mut tail, line.trim().to_string());
                    }
                    if let Some(error) = output.error {
                        push_tail(&mut tail, error.clone());
                        return Err(CoreError::BuildFailed(join_tail(&tail)));
                    }
                }
                Err(e) => {
                    push_tail(&mut tail, e.to_string());
                    return Err(CoreError::BuildFailed(join_tail(&tail)));
                }
            }
        }

        // §4.3: the stream can report success yet produce nothing.
        match self.client.inspect_image(tag).await {
            Ok(_) => Ok(tag.to_string()),
            Err(_) => Err(CoreError::ImageMissingAfterBuild(super::image_missing_hint(framework))),
        }
    }

    #[instrument(skip(self), fields(name = %name))]
    async fn replace_and_run(
        &self,
        image: &str,
        name: &str,
        internal_port: u16,
        limits: ResourceLimits,
    ) -> Result<u16, CoreError> {
        stop_and_remove_if_present(&self.client, name).await?;

        let host_port = allocate_host_port()?;

        let port_key = format!("{internal_port}/tcp");
        let mut exposed_ports = HashMap::new();
        exposed_ports.insert(port_key.clone(), HashMap::<(), ()>::new());

        let mut port_bindings = HashMap::new();
        port_bindings.insert(
            port_key,
            Some(vec![PortBinding {
                host_ip: Some("127.0.0.1".to_string()),
                host_port: Some(host_port.to_string()),
            }]),
        );

        let host_config = HostConfig {
            port_bindings: Some(port_bindings),
            memory: Some(limits.memory_limit_bytes as i64),
            cpu_shares: Some(limits.cpu_shares as i64),
            ..Default::default()
        };

        let container_config = ContainerConfig {
            image: Some(image.to_string()),
            exposed_ports: Some(exposed_ports),
            host_config: Some(host_config),
            ..Default::default()
        };

        let create_options = CreateContainerOptions {
            name,
            platform: None,
        };

        let created = self
            .client
            .create_container(Some(create_options), container_config)
            .await
            .map_err(|e| CoreError::RunFailed(format!("creating container {name}: {e}")))?;

        self.client
            .start_container::<String>(&created.id, None)
            .await
            .map_err(|e| CoreError::RunFailed(format!("starting container {name}: {e}")))?;

        info!(host_port, "container started");
        Ok(host_port)
    }

    async fn inspect_running(&self, name_or_id: &str) -> Result<bool, CoreError> {
        match self.client.inspect_container(name_or_id, None).await {
            Ok(info) => Ok(info.state.and_then(|s| s.running).unwrap_or(false)),
            Err(bollard::errors::Error::DockerResponseServerError { status_code: 404, .. }) => {
                Ok(false)
            }
            Err(e) => Err(CoreError::Internal(e.into())),
        }
    }

    #[instrument(skip(self, cmd))]
    async fn exec(
        &self,
        container: &str,
        cmd: Vec<String>,
        timeout: Duration,
    ) -> Result<ExecOutput, CoreError> {
        let run = async {
            let options = CreateExecOptions {
                attach_stdin: Some(false),
                attach_stdout: Some(true),
                attach_stderr: Some(true),
                tty: Some(false),
                cmd: Some(cmd),
                ..Default::default()
            };

            let exec = self
                .client
                .create_exec(container, options)
                .await
                .map_err(|e| CoreError::Internal(e.into()))?;

            let mut stdout = String::new();
            let mut stderr = String::new();

            match self
                .client
                .start_exec(&exec.id, None)
                .await
                .map_err(|e| CoreError::Internal(e.into()))?
            {
                StartExecResults::Attached { mut output, .. } => {
                    while let Some(chunk) = output.next().await {
                        match chunk.map_err(|e| CoreError::Internal(e.into()))? {
                            LogOutput::StdOut { message } => {
                                stdout.push_str(&String::from_utf8_lossy(&message))
                            }
                            LogOutput::StdErr { message } => {
                                stderr.push_str(&String::from_utf8_lossy(&message))
                            }
                            LogOutput::StdIn { .. } | LogOutput::Console { .. } => {}
                        }
                    }
                }
                StartExecResults::Detached => {
                    return Err(CoreError::Internal(anyhow::anyhow!(
                        "exec started detached, expected attached output"
                    )))
                }
            }

            // §4.4: if exit-code lookup fails, return buffers with -1 anyway.
            let exit_code = self
                .client
                .inspect_exec(&exec.id)
                .await
                .ok()
                .and_then(|i| i.exit_code)
                .unwrap_or(-1);

            Ok(ExecOutput {
                stdout,
                stderr,
                exit_code,
            })
        };

        match tokio::time::timeout(timeout, run).await {
            Ok(result) => result,
            Err(_) => {
                warn!(container, "exec timed out");
                Err(CoreError::Timeout(format!(
                    "command timed out after {}s",
                    timeout.as_secs()
                )))
            }
        }
    }

    async fn logs(&self, container: &str, tail_lines: u32) -> Result<String, CoreError> {
        let options = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            follow: false,
            timestamps: false,
            tail: tail_lines.to_string(),
            ..Default::default()
        };

        let mut stream = self.client.logs(container, Some(options));
        let mut out = String::new();
        while let Some(chunk) = stream.next().await {
            match chunk.map_err(|e| CoreError::Internal(e.into()))? {
                LogOutput::StdOut { message } | LogOutput::StdErr { message } => {
                    out.push_str(&String::from_utf8_lossy(&message));
                }
                _ => {}
            }
        }
        Ok(out)
    }

    async fn remove(&self, container: &str) -> Result<(), CoreError> {
        stop_and_remove_if_present(&self.client, container).await
    }

    async fn find_container_by_image(&self, image: &str) -> Result<Option<String>, CoreError> {
        let mut filters = HashMap::new();
        filters.insert("status".to_string(), vec!["running".to_string()]);
        let options = ListContainersOptions::<String> {
            all: false,
            filters,
            ..Default::default()
        };

        let containers = self
            .client
            .list_containers(Some(options))
            .await
            .map_err(|e| CoreError::Internal(e.into()))?;

        Ok(containers
            .into_iter()
            .find(|c| c.image.as_deref() == Some(image))
            .and_then(|c| c.id))
    }
}

async fn stop_and_remove_if_present(client: &Docker, name: &str) -> Result<(), CoreError> {
    match client.inspect_container(name, None).await {
        Ok(info) => {
            if info.state.and_then(|s| s.running).unwrap_or(false) {
                client
                    .stop_container(name, Some(StopContainerOptions { t: 10 }))
                    .await
                    .map_err(|e| CoreError::RunFailed(format!("stopping {name}: {e}")))?;
            }
            client
                .remove_container(
                    name,
                    Some(RemoveContainerOptions {
                        force: true,
                        ..Default::default()
                    }),
                )
                .await
                .map_err(|e| CoreError::RunFailed(format!("removing {name}: {e}")))?;
        }
        Err(bollard::errors::Error::DockerResponseServerError { status_code: 404, .. }) => {}
        Err(e) => return Err(CoreError::RunFailed(format!("inspecting {name}: {e}"))),
    }
    Ok(())
}

fn tar_context(dir: &Path) -> std::io::Result<Vec<u8>> {
    let mut bytes = Vec::new();
    {
        let mut builder = tar::Builder::new(&mut bytes);
        builder.append_dir_all(".", dir)?;
        builder.finish()?;
    }
    Ok(bytes)
}

fn push_tail(tail: &mut std::collections::VecDeque<String>, line: String) {
    if line.is_empty() {
        return;
    }
    if tail.len() == BUILD_LOG_TAIL {
        tail.pop_front();
    }
    tail.push_back(line);
}

fn join_tail(tail: &std::collections::VecDeque<String>) -> String {
    tail.iter().cloned().collect::<Vec<_>>().join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tail_buffer_keeps_only_last_20_lines() {
        let mut tail = std::collections::VecDeque::new();
        for i in 0..30 {
            push_tail(&mut tail, format!("line {i}"));
        }
        assert_eq!(tail.len(), BUILD_LOG_TAIL);
        assert_eq!(tail.front().unwrap(), "line 10");
        assert_eq!(tail.back().unwrap(), "line 29");
    }
}
