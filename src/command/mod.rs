//! Command Gateway (§4.4): safety-bounded command execution inside a
//! running container, plus a fixed registry of `/`-prefixed shortcuts.
//!
//! Grounded in the teacher's exec plumbing (`runtime::docker`'s
//! `create_exec`/`start_exec`), generalized with the allow-list and
//! shortcut dispatch spec.md requires and the teacher's generic terminal
//! access did not have.

use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::error::CoreError;
use crate::runtime::{container_name, ContainerEngine, ExecOutput};

/// §4.4: "read-oriented and common runtime CLIs".
const ALLOWED_COMMANDS: &[&str] = &[
    "ls", "cat", "pwd", "echo", "env", "whoami", "df", "du", "ps", "top", "head", "tail", "grep",
    "find", "wc", "date", "uptime", "which", "printenv", "hostname", "uname", "id", "free",
    "stat", "file", "sort", "uniq", "tr", "cut", "awk", "sed", "less", "more", "mkdir", "touch",
    "cp", "mv", "cd", "npm", "node", "python", "pip", "curl", "wget",
];

const EXEC_TIMEOUT: Duration = Duration::from_secs(30);

pub struct CommandGateway {
    engine: Arc<dyn ContainerEngine>,
    container_prefix: String,
}

impl CommandGateway {
    pub fn new(engine: Arc<dyn ContainerEngine>, container_prefix: impl Into<String>) -> Self {
        Self {
            engine,
            container_prefix: container_prefix.into(),
        }
    }

    /// `Execute(containerName, commandString)` — §4.4.
    ///
    /// `container_hint` is the project's container name (`<prefix>-<slug>`);
    /// resolution falls back to matching a running container by image
    /// identity when the exact name isn't found.
    pub async fn execute(
        &self,
        container_hint: &str,
        command: &str,
    ) -> Result<ExecOutput, CoreError> {
        let first_token = command
            .split_whitespace()
            .next()
            .ok_or_else(|| CoreError::Validation("empty command".to_string()))?;

        if !ALLOWED_COMMANDS.contains(&first_token) {
            return Err(CoreError::Validation(format!(
                "command '{first_token}' is not allow-listed; permitted commands: {}",
                ALLOWED_COMMANDS.join(" ")
            )));
        }

        let container = self.resolve_container(container_hint).await?;
        self.engine
            .exec(
                &container,
                vec!["/bin/sh".to_string(), "-c".to_string(), command.to_string()],
                EXEC_TIMEOUT,
            )
            .await
    }

    /// `ExecuteShortcut(containerName, commandString)` — §4.4. `command`
    /// includes the leading `/`.
    pub async fn execute_shortcut(
        &self,
        container_hint: &str,
        command: &str,
    ) -> Result<ExecOutput, CoreError> {
        match Shortcut::lookup(command) {
            Some(Shortcut::Help) => Ok(ExecOutput {
                stdout: Shortcut::help_text(),
                stderr: String::new(),
                exit_code: 0,
            }),
            Some(Shortcut::ShowLogs) => {
                let container = self.resolve_container(container_hint).await?;
                let logs = self.engine.logs(&container, 500).await?;
                Ok(ExecOutput { stdout: logs, stderr: String::new(), exit_code: 0 })
            }
            Some(Shortcut::TailLogs) => {
                let container = self.resolve_container(container_hint).await?;
                let logs = self.engine.logs(&container, 100).await?;
                Ok(ExecOutput { stdout: logs, stderr: String::new(), exit_code: 0 })
            }
            Some(Shortcut::Env) => {
                let container = self.resolve_container(container_hint).await?;
                self.engine
                    .exec(
                        &container,
                        vec!["/bin/sh".to_string(), "-c".to_string(), "env | sort".to_string()],
                        EXEC_TIMEOUT,
                    )
                    .await
            }
            Some(Shortcut::Files) => {
                let container = self.resolve_container(container_hint).await?;
                self.engine
                    .exec(
                        &container,
                        vec!["/bin/sh".to_string(), "-c".to_string(), "ls -la".to_string()],
                        EXEC_TIMEOUT,
                    )
                    .await
            }
            None => Err(CoreError::Validation(format!(
                "unknown shortcut '{command}'; try /help"
            ))),
        }
    }

    /// §4.4 container resolution: try the exact name first, then fall back
    /// to matching a running container whose image equals
    /// `<prefix>/<slug>:latest`, where `slug` is `container_hint` with its
    /// `<prefix>-` separator stripped.
    async fn resolve_container(&self, container_hint: &str) -> Result<String, CoreError> {
        if self.engine.inspect_running(container_hint).await? {
            return Ok(container_hint.to_string());
        }

        let slug = container_hint
            .strip_prefix(&format!("{}-", self.container_prefix))
            .unwrap_or(container_hint);
        let image = crate::runtime::image_tag(&self.container_prefix, slug);

        match self.engine.find_container_by_image(&image).await? {
            Some(id) => Ok(id),
            None => {
                warn!(container_hint, image, "no running container found");
                Err(CoreError::NotFound(format!(
                    "no running container for '{container_hint}' (expected image {image})"
                )))
            }
        }
    }

    /// Derives the project's container name the way the HTTP adapter does
    /// (§6): `<prefix>-<slug>`.
    pub fn container_name_for_slug(&self, slug: &str) -> String {
        container_name(&self.container_prefix, slug)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Shortcut {
    ShowLogs,
    TailLogs,
    Env,
    Files,
    Help,
}

impl Shortcut {
    fn lookup(command: &str) -> Option<Self> {
        let name = command.split_whitespace().next()?;
        match name {
            "/show-logs" => Some(Self::ShowLogs),
            "/tail-logs" => Some(Self::TailLogs),
            "/env" => Some(Self::Env),
            "/files" => Some(Self::Files),
            "/help" => Some(Self::Help),
            _ => None,
        }
    }

    /// §4.4: "/help (formatted listing of all shortcuts)". Does not touch
    /// the container.
    fn help_text() -> String {
        [
            "/show-logs  tail the last 500 lines of container logs",
            "/tail-logs  tail the last 100 lines of container logs",
            "/env        list environment variables, sorted",
            "/files      list files in the working directory",
            "/help       show this message",
        ]
        .join("\n")
    }
}
