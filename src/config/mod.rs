use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_api_port")]
    pub api_port: u16,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Root directory under which project working copies are checked out.
    #[serde(default = "default_projects_root")]
    pub projects_root: PathBuf,
    /// Base domain apps are routed under, e.g. "apps.example.com" produces
    /// subdomains like "my-app.apps.example.com" for the reverse proxy contract.
    #[serde(default = "default_subdomain_base")]
    pub subdomain_base: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            api_port: default_api_port(),
            data_dir: default_data_dir(),
            projects_root: default_projects_root(),
            subdomain_base: default_subdomain_base(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_api_port() -> u16 {
    8080
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_projects_root() -> PathBuf {
    PathBuf::from("./data/projects")
}

fn default_subdomain_base() -> String {
    "apps.local".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default = "default_docker_socket")]
    pub container_engine_socket: String,
    /// Directory the container engine itself stores image/layer data under.
    /// Informational only — the engine owns its own storage layout.
    #[serde(default = "default_docker_data_root")]
    pub docker_data_root: PathBuf,
    /// Per-container memory cap, in bytes. Default 512 MiB.
    #[serde(default = "default_memory_limit_bytes")]
    pub memory_limit_bytes: u64,
    /// Per-container relative CPU share. Default 1024 (Docker's baseline share).
    #[serde(default = "default_cpu_shares")]
    pub cpu_shares: u32,
    /// Prefix applied to every container/image name this core creates.
    #[serde(default = "default_container_prefix")]
    pub container_prefix: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            container_engine_socket: default_docker_socket(),
            docker_data_root: default_docker_data_root(),
            memory_limit_bytes: default_memory_limit_bytes(),
            cpu_shares: default_cpu_shares(),
            container_prefix: default_container_prefix(),
        }
    }
}

fn default_docker_socket() -> String {
    if cfg!(windows) {
        "npipe:////./pipe/docker_engine".to_string()
    } else {
        "/var/run/docker.sock".to_string()
    }
}

fn default_docker_data_root() -> PathBuf {
    PathBuf::from("/var/lib/docker")
}

fn default_memory_limit_bytes() -> u64 {
    512 * 1024 * 1024
}

fn default_cpu_shares() -> u32 {
    1024
}

fn default_container_prefix() -> String {
    "dropdeploy".to_string()
}

/// Network location of an external job-queue backend (§4.5's durability
/// requirement is met by the SQLite-backed queue in `crate::queue` for this
/// process; these fields are carried so a future out-of-process queue can be
/// swapped in without a config shape change).
#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    #[serde(default = "default_queue_host")]
    pub queue_host: String,
    #[serde(default = "default_queue_port")]
    pub queue_port: u16,
    /// Bounded worker pool size (§4.7 Worker Runtime). Default 5.
    #[serde(default = "default_worker_concurrency")]
    pub worker_concurrency: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            queue_host: default_queue_host(),
            queue_port: default_queue_port(),
            worker_concurrency: default_worker_concurrency(),
        }
    }
}

fn default_queue_host() -> String {
    "127.0.0.1".to_string()
}

fn default_queue_port() -> u16 {
    6380
}

fn default_worker_concurrency() -> usize {
    5
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        if path.exists() {
            info!("Loading configuration from {}", path.display());
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            let config: Config = toml::from_str(&content)
                .with_context(|| "Failed to parse configuration file")?;
            Ok(config)
        } else {
            info!("No config file found, using defaults");
            Ok(Config::default())
        }
    }

    pub fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            runtime: RuntimeConfig::default(),
            queue: QueueConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_values() {
        let cfg = Config::default();
        assert_eq!(cfg.runtime.memory_limit_bytes, 512 * 1024 * 1024);
        assert_eq!(cfg.runtime.cpu_shares, 1024);
        assert_eq!(cfg.runtime.container_prefix, "dropdeploy");
        assert_eq!(cfg.queue.worker_concurrency, 5);
    }

    #[test]
    fn load_falls_back_to_defaults_when_file_missing() {
        let cfg = Config::load(Path::new("/nonexistent/dropdeploy.toml")).unwrap();
        assert_eq!(cfg.server.api_port, 8080);
    }
}
