use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use dropdeploy::config::Config;
use dropdeploy::db::EntityStore;
use dropdeploy::orchestrator::DeploymentOrchestrator;
use dropdeploy::queue::JobQueue;
use dropdeploy::repo::RepositoryManager;
use dropdeploy::runtime::{ContainerEngine, DockerRuntime, ResourceLimits};
use dropdeploy::worker::WorkerRuntime;
use dropdeploy::AppState;

/// §9 Open Question ("Stuck-BUILDING recovery"): a deployment still
/// BUILDING after this long is assumed orphaned by a worker crash.
const STUCK_BUILDING_THRESHOLD_SECONDS: i64 = 3600;

#[derive(Parser, Debug)]
#[command(name = "dropdeploy")]
#[command(author, version, about = "Clone, build, and run a project's container on every deploy", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "dropdeploy.toml")]
    config: PathBuf,

    /// Override log level
    #[arg(short, long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load(&cli.config)?;

    let log_level = cli
        .log_level
        .as_ref()
        .unwrap_or(&config.logging.level)
        .clone();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level)),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("starting dropdeploy v{}", env!("CARGO_PKG_VERSION"));

    std::fs::create_dir_all(&config.server.data_dir)
        .context("creating data directory")?;
    std::fs::create_dir_all(&config.server.projects_root)
        .context("creating projects root")?;

    // §6: a fatal startup error connecting to the entity store exits non-zero.
    let db = dropdeploy::db::init(&config.server.data_dir)
        .await
        .context("connecting to entity store")?;

    let engine: Arc<dyn ContainerEngine> = Arc::new(
        DockerRuntime::connect(&config.runtime.container_engine_socket)
            .context("connecting to container engine")?,
    );

    let store = EntityStore::new(db.clone());
    let repos = RepositoryManager::new(&config.server.projects_root);
    let queue = Arc::new(JobQueue::new(db.clone()));
    let limits = ResourceLimits {
        memory_limit_bytes: config.runtime.memory_limit_bytes,
        cpu_shares: config.runtime.cpu_shares,
    };

    let orchestrator = Arc::new(DeploymentOrchestrator::new(
        store,
        repos,
        engine,
        queue.clone(),
        config.runtime.container_prefix.clone(),
        limits,
    ));

    match orchestrator
        .sweep_stuck_deployments(STUCK_BUILDING_THRESHOLD_SECONDS)
        .await
    {
        Ok(swept) if swept > 0 => {
            tracing::warn!(swept, "recovered deployments stuck BUILDING from a prior crash")
        }
        Ok(_) => {}
        Err(e) => tracing::warn!(error = %e, "startup sweep failed, continuing anyway"),
    }

    let worker = WorkerRuntime::new(
        orchestrator.clone(),
        queue.clone(),
        config.queue.worker_concurrency,
    );
    tokio::spawn(worker.run());

    let state = Arc::new(AppState::new(config.clone(), orchestrator));
    let app = dropdeploy::api::routes::router(state);

    let api_addr = format!("{}:{}", config.server.host, config.server.api_port);
    let listener = tokio::net::TcpListener::bind(&api_addr)
        .await
        .with_context(|| format!("binding API listener on {api_addr}"))?;

    tracing::info!("API server listening on http://{}", api_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("shutdown signal received");
}
