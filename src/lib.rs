pub mod api;
pub mod command;
pub mod config;
pub mod db;
pub mod error;
pub mod external_contracts;
pub mod orchestrator;
pub mod queue;
pub mod recipes;
pub mod repo;
pub mod runtime;
pub mod worker;

use std::sync::Arc;

use config::Config;
use orchestrator::DeploymentOrchestrator;

pub use db::DbPool;

/// Shared state handed to every axum handler: the config and the one
/// component callers actually need a handle to, the Orchestrator (it in
/// turn owns the Entity Store, Repository Manager, and Container Engine).
pub struct AppState {
    pub config: Config,
    pub orchestrator: Arc<DeploymentOrchestrator>,
}

impl AppState {
    pub fn new(config: Config, orchestrator: Arc<DeploymentOrchestrator>) -> Self {
        Self { config, orchestrator }
    }
}
