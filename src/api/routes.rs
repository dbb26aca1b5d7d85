//! Router assembly (§6): binds the three HTTP operations onto their
//! `/projects/{id}/...` paths plus project creation, with the shared
//! tracing layer the teacher wires onto every axum app.

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use super::{deployments, projects};
use crate::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/projects", post(projects::create_project))
        .route("/projects/:id", get(projects::get_project))
        .route("/projects/:id/deploy", post(deployments::deploy))
        .route("/projects/:id/terminal", post(deployments::terminal))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
