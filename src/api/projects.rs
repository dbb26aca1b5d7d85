//! Project-facing HTTP handlers (§6): `CreateProject` (the surface a caller
//! uses to register a repository before any deployment exists) and
//! `GetProject`, which returns the project plus its most recent deployments
//! so a caller can poll status/buildStep without a separate endpoint.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use serde::Serialize;

use crate::db::{CreateProjectRequest, Deployment, Project};
use crate::AppState;

use super::error::ApiError;
use super::{bad_request, CallerId};

/// How many recent deployments to inline into `GET /projects/{id}` (§6).
const RECENT_DEPLOYMENTS_LIMIT: i64 = 10;

#[derive(Debug, Serialize)]
pub struct ProjectView {
    #[serde(flatten)]
    pub project: Project,
    pub recent_deployments: Vec<Deployment>,
}

pub async fn create_project(
    State(state): State<Arc<AppState>>,
    CallerId(user_id): CallerId,
    Json(body): Json<CreateProjectRequest>,
) -> Result<(axum::http::StatusCode, Json<Project>), ApiError> {
    if body.name.trim().is_empty() {
        return Err(bad_request("name must not be empty"));
    }
    if body.slug.trim().is_empty() {
        return Err(bad_request("slug must not be empty"));
    }
    if body.repo_url.trim().is_empty() {
        return Err(bad_request("repo_url must not be empty"));
    }
    body.framework
        .parse::<crate::db::Framework>()
        .map_err(|e| bad_request(e.to_string()))?;

    let project = state
        .orchestrator
        .store()
        .create_project(
            &user_id,
            &body.name,
            &body.slug,
            &body.repo_url,
            &body.framework.to_uppercase(),
            &body.branch,
        )
        .await?;

    Ok((axum::http::StatusCode::CREATED, Json(project)))
}

/// `GET /projects/{id}` — project plus its latest deployments (§6), scoped
/// to the calling user the same way every other project lookup is.
pub async fn get_project(
    State(state): State<Arc<AppState>>,
    CallerId(user_id): CallerId,
    Path(project_id): Path<String>,
) -> Result<Json<ProjectView>, ApiError> {
    let store = state.orchestrator.store();
    let project = store.get_owned_project(&project_id, &user_id).await?;
    let recent_deployments = store
        .recent_deployments(&project.id, RECENT_DEPLOYMENTS_LIMIT)
        .await?;

    Ok(Json(ProjectView {
        project,
        recent_deployments,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn project_view_serializes_project_fields_flat() {
        let project = Project {
            id: "p1".into(),
            user_id: "u1".into(),
            name: "site".into(),
            slug: "site".into(),
            repo_url: "https://x.test/r.git".into(),
            framework: "STATIC".into(),
            branch: "main".into(),
            created_at: "now".into(),
            updated_at: "now".into(),
        };
        let view = ProjectView {
            project,
            recent_deployments: vec![],
        };
        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["slug"], "site");
        assert!(json["recent_deployments"].is_array());
    }
}
