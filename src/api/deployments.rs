//! Deployment-facing HTTP handlers (§6): `Deploy` (queues a build) and
//! `Terminal` (drives the Command Gateway against the project's running
//! container).

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::db::DeploymentStatus;
use crate::runtime::ExecOutput;
use crate::AppState;

use super::error::ApiError;
use super::{bad_request, CallerId};

/// §6: a terminal command body must be 1..1000 characters.
const MIN_COMMAND_LEN: usize = 1;
const MAX_COMMAND_LEN: usize = 1000;

/// `POST /projects/{id}/deploy` (§6) response body: `{ deploymentId, message }`
/// — a minimal envelope, not the full Deployment row. Callers poll
/// `GET /projects/{id}` for status/buildStep.
#[derive(Debug, Serialize)]
pub struct DeployResponse {
    pub deployment_id: String,
    pub message: String,
}

pub async fn deploy(
    State(state): State<Arc<AppState>>,
    CallerId(user_id): CallerId,
    Path(project_id): Path<String>,
) -> Result<(axum::http::StatusCode, Json<DeployResponse>), ApiError> {
    let deployment = state
        .orchestrator
        .create_deployment(&project_id, &user_id)
        .await?;

    Ok((
        axum::http::StatusCode::ACCEPTED,
        Json(DeployResponse {
            deployment_id: deployment.id,
            message: "deployment queued".to_string(),
        }),
    ))
}

#[derive(Debug, Deserialize)]
pub struct TerminalRequest {
    pub command: String,
}

#[derive(Debug, Serialize)]
pub struct TerminalResponse {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i64,
}

impl From<ExecOutput> for TerminalResponse {
    fn from(out: ExecOutput) -> Self {
        Self {
            stdout: out.stdout,
            stderr: out.stderr,
            exit_code: out.exit_code,
        }
    }
}

/// `POST /projects/{id}/terminal` (§6): runs an allow-listed command, or a
/// `/`-prefixed shortcut, against the project's currently running
/// container. Requires the project to actually have a DEPLOYED deployment —
/// there is nothing to exec into otherwise.
pub async fn terminal(
    State(state): State<Arc<AppState>>,
    CallerId(user_id): CallerId,
    Path(project_id): Path<String>,
    Json(body): Json<TerminalRequest>,
) -> Result<Json<TerminalResponse>, ApiError> {
    let command = body.command.trim();
    if command.len() < MIN_COMMAND_LEN || command.len() > MAX_COMMAND_LEN {
        return Err(bad_request(format!(
            "command must be {MIN_COMMAND_LEN}..{MAX_COMMAND_LEN} characters"
        )));
    }

    let store = state.orchestrator.store();
    let project = store.get_owned_project(&project_id, &user_id).await?;
    let recent = store.recent_deployments(&project.id, 1).await?;

    let is_deployed = recent
        .first()
        .map(|d| d.status_enum() == DeploymentStatus::Deployed)
        .unwrap_or(false);
    if !is_deployed {
        return Err(bad_request(
            "project has no DEPLOYED deployment to run commands against",
        ));
    }

    let gateway = state.orchestrator.command_gateway();
    let container = gateway.container_name_for_slug(&project.slug);

    let output = if let Some(shortcut) = command.strip_prefix('/').map(|_| command) {
        gateway.execute_shortcut(&container, shortcut).await?
    } else {
        gateway.execute(&container, command).await?
    };

    Ok(Json(output.into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_response_carries_exit_code_through() {
        let out = ExecOutput {
            stdout: "hi".into(),
            stderr: String::new(),
            exit_code: 0,
        };
        let response: TerminalResponse = out.into();
        assert_eq!(response.stdout, "hi");
        assert_eq!(response.exit_code, 0);
    }

    #[test]
    fn deploy_response_is_the_minimal_envelope_not_the_full_row() {
        let response = DeployResponse {
            deployment_id: "d1".into(),
            message: "deployment queued".into(),
        };
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["deployment_id"], "d1");
        assert_eq!(json.as_object().unwrap().len(), 2);
    }
}
