//! Deployment: one build-and-run attempt of a Project (§3 Data Model, §4.6).

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum DeploymentStatus {
    Queued,
    Building,
    Deployed,
    Failed,
}

impl std::fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Queued => write!(f, "QUEUED"),
            Self::Building => write!(f, "BUILDING"),
            Self::Deployed => write!(f, "DEPLOYED"),
            Self::Failed => write!(f, "FAILED"),
        }
    }
}

impl From<String> for DeploymentStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "QUEUED" => Self::Queued,
            "BUILDING" => Self::Building,
            "DEPLOYED" => Self::Deployed,
            "FAILED" => Self::Failed,
            _ => Self::Queued,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum BuildStep {
    Cloning,
    BuildingImage,
    Starting,
}

impl std::fmt::Display for BuildStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cloning => write!(f, "CLONING"),
            Self::BuildingImage => write!(f, "BUILDING_IMAGE"),
            Self::Starting => write!(f, "STARTING"),
        }
    }
}

impl From<String> for BuildStep {
    fn from(s: String) -> Self {
        match s.as_str() {
            "CLONING" => Self::Cloning,
            "BUILDING_IMAGE" => Self::BuildingImage,
            "STARTING" => Self::Starting,
            _ => Self::Cloning,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Deployment {
    pub id: String,
    pub project_id: String,
    pub status: String,
    pub build_step: Option<String>,
    pub container_port: Option<i64>,
    pub subdomain: Option<String>,
    pub logs: String,
    pub error_message: Option<String>,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl Deployment {
    pub fn status_enum(&self) -> DeploymentStatus {
        DeploymentStatus::from(self.status.clone())
    }

    pub fn build_step_enum(&self) -> Option<BuildStep> {
        self.build_step.clone().map(BuildStep::from)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status_enum(),
            DeploymentStatus::Deployed | DeploymentStatus::Failed
        )
    }
}
