//! Typed error taxonomy for the deployment pipeline (§7 Error Handling Design).
//!
//! `CoreError` classifies failures at the seams that need a retry decision
//! (the Job Queue) or an HTTP mapping (the API boundary); everything else
//! propagates as `anyhow::Error` the way the rest of the pipeline does.

use axum::http::StatusCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("project not found: {0}")]
    NotFound(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("caller is not authorized to act on this project")]
    Unauthorized,

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("repository clone failed: {0}")]
    CloneFailed(String),

    #[error("image build failed: {0}")]
    BuildFailed(String),

    #[error("build reported success but the resulting image is missing: {0}")]
    ImageMissingAfterBuild(String),

    #[error("container failed to start: {0}")]
    RunFailed(String),

    #[error("operation timed out: {0}")]
    Timeout(String),

    #[error("job queue is unavailable: {0}")]
    QueueUnavailable(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl CoreError {
    /// Whether the Job Queue should retry a job that failed with this error
    /// (§7 taxonomy table). `NotFound`/`Validation`/`Unauthorized`/`Conflict`
    /// are caller-input failures a retry can't fix; everything else —
    /// including `BuildFailed`/`ImageMissingAfterBuild`, since a flaky
    /// dependency registry can make a retry succeed — gets the queue's
    /// normal up-to-3-attempts policy.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            CoreError::NotFound(_)
                | CoreError::Validation(_)
                | CoreError::Unauthorized
                | CoreError::Conflict(_)
        )
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            CoreError::NotFound(_) => StatusCode::NOT_FOUND,
            CoreError::Validation(_) => StatusCode::BAD_REQUEST,
            CoreError::Unauthorized => StatusCode::UNAUTHORIZED,
            CoreError::Conflict(_) => StatusCode::CONFLICT,
            CoreError::Timeout(_) => StatusCode::BAD_REQUEST,
            CoreError::CloneFailed(_)
            | CoreError::BuildFailed(_)
            | CoreError::ImageMissingAfterBuild(_)
            | CoreError::RunFailed(_) => StatusCode::UNPROCESSABLE_ENTITY,
            CoreError::QueueUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            CoreError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<sqlx::Error> for CoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => CoreError::NotFound("row not found".to_string()),
            sqlx::Error::Database(db_err) if db_err.message().contains("UNIQUE constraint failed") => {
                CoreError::Conflict("a project with this slug already exists".to_string())
            }
            _ => CoreError::Internal(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clone_and_run_failures_are_retryable() {
        assert!(CoreError::CloneFailed("net".into()).is_retryable());
        assert!(CoreError::RunFailed("oom".into()).is_retryable());
    }

    #[test]
    fn build_failures_are_retryable() {
        assert!(CoreError::BuildFailed("syntax error".into()).is_retryable());
        assert!(CoreError::ImageMissingAfterBuild("hint".into()).is_retryable());
    }

    #[test]
    fn caller_input_failures_are_not_retryable() {
        assert!(!CoreError::NotFound("x".into()).is_retryable());
        assert!(!CoreError::Validation("bad".into()).is_retryable());
        assert!(!CoreError::Unauthorized.is_retryable());
    }

    #[test]
    fn not_found_maps_to_404() {
        assert_eq!(
            CoreError::NotFound("x".into()).status_code(),
            StatusCode::NOT_FOUND
        );
    }
}
