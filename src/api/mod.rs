//! HTTP surface (§6): the three operations an external HTTP layer
//! delegates to the Orchestrator and Command Gateway. Authentication
//! itself is an external collaborator (§1); handlers accept an
//! already-resolved caller identity via [`CallerId`].

pub mod deployments;
pub mod error;
pub mod projects;
pub mod routes;

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};

use crate::error::CoreError;

/// A pre-authenticated caller identity, read from a header an upstream
/// auth layer is expected to set after validating a session. Standing in
/// for the login/session system named out of scope in §1.
pub struct CallerId(pub String);

#[async_trait]
impl<S> FromRequestParts<S> for CallerId
where
    S: Send + Sync,
{
    type Rejection = error::ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get("x-user-id")
            .and_then(|v| v.to_str().ok())
            .map(|v| CallerId(v.to_string()))
            .ok_or(error::ApiError(CoreError::Unauthorized))
    }
}

pub(crate) fn bad_request(msg: impl Into<String>) -> error::ApiError {
    error::ApiError(CoreError::Validation(msg.into()))
}
