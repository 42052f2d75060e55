//! Mapping of orchestrator errors onto HTTP responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use genoflow::errors::{OrchestratorError, ValidationErrors};

/// Error returned by every handler.
#[derive(Debug, Error)]
pub enum ApiError {
    /// An orchestrator operation failed.
    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),

    /// The submission was rejected.
    #[error(transparent)]
    Validation(#[from] ValidationErrors),

    /// The request could not be read.
    #[error("{0}")]
    BadRequest(String),

    /// The path did not name a run.
    #[error("Run not found: {0}")]
    UnknownRun(String),

    /// Storing an upload failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ApiError {
    /// HTTP status for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::UnknownRun(_) => StatusCode::NOT_FOUND,
            Self::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Orchestrator(e) => match e {
                OrchestratorError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
                OrchestratorError::RunNotFound(_) => StatusCode::NOT_FOUND,
                OrchestratorError::InvalidTransition { .. }
                | OrchestratorError::NotCompleted { .. } => StatusCode::CONFLICT,
                OrchestratorError::CapacityExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
                OrchestratorError::Definition(_)
                | OrchestratorError::AdapterNotFound(_)
                | OrchestratorError::Config(_)
                | OrchestratorError::Internal(_)
                | OrchestratorError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self {
            Self::Validation(errors) | Self::Orchestrator(OrchestratorError::Validation(errors)) => {
                json!({ "errors": errors.errors })
            }
            other => json!({ "error": other.to_string() }),
        };
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        } else {
            tracing::debug!(error = %self, status = status.as_u16(), "Request rejected");
        }
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use genoflow::core::RunId;

    #[test]
    fn test_status_mapping() {
        let id = RunId::new();
        let cases = [
            (ApiError::from(OrchestratorError::RunNotFound(id)), StatusCode::NOT_FOUND),
            (
                ApiError::from(OrchestratorError::InvalidTransition {
                    run_id: id,
                    action: "start",
                    status: "running".into(),
                }),
                StatusCode::CONFLICT,
            ),
            (
                ApiError::from(OrchestratorError::NotCompleted {
                    run_id: id,
                    status: "failed".into(),
                }),
                StatusCode::CONFLICT,
            ),
            (
                ApiError::from(OrchestratorError::CapacityExceeded { limit: 1 }),
                StatusCode::TOO_MANY_REQUESTS,
            ),
            (ApiError::from(ValidationErrors::new()), StatusCode::UNPROCESSABLE_ENTITY),
            (ApiError::UnknownRun("x".into()), StatusCode::NOT_FOUND),
        ];
        for (error, expected) in cases {
            assert_eq!(error.status(), expected, "{error}");
        }
    }
}
