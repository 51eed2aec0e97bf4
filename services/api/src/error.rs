//! services/api/src/error.rs
//!
//! Defines the primary error type for the entire API service and how it is
//! rendered as an HTTP response.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use getitdone_core::{PortError, WorkflowError};
use serde_json::json;
use tracing::error;

use crate::config::ConfigError;

/// The primary error type for the `api` service.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Represents an error that occurred during configuration loading.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Represents an error that propagated up from one of the core service ports.
    #[error("Service Port Error: {0}")]
    Port(#[from] PortError),

    /// A marketplace operation refused the request.
    #[error(transparent)]
    Workflow(#[from] WorkflowError),

    /// Represents an error from the underlying database library.
    #[error("Database Error: {0}")]
    Database(#[from] sqlx::Error),

    /// Represents an error from applying the schema migrations.
    #[error("Migration Error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Represents a standard Input/Output error (e.g., binding to a network socket).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Missing, unknown or expired bearer token.
    #[error("Authentication required")]
    Unauthenticated,

    #[error("Invalid email or password")]
    InvalidCredentials,

    /// The request could not be interpreted, e.g. an unknown filter value.
    #[error("{0}")]
    BadRequest(String),

    /// A catch-all for any other unexpected errors.
    #[error("An unexpected internal error occurred: {0}")]
    Internal(String),
}

fn port_status(e: &PortError) -> StatusCode {
    match e {
        PortError::Unexpected(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Workflow(e) => match e {
                WorkflowError::Validation(_) | WorkflowError::InvalidOperation(_) => {
                    StatusCode::BAD_REQUEST
                }
                WorkflowError::NotFound(_) => StatusCode::NOT_FOUND,
                WorkflowError::Forbidden(_) => StatusCode::FORBIDDEN,
                WorkflowError::Conflict(_) => StatusCode::CONFLICT,
                WorkflowError::Port(p) => port_status(p),
            },
            Self::Port(p) => port_status(p),
            Self::Unauthenticated | Self::InvalidCredentials => StatusCode::UNAUTHORIZED,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Config(_)
            | Self::Database(_)
            | Self::Migration(_)
            | Self::Io(_)
            | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = if status.is_server_error() {
            error!(error = %self, "Request failed.");
            "Internal server error".to_string()
        } else {
            self.to_string()
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(WorkflowError::Validation("note".into()), StatusCode::BAD_REQUEST)]
    #[case(WorkflowError::InvalidOperation("own task".into()), StatusCode::BAD_REQUEST)]
    #[case(WorkflowError::NotFound("Task 1 not found".into()), StatusCode::NOT_FOUND)]
    #[case(WorkflowError::Forbidden("poster only".into()), StatusCode::FORBIDDEN)]
    #[case(WorkflowError::Conflict("duplicate".into()), StatusCode::CONFLICT)]
    #[case(
        WorkflowError::Port(PortError::Unexpected("db down".into())),
        StatusCode::INTERNAL_SERVER_ERROR
    )]
    fn workflow_errors_map_to_status(#[case] err: WorkflowError, #[case] expected: StatusCode) {
        assert_eq!(ApiError::from(err).status(), expected);
    }

    #[test]
    fn server_errors_hide_their_detail() {
        let response = ApiError::Internal("secret".into()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let response = ApiError::BadRequest("unknown sort key 'x'".into()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
