//! crates/getitdone_core/src/error.rs
//!
//! The error type returned by every marketplace operation.

use crate::ports::PortError;

/// A typed failure of a marketplace operation. Each variant carries a message
/// that can be shown to the user as-is.
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    /// A required field is missing or empty, or a numeric range is malformed.
    #[error("{0}")]
    Validation(String),

    /// An entity id did not resolve.
    #[error("{0}")]
    NotFound(String),

    /// The acting user may not perform this mutation.
    #[error("{0}")]
    Forbidden(String),

    /// A uniqueness or state-machine rule would be violated.
    #[error("{0}")]
    Conflict(String),

    /// The request is well-formed but makes no sense, e.g. applying to one's own task.
    #[error("{0}")]
    InvalidOperation(String),

    /// Persistence failed; the write was rolled back.
    #[error(transparent)]
    Port(#[from] PortError),
}

pub type WorkflowResult<T> = Result<T, WorkflowError>;

impl WorkflowError {
    pub(crate) fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub(crate) fn not_found(what: &str, id: i64) -> Self {
        Self::NotFound(format!("{} {} not found", what, id))
    }

    pub(crate) fn forbidden(message: impl Into<String>) -> Self {
        Self::Forbidden(message.into())
    }

    pub(crate) fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }
}
