use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

// -----------------------------------------------------------------------------
// ----- ErrorCode -------------------------------------------------------------

/// Machine-readable failure class carried by every unsuccessful envelope.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    RateLimitExceeded,
    ToolNotFound,
    ValidationFailed,
    ExecutionError,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
            ErrorCode::ToolNotFound => "TOOL_NOT_FOUND",
            ErrorCode::ValidationFailed => "VALIDATION_FAILED",
            ErrorCode::ExecutionError => "EXECUTION_ERROR",
        }
    }
}

// -----------------------------------------------------------------------------
// ----- BackendError ----------------------------------------------------------

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("backend connect failed: {0}")]
    Connect(String),

    #[error("{0}")]
    Query(String),

    #[error("backend call timed out after {0:?}")]
    Timeout(Duration),

    #[error("connection already returned to the pool")]
    Closed,
}

// -----------------------------------------------------------------------------
// ----- PoolError -------------------------------------------------------------

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("connection pool exhausted: no connection became available within {waited:?}")]
    Exhausted { waited: Duration },

    #[error("connection pool is closed")]
    Closed,

    #[error("failed to open a backend connection: {0}")]
    Connect(#[source] BackendError),
}

// -----------------------------------------------------------------------------
// ----- ToolError -------------------------------------------------------------

/// Failure raised by an operation handler. Only `Validation` is a caller
/// error; everything else is reported as an execution failure.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error(transparent)]
    Backend(#[from] BackendError),
}

impl ToolError {
    pub fn validation(message: impl Into<String>) -> Self {
        ToolError::Validation(message.into())
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            ToolError::Validation(_) => ErrorCode::ValidationFailed,
            _ => ErrorCode::ExecutionError,
        }
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
