// =============================================================================
// Error taxonomy for the ISX Pulse backend
// =============================================================================
//
// Every user-visible failure carries a stable `error_code`, an HTTP status,
// and a retryability flag the orchestrator consults before re-running a step.
// Leaf errors are wrapped with contextual metadata (step id, symbol, date) as
// they bubble to the step boundary; internal diagnostics stay in the logs.
// =============================================================================

use axum::http::StatusCode;
use thiserror::Error;

/// Domain errors surfaced by ingestion, analytics, operations, and the gate.
#[derive(Error, Debug)]
pub enum PulseError {
    /// Bad input from user or config. Never retried.
    #[error("validation failed: {0}")]
    Validation(String),

    /// File IO or artifact write failure. Retried when transient.
    #[error("storage error: {0}")]
    Storage(String),

    /// A malformed row or column. Logged, row skipped; never fails a step.
    #[error("parse error: {0}")]
    Parse(String),

    /// Another operation is already running on this instance.
    #[error("operation conflict: {0}")]
    OperationConflict(String),

    /// License gate denied the request.
    #[error("license invalid: {0}")]
    License(String),

    /// Validator or external IO failure. Retried per step policy.
    #[error("network error: {0}")]
    Network(String),

    /// External call exceeded its deadline. Retried per step policy.
    #[error("timeout: {0}")]
    Timeout(String),

    /// Cooperative cancellation; the operation terminates in `cancelled`.
    #[error("cancelled")]
    Cancelled,
}

impl PulseError {
    /// Stable machine-readable code surfaced in error envelopes.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Storage(_) => "STORAGE_ERROR",
            Self::Parse(_) => "PARSE_ERROR",
            Self::OperationConflict(_) => "OPERATION_CONFLICT",
            Self::License(_) => "LICENSE_INVALID",
            Self::Network(_) => "NETWORK_ERROR",
            Self::Timeout(_) => "TIMEOUT",
            Self::Cancelled => "CANCELLED",
        }
    }

    /// HTTP status the error maps to at the API boundary.
    pub fn http_status(&self) -> StatusCode {
        match self {
            Self::Validation(_) | Self::Parse(_) => StatusCode::BAD_REQUEST,
            Self::OperationConflict(_) => StatusCode::CONFLICT,
            Self::License(_) => StatusCode::PRECONDITION_REQUIRED,
            Self::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Network(_) | Self::Timeout(_) => StatusCode::BAD_GATEWAY,
            Self::Cancelled => StatusCode::CONFLICT,
        }
    }

    /// Whether a step hitting this error may be retried under the step's
    /// retry policy.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Storage(_) | Self::Network(_) | Self::Timeout(_))
    }

    /// Wrap the message with step/symbol/date context while keeping the kind.
    pub fn with_context(self, context: impl AsRef<str>) -> Self {
        let ctx = context.as_ref();
        match self {
            Self::Validation(m) => Self::Validation(format!("{ctx}: {m}")),
            Self::Storage(m) => Self::Storage(format!("{ctx}: {m}")),
            Self::Parse(m) => Self::Parse(format!("{ctx}: {m}")),
            Self::OperationConflict(m) => Self::OperationConflict(format!("{ctx}: {m}")),
            Self::License(m) => Self::License(format!("{ctx}: {m}")),
            Self::Network(m) => Self::Network(format!("{ctx}: {m}")),
            Self::Timeout(m) => Self::Timeout(format!("{ctx}: {m}")),
            Self::Cancelled => Self::Cancelled,
        }
    }
}

impl From<std::io::Error> for PulseError {
    fn from(err: std::io::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<csv::Error> for PulseError {
    fn from(err: csv::Error) -> Self {
        Self::Parse(err.to_string())
    }
}

impl From<serde_json::Error> for PulseError {
    fn from(err: serde_json::Error) -> Self {
        Self::Storage(format!("json serialization: {err}"))
    }
}

impl From<reqwest::Error> for PulseError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(err.to_string())
        } else {
            Self::Network(err.to_string())
        }
    }
}

/// Convenience alias used throughout the crate.
pub type PulseResult<T> = Result<T, PulseError>;
