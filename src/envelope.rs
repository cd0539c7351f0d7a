// =============================================================================
// Wire envelopes — typed WebSocket messages and RFC 7807 error bodies
// =============================================================================
//
// Every message pushed to a subscriber is one envelope:
//
//   { "type": "...", "subtype"?, "action"?, "timestamp", "trace_id"?, "data" }
//
// The payload under `data` is type-specific; it is validated at the boundary
// and handled as typed values internally. Operation lifecycle types the UI
// must handle: operation:reset, operation:started, operation:progress,
// operation:completed, operation:failed, operation:cancelled.
// =============================================================================

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::errors::PulseError;
use crate::types::RunStatus;

/// Envelope type tags for the operation lifecycle.
pub const OPERATION_RESET: &str = "operation:reset";
pub const OPERATION_STARTED: &str = "operation:started";
pub const OPERATION_PROGRESS: &str = "operation:progress";
pub const OPERATION_COMPLETED: &str = "operation:completed";
pub const OPERATION_FAILED: &str = "operation:failed";
pub const OPERATION_CANCELLED: &str = "operation:cancelled";

/// A single typed message pushed to WebSocket subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtype: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl Envelope {
    pub fn new(kind: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            kind: kind.into(),
            subtype: None,
            action: None,
            timestamp: Utc::now(),
            trace_id: None,
            data,
        }
    }

    pub fn with_trace(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self
    }

    pub fn with_subtype(mut self, subtype: impl Into<String>) -> Self {
        self.subtype = Some(subtype.into());
        self
    }

    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }

    /// Sent to a subscriber immediately on acceptance.
    pub fn connection(subscriber_id: &str) -> Self {
        Self::new("connection", json!({ "subscriber_id": subscriber_id }))
    }

    /// Fine-grained step progress (0–100 plus item counts).
    #[allow(clippy::too_many_arguments)]
    pub fn progress(
        operation_id: &str,
        step_id: &str,
        progress: f64,
        items_processed: u64,
        items_total: u64,
        message: Option<&str>,
    ) -> Self {
        Self::new(
            "progress",
            json!({
                "operation_id": operation_id,
                "step_id": step_id,
                "progress": progress,
                "items_processed": items_processed,
                "items_total": items_total,
                "message": message,
            }),
        )
    }

    /// Step status transition inside a running operation.
    pub fn operation_progress(
        operation_id: &str,
        step_id: &str,
        status: RunStatus,
        data: serde_json::Value,
    ) -> Self {
        Self::new(
            OPERATION_PROGRESS,
            json!({
                "operation_id": operation_id,
                "step_id": step_id,
                "status": status,
                "detail": data,
            }),
        )
    }

    /// Console-style output line with a severity level.
    pub fn output(level: &str, message: &str) -> Self {
        Self::new("output", json!({ "level": level, "message": message }))
    }

    /// Recoverable or terminal error surfaced to the UI.
    pub fn error(code: &str, message: &str, recoverable: bool, hint: Option<&str>) -> Self {
        Self::new(
            "error",
            json!({
                "code": code,
                "message": message,
                "recoverable": recoverable,
                "hint": hint,
            }),
        )
    }

    /// Artifact change notification (`subtype` names the artifact kind).
    pub fn data_update(subtype: &str, action: &str, data: serde_json::Value) -> Self {
        Self::new("data_update", data)
            .with_subtype(subtype)
            .with_action(action)
    }

    /// Read-side keepalive envelopes are consumed, never forwarded.
    pub fn is_heartbeat(&self) -> bool {
        self.kind == "heartbeat"
    }
}

// =============================================================================
// RFC 7807 problem responses
// =============================================================================

/// Error body returned by every API endpoint on failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProblemDetails {
    #[serde(rename = "type")]
    pub kind: String,
    pub title: String,
    pub status: u16,
    pub detail: String,
    pub trace_id: String,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub extensions: serde_json::Map<String, serde_json::Value>,
}

impl ProblemDetails {
    /// Build a problem body from a domain error. Internal diagnostics stay
    /// out: the detail is the error's display form, already user-safe.
    pub fn from_error(err: &PulseError, trace_id: impl Into<String>) -> Self {
        let status = err.http_status();
        Self {
            kind: format!("https://isxpulse.example/errors/{}", err.error_code()),
            title: err.error_code().to_string(),
            status: status.as_u16(),
            detail: err.to_string(),
            trace_id: trace_id.into(),
            extensions: serde_json::Map::new(),
        }
    }

    pub fn with_extension(mut self, key: &str, value: serde_json::Value) -> Self {
        self.extensions.insert(key.to_string(), value);
        self
    }
}

impl IntoResponse for ProblemDetails {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, axum::Json(self)).into_response()
    }
}
