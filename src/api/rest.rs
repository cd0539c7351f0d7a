// =============================================================================
// REST API Endpoints — Axum 0.7
// =============================================================================
//
// All endpoints live under `/api/v1/`. The license gate wraps the router as
// middleware; health, license management, and the WebSocket upgrade bypass
// it (the allow-list lives on the gate). Failures come back as RFC 7807
// problem bodies carrying a per-request trace id.
//
// CORS is configured permissively for the local dashboard; tighten
// `allowed_origins` when serving beyond localhost.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{Json, Path, Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::app_state::AppState;
use crate::envelope::ProblemDetails;
use crate::errors::PulseError;
use crate::operations::operation::OperationConfig;
use crate::operations::steps::steps_for;
use crate::types::{OperationMode, OperationType};

// =============================================================================
// Router construction
// =============================================================================

/// Build the full REST API router with CORS, the license gate, and shared
/// state. The WebSocket route is mounted here but handled in `api::ws`.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // ── Ungated (on the gate's allow-list) ──────────────────────
        .route("/api/v1/health", get(health))
        .route("/api/v1/license", get(license_status))
        .route("/api/v1/license/activate", post(activate_license))
        // ── Gated ───────────────────────────────────────────────────
        .route("/api/v1/operations", post(start_operation).get(list_operations))
        .route("/api/v1/operations/:id", get(get_operation))
        .route("/api/v1/operations/:id/cancel", post(cancel_operation))
        .route("/api/v1/summaries", get(summaries))
        .route("/api/v1/insights", get(insights))
        // ── WebSocket ───────────────────────────────────────────────
        .route("/api/v1/ws", get(crate::api::ws::ws_handler))
        // ── Middleware & State ──────────────────────────────────────
        .layer(middleware::from_fn_with_state(state.clone(), license_gate))
        .layer(cors)
        .with_state(state)
}

// =============================================================================
// Problem helpers
// =============================================================================

fn trace_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn problem(err: &PulseError) -> Response {
    ProblemDetails::from_error(err, trace_id()).into_response()
}

fn not_found(detail: String) -> Response {
    ProblemDetails {
        kind: "https://isxpulse.example/errors/NOT_FOUND".to_string(),
        title: "NOT_FOUND".to_string(),
        status: StatusCode::NOT_FOUND.as_u16(),
        detail,
        trace_id: trace_id(),
        extensions: serde_json::Map::new(),
    }
    .into_response()
}

// =============================================================================
// License gate middleware
// =============================================================================

async fn license_gate(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();
    let key = state.license_key();

    match state.license.check_request(&path, key.as_deref()).await {
        Ok(()) => next.run(request).await,
        Err(err) => {
            warn!(%path, error = %err, "request blocked by license gate");
            problem(&err)
        }
    }
}

// =============================================================================
// Health (ungated)
// =============================================================================

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "server_time": chrono::Utc::now().timestamp_millis(),
        "uptime_secs": state.start_time.elapsed().as_secs(),
        "hub": state.hub.metrics(),
    }))
}

// =============================================================================
// Operations
// =============================================================================

#[derive(Deserialize)]
struct StartOperationRequest {
    #[serde(rename = "type")]
    op_type: OperationType,
    #[serde(default)]
    mode: Option<OperationMode>,
    #[serde(default)]
    from: Option<NaiveDate>,
    #[serde(default)]
    to: Option<NaiveDate>,
}

async fn start_operation(
    State(state): State<Arc<AppState>>,
    Json(request): Json<StartOperationRequest>,
) -> Response {
    let runtime = state.runtime_snapshot();
    let config = OperationConfig {
        mode: request.mode.unwrap_or_default(),
        from: request.from,
        to: request.to,
        retry: runtime.retry.clone(),
        step_timeout_secs: runtime.step_timeout_secs,
        max_workers: runtime.max_workers,
    };

    let steps = steps_for(request.op_type);
    match state
        .orchestrator
        .start(request.op_type, config, steps, runtime)
    {
        Ok(id) => {
            info!(operation_id = %id, op_type = %request.op_type, "operation started via API");
            match state.orchestrator.get(&id) {
                Some(op) => (StatusCode::ACCEPTED, Json(op)).into_response(),
                None => (StatusCode::ACCEPTED, Json(json!({ "id": id }))).into_response(),
            }
        }
        Err(err) => problem(&err),
    }
}

async fn list_operations(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.orchestrator.recent())
}

async fn get_operation(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Response {
    match state.orchestrator.get(&id) {
        Some(op) => Json(op).into_response(),
        None => not_found(format!("operation {id} not found")),
    }
}

async fn cancel_operation(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Response {
    match state.orchestrator.cancel(&id) {
        Ok(()) => Json(json!({ "operation_id": id, "cancelling": true })).into_response(),
        Err(err) => problem(&err),
    }
}

// =============================================================================
// Artifacts
// =============================================================================

/// Serve a JSON artifact from the reports directory, if it exists.
fn serve_artifact(state: &AppState, file_name: &str) -> Response {
    let path = state.runtime_config.read().reports_dir().join(file_name);
    match std::fs::read_to_string(&path) {
        Ok(content) => (
            StatusCode::OK,
            [(axum::http::header::CONTENT_TYPE, "application/json")],
            content,
        )
            .into_response(),
        Err(_) => not_found(format!("{file_name} has not been generated yet")),
    }
}

async fn summaries(State(state): State<Arc<AppState>>) -> Response {
    serve_artifact(&state, "ticker_summary.json")
}

async fn insights(State(state): State<Arc<AppState>>) -> Response {
    serve_artifact(&state, "insights.json")
}

// =============================================================================
// License
// =============================================================================

async fn license_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let activated = state.license_key().is_some();
    Json(state.license.status(activated))
}

#[derive(Deserialize)]
struct ActivateRequest {
    key: String,
}

async fn activate_license(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ActivateRequest>,
) -> Response {
    let key = request.key.trim().to_string();
    if key.is_empty() {
        return problem(&PulseError::Validation("license key is empty".to_string()));
    }

    match state.license.activate(&key).await {
        Ok(()) => {
            let config_snapshot = {
                let mut config = state.runtime_config.write();
                config.license_key = Some(key);
                config.clone()
            };
            if let Err(e) = config_snapshot.save(&state.config_path) {
                warn!(error = %e, "license activated but config save failed");
            }
            info!("license activated via API");
            Json(state.license.status(true)).into_response()
        }
        Err(err) => problem(&err),
    }
}
