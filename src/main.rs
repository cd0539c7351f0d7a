// =============================================================================
// ISX Pulse — Main Entry Point
// =============================================================================
//
// Long-lived control-plane process: loads the runtime config, builds the
// shared state (hub, orchestrator, license gate), serves the HTTP/WebSocket
// API, and shuts down cleanly on Ctrl+C (cancelling any live operation and
// saving the config).
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod api;
mod app_state;
mod artifacts;
mod bulletin;
mod envelope;
mod errors;
mod hub;
mod license;
mod liquidity;
mod operations;
mod runtime_config;
mod summary;
mod types;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::app_state::AppState;
use crate::runtime_config::RuntimeConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & logging ─────────────────────────────────────────
    let _ = dotenv::dotenv();

    // ISX_DEBUG=true turns on verbose per-row diagnostics.
    let default_level = if std::env::var("ISX_DEBUG")
        .map(|v| v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
    {
        "debug"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    info!("╔══════════════════════════════════════════════════════════╗");
    info!("║        ISX Pulse — Starting Up                           ║");
    info!("╚══════════════════════════════════════════════════════════╝");

    // ── 2. Runtime config ────────────────────────────────────────────────
    let config_path = std::env::var("ISX_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("runtime_config.json"));

    let mut config = RuntimeConfig::load(&config_path).unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        RuntimeConfig::default()
    });

    // Env overrides for the paths the service writes to.
    if let Ok(dir) = std::env::var("ISX_DATA_DIR") {
        config.data_dir = PathBuf::from(dir);
    }

    config
        .validate()
        .map_err(|e| anyhow::anyhow!("invalid runtime config: {e}"))?;

    std::fs::create_dir_all(config.downloads_dir())
        .with_context(|| "failed to create downloads directory")?;
    std::fs::create_dir_all(config.reports_dir())
        .with_context(|| "failed to create reports directory")?;

    info!(
        data_dir = %config.data_dir.display(),
        max_workers = config.max_workers,
        license_activated = config.license_key.is_some(),
        "runtime configuration ready"
    );

    // ── 3. Shared state ──────────────────────────────────────────────────
    let state = Arc::new(AppState::new(config, config_path.clone()));

    // ── 4. API server ────────────────────────────────────────────────────
    let bind_addr = std::env::var("ISX_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".into());
    let app = api::rest::router(state.clone());
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {bind_addr}"))?;
    info!(addr = %bind_addr, "API server listening");

    let server = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            warn!(error = %e, "API server stopped");
        }
    });

    info!("All subsystems running. Press Ctrl+C to stop.");

    // ── 5. Graceful shutdown ─────────────────────────────────────────────
    tokio::signal::ctrl_c().await?;
    warn!("Shutdown signal received — stopping gracefully");

    // Cancel any live operation and let its cleanup run.
    state.orchestrator.shutdown();

    let config_snapshot = state.runtime_config.read().clone();
    if let Err(e) = config_snapshot.save(&config_path) {
        warn!(error = %e, "Failed to save runtime config on shutdown");
    }

    server.abort();
    info!("ISX Pulse shut down complete.");
    Ok(())
}
