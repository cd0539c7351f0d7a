// =============================================================================
// Central Application State — ISX Pulse backend
// =============================================================================
//
// Ties the two process-wide singletons (the hub and the license gate) to the
// orchestrator and the runtime configuration. All subsystems are owned here
// and handed out as Arc references; request handlers only ever see
// snapshots of operation state through the orchestrator's accessors.
// =============================================================================

use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::hub::Hub;
use crate::license::{LicenseGate, RemoteValidator};
use crate::operations::orchestrator::Orchestrator;
use crate::runtime_config::RuntimeConfig;

/// Paths that bypass the license gate: liveness, license management (users
/// must be able to activate), and the WebSocket upgrade.
const GATE_EXCLUSIONS: [&str; 3] = ["/api/v1/health", "/api/v1/license", "/api/v1/ws"];

/// Shared application state, wrapped in `Arc` at startup.
pub struct AppState {
    pub runtime_config: Arc<RwLock<RuntimeConfig>>,
    /// Where the config is persisted on changes (license activation).
    pub config_path: PathBuf,
    pub hub: Arc<Hub>,
    pub orchestrator: Arc<Orchestrator>,
    pub license: Arc<LicenseGate>,
    pub start_time: std::time::Instant,
}

impl AppState {
    pub fn new(config: RuntimeConfig, config_path: PathBuf) -> Self {
        let hub = Arc::new(Hub::new(config.subscriber_buffer));
        let orchestrator = Arc::new(Orchestrator::new(hub.clone()));
        let license = Arc::new(LicenseGate::new(
            Box::new(RemoteValidator::new(config.license_activation_url.clone())),
            GATE_EXCLUSIONS.iter().map(|p| p.to_string()).collect(),
        ));

        Self {
            runtime_config: Arc::new(RwLock::new(config)),
            config_path,
            hub,
            orchestrator,
            license,
            start_time: std::time::Instant::now(),
        }
    }

    /// Immutable snapshot of the runtime config for a step chain. Operations
    /// hold this snapshot for their whole run, so a concurrent config save
    /// never changes a running pipeline.
    pub fn runtime_snapshot(&self) -> Arc<RuntimeConfig> {
        Arc::new(self.runtime_config.read().clone())
    }

    pub fn license_key(&self) -> Option<String> {
        self.runtime_config.read().license_key.clone()
    }
}
