// =============================================================================
// Runtime Configuration — Hot-reloadable service settings with atomic save
// =============================================================================
//
// Central configuration hub for the ISX Pulse backend.  Every tunable
// parameter lives here so that the service can be reconfigured at runtime
// without a restart (license activation in particular persists through here).
//
// Persistence uses an atomic tmp + rename pattern to prevent corruption on
// crash.  All fields carry `#[serde(default)]` so that adding new fields
// never breaks loading an older config file.
// =============================================================================

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::errors::{PulseError, PulseResult};

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_bulletin_base_url() -> String {
    "http://localhost:9100/bulletins".to_string()
}

fn default_history_start() -> String {
    "2024-01-01".to_string()
}

fn default_max_workers() -> usize {
    1
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay_secs() -> f64 {
    1.0
}

fn default_backoff_factor() -> f64 {
    2.0
}

fn default_max_delay_secs() -> f64 {
    30.0
}

fn default_step_timeout_secs() -> u64 {
    600
}

fn default_max_last_n_days() -> usize {
    10
}

fn default_date_format() -> String {
    "%Y-%m-%d".to_string()
}

fn default_continuity_window() -> usize {
    20
}

fn default_analysis_window_days() -> usize {
    252
}

fn default_market_top_n() -> usize {
    20
}

fn default_subscriber_buffer() -> usize {
    256
}

fn default_activation_url() -> String {
    "https://license.isxpulse.example/api/validate".to_string()
}

// =============================================================================
// RetryPolicy
// =============================================================================

/// Retry policy applied to a failing retryable step: waits
/// `initial_delay * backoff_factor^attempt`, capped at `max_delay`, for up to
/// `max_attempts` attempts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_delay_secs")]
    pub initial_delay_secs: f64,

    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,

    #[serde(default = "default_max_delay_secs")]
    pub max_delay_secs: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_secs: default_initial_delay_secs(),
            backoff_factor: default_backoff_factor(),
            max_delay_secs: default_max_delay_secs(),
        }
    }
}

impl RetryPolicy {
    /// Backoff delay before retry number `attempt` (0-based), capped.
    pub fn delay_for_attempt(&self, attempt: u32) -> std::time::Duration {
        let raw = self.initial_delay_secs * self.backoff_factor.powi(attempt as i32);
        let capped = raw.min(self.max_delay_secs).max(0.0);
        std::time::Duration::from_secs_f64(capped)
    }
}

// =============================================================================
// SummaryParams
// =============================================================================

/// Tunable parameters for the ticker summarizer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryParams {
    /// Emit the extended column set (totals, 52-week range, period changes).
    #[serde(default)]
    pub include_extended: bool,

    /// How many most-recent actual closes the rolling window keeps. 1..=252.
    #[serde(default = "default_max_last_n_days")]
    pub max_last_n_days: usize,

    /// strftime format used for dates in CSV artifacts.
    #[serde(default = "default_date_format")]
    pub date_format: String,
}

impl Default for SummaryParams {
    fn default() -> Self {
        Self {
            include_extended: false,
            max_last_n_days: default_max_last_n_days(),
            date_format: default_date_format(),
        }
    }
}

// =============================================================================
// LiquidityParams
// =============================================================================

/// Tunable parameters for the liquidity engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiquidityParams {
    /// Trailing window (trading days) used for the continuity component.
    #[serde(default = "default_continuity_window")]
    pub continuity_window: usize,

    /// Maximum number of most-recent calendar records fed into the engine.
    #[serde(default = "default_analysis_window_days")]
    pub analysis_window_days: usize,

    /// How many top scores feed the market health average.
    #[serde(default = "default_market_top_n")]
    pub market_top_n: usize,
}

impl Default for LiquidityParams {
    fn default() -> Self {
        Self {
            continuity_window: default_continuity_window(),
            analysis_window_days: default_analysis_window_days(),
            market_top_n: default_market_top_n(),
        }
    }
}

// =============================================================================
// RuntimeConfig
// =============================================================================

/// Top-level runtime configuration for the ISX Pulse backend.
///
/// Every field has a serde default so that older JSON files missing new fields
/// will still deserialise correctly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    // --- Paths ---------------------------------------------------------------

    /// Root data directory. Bulletins land in `<data_dir>/downloads`,
    /// artifacts in `<data_dir>/reports`.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    // --- Scraping ------------------------------------------------------------

    /// Base URL daily bulletin files are fetched from
    /// (`<base>/<YYYY-MM-DD>.csv`).
    #[serde(default = "default_bulletin_base_url")]
    pub bulletin_base_url: String,

    /// Earliest bulletin date fetched in `initial` mode (YYYY-MM-DD).
    #[serde(default = "default_history_start")]
    pub history_start: String,

    // --- Operations ----------------------------------------------------------

    /// Bounded parallelism for per-symbol analytical work inside a step.
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    /// Wall-clock budget for a single step.
    #[serde(default = "default_step_timeout_secs")]
    pub step_timeout_secs: u64,

    /// Retry policy for retryable step failures.
    #[serde(default)]
    pub retry: RetryPolicy,

    // --- Analytics -----------------------------------------------------------

    #[serde(default)]
    pub summary: SummaryParams,

    #[serde(default)]
    pub liquidity: LiquidityParams,

    // --- Hub -----------------------------------------------------------------

    /// Outbound buffer size per WebSocket subscriber. A subscriber whose
    /// buffer is full is dropped rather than blocking the publisher.
    #[serde(default = "default_subscriber_buffer")]
    pub subscriber_buffer: usize,

    // --- Licensing -----------------------------------------------------------

    /// Activated license key. Absent until the user activates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license_key: Option<String>,

    /// Remote validation endpoint.
    #[serde(default = "default_activation_url")]
    pub license_activation_url: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            bulletin_base_url: default_bulletin_base_url(),
            history_start: default_history_start(),
            max_workers: default_max_workers(),
            step_timeout_secs: default_step_timeout_secs(),
            retry: RetryPolicy::default(),
            summary: SummaryParams::default(),
            liquidity: LiquidityParams::default(),
            subscriber_buffer: default_subscriber_buffer(),
            license_key: None,
            license_activation_url: default_activation_url(),
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from a JSON file at `path`.
    ///
    /// If the file does not exist, returns an error so the caller can fall
    /// back to defaults with a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read runtime config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse runtime config from {}", path.display()))?;

        info!(
            path = %path.display(),
            data_dir = %config.data_dir.display(),
            max_workers = config.max_workers,
            "runtime config loaded"
        );

        Ok(config)
    }

    /// Persist the current configuration to `path` using an atomic write
    /// (write to `.tmp`, then rename).
    ///
    /// This prevents corruption if the process crashes mid-write.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content = serde_json::to_string_pretty(self)
            .context("failed to serialise runtime config to JSON")?;

        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "runtime config saved (atomic)");
        Ok(())
    }

    /// Reject out-of-range values before any operation consumes the config.
    pub fn validate(&self) -> PulseResult<()> {
        if self.summary.max_last_n_days < 1 || self.summary.max_last_n_days > 252 {
            return Err(PulseError::Validation(format!(
                "summary.max_last_n_days must be in [1, 252], got {}",
                self.summary.max_last_n_days
            )));
        }
        if self.max_workers == 0 {
            return Err(PulseError::Validation(
                "max_workers must be at least 1".to_string(),
            ));
        }
        if self.retry.backoff_factor < 1.0 {
            return Err(PulseError::Validation(format!(
                "retry.backoff_factor must be >= 1.0, got {}",
                self.retry.backoff_factor
            )));
        }
        if self.liquidity.continuity_window == 0 {
            return Err(PulseError::Validation(
                "liquidity.continuity_window must be at least 1".to_string(),
            ));
        }
        chrono::NaiveDate::parse_from_str(&self.history_start, "%Y-%m-%d").map_err(|e| {
            PulseError::Validation(format!("history_start is not a YYYY-MM-DD date: {e}"))
        })?;
        Ok(())
    }

    /// Directory downloaded bulletin files land in.
    pub fn downloads_dir(&self) -> PathBuf {
        self.data_dir.join("downloads")
    }

    /// Directory generated artifacts land in.
    pub fn reports_dir(&self) -> PathBuf {
        self.data_dir.join("reports")
    }

    /// Path of the canonical combined trade record artifact.
    pub fn combined_csv_path(&self) -> PathBuf {
        self.reports_dir().join("combined_trades.csv")
    }
}
