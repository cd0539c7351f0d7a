// =============================================================================
// License Gate — cached validation with graceful degradation
// =============================================================================
//
// The gate wraps an opaque validator behind a read-through cache:
//
//   - valid results are cached 5 minutes, invalid results 1 minute (a short
//     TTL so recovery after re-activation is quick),
//   - a single async lock serializes validation so a burst of requests
//     produces one upstream call; late acquirers recheck the cache first,
//   - the validator call is bounded by a 5 second deadline,
//   - on a network-class failure the request is still allowed when a
//     successful validation happened within the last 24 hours,
//   - an allow-list of path prefixes (health, license management, the WS
//     upgrade) bypasses the gate entirely.
//
// The remote validator never sees the raw key: it receives the SHA-256
// fingerprint and an HMAC-SHA256 signature over the request payload.
// =============================================================================

use std::time::{Duration, Instant};

use futures_util::future::BoxFuture;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::errors::{PulseError, PulseResult};

type HmacSha256 = Hmac<Sha256>;

const VALID_TTL: Duration = Duration::from_secs(5 * 60);
const INVALID_TTL: Duration = Duration::from_secs(60);
const GRACE_WINDOW: Duration = Duration::from_secs(24 * 60 * 60);
const VALIDATOR_DEADLINE: Duration = Duration::from_secs(5);

/// Opaque validity oracle. `Ok(())` means valid; `Err(License)` means the
/// key was rejected; network-class errors get the grace treatment.
pub trait LicenseValidator: Send + Sync {
    fn validate<'a>(&'a self, key: &'a str) -> BoxFuture<'a, PulseResult<()>>;
}

// =============================================================================
// Remote validator
// =============================================================================

#[derive(Serialize)]
struct ValidationRequest {
    fingerprint: String,
    machine: String,
    timestamp: i64,
}

#[derive(Deserialize)]
struct ValidationResponse {
    valid: bool,
    #[serde(default)]
    reason: Option<String>,
}

/// Validator backed by the activation service.
pub struct RemoteValidator {
    client: reqwest::Client,
    url: String,
}

impl RemoteValidator {
    pub fn new(url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(VALIDATOR_DEADLINE)
            .build()
            .unwrap_or_default();
        Self {
            client,
            url: url.into(),
        }
    }

    /// SHA-256 hex fingerprint; the raw key never leaves the process.
    pub fn fingerprint(key: &str) -> String {
        hex::encode(Sha256::digest(key.as_bytes()))
    }

    /// Hex HMAC-SHA256 over `payload`, keyed with the license key.
    fn sign(key: &str, payload: &str) -> String {
        let mut mac =
            HmacSha256::new_from_slice(key.as_bytes()).expect("HMAC accepts any key size");
        mac.update(payload.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Stable per-host identifier for machine binding.
    fn machine_id() -> String {
        let host = std::env::var("HOSTNAME")
            .or_else(|_| std::env::var("COMPUTERNAME"))
            .unwrap_or_else(|_| "unknown-host".to_string());
        hex::encode(&Sha256::digest(host.as_bytes())[..8])
    }
}

impl LicenseValidator for RemoteValidator {
    fn validate<'a>(&'a self, key: &'a str) -> BoxFuture<'a, PulseResult<()>> {
        Box::pin(async move {
            let request = ValidationRequest {
                fingerprint: Self::fingerprint(key),
                machine: Self::machine_id(),
                timestamp: chrono::Utc::now().timestamp(),
            };
            let payload = serde_json::to_string(&request)?;
            let signature = Self::sign(key, &payload);

            let response = self
                .client
                .post(&self.url)
                .header("X-Signature", signature)
                .header("Content-Type", "application/json")
                .body(payload)
                .send()
                .await?;

            let status = response.status();
            if !status.is_success() {
                return Err(PulseError::Network(format!(
                    "license service returned {status}"
                )));
            }

            let body: ValidationResponse = response.json().await?;
            if body.valid {
                Ok(())
            } else {
                Err(PulseError::License(
                    body.reason.unwrap_or_else(|| "license rejected".to_string()),
                ))
            }
        })
    }
}

// =============================================================================
// Gate
// =============================================================================

#[derive(Debug, Clone)]
struct CacheEntry {
    valid: bool,
    reason: Option<String>,
    cached_at: Instant,
    ttl: Duration,
}

impl CacheEntry {
    fn fresh(&self) -> bool {
        self.cached_at.elapsed() < self.ttl
    }
}

#[derive(Default)]
struct GateState {
    entry: Option<CacheEntry>,
    last_success: Option<Instant>,
    error_count: u64,
}

/// Gate status surfaced over the API; never includes key material.
#[derive(Debug, Clone, Serialize)]
pub struct LicenseStatus {
    pub activated: bool,
    pub valid: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub error_count: u64,
    pub grace_active: bool,
}

/// Read-through cache in front of a [`LicenseValidator`].
pub struct LicenseGate {
    validator: Box<dyn LicenseValidator>,
    state: parking_lot::Mutex<GateState>,
    validation_lock: tokio::sync::Mutex<()>,
    exclusions: Vec<String>,
    valid_ttl: Duration,
    invalid_ttl: Duration,
    grace_window: Duration,
}

impl LicenseGate {
    pub fn new(validator: Box<dyn LicenseValidator>, exclusions: Vec<String>) -> Self {
        Self {
            validator,
            state: parking_lot::Mutex::new(GateState::default()),
            validation_lock: tokio::sync::Mutex::new(()),
            exclusions,
            valid_ttl: VALID_TTL,
            invalid_ttl: INVALID_TTL,
            grace_window: GRACE_WINDOW,
        }
    }

    /// Test hook: shrink the cache and grace windows.
    #[cfg(test)]
    fn with_windows(mut self, valid: Duration, invalid: Duration, grace: Duration) -> Self {
        self.valid_ttl = valid;
        self.invalid_ttl = invalid;
        self.grace_window = grace;
        self
    }

    /// Whether `path` bypasses the gate (prefix match on the allow-list).
    pub fn is_excluded(&self, path: &str) -> bool {
        self.exclusions.iter().any(|prefix| path.starts_with(prefix))
    }

    /// Gate a request for `path` with the configured key.
    pub async fn check_request(&self, path: &str, key: Option<&str>) -> PulseResult<()> {
        if self.is_excluded(path) {
            return Ok(());
        }
        self.check(key).await
    }

    /// Resolve validity through the cache, hitting the validator at most
    /// once per expiry across concurrent callers.
    pub async fn check(&self, key: Option<&str>) -> PulseResult<()> {
        let Some(key) = key else {
            return Err(PulseError::License("no license key activated".to_string()));
        };

        if let Some(decision) = self.cached_decision() {
            return decision;
        }

        // Serialize validation; whoever queued behind the winner rechecks
        // the cache instead of hitting the validator again.
        let _guard = self.validation_lock.lock().await;
        if let Some(decision) = self.cached_decision() {
            return decision;
        }

        let outcome = match tokio::time::timeout(VALIDATOR_DEADLINE, self.validator.validate(key))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(PulseError::Timeout("license validation timed out".to_string())),
        };

        match outcome {
            Ok(()) => {
                let mut state = self.state.lock();
                state.entry = Some(CacheEntry {
                    valid: true,
                    reason: None,
                    cached_at: Instant::now(),
                    ttl: self.valid_ttl,
                });
                state.last_success = Some(Instant::now());
                debug!("license validated");
                Ok(())
            }
            Err(PulseError::License(reason)) => {
                let mut state = self.state.lock();
                state.entry = Some(CacheEntry {
                    valid: false,
                    reason: Some(reason.clone()),
                    cached_at: Instant::now(),
                    ttl: self.invalid_ttl,
                });
                warn!(%reason, "license rejected");
                Err(PulseError::License(reason))
            }
            Err(err) => {
                // Network-class failure: record it, then degrade gracefully
                // if we validated successfully within the grace window.
                let grace = {
                    let mut state = self.state.lock();
                    state.error_count += 1;
                    state.entry = Some(CacheEntry {
                        valid: false,
                        reason: Some(err.to_string()),
                        cached_at: Instant::now(),
                        ttl: self.invalid_ttl,
                    });
                    state
                        .last_success
                        .map(|at| at.elapsed() < self.grace_window)
                        .unwrap_or(false)
                };
                if grace {
                    warn!(error = %err, "license service unreachable — allowing on recent success");
                    Ok(())
                } else {
                    warn!(error = %err, "license service unreachable — denying");
                    Err(err)
                }
            }
        }
    }

    /// One-off validation used by the activation endpoint; bypasses and then
    /// refreshes the cache.
    pub async fn activate(&self, key: &str) -> PulseResult<()> {
        let _guard = self.validation_lock.lock().await;
        let outcome =
            match tokio::time::timeout(VALIDATOR_DEADLINE, self.validator.validate(key)).await {
                Ok(result) => result,
                Err(_) => Err(PulseError::Timeout(
                    "license validation timed out".to_string(),
                )),
            };

        let mut state = self.state.lock();
        match outcome {
            Ok(()) => {
                state.entry = Some(CacheEntry {
                    valid: true,
                    reason: None,
                    cached_at: Instant::now(),
                    ttl: self.valid_ttl,
                });
                state.last_success = Some(Instant::now());
                info!("license activated");
                Ok(())
            }
            Err(err) => {
                state.entry = Some(CacheEntry {
                    valid: false,
                    reason: Some(err.to_string()),
                    cached_at: Instant::now(),
                    ttl: self.invalid_ttl,
                });
                Err(err)
            }
        }
    }

    pub fn status(&self, activated: bool) -> LicenseStatus {
        let state = self.state.lock();
        let (valid, reason) = match &state.entry {
            Some(entry) if entry.fresh() => (Some(entry.valid), entry.reason.clone()),
            _ => (None, None),
        };
        LicenseStatus {
            activated,
            valid,
            reason,
            error_count: state.error_count,
            grace_active: state
                .last_success
                .map(|at| at.elapsed() < self.grace_window)
                .unwrap_or(false),
        }
    }

    fn cached_decision(&self) -> Option<PulseResult<()>> {
        let state = self.state.lock();
        let entry = state.entry.as_ref()?;
        if !entry.fresh() {
            return None;
        }
        if entry.valid {
            Some(Ok(()))
        } else {
            Some(Err(PulseError::License(
                entry
                    .reason
                    .clone()
                    .unwrap_or_else(|| "license invalid".to_string()),
            )))
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    /// Scripted validator: pops the next result per call and counts calls.
    struct ScriptedValidator {
        calls: Arc<AtomicU64>,
        script: parking_lot::Mutex<Vec<PulseResult<()>>>,
        delay: Duration,
    }

    impl ScriptedValidator {
        fn new(script: Vec<PulseResult<()>>) -> (Self, Arc<AtomicU64>) {
            let calls = Arc::new(AtomicU64::new(0));
            (
                Self {
                    calls: calls.clone(),
                    script: parking_lot::Mutex::new(script),
                    delay: Duration::ZERO,
                },
                calls,
            )
        }
    }

    impl LicenseValidator for ScriptedValidator {
        fn validate<'a>(&'a self, _key: &'a str) -> BoxFuture<'a, PulseResult<()>> {
            Box::pin(async move {
                self.calls.fetch_add(1, Ordering::SeqCst);
                if !self.delay.is_zero() {
                    tokio::time::sleep(self.delay).await;
                }
                let mut script = self.script.lock();
                if script.is_empty() {
                    Ok(())
                } else {
                    script.remove(0)
                }
            })
        }
    }

    fn gate(script: Vec<PulseResult<()>>) -> (LicenseGate, Arc<AtomicU64>) {
        let (validator, calls) = ScriptedValidator::new(script);
        (
            LicenseGate::new(Box::new(validator), vec!["/api/v1/health".to_string()]),
            calls,
        )
    }

    #[tokio::test]
    async fn missing_key_denied_without_validator_call() {
        let (gate, calls) = gate(vec![]);
        let err = gate.check(None).await.unwrap_err();
        assert_eq!(err.error_code(), "LICENSE_INVALID");
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn valid_result_cached_across_calls() {
        let (gate, calls) = gate(vec![Ok(())]);
        gate.check(Some("KEY")).await.unwrap();
        gate.check(Some("KEY")).await.unwrap();
        gate.check(Some("KEY")).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn invalid_result_cached_with_short_ttl() {
        let (inner, calls) = ScriptedValidator::new(vec![
            Err(PulseError::License("expired".to_string())),
            Ok(()),
        ]);
        let gate = LicenseGate::new(Box::new(inner), vec![]).with_windows(
            Duration::from_secs(300),
            Duration::from_millis(20),
            Duration::from_secs(300),
        );

        assert!(gate.check(Some("KEY")).await.is_err());
        // Within the invalid TTL: served from cache.
        assert!(gate.check(Some("KEY")).await.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // After the short TTL the validator is consulted again and passes.
        tokio::time::sleep(Duration::from_millis(30)).await;
        gate.check(Some("KEY")).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn network_failure_with_recent_success_allows() {
        let (gate, _) = gate(vec![
            Ok(()),
            Err(PulseError::Network("network unreachable".to_string())),
        ]);
        let gate = gate.with_windows(
            Duration::from_millis(10), // valid entry expires fast
            Duration::from_secs(60),
            Duration::from_secs(3600),
        );

        // First call validates and records last_success.
        gate.check(Some("KEY")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        // Second call hits the network error but is allowed on grace.
        gate.check(Some("KEY")).await.unwrap();

        let status = gate.status(true);
        assert!(status.error_count >= 1);
        assert_eq!(status.valid, Some(false));
        assert!(status.grace_active);
    }

    #[tokio::test]
    async fn network_failure_without_history_denies() {
        let (gate, _) = gate(vec![Err(PulseError::Network("unreachable".to_string()))]);
        let err = gate.check(Some("KEY")).await.unwrap_err();
        assert_eq!(err.error_code(), "NETWORK_ERROR");
        assert!(!gate.status(true).grace_active);
    }

    #[tokio::test]
    async fn concurrent_checks_validate_once() {
        let (mut validator, calls) = ScriptedValidator::new(vec![Ok(())]);
        validator.delay = Duration::from_millis(50);
        let gate = Arc::new(LicenseGate::new(Box::new(validator), vec![]));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let gate = gate.clone();
            handles.push(tokio::spawn(async move { gate.check(Some("KEY")).await }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        // The stampede collapsed into a single upstream call.
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn excluded_paths_bypass_gate() {
        let (gate, calls) = gate(vec![]);
        gate.check_request("/api/v1/health", None).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        let err = gate.check_request("/api/v1/operations", None).await.unwrap_err();
        assert_eq!(err.error_code(), "LICENSE_INVALID");
    }

    #[tokio::test]
    async fn activation_refreshes_cache() {
        let (gate, calls) = gate(vec![
            Err(PulseError::License("expired".to_string())),
            Ok(()),
        ]);
        assert!(gate.check(Some("OLD")).await.is_err());
        gate.activate("NEW").await.unwrap();
        // Fresh valid entry: no further validator call needed.
        gate.check(Some("NEW")).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(gate.status(true).valid, Some(true));
    }

    #[test]
    fn fingerprint_is_stable_hex() {
        let fp = RemoteValidator::fingerprint("ISX-KEY-123");
        assert_eq!(fp.len(), 64);
        assert_eq!(fp, RemoteValidator::fingerprint("ISX-KEY-123"));
        assert_ne!(fp, RemoteValidator::fingerprint("ISX-KEY-124"));
    }

    #[test]
    fn signature_depends_on_key_and_payload() {
        let sig1 = RemoteValidator::sign("key-a", "payload");
        let sig2 = RemoteValidator::sign("key-b", "payload");
        let sig3 = RemoteValidator::sign("key-a", "payload2");
        assert_ne!(sig1, sig2);
        assert_ne!(sig1, sig3);
        assert_eq!(sig1, RemoteValidator::sign("key-a", "payload"));
    }
}
