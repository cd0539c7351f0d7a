// =============================================================================
// Orchestrator — runs one operation at a time, step by step
// =============================================================================
//
// The orchestrator exclusively owns the live Operation object; everything
// else sees snapshots. A submitted operation runs on its own worker task:
// steps execute strictly in declared order, each bounded by the step timeout
// and the operation's cancellation token. Retryable failures back off
// exponentially per the retry policy; a final failure or a cancellation
// terminates the operation and runs step cleanups best-effort.
//
// Progress flows one way: step work publishes through its ProgressReporter,
// the reporter updates the shared snapshot and broadcasts through the hub.
// Subscribers never reach back into operation state.
// =============================================================================

use std::collections::VecDeque;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use parking_lot::{Mutex, RwLock};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::envelope::{
    Envelope, OPERATION_CANCELLED, OPERATION_COMPLETED, OPERATION_FAILED, OPERATION_RESET,
    OPERATION_STARTED,
};
use crate::errors::{PulseError, PulseResult};
use crate::hub::Hub;
use crate::operations::operation::{Operation, OperationConfig};
use crate::runtime_config::RuntimeConfig;
use crate::types::{OperationType, RunStatus};

/// How many finished operation snapshots the history ring retains.
const MAX_HISTORY: usize = 50;

/// Result of a successfully completed step.
#[derive(Debug, Clone, Default)]
pub struct StepOutcome {
    pub items_processed: u64,
    pub items_failed: u64,
    pub files_written: Vec<String>,
    pub message: Option<String>,
}

/// Everything a step needs while running.
pub struct StepContext {
    pub operation_id: String,
    pub step_id: String,
    pub config: OperationConfig,
    pub runtime: Arc<RuntimeConfig>,
    pub cancel: CancellationToken,
    pub reporter: ProgressReporter,
}

/// Capability set of one unit of work inside an operation.
pub trait StepWork: Send + Sync {
    fn id(&self) -> &str;
    fn name(&self) -> &str;
    fn dependencies(&self) -> Vec<String> {
        Vec::new()
    }
    /// Reject configurations this step cannot run with.
    fn validate(&self, _config: &OperationConfig) -> PulseResult<()> {
        Ok(())
    }
    /// Expected item count, used to seed `items_total` before the run.
    /// Zero means unknown; the step reports the real total as it learns it.
    fn estimate_items(&self, _config: &OperationConfig) -> u64 {
        0
    }
    fn run<'a>(&'a self, ctx: &'a StepContext) -> BoxFuture<'a, PulseResult<StepOutcome>>;
    /// Best-effort cleanup when the operation is cancelled.
    fn on_cancel(&self) {}
}

// =============================================================================
// Progress reporting
// =============================================================================

/// Publishes fine-grained progress for one step: updates the shared
/// operation snapshot, then fans the envelope out through the hub.
#[derive(Clone)]
pub struct ProgressReporter {
    hub: Arc<Hub>,
    shared: Arc<RwLock<Operation>>,
    step_idx: usize,
}

impl ProgressReporter {
    pub(crate) fn new(hub: Arc<Hub>, shared: Arc<RwLock<Operation>>, step_idx: usize) -> Self {
        Self {
            hub,
            shared,
            step_idx,
        }
    }

    pub fn report(&self, progress: f64, processed: u64, total: u64, message: Option<&str>) {
        let (operation_id, step_id) = {
            let mut op = self.shared.write();
            let step = &mut op.steps[self.step_idx];
            step.state.progress = progress.clamp(0.0, 100.0);
            step.state.items_processed = processed;
            step.state.items_total = total;
            (op.id.clone(), op.steps[self.step_idx].id.clone())
        };
        self.hub.broadcast(&Envelope::progress(
            &operation_id,
            &step_id,
            progress.clamp(0.0, 100.0),
            processed,
            total,
            message,
        ));
    }

    /// Console-style output line forwarded to subscribers.
    pub fn output(&self, level: &str, message: &str) {
        self.hub.broadcast(&Envelope::output(level, message));
    }

    /// Announce a refreshed artifact so connected UIs reload it.
    pub fn data_update(&self, subtype: &str, data: serde_json::Value) {
        self.hub
            .broadcast(&Envelope::data_update(subtype, "refresh", data));
    }
}

// =============================================================================
// Orchestrator
// =============================================================================

struct RunningOp {
    id: String,
    shared: Arc<RwLock<Operation>>,
    token: CancellationToken,
}

/// Cheap to clone: the worker task carries its own handle to the shared
/// slot and history.
#[derive(Clone)]
pub struct Orchestrator {
    hub: Arc<Hub>,
    current: Arc<Mutex<Option<RunningOp>>>,
    history: Arc<RwLock<VecDeque<Operation>>>,
}

impl Orchestrator {
    pub fn new(hub: Arc<Hub>) -> Self {
        Self {
            hub,
            current: Arc::new(Mutex::new(None)),
            history: Arc::new(RwLock::new(VecDeque::new())),
        }
    }

    /// Submit an operation. Fails with a conflict while another operation is
    /// live. On success the operation runs on its own task and its id is
    /// returned immediately.
    pub fn start(
        &self,
        op_type: OperationType,
        config: OperationConfig,
        steps: Vec<Box<dyn StepWork>>,
        runtime: Arc<RuntimeConfig>,
    ) -> PulseResult<String> {
        for step in &steps {
            step.validate(&config)
                .map_err(|e| e.with_context(format!("step {}", step.id())))?;
        }

        let specs: Vec<(String, String, Vec<String>)> = steps
            .iter()
            .map(|s| (s.id().to_string(), s.name().to_string(), s.dependencies()))
            .collect();
        let spec_refs: Vec<(&str, &str, Vec<&str>)> = specs
            .iter()
            .map(|(id, name, deps)| {
                (
                    id.as_str(),
                    name.as_str(),
                    deps.iter().map(|d| d.as_str()).collect::<Vec<&str>>(),
                )
            })
            .collect();
        let spec_slices: Vec<(&str, &str, &[&str])> = spec_refs
            .iter()
            .map(|(id, name, deps)| (*id, *name, deps.as_slice()))
            .collect();

        let operation = Operation::new(op_type, config, &spec_slices)?;
        let operation_id = operation.id.clone();

        let mut current = self.current.lock();
        if let Some(running) = current.as_ref() {
            if !running.shared.read().status.is_terminal() {
                return Err(PulseError::OperationConflict(format!(
                    "operation {} is already running",
                    running.id
                )));
            }
        }

        let shared = Arc::new(RwLock::new(operation));
        let token = CancellationToken::new();
        *current = Some(RunningOp {
            id: operation_id.clone(),
            shared: shared.clone(),
            token: token.clone(),
        });
        drop(current);

        info!(operation_id = %operation_id, %op_type, "operation accepted");

        let orchestrator = self.clone();
        tokio::spawn(async move {
            orchestrator.run_worker(shared, steps, runtime, token).await;
        });

        Ok(operation_id)
    }

    /// Cooperatively cancel the live operation.
    pub fn cancel(&self, operation_id: &str) -> PulseResult<()> {
        let current = self.current.lock();
        match current.as_ref() {
            Some(running) if running.id == operation_id => {
                if running.shared.read().status.is_terminal() {
                    return Err(PulseError::Validation(format!(
                        "operation {operation_id} has already finished"
                    )));
                }
                warn!(%operation_id, "cancellation requested");
                running.token.cancel();
                Ok(())
            }
            _ => Err(PulseError::Validation(format!(
                "operation {operation_id} is not running"
            ))),
        }
    }

    /// Snapshot of the live operation, if any.
    pub fn current(&self) -> Option<Operation> {
        self.current
            .lock()
            .as_ref()
            .map(|running| running.shared.read().clone())
    }

    /// Snapshot of one operation by id (live or finished).
    pub fn get(&self, operation_id: &str) -> Option<Operation> {
        if let Some(running) = self.current.lock().as_ref() {
            if running.id == operation_id {
                return Some(running.shared.read().clone());
            }
        }
        self.history
            .read()
            .iter()
            .find(|op| op.id == operation_id)
            .cloned()
    }

    /// Recent operations, newest first (live operation included).
    pub fn recent(&self) -> Vec<Operation> {
        let mut out = Vec::new();
        if let Some(op) = self.current() {
            out.push(op);
        }
        let history = self.history.read();
        for op in history.iter().rev() {
            if out.first().map(|o: &Operation| o.id != op.id).unwrap_or(true) {
                out.push(op.clone());
            }
        }
        out
    }

    /// Cancel the live operation (if any) during shutdown.
    pub fn shutdown(&self) {
        if let Some(running) = self.current.lock().as_ref() {
            running.token.cancel();
        }
    }

    fn archive(&self, snapshot: Operation) {
        let mut history = self.history.write();
        history.push_back(snapshot);
        while history.len() > MAX_HISTORY {
            history.pop_front();
        }
    }

    // -------------------------------------------------------------------------
    // Worker
    // -------------------------------------------------------------------------

    async fn run_worker(
        self,
        shared: Arc<RwLock<Operation>>,
        steps: Vec<Box<dyn StepWork>>,
        runtime: Arc<RuntimeConfig>,
        token: CancellationToken,
    ) {
        let (operation_id, op_type, config) = {
            let mut op = shared.write();
            if let Err(e) = op.transition(RunStatus::Running) {
                error!(error = %e, "operation failed to enter running state");
                return;
            }
            (op.id.clone(), op.op_type, op.config.clone())
        };

        self.hub.broadcast(&Envelope::new(OPERATION_RESET, json!({})));
        self.hub.broadcast(
            &Envelope::new(
                OPERATION_STARTED,
                json!({
                    "operation_id": operation_id,
                    "operation_type": op_type,
                    "steps": shared.read().steps.iter().map(|s| s.id.clone()).collect::<Vec<_>>(),
                }),
            )
            .with_trace(&operation_id),
        );

        let mut files_written: Vec<String> = Vec::new();

        for (step_idx, work) in steps.iter().enumerate() {
            if token.is_cancelled() {
                self.finish_cancelled(&shared, &steps, &operation_id).await;
                return;
            }

            let step_id = work.id().to_string();
            {
                let mut op = shared.write();
                op.steps[step_idx].state.items_total = work.estimate_items(&config);
                if op.transition_step(step_idx, RunStatus::Running).is_err() {
                    continue;
                }
            }
            self.hub.broadcast(&Envelope::operation_progress(
                &operation_id,
                &step_id,
                RunStatus::Running,
                json!({ "items_total": shared.read().steps[step_idx].state.items_total }),
            ));

            let ctx = StepContext {
                operation_id: operation_id.clone(),
                step_id: step_id.clone(),
                config: config.clone(),
                runtime: runtime.clone(),
                cancel: token.clone(),
                reporter: ProgressReporter::new(self.hub.clone(), shared.clone(), step_idx),
            };

            match self
                .run_step_with_retries(&shared, step_idx, work.as_ref(), &ctx, &token)
                .await
            {
                Ok(outcome) => {
                    {
                        let mut op = shared.write();
                        op.steps[step_idx].metrics.items_processed = outcome.items_processed;
                        op.steps[step_idx].metrics.items_failed = outcome.items_failed;
                        op.steps[step_idx].state.progress = 100.0;
                        let _ = op.transition_step(step_idx, RunStatus::Completed);
                    }
                    files_written.extend(outcome.files_written.iter().cloned());
                    self.hub.broadcast(&Envelope::operation_progress(
                        &operation_id,
                        &step_id,
                        RunStatus::Completed,
                        json!({
                            "items_processed": outcome.items_processed,
                            "items_failed": outcome.items_failed,
                            "message": outcome.message,
                        }),
                    ));
                }
                Err(PulseError::Cancelled) => {
                    let _ = shared.write().transition_step(step_idx, RunStatus::Cancelled);
                    self.finish_cancelled(&shared, &steps, &operation_id).await;
                    return;
                }
                Err(err) => {
                    let can_retry = err.is_retryable();
                    {
                        let mut op = shared.write();
                        op.steps[step_idx].state.last_error = Some(err.to_string());
                        let _ = op.transition_step(step_idx, RunStatus::Failed);
                        op.error = Some(err.to_string());
                        let _ = op.transition(RunStatus::Failed);
                    }
                    error!(
                        %operation_id,
                        step_id = %step_id,
                        error = %err,
                        "operation failed"
                    );
                    self.hub.broadcast(
                        &Envelope::new(
                            OPERATION_FAILED,
                            json!({
                                "operation_id": operation_id,
                                "step_id": step_id,
                                "error": err.to_string(),
                                "error_code": err.error_code(),
                                "can_retry": can_retry,
                            }),
                        )
                        .with_trace(&operation_id),
                    );
                    self.finish(&shared);
                    return;
                }
            }
        }

        // All steps completed.
        let snapshot = {
            let mut op = shared.write();
            let _ = op.transition(RunStatus::Completed);
            op.clone()
        };
        let duration_ms = snapshot
            .started_at
            .zip(snapshot.ended_at)
            .map(|(s, e)| (e - s).num_milliseconds().max(0))
            .unwrap_or(0);
        info!(%operation_id, duration_ms, files = files_written.len(), "operation completed");
        self.hub.broadcast(
            &Envelope::new(
                OPERATION_COMPLETED,
                json!({
                    "operation_id": operation_id,
                    "files_written": files_written,
                    "duration_ms": duration_ms,
                    "metrics": snapshot.metrics,
                }),
            )
            .with_trace(&operation_id),
        );
        self.finish(&shared);
    }

    /// Run one step with the operation's retry policy. Only retryable error
    /// kinds re-run; the backoff is `initial * factor^attempt`, capped.
    async fn run_step_with_retries(
        &self,
        shared: &Arc<RwLock<Operation>>,
        step_idx: usize,
        work: &dyn StepWork,
        ctx: &StepContext,
        token: &CancellationToken,
    ) -> PulseResult<StepOutcome> {
        let retry = ctx.config.retry.clone();
        let timeout = std::time::Duration::from_secs(ctx.config.step_timeout_secs);
        let mut attempt: u32 = 0;

        loop {
            let result = tokio::select! {
                _ = token.cancelled() => Err(PulseError::Cancelled),
                run = tokio::time::timeout(timeout, work.run(ctx)) => match run {
                    Ok(step_result) => step_result,
                    Err(_) => Err(PulseError::Timeout(format!(
                        "step {} exceeded {}s",
                        ctx.step_id, ctx.config.step_timeout_secs
                    ))),
                },
            };

            match result {
                Ok(outcome) => return Ok(outcome),
                Err(err) => {
                    let next_attempt = attempt + 1;
                    if !err.is_retryable() || next_attempt >= retry.max_attempts {
                        return Err(err);
                    }

                    let delay = retry.delay_for_attempt(attempt);
                    warn!(
                        step_id = %ctx.step_id,
                        attempt = next_attempt,
                        max_attempts = retry.max_attempts,
                        delay_secs = delay.as_secs_f64(),
                        error = %err,
                        "step failed — retrying after backoff"
                    );
                    {
                        let mut op = shared.write();
                        op.steps[step_idx].state.retry_count = next_attempt;
                        op.steps[step_idx].state.last_error = Some(err.to_string());
                        let _ = op.transition_step(step_idx, RunStatus::Retrying);
                        let _ = op.transition(RunStatus::Retrying);
                    }
                    self.hub.broadcast(&Envelope::operation_progress(
                        &ctx.operation_id,
                        &ctx.step_id,
                        RunStatus::Retrying,
                        json!({ "attempt": next_attempt, "delay_secs": delay.as_secs_f64() }),
                    ));
                    self.hub.broadcast(&Envelope::error(
                        err.error_code(),
                        &err.to_string(),
                        true,
                        Some("the step will be retried automatically"),
                    ));

                    tokio::select! {
                        _ = token.cancelled() => return Err(PulseError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }

                    {
                        let mut op = shared.write();
                        let _ = op.transition_step(step_idx, RunStatus::Running);
                        let _ = op.transition(RunStatus::Running);
                    }
                    attempt = next_attempt;
                }
            }
        }
    }

    async fn finish_cancelled(
        &self,
        shared: &Arc<RwLock<Operation>>,
        steps: &[Box<dyn StepWork>],
        operation_id: &str,
    ) {
        // Best-effort cleanup for every step.
        for step in steps {
            step.on_cancel();
        }

        let snapshot = {
            let mut op = shared.write();
            let _ = op.transition(RunStatus::Cancelled);
            op.clone()
        };
        warn!(%operation_id, "operation cancelled");
        self.hub.broadcast(
            &Envelope::new(
                OPERATION_CANCELLED,
                json!({
                    "operation_id": operation_id,
                    "metrics": snapshot.metrics,
                }),
            )
            .with_trace(operation_id),
        );
        self.finish(shared);
    }

    /// Archive the terminal snapshot and release the single-operation slot.
    fn finish(&self, shared: &Arc<RwLock<Operation>>) {
        let snapshot = shared.read().clone();
        let mut current = self.current.lock();
        if current
            .as_ref()
            .map(|running| running.id == snapshot.id)
            .unwrap_or(false)
        {
            *current = None;
        }
        drop(current);
        self.archive(snapshot);
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime_config::RetryPolicy;
    use crate::types::OperationMode;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn test_config(max_attempts: u32) -> OperationConfig {
        OperationConfig {
            mode: OperationMode::Accumulative,
            from: None,
            to: None,
            retry: RetryPolicy {
                max_attempts,
                initial_delay_secs: 1.0,
                backoff_factor: 2.0,
                max_delay_secs: 30.0,
            },
            step_timeout_secs: 600,
            max_workers: 1,
        }
    }

    /// Step that fails with a retryable error `failures` times, then succeeds.
    struct FlakyStep {
        attempts: Arc<AtomicU32>,
        failures: u32,
    }

    impl StepWork for FlakyStep {
        fn id(&self) -> &str {
            "flaky"
        }
        fn name(&self) -> &str {
            "Flaky step"
        }
        fn run<'a>(&'a self, _ctx: &'a StepContext) -> BoxFuture<'a, PulseResult<StepOutcome>> {
            Box::pin(async move {
                let n = self.attempts.fetch_add(1, Ordering::SeqCst);
                if n < self.failures {
                    Err(PulseError::Network("bulletin host unreachable".to_string()))
                } else {
                    Ok(StepOutcome {
                        items_processed: 7,
                        ..StepOutcome::default()
                    })
                }
            })
        }
    }

    /// Step that blocks until cancelled.
    struct HangingStep {
        cancelled: Arc<AtomicU32>,
    }

    impl StepWork for HangingStep {
        fn id(&self) -> &str {
            "hang"
        }
        fn name(&self) -> &str {
            "Hanging step"
        }
        fn run<'a>(&'a self, ctx: &'a StepContext) -> BoxFuture<'a, PulseResult<StepOutcome>> {
            Box::pin(async move {
                ctx.cancel.cancelled().await;
                Err(PulseError::Cancelled)
            })
        }
        fn on_cancel(&self) {
            self.cancelled.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct OkStep {
        id: &'static str,
        deps: Vec<String>,
    }

    impl StepWork for OkStep {
        fn id(&self) -> &str {
            self.id
        }
        fn name(&self) -> &str {
            self.id
        }
        fn dependencies(&self) -> Vec<String> {
            self.deps.clone()
        }
        fn run<'a>(&'a self, ctx: &'a StepContext) -> BoxFuture<'a, PulseResult<StepOutcome>> {
            Box::pin(async move {
                ctx.reporter.report(100.0, 1, 1, Some("done"));
                Ok(StepOutcome {
                    items_processed: 1,
                    files_written: vec![format!("{}.csv", ctx.step_id)],
                    ..StepOutcome::default()
                })
            })
        }
    }

    fn harness() -> (Arc<Orchestrator>, Arc<Hub>, Arc<RuntimeConfig>) {
        let hub = Arc::new(Hub::new(64));
        let orchestrator = Arc::new(Orchestrator::new(hub.clone()));
        (orchestrator, hub, Arc::new(RuntimeConfig::default()))
    }

    async fn wait_terminal(orchestrator: &Arc<Orchestrator>, id: &str) -> Operation {
        loop {
            if let Some(op) = orchestrator.get(id) {
                if op.status.is_terminal() {
                    return op;
                }
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn pipeline_completes_and_emits_lifecycle_events() {
        let (orchestrator, hub, runtime) = harness();
        let (_, mut rx) = hub.subscribe();

        let steps: Vec<Box<dyn StepWork>> = vec![
            Box::new(OkStep { id: "scrape", deps: vec![] }),
            Box::new(OkStep { id: "process", deps: vec!["scrape".to_string()] }),
        ];
        let id = orchestrator
            .start(OperationType::Processing, test_config(3), steps, runtime)
            .unwrap();

        let op = wait_terminal(&orchestrator, &id).await;
        assert_eq!(op.status, RunStatus::Completed);
        assert_eq!(op.metrics.steps_completed, 2);
        assert_eq!(op.metrics.items_processed, 2);

        // Collect the lifecycle event kinds seen by the subscriber.
        let mut kinds = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            let value: serde_json::Value = serde_json::from_str(&msg).unwrap();
            kinds.push(value["type"].as_str().unwrap().to_string());
        }
        assert!(kinds.contains(&"operation:reset".to_string()));
        assert!(kinds.contains(&"operation:started".to_string()));
        assert!(kinds.contains(&"operation:progress".to_string()));
        assert!(kinds.contains(&"progress".to_string()));
        let completed_pos = kinds.iter().position(|k| k == "operation:completed");
        assert!(completed_pos.is_some());
        // Completion is the final lifecycle event.
        assert_eq!(completed_pos.unwrap(), kinds.len() - 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retryable_failure_backs_off_then_fails() {
        let (orchestrator, hub, runtime) = harness();
        let (_, mut rx) = hub.subscribe();

        let attempts = Arc::new(AtomicU32::new(0));
        let steps: Vec<Box<dyn StepWork>> = vec![Box::new(FlakyStep {
            attempts: attempts.clone(),
            failures: u32::MAX, // never succeeds
        })];

        let start = tokio::time::Instant::now();
        let id = orchestrator
            .start(OperationType::Scraping, test_config(3), steps, runtime)
            .unwrap();
        let op = wait_terminal(&orchestrator, &id).await;
        let elapsed = start.elapsed();

        assert_eq!(op.status, RunStatus::Failed);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert_eq!(op.steps[0].state.retry_count, 2);
        assert!(op.steps[0].state.last_error.as_deref().unwrap().contains("unreachable"));

        // Backoff slept 1s then 2s; the failure lands at t ~= 3s.
        assert!(elapsed >= std::time::Duration::from_secs(3), "elapsed {elapsed:?}");
        assert!(elapsed < std::time::Duration::from_secs(4), "elapsed {elapsed:?}");

        // The failed event names the last error.
        let mut failed_event = None;
        while let Ok(msg) = rx.try_recv() {
            let value: serde_json::Value = serde_json::from_str(&msg).unwrap();
            if value["type"] == "operation:failed" {
                failed_event = Some(value);
            }
        }
        let failed = failed_event.expect("operation:failed not broadcast");
        assert_eq!(failed["data"]["step_id"], "flaky");
        assert_eq!(failed["data"]["error_code"], "NETWORK_ERROR");
        assert_eq!(failed["data"]["can_retry"], true);
        assert!(failed["data"]["error"]
            .as_str()
            .unwrap()
            .contains("unreachable"));
    }

    #[tokio::test(start_paused = true)]
    async fn flaky_step_recovers_within_attempts() {
        let (orchestrator, _, runtime) = harness();
        let attempts = Arc::new(AtomicU32::new(0));
        let steps: Vec<Box<dyn StepWork>> = vec![Box::new(FlakyStep {
            attempts: attempts.clone(),
            failures: 2,
        })];
        let id = orchestrator
            .start(OperationType::Scraping, test_config(3), steps, runtime)
            .unwrap();
        let op = wait_terminal(&orchestrator, &id).await;
        assert_eq!(op.status, RunStatus::Completed);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert_eq!(op.steps[0].metrics.items_processed, 7);
    }

    #[tokio::test(start_paused = true)]
    async fn non_retryable_failure_fails_immediately() {
        struct BadConfigStep;
        impl StepWork for BadConfigStep {
            fn id(&self) -> &str {
                "bad"
            }
            fn name(&self) -> &str {
                "Bad"
            }
            fn run<'a>(&'a self, _: &'a StepContext) -> BoxFuture<'a, PulseResult<StepOutcome>> {
                Box::pin(async { Err(PulseError::Validation("bad date range".to_string())) })
            }
        }

        let (orchestrator, _, runtime) = harness();
        let start = tokio::time::Instant::now();
        let id = orchestrator
            .start(
                OperationType::Scraping,
                test_config(5),
                vec![Box::new(BadConfigStep)],
                runtime,
            )
            .unwrap();
        let op = wait_terminal(&orchestrator, &id).await;
        assert_eq!(op.status, RunStatus::Failed);
        assert_eq!(op.steps[0].state.retry_count, 0);
        // No backoff sleeps happened.
        assert!(start.elapsed() < std::time::Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn second_operation_conflicts_while_first_runs() {
        let (orchestrator, _, runtime) = harness();
        let id = orchestrator
            .start(
                OperationType::Scraping,
                test_config(3),
                vec![Box::new(HangingStep {
                    cancelled: Arc::new(AtomicU32::new(0)),
                })],
                runtime.clone(),
            )
            .unwrap();

        // Give the worker a tick to enter running.
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;

        let err = orchestrator
            .start(
                OperationType::Scraping,
                test_config(3),
                vec![Box::new(OkStep { id: "scrape", deps: vec![] })],
                runtime,
            )
            .unwrap_err();
        assert_eq!(err.error_code(), "OPERATION_CONFLICT");

        orchestrator.cancel(&id).unwrap();
        let op = wait_terminal(&orchestrator, &id).await;
        assert_eq!(op.status, RunStatus::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_runs_cleanup_and_emits_event() {
        let (orchestrator, hub, runtime) = harness();
        let (_, mut rx) = hub.subscribe();
        let cancelled = Arc::new(AtomicU32::new(0));

        let id = orchestrator
            .start(
                OperationType::Scraping,
                test_config(3),
                vec![Box::new(HangingStep {
                    cancelled: cancelled.clone(),
                })],
                runtime.clone(),
            )
            .unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        orchestrator.cancel(&id).unwrap();
        let op = wait_terminal(&orchestrator, &id).await;

        assert_eq!(op.status, RunStatus::Cancelled);
        assert_eq!(cancelled.load(Ordering::SeqCst), 1);

        let mut saw_cancelled = false;
        while let Ok(msg) = rx.try_recv() {
            let value: serde_json::Value = serde_json::from_str(&msg).unwrap();
            if value["type"] == "operation:cancelled" {
                saw_cancelled = true;
                assert!(value["data"]["metrics"].is_object());
            }
        }
        assert!(saw_cancelled);

        // The slot is free again.
        let id2 = orchestrator
            .start(
                OperationType::Scraping,
                test_config(3),
                vec![Box::new(OkStep { id: "scrape", deps: vec![] })],
                runtime,
            )
            .unwrap();
        let op2 = wait_terminal(&orchestrator, &id2).await;
        assert_eq!(op2.status, RunStatus::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn step_timeout_is_retryable_then_fails() {
        struct SlowStep;
        impl StepWork for SlowStep {
            fn id(&self) -> &str {
                "slow"
            }
            fn name(&self) -> &str {
                "Slow"
            }
            fn run<'a>(&'a self, _: &'a StepContext) -> BoxFuture<'a, PulseResult<StepOutcome>> {
                Box::pin(async {
                    tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
                    Ok(StepOutcome::default())
                })
            }
        }

        let (orchestrator, _, runtime) = harness();
        let mut config = test_config(2);
        config.step_timeout_secs = 5;
        let id = orchestrator
            .start(OperationType::Scraping, config, vec![Box::new(SlowStep)], runtime)
            .unwrap();
        let op = wait_terminal(&orchestrator, &id).await;
        assert_eq!(op.status, RunStatus::Failed);
        assert!(op.error.as_deref().unwrap().contains("exceeded"));
        assert_eq!(op.steps[0].state.retry_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn history_keeps_terminal_snapshots() {
        let (orchestrator, _, runtime) = harness();
        for _ in 0..3 {
            let id = orchestrator
                .start(
                    OperationType::Scraping,
                    test_config(3),
                    vec![Box::new(OkStep { id: "scrape", deps: vec![] })],
                    runtime.clone(),
                )
                .unwrap();
            wait_terminal(&orchestrator, &id).await;
        }
        let recent = orchestrator.recent();
        assert_eq!(recent.len(), 3);
        assert!(recent.iter().all(|op| op.status == RunStatus::Completed));
    }
}
