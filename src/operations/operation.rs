// =============================================================================
// Operation model — workflow instance, ordered steps, checked transitions
// =============================================================================
//
// An Operation is the unit the orchestrator runs: an ordered list of steps,
// each with dependencies on *earlier* step ids. Construction validates the
// step graph (duplicate ids, forward references, and therefore cycles are
// configuration errors). Status changes go through `transition`, which
// enforces the lifecycle from `RunStatus::can_transition_to`; terminal
// operations are immutable.
// =============================================================================

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{PulseError, PulseResult};
use crate::runtime_config::RetryPolicy;
use crate::types::{OperationMode, OperationType, RunStatus};

/// Per-operation execution settings, resolved from the runtime config plus
/// the caller's request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationConfig {
    pub mode: OperationMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<NaiveDate>,
    pub retry: RetryPolicy,
    pub step_timeout_secs: u64,
    pub max_workers: usize,
}

/// Mutable progress counters for a step.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StepState {
    /// 0–100.
    pub progress: f64,
    pub items_processed: u64,
    pub items_total: u64,
    pub retry_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// Timing and throughput captured per step.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StepMetrics {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_ms: u64,
    pub items_processed: u64,
    pub items_failed: u64,
}

/// One ordered unit of work inside an operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub id: String,
    pub name: String,
    pub dependencies: Vec<String>,
    pub status: RunStatus,
    pub state: StepState,
    pub metrics: StepMetrics,
}

/// Aggregate counters updated live while an operation runs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OperationMetrics {
    pub steps_completed: usize,
    pub steps_failed: usize,
    pub steps_skipped: usize,
    pub items_processed: u64,
    pub avg_step_time_ms: u64,
}

/// A running (or finished) workflow instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Operation {
    pub id: String,
    #[serde(rename = "type")]
    pub op_type: OperationType,
    pub status: RunStatus,
    pub config: OperationConfig,
    pub steps: Vec<Step>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub metrics: OperationMetrics,
}

impl Operation {
    /// Build an operation from `(id, name, dependencies)` step specs.
    ///
    /// Every dependency must name an *earlier* step, which rules out forward
    /// references and cycles by construction. Duplicate step ids are
    /// rejected.
    pub fn new(
        op_type: OperationType,
        config: OperationConfig,
        step_specs: &[(&str, &str, &[&str])],
    ) -> PulseResult<Self> {
        let mut steps: Vec<Step> = Vec::with_capacity(step_specs.len());

        for (id, name, dependencies) in step_specs {
            if steps.iter().any(|s| s.id == *id) {
                return Err(PulseError::Validation(format!(
                    "duplicate step id {id:?} in {op_type} operation"
                )));
            }
            for dep in *dependencies {
                if !steps.iter().any(|s| s.id == *dep) {
                    return Err(PulseError::Validation(format!(
                        "step {id:?} depends on {dep:?}, which is not an earlier step"
                    )));
                }
            }
            steps.push(Step {
                id: id.to_string(),
                name: name.to_string(),
                dependencies: dependencies.iter().map(|d| d.to_string()).collect(),
                status: RunStatus::Pending,
                state: StepState::default(),
                metrics: StepMetrics::default(),
            });
        }

        if steps.is_empty() {
            return Err(PulseError::Validation(format!(
                "{op_type} operation has no steps"
            )));
        }

        Ok(Self {
            id: uuid::Uuid::new_v4().to_string(),
            op_type,
            status: RunStatus::Pending,
            config,
            steps,
            created_at: Utc::now(),
            started_at: None,
            ended_at: None,
            error: None,
            metrics: OperationMetrics::default(),
        })
    }

    /// Checked operation-level status change.
    pub fn transition(&mut self, next: RunStatus) -> PulseResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(PulseError::Validation(format!(
                "operation {} cannot move {} -> {next}",
                self.id, self.status
            )));
        }
        if next == RunStatus::Running && self.started_at.is_none() {
            self.started_at = Some(Utc::now());
        }
        if next.is_terminal() {
            self.ended_at = Some(Utc::now());
        }
        self.status = next;
        Ok(())
    }

    /// Checked step-level status change; updates timing metrics on the edges.
    pub fn transition_step(&mut self, step_idx: usize, next: RunStatus) -> PulseResult<()> {
        let step = self.steps.get_mut(step_idx).ok_or_else(|| {
            PulseError::Validation(format!("step index {step_idx} out of range"))
        })?;
        if !step.status.can_transition_to(next) {
            return Err(PulseError::Validation(format!(
                "step {} cannot move {} -> {next}",
                step.id, step.status
            )));
        }
        if next == RunStatus::Running && step.metrics.started_at.is_none() {
            step.metrics.started_at = Some(Utc::now());
        }
        if next.is_terminal() {
            let ended = Utc::now();
            step.metrics.ended_at = Some(ended);
            if let Some(started) = step.metrics.started_at {
                step.metrics.duration_ms =
                    (ended - started).num_milliseconds().max(0) as u64;
            }
        }
        step.status = next;
        self.refresh_metrics();
        Ok(())
    }

    /// Recompute the aggregate counters from the step list.
    pub fn refresh_metrics(&mut self) {
        let completed: Vec<&Step> = self
            .steps
            .iter()
            .filter(|s| s.status == RunStatus::Completed)
            .collect();
        self.metrics.steps_completed = completed.len();
        self.metrics.steps_failed = self
            .steps
            .iter()
            .filter(|s| s.status == RunStatus::Failed)
            .count();
        self.metrics.steps_skipped = self
            .steps
            .iter()
            .filter(|s| s.status == RunStatus::Skipped)
            .count();
        self.metrics.items_processed =
            self.steps.iter().map(|s| s.metrics.items_processed).sum();
        self.metrics.avg_step_time_ms = if completed.is_empty() {
            0
        } else {
            completed.iter().map(|s| s.metrics.duration_ms).sum::<u64>()
                / completed.len() as u64
        };
    }

}
