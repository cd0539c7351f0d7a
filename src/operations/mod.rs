// =============================================================================
// Operations — multi-step workflows with live progress and retries
// =============================================================================

pub mod operation;
pub mod orchestrator;
pub mod steps;

pub use operation::{Operation, OperationConfig, Step, StepMetrics, StepState};
pub use orchestrator::{Orchestrator, ProgressReporter, StepContext, StepOutcome, StepWork};
