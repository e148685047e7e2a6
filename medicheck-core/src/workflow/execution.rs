//! Workflow execution types and error handling

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::StepId;

/// Error type for workflow operations
///
/// Every variant is terminal for the run that raised it. Nothing is retried
/// automatically; callers decide whether to start a new session.
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// Required input is missing or would be overwritten
    #[error("Step '{step}' rejected its input: {message}")]
    InputError { step: StepId, message: String },

    /// The analysis provider failed or timed out
    #[error("Symptom analysis failed: {message}")]
    AnalysisError { step: StepId, message: String },

    /// A recommendation or escalation provider failed or timed out
    #[error("Provider for step '{step}' failed: {message}")]
    ProviderError { step: StepId, message: String },

    /// A step ran without the fields an earlier step should have written
    #[error("Step '{step}' found inconsistent state: {message}")]
    InvalidState { step: StepId, message: String },

    /// Resume against a session that has no checkpoint
    #[error("No pending suspension for session '{session_id}'")]
    NoPendingSuspension { session_id: String },

    /// Resume against a checkpoint whose suspension was already consumed
    #[error("Suspension for session '{session_id}' was already resumed")]
    StaleResume { session_id: String },

    /// Start against a session id that is already in use
    #[error("Session '{session_id}' already exists")]
    SessionExists { session_id: String },

    /// The per-instance node execution bound was hit
    #[error("Workflow exceeded {limit} step executions (next step '{step}')")]
    WorkflowLimitExceeded { limit: usize, step: StepId },

    /// Checkpoint or report persistence failed
    #[error("Persistence failed: {message}")]
    PersistenceError { message: String },

    /// A step tried to update a state that already holds its final report
    #[error("Step '{step}' attempted to modify a completed workflow")]
    TerminalState { step: StepId },
}

impl WorkflowError {
    /// Step that raised the error, if the error came from a step
    pub fn step(&self) -> Option<StepId> {
        match self {
            WorkflowError::InputError { step, .. }
            | WorkflowError::AnalysisError { step, .. }
            | WorkflowError::ProviderError { step, .. }
            | WorkflowError::InvalidState { step, .. }
            | WorkflowError::WorkflowLimitExceeded { step, .. }
            | WorkflowError::TerminalState { step } => Some(*step),
            _ => None,
        }
    }

    pub(crate) fn persistence(err: impl std::fmt::Display) -> Self {
        WorkflowError::PersistenceError {
            message: err.to_string(),
        }
    }
}

/// Result type for workflow operations
pub type WorkflowResult<T> = Result<T, WorkflowError>;

/// How a step execution ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceKind {
    Completed,
    Suspended,
    Failed,
}

/// Trace of a single step execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepTrace {
    pub step: StepId,

    pub kind: TraceKind,

    /// Duration of step execution
    pub duration_ms: u64,

    /// Error message if failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    pub finished_at: DateTime<Utc>,
}

impl StepTrace {
    pub fn completed(step: StepId, duration_ms: u64) -> Self {
        Self::new(step, TraceKind::Completed, duration_ms, None)
    }

    pub fn suspended(step: StepId, duration_ms: u64) -> Self {
        Self::new(step, TraceKind::Suspended, duration_ms, None)
    }

    pub fn failed(step: StepId, error: impl Into<String>, duration_ms: u64) -> Self {
        Self::new(step, TraceKind::Failed, duration_ms, Some(error.into()))
    }

    fn new(step: StepId, kind: TraceKind, duration_ms: u64, error: Option<String>) -> Self {
        Self {
            step,
            kind,
            duration_ms,
            error,
            finished_at: Utc::now(),
        }
    }
}

/// Step history of one session, across suspensions
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionTrace {
    /// Step traces in execution order
    pub steps: Vec<StepTrace>,

    /// Total time spent inside steps
    pub total_duration_ms: u64,

    /// Final error if the session failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExecutionTrace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a step trace
    pub fn add_step(&mut self, step: StepTrace) {
        self.total_duration_ms += step.duration_ms;
        if step.kind == TraceKind::Failed {
            self.error = step.error.clone();
        }
        self.steps.push(step);
    }

    /// Steps executed in order, including the suspended pass of a re-entered step
    pub fn step_ids(&self) -> Vec<StepId> {
        self.steps.iter().map(|s| s.step).collect()
    }

    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}
