//! Resumable triage workflow
//!
//! The workflow is a fixed graph of six steps with one conditional edge:
//!
//! ```text
//! START -> collectPatientInfo -> analyzeSymptoms -> collectMedicalHistory
//!       -> createRecommendations -> [urgent?] -> escalationAdvice -> generateReport -> END
//!                                  [otherwise] -> generateReport -> END
//! ```
//!
//! - **Steps** ([`steps`]) turn the current [`WorkflowState`](crate::state::WorkflowState)
//!   into a partial update, or ask the scheduler to suspend
//! - **Graph** ([`graph`]) decides which step runs next
//! - **Checkpoints** ([`checkpoint`]) persist suspended sessions
//! - **Scheduler** ([`Scheduler`]) drives a session from start or from a
//!   checkpoint and emits a [`WorkflowEvent`] after each step
//!
//! # Example
//!
//! ```rust,ignore
//! use medicheck_core::workflow::{RunOutcome, Scheduler};
//!
//! let scheduler = Scheduler::builder()
//!     .providers(providers)
//!     .report_sink(sink)
//!     .checkpoints(store)
//!     .build()?;
//!
//! match scheduler.start("session-1", PatientInput::new("mild headache")).await? {
//!     RunOutcome::Suspended { prompt, .. } => {
//!         let outcome = scheduler.resume("session-1", "none").await?;
//!     }
//!     RunOutcome::Completed { .. } => unreachable!("history is always requested"),
//! }
//! ```

pub mod checkpoint;
mod events;
mod execution;
pub mod graph;
mod scheduler;
mod step;
pub mod steps;

pub use checkpoint::{
    Checkpoint, CheckpointStore, FileCheckpointStore, MemoryCheckpointStore, SessionStatus,
};
pub use events::{event_channel, EventEmitter, EventReceiver, EventSender, WorkflowEvent};
pub use execution::{ExecutionTrace, StepTrace, TraceKind, WorkflowError, WorkflowResult};
pub use graph::{Next, Route};
pub use scheduler::{RunOutcome, Scheduler, SchedulerBuilder};
pub use step::{StepId, StepOutcome, SuspendRequest};
