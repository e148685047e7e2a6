//! Presentation events
//!
//! The scheduler reports progress on an mpsc channel so a front end can print
//! each step as it finishes. Emission never blocks the workflow: if the
//! channel is full or the receiver is gone, the event is dropped.
//!
//! # Example
//!
//! ```rust,ignore
//! let (tx, mut rx) = event_channel(100);
//! let scheduler = Scheduler::builder().events(tx) /* ... */ .build()?;
//!
//! tokio::spawn(async move {
//!     while let Some(event) = rx.recv().await {
//!         if let WorkflowEvent::StepCompleted { step, .. } = event {
//!             println!("{} done", step);
//!         }
//!     }
//! });
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use super::StepId;

/// Events emitted while a session runs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowEvent {
    /// A step finished and its update was merged
    StepCompleted {
        session_id: String,
        step: StepId,
        /// The step's serialized partial update
        output: Value,
        timestamp: DateTime<Utc>,
    },

    /// The workflow paused for external input
    Suspended {
        session_id: String,
        step: StepId,
        prompt: String,
        timestamp: DateTime<Utc>,
    },

    /// The report was written and the session finished
    Finished {
        session_id: String,
        report_location: String,
        timestamp: DateTime<Utc>,
    },

    /// The run halted with an error
    Failed {
        session_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        step: Option<StepId>,
        error: String,
        timestamp: DateTime<Utc>,
    },
}

impl WorkflowEvent {
    pub fn session_id(&self) -> &str {
        match self {
            WorkflowEvent::StepCompleted { session_id, .. }
            | WorkflowEvent::Suspended { session_id, .. }
            | WorkflowEvent::Finished { session_id, .. }
            | WorkflowEvent::Failed { session_id, .. } => session_id,
        }
    }

    /// Step the event refers to, if any
    pub fn step(&self) -> Option<StepId> {
        match self {
            WorkflowEvent::StepCompleted { step, .. } | WorkflowEvent::Suspended { step, .. } => {
                Some(*step)
            }
            WorkflowEvent::Failed { step, .. } => *step,
            WorkflowEvent::Finished { .. } => None,
        }
    }
}

/// Sender half of the presentation channel
pub type EventSender = mpsc::Sender<WorkflowEvent>;

/// Receiver half of the presentation channel
pub type EventReceiver = mpsc::Receiver<WorkflowEvent>;

/// Create a bounded presentation channel
pub fn event_channel(buffer_size: usize) -> (EventSender, EventReceiver) {
    mpsc::channel(buffer_size)
}

/// Clonable, optional event sink used by the scheduler
#[derive(Clone, Default)]
pub struct EventEmitter {
    sender: Option<EventSender>,
}

impl EventEmitter {
    pub fn new(sender: EventSender) -> Self {
        Self {
            sender: Some(sender),
        }
    }

    /// An emitter that discards every event
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn is_enabled(&self) -> bool {
        self.sender.is_some()
    }

    /// Send without waiting; full or closed channels drop the event
    pub fn emit(&self, event: WorkflowEvent) {
        let Some(sender) = &self.sender else {
            return;
        };
        match sender.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                tracing::debug!(session_id = %event.session_id(), "Event channel full, dropping event");
            }
            Err(TrySendError::Closed(event)) => {
                tracing::debug!(session_id = %event.session_id(), "Event receiver closed, dropping event");
            }
        }
    }

    pub fn step_completed(&self, session_id: &str, step: StepId, output: Value) {
        self.emit(WorkflowEvent::StepCompleted {
            session_id: session_id.to_string(),
            step,
            output,
            timestamp: Utc::now(),
        });
    }

    pub fn suspended(&self, session_id: &str, step: StepId, prompt: &str) {
        self.emit(WorkflowEvent::Suspended {
            session_id: session_id.to_string(),
            step,
            prompt: prompt.to_string(),
            timestamp: Utc::now(),
        });
    }

    pub fn finished(&self, session_id: &str, report_location: &str) {
        self.emit(WorkflowEvent::Finished {
            session_id: session_id.to_string(),
            report_location: report_location.to_string(),
            timestamp: Utc::now(),
        });
    }

    pub fn failed(&self, session_id: &str, step: Option<StepId>, error: &str) {
        self.emit(WorkflowEvent::Failed {
            session_id: session_id.to_string(),
            step,
            error: error.to_string(),
            timestamp: Utc::now(),
        });
    }
}

impl std::fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventEmitter")
            .field("enabled", &self.is_enabled())
            .finish()
    }
}
