//! # MediCheck - Resumable Medical Triage Workflow
//!
//! MediCheck takes a free-text symptom description, classifies its urgency,
//! asks the patient for medical history, produces care recommendations and,
//! for urgent cases, emergency guidance. Every session ends in a Markdown
//! report.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use medicheck_core::prelude::*;
//! use std::sync::Arc;
//!
//! # async fn run(providers: Providers) -> anyhow::Result<()> {
//! let scheduler = Scheduler::builder()
//!     .providers(providers)
//!     .report_sink(Arc::new(FileReportSink::new("medical_reports")))
//!     .build()?;
//!
//! let outcome = scheduler
//!     .start("session-1", PatientInput::new("Mild headache since this morning"))
//!     .await?;
//! if let RunOutcome::Suspended { prompt, .. } = outcome {
//!     println!("{}", prompt);
//!     scheduler.resume("session-1", "no").await?;
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - **Workflow**: a fixed step graph driven by a [`Scheduler`](workflow::Scheduler)
//!   that suspends for patient input and resumes from checkpoints
//! - **Providers**: analysis, recommendation and escalation traits with
//!   LLM-backed implementations
//! - **Research**: optional web search that feeds the providers
//! - **Reports**: Markdown rendering and persistence
//!
//! ## Feature Flags
//!
//! - `llm-openai`: OpenAI-compatible chat completions (default)
//! - `llm-ollama`: local Ollama models (default)

pub mod config;
pub mod error;
pub mod llm;
pub mod providers;
pub mod report;
pub mod research;
pub mod state;
pub mod workflow;

/// Current library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{
        CheckpointBackend, CheckpointConfig, LLMProvider as LLMProviderType, LLMProviderConfig,
        MedicheckConfig, ReportConfig, ResearchConfig, WorkflowConfig,
    };
    pub use crate::error::{MedicheckError, Result};
    pub use crate::llm::{LLMProvider, LLMProviderFactory, LLMRequest, LLMResponse, Message};
    pub use crate::providers::{
        AnalysisOutput, AnalysisProvider, EscalationProvider, LlmAnalysisProvider,
        LlmEscalationProvider, LlmRecommendationProvider, Providers, RecommendationOutput,
        RecommendationProvider, ResearchProvider,
    };
    pub use crate::report::{FileReportSink, ReportSink, render_report, report_filename};
    pub use crate::research::{ResearchPipeline, SearchBackend, TavilyBackend};
    pub use crate::state::{
        EscalationAdvice, PatientInput, Recommendations, SymptomAnalysis, UrgencyLevel,
        WorkflowState,
    };
    pub use crate::workflow::{
        Checkpoint, CheckpointStore, EventReceiver, EventSender, ExecutionTrace,
        FileCheckpointStore, MemoryCheckpointStore, RunOutcome, Scheduler, SchedulerBuilder,
        SessionStatus, StepId, WorkflowError, WorkflowEvent, WorkflowResult, event_channel,
    };
}
