//! Scheduler: drives a session through the triage graph

use chrono::{DateTime, Local, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::Instrument;

use super::checkpoint::{Checkpoint, CheckpointStore, MemoryCheckpointStore, SessionStatus};
use super::events::{EventEmitter, EventSender};
use super::graph::{self, Next};
use super::steps::{StepContext, run_step};
use super::{ExecutionTrace, StepId, StepOutcome, StepTrace, WorkflowError, WorkflowResult};
use crate::config::WorkflowConfig;
use crate::error::{MedicheckError, Result};
use crate::providers::Providers;
use crate::report::ReportSink;
use crate::state::{PatientInput, WorkflowState};

type Clock = Arc<dyn Fn() -> DateTime<Local> + Send + Sync>;

/// Where a run stopped
#[derive(Debug, Clone)]
pub enum RunOutcome {
    /// Waiting for external input; call [`Scheduler::resume`] with the reply
    Suspended {
        step: StepId,
        prompt: String,
        state: WorkflowState,
    },
    /// The report was generated
    Completed {
        report_location: String,
        state: WorkflowState,
    },
}

impl RunOutcome {
    pub fn state(&self) -> &WorkflowState {
        match self {
            RunOutcome::Suspended { state, .. } | RunOutcome::Completed { state, .. } => state,
        }
    }

    pub fn is_suspended(&self) -> bool {
        matches!(self, RunOutcome::Suspended { .. })
    }
}

/// In-flight bookkeeping for one session
struct Run {
    session_id: String,
    state: WorkflowState,
    steps_executed: usize,
    trace: ExecutionTrace,
    created_at: DateTime<Utc>,
    /// Whether a checkpoint exists for this session yet
    checkpointed: bool,
}

impl Run {
    fn checkpoint(&self, pending_step: Option<StepId>, status: SessionStatus) -> Checkpoint {
        Checkpoint {
            session_id: self.session_id.clone(),
            state: self.state.clone(),
            pending_step,
            status,
            steps_executed: self.steps_executed,
            trace: self.trace.clone(),
            created_at: self.created_at,
            updated_at: Utc::now(),
        }
    }
}

/// Runs triage sessions and owns their suspend/resume protocol
///
/// Steps of one session run strictly in sequence. Different sessions may run
/// concurrently on the same scheduler; calls for the same session id are
/// serialized.
pub struct Scheduler {
    providers: Providers,
    report_sink: Arc<dyn ReportSink>,
    checkpoints: Arc<dyn CheckpointStore>,
    emitter: EventEmitter,
    config: WorkflowConfig,
    checkpoint_ttl: Option<Duration>,
    clock: Clock,
    session_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl Scheduler {
    pub fn builder() -> SchedulerBuilder {
        SchedulerBuilder::new()
    }

    pub fn config(&self) -> &WorkflowConfig {
        &self.config
    }

    /// Start a new session and run it until it suspends or finishes.
    ///
    /// # Errors
    ///
    /// Fails with [`WorkflowError::SessionExists`] if the id already has a
    /// live or completed checkpoint. A failed session may be restarted.
    pub async fn start(&self, session_id: &str, input: PatientInput) -> WorkflowResult<RunOutcome> {
        let result = {
            let lock = self.session_lock(session_id);
            let _guard = lock.lock().await;
            self.start_locked(session_id, input).await
        };
        self.forget_lock(session_id);
        result
    }

    async fn start_locked(&self, session_id: &str, input: PatientInput) -> WorkflowResult<RunOutcome> {
        let existing = self.load_checkpoint(session_id).await?;
        if let Some(checkpoint) = &existing {
            if checkpoint.status != SessionStatus::Failed {
                return Err(WorkflowError::SessionExists {
                    session_id: session_id.to_string(),
                });
            }
        }

        tracing::info!(session_id = %session_id, "Starting triage session");
        let run = Run {
            session_id: session_id.to_string(),
            state: WorkflowState::from_input(&input),
            steps_executed: 0,
            trace: ExecutionTrace::new(),
            created_at: Utc::now(),
            checkpointed: existing.is_some(),
        };

        self.drive(run, graph::ENTRY, None)
            .instrument(tracing::info_span!("session", session_id = %session_id))
            .await
    }

    /// Resume a suspended session with the caller's reply.
    ///
    /// # Errors
    ///
    /// - [`WorkflowError::NoPendingSuspension`] if the session has no
    ///   checkpoint (or its suspension expired)
    /// - [`WorkflowError::StaleResume`] if the suspension was already consumed
    pub async fn resume(&self, session_id: &str, value: &str) -> WorkflowResult<RunOutcome> {
        let result = {
            let lock = self.session_lock(session_id);
            let _guard = lock.lock().await;
            self.resume_locked(session_id, value).await
        };
        self.forget_lock(session_id);
        result
    }

    async fn resume_locked(&self, session_id: &str, value: &str) -> WorkflowResult<RunOutcome> {
        let Some(mut checkpoint) = self.load_checkpoint(session_id).await? else {
            return Err(WorkflowError::NoPendingSuspension {
                session_id: session_id.to_string(),
            });
        };

        if let Some(ttl) = self.checkpoint_ttl {
            if checkpoint.is_expired(ttl, Utc::now()) {
                tracing::warn!(session_id = %session_id, "Suspension expired, discarding checkpoint");
                self.checkpoints
                    .delete(session_id)
                    .await
                    .map_err(WorkflowError::persistence)?;
                return Err(WorkflowError::NoPendingSuspension {
                    session_id: session_id.to_string(),
                });
            }
        }

        let Some(step) = checkpoint.pending_step.take() else {
            return Err(WorkflowError::StaleResume {
                session_id: session_id.to_string(),
            });
        };

        // Consume the suspension before any step runs so a repeated resume
        // is rejected even if this run fails part-way.
        checkpoint.status = SessionStatus::Running;
        checkpoint.updated_at = Utc::now();
        self.checkpoints
            .save(&checkpoint)
            .await
            .map_err(WorkflowError::persistence)?;

        tracing::info!(session_id = %session_id, step = %step, "Resuming triage session");
        let run = Run {
            session_id: checkpoint.session_id,
            state: checkpoint.state,
            steps_executed: checkpoint.steps_executed,
            trace: checkpoint.trace,
            created_at: checkpoint.created_at,
            checkpointed: true,
        };

        self.drive(run, step, Some(value))
            .instrument(tracing::info_span!("session", session_id = %session_id))
            .await
    }

    /// Step the session is waiting on, if it is suspended
    pub async fn pending_step(&self, session_id: &str) -> WorkflowResult<Option<StepId>> {
        Ok(self
            .load_checkpoint(session_id)
            .await?
            .and_then(|c| c.pending_step))
    }

    pub async fn checkpoint(&self, session_id: &str) -> WorkflowResult<Option<Checkpoint>> {
        self.load_checkpoint(session_id).await
    }

    /// Delete a session's checkpoint, returning whether one existed
    pub async fn purge(&self, session_id: &str) -> WorkflowResult<bool> {
        let removed = {
            let lock = self.session_lock(session_id);
            let _guard = lock.lock().await;
            self.checkpoints
                .delete(session_id)
                .await
                .map_err(WorkflowError::persistence)?
        };
        self.forget_lock(session_id);
        Ok(removed)
    }

    /// Delete suspended checkpoints older than the configured TTL
    ///
    /// Returns 0 when no TTL is configured.
    pub async fn purge_expired(&self) -> WorkflowResult<usize> {
        let Some(ttl) = self.checkpoint_ttl else {
            return Ok(0);
        };
        self.checkpoints
            .purge_expired(ttl)
            .await
            .map_err(WorkflowError::persistence)
    }

    async fn drive(
        &self,
        mut run: Run,
        mut step: StepId,
        mut resume: Option<&str>,
    ) -> WorkflowResult<RunOutcome> {
        loop {
            if run.steps_executed >= self.config.max_steps {
                let err = WorkflowError::WorkflowLimitExceeded {
                    limit: self.config.max_steps,
                    step,
                };
                return Err(self.fail(&mut run, step, err, 0).await);
            }
            run.steps_executed += 1;

            let started = Instant::now();
            let ctx = StepContext {
                providers: &self.providers,
                report_sink: self.report_sink.as_ref(),
                provider_timeout: self.config.provider_timeout,
                now: (self.clock)(),
            };

            tracing::debug!(step = %step, "Running step");
            let outcome = run_step(step, &run.state, &ctx, resume.take()).await;
            let elapsed = started.elapsed().as_millis() as u64;

            let update = match outcome {
                Ok(StepOutcome::Completed(update)) => update,
                Ok(StepOutcome::Suspend(request)) => {
                    run.trace.add_step(StepTrace::suspended(step, elapsed));
                    let checkpoint = run.checkpoint(Some(step), SessionStatus::Suspended);
                    if let Err(e) = self.checkpoints.save(&checkpoint).await {
                        let err = WorkflowError::persistence(e);
                        return Err(self.fail(&mut run, step, err, 0).await);
                    }

                    tracing::info!(step = %step, "Session suspended for input");
                    self.emitter.suspended(&run.session_id, step, &request.prompt);
                    return Ok(RunOutcome::Suspended {
                        step,
                        prompt: request.prompt,
                        state: run.state,
                    });
                }
                Err(err) => return Err(self.fail(&mut run, step, err, elapsed).await),
            };

            let output = update.to_value();
            if let Err(err) = run.state.apply(step, update) {
                return Err(self.fail(&mut run, step, err, elapsed).await);
            }
            run.trace.add_step(StepTrace::completed(step, elapsed));
            tracing::info!(step = %step, duration_ms = elapsed, "Step completed");

            let next = graph::successor(step, &run.state);
            if run.checkpointed {
                let status = match next {
                    Next::End => SessionStatus::Completed,
                    Next::Step(_) => SessionStatus::Running,
                };
                let checkpoint = run.checkpoint(None, status);
                if let Err(e) = self.checkpoints.save(&checkpoint).await {
                    let err = WorkflowError::persistence(e);
                    return Err(self.fail(&mut run, step, err, 0).await);
                }
            }
            self.emitter.step_completed(&run.session_id, step, output);

            match next {
                Next::Step(following) => step = following,
                Next::End => {
                    let report_location = run.state.report_location.clone().unwrap_or_default();
                    tracing::info!(report = %report_location, steps = run.steps_executed, "Session completed");
                    self.emitter.finished(&run.session_id, &report_location);
                    return Ok(RunOutcome::Completed {
                        report_location,
                        state: run.state,
                    });
                }
            }
        }
    }

    /// Record a failure: trace it, mark any checkpoint failed, emit an event
    async fn fail(
        &self,
        run: &mut Run,
        step: StepId,
        err: WorkflowError,
        elapsed: u64,
    ) -> WorkflowError {
        let message = err.to_string();
        tracing::error!(step = %step, error = %message, "Step failed");
        run.trace.add_step(StepTrace::failed(step, &message, elapsed));

        if run.checkpointed {
            let checkpoint = run.checkpoint(None, SessionStatus::Failed);
            if let Err(e) = self.checkpoints.save(&checkpoint).await {
                tracing::warn!(error = %e, "Could not record failure in checkpoint");
            }
        }

        self.emitter.failed(&run.session_id, err.step(), &message);
        err
    }

    async fn load_checkpoint(&self, session_id: &str) -> WorkflowResult<Option<Checkpoint>> {
        self.checkpoints
            .load(session_id)
            .await
            .map_err(WorkflowError::persistence)
    }

    fn session_lock(&self, session_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self
            .session_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        locks
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    fn forget_lock(&self, session_id: &str) {
        let mut locks = self
            .session_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(lock) = locks.get(session_id) {
            // Only drop the entry when nobody else holds a handle to it
            if Arc::strong_count(lock) == 1 {
                locks.remove(session_id);
            }
        }
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("config", &self.config)
            .field("checkpoint_ttl", &self.checkpoint_ttl)
            .field("emitter", &self.emitter)
            .finish_non_exhaustive()
    }
}

/// Builder for [`Scheduler`]
///
/// Providers and a report sink are required. The checkpoint store defaults
/// to [`MemoryCheckpointStore`] and events are disabled unless a sender is
/// supplied.
pub struct SchedulerBuilder {
    providers: Option<Providers>,
    report_sink: Option<Arc<dyn ReportSink>>,
    checkpoints: Option<Arc<dyn CheckpointStore>>,
    emitter: EventEmitter,
    config: WorkflowConfig,
    checkpoint_ttl: Option<Duration>,
    clock: Option<Clock>,
}

impl SchedulerBuilder {
    pub fn new() -> Self {
        Self {
            providers: None,
            report_sink: None,
            checkpoints: None,
            emitter: EventEmitter::disabled(),
            config: WorkflowConfig::default(),
            checkpoint_ttl: None,
            clock: None,
        }
    }

    pub fn providers(mut self, providers: Providers) -> Self {
        self.providers = Some(providers);
        self
    }

    pub fn report_sink(mut self, sink: Arc<dyn ReportSink>) -> Self {
        self.report_sink = Some(sink);
        self
    }

    pub fn checkpoints(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.checkpoints = Some(store);
        self
    }

    /// Send presentation events to `sender`
    pub fn events(mut self, sender: EventSender) -> Self {
        self.emitter = EventEmitter::new(sender);
        self
    }

    pub fn config(mut self, config: WorkflowConfig) -> Self {
        self.config = config;
        self
    }

    pub fn max_steps(mut self, max_steps: usize) -> Self {
        self.config.max_steps = max_steps;
        self
    }

    pub fn provider_timeout(mut self, timeout: Duration) -> Self {
        self.config.provider_timeout = timeout;
        self
    }

    /// Age after which a suspended session can no longer be resumed
    pub fn checkpoint_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.checkpoint_ttl = ttl;
        self
    }

    /// Override the wall clock used for report timestamps
    pub fn clock<F>(mut self, clock: F) -> Self
    where
        F: Fn() -> DateTime<Local> + Send + Sync + 'static,
    {
        self.clock = Some(Arc::new(clock));
        self
    }

    /// # Errors
    ///
    /// Returns a configuration error if providers or the report sink are
    /// missing, or if `max_steps` is zero.
    pub fn build(self) -> Result<Scheduler> {
        let providers = self
            .providers
            .ok_or_else(|| MedicheckError::Configuration("providers are required".to_string()))?;
        let report_sink = self
            .report_sink
            .ok_or_else(|| MedicheckError::Configuration("report sink is required".to_string()))?;
        if self.config.max_steps == 0 {
            return Err(MedicheckError::Configuration(
                "max_steps must be at least 1".to_string(),
            ));
        }

        let clock: Clock = match self.clock {
            Some(clock) => clock,
            None => Arc::new(Local::now),
        };

        Ok(Scheduler {
            providers,
            report_sink,
            checkpoints: self
                .checkpoints
                .unwrap_or_else(|| Arc::new(MemoryCheckpointStore::new())),
            emitter: self.emitter,
            config: self.config,
            checkpoint_ttl: self.checkpoint_ttl,
            clock,
            session_locks: Mutex::new(HashMap::new()),
        })
    }
}

impl Default for SchedulerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use crate::providers::{
        AnalysisOutput, AnalysisProvider, EscalationProvider, RecommendationOutput,
        RecommendationProvider,
    };
    use crate::state::{EscalationAdvice, Recommendations, SymptomAnalysis, UrgencyLevel};

    struct FixedAnalysis;

    #[async_trait]
    impl AnalysisProvider for FixedAnalysis {
        async fn analyze(&self, symptoms: &str, _medical_history: &str) -> Result<AnalysisOutput> {
            if symptoms.contains("fail") {
                return Err(MedicheckError::Llm("model unavailable".to_string()));
            }
            Ok(AnalysisOutput::new(SymptomAnalysis {
                summary: symptoms.to_string(),
                possible_conditions: vec!["Common cold".to_string()],
                urgency_level: UrgencyLevel::Low,
                reasoning: "Mild".to_string(),
            }))
        }
    }

    struct FixedRecommendations;

    #[async_trait]
    impl RecommendationProvider for FixedRecommendations {
        async fn recommend(
            &self,
            _analysis: &SymptomAnalysis,
            _medical_history: &str,
            _research_notes: &str,
        ) -> Result<RecommendationOutput> {
            Ok(RecommendationOutput::new(Recommendations {
                immediate_actions: vec!["Rest".to_string()],
                general_care: vec!["Fluids".to_string()],
                when_to_seek_help: "If it worsens".to_string(),
                follow_up: "None".to_string(),
            }))
        }
    }

    struct FixedEscalation;

    #[async_trait]
    impl EscalationProvider for FixedEscalation {
        async fn escalate(
            &self,
            _analysis: &SymptomAnalysis,
            _recommendations: &Recommendations,
        ) -> Result<EscalationAdvice> {
            Ok(EscalationAdvice {
                urgency_message: "Seek care".to_string(),
                immediate_action: "Call 911".to_string(),
                warning_signs: Vec::new(),
                emergency_contact: "911".to_string(),
            })
        }
    }

    struct DiscardSink;

    #[async_trait]
    impl ReportSink for DiscardSink {
        async fn persist(&self, _report: &str, filename: &str) -> Result<String> {
            Ok(filename.to_string())
        }
    }

    fn scheduler() -> Scheduler {
        Scheduler::builder()
            .providers(Providers::new(
                Arc::new(FixedAnalysis),
                Arc::new(FixedRecommendations),
                Arc::new(FixedEscalation),
            ))
            .report_sink(Arc::new(DiscardSink))
            .build()
            .unwrap()
    }

    fn lock_count(scheduler: &Scheduler) -> usize {
        scheduler.session_locks.lock().unwrap().len()
    }

    #[tokio::test]
    async fn test_session_locks_released_after_each_call() {
        let scheduler = scheduler();

        let outcome = scheduler
            .start("s1", PatientInput::new("runny nose"))
            .await
            .unwrap();
        assert!(matches!(outcome, RunOutcome::Suspended { .. }));
        assert_eq!(lock_count(&scheduler), 0);

        let outcome = scheduler.resume("s1", "no").await.unwrap();
        assert!(matches!(outcome, RunOutcome::Completed { .. }));
        assert_eq!(lock_count(&scheduler), 0);
    }

    #[tokio::test]
    async fn test_session_locks_released_on_error() {
        let scheduler = scheduler();

        assert!(scheduler.start("s1", PatientInput::new("fail")).await.is_err());
        assert!(scheduler.resume("missing", "no").await.is_err());
        assert_eq!(lock_count(&scheduler), 0);
    }

    #[tokio::test]
    async fn test_many_sessions_leave_no_locks() {
        let scheduler = scheduler();
        for i in 0..20 {
            let id = format!("s{}", i);
            scheduler
                .start(&id, PatientInput::new("cough"))
                .await
                .unwrap();
            scheduler.resume(&id, "none").await.unwrap();
        }
        assert_eq!(lock_count(&scheduler), 0);
    }
}
