//! The six triage steps
//!
//! Each step reads the current state and returns a [`StepOutcome`]. Steps
//! are pure with respect to the state: the scheduler merges the returned
//! update. Provider calls are bounded by the configured timeout and are
//! never retried.

use chrono::{DateTime, Local};
use std::future::Future;
use std::time::Duration;

use super::{StepId, StepOutcome, SuspendRequest, WorkflowError, WorkflowResult};
use crate::error::MedicheckError;
use crate::providers::Providers;
use crate::report::{ReportSink, render_report, report_filename};
use crate::state::{DECLINED_MEDICAL_HISTORY, StateUpdate, SymptomAnalysis, WorkflowState};

/// Replies that mean "no history to add", compared case-insensitively
const DECLINE_REPLIES: [&str; 4] = ["no", "none", "n/a", ""];

/// Collaborators available to a step
pub struct StepContext<'a> {
    pub providers: &'a Providers,
    pub report_sink: &'a dyn ReportSink,
    /// Bound on a single provider call
    pub provider_timeout: Duration,
    /// Clock reading used for the report header and file name
    pub now: DateTime<Local>,
}

/// Run `step` against `state`.
///
/// `resume` carries the caller's reply when the step is re-entered after a
/// suspension; it is ignored by steps that never suspend.
pub async fn run_step(
    step: StepId,
    state: &WorkflowState,
    ctx: &StepContext<'_>,
    resume: Option<&str>,
) -> WorkflowResult<StepOutcome> {
    match step {
        StepId::CollectPatientInfo => collect_patient_info(state),
        StepId::AnalyzeSymptoms => analyze_symptoms(state, ctx).await,
        StepId::CollectMedicalHistory => collect_medical_history(state, resume),
        StepId::CreateRecommendations => create_recommendations(state, ctx).await,
        StepId::EscalationAdvice => escalation_advice(state, ctx).await,
        StepId::GenerateReport => generate_report(state, ctx).await,
    }
}

/// Record the latest patient message as the session's symptoms
pub fn collect_patient_info(state: &WorkflowState) -> WorkflowResult<StepOutcome> {
    let symptoms = state
        .latest_user_message()
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .ok_or_else(|| WorkflowError::InputError {
            step: StepId::CollectPatientInfo,
            message: "No patient information found".to_string(),
        })?;

    let update = StateUpdate {
        symptoms: Some(symptoms.to_string()),
        ..Default::default()
    }
    .with_message("Patient information collected successfully");

    Ok(StepOutcome::Completed(update))
}

pub async fn analyze_symptoms(
    state: &WorkflowState,
    ctx: &StepContext<'_>,
) -> WorkflowResult<StepOutcome> {
    let step = StepId::AnalyzeSymptoms;
    let symptoms = state
        .symptoms
        .as_deref()
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| WorkflowError::InputError {
            step,
            message: "No symptoms provided for analysis".to_string(),
        })?;

    let output = bounded(
        ctx.provider_timeout,
        ctx.providers.analysis.analyze(symptoms, &state.medical_history),
    )
    .await
    .map_err(|message| WorkflowError::AnalysisError { step, message })?;

    let level = output.analysis.urgency_level;
    tracing::info!(urgency = %level, "Symptom analysis completed");

    let update = StateUpdate {
        symptom_analysis: Some(output.analysis),
        research_notes: output.research_notes,
        ..Default::default()
    }
    .with_message(format!(
        "Intelligent symptom analysis completed. Urgency level: {}",
        level
    ));

    Ok(StepOutcome::Completed(update))
}

/// Suspend for the patient's history, then record their reply on re-entry
pub fn collect_medical_history(
    state: &WorkflowState,
    resume: Option<&str>,
) -> WorkflowResult<StepOutcome> {
    let step = StepId::CollectMedicalHistory;
    let analysis = require_analysis(state, step)?;

    let Some(reply) = resume else {
        return Ok(StepOutcome::Suspend(SuspendRequest {
            prompt: history_prompt(analysis),
        }));
    };

    let history = normalize_medical_history(reply);
    let message = if history == DECLINED_MEDICAL_HISTORY {
        DECLINED_MEDICAL_HISTORY.to_string()
    } else {
        format!("Medical history collected: {}", history)
    };

    let update = StateUpdate {
        medical_history: Some(history),
        ..Default::default()
    }
    .with_message(message);

    Ok(StepOutcome::Completed(update))
}

pub async fn create_recommendations(
    state: &WorkflowState,
    ctx: &StepContext<'_>,
) -> WorkflowResult<StepOutcome> {
    let step = StepId::CreateRecommendations;
    let analysis = require_analysis(state, step)?;

    let output = bounded(
        ctx.provider_timeout,
        ctx.providers
            .recommendation
            .recommend(analysis, &state.medical_history, &state.research_notes),
    )
    .await
    .map_err(|message| WorkflowError::ProviderError { step, message })?;

    let update = StateUpdate {
        recommendations: Some(output.recommendations),
        research_notes: output.additional_research,
        ..Default::default()
    }
    .with_message("Comprehensive patient recommendations generated successfully");

    Ok(StepOutcome::Completed(update))
}

pub async fn escalation_advice(
    state: &WorkflowState,
    ctx: &StepContext<'_>,
) -> WorkflowResult<StepOutcome> {
    let step = StepId::EscalationAdvice;
    let analysis = require_analysis(state, step)?;
    let recommendations = state
        .recommendations
        .as_ref()
        .ok_or_else(|| WorkflowError::InvalidState {
            step,
            message: "no recommendations available for escalation".to_string(),
        })?;

    let advice = bounded(
        ctx.provider_timeout,
        ctx.providers.escalation.escalate(analysis, recommendations),
    )
    .await
    .map_err(|message| WorkflowError::ProviderError { step, message })?;

    tracing::warn!("Urgent case escalated");

    let update = StateUpdate {
        escalation_advice: Some(advice),
        ..Default::default()
    }
    .with_message("Urgent escalation advice generated");

    Ok(StepOutcome::Completed(update))
}

/// Render the report, persist it and record where it went
pub async fn generate_report(
    state: &WorkflowState,
    ctx: &StepContext<'_>,
) -> WorkflowResult<StepOutcome> {
    let step = StepId::GenerateReport;
    let urgent = state.urgency_level.is_some_and(|l| l.is_urgent());
    if urgent != state.escalation_advice.is_some() {
        return Err(WorkflowError::InvalidState {
            step,
            message: "escalation advice must be present exactly when the case is urgent"
                .to_string(),
        });
    }

    let report = render_report(state, ctx.now);
    let filename = report_filename(state.symptoms.as_deref().unwrap_or_default(), ctx.now);

    let location = ctx
        .report_sink
        .persist(&report, &filename)
        .await
        .map_err(WorkflowError::persistence)?;

    let update = StateUpdate {
        final_report: Some(report),
        report_location: Some(location.clone()),
        ..Default::default()
    }
    .with_message(format!("Medical analysis complete! Report saved to: {}", location));

    Ok(StepOutcome::Completed(update))
}

/// Map a free-text history reply to the value stored in the state
///
/// Declining replies (`no`, `none`, `n/a`, blank) become
/// [`DECLINED_MEDICAL_HISTORY`]; anything else is kept, trimmed.
pub fn normalize_medical_history(reply: &str) -> String {
    let trimmed = reply.trim();
    let lowered = trimmed.to_lowercase();
    if DECLINE_REPLIES.contains(&lowered.as_str()) {
        DECLINED_MEDICAL_HISTORY.to_string()
    } else {
        trimmed.to_string()
    }
}

/// Question shown to the patient when the workflow suspends for history
pub fn history_prompt(analysis: &SymptomAnalysis) -> String {
    format!(
        "Based on the symptom analysis, do you have relevant medical history \
         (medications, conditions, allergies, surgeries, family history) that might help \
         improve the recommendations?\n\n\
         Current analysis:\n\
         - Summary: {}\n\
         - Urgency: {}\n\
         - Possible conditions: {}\n\n\
         Enter your medical history (or 'no'/'none' if not applicable):",
        analysis.summary,
        analysis.urgency_level,
        analysis.possible_conditions.join(", ")
    )
}

fn require_analysis(state: &WorkflowState, step: StepId) -> WorkflowResult<&SymptomAnalysis> {
    state
        .symptom_analysis
        .as_ref()
        .ok_or_else(|| WorkflowError::InvalidState {
            step,
            message: "no symptom analysis available".to_string(),
        })
}

/// Await a provider call under `limit`, flattening timeout and provider
/// failures into one message
async fn bounded<T>(
    limit: Duration,
    call: impl Future<Output = Result<T, MedicheckError>>,
) -> Result<T, String> {
    match tokio::time::timeout(limit, call).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(e.to_string()),
        Err(_) => Err(format!("provider timed out after {:?}", limit)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{PatientInput, UrgencyLevel};

    fn analysis() -> SymptomAnalysis {
        SymptomAnalysis {
            summary: "Throbbing frontal headache".to_string(),
            possible_conditions: vec!["Tension headache".to_string(), "Migraine".to_string()],
            urgency_level: UrgencyLevel::Low,
            reasoning: "No red flags".to_string(),
        }
    }

    #[test]
    fn test_decline_replies_normalize() {
        for reply in ["no", "None", "  N/A ", "", "   ", "NO"] {
            assert_eq!(normalize_medical_history(reply), DECLINED_MEDICAL_HISTORY);
        }
        assert_eq!(
            normalize_medical_history("  Type 2 diabetes, metformin "),
            "Type 2 diabetes, metformin"
        );
        assert_eq!(normalize_medical_history("nope"), "nope");
    }

    #[test]
    fn test_collect_patient_info_requires_message() {
        let state = WorkflowState::from_input(&PatientInput::new("   "));
        let err = collect_patient_info(&state).unwrap_err();
        assert!(matches!(
            err,
            WorkflowError::InputError {
                step: StepId::CollectPatientInfo,
                ..
            }
        ));
    }

    #[test]
    fn test_collect_patient_info_records_symptoms() {
        let state = WorkflowState::from_input(&PatientInput::new(" sore throat "));
        let StepOutcome::Completed(update) = collect_patient_info(&state).unwrap() else {
            panic!("expected completion");
        };
        assert_eq!(update.symptoms.as_deref(), Some("sore throat"));
        assert_eq!(update.conversation.len(), 1);
    }

    #[test]
    fn test_history_step_suspends_without_reply() {
        let state = WorkflowState {
            symptom_analysis: Some(analysis()),
            ..Default::default()
        };
        let StepOutcome::Suspend(request) = collect_medical_history(&state, None).unwrap() else {
            panic!("expected suspension");
        };
        assert!(request.prompt.contains("- Summary: Throbbing frontal headache"));
        assert!(request.prompt.contains("- Urgency: low"));
        assert!(request.prompt.contains("Tension headache, Migraine"));
    }

    #[test]
    fn test_history_step_records_reply() {
        let state = WorkflowState {
            symptom_analysis: Some(analysis()),
            ..Default::default()
        };
        let StepOutcome::Completed(update) =
            collect_medical_history(&state, Some("penicillin allergy")).unwrap()
        else {
            panic!("expected completion");
        };
        assert_eq!(update.medical_history.as_deref(), Some("penicillin allergy"));
        assert_eq!(
            update.conversation[0].content,
            "Medical history collected: penicillin allergy"
        );
    }

    #[tokio::test]
    async fn test_bounded_reports_timeout() {
        let slow = async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok::<_, MedicheckError>(())
        };
        let err = bounded(Duration::from_millis(10), slow).await.unwrap_err();
        assert!(err.contains("timed out"));
    }
}
