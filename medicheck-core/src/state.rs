//! Workflow state threaded through every triage step
//!
//! [`WorkflowState`] is the single record every step reads from. Steps never
//! mutate it directly: they return a [`StateUpdate`] which the scheduler
//! merges with [`WorkflowState::apply`]. The merge enforces the write rules
//! of each field:
//!
//! - `conversation` and `research_notes` are append-only
//! - `symptoms` cannot change once written
//! - nothing changes once `final_report` is set

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::workflow::{StepId, WorkflowError, WorkflowResult};

/// Medical history value used until the patient supplies one
pub const DEFAULT_MEDICAL_HISTORY: &str = "No medical history provided";

/// Medical history value stored when the patient declines to supply one
pub const DECLINED_MEDICAL_HISTORY: &str = "No additional medical history provided";

/// Tri-state urgency classification driving the escalation branch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UrgencyLevel {
    Low,
    Moderate,
    Urgent,
}

impl UrgencyLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            UrgencyLevel::Low => "low",
            UrgencyLevel::Moderate => "moderate",
            UrgencyLevel::Urgent => "urgent",
        }
    }

    pub fn is_urgent(&self) -> bool {
        matches!(self, UrgencyLevel::Urgent)
    }
}

impl fmt::Display for UrgencyLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for UrgencyLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "low" => Ok(UrgencyLevel::Low),
            "moderate" => Ok(UrgencyLevel::Moderate),
            "urgent" => Ok(UrgencyLevel::Urgent),
            other => Err(format!("unknown urgency level '{}'", other)),
        }
    }
}

/// Who authored a conversation entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// A message in the session transcript
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationEntry {
    pub role: Role,
    pub content: String,
}

impl ConversationEntry {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Structured result of the symptom analysis step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymptomAnalysis {
    /// Clear summary of the reported symptoms
    pub summary: String,
    /// Candidate conditions, most likely first
    pub possible_conditions: Vec<String>,
    pub urgency_level: UrgencyLevel,
    /// Brief explanation of the classification
    pub reasoning: String,
}

/// Patient-facing care recommendations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendations {
    pub immediate_actions: Vec<String>,
    pub general_care: Vec<String>,
    pub when_to_seek_help: String,
    #[serde(default)]
    pub follow_up: String,
}

/// Emergency guidance, produced only for urgent cases
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalationAdvice {
    pub urgency_message: String,
    pub immediate_action: String,
    pub warning_signs: Vec<String>,
    pub emergency_contact: String,
}

/// The record threaded through every step of a triage session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowState {
    /// Transcript of the session; never truncated
    #[serde(default)]
    pub conversation: Vec<ConversationEntry>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symptoms: Option<String>,

    pub medical_history: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symptom_analysis: Option<SymptomAnalysis>,

    /// Copy of `symptom_analysis.urgency_level` read by the branch predicate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub urgency_level: Option<UrgencyLevel>,

    /// Research snippets collected by the providers, newline separated
    #[serde(default)]
    pub research_notes: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recommendations: Option<Recommendations>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub escalation_advice: Option<EscalationAdvice>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_report: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report_location: Option<String>,
}

impl Default for WorkflowState {
    fn default() -> Self {
        Self {
            conversation: Vec::new(),
            symptoms: None,
            medical_history: DEFAULT_MEDICAL_HISTORY.to_string(),
            symptom_analysis: None,
            urgency_level: None,
            research_notes: String::new(),
            recommendations: None,
            escalation_advice: None,
            final_report: None,
            report_location: None,
        }
    }
}

impl WorkflowState {
    /// Initial state for a new session, seeded with the patient's message
    pub fn from_input(input: &PatientInput) -> Self {
        let mut state = Self::default();
        state
            .conversation
            .push(ConversationEntry::user(input.message.clone()));
        if let Some(history) = input
            .medical_history
            .as_deref()
            .map(str::trim)
            .filter(|h| !h.is_empty())
        {
            state.medical_history = history.to_string();
        }
        state
    }

    /// Whether the report step has run
    pub fn is_terminal(&self) -> bool {
        self.final_report.is_some()
    }

    /// Latest message authored by the patient
    pub fn latest_user_message(&self) -> Option<&str> {
        self.conversation
            .iter()
            .rev()
            .find(|entry| entry.role == Role::User)
            .map(|entry| entry.content.as_str())
    }

    /// Merge a step's partial update into the state.
    ///
    /// # Errors
    ///
    /// Fails with [`WorkflowError::TerminalState`] once the report is set and
    /// with [`WorkflowError::InputError`] if the update would rewrite the
    /// recorded symptoms.
    pub fn apply(&mut self, step: StepId, update: StateUpdate) -> WorkflowResult<()> {
        if self.is_terminal() {
            return Err(WorkflowError::TerminalState { step });
        }

        if let Some(symptoms) = update.symptoms {
            match &self.symptoms {
                Some(existing) if existing != &symptoms => {
                    return Err(WorkflowError::InputError {
                        step,
                        message: "symptoms are immutable once recorded".to_string(),
                    });
                }
                _ => self.symptoms = Some(symptoms),
            }
        }

        self.conversation.extend(update.conversation);

        if let Some(notes) = update.research_notes {
            if !notes.is_empty() {
                if !self.research_notes.is_empty() && !self.research_notes.ends_with('\n') {
                    self.research_notes.push('\n');
                }
                self.research_notes.push_str(&notes);
            }
        }

        if let Some(history) = update.medical_history {
            self.medical_history = history;
        }
        if let Some(analysis) = update.symptom_analysis {
            self.urgency_level = Some(analysis.urgency_level);
            self.symptom_analysis = Some(analysis);
        }
        if let Some(recommendations) = update.recommendations {
            self.recommendations = Some(recommendations);
        }
        if let Some(advice) = update.escalation_advice {
            self.escalation_advice = Some(advice);
        }
        if let Some(location) = update.report_location {
            self.report_location = Some(location);
        }
        if let Some(report) = update.final_report {
            self.final_report = Some(report);
        }

        Ok(())
    }
}

/// Input submitted to start a session
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PatientInput {
    /// Free-text symptom description
    pub message: String,
    /// History known before the session starts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub medical_history: Option<String>,
}

impl PatientInput {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            medical_history: None,
        }
    }

    pub fn with_medical_history(mut self, history: impl Into<String>) -> Self {
        self.medical_history = Some(history.into());
        self
    }
}

/// Partial state produced by one step
///
/// Absent fields leave the state untouched. `symptom_analysis` also sets the
/// denormalized `urgency_level`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StateUpdate {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub conversation: Vec<ConversationEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub symptoms: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub medical_history: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub symptom_analysis: Option<SymptomAnalysis>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub research_notes: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recommendations: Option<Recommendations>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub escalation_advice: Option<EscalationAdvice>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_report: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report_location: Option<String>,
}

impl StateUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an assistant message to the transcript
    pub fn with_message(mut self, content: impl Into<String>) -> Self {
        self.conversation.push(ConversationEntry::assistant(content));
        self
    }

    /// Serialized form handed to the presentation channel
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn analysis(level: UrgencyLevel) -> SymptomAnalysis {
        SymptomAnalysis {
            summary: "Headache".to_string(),
            possible_conditions: vec!["Tension headache".to_string()],
            urgency_level: level,
            reasoning: "Mild".to_string(),
        }
    }

    #[test]
    fn test_initial_state() {
        let state = WorkflowState::from_input(&PatientInput::new("sore throat"));
        assert_eq!(state.medical_history, DEFAULT_MEDICAL_HISTORY);
        assert_eq!(state.latest_user_message(), Some("sore throat"));
        assert!(state.symptoms.is_none());
        assert!(!state.is_terminal());
    }

    #[test]
    fn test_initial_history_is_trimmed() {
        let input = PatientInput::new("cough").with_medical_history("  asthma ");
        let state = WorkflowState::from_input(&input);
        assert_eq!(state.medical_history, "asthma");

        let blank = PatientInput::new("cough").with_medical_history("   ");
        assert_eq!(
            WorkflowState::from_input(&blank).medical_history,
            DEFAULT_MEDICAL_HISTORY
        );
    }

    #[test]
    fn test_analysis_sets_urgency_copy() {
        let mut state = WorkflowState::default();
        let update = StateUpdate {
            symptom_analysis: Some(analysis(UrgencyLevel::Moderate)),
            ..Default::default()
        };
        state.apply(StepId::AnalyzeSymptoms, update).unwrap();
        assert_eq!(state.urgency_level, Some(UrgencyLevel::Moderate));
    }

    #[test]
    fn test_append_only_fields_concatenate() {
        let mut state = WorkflowState::from_input(&PatientInput::new("fever"));
        state
            .apply(
                StepId::AnalyzeSymptoms,
                StateUpdate {
                    research_notes: Some("Research: first".to_string()),
                    ..Default::default()
                }
                .with_message("analysis done"),
            )
            .unwrap();
        state
            .apply(
                StepId::CreateRecommendations,
                StateUpdate {
                    research_notes: Some("Additional Research: second".to_string()),
                    ..Default::default()
                }
                .with_message("recommendations done"),
            )
            .unwrap();

        assert_eq!(
            state.research_notes,
            "Research: first\nAdditional Research: second"
        );
        assert_eq!(state.conversation.len(), 3);
        assert_eq!(state.conversation[0], ConversationEntry::user("fever"));
    }

    #[test]
    fn test_symptoms_are_immutable() {
        let mut state = WorkflowState::default();
        let first = StateUpdate {
            symptoms: Some("rash".to_string()),
            ..Default::default()
        };
        state.apply(StepId::CollectPatientInfo, first.clone()).unwrap();
        // Rewriting the same value is a no-op
        state.apply(StepId::CollectPatientInfo, first).unwrap();

        let second = StateUpdate {
            symptoms: Some("itching".to_string()),
            ..Default::default()
        };
        let err = state.apply(StepId::CollectPatientInfo, second).unwrap_err();
        assert!(matches!(err, WorkflowError::InputError { .. }));
        assert_eq!(state.symptoms.as_deref(), Some("rash"));
    }

    #[test]
    fn test_terminal_state_rejects_updates() {
        let mut state = WorkflowState::default();
        state
            .apply(
                StepId::GenerateReport,
                StateUpdate {
                    final_report: Some("# Report".to_string()),
                    report_location: Some("reports/a.md".to_string()),
                    ..Default::default()
                },
            )
            .unwrap();
        let before = state.clone();

        let err = state
            .apply(StepId::GenerateReport, StateUpdate::new().with_message("late"))
            .unwrap_err();
        assert!(matches!(err, WorkflowError::TerminalState { .. }));
        assert_eq!(state, before);
    }

    #[test]
    fn test_urgency_parsing() {
        assert_eq!("URGENT".parse::<UrgencyLevel>().unwrap(), UrgencyLevel::Urgent);
        assert_eq!(" low ".parse::<UrgencyLevel>().unwrap(), UrgencyLevel::Low);
        assert!("critical".parse::<UrgencyLevel>().is_err());
        assert!(UrgencyLevel::Urgent.is_urgent());
        assert!(!UrgencyLevel::Moderate.is_urgent());
    }

    #[test]
    fn test_state_serialization_roundtrip() {
        let mut state = WorkflowState::from_input(&PatientInput::new("dizziness"));
        state
            .apply(
                StepId::AnalyzeSymptoms,
                StateUpdate {
                    symptom_analysis: Some(analysis(UrgencyLevel::Low)),
                    ..Default::default()
                },
            )
            .unwrap();

        let json = serde_json::to_string(&state).unwrap();
        assert!(json.contains("\"urgency_level\":\"low\""));
        let restored: WorkflowState = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, state);
    }
}
