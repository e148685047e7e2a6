//! Step identities and step results

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::state::StateUpdate;

/// The six nodes of the triage graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StepId {
    CollectPatientInfo,
    AnalyzeSymptoms,
    CollectMedicalHistory,
    CreateRecommendations,
    EscalationAdvice,
    GenerateReport,
}

impl StepId {
    /// Every step, in graph order
    pub const ALL: [StepId; 6] = [
        StepId::CollectPatientInfo,
        StepId::AnalyzeSymptoms,
        StepId::CollectMedicalHistory,
        StepId::CreateRecommendations,
        StepId::EscalationAdvice,
        StepId::GenerateReport,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StepId::CollectPatientInfo => "collectPatientInfo",
            StepId::AnalyzeSymptoms => "analyzeSymptoms",
            StepId::CollectMedicalHistory => "collectMedicalHistory",
            StepId::CreateRecommendations => "createRecommendations",
            StepId::EscalationAdvice => "escalationAdvice",
            StepId::GenerateReport => "generateReport",
        }
    }

    /// Whether this step may pause the workflow for external input
    pub fn is_suspension_point(&self) -> bool {
        matches!(self, StepId::CollectMedicalHistory)
    }
}

impl fmt::Display for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for StepId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StepId::ALL
            .into_iter()
            .find(|step| step.as_str() == s)
            .ok_or_else(|| format!("unknown step '{}'", s))
    }
}

/// Request to pause the workflow until the caller supplies input
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuspendRequest {
    /// Human-readable question shown to the patient
    pub prompt: String,
}

/// Result of running one step
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    /// The step finished; merge the update and move on
    Completed(StateUpdate),
    /// The step needs external input before it can finish
    Suspend(SuspendRequest),
}
