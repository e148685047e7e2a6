//! Static edges of the triage graph

use super::StepId;
use crate::state::WorkflowState;

/// First step of every session
pub const ENTRY: StepId = StepId::CollectPatientInfo;

/// Where the scheduler goes after a step completes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Next {
    Step(StepId),
    End,
}

/// Outcome of the branch after `createRecommendations`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Escalate,
    Report,
}

impl Route {
    pub fn target(self) -> StepId {
        match self {
            Route::Escalate => StepId::EscalationAdvice,
            Route::Report => StepId::GenerateReport,
        }
    }
}

/// Branch predicate: only an `urgent` classification escalates.
///
/// A missing urgency level routes to the report, same as `low`/`moderate`.
pub fn escalation_route(state: &WorkflowState) -> Route {
    match state.urgency_level {
        Some(level) if level.is_urgent() => Route::Escalate,
        _ => Route::Report,
    }
}

/// Successor of `step` given the state after its update was merged
pub fn successor(step: StepId, state: &WorkflowState) -> Next {
    match step {
        StepId::CollectPatientInfo => Next::Step(StepId::AnalyzeSymptoms),
        StepId::AnalyzeSymptoms => Next::Step(StepId::CollectMedicalHistory),
        StepId::CollectMedicalHistory => Next::Step(StepId::CreateRecommendations),
        StepId::CreateRecommendations => Next::Step(escalation_route(state).target()),
        StepId::EscalationAdvice => Next::Step(StepId::GenerateReport),
        StepId::GenerateReport => Next::End,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::UrgencyLevel;

    fn with_urgency(level: Option<UrgencyLevel>) -> WorkflowState {
        WorkflowState {
            urgency_level: level,
            ..Default::default()
        }
    }

    #[test]
    fn test_only_urgent_escalates() {
        assert_eq!(
            escalation_route(&with_urgency(Some(UrgencyLevel::Urgent))),
            Route::Escalate
        );
        assert_eq!(
            escalation_route(&with_urgency(Some(UrgencyLevel::Moderate))),
            Route::Report
        );
        assert_eq!(
            escalation_route(&with_urgency(Some(UrgencyLevel::Low))),
            Route::Report
        );
        assert_eq!(escalation_route(&with_urgency(None)), Route::Report);
    }

    #[test]
    fn test_linear_walk_reaches_end() {
        let state = with_urgency(Some(UrgencyLevel::Urgent));
        let mut step = ENTRY;
        let mut visited = vec![step];
        while let Next::Step(next) = successor(step, &state) {
            visited.push(next);
            step = next;
        }
        assert_eq!(visited, StepId::ALL.to_vec());
    }

    #[test]
    fn test_non_urgent_skips_escalation() {
        let state = with_urgency(Some(UrgencyLevel::Low));
        assert_eq!(
            successor(StepId::CreateRecommendations, &state),
            Next::Step(StepId::GenerateReport)
        );
        assert_eq!(successor(StepId::GenerateReport, &state), Next::End);
    }
}
