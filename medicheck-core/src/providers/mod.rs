//! Collaborator traits consumed by the triage steps
//!
//! Steps never talk to a model or a search API directly. They call these
//! traits, which keeps the scheduler testable with scripted providers and
//! lets the LLM-backed implementations in [`llm_backed`] be swapped for
//! anything else that returns the same structured data.

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::Result;
use crate::state::{EscalationAdvice, Recommendations, SymptomAnalysis};

pub mod llm_backed;
pub mod prompts;

pub use llm_backed::{LlmAnalysisProvider, LlmEscalationProvider, LlmRecommendationProvider};

/// Result of analyzing the reported symptoms
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisOutput {
    pub analysis: SymptomAnalysis,
    /// Research gathered while analyzing, appended to the session notes
    pub research_notes: Option<String>,
}

impl AnalysisOutput {
    pub fn new(analysis: SymptomAnalysis) -> Self {
        Self {
            analysis,
            research_notes: None,
        }
    }

    pub fn with_research(mut self, notes: impl Into<String>) -> Self {
        self.research_notes = Some(notes.into());
        self
    }
}

/// Result of generating care recommendations
#[derive(Debug, Clone, PartialEq)]
pub struct RecommendationOutput {
    pub recommendations: Recommendations,
    /// Extra research gathered for the recommendations
    pub additional_research: Option<String>,
}

impl RecommendationOutput {
    pub fn new(recommendations: Recommendations) -> Self {
        Self {
            recommendations,
            additional_research: None,
        }
    }

    pub fn with_research(mut self, notes: impl Into<String>) -> Self {
        self.additional_research = Some(notes.into());
        self
    }
}

/// Classifies symptoms and proposes candidate conditions
#[async_trait]
pub trait AnalysisProvider: Send + Sync {
    async fn analyze(&self, symptoms: &str, medical_history: &str) -> Result<AnalysisOutput>;
}

/// Produces patient-facing recommendations from a finished analysis
#[async_trait]
pub trait RecommendationProvider: Send + Sync {
    async fn recommend(
        &self,
        analysis: &SymptomAnalysis,
        medical_history: &str,
        research_notes: &str,
    ) -> Result<RecommendationOutput>;
}

/// Produces emergency guidance for urgent cases
#[async_trait]
pub trait EscalationProvider: Send + Sync {
    async fn escalate(
        &self,
        analysis: &SymptomAnalysis,
        recommendations: &Recommendations,
    ) -> Result<EscalationAdvice>;
}

/// Looks up medical information for a query and returns formatted notes
#[async_trait]
pub trait ResearchProvider: Send + Sync {
    async fn research(&self, query: &str) -> Result<String>;
}

/// The set of providers a scheduler runs with
#[derive(Clone)]
pub struct Providers {
    pub analysis: Arc<dyn AnalysisProvider>,
    pub recommendation: Arc<dyn RecommendationProvider>,
    pub escalation: Arc<dyn EscalationProvider>,
}

impl Providers {
    pub fn new(
        analysis: Arc<dyn AnalysisProvider>,
        recommendation: Arc<dyn RecommendationProvider>,
        escalation: Arc<dyn EscalationProvider>,
    ) -> Self {
        Self {
            analysis,
            recommendation,
            escalation,
        }
    }
}

impl std::fmt::Debug for Providers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Providers").finish_non_exhaustive()
    }
}
