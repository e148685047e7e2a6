//! Providers backed by a chat-completion model
//!
//! Each provider asks the model for a JSON object and validates it before
//! handing it to the workflow. Analysis and recommendation providers may
//! first ask the model whether a web search would help, run the proposed
//! queries through a [`ResearchProvider`] and feed the results back in.

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;

use super::prompts::{self, fill};
use super::{
    AnalysisOutput, AnalysisProvider, EscalationProvider, RecommendationOutput,
    RecommendationProvider, ResearchProvider,
};
use crate::error::{MedicheckError, Result};
use crate::llm::{LLMProvider, LLMRequest, generate_structured_output};
use crate::state::{EscalationAdvice, Recommendations, SymptomAnalysis, UrgencyLevel};

/// Most search queries a provider will run per call
const MAX_RESEARCH_QUERIES: usize = 2;

const DEFAULT_TEMPERATURE: f32 = 0.1;

#[derive(Debug, Deserialize)]
struct AnalysisPayload {
    symptom_summary: String,
    #[serde(default)]
    possible_conditions: Vec<String>,
    urgency_level: String,
    #[serde(default)]
    reasoning: String,
}

impl AnalysisPayload {
    fn into_analysis(self) -> Result<SymptomAnalysis> {
        if self.symptom_summary.trim().is_empty() {
            return Err(MedicheckError::MalformedOutput(
                "analysis is missing a symptom summary".to_string(),
            ));
        }
        let urgency_level = self
            .urgency_level
            .parse::<UrgencyLevel>()
            .map_err(MedicheckError::MalformedOutput)?;
        Ok(SymptomAnalysis {
            summary: self.symptom_summary,
            possible_conditions: self.possible_conditions,
            urgency_level,
            reasoning: self.reasoning,
        })
    }
}

#[derive(Debug, Deserialize)]
struct RecommendationPayload {
    #[serde(default)]
    immediate_actions: Vec<String>,
    #[serde(default)]
    general_care: Vec<String>,
    when_to_seek_help: String,
    #[serde(default)]
    follow_up: Option<String>,
}

impl RecommendationPayload {
    fn into_recommendations(self) -> Result<Recommendations> {
        if self.immediate_actions.is_empty() && self.general_care.is_empty() {
            return Err(MedicheckError::MalformedOutput(
                "recommendations contain no actions".to_string(),
            ));
        }
        Ok(Recommendations {
            immediate_actions: self.immediate_actions,
            general_care: self.general_care,
            when_to_seek_help: self.when_to_seek_help,
            follow_up: self.follow_up.unwrap_or_default(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct ResearchPlan {
    #[serde(default)]
    queries: Vec<String>,
}

/// Shared model access for the three providers
#[derive(Clone)]
struct ModelClient {
    llm: Arc<dyn LLMProvider>,
    research: Option<Arc<dyn ResearchProvider>>,
    temperature: f32,
}

impl ModelClient {
    fn new(llm: Arc<dyn LLMProvider>) -> Self {
        Self {
            llm,
            research: None,
            temperature: DEFAULT_TEMPERATURE,
        }
    }

    fn request(&self, prompt: String) -> LLMRequest {
        LLMRequest::with_system_prompt(prompts::SYSTEM_PROMPT, prompt).temperature(self.temperature)
    }

    /// Ask the model for search queries and run them.
    ///
    /// Research is best effort: a failed plan or search is logged and
    /// skipped so the main call still runs. Each result is prefixed with
    /// `label`.
    async fn gather_research(&self, purpose: &str, context: &str, label: &str) -> Option<String> {
        let research = self.research.as_ref()?;

        let plan_prompt = fill(
            prompts::RESEARCH_PLAN,
            &[
                ("purpose", purpose),
                ("context", context),
                ("max_queries", &MAX_RESEARCH_QUERIES.to_string()),
            ],
        );
        let plan: ResearchPlan =
            match generate_structured_output(self.llm.as_ref(), &self.request(plan_prompt)).await {
                Ok(plan) => plan,
                Err(e) => {
                    tracing::warn!(error = %e, "Research planning failed, continuing without research");
                    return None;
                }
            };

        let mut notes = String::new();
        for query in plan
            .queries
            .iter()
            .map(|q| q.trim())
            .filter(|q| !q.is_empty())
            .take(MAX_RESEARCH_QUERIES)
        {
            match research.research(query).await {
                Ok(result) => {
                    notes.push_str(label);
                    notes.push_str(&result);
                    notes.push('\n');
                }
                Err(e) => tracing::warn!(query = %query, error = %e, "Research query failed"),
            }
        }

        (!notes.is_empty()).then_some(notes)
    }
}

macro_rules! model_builders {
    ($name:ident) => {
        impl $name {
            pub fn new(llm: Arc<dyn LLMProvider>) -> Self {
                Self {
                    client: ModelClient::new(llm),
                }
            }

            /// Sampling temperature, clamped to `0.0..=2.0`
            pub fn with_temperature(mut self, temperature: f32) -> Self {
                self.client.temperature = temperature.clamp(0.0, 2.0);
                self
            }
        }
    };
}

/// Symptom analysis via an LLM, optionally informed by web research
pub struct LlmAnalysisProvider {
    client: ModelClient,
}

model_builders!(LlmAnalysisProvider);

impl LlmAnalysisProvider {
    pub fn with_research(mut self, research: Arc<dyn ResearchProvider>) -> Self {
        self.client.research = Some(research);
        self
    }
}

#[async_trait]
impl AnalysisProvider for LlmAnalysisProvider {
    async fn analyze(&self, symptoms: &str, medical_history: &str) -> Result<AnalysisOutput> {
        let context = format!(
            "Patient Symptoms: {}\nMedical History: {}",
            symptoms, medical_history
        );
        let research = self
            .client
            .gather_research("symptom analysis", &context, "Research: ")
            .await;

        let research_block = research
            .as_deref()
            .map(|r| format!("Research findings:\n<research>\n{}</research>", r))
            .unwrap_or_default();
        let prompt = fill(
            prompts::SYMPTOM_ANALYSIS,
            &[
                ("symptoms", symptoms),
                ("medical_history", medical_history),
                ("research", &research_block),
            ],
        );

        let payload: AnalysisPayload =
            generate_structured_output(self.client.llm.as_ref(), &self.client.request(prompt))
                .await?;
        let analysis = payload.into_analysis()?;

        Ok(AnalysisOutput {
            analysis,
            research_notes: research,
        })
    }
}

/// Patient recommendations via an LLM, optionally informed by web research
pub struct LlmRecommendationProvider {
    client: ModelClient,
}

model_builders!(LlmRecommendationProvider);

impl LlmRecommendationProvider {
    pub fn with_research(mut self, research: Arc<dyn ResearchProvider>) -> Self {
        self.client.research = Some(research);
        self
    }
}

#[async_trait]
impl RecommendationProvider for LlmRecommendationProvider {
    async fn recommend(
        &self,
        analysis: &SymptomAnalysis,
        medical_history: &str,
        research_notes: &str,
    ) -> Result<RecommendationOutput> {
        let analysis_json = serde_json::to_string_pretty(analysis)?;
        let context = format!(
            "Symptom Analysis: {}\nPrevious Research: {}",
            analysis_json,
            if research_notes.is_empty() { "none" } else { research_notes }
        );
        let additional = self
            .client
            .gather_research("set of care recommendations", &context, "Additional Research: ")
            .await;

        let mut all_research = research_notes.to_string();
        if let Some(extra) = &additional {
            if !all_research.is_empty() {
                all_research.push('\n');
            }
            all_research.push_str(extra);
        }
        if all_research.is_empty() {
            all_research.push_str("No research available");
        }

        let prompt = fill(
            prompts::RECOMMENDATIONS,
            &[
                ("analysis", &analysis_json),
                ("medical_history", medical_history),
                ("research", &all_research),
            ],
        );

        let payload: RecommendationPayload =
            generate_structured_output(self.client.llm.as_ref(), &self.client.request(prompt))
                .await?;

        Ok(RecommendationOutput {
            recommendations: payload.into_recommendations()?,
            additional_research: additional,
        })
    }
}

/// Emergency guidance via an LLM
pub struct LlmEscalationProvider {
    client: ModelClient,
}

model_builders!(LlmEscalationProvider);

#[async_trait]
impl EscalationProvider for LlmEscalationProvider {
    async fn escalate(
        &self,
        analysis: &SymptomAnalysis,
        recommendations: &Recommendations,
    ) -> Result<EscalationAdvice> {
        let prompt = fill(
            prompts::ESCALATION,
            &[
                ("analysis", &serde_json::to_string_pretty(analysis)?),
                ("recommendations", &serde_json::to_string_pretty(recommendations)?),
            ],
        );

        let advice: EscalationAdvice =
            generate_structured_output(self.client.llm.as_ref(), &self.client.request(prompt))
                .await?;
        if advice.urgency_message.trim().is_empty() || advice.immediate_action.trim().is_empty() {
            return Err(MedicheckError::MalformedOutput(
                "escalation advice is missing its message or action".to_string(),
            ));
        }
        Ok(advice)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{LLMResponse, ModelInfo};
    use std::sync::Mutex;

    /// Replies with canned strings in order and records prompts
    struct ScriptedLlm {
        replies: Mutex<Vec<String>>,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedLlm {
        fn new(replies: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.iter().map(|r| r.to_string()).collect()),
                prompts: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl LLMProvider for ScriptedLlm {
        async fn generate(&self, request: &LLMRequest) -> Result<LLMResponse> {
            let prompt = request.messages.last().map(|m| m.content.clone()).unwrap_or_default();
            self.prompts.lock().unwrap().push(prompt);
            let mut replies = self.replies.lock().unwrap();
            if replies.is_empty() {
                return Err(MedicheckError::Llm("script exhausted".to_string()));
            }
            Ok(LLMResponse {
                content: replies.remove(0),
                usage: None,
            })
        }

        fn model_info(&self) -> ModelInfo {
            ModelInfo {
                provider: "scripted".to_string(),
                model_name: "test".to_string(),
            }
        }
    }

    struct EchoResearch;

    #[async_trait]
    impl ResearchProvider for EchoResearch {
        async fn research(&self, query: &str) -> Result<String> {
            Ok(format!("results for {}", query))
        }
    }

    const ANALYSIS_REPLY: &str = r#"{"symptom_summary": "Sore throat for two days", "possible_conditions": ["Viral pharyngitis", "Strep throat"], "urgency_level": "Moderate", "reasoning": "Persistent pain"}"#;

    #[tokio::test]
    async fn test_analysis_without_research() {
        let llm = ScriptedLlm::new(&[ANALYSIS_REPLY]);
        let provider = LlmAnalysisProvider::new(llm.clone());

        let output = provider.analyze("sore throat", "none").await.unwrap();
        assert_eq!(output.analysis.urgency_level, UrgencyLevel::Moderate);
        assert_eq!(output.analysis.possible_conditions.len(), 2);
        assert!(output.research_notes.is_none());
        assert!(llm.prompts.lock().unwrap()[0].contains("<symptoms>\nsore throat\n</symptoms>"));
    }

    #[tokio::test]
    async fn test_analysis_with_research_prefixes_notes() {
        let llm = ScriptedLlm::new(&[r#"{"queries": ["strep throat criteria"]}"#, ANALYSIS_REPLY]);
        let provider = LlmAnalysisProvider::new(llm.clone()).with_research(Arc::new(EchoResearch));

        let output = provider.analyze("sore throat", "none").await.unwrap();
        assert_eq!(
            output.research_notes.as_deref(),
            Some("Research: results for strep throat criteria\n")
        );
        assert!(llm.prompts.lock().unwrap()[1].contains("results for strep throat criteria"));
    }

    #[tokio::test]
    async fn test_failed_plan_skips_research() {
        let llm = ScriptedLlm::new(&["I cannot decide", ANALYSIS_REPLY]);
        let provider = LlmAnalysisProvider::new(llm).with_research(Arc::new(EchoResearch));

        let output = provider.analyze("sore throat", "none").await.unwrap();
        assert!(output.research_notes.is_none());
    }

    #[tokio::test]
    async fn test_unknown_urgency_is_malformed() {
        let llm = ScriptedLlm::new(&[
            r#"{"symptom_summary": "x", "possible_conditions": [], "urgency_level": "critical", "reasoning": ""}"#,
        ]);
        let err = LlmAnalysisProvider::new(llm)
            .analyze("x", "none")
            .await
            .unwrap_err();
        assert!(matches!(err, MedicheckError::MalformedOutput(_)));
    }

    #[tokio::test]
    async fn test_recommendations_missing_follow_up_defaults() {
        let llm = ScriptedLlm::new(&[
            r#"{"immediate_actions": ["Rest"], "general_care": ["Fluids"], "when_to_seek_help": "If fever rises", "follow_up": null}"#,
        ]);
        let analysis = AnalysisPayload {
            symptom_summary: "Cold".to_string(),
            possible_conditions: vec![],
            urgency_level: "low".to_string(),
            reasoning: String::new(),
        }
        .into_analysis()
        .unwrap();

        let output = LlmRecommendationProvider::new(llm)
            .recommend(&analysis, "none", "")
            .await
            .unwrap();
        assert_eq!(output.recommendations.follow_up, "");
        assert!(output.additional_research.is_none());
    }

    #[tokio::test]
    async fn test_escalation_requires_action() {
        let llm = ScriptedLlm::new(&[
            r#"{"urgency_message": "Go now", "immediate_action": "", "warning_signs": [], "emergency_contact": "911"}"#,
        ]);
        let analysis = SymptomAnalysis {
            summary: "Chest pain".to_string(),
            possible_conditions: vec![],
            urgency_level: UrgencyLevel::Urgent,
            reasoning: String::new(),
        };
        let recommendations = Recommendations {
            immediate_actions: vec!["Call 911".to_string()],
            general_care: vec![],
            when_to_seek_help: "Now".to_string(),
            follow_up: String::new(),
        };
        let err = LlmEscalationProvider::new(llm)
            .escalate(&analysis, &recommendations)
            .await
            .unwrap_err();
        assert!(matches!(err, MedicheckError::MalformedOutput(_)));
    }
}
