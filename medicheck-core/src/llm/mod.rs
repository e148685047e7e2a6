//! Chat-completion clients used by the LLM-backed providers

use async_trait::async_trait;
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::error::{MedicheckError, Result};

pub mod factory;
pub mod providers;
pub mod structured;

pub use factory::LLMProviderFactory;

/// Message role in a conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

/// A message in a conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }
}

/// Request to an LLM provider
#[derive(Debug, Clone)]
pub struct LLMRequest {
    pub messages: Vec<Message>,

    /// Sampling temperature; the provider default when unset
    pub temperature: Option<f32>,

    pub max_tokens: Option<usize>,

    /// Ask the backend to constrain output to a JSON object
    pub json_mode: bool,
}

impl LLMRequest {
    /// Create a simple request from a single prompt
    pub fn from_prompt(prompt: impl Into<String>) -> Self {
        Self {
            messages: vec![Message::user(prompt)],
            temperature: None,
            max_tokens: None,
            json_mode: false,
        }
    }

    pub fn with_system_prompt(
        system_prompt: impl Into<String>,
        user_prompt: impl Into<String>,
    ) -> Self {
        Self {
            messages: vec![Message::system(system_prompt), Message::user(user_prompt)],
            ..Self::from_prompt("")
        }
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature.clamp(0.0, 2.0));
        self
    }

    pub fn max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn json(mut self) -> Self {
        self.json_mode = true;
        self
    }
}

/// Response from an LLM provider
#[derive(Debug, Clone)]
pub struct LLMResponse {
    pub content: String,
    pub usage: Option<TokenUsage>,
}

/// Token usage information
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenUsage {
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    pub total_tokens: usize,
}

/// Model information
#[derive(Debug, Clone)]
pub struct ModelInfo {
    pub provider: String,
    pub model_name: String,
}

/// Chat-completion backend
#[async_trait]
pub trait LLMProvider: Send + Sync {
    /// Run one completion
    async fn generate(&self, request: &LLMRequest) -> Result<LLMResponse>;

    /// Run a completion and parse the reply as a JSON value.
    ///
    /// Replies wrapped in code fences or surrounded by prose are accepted as
    /// long as they contain one JSON object.
    async fn generate_structured(&self, request: &LLMRequest) -> Result<serde_json::Value> {
        let mut request = request.clone();
        request.json_mode = true;
        let response = self.generate(&request).await?;
        structured::parse_json_value(&response.content)
    }

    fn model_info(&self) -> ModelInfo;
}

/// Generate structured output and deserialize it into `T`
pub async fn generate_structured_output<T: DeserializeOwned>(
    provider: &dyn LLMProvider,
    request: &LLMRequest,
) -> Result<T> {
    let json = provider.generate_structured(request).await?;
    serde_json::from_value(json).map_err(|e| {
        MedicheckError::MalformedOutput(format!(
            "{} reply did not match the expected shape: {}",
            provider.model_info().provider,
            e
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CannedProvider(&'static str);

    #[async_trait]
    impl LLMProvider for CannedProvider {
        async fn generate(&self, request: &LLMRequest) -> Result<LLMResponse> {
            assert!(request.json_mode);
            Ok(LLMResponse {
                content: self.0.to_string(),
                usage: None,
            })
        }

        fn model_info(&self) -> ModelInfo {
            ModelInfo {
                provider: "canned".to_string(),
                model_name: "test".to_string(),
            }
        }
    }

    #[derive(Debug, Deserialize)]
    struct Verdict {
        urgent: bool,
    }

    #[test]
    fn test_request_builders() {
        let request = LLMRequest::with_system_prompt("sys", "user")
            .temperature(5.0)
            .max_tokens(256);
        assert_eq!(request.messages.len(), 2);
        assert_eq!(request.messages[0].role, MessageRole::System);
        assert_eq!(request.temperature, Some(2.0));
        assert_eq!(request.max_tokens, Some(256));
        assert!(!request.json_mode);
    }

    #[tokio::test]
    async fn test_structured_output_from_fenced_reply() {
        let provider = CannedProvider("Sure:\n```json\n{\"urgent\": true}\n```");
        let verdict: Verdict =
            generate_structured_output(&provider, &LLMRequest::from_prompt("?"))
                .await
                .unwrap();
        assert!(verdict.urgent);
    }

    #[tokio::test]
    async fn test_shape_mismatch_is_malformed_output() {
        let provider = CannedProvider("{\"level\": \"high\"}");
        let err = generate_structured_output::<Verdict>(&provider, &LLMRequest::from_prompt("?"))
            .await
            .unwrap_err();
        assert!(matches!(err, MedicheckError::MalformedOutput(_)));
    }
}
