//! Ollama chat client (local models)

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{MedicheckError, Result};
use crate::llm::{LLMProvider, LLMRequest, LLMResponse, MessageRole, ModelInfo, TokenUsage};

const DEFAULT_BASE_URL: &str = "http://localhost:11434";
const DEFAULT_MODEL: &str = "qwen3:14b";

/// Ollama LLM provider (local, runs on your machine)
pub struct OllamaProvider {
    client: reqwest::Client,
    model: String,
    base_url: String,
}

impl OllamaProvider {
    /// `base_url` defaults to `http://localhost:11434`
    pub fn new(model: impl Into<String>, base_url: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            model: model.into(),
            base_url: base_url
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
        }
    }

    /// Create from `OLLAMA_MODEL` and `OLLAMA_BASE_URL`; an explicit `model` wins
    pub fn from_env(model: Option<String>) -> Self {
        let model = model
            .or_else(|| std::env::var("OLLAMA_MODEL").ok())
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());
        Self::new(model, std::env::var("OLLAMA_BASE_URL").ok())
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn request_body(&self, request: &LLMRequest) -> OllamaRequest {
        OllamaRequest {
            model: self.model.clone(),
            messages: request
                .messages
                .iter()
                .map(|m| OllamaMessage {
                    role: match m.role {
                        MessageRole::System => "system",
                        MessageRole::User => "user",
                        MessageRole::Assistant => "assistant",
                    },
                    content: m.content.clone(),
                })
                .collect(),
            stream: false,
            format: request.json_mode.then_some("json"),
            options: OllamaOptions {
                temperature: request.temperature,
                num_predict: request.max_tokens,
            },
        }
    }
}

#[derive(Serialize)]
struct OllamaRequest {
    model: String,
    messages: Vec<OllamaMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<&'static str>,
    options: OllamaOptions,
}

#[derive(Serialize)]
struct OllamaMessage {
    role: &'static str,
    content: String,
}

#[derive(Serialize)]
struct OllamaOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<usize>,
}

#[derive(Deserialize)]
struct OllamaResponse {
    message: OllamaMessageResponse,
    #[serde(default)]
    prompt_eval_count: Option<usize>,
    #[serde(default)]
    eval_count: Option<usize>,
}

#[derive(Deserialize)]
struct OllamaMessageResponse {
    content: String,
    #[serde(default)]
    thinking: Option<String>,
}

#[async_trait]
impl LLMProvider for OllamaProvider {
    async fn generate(&self, request: &LLMRequest) -> Result<LLMResponse> {
        let url = format!("{}/api/chat", self.base_url);
        tracing::debug!(model = %self.model, json = request.json_mode, "Ollama request");

        let response = self
            .client
            .post(&url)
            .json(&self.request_body(request))
            .send()
            .await
            .map_err(|e| {
                MedicheckError::Llm(format!(
                    "Failed to send request to Ollama: {}. Make sure Ollama is running.",
                    e
                ))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(MedicheckError::Llm(format!(
                "Ollama API error ({}): {}",
                status, text
            )));
        }

        let body: OllamaResponse = response
            .json()
            .await
            .map_err(|e| MedicheckError::Llm(format!("Failed to parse Ollama response: {}", e)))?;

        // Reasoning models may leave `content` empty and answer in `thinking`
        let mut content = body.message.content.trim().to_string();
        if content.is_empty() {
            if let Some(thinking) = body.message.thinking {
                content = thinking.trim().to_string();
            }
        }

        let usage = match (body.prompt_eval_count, body.eval_count) {
            (Some(prompt_tokens), Some(completion_tokens)) => Some(TokenUsage {
                prompt_tokens,
                completion_tokens,
                total_tokens: prompt_tokens + completion_tokens,
            }),
            _ => None,
        };

        Ok(LLMResponse { content, usage })
    }

    fn model_info(&self) -> ModelInfo {
        ModelInfo {
            provider: "ollama".to_string(),
            model_name: self.model.clone(),
        }
    }
}
