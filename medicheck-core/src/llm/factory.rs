//! Factory for creating LLM providers from configuration

use crate::config::{LLMProvider as LLMProviderType, LLMProviderConfig};
use crate::error::Result;
use crate::llm::LLMProvider;
use std::sync::Arc;

#[cfg(feature = "llm-ollama")]
use crate::llm::providers::ollama::OllamaProvider;

#[cfg(feature = "llm-openai")]
use crate::llm::providers::openai::OpenAIProvider;

/// Factory for creating LLM providers
pub struct LLMProviderFactory;

impl LLMProviderFactory {
    /// Create an LLM provider from configuration
    ///
    /// An empty `model` falls back to the provider's environment variable or
    /// built-in default.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider cannot be created (e.g., missing API
    /// key) or was compiled out.
    pub fn create(config: &LLMProviderConfig) -> Result<Arc<dyn LLMProvider>> {
        let model = Some(config.model.clone()).filter(|m| !m.is_empty());

        match config.provider {
            #[cfg(feature = "llm-openai")]
            LLMProviderType::OpenAI => {
                let provider = match &config.api_key {
                    Some(api_key) => {
                        let model = model
                            .or_else(|| std::env::var("OPENAI_MODEL").ok())
                            .unwrap_or_else(|| "gpt-4o-mini".to_string());
                        match &config.base_url {
                            Some(base_url) => {
                                OpenAIProvider::with_base_url(api_key.clone(), model, base_url.clone())
                            }
                            None => OpenAIProvider::new(api_key.clone(), model),
                        }
                    }
                    None => OpenAIProvider::from_env(model)?,
                };
                tracing::info!(model = %provider.model(), "Using OpenAI provider");
                Ok(Arc::new(provider))
            }

            #[cfg(not(feature = "llm-openai"))]
            LLMProviderType::OpenAI => Err(crate::error::MedicheckError::Configuration(
                "OpenAI provider requires 'llm-openai' feature".to_string(),
            )),

            #[cfg(feature = "llm-ollama")]
            LLMProviderType::Ollama => {
                let provider = match &config.base_url {
                    Some(url) => OllamaProvider::new(
                        model.unwrap_or_else(|| "qwen3:14b".to_string()),
                        Some(url.clone()),
                    ),
                    None => OllamaProvider::from_env(model),
                };
                tracing::info!(model = %provider.model(), "Using Ollama provider");
                Ok(Arc::new(provider))
            }

            #[cfg(not(feature = "llm-ollama"))]
            LLMProviderType::Ollama => Err(crate::error::MedicheckError::Configuration(
                "Ollama provider requires 'llm-ollama' feature".to_string(),
            )),
        }
    }

    /// Create from an optional config section
    pub fn from_config(config: Option<&LLMProviderConfig>) -> Result<Option<Arc<dyn LLMProvider>>> {
        config.map(Self::create).transpose()
    }
}
