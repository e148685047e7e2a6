//! Configuration types for MediCheck

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration for MediCheck
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MedicheckConfig {
    /// Scheduler limits and timeouts
    #[serde(default)]
    pub workflow: WorkflowConfig,

    /// Checkpoint store configuration
    #[serde(default)]
    pub checkpoints: CheckpointConfig,

    /// Report output configuration
    #[serde(default)]
    pub reports: ReportConfig,

    /// LLM provider configuration (optional)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub llm: Option<LLMProviderConfig>,

    /// Research (web search) configuration (optional)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub research: Option<ResearchConfig>,
}

/// Scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowConfig {
    /// Upper bound on node executions per workflow instance
    pub max_steps: usize,

    /// Bound on a single provider call
    #[serde(with = "humantime_serde")]
    pub provider_timeout: Duration,

    /// Presentation event channel capacity
    pub event_buffer: usize,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            max_steps: 50,
            provider_timeout: Duration::from_secs(60),
            event_buffer: 100,
        }
    }
}

/// Checkpoint store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointConfig {
    /// Storage backend
    pub backend: CheckpointBackend,

    /// Age after which a suspended checkpoint may be purged
    #[serde(default, with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub ttl: Option<Duration>,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            backend: CheckpointBackend::File {
                dir: PathBuf::from("./data/checkpoints"),
            },
            ttl: None,
        }
    }
}

/// Checkpoint storage backend
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum CheckpointBackend {
    /// Process-local map, lost on exit
    Memory,

    /// One JSON document per session
    File {
        /// Directory holding checkpoint documents
        dir: PathBuf,
    },
}

/// Report output configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportConfig {
    /// Directory reports are written to
    pub dir: PathBuf,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("medical_reports"),
        }
    }
}

/// LLM provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LLMProviderConfig {
    /// Provider type
    pub provider: LLMProvider,

    /// Model name
    pub model: String,

    /// API key (if needed, prefer env vars)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Base URL (for custom endpoints, e.g., Ollama)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    /// Sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

fn default_temperature() -> f32 {
    0.1
}

/// LLM provider type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LLMProvider {
    OpenAI,
    Ollama,
}

/// Web research configuration (Tavily-compatible search API)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchConfig {
    /// API key for the search service
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Search endpoint base URL
    #[serde(default = "default_research_url")]
    pub base_url: String,

    /// Results fetched per query
    #[serde(default = "default_max_results")]
    pub max_results: usize,

    /// Search topic filter
    #[serde(default)]
    pub topic: SearchTopic,

    /// Fetch full page content for summarization
    #[serde(default = "default_include_raw_content")]
    pub include_raw_content: bool,
}

fn default_research_url() -> String {
    "https://api.tavily.com".to_string()
}

fn default_max_results() -> usize {
    3
}

fn default_include_raw_content() -> bool {
    true
}

impl Default for ResearchConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_research_url(),
            max_results: default_max_results(),
            topic: SearchTopic::default(),
            include_raw_content: default_include_raw_content(),
        }
    }
}

/// Search topic filter
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchTopic {
    #[default]
    General,
    News,
    Finance,
}

impl SearchTopic {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchTopic::General => "general",
            SearchTopic::News => "news",
            SearchTopic::Finance => "finance",
        }
    }
}

impl MedicheckConfig {
    /// Load configuration from file and environment variables.
    ///
    /// Loads in this order:
    /// 1. Default configuration
    /// 2. Configuration file (medicheck.toml, then path from MEDICHECK_CONFIG_PATH)
    /// 3. Environment variable overrides (`MEDICHECK_WORKFLOW__MAX_STEPS=20`)
    ///
    /// # Errors
    ///
    /// Returns an error if a configuration file is invalid.
    pub fn load() -> crate::error::Result<Self> {
        Self::load_with(None)
    }

    /// Like [`load`](Self::load), but `path` replaces `MEDICHECK_CONFIG_PATH`
    /// as the explicit file layer. Environment overrides still apply on top.
    ///
    /// # Errors
    ///
    /// Returns an error if a configuration file is invalid.
    pub fn load_with(path: Option<&std::path::Path>) -> crate::error::Result<Self> {
        use figment::{
            Figment,
            providers::{Env, Format, Serialized, Toml},
        };

        let mut figment = Figment::from(Serialized::defaults(MedicheckConfig::default()))
            .merge(Toml::file("medicheck.toml"));

        match path {
            Some(path) => figment = figment.merge(Toml::file(path)),
            None => {
                if let Ok(path) = std::env::var("MEDICHECK_CONFIG_PATH") {
                    figment = figment.merge(Toml::file(path));
                }
            }
        }

        figment = figment.merge(Env::prefixed("MEDICHECK_").ignore(&["config_path"]).split("__"));

        let config: MedicheckConfig = figment.extract().map_err(|e| {
            crate::error::MedicheckError::Configuration(format!(
                "Failed to load configuration: {}",
                e
            ))
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::error::Result<Self> {
        use figment::{
            Figment,
            providers::{Format, Serialized, Toml},
        };

        let config: MedicheckConfig = Figment::from(Serialized::defaults(MedicheckConfig::default()))
            .merge(Toml::file(path))
            .extract()
            .map_err(|e| {
                crate::error::MedicheckError::Configuration(format!(
                    "Failed to load configuration file: {}",
                    e
                ))
            })?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if a limit is zero or the temperature is out of range.
    pub fn validate(&self) -> crate::error::Result<()> {
        use crate::error::MedicheckError::Configuration;

        if self.workflow.max_steps == 0 {
            return Err(Configuration("workflow.max_steps must be at least 1".to_string()));
        }
        if self.workflow.provider_timeout.is_zero() {
            return Err(Configuration(
                "workflow.provider_timeout must be non-zero".to_string(),
            ));
        }
        if self.workflow.event_buffer == 0 {
            return Err(Configuration("workflow.event_buffer must be at least 1".to_string()));
        }
        if let Some(llm) = &self.llm {
            if !(0.0..=2.0).contains(&llm.temperature) {
                return Err(Configuration(format!(
                    "llm.temperature must be within 0.0..=2.0, got {}",
                    llm.temperature
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = MedicheckConfig::default();
        assert_eq!(config.workflow.max_steps, 50);
        assert_eq!(config.workflow.provider_timeout, Duration::from_secs(60));
        assert_eq!(config.reports.dir, PathBuf::from("medical_reports"));
        assert!(config.llm.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[workflow]
max_steps = 12
provider_timeout = "5s"
event_buffer = 8

[checkpoints]
ttl = "2h"

[checkpoints.backend]
type = "file"
dir = "/var/lib/medicheck/checkpoints"

[llm]
provider = "ollama"
model = "qwen3:14b"
"#
        )
        .unwrap();

        let config = MedicheckConfig::from_file(file.path()).unwrap();
        assert_eq!(config.workflow.max_steps, 12);
        assert_eq!(config.workflow.provider_timeout, Duration::from_secs(5));
        assert!(matches!(
            config.checkpoints.backend,
            CheckpointBackend::File { ref dir } if dir == &PathBuf::from("/var/lib/medicheck/checkpoints")
        ));
        assert_eq!(config.checkpoints.ttl, Some(Duration::from_secs(7200)));

        let llm = config.llm.unwrap();
        assert_eq!(llm.provider, LLMProvider::Ollama);
        assert_eq!(llm.temperature, 0.1);
    }

    #[test]
    fn test_env_overrides_explicit_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[workflow]
max_steps = 12
provider_timeout = "5s"
event_buffer = 8

[reports]
dir = "from-file"
"#
        )
        .unwrap();

        unsafe {
            std::env::set_var("MEDICHECK_REPORTS__DIR", "from-env");
        }
        let config = MedicheckConfig::load_with(Some(file.path()));
        unsafe {
            std::env::remove_var("MEDICHECK_REPORTS__DIR");
        }

        let config = config.unwrap();
        assert_eq!(config.workflow.max_steps, 12);
        assert_eq!(config.reports.dir, PathBuf::from("from-env"));
    }

    #[test]
    fn test_zero_step_limit_rejected() {
        let mut config = MedicheckConfig::default();
        config.workflow.max_steps = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_search_topic_str() {
        assert_eq!(SearchTopic::default().as_str(), "general");
        assert_eq!(SearchTopic::News.as_str(), "news");
    }
}
