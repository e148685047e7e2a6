//! Web research: search, de-duplicate, summarize, format
//!
//! [`ResearchPipeline`] is the [`ResearchProvider`] the LLM-backed analysis
//! and recommendation providers consult. A query goes to a
//! [`SearchBackend`] (Tavily by default), hits are de-duplicated by URL,
//! pages with raw content are summarized by an LLM and the result is
//! rendered as one text block the model can read back.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::config::{ResearchConfig, SearchTopic};
use crate::error::{MedicheckError, Result};
use crate::llm::{LLMProvider, LLMRequest, generate_structured_output};
use crate::providers::ResearchProvider;

/// Returned when every query came back empty
pub const NO_RESULTS: &str = "No valid search results found. Please try different search queries or use a different search API.";

/// Raw page content is cut to this many characters when it cannot be summarized
const FALLBACK_CONTENT_CHARS: usize = 1000;

/// One search result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    /// Short snippet chosen by the search service
    #[serde(default)]
    pub content: String,
    /// Full page text, when requested and available
    #[serde(default)]
    pub raw_content: Option<String>,
}

/// Results for one query
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchResponse {
    #[serde(default)]
    pub query: String,
    #[serde(default)]
    pub results: Vec<SearchHit>,
}

/// Per-query search parameters
#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub max_results: usize,
    pub topic: SearchTopic,
    pub include_raw_content: bool,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self::from(&ResearchConfig::default())
    }
}

impl From<&ResearchConfig> for SearchOptions {
    fn from(config: &ResearchConfig) -> Self {
        Self {
            max_results: config.max_results,
            topic: config.topic,
            include_raw_content: config.include_raw_content,
        }
    }
}

/// A web search service
#[async_trait]
pub trait SearchBackend: Send + Sync {
    async fn search(&self, query: &str, options: &SearchOptions) -> Result<SearchResponse>;
}

/// Tavily search API client
pub struct TavilyBackend {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

#[derive(Serialize)]
struct TavilyRequest<'a> {
    query: &'a str,
    max_results: usize,
    topic: &'static str,
    include_raw_content: bool,
}

impl TavilyBackend {
    pub fn new(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Build from config, falling back to `TAVILY_API_KEY`
    ///
    /// # Errors
    ///
    /// Returns a configuration error if no API key is available.
    pub fn from_config(config: &ResearchConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .or_else(|| std::env::var("TAVILY_API_KEY").ok())
            .ok_or_else(|| {
                MedicheckError::Configuration(
                    "research.api_key or TAVILY_API_KEY must be set to enable research".to_string(),
                )
            })?;
        Ok(Self::new(api_key, config.base_url.clone()))
    }
}

#[async_trait]
impl SearchBackend for TavilyBackend {
    async fn search(&self, query: &str, options: &SearchOptions) -> Result<SearchResponse> {
        let url = format!("{}/search", self.base_url);
        let body = TavilyRequest {
            query,
            max_results: options.max_results,
            topic: options.topic.as_str(),
            include_raw_content: options.include_raw_content,
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| MedicheckError::Research(format!("Failed to reach search API: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(MedicheckError::Research(format!(
                "Search API error ({}): {}",
                status, text
            )));
        }

        response
            .json()
            .await
            .map_err(|e| MedicheckError::Research(format!("Failed to parse search response: {}", e)))
    }
}

/// A de-duplicated hit with its display content resolved
#[derive(Debug, Clone, PartialEq)]
pub struct SourceSummary {
    pub title: String,
    pub url: String,
    pub content: String,
}

#[derive(Deserialize)]
struct PageSummary {
    summary: String,
    key_excerpts: String,
}

/// Search, de-duplicate, summarize and format
pub struct ResearchPipeline {
    backend: Arc<dyn SearchBackend>,
    summarizer: Option<Arc<dyn LLMProvider>>,
    options: SearchOptions,
}

impl ResearchPipeline {
    pub fn new(backend: Arc<dyn SearchBackend>, options: SearchOptions) -> Self {
        Self {
            backend,
            summarizer: None,
            options,
        }
    }

    /// Summarize raw page content with `llm` instead of using snippets
    pub fn with_summarizer(mut self, llm: Arc<dyn LLMProvider>) -> Self {
        self.summarizer = Some(llm);
        self
    }

    /// Run every query in order and format the combined sources
    pub async fn search_many(&self, queries: &[String]) -> Result<String> {
        let mut responses = Vec::with_capacity(queries.len());
        for query in queries {
            tracing::debug!(query = %query, "Running web search");
            responses.push(self.backend.search(query, &self.options).await?);
        }

        let hits = deduplicate(responses);
        tracing::info!(queries = queries.len(), sources = hits.len(), "Web research collected");

        let mut sources = Vec::with_capacity(hits.len());
        for hit in hits {
            let content = match (hit.raw_content.as_deref(), &self.summarizer) {
                (Some(raw), Some(llm)) if !raw.trim().is_empty() => {
                    summarize_page(llm.as_ref(), raw).await
                }
                _ => hit.content,
            };
            sources.push(SourceSummary {
                title: hit.title,
                url: hit.url,
                content,
            });
        }

        Ok(format_search_output(&sources))
    }
}

#[async_trait]
impl ResearchProvider for ResearchPipeline {
    async fn research(&self, query: &str) -> Result<String> {
        self.search_many(&[query.to_string()]).await
    }
}

/// Flatten responses, keeping the first hit for each URL
pub fn deduplicate(responses: Vec<SearchResponse>) -> Vec<SearchHit> {
    let mut seen = std::collections::HashSet::new();
    responses
        .into_iter()
        .flat_map(|response| response.results)
        .filter(|hit| seen.insert(hit.url.clone()))
        .collect()
}

/// Summarize page text; falls back to the truncated text if the model fails
async fn summarize_page(llm: &dyn LLMProvider, raw: &str) -> String {
    let today = chrono::Local::now().format("%a %b %-d, %Y");
    let prompt = format!(
        "Summarize this content as a JSON object with string fields \"summary\" and \
         \"key_excerpts\":\n\n{}\n\nToday's date: {}",
        raw, today
    );
    let request = LLMRequest::from_prompt(prompt).temperature(0.0);

    match generate_structured_output::<PageSummary>(llm, &request).await {
        Ok(page) => format!(
            "<summary>\n{}\n</summary>\n\n<key_excerpts>\n{}\n</key_excerpts>",
            page.summary, page.key_excerpts
        ),
        Err(e) => {
            tracing::warn!(error = %e, "Failed to summarize webpage, using raw excerpt");
            truncate_content(raw)
        }
    }
}

/// Keep the first 1000 characters, marking the cut with `...`
pub fn truncate_content(content: &str) -> String {
    if content.chars().count() > FALLBACK_CONTENT_CHARS {
        let mut cut: String = content.chars().take(FALLBACK_CONTENT_CHARS).collect();
        cut.push_str("...");
        cut
    } else {
        content.to_string()
    }
}

/// Render sources as numbered blocks separated by rules
pub fn format_search_output(sources: &[SourceSummary]) -> String {
    if sources.is_empty() {
        return NO_RESULTS.to_string();
    }

    let rule = "-".repeat(80);
    let mut out = String::from("Search results: \n\n");
    for (i, source) in sources.iter().enumerate() {
        out.push_str(&format!(
            "\n\n--- SOURCE {}: {} ---\nURL: {}\n\nSUMMARY:\n{}\n\n{}\n",
            i + 1,
            source.title,
            source.url,
            source.content,
            rule
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{LLMResponse, ModelInfo};
    use std::sync::Mutex;

    fn hit(url: &str, raw: Option<&str>) -> SearchHit {
        SearchHit {
            title: format!("Title {}", url),
            url: url.to_string(),
            content: format!("snippet {}", url),
            raw_content: raw.map(str::to_string),
        }
    }

    struct ScriptedBackend {
        responses: Mutex<Vec<SearchResponse>>,
    }

    #[async_trait]
    impl SearchBackend for ScriptedBackend {
        async fn search(&self, _query: &str, _options: &SearchOptions) -> Result<SearchResponse> {
            let mut responses = self.responses.lock().unwrap();
            Ok(if responses.is_empty() {
                SearchResponse::default()
            } else {
                responses.remove(0)
            })
        }
    }

    struct BrokenSummarizer;

    #[async_trait]
    impl LLMProvider for BrokenSummarizer {
        async fn generate(&self, _request: &LLMRequest) -> Result<LLMResponse> {
            Ok(LLMResponse {
                content: "not json".to_string(),
                usage: None,
            })
        }

        fn model_info(&self) -> ModelInfo {
            ModelInfo {
                provider: "broken".to_string(),
                model_name: "none".to_string(),
            }
        }
    }

    #[test]
    fn test_deduplicate_keeps_first_occurrence() {
        let responses = vec![
            SearchResponse {
                query: "a".to_string(),
                results: vec![hit("u1", None), hit("u2", None)],
            },
            SearchResponse {
                query: "b".to_string(),
                results: vec![hit("u2", Some("dup")), hit("u3", None)],
            },
        ];
        let hits = deduplicate(responses);
        let urls: Vec<_> = hits.iter().map(|h| h.url.as_str()).collect();
        assert_eq!(urls, vec!["u1", "u2", "u3"]);
        assert!(hits[1].raw_content.is_none());
    }

    #[test]
    fn test_format_output_layout() {
        let out = format_search_output(&[SourceSummary {
            title: "Migraine".to_string(),
            url: "https://example.org/migraine".to_string(),
            content: "Recurring headaches".to_string(),
        }]);
        let expected = format!(
            "Search results: \n\n\n\n--- SOURCE 1: Migraine ---\nURL: https://example.org/migraine\n\nSUMMARY:\nRecurring headaches\n\n{}\n",
            "-".repeat(80)
        );
        assert_eq!(out, expected);
        assert_eq!(format_search_output(&[]), NO_RESULTS);
    }

    #[test]
    fn test_truncate_content() {
        assert_eq!(truncate_content("short"), "short");
        let long = "x".repeat(1500);
        let cut = truncate_content(&long);
        assert_eq!(cut.len(), 1003);
        assert!(cut.ends_with("..."));
    }

    #[tokio::test]
    async fn test_pipeline_falls_back_when_summary_fails() {
        let backend = ScriptedBackend {
            responses: Mutex::new(vec![SearchResponse {
                query: "q".to_string(),
                results: vec![hit("u1", Some("y".repeat(1200).as_str())), hit("u2", None)],
            }]),
        };
        let pipeline = ResearchPipeline::new(Arc::new(backend), SearchOptions::default())
            .with_summarizer(Arc::new(BrokenSummarizer));

        let out = pipeline.research("q").await.unwrap();
        assert!(out.contains("--- SOURCE 1: Title u1 ---"));
        assert!(out.contains(&format!("{}...", "y".repeat(1000))));
        assert!(out.contains("SUMMARY:\nsnippet u2"));
    }

    #[tokio::test]
    async fn test_pipeline_with_no_hits() {
        let backend = ScriptedBackend {
            responses: Mutex::new(Vec::new()),
        };
        let pipeline = ResearchPipeline::new(Arc::new(backend), SearchOptions::default());
        assert_eq!(pipeline.research("q").await.unwrap(), NO_RESULTS);
    }
}
