use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::error::ClientError;

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const MAX_SEARCH_USES: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompletionOptions {
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for CompletionOptions {
    fn default() -> Self {
        Self {
            temperature: 0.3,
            max_tokens: 1024,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FinishReason {
    Stop,
    MaxTokens,
    Safety,
    Other,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub text: String,
    pub finish_reason: FinishReason,
}

impl Completion {
    pub fn is_truncated(&self) -> bool {
        self.finish_reason == FinishReason::MaxTokens
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    #[serde(default)]
    pub snippet: String,
}

/// Research text together with the sources the search backed it with
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GroundedAnswer {
    pub text: String,
    pub citations: Vec<SearchHit>,
}

#[async_trait]
pub trait CompletionService: Send + Sync {
    async fn complete(&self, prompt: &str, options: CompletionOptions) -> Result<Completion>;
}

#[async_trait]
pub trait SearchService: Send + Sync {
    async fn search(&self, query: &str) -> Result<Vec<SearchHit>>;
    async fn research(&self, prompt: &str) -> Result<GroundedAnswer>;
}

#[derive(Serialize)]
struct ClaudeRequest {
    model: String,
    max_tokens: u32,
    temperature: f32,
    messages: Vec<Message>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<serde_json::Value>,
}

#[derive(Serialize, Deserialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct ClaudeResponse {
    content: Vec<Content>,
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Content {
    Text {
        text: String,
        #[serde(default)]
        citations: Vec<Citation>,
    },
    WebSearchToolResult {
        content: serde_json::Value,
    },
    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
struct Citation {
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    cited_text: Option<String>,
}

#[derive(Deserialize)]
struct WebSearchResult {
    url: String,
    #[serde(default)]
    title: String,
}

pub struct ClaudeClient {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
    semaphore: Arc<Semaphore>,
}

impl ClaudeClient {
    pub fn new(api_key: &str, model: &str) -> Result<Self, ClientError> {
        if api_key.trim().is_empty() {
            return Err(ClientError::NotConfigured {
                service: "Completion service",
                variable: "ANTHROPIC_API_KEY",
            });
        }

        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(180))
            .build()?;

        Ok(Self {
            client,
            api_key: api_key.to_string(),
            model: model.to_string(),
            base_url: ANTHROPIC_API_URL.to_string(),
            // Keep concurrency low to stay under the per-minute token limit
            semaphore: Arc::new(Semaphore::new(4)),
        })
    }

    pub fn with_base_url(mut self, url: &str) -> Self {
        self.base_url = url.to_string();
        self
    }

    async fn send(&self, request: &ClaudeRequest) -> Result<ClaudeResponse> {
        let _permit = self.semaphore.acquire().await?;

        for attempt in 0..3u32 {
            match self.try_send(request).await {
                Ok(response) => return Ok(response),
                Err(ClientError::Api { status, message }) if is_retryable(status) && attempt < 2 => {
                    let backoff = std::time::Duration::from_secs(10 * (attempt as u64 + 1));
                    warn!(status, %message, ?backoff, "Claude API busy, retrying");
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => return Err(e).context("Claude API request failed"),
            }
        }

        anyhow::bail!("Claude API request failed: max retries reached")
    }

    async fn try_send(&self, request: &ClaudeRequest) -> Result<ClaudeResponse, ClientError> {
        debug!(model = %request.model, tools = request.tools.len(), "Claude request");

        let response = self
            .client
            .post(&self.base_url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| String::from("unknown error"));
            return Err(ClientError::Api {
                status: status.as_u16(),
                message,
            });
        }

        response
            .json::<ClaudeResponse>()
            .await
            .map_err(|e| ClientError::Parse {
                what: "Claude API response",
                message: e.to_string(),
            })
    }

    fn request(&self, prompt: &str, options: CompletionOptions, with_search: bool) -> ClaudeRequest {
        let tools = if with_search {
            vec![json!({
                "type": "web_search_20250305",
                "name": "web_search",
                "max_uses": MAX_SEARCH_USES,
            })]
        } else {
            Vec::new()
        };

        ClaudeRequest {
            model: self.model.clone(),
            max_tokens: options.max_tokens,
            temperature: options.temperature,
            messages: vec![Message {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
            tools,
        }
    }
}

fn is_retryable(status: u16) -> bool {
    status == 429 || status == 529
}

fn finish_reason(stop_reason: Option<&str>) -> FinishReason {
    match stop_reason {
        Some("end_turn") | Some("stop_sequence") => FinishReason::Stop,
        Some("max_tokens") => FinishReason::MaxTokens,
        Some("refusal") => FinishReason::Safety,
        _ => FinishReason::Other,
    }
}

impl ClaudeResponse {
    fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|c| match c {
                Content::Text { text, .. } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }

    /// Every page the search tool returned, in order, without repeats
    fn search_results(&self) -> Vec<SearchHit> {
        let mut seen = HashSet::new();
        let mut hits = Vec::new();
        for content in &self.content {
            if let Content::WebSearchToolResult { content } = content {
                let results: Vec<WebSearchResult> =
                    serde_json::from_value(content.clone()).unwrap_or_default();
                for result in results {
                    if seen.insert(result.url.clone()) {
                        hits.push(SearchHit {
                            title: result.title,
                            url: result.url,
                            snippet: String::new(),
                        });
                    }
                }
            }
        }
        hits
    }

    /// Sources the answer text actually cites
    fn citations(&self) -> Vec<SearchHit> {
        let mut seen = HashSet::new();
        let mut hits = Vec::new();
        for content in &self.content {
            if let Content::Text { citations, .. } = content {
                for citation in citations {
                    let Some(url) = citation.url.clone() else {
                        continue;
                    };
                    if seen.insert(url.clone()) {
                        hits.push(SearchHit {
                            title: citation.title.clone().unwrap_or_default(),
                            url,
                            snippet: citation.cited_text.clone().unwrap_or_default(),
                        });
                    }
                }
            }
        }
        hits
    }
}

#[async_trait]
impl CompletionService for ClaudeClient {
    async fn complete(&self, prompt: &str, options: CompletionOptions) -> Result<Completion> {
        let response = self.send(&self.request(prompt, options, false)).await?;
        let text = response.text();
        if text.trim().is_empty() {
            return Err(ClientError::Empty("Claude completion").into());
        }

        Ok(Completion {
            text,
            finish_reason: finish_reason(response.stop_reason.as_deref()),
        })
    }
}

#[async_trait]
impl SearchService for ClaudeClient {
    async fn search(&self, query: &str) -> Result<Vec<SearchHit>> {
        let prompt = format!(
            r#"Search the web for recent news articles about: {}

Return ONLY a JSON array of the articles you found, newest first, in this format:
[
  {{"title": "Article headline", "url": "https://...", "snippet": "One or two sentence description"}}
]

Only include URLs that appeared in your search results."#,
            query
        );

        let options = CompletionOptions {
            temperature: 0.0,
            max_tokens: 4096,
        };
        let response = self.send(&self.request(&prompt, options, true)).await?;
        let grounded = response.search_results();

        match parse_hits(&response.text()) {
            Ok(hits) => {
                let allowed: HashSet<&str> = grounded.iter().map(|h| h.url.as_str()).collect();
                Ok(hits
                    .into_iter()
                    .filter(|h| allowed.is_empty() || allowed.contains(h.url.as_str()))
                    .collect())
            }
            Err(e) => {
                warn!(query, error = %e, "Search answer was not JSON, using raw results");
                Ok(grounded)
            }
        }
    }

    async fn research(&self, prompt: &str) -> Result<GroundedAnswer> {
        let options = CompletionOptions {
            temperature: 0.2,
            max_tokens: 4096,
        };
        let response = self.send(&self.request(prompt, options, true)).await?;

        let mut citations = response.citations();
        if citations.is_empty() {
            citations = response.search_results();
        }

        Ok(GroundedAnswer {
            text: response.text(),
            citations,
        })
    }
}

/// Slice out the outermost JSON value of the given kind from a chatty answer.
pub fn extract_json(text: &str, open: char, close: char) -> &str {
    match (text.find(open), text.rfind(close)) {
        (Some(start), Some(end)) if end > start => &text[start..=end],
        _ => text,
    }
}

fn parse_hits(text: &str) -> Result<Vec<SearchHit>> {
    serde_json::from_str(extract_json(text, '[', ']')).context("Failed to parse search results JSON")
}
