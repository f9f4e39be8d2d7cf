use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use scraper::{Html, Selector};
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};
use url::Url;

use crate::llm::{extract_json, CompletionOptions, CompletionService};
use crate::models::{FactCheckStatus, Lead};

const MAX_ARTICLE_CHARS: usize = 8000;
const MAX_OUTBOUND_LINKS: usize = 40;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedPage {
    pub status: u16,
    pub final_url: String,
    pub html: Option<String>,
}

impl FetchedPage {
    pub fn is_live(&self) -> bool {
        (200..400).contains(&self.status)
    }
}

#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<FetchedPage>;
}

pub struct HttpPageFetcher {
    client: Client,
}

impl HttpPageFetcher {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(20))
            .user_agent("Mozilla/5.0 (compatible; NewsletterDesk/1.0)")
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { client })
    }
}

#[async_trait]
impl PageFetcher for HttpPageFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedPage> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .context("Failed to send HTTP request")?;

        let status = response.status();
        let final_url = response.url().to_string();
        let html = if status.is_success() {
            Some(response.text().await.context("Failed to read response body")?)
        } else {
            None
        };

        Ok(FetchedPage {
            status: status.as_u16(),
            final_url,
            html,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FactCheckReport {
    pub status: FactCheckStatus,
    pub primary_source_url: Option<String>,
    pub note: String,
    /// Set when the page is live but the primary-source lookup itself failed
    pub lookup_error: Option<String>,
}

#[derive(Deserialize)]
struct PrimarySourceAnswer {
    #[serde(default, rename = "primarySourceUrl")]
    primary_source_url: Option<String>,
    #[serde(default)]
    note: String,
}

pub struct FactChecker {
    fetcher: Arc<dyn PageFetcher>,
    llm: Arc<dyn CompletionService>,
}

impl FactChecker {
    pub fn new(fetcher: Arc<dyn PageFetcher>, llm: Arc<dyn CompletionService>) -> Self {
        Self { fetcher, llm }
    }

    /// Probe the story URL, then ask the model which outbound link is the
    /// primary source. Only a failed probe is an error; a failed lookup still
    /// yields a `Live` report, with `lookup_error` set.
    pub async fn check(&self, lead: &Lead) -> Result<FactCheckReport> {
        let page = self
            .fetcher
            .fetch(&lead.url)
            .await
            .with_context(|| format!("Liveness probe failed for {}", lead.url))?;

        if !page.is_live() {
            return Ok(FactCheckReport {
                status: FactCheckStatus::Unreachable,
                primary_source_url: None,
                note: format!("Story URL returned HTTP {}", page.status),
                lookup_error: None,
            });
        }

        let Some(html) = page.html.as_deref() else {
            return Ok(live(format!("Story URL is live (HTTP {})", page.status)));
        };

        let links = outbound_links(html, &page.final_url);
        if links.is_empty() {
            return Ok(live("No outbound links to check for a primary source".to_string()));
        }

        match self.find_primary_source(lead, html, &links).await {
            Ok(Some((url, note))) => Ok(FactCheckReport {
                status: FactCheckStatus::Verified,
                primary_source_url: Some(url),
                note,
                lookup_error: None,
            }),
            Ok(None) => Ok(live("No primary source identified".to_string())),
            Err(e) => {
                warn!(url = %lead.url, error = %e, "Primary source lookup failed");
                let note = format!("Primary source lookup failed: {:#}", e);
                Ok(FactCheckReport {
                    lookup_error: Some(note.clone()),
                    ..live(note)
                })
            }
        }
    }

    async fn find_primary_source(
        &self,
        lead: &Lead,
        html: &str,
        links: &[String],
    ) -> Result<Option<(String, String)>> {
        let text = html2text::from_read(html.as_bytes(), 100);
        let article = truncate_chars(&text, MAX_ARTICLE_CHARS);
        let link_list = links
            .iter()
            .enumerate()
            .map(|(i, l)| format!("{}. {}", i + 1, l))
            .collect::<Vec<_>>()
            .join("\n");

        let prompt = format!(
            r#"You are a fact-checker. Identify the primary source for this news story: the original announcement, paper, filing, dataset or official statement the article reports on.

Story title: {}

Article text:
{}

Outbound links found in the article:
{}

Pick the primary source ONLY from the links above. If none of them is a primary source, use null.

Respond with JSON only:
{{"primarySourceUrl": "https://..." or null, "note": "One sentence on what the source is"}}"#,
            lead.title, article, link_list
        );

        let completion = self
            .llm
            .complete(
                &prompt,
                CompletionOptions {
                    temperature: 0.0,
                    max_tokens: 300,
                },
            )
            .await?;

        let answer: PrimarySourceAnswer =
            serde_json::from_str(extract_json(&completion.text, '{', '}'))
                .context("Failed to parse primary source JSON")?;

        // Never trust a URL the article did not actually link to
        Ok(answer
            .primary_source_url
            .filter(|url| links.iter().any(|l| l == url))
            .map(|url| (url, answer.note)))
    }
}

fn live(note: String) -> FactCheckReport {
    FactCheckReport {
        status: FactCheckStatus::Live,
        primary_source_url: None,
        note,
        lookup_error: None,
    }
}

fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Absolute links to other hosts, in document order, without repeats.
pub fn outbound_links(html: &str, page_url: &str) -> Vec<String> {
    let Ok(base) = Url::parse(page_url) else {
        return Vec::new();
    };
    let Ok(selector) = Selector::parse("a[href]") else {
        return Vec::new();
    };

    let own_host = base.host_str().map(|h| h.trim_start_matches("www.").to_string());
    let document = Html::parse_document(html);
    let mut seen = HashSet::new();
    let mut links = Vec::new();

    for element in document.select(&selector) {
        let Some(href) = element.value().attr("href") else {
            continue;
        };
        let Ok(mut url) = base.join(href) else {
            continue;
        };
        if !matches!(url.scheme(), "http" | "https") {
            continue;
        }
        let host = url.host_str().map(|h| h.trim_start_matches("www.").to_string());
        if host.is_none() || host == own_host {
            continue;
        }
        url.set_fragment(None);
        let url = url.to_string();
        if seen.insert(url.clone()) {
            links.push(url);
        }
        if links.len() >= MAX_OUTBOUND_LINKS {
            break;
        }
    }

    debug!(page = page_url, count = links.len(), "Collected outbound links");
    links
}
