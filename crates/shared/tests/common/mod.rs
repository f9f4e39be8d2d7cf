#![allow(dead_code)]

use anyhow::Result;
use async_trait::async_trait;
use shared::factcheck::FetchedPage;
use shared::illustration::GeneratedImage;
use shared::llm::{Completion, CompletionOptions, FinishReason, GroundedAnswer, SearchHit};
use shared::models::NewLead;
use shared::publisher::PublishRequest;
use shared::{
    CompletionService, DocumentPublisher, EmbeddingService, IllustrationService, Lead,
    PageFetcher, SearchService, SqliteStore, Store,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Routes prompts to canned replies by the role the prompt opens with
pub struct ScriptedLlm {
    pub draft_replies: Vec<String>,
    pub fix_reply: String,
    pub fact_check_reply: String,
    pub draft_calls: AtomicUsize,
    pub fix_calls: AtomicUsize,
    pub rewrite_calls: AtomicUsize,
}

impl ScriptedLlm {
    pub fn new(draft: String) -> Self {
        Self {
            draft_replies: vec![draft],
            fix_reply: "```markdown\n## Still: broken\n\nSee https://bad.example.com\n```".to_string(),
            fact_check_reply: r#"{"primarySourceUrl": null, "note": "No primary source"}"#.to_string(),
            draft_calls: AtomicUsize::new(0),
            fix_calls: AtomicUsize::new(0),
            rewrite_calls: AtomicUsize::new(0),
        }
    }

    pub fn draft_calls(&self) -> usize {
        self.draft_calls.load(Ordering::SeqCst)
    }

    pub fn fix_calls(&self) -> usize {
        self.fix_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CompletionService for ScriptedLlm {
    async fn complete(&self, prompt: &str, _options: CompletionOptions) -> Result<Completion> {
        let text = if prompt.starts_with("You are writing issue") {
            let n = self.draft_calls.fetch_add(1, Ordering::SeqCst);
            self.draft_replies[n.min(self.draft_replies.len() - 1)].clone()
        } else if prompt.starts_with("You are a copy editor") {
            self.fix_calls.fetch_add(1, Ordering::SeqCst);
            self.fix_reply.clone()
        } else if prompt.starts_with("You are a fact-checker") {
            self.fact_check_reply.clone()
        } else if prompt.starts_with("You are the editor") {
            if prompt.contains("Title: Strong") {
                r#"{"score": 91, "summary": "A single clear story.", "isRoundup": false}"#
            } else {
                r#"{"score": 40, "summary": "Thin.", "isRoundup": false}"#
            }
            .to_string()
        } else {
            self.rewrite_calls.fetch_add(1, Ordering::SeqCst);
            story_body(350, "https://news.example.com/main")
        };

        Ok(Completion {
            text,
            finish_reason: FinishReason::Stop,
        })
    }
}

pub struct CannedSearch {
    pub hits: Vec<SearchHit>,
}

impl CannedSearch {
    pub fn empty() -> Self {
        Self { hits: Vec::new() }
    }
}

#[async_trait]
impl SearchService for CannedSearch {
    async fn search(&self, _query: &str) -> Result<Vec<SearchHit>> {
        Ok(self.hits.clone())
    }

    async fn research(&self, _prompt: &str) -> Result<GroundedAnswer> {
        Ok(GroundedAnswer {
            text: "Key facts and background.".to_string(),
            citations: vec![SearchHit {
                title: "Background".to_string(),
                url: "https://background.example.org/report".to_string(),
                snippet: String::new(),
            }],
        })
    }
}

/// Every call gets its own orthogonal vector, so nothing is a semantic match
pub struct OrthogonalEmbedder {
    next: AtomicUsize,
}

impl OrthogonalEmbedder {
    pub const DIMS: usize = 64;

    pub fn new() -> Self {
        Self {
            next: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl EmbeddingService for OrthogonalEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        let idx = self.next.fetch_add(1, Ordering::SeqCst) % Self::DIMS;
        let mut v = vec![0.0; Self::DIMS];
        v[idx] = 1.0;
        Ok(v)
    }
}

pub struct LivePage;

#[async_trait]
impl PageFetcher for LivePage {
    async fn fetch(&self, url: &str) -> Result<FetchedPage> {
        Ok(FetchedPage {
            status: 200,
            final_url: url.to_string(),
            html: Some("<html><body><p>Story text without links.</p></body></html>".to_string()),
        })
    }
}

/// Live page that links out to another site
pub struct LinkedPage;

#[async_trait]
impl PageFetcher for LinkedPage {
    async fn fetch(&self, url: &str) -> Result<FetchedPage> {
        Ok(FetchedPage {
            status: 200,
            final_url: url.to_string(),
            html: Some(
                r#"<html><body><p>See <a href="https://lab.example.org/paper">the paper</a>.</p></body></html>"#
                    .to_string(),
            ),
        })
    }
}

pub struct BrokenIllustrator;

#[async_trait]
impl IllustrationService for BrokenIllustrator {
    async fn illustrate(&self, _prompt: &str) -> Result<GeneratedImage> {
        anyhow::bail!("image service down")
    }
}

#[derive(Default)]
pub struct RecordingPublisher {
    pub requests: Mutex<Vec<PublishRequest>>,
    pub fail: bool,
}

impl RecordingPublisher {
    pub fn failing() -> Self {
        Self {
            requests: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl DocumentPublisher for RecordingPublisher {
    async fn publish(&self, request: &PublishRequest) -> Result<String> {
        if self.fail {
            anyhow::bail!("document service returned 503");
        }
        let mut requests = self.requests.lock().unwrap();
        requests.push(request.clone());
        Ok(format!("https://docs.example.com/d/{}", requests.len()))
    }
}

pub fn memory_store() -> Arc<SqliteStore> {
    Arc::new(SqliteStore::open_in_memory().unwrap())
}

pub fn insert_lead(store: &dyn Store, title: &str, url: &str) -> Lead {
    store
        .insert_lead(&NewLead {
            title: title.to_string(),
            source: "news.example.com".to_string(),
            url: url.to_string(),
            summary: format!("Summary of {}", title),
            relevance_score: 90,
            embedding: vec![],
            is_manual: false,
        })
        .unwrap()
}

/// A story body of exactly `words` words that links `url` once
pub fn story_body(words: usize, url: &str) -> String {
    let filler: Vec<String> = (0..words - 3).map(|i| format!("word{}", i)).collect();
    format!("The [lab announcement]({}) {}.", url, filler.join(" "))
}

/// Complete, compliant issue with only a main story
pub fn main_only_draft(main_url: &str) -> String {
    format!(
        "```markdown\nSubject: A quiet but important week\n\n## 📰 The Big Story\n\n{}\n\n## 📚 Sources\n\n- [Original announcement]({})\n```",
        story_body(350, main_url),
        main_url
    )
}

pub fn hit(title: &str, url: &str) -> SearchHit {
    SearchHit {
        title: title.to_string(),
        url: url.to_string(),
        snippet: String::new(),
    }
}
