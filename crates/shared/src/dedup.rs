use anyhow::Result;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::embedding::{cosine_similarity, EmbeddingService};
use crate::store::Store;

/// Titles closer than this to something already covered count as duplicates
pub const SEMANTIC_DUPLICATE_THRESHOLD: f64 = 0.85;

#[derive(Debug, Clone, PartialEq)]
pub enum MatchType {
    ExactUrl,
    Semantic { url: String, similarity: f64 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct DuplicateCheck {
    pub is_duplicate: bool,
    pub match_type: Option<MatchType>,
    /// Title embedding computed on the semantic path, kept so the caller
    /// does not pay for it twice when the lead is stored
    pub embedding: Option<Vec<f32>>,
}

impl DuplicateCheck {
    fn unique(embedding: Option<Vec<f32>>) -> Self {
        Self {
            is_duplicate: false,
            match_type: None,
            embedding,
        }
    }
}

pub struct DedupEngine {
    store: Arc<dyn Store>,
    embedder: Arc<dyn EmbeddingService>,
    threshold: f64,
}

impl DedupEngine {
    pub fn new(store: Arc<dyn Store>, embedder: Arc<dyn EmbeddingService>) -> Self {
        Self {
            store,
            embedder,
            threshold: SEMANTIC_DUPLICATE_THRESHOLD,
        }
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    /// Exact URL lookup first, then title-embedding similarity against history.
    /// Fails open: an internal error reports "not a duplicate".
    pub async fn check_duplicate(&self, url: &str, title: &str) -> DuplicateCheck {
        match self.try_check(url, title).await {
            Ok(check) => check,
            Err(e) => {
                warn!(url, error = %e, "Duplicate check failed, treating as new");
                DuplicateCheck::unique(None)
            }
        }
    }

    async fn try_check(&self, url: &str, title: &str) -> Result<DuplicateCheck> {
        if self.store.history_contains_url(url)? {
            debug!(url, "Exact URL duplicate");
            return Ok(DuplicateCheck {
                is_duplicate: true,
                match_type: Some(MatchType::ExactUrl),
                embedding: None,
            });
        }

        let embedding = self.embedder.embed(title).await?;
        let history = self.store.history_entries()?;

        let best = history
            .iter()
            .map(|entry| (entry, cosine_similarity(&embedding, &entry.embedding)))
            .max_by(|a, b| a.1.total_cmp(&b.1));

        if let Some((entry, similarity)) = best {
            if similarity > self.threshold {
                debug!(url, matched = %entry.url, similarity, "Semantic duplicate");
                return Ok(DuplicateCheck {
                    is_duplicate: true,
                    match_type: Some(MatchType::Semantic {
                        url: entry.url.clone(),
                        similarity,
                    }),
                    embedding: Some(embedding),
                });
            }
        }

        Ok(DuplicateCheck::unique(Some(embedding)))
    }

    pub async fn embed_title(&self, title: &str) -> Result<Vec<f32>> {
        self.embedder.embed(title).await
    }
}
