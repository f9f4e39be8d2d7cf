use anyhow::Result;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};
use url::Url;

use crate::dedup::DedupEngine;
use crate::llm::{SearchHit, SearchService};
use crate::models::{Candidate, Lead, NewLead};
use crate::scoring::{is_roundup_by_title, select_leads, LeadScorer};
use crate::store::Store;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoveryReport {
    pub searched: usize,
    pub candidates: usize,
    pub roundups_skipped: usize,
    pub duplicates_skipped: usize,
    pub scored: usize,
    pub persisted: Vec<i64>,
    /// True when a run was already in progress and this call did nothing
    pub skipped: bool,
}

pub struct Discovery {
    search: Arc<dyn SearchService>,
    dedup: DedupEngine,
    scorer: LeadScorer,
    store: Arc<dyn Store>,
    running: AtomicBool,
}

/// Clears the running flag however the run ends
struct RunGuard<'a>(&'a AtomicBool);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl Discovery {
    pub fn new(
        search: Arc<dyn SearchService>,
        dedup: DedupEngine,
        scorer: LeadScorer,
        store: Arc<dyn Store>,
    ) -> Self {
        Self {
            search,
            dedup,
            scorer,
            store,
            running: AtomicBool::new(false),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// One discovery pass: search, filter, dedup, score, persist.
    pub async fn run(&self, queries: &[String]) -> Result<DiscoveryReport> {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Discovery already running, skipping overlapping run");
            return Ok(DiscoveryReport {
                skipped: true,
                ..Default::default()
            });
        }
        let _guard = RunGuard(&self.running);

        let mut report = DiscoveryReport::default();
        let mut seen_urls = HashSet::new();
        let mut candidates = Vec::new();

        for query in queries {
            report.searched += 1;
            let hits = match self.search.search(query).await {
                Ok(hits) => hits,
                Err(e) => {
                    warn!(query = %query, error = %e, "Search failed");
                    continue;
                }
            };
            for hit in hits {
                if seen_urls.insert(hit.url.clone()) {
                    candidates.push(candidate_from_hit(hit));
                }
            }
        }
        report.candidates = candidates.len();

        let mut fresh = Vec::new();
        let mut embeddings: HashMap<String, Vec<f32>> = HashMap::new();
        for candidate in candidates {
            if is_roundup_by_title(&candidate.title) {
                report.roundups_skipped += 1;
                continue;
            }
            let check = self.dedup.check_duplicate(&candidate.url, &candidate.title).await;
            if check.is_duplicate {
                report.duplicates_skipped += 1;
                continue;
            }
            if let Some(embedding) = check.embedding {
                embeddings.insert(candidate.url.clone(), embedding);
            }
            fresh.push(candidate);
        }

        let scored = self.scorer.score_and_summarize(fresh).await;
        report.scored = scored.len();

        for lead in select_leads(scored) {
            let embedding = embeddings.remove(&lead.candidate.url).unwrap_or_default();
            match self.persist(&NewLead::from_scored(&lead, embedding)) {
                Ok(saved) => report.persisted.push(saved.id),
                Err(e) => warn!(url = %lead.candidate.url, error = %e, "Failed to persist lead"),
            }
        }

        info!(
            candidates = report.candidates,
            roundups = report.roundups_skipped,
            duplicates = report.duplicates_skipped,
            scored = report.scored,
            persisted = report.persisted.len(),
            "Discovery run finished"
        );
        Ok(report)
    }

    /// Add an editor-supplied story, bypassing the relevance judge.
    pub async fn add_manual(&self, title: &str, url: &str, summary: &str) -> Result<Option<Lead>> {
        let check = self.dedup.check_duplicate(url, title).await;
        if check.is_duplicate {
            return Ok(None);
        }

        let embedding = match check.embedding {
            Some(embedding) => embedding,
            None => self.dedup.embed_title(title).await.unwrap_or_default(),
        };

        let lead = NewLead {
            title: title.to_string(),
            source: source_name(url),
            url: url.to_string(),
            summary: summary.to_string(),
            relevance_score: 100,
            embedding,
            is_manual: true,
        };
        self.persist(&lead).map(Some)
    }

    fn persist(&self, lead: &NewLead) -> Result<Lead> {
        self.store.insert_lead_with_history(lead)
    }
}

fn candidate_from_hit(hit: SearchHit) -> Candidate {
    Candidate {
        source: source_name(&hit.url),
        title: hit.title,
        url: hit.url,
        snippet: hit.snippet,
    }
}

/// Publication name guess from the URL host
pub fn source_name(url: &str) -> String {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.trim_start_matches("www.").to_string()))
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_name_strips_www() {
        assert_eq!(source_name("https://www.theverge.com/a/b"), "theverge.com");
        assert_eq!(source_name("not a url"), "unknown");
    }

    #[test]
    fn test_run_guard_clears_flag() {
        let flag = AtomicBool::new(true);
        {
            let _guard = RunGuard(&flag);
        }
        assert!(!flag.load(Ordering::SeqCst));
    }
}
