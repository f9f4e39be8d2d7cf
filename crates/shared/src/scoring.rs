use anyhow::{Context, Result};
use futures::stream::{self, StreamExt};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::llm::{extract_json, CompletionOptions, CompletionService};
use crate::models::{Candidate, ScoredCandidate};

/// Lowest relevance score that gets persisted as a lead
pub const MIN_LEAD_SCORE: u8 = 70;

const SCORING_CONCURRENCY: usize = 2;

static ROUNDUP_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    const MONTHS: &str = "january|february|march|april|may|june|july|august|september|october|november|december";
    [
        r"(?i)\b(daily|weekly|monthly)\s+(round-?up|recap|digest|wrap-?up|briefing)\b".to_string(),
        r"(?i)\b(round-?up|digest|recap|wrap-?up|week in review)\b".to_string(),
        r"(?i)\bthis week in\b".to_string(),
        r"(?i)\btop\s+\d+\b".to_string(),
        r"(?i)^\s*\d+\s+(best|biggest|top|things|ways|stories|tools|trends|takeaways)\b".to_string(),
        r"(?i)\beverything\s+(announced|we know|you need to know)\b".to_string(),
        r"(?i)\bwhat you missed\b".to_string(),
        format!(r"(?i)\b({})\s+\d{{4}}\b.*\b(news|updates|edition|highlights|recap)\b", MONTHS),
        format!(r"(?i)\b(news|updates|edition|highlights|recap)\b.*\b({})\s+\d{{4}}\b", MONTHS),
    ]
    .iter()
    .map(|p| Regex::new(p).expect("roundup pattern must compile"))
    .collect()
});

/// Cheap first-pass filter run before paying for a scoring call.
pub fn is_roundup_by_title(title: &str) -> bool {
    ROUNDUP_PATTERNS.iter().any(|re| re.is_match(title))
}

pub fn meets_lead_threshold(score: u8) -> bool {
    score >= MIN_LEAD_SCORE
}

/// Keep only candidates good enough to become leads
pub fn select_leads(scored: Vec<ScoredCandidate>) -> Vec<ScoredCandidate> {
    scored
        .into_iter()
        .filter(|s| !s.is_roundup && meets_lead_threshold(s.relevance_score))
        .collect()
}

#[derive(Deserialize)]
struct Judgement {
    score: f64,
    #[serde(default)]
    summary: String,
    #[serde(default, rename = "isRoundup")]
    is_roundup: bool,
}

pub struct LeadScorer {
    llm: Arc<dyn CompletionService>,
}

impl LeadScorer {
    pub fn new(llm: Arc<dyn CompletionService>) -> Self {
        Self { llm }
    }

    /// Judge every candidate; failures and roundups are dropped, the rest come
    /// back sorted by score, highest first.
    pub async fn score_and_summarize(&self, candidates: Vec<Candidate>) -> Vec<ScoredCandidate> {
        let mut scored: Vec<ScoredCandidate> = stream::iter(candidates)
            .map(|candidate| async move {
                match self.score_one(&candidate).await {
                    Ok(result) => Some(result),
                    Err(e) => {
                        warn!(url = %candidate.url, error = %e, "Scoring failed, skipping candidate");
                        None
                    }
                }
            })
            .buffer_unordered(SCORING_CONCURRENCY)
            .filter_map(|result| async move { result })
            .filter(|s| {
                let keep = !s.is_roundup;
                if !keep {
                    debug!(url = %s.candidate.url, score = s.relevance_score, "Judge flagged roundup");
                }
                async move { keep }
            })
            .collect()
            .await;

        scored.sort_by(|a, b| b.relevance_score.cmp(&a.relevance_score));
        scored
    }

    async fn score_one(&self, candidate: &Candidate) -> Result<ScoredCandidate> {
        let prompt = format!(
            r#"You are the editor of a weekly AI newsletter deciding which stories deserve a full write-up.

Score this story from 0 to 100 using this rubric:
- 80-100: a single, specific story with a clear narrative (a launch, a deal, a ruling, a study) from a major company, lab, government or researcher
- 41-79: relevant but thin, incremental, or from a minor actor
- 0-40: listicles, roundups, opinion pieces without news, or stale news

If the article covers several unrelated stories (a digest, roundup, newsletter issue, "this week in" recap), set "isRoundup" to true no matter how good the individual items are.

Title: {}
Source: {}
URL: {}
Snippet: {}

Respond with JSON only:
{{"score": 85, "summary": "Two sentence neutral summary of the story.", "isRoundup": false}}"#,
            candidate.title, candidate.source, candidate.url, candidate.snippet
        );

        let completion = self
            .llm
            .complete(
                &prompt,
                CompletionOptions {
                    temperature: 0.0,
                    max_tokens: 400,
                },
            )
            .await?;

        let judgement: Judgement = serde_json::from_str(extract_json(&completion.text, '{', '}'))
            .context("Failed to parse scoring JSON")?;

        Ok(ScoredCandidate {
            candidate: candidate.clone(),
            summary: judgement.summary.trim().to_string(),
            relevance_score: judgement.score.round().clamp(0.0, 100.0) as u8,
            is_roundup: judgement.is_roundup,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{Completion, FinishReason};
    use async_trait::async_trait;

    /// Answers based on a marker in the prompt
    struct RubricJudge;

    #[async_trait]
    impl CompletionService for RubricJudge {
        async fn complete(&self, prompt: &str, _options: CompletionOptions) -> Result<Completion> {
            let text = if prompt.contains("Title: Broken") {
                "not json at all".to_string()
            } else if prompt.contains("Title: Digest") {
                r#"{"score": 95, "summary": "Many things.", "isRoundup": true}"#.to_string()
            } else if prompt.contains("Title: Strong") {
                r#"Sure! {"score": 88, "summary": "A launch.", "isRoundup": false}"#.to_string()
            } else {
                r#"{"score": 55.4, "summary": "Minor.", "isRoundup": false}"#.to_string()
            };
            Ok(Completion {
                text,
                finish_reason: FinishReason::Stop,
            })
        }
    }

    fn candidate(title: &str) -> Candidate {
        Candidate {
            title: title.to_string(),
            url: format!("https://news.example.com/{}", title.to_lowercase()),
            snippet: String::new(),
            source: "Example".to_string(),
        }
    }

    fn scored(score: u8) -> ScoredCandidate {
        ScoredCandidate {
            candidate: candidate("Any"),
            summary: String::new(),
            relevance_score: score,
            is_roundup: false,
        }
    }

    #[test]
    fn test_roundup_titles_are_caught() {
        assert!(is_roundup_by_title("AI Weekly Roundup: agents, chips and more"));
        assert!(is_roundup_by_title("Top 10 AI tools you should try"));
        assert!(is_roundup_by_title("7 biggest announcements from the keynote"));
        assert!(is_roundup_by_title("This Week in AI: funding frenzy"));
        assert!(is_roundup_by_title("March 2025 AI news highlights"));
        assert!(is_roundup_by_title("AI updates for October 2024"));
        assert!(is_roundup_by_title("Everything announced at the developer conference"));
    }

    #[test]
    fn test_single_story_titles_pass() {
        assert!(!is_roundup_by_title("OpenAI signs chip deal with Broadcom"));
        assert!(!is_roundup_by_title("EU fines Meta over data transfers"));
        assert!(!is_roundup_by_title("Researchers publish 2025 benchmark results"));
    }

    #[test]
    fn test_threshold_boundary() {
        assert!(!meets_lead_threshold(69));
        assert!(meets_lead_threshold(70));

        let kept = select_leads(vec![scored(69), scored(70), scored(100)]);
        let scores: Vec<u8> = kept.iter().map(|s| s.relevance_score).collect();
        assert_eq!(scores, vec![70, 100]);
    }

    #[tokio::test]
    async fn test_score_and_summarize_drops_failures_and_roundups() {
        let scorer = LeadScorer::new(Arc::new(RubricJudge));
        let results = scorer
            .score_and_summarize(vec![
                candidate("Minor"),
                candidate("Broken"),
                candidate("Strong"),
                candidate("Digest"),
            ])
            .await;

        let titles: Vec<&str> = results.iter().map(|s| s.candidate.title.as_str()).collect();
        assert_eq!(titles, vec!["Strong", "Minor"]);
        assert_eq!(results[0].relevance_score, 88);
        assert_eq!(results[1].relevance_score, 55);
        assert_eq!(results[0].summary, "A launch.");
    }
}
