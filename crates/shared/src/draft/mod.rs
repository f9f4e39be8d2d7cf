//! Research, write and shape one newsletter issue.
//!
//! A run moves through fixed phases: research fans out one grounded query per
//! selected item, drafting retries up to [`MAX_RETRIES`] times keeping the best
//! attempt, and the word-count pass rewrites story sections that fall outside
//! their range. Research errors are fatal, and so is a completion error before
//! any attempt has produced a draft.

pub mod checks;
pub mod prompts;
pub mod research;
pub mod sections;
pub mod wordcount;

use anyhow::Result;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

use crate::llm::{CompletionOptions, CompletionService, SearchService};
use crate::markdown::parse;
use crate::retry::{retry, RetryPolicy, Verdict};

pub use research::{ContentPlan, ResearchBundle, SlotCategory, UrlBank};
pub use sections::{SectionKind, DIGEST_ITEMS, STORY_MAX_WORDS, STORY_MIN_WORDS};

/// Total generation attempts, including the first
pub const MAX_RETRIES: u32 = 3;

const BASE_TEMPERATURE: f32 = 0.7;
const TEMPERATURE_STEP: f32 = 0.1;
const DRAFT_MAX_TOKENS: u32 = 8000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DraftPhase {
    Researching,
    Drafting { attempt: u32 },
    Validating { attempt: u32 },
    Rewriting,
    Done,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DraftResult {
    pub markdown: String,
    pub warnings: Vec<String>,
    pub attempts: u32,
    pub phases: Vec<DraftPhase>,
    pub url_bank: UrlBank,
}

/// One generated draft and what is wrong with it
#[derive(Debug, Clone, Default)]
struct Attempt {
    markdown: String,
    issues: Vec<String>,
}

impl Attempt {
    fn better_than(&self, other: &Option<Attempt>) -> bool {
        match other {
            Some(other) => self.issues.len() <= other.issues.len(),
            None => true,
        }
    }
}

/// Sampling temperature for a 1-based attempt number
pub fn attempt_temperature(attempt: u32) -> f32 {
    BASE_TEMPERATURE + TEMPERATURE_STEP * attempt.saturating_sub(1) as f32
}

pub struct DraftGenerator {
    llm: Arc<dyn CompletionService>,
    search: Arc<dyn SearchService>,
}

impl DraftGenerator {
    pub fn new(llm: Arc<dyn CompletionService>, search: Arc<dyn SearchService>) -> Self {
        Self { llm, search }
    }

    pub async fn generate(&self, plan: &ContentPlan) -> Result<DraftResult> {
        let phases = Mutex::new(Vec::new());
        let failures = Mutex::new(Vec::new());
        let enter = |phase: DraftPhase| {
            info!(?phase, issue = plan.issue_number, "Draft phase");
            if let Ok(mut log) = phases.lock() {
                log.push(phase);
            }
        };

        enter(DraftPhase::Researching);
        let bundle = research::research(self.search.as_ref(), plan).await?;

        let sections = plan.required_sections();
        let outcome = retry(
            RetryPolicy::attempts(MAX_RETRIES),
            None::<Attempt>,
            |attempt, best| {
                let bundle = &bundle;
                let sections = &sections;
                let enter = &enter;
                let failures = &failures;
                async move {
                    enter(DraftPhase::Drafting { attempt });
                    let feedback = best.as_ref().map(|b| b.issues.clone()).unwrap_or_default();
                    let prompt = prompts::generation_prompt(plan, bundle, sections, &feedback);
                    let completion = match self
                        .llm
                        .complete(
                            &prompt,
                            CompletionOptions {
                                temperature: attempt_temperature(attempt),
                                max_tokens: DRAFT_MAX_TOKENS,
                            },
                        )
                        .await
                    {
                        Ok(completion) => completion,
                        Err(e) if best.is_some() => {
                            warn!(attempt, error = %e, "Draft attempt failed, keeping earlier draft");
                            if let Ok(mut log) = failures.lock() {
                                log.push(format!("Draft attempt {} failed: {:#}", attempt, e));
                            }
                            return Ok(Verdict::Retry(best));
                        }
                        Err(e) => return Err(e),
                    };

                    enter(DraftPhase::Validating { attempt });
                    let markdown = checks::extract_markdown(&completion.text);
                    let mut issues = checks::check_completeness(&markdown, sections);
                    if completion.is_truncated() {
                        issues.push("Response hit the token limit".to_string());
                    }
                    if sections.contains(&SectionKind::QuickHits) {
                        issues.extend(checks::check_digest(&markdown));
                    }

                    let current = Attempt { markdown, issues };
                    if current.issues.is_empty() {
                        return Ok(Verdict::Accept(Some(current)));
                    }
                    warn!(attempt, issues = ?current.issues, "Draft attempt incomplete");
                    if current.better_than(&best) {
                        Ok(Verdict::Retry(Some(current)))
                    } else {
                        Ok(Verdict::Retry(best))
                    }
                }
            },
        )
        .await?;

        let attempts = outcome.attempts;
        let best = outcome.state.unwrap_or_default();
        let mut warnings: Vec<String> = failures.into_inner().unwrap_or_default();
        if !outcome.converged {
            warn!(attempts, "Using best incomplete draft");
            warnings.extend(
                best.issues
                    .iter()
                    .map(|issue| format!("Draft incomplete after {} attempts: {}", attempts, issue)),
            );
        }

        enter(DraftPhase::Rewriting);
        let (markdown, rewrite_warnings) =
            wordcount::enforce_word_counts(self.llm.as_ref(), best.markdown, &sections).await;
        warnings.extend(rewrite_warnings);
        warnings.extend(audit_links(&markdown, &bundle.bank));

        enter(DraftPhase::Done);
        let phases = phases.into_inner().unwrap_or_default();
        info!(attempts, warnings = warnings.len(), "Draft ready");

        Ok(DraftResult {
            markdown,
            warnings,
            attempts,
            phases,
            url_bank: bundle.bank,
        })
    }
}

/// Links that did not come out of research. Reported, never rejected.
pub fn audit_links(markdown: &str, bank: &UrlBank) -> Vec<String> {
    let mut seen = Vec::new();
    parse(markdown)
        .links()
        .into_iter()
        .filter(|link| !bank.contains(&link.url))
        .filter_map(|link| {
            if seen.contains(&link.url) {
                None
            } else {
                seen.push(link.url.clone());
                Some(format!("Link not found in research URL bank: {}", link.url))
            }
        })
        .collect()
}
