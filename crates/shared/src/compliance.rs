//! Editorial rules every issue must pass before it can be published.
//!
//! [`validate`] is pure and reports every violation it finds. The fix loop
//! hands violations to the model, re-validates, and gives up after
//! [`MAX_FIX_ATTEMPTS`] rounds.

use anyhow::Result;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};
use url::Url;

use crate::draft::checks::{check_completeness, check_digest, extract_markdown};
use crate::draft::SectionKind;
use crate::error::PipelineError;
use crate::llm::{CompletionOptions, CompletionService};
use crate::markdown::{is_emoji, parse, plain_text, starts_with_emoji, word_count, BlockKind, Document};
use crate::models::ValidationResult;
use crate::retry::{retry, RetryPolicy, Verdict};

pub const MAX_FIX_ATTEMPTS: u32 = 3;
pub const MAX_ACCORDING_TO: usize = 2;
pub const MIN_ISSUE_WORDS: usize = 600;
pub const MAX_ISSUE_WORDS: usize = 2200;

const HEADING_PUNCTUATION: &[char] = &['.', ',', ';', ':', '!', '?'];

const GENERIC_ANCHORS: &[&str] = &[
    "click here",
    "here",
    "read more",
    "learn more",
    "more",
    "link",
    "this link",
    "this",
    "this article",
    "source",
];

const TRACKING_PARAMS: &[&str] = &[
    "fbclid", "gclid", "mc_cid", "mc_eid", "ref", "ref_src", "igshid", "si",
];

static BARE_URL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(?:https?://|www\.)[^\s<>()\[\]]+").expect("url pattern must compile"));

static ACCORDING_TO: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\baccording\s+to\b").expect("phrase pattern must compile"));

/// Run every rule and collect all violations.
pub fn validate(markdown: &str) -> ValidationResult {
    let doc = parse(markdown);
    let mut violations = Vec::new();

    check_headings(&doc, &mut violations);
    check_bare_urls(&doc, &mut violations);
    check_emoji_placement(&doc, &mut violations);
    check_anchor_text(&doc, &mut violations);
    check_url_reuse(&doc, &mut violations);
    check_tracking_params(&doc, &mut violations);
    check_attribution_phrases(&doc, &mut violations);

    ValidationResult::from_violations(violations)
}

fn check_headings(doc: &Document, out: &mut Vec<String>) {
    let mut any = false;
    for (_, block) in doc.headings() {
        any = true;
        let text = block.text();
        if text.contains(HEADING_PUNCTUATION) {
            out.push(format!("Heading contains punctuation: \"{}\"", text.trim()));
        }
    }
    if !any {
        out.push("Document has no headings".to_string());
    }
}

fn check_bare_urls(doc: &Document, out: &mut Vec<String>) {
    for block in &doc.blocks {
        for run in block.text_runs() {
            for m in BARE_URL.find_iter(run) {
                out.push(format!("Bare URL in text: {}", m.as_str()));
            }
        }
    }
}

fn check_emoji_placement(doc: &Document, out: &mut Vec<String>) {
    for block in &doc.blocks {
        let text = block.text();
        let misplaced = match block.kind {
            BlockKind::Heading(_) | BlockKind::Code | BlockKind::Blank => false,
            // a bullet may lead with one emoji, nothing after it
            BlockKind::Bullet => {
                let rest = if starts_with_emoji(&text) {
                    text.trim_start().chars().skip(1).collect::<String>()
                } else {
                    text.clone()
                };
                rest.chars().any(is_emoji)
            }
            BlockKind::Paragraph => text.chars().any(is_emoji),
        };
        if misplaced {
            out.push(format!("Emoji outside headings and bullet markers: \"{}\"", snippet(&text)));
        }
    }
}

fn check_anchor_text(doc: &Document, out: &mut Vec<String>) {
    for link in doc.links() {
        let anchor = link
            .text
            .trim()
            .trim_matches(|c: char| c.is_ascii_punctuation())
            .to_lowercase();
        if GENERIC_ANCHORS.contains(&anchor.as_str()) {
            out.push(format!("Generic anchor text \"{}\" for {}", link.text.trim(), link.url));
        }
    }
}

/// URLs may repeat in the Sources list, nowhere else.
fn check_url_reuse(doc: &Document, out: &mut Vec<String>) {
    let sources = doc
        .section(SectionKind::Sources.title())
        .map(|s| s.heading..s.body.end);

    let mut counts: HashMap<String, usize> = HashMap::new();
    let mut order = Vec::new();
    for (idx, block) in doc.blocks.iter().enumerate() {
        if sources.as_ref().is_some_and(|r| r.contains(&idx)) {
            continue;
        }
        for link in block.links() {
            let key = link.url.trim_end_matches('/').to_string();
            let count = counts.entry(key.clone()).or_insert(0);
            if *count == 0 {
                order.push(key);
            }
            *count += 1;
        }
    }

    for url in order {
        let n = counts[&url];
        if n > 1 {
            out.push(format!("URL used {} times: {}", n, url));
        }
    }
}

fn check_tracking_params(doc: &Document, out: &mut Vec<String>) {
    for link in doc.links() {
        let Ok(url) = Url::parse(&link.url) else {
            continue;
        };
        for (key, _) in url.query_pairs() {
            let key = key.to_lowercase();
            if key.starts_with("utm_") || TRACKING_PARAMS.contains(&key.as_str()) {
                out.push(format!("Tracking parameter \"{}\" in {}", key, link.url));
            }
        }
    }
}

fn check_attribution_phrases(doc: &Document, out: &mut Vec<String>) {
    let text = plain_text(&doc.blocks);
    let count = ACCORDING_TO.find_iter(&text).count();
    if count > MAX_ACCORDING_TO {
        out.push(format!(
            "\"according to\" used {} times (max {})",
            count, MAX_ACCORDING_TO
        ));
    }
}

fn snippet(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() <= 60 {
        trimmed.to_string()
    } else {
        format!("{}...", trimmed.chars().take(60).collect::<String>())
    }
}

/// Last look before publishing. Findings are warnings only.
pub fn final_check(markdown: &str, required: &[SectionKind]) -> Vec<String> {
    let doc = parse(markdown);
    let mut warnings = Vec::new();

    let words = word_count(&plain_text(&doc.blocks));
    if !(MIN_ISSUE_WORDS..=MAX_ISSUE_WORDS).contains(&words) {
        warnings.push(format!(
            "Issue is {} words, expected {}-{}",
            words, MIN_ISSUE_WORDS, MAX_ISSUE_WORDS
        ));
    }

    warnings.extend(check_completeness(markdown, required));
    if required.contains(&SectionKind::QuickHits) {
        warnings.extend(check_digest(markdown));
    }

    warnings
        .into_iter()
        .map(|w| format!("Final check: {}", w))
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct ComplianceOutcome {
    pub markdown: String,
    pub fix_attempts: u32,
}

pub struct ComplianceFixer {
    llm: Arc<dyn CompletionService>,
}

impl ComplianceFixer {
    pub fn new(llm: Arc<dyn CompletionService>) -> Self {
        Self { llm }
    }

    /// Ask the model to correct the listed violations and nothing else.
    pub async fn fix(&self, markdown: &str, violations: &[String]) -> Result<String> {
        let list = violations
            .iter()
            .map(|v| format!("- {}", v))
            .collect::<Vec<_>>()
            .join("\n");

        let prompt = format!(
            r#"You are a copy editor. The newsletter below breaks these house rules:

{}

House rules: headings have no punctuation; links are embedded as [descriptive anchor](url), never bare; anchor text is never generic ("click here", "read more"); emoji only in headings and at the start of bullets; a URL appears at most once outside the Sources section; URLs carry no tracking parameters; "according to" appears at most twice.

Fix only what is listed. Keep every section, heading, fact and link destination otherwise unchanged.

Newsletter:
```markdown
{}
```

Return the complete corrected newsletter inside a single ```markdown fenced block."#,
            list, markdown
        );

        let completion = self
            .llm
            .complete(
                &prompt,
                CompletionOptions {
                    temperature: 0.2,
                    max_tokens: 8000,
                },
            )
            .await?;

        let fixed = extract_markdown(&completion.text);
        if fixed.is_empty() {
            anyhow::bail!("Compliance fix returned no markdown");
        }
        Ok(fixed)
    }

    /// Validate, then fix and re-validate until clean. Fails with
    /// [`PipelineError::ComplianceUnresolved`] once the attempts run out.
    pub async fn enforce(&self, markdown: String) -> Result<ComplianceOutcome> {
        let initial = validate(&markdown);
        if initial.valid {
            return Ok(ComplianceOutcome {
                markdown,
                fix_attempts: 0,
            });
        }
        info!(violations = initial.violations.len(), "Compliance violations found");

        let outcome = retry(
            RetryPolicy::attempts(MAX_FIX_ATTEMPTS),
            (markdown, initial.violations),
            |attempt, (current, violations)| async move {
                let fixed = match self.fix(&current, &violations).await {
                    Ok(fixed) => fixed,
                    Err(e) => {
                        warn!(attempt, error = %e, "Compliance fix failed");
                        return Ok(Verdict::Retry((current, violations)));
                    }
                };
                let result = validate(&fixed);
                if result.valid {
                    Ok(Verdict::Accept((fixed, Vec::new())))
                } else {
                    warn!(attempt, remaining = ?result.violations, "Violations remain after fix");
                    Ok(Verdict::Retry((fixed, result.violations)))
                }
            },
        )
        .await?;

        let (markdown, violations) = outcome.state;
        if !outcome.converged {
            return Err(PipelineError::ComplianceUnresolved {
                attempts: outcome.attempts,
                violations,
            }
            .into());
        }

        info!(attempts = outcome.attempts, "Compliance violations resolved");
        Ok(ComplianceOutcome {
            markdown,
            fix_attempts: outcome.attempts,
        })
    }
}
