use once_cell::sync::Lazy;
use regex::Regex;

use super::sections::{SectionKind, DIGEST_ITEMS};
use crate::markdown::{parse, starts_with_emoji, Block, BlockKind, Document};

static FENCED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)```(?:markdown|md)?[ \t]*\r?\n(.*?)\r?\n?```").expect("fence pattern must compile")
});

static SUBJECT_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?mi)^\s*(?:\*\*)?subject:(?:\*\*)?\s*\S").expect("subject pattern must compile")
});

/// Tokens a draft can legitimately start with
const SECTION_START_TOKENS: &[&str] = &["Subject:", "**Subject:", "# ", "## "];

const TERMINAL_CHARS: &[char] = &['.', '!', '?', ')', '"', '\'', '”', '’', '*', '_', ']'];

/// Pull the newsletter out of a model reply: the first fenced block if there
/// is one, otherwise everything from the earliest section token on.
pub fn extract_markdown(reply: &str) -> String {
    if let Some(body) = FENCED.captures(reply).and_then(|c| c.get(1)) {
        let body = body.as_str().trim();
        if !body.is_empty() {
            return body.to_string();
        }
    }

    let start = SECTION_START_TOKENS
        .iter()
        .filter_map(|token| reply.find(token))
        .min()
        .unwrap_or(0);

    reply[start..]
        .trim()
        .trim_end_matches("```")
        .trim_end()
        .to_string()
}

/// Required parts present and the draft does not stop mid-sentence.
pub fn check_completeness(markdown: &str, required: &[SectionKind]) -> Vec<String> {
    let doc = parse(markdown);
    let mut issues = Vec::new();

    for kind in required {
        let present = match kind {
            SectionKind::Subject => SUBJECT_LINE.is_match(markdown),
            _ => doc.section(kind.title()).is_some(),
        };
        if !present {
            issues.push(format!("Missing section: {}", kind.title()));
        }
    }

    if let Some(last) = markdown.lines().rev().map(str::trim).find(|l| !l.is_empty()) {
        if !last.ends_with(TERMINAL_CHARS) {
            issues.push(format!(
                "Draft appears truncated: last line ends with \"{}\"",
                tail(last, 20)
            ));
        }
    } else {
        issues.push("Draft is empty".to_string());
    }

    issues
}

fn tail(text: &str, chars: usize) -> &str {
    let count = text.chars().count();
    match text.char_indices().nth(count.saturating_sub(chars)) {
        Some((idx, _)) => &text[idx..],
        None => text,
    }
}

/// Emoji-led lines of the digest section, in order
pub fn digest_headlines(doc: &Document) -> Option<Vec<&Block>> {
    let section = doc.section(SectionKind::QuickHits.title())?;
    Some(
        doc.section_blocks(&section)
            .iter()
            .filter(|b| matches!(b.kind, BlockKind::Bullet | BlockKind::Paragraph))
            .filter(|b| starts_with_emoji(&b.text()))
            .collect(),
    )
}

/// Exactly six emoji-led headlines, each carrying exactly one link.
pub fn check_digest(markdown: &str) -> Vec<String> {
    let doc = parse(markdown);
    let Some(headlines) = digest_headlines(&doc) else {
        return vec![format!("Missing section: {}", SectionKind::QuickHits.title())];
    };

    let mut issues = Vec::new();
    if headlines.len() != DIGEST_ITEMS {
        issues.push(format!(
            "Digest has {} headlines, expected {}",
            headlines.len(),
            DIGEST_ITEMS
        ));
    }

    let link_counts: Vec<usize> = headlines.iter().map(|b| b.links().len()).collect();
    let linked = link_counts.iter().filter(|n| **n > 0).count();
    if linked < headlines.len() || headlines.is_empty() {
        issues.push(format!(
            "{}/{} headlines have embedded URLs",
            linked,
            headlines.len().max(DIGEST_ITEMS)
        ));
    }
    for (idx, count) in link_counts.iter().enumerate() {
        if *count > 1 {
            issues.push(format!("Digest headline {} has {} links, expected 1", idx + 1, count));
        }
    }

    issues
}
