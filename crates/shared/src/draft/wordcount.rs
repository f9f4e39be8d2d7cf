use tracing::{info, warn};

use super::checks::extract_markdown;
use super::prompts::rewrite_prompt;
use super::sections::{SectionKind, STORY_MAX_WORDS, STORY_MIN_WORDS};
use crate::llm::{CompletionOptions, CompletionService};
use crate::markdown::{parse, plain_text, word_count, BlockKind, Document, Link};

/// Body words of a section, heading excluded
pub fn section_words(doc: &Document, kind: SectionKind) -> Option<usize> {
    let section = doc.section(kind.title())?;
    Some(word_count(&plain_text(doc.section_blocks(&section))))
}

pub fn within_bounds(words: usize) -> bool {
    (STORY_MIN_WORDS..=STORY_MAX_WORDS).contains(&words)
}

/// Every original link must survive the rewrite with its anchor text intact.
pub fn links_preserved(original: &[Link], rewritten: &[Link]) -> bool {
    original.iter().all(|o| rewritten.contains(o))
}

/// Rewrite out-of-range story sections. Never fails: a rewrite that still
/// misses the range is kept and reported, and one that touches links is
/// dropped in favour of the original.
pub async fn enforce_word_counts(
    llm: &dyn CompletionService,
    markdown: String,
    sections: &[SectionKind],
) -> (String, Vec<String>) {
    let mut markdown = markdown;
    let mut warnings = Vec::new();

    for kind in sections.iter().copied().filter(|k| k.word_limited()) {
        let doc = parse(&markdown);
        let Some(section) = doc.section(kind.title()) else {
            continue;
        };
        let blocks = doc.section_blocks(&section);
        let words = word_count(&plain_text(blocks));
        if within_bounds(words) {
            continue;
        }

        info!(section = kind.title(), words, "Section outside word range, rewriting");
        let links: Vec<Link> = blocks.iter().flat_map(|b| b.links()).collect();
        let prompt = rewrite_prompt(kind, doc.section_markdown(&section), words, &links);

        let reply = match llm
            .complete(
                &prompt,
                CompletionOptions {
                    temperature: 0.4,
                    max_tokens: 2000,
                },
            )
            .await
        {
            Ok(reply) => reply,
            Err(e) => {
                warn!(section = kind.title(), error = %e, "Word count rewrite failed");
                warnings.push(format!(
                    "{} is {} words; rewrite failed: {}",
                    kind.title(),
                    words,
                    e
                ));
                continue;
            }
        };

        let body = strip_leading_heading(&extract_markdown(&reply.text));
        let rewritten = parse(&body);
        let new_links: Vec<Link> = rewritten.links();
        if !links_preserved(&links, &new_links) {
            warn!(section = kind.title(), "Rewrite changed links, keeping original");
            warnings.push(format!(
                "{} is {} words; rewrite changed or dropped links and was discarded",
                kind.title(),
                words
            ));
            continue;
        }

        let new_words = word_count(&plain_text(&rewritten.blocks));
        markdown = doc.replace_section_body(&section, &body);
        if !within_bounds(new_words) {
            warnings.push(format!(
                "{} is {} words after rewrite, outside {}-{}",
                kind.title(),
                new_words,
                STORY_MIN_WORDS,
                STORY_MAX_WORDS
            ));
        }
    }

    (markdown, warnings)
}

fn strip_leading_heading(text: &str) -> String {
    let doc = parse(text);
    match doc.blocks.iter().find(|b| b.kind != BlockKind::Blank) {
        Some(first) if first.is_heading() => text[first.range.end..].trim().to_string(),
        _ => text.trim().to_string(),
    }
}
