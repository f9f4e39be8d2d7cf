use super::research::{ContentPlan, ResearchBundle, SlotCategory};
use super::sections::{SectionKind, STORY_MAX_WORDS, STORY_MIN_WORDS, STORY_TARGET_WORDS};
use crate::markdown::Link;

const STYLE_RULES: &str = "\
- Headings are exactly as given above: no extra punctuation, no colons.
- Never paste a bare URL. Every link is embedded as [descriptive anchor](url).
- Anchor text describes the destination. Never \"click here\", \"read more\", \"here\" or \"this link\".
- Emoji appear only in headings and at the start of Quick Hits bullets.
- Use each URL at most once outside the Sources section.
- Strip tracking parameters (utm_*, fbclid, gclid, ref) from every URL.
- Use \"according to\" at most twice in the whole issue.
- Only link to URLs listed in the URL bank.";

/// Full generation prompt. `feedback` carries the problems found in the
/// previous attempt so the next one can correct them.
pub fn generation_prompt(
    plan: &ContentPlan,
    bundle: &ResearchBundle,
    sections: &[SectionKind],
    feedback: &[String],
) -> String {
    let mut prompt = format!(
        "You are writing issue #{} of a weekly newsletter that explains the most important AI news \
         to curious, non-technical readers. Voice: clear, warm, concrete, never hype.\n\n",
        plan.issue_number
    );

    prompt.push_str("## Structure\n\nProduce these parts, in this order, and nothing else:\n\n");
    for kind in sections {
        prompt.push_str(&format!("{}\n  {}\n", kind.heading(), kind.guidance()));
    }

    prompt.push_str("\n## Content\n\n");
    prompt.push_str(&format!(
        "Main story: {}\n{}\nURL: {}\n",
        plan.main.title, plan.main.summary, plan.main.url
    ));
    if let Some(note) = &plan.main.note {
        prompt.push_str(&format!("Fact-check note: {}\n", note));
    }
    if let Some(secondary) = &plan.secondary {
        prompt.push_str(&format!(
            "\nSecondary story: {}\n{}\nURL: {}\n",
            secondary.title, secondary.summary, secondary.url
        ));
    }
    if !plan.quick_links.is_empty() {
        prompt.push_str("\nQuick Hits items (one headline each):\n");
        for lead in &plan.quick_links {
            prompt.push_str(&format!("- {} | {}\n", lead.title, lead.url));
        }
    }
    if let Some(challenge) = &plan.challenge {
        prompt.push_str(&format!(
            "\nChallenge: {} ({})\n{}\n",
            challenge.title, challenge.kind, challenge.description
        ));
    }

    prompt.push_str("\n## Research\n\n");
    for category in [
        SlotCategory::Main,
        SlotCategory::Secondary,
        SlotCategory::Digest,
        SlotCategory::Challenge,
    ] {
        let notes = bundle.notes(category);
        if !notes.is_empty() {
            prompt.push_str(&format!("{} research:\n{}\n\n", category.label(), notes));
        }
    }

    prompt.push_str("## URL bank\n\n");
    prompt.push_str(&bundle.bank.render());
    prompt.push_str("\n\n## Style rules\n\n");
    prompt.push_str(STYLE_RULES);

    if !feedback.is_empty() {
        prompt.push_str("\n\n## Fix these problems from your previous attempt\n\n");
        for issue in feedback {
            prompt.push_str(&format!("- {}\n", issue));
        }
    }

    prompt.push_str(
        "\n\nReturn the complete newsletter as Markdown inside a single ```markdown fenced block.",
    );
    prompt
}

pub fn rewrite_prompt(kind: SectionKind, body: &str, words: usize, links: &[Link]) -> String {
    let direction = if words < STORY_MIN_WORDS { "Expand" } else { "Tighten" };
    let link_list = if links.is_empty() {
        "(none)".to_string()
    } else {
        links
            .iter()
            .map(|l| format!("- [{}]({})", l.text, l.url))
            .collect::<Vec<_>>()
            .join("\n")
    };

    format!(
        r#"{} the "{}" section of a newsletter. It is currently {} words; it must be between {} and {} words (aim for {}).

Keep the facts, tone and paragraph structure. Do not add new facts. Keep every one of these links exactly as written, same anchor text and same URL:
{}

Section text:
{}

Return only the rewritten section body as Markdown, without the heading."#,
        direction,
        kind.title(),
        words,
        STORY_MIN_WORDS,
        STORY_MAX_WORDS,
        STORY_TARGET_WORDS,
        link_list,
        body.trim()
    )
}
