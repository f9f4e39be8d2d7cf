use anyhow::{Context, Result};
use futures::future::try_join_all;
use std::collections::BTreeMap;
use tracing::{debug, info};

use super::sections::{required_sections, SectionKind};
use crate::llm::{GroundedAnswer, SearchService};
use crate::models::{Challenge, Lead};

/// Everything selected for one issue
#[derive(Debug, Clone)]
pub struct ContentPlan {
    pub issue_number: i64,
    pub main: Lead,
    pub secondary: Option<Lead>,
    pub quick_links: Vec<Lead>,
    pub challenge: Option<Challenge>,
}

impl ContentPlan {
    pub fn required_sections(&self) -> Vec<SectionKind> {
        required_sections(
            self.secondary.is_some(),
            !self.quick_links.is_empty(),
            self.challenge.is_some(),
        )
    }
}

/// Which part of the issue a URL was researched for
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SlotCategory {
    Main,
    Secondary,
    Digest,
    Challenge,
}

impl SlotCategory {
    pub fn label(self) -> &'static str {
        match self {
            SlotCategory::Main => "Main story",
            SlotCategory::Secondary => "Secondary story",
            SlotCategory::Digest => "Quick hits",
            SlotCategory::Challenge => "Challenge",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BankEntry {
    pub url: String,
    pub title: String,
}

/// Verified URLs the draft is allowed to link to, grouped by slot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UrlBank {
    entries: BTreeMap<SlotCategory, Vec<BankEntry>>,
}

impl UrlBank {
    pub fn insert(&mut self, category: SlotCategory, url: &str, title: &str) {
        let url = url.trim();
        if url.is_empty() {
            return;
        }
        let slot = self.entries.entry(category).or_default();
        if slot.iter().any(|e| same_url(&e.url, url)) {
            return;
        }
        slot.push(BankEntry {
            url: url.to_string(),
            title: title.trim().to_string(),
        });
    }

    pub fn contains(&self, url: &str) -> bool {
        self.entries
            .values()
            .flatten()
            .any(|entry| same_url(&entry.url, url))
    }

    pub fn entries(&self, category: SlotCategory) -> &[BankEntry] {
        self.entries.get(&category).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Prompt rendering, one block per category
    pub fn render(&self) -> String {
        let mut out = String::new();
        for (category, entries) in &self.entries {
            out.push_str(&format!("{}:\n", category.label()));
            for entry in entries {
                out.push_str(&format!("- {} | {}\n", entry.title, entry.url));
            }
            out.push('\n');
        }
        out.trim_end().to_string()
    }
}

fn same_url(a: &str, b: &str) -> bool {
    a.trim_end_matches('/') == b.trim_end_matches('/')
}

/// One research request, tied to the slot it feeds
#[derive(Debug, Clone, PartialEq)]
pub struct ResearchSlot {
    pub category: SlotCategory,
    pub title: String,
    pub url: Option<String>,
    pub prompt: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResearchBrief {
    pub category: SlotCategory,
    pub title: String,
    pub answer: GroundedAnswer,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResearchBundle {
    pub briefs: Vec<ResearchBrief>,
    pub bank: UrlBank,
}

impl ResearchBundle {
    /// Research notes for one category, ready to paste into a prompt
    pub fn notes(&self, category: SlotCategory) -> String {
        self.briefs
            .iter()
            .filter(|b| b.category == category)
            .map(|b| format!("### {}\n{}", b.title, b.answer.text.trim()))
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

/// One slot per selected item: main, secondary, each quick link, challenge.
pub fn plan_slots(plan: &ContentPlan) -> Vec<ResearchSlot> {
    let mut slots = vec![story_slot(SlotCategory::Main, &plan.main, true)];

    if let Some(secondary) = &plan.secondary {
        slots.push(story_slot(SlotCategory::Secondary, secondary, false));
    }

    for lead in &plan.quick_links {
        slots.push(ResearchSlot {
            category: SlotCategory::Digest,
            title: lead.title.clone(),
            url: Some(lead.url.clone()),
            prompt: format!(
                "In two factual sentences, summarize this news item and confirm where it was \
                 originally reported.\n\nHeadline: {}\nURL: {}\nSummary: {}",
                lead.title, lead.url, lead.summary
            ),
        });
    }

    if let Some(challenge) = &plan.challenge {
        slots.push(ResearchSlot {
            category: SlotCategory::Challenge,
            title: challenge.title.clone(),
            url: None,
            prompt: format!(
                "Find one or two beginner-friendly, free resources (official docs, tutorials, \
                 tools) a reader could use to complete this challenge. Describe each briefly.\n\n\
                 Challenge: {}\nType: {}\nDescription: {}",
                challenge.title, challenge.kind, challenge.description
            ),
        });
    }

    slots
}

fn story_slot(category: SlotCategory, lead: &Lead, in_depth: bool) -> ResearchSlot {
    let depth = if in_depth {
        "Research this story in depth: the key facts and numbers, who is involved, direct \
         quotes, the background that explains why it matters, and notable reactions."
    } else {
        "Research this story: the key facts, who is involved, and why it matters."
    };
    let mut prompt = format!(
        "{}\n\nHeadline: {}\nURL: {}\nSummary: {}",
        depth, lead.title, lead.url, lead.summary
    );
    if let Some(primary) = &lead.primary_source_url {
        prompt.push_str(&format!("\nPrimary source: {}", primary));
    }
    prompt.push_str("\n\nCite every source you rely on.");

    ResearchSlot {
        category,
        title: lead.title.clone(),
        url: Some(lead.url.clone()),
        prompt,
    }
}

/// Run every slot concurrently. Any failed request fails the whole phase.
pub async fn research(search: &dyn SearchService, plan: &ContentPlan) -> Result<ResearchBundle> {
    let slots = plan_slots(plan);
    info!(slots = slots.len(), "Researching issue content");

    let answers = try_join_all(slots.iter().map(|slot| async move {
        search
            .research(&slot.prompt)
            .await
            .with_context(|| format!("Research failed for {} \"{}\"", slot.category.label(), slot.title))
    }))
    .await?;

    let mut bundle = ResearchBundle::default();
    seed_bank(&mut bundle.bank, plan);

    for (slot, answer) in slots.into_iter().zip(answers) {
        for citation in &answer.citations {
            bundle.bank.insert(slot.category, &citation.url, &citation.title);
        }
        debug!(
            category = slot.category.label(),
            title = %slot.title,
            citations = answer.citations.len(),
            "Research slot finished"
        );
        bundle.briefs.push(ResearchBrief {
            category: slot.category,
            title: slot.title,
            answer,
        });
    }

    info!(urls = bundle.bank.len(), "URL bank built");
    Ok(bundle)
}

/// The selected stories' own URLs are always linkable.
fn seed_bank(bank: &mut UrlBank, plan: &ContentPlan) {
    bank.insert(SlotCategory::Main, &plan.main.url, &plan.main.title);
    if let Some(primary) = &plan.main.primary_source_url {
        bank.insert(SlotCategory::Main, primary, "Primary source");
    }
    if let Some(secondary) = &plan.secondary {
        bank.insert(SlotCategory::Secondary, &secondary.url, &secondary.title);
        if let Some(primary) = &secondary.primary_source_url {
            bank.insert(SlotCategory::Secondary, primary, "Primary source");
        }
    }
    for lead in &plan.quick_links {
        bank.insert(SlotCategory::Digest, &lead.url, &lead.title);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::llm::SearchHit;
    use crate::models::FactCheckStatus;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    pub(crate) fn lead(id: i64, title: &str) -> Lead {
        Lead {
            id,
            title: title.to_string(),
            source: "news.example.com".into(),
            url: format!("https://news.example.com/{}", id),
            summary: format!("Summary of {}", title),
            relevance_score: 90,
            embedding: vec![],
            fact_check_status: FactCheckStatus::Pending,
            primary_source_url: None,
            note: None,
            is_manual: false,
            created_at: Utc::now(),
        }
    }

    struct CitingSearch {
        calls: AtomicUsize,
        fail_on: Option<&'static str>,
    }

    #[async_trait]
    impl SearchService for CitingSearch {
        async fn search(&self, _query: &str) -> Result<Vec<SearchHit>> {
            Ok(vec![])
        }

        async fn research(&self, prompt: &str) -> Result<GroundedAnswer> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_on.is_some_and(|marker| prompt.contains(marker)) {
                anyhow::bail!("search backend unavailable");
            }
            Ok(GroundedAnswer {
                text: format!("Notes {}", n),
                citations: vec![SearchHit {
                    title: format!("Cited {}", n),
                    url: format!("https://cited.example.org/{}", n),
                    snippet: String::new(),
                }],
            })
        }
    }

    fn plan() -> ContentPlan {
        let mut main = lead(1, "Main");
        main.primary_source_url = Some("https://lab.org/paper".into());
        ContentPlan {
            issue_number: 7,
            main,
            secondary: None,
            quick_links: vec![lead(2, "Quick A"), lead(3, "Quick B")],
            challenge: Some(Challenge {
                id: 1,
                title: "Build a bot".into(),
                description: "Make a tiny chatbot".into(),
                kind: "coding".into(),
            }),
        }
    }

    #[test]
    fn test_one_slot_per_selected_item() {
        let slots = plan_slots(&plan());
        let categories: Vec<SlotCategory> = slots.iter().map(|s| s.category).collect();
        assert_eq!(
            categories,
            vec![
                SlotCategory::Main,
                SlotCategory::Digest,
                SlotCategory::Digest,
                SlotCategory::Challenge
            ]
        );
        assert!(slots[0].prompt.contains("Primary source: https://lab.org/paper"));
    }

    #[test]
    fn test_url_bank_ignores_trailing_slash_repeats() {
        let mut bank = UrlBank::default();
        bank.insert(SlotCategory::Main, "https://a.com/x", "A");
        bank.insert(SlotCategory::Main, "https://a.com/x/", "A again");
        bank.insert(SlotCategory::Digest, "", "empty");
        assert_eq!(bank.len(), 1);
        assert!(bank.contains("https://a.com/x/"));
        assert!(!bank.contains("https://a.com/y"));
    }

    #[tokio::test]
    async fn test_research_builds_bank_from_leads_and_citations() {
        let search = CitingSearch {
            calls: AtomicUsize::new(0),
            fail_on: None,
        };
        let bundle = research(&search, &plan()).await.unwrap();

        assert_eq!(search.calls.load(Ordering::SeqCst), 4);
        assert_eq!(bundle.briefs.len(), 4);
        assert!(bundle.bank.contains("https://news.example.com/1"));
        assert!(bundle.bank.contains("https://lab.org/paper"));
        assert!(bundle.bank.contains("https://news.example.com/3"));
        // main + primary + 2 quick links + one citation per slot
        assert_eq!(bundle.bank.len(), 8);
        assert!(bundle.notes(SlotCategory::Digest).contains("### Quick A"));
    }

    #[tokio::test]
    async fn test_any_failed_slot_fails_research() {
        let search = CitingSearch {
            calls: AtomicUsize::new(0),
            fail_on: Some("Challenge: Build a bot"),
        };
        let err = research(&search, &plan()).await.unwrap_err();
        assert!(format!("{:#}", err).contains("Challenge"));
    }
}
