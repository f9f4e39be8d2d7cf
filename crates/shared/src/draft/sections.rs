/// The fixed parts of every issue, in the order they appear.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SectionKind {
    Subject,
    MainStory,
    SecondaryStory,
    QuickHits,
    Challenge,
    Sources,
}

/// Body word range for the two long-form stories
pub const STORY_MIN_WORDS: usize = 325;
pub const STORY_MAX_WORDS: usize = 400;
pub const STORY_TARGET_WORDS: usize = 350;

/// Number of linked headlines in the digest
pub const DIGEST_ITEMS: usize = 6;

impl SectionKind {
    pub fn title(self) -> &'static str {
        match self {
            SectionKind::Subject => "Subject line",
            SectionKind::MainStory => "The Big Story",
            SectionKind::SecondaryStory => "Also Worth Knowing",
            SectionKind::QuickHits => "Quick Hits",
            SectionKind::Challenge => "The Weekly Challenge",
            SectionKind::Sources => "Sources",
        }
    }

    /// Exact line the draft must use to open the section
    pub fn heading(self) -> &'static str {
        match self {
            SectionKind::Subject => "Subject: <one line>",
            SectionKind::MainStory => "## 📰 The Big Story",
            SectionKind::SecondaryStory => "## 🔎 Also Worth Knowing",
            SectionKind::QuickHits => "## ⚡ Quick Hits",
            SectionKind::Challenge => "## 🧩 The Weekly Challenge",
            SectionKind::Sources => "## 📚 Sources",
        }
    }

    pub fn guidance(self) -> String {
        match self {
            SectionKind::Subject => {
                "First line of the draft. Plain text, no emoji, under 70 characters.".to_string()
            }
            SectionKind::MainStory | SectionKind::SecondaryStory => format!(
                "{}-{} words of narrative prose (aim for {}). Embed 2-4 links from the URL bank.",
                STORY_MIN_WORDS, STORY_MAX_WORDS, STORY_TARGET_WORDS
            ),
            SectionKind::QuickHits => format!(
                "Exactly {} bullet lines. Each starts with \"- \" then one emoji, then one sentence \
                 with exactly one embedded link.",
                DIGEST_ITEMS
            ),
            SectionKind::Challenge => {
                "80-150 words inviting readers to try the challenge, with one helpful link."
                    .to_string()
            }
            SectionKind::Sources => {
                "Bullet list of the main sources used, each as a descriptive embedded link. \
                 Must be the last section and end with a complete line."
                    .to_string()
            }
        }
    }

    /// Long-form sections whose length is enforced after generation
    pub fn word_limited(self) -> bool {
        matches!(self, SectionKind::MainStory | SectionKind::SecondaryStory)
    }
}

/// Sections this issue must contain given which slots were filled.
pub fn required_sections(has_secondary: bool, has_quick_links: bool, has_challenge: bool) -> Vec<SectionKind> {
    let mut sections = vec![SectionKind::Subject, SectionKind::MainStory];
    if has_secondary {
        sections.push(SectionKind::SecondaryStory);
    }
    if has_quick_links {
        sections.push(SectionKind::QuickHits);
    }
    if has_challenge {
        sections.push(SectionKind::Challenge);
    }
    sections.push(SectionKind::Sources);
    sections
}
