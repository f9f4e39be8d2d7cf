//! Line-oriented Markdown tokenizer.
//!
//! Newsletter drafts only use a small slice of Markdown: ATX headings, bullet
//! lines, fenced code, paragraphs and a handful of inline spans. Each block keeps
//! the byte range it came from so callers can splice replacements by node
//! instead of tracking string offsets by hand.

use std::ops::Range;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inline {
    Text(String),
    Strong(Vec<Inline>),
    Emphasis(Vec<Inline>),
    Code(String),
    Link { text: String, url: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    Heading(u8),
    Bullet,
    Paragraph,
    Code,
    Blank,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub kind: BlockKind,
    /// Byte range of the whole source line, newline included
    pub range: Range<usize>,
    pub inlines: Vec<Inline>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    pub text: String,
    pub url: String,
}

/// A heading plus the blocks up to the next heading of the same or higher rank
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub heading: usize,
    pub body: Range<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    source: String,
    pub blocks: Vec<Block>,
}

pub fn parse(source: &str) -> Document {
    let mut blocks = Vec::new();
    let mut offset = 0;
    let mut in_fence = false;

    for raw in source.split_inclusive('\n') {
        let range = offset..offset + raw.len();
        offset += raw.len();
        let line = raw.trim_end_matches(['\n', '\r']);
        let trimmed = line.trim_start();

        if trimmed.starts_with("```") {
            in_fence = !in_fence;
            blocks.push(Block {
                kind: BlockKind::Code,
                range,
                inlines: vec![Inline::Code(line.to_string())],
            });
            continue;
        }

        let (kind, content) = if in_fence {
            blocks.push(Block {
                kind: BlockKind::Code,
                range,
                inlines: vec![Inline::Code(line.to_string())],
            });
            continue;
        } else if trimmed.is_empty() {
            (BlockKind::Blank, "")
        } else if let Some((level, rest)) = heading_prefix(trimmed) {
            (BlockKind::Heading(level), rest)
        } else if let Some(rest) = bullet_prefix(trimmed) {
            (BlockKind::Bullet, rest)
        } else {
            (BlockKind::Paragraph, trimmed)
        };

        blocks.push(Block {
            kind,
            range,
            inlines: parse_inlines(content.trim_end()),
        });
    }

    Document {
        source: source.to_string(),
        blocks,
    }
}

fn heading_prefix(line: &str) -> Option<(u8, &str)> {
    let hashes = line.chars().take_while(|c| *c == '#').count();
    if hashes == 0 || hashes > 6 {
        return None;
    }
    let rest = &line[hashes..];
    if rest.is_empty() {
        return Some((hashes as u8, ""));
    }
    rest.strip_prefix([' ', '\t'])
        .map(|text| (hashes as u8, text.trim()))
}

fn bullet_prefix(line: &str) -> Option<&str> {
    ["- ", "* ", "+ ", "• "]
        .iter()
        .find_map(|marker| line.strip_prefix(marker))
}

pub fn parse_inlines(text: &str) -> Vec<Inline> {
    let mut out = Vec::new();
    let mut plain = String::new();
    let mut i = 0;

    while i < text.len() {
        let rest = &text[i..];

        if rest.starts_with('[') {
            if let Some((anchor, url, consumed)) = parse_link(rest) {
                flush_text(&mut plain, &mut out);
                out.push(Inline::Link {
                    text: anchor.to_string(),
                    url: url.to_string(),
                });
                i += consumed;
                continue;
            }
        }

        if let Some(inner) = rest.strip_prefix("**") {
            if let Some(end) = inner.find("**").filter(|end| *end > 0) {
                flush_text(&mut plain, &mut out);
                out.push(Inline::Strong(parse_inlines(&inner[..end])));
                i += end + 4;
                continue;
            }
        }

        if let Some(inner) = rest.strip_prefix('*') {
            if !inner.starts_with([' ', '*']) {
                if let Some(end) = inner.find('*').filter(|end| *end > 0) {
                    flush_text(&mut plain, &mut out);
                    out.push(Inline::Emphasis(parse_inlines(&inner[..end])));
                    i += end + 2;
                    continue;
                }
            }
        }

        if let Some(inner) = rest.strip_prefix('`') {
            if let Some(end) = inner.find('`') {
                flush_text(&mut plain, &mut out);
                out.push(Inline::Code(inner[..end].to_string()));
                i += end + 2;
                continue;
            }
        }

        match rest.chars().next() {
            Some(ch) => {
                plain.push(ch);
                i += ch.len_utf8();
            }
            None => break,
        }
    }

    flush_text(&mut plain, &mut out);
    out
}

fn flush_text(plain: &mut String, out: &mut Vec<Inline>) {
    if !plain.is_empty() {
        out.push(Inline::Text(std::mem::take(plain)));
    }
}

/// Parse `[text](url)` at the start of `s`. Returns anchor, url and bytes consumed.
fn parse_link(s: &str) -> Option<(&str, &str, usize)> {
    let close_bracket = matching(s, '[', ']')?;
    let after = &s[close_bracket + 1..];
    if !after.starts_with('(') {
        return None;
    }
    let close_paren = matching(after, '(', ')')?;
    let anchor = &s[1..close_bracket];
    let target = after[1..close_paren].trim();
    // Drop an optional link title: [a](https://x "title")
    let url = target.split_whitespace().next().unwrap_or("");
    if url.is_empty() {
        return None;
    }
    Some((anchor, url, close_bracket + 1 + close_paren + 1))
}

fn matching(s: &str, open: char, close: char) -> Option<usize> {
    let mut depth = 0usize;
    for (idx, ch) in s.char_indices() {
        if ch == open {
            depth += 1;
        } else if ch == close {
            depth = depth.checked_sub(1)?;
            if depth == 0 {
                return Some(idx);
            }
        }
    }
    None
}

impl Block {
    pub fn is_heading(&self) -> bool {
        matches!(self.kind, BlockKind::Heading(_))
    }

    /// Inline content with markup removed; link anchors are kept.
    pub fn text(&self) -> String {
        inline_text(&self.inlines)
    }

    pub fn links(&self) -> Vec<Link> {
        let mut links = Vec::new();
        collect_links(&self.inlines, &mut links);
        links
    }

    /// Plain text runs only, the places a bare URL or stray emoji can hide
    pub fn text_runs(&self) -> Vec<&str> {
        let mut runs = Vec::new();
        collect_text_runs(&self.inlines, &mut runs);
        runs
    }
}

pub fn inline_text(inlines: &[Inline]) -> String {
    let mut out = String::new();
    for inline in inlines {
        match inline {
            Inline::Text(t) | Inline::Code(t) => out.push_str(t),
            Inline::Strong(children) | Inline::Emphasis(children) => {
                out.push_str(&inline_text(children))
            }
            Inline::Link { text, .. } => out.push_str(&inline_text(&parse_inlines(text))),
        }
    }
    out
}

fn collect_links(inlines: &[Inline], out: &mut Vec<Link>) {
    for inline in inlines {
        match inline {
            Inline::Link { text, url } => out.push(Link {
                text: text.clone(),
                url: url.clone(),
            }),
            Inline::Strong(children) | Inline::Emphasis(children) => collect_links(children, out),
            Inline::Text(_) | Inline::Code(_) => {}
        }
    }
}

fn collect_text_runs<'a>(inlines: &'a [Inline], out: &mut Vec<&'a str>) {
    for inline in inlines {
        match inline {
            Inline::Text(t) => out.push(t),
            Inline::Strong(children) | Inline::Emphasis(children) => {
                collect_text_runs(children, out)
            }
            Inline::Link { .. } | Inline::Code(_) => {}
        }
    }
}

impl Document {
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn headings(&self) -> impl Iterator<Item = (usize, &Block)> {
        self.blocks.iter().enumerate().filter(|(_, b)| b.is_heading())
    }

    pub fn links(&self) -> Vec<Link> {
        self.blocks.iter().flat_map(|b| b.links()).collect()
    }

    /// Find the first heading whose normalized title contains `title`.
    pub fn section(&self, title: &str) -> Option<Section> {
        let wanted = normalize_heading(title);
        let (heading, level) = self.blocks.iter().enumerate().find_map(|(idx, b)| match b.kind {
            BlockKind::Heading(level) if normalize_heading(&b.text()).contains(&wanted) => {
                Some((idx, level))
            }
            _ => None,
        })?;

        let end = self.blocks[heading + 1..]
            .iter()
            .position(|b| matches!(b.kind, BlockKind::Heading(l) if l <= level))
            .map(|pos| heading + 1 + pos)
            .unwrap_or(self.blocks.len());

        Some(Section {
            heading,
            body: heading + 1..end,
        })
    }

    pub fn section_blocks(&self, section: &Section) -> &[Block] {
        &self.blocks[section.body.clone()]
    }

    /// Byte range in the source covered by the section body
    pub fn body_range(&self, section: &Section) -> Range<usize> {
        let start = self.blocks[section.heading].range.end;
        let end = self
            .blocks
            .get(section.body.end)
            .map(|b| b.range.start)
            .unwrap_or(self.source.len());
        start..end
    }

    /// Markdown text of the section body, without its heading
    pub fn section_markdown(&self, section: &Section) -> &str {
        &self.source[self.body_range(section)]
    }

    /// Return a new source string with the section body replaced.
    pub fn replace_section_body(&self, section: &Section, body: &str) -> String {
        let range = self.body_range(section);
        let mut body = body.trim_matches('\n').to_string();
        body.push_str("\n\n");

        let mut out = String::with_capacity(self.source.len() + body.len() + 1);
        out.push_str(&self.source[..range.start]);
        if !out.ends_with('\n') {
            out.push('\n');
        }
        out.push_str(&body);
        out.push_str(self.source[range.end..].trim_start_matches('\n'));
        out
    }
}

/// Plain text of a run of blocks: heading markers, emoji and link syntax
/// removed, anchor text kept.
pub fn plain_text(blocks: &[Block]) -> String {
    blocks
        .iter()
        .filter(|b| !matches!(b.kind, BlockKind::Blank | BlockKind::Code))
        .map(|b| strip_emoji(&b.text()))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn word_count(text: &str) -> usize {
    text.split_whitespace()
        .filter(|w| w.chars().any(char::is_alphanumeric))
        .count()
}

pub fn normalize_heading(text: &str) -> String {
    strip_emoji(text)
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

pub fn is_emoji(c: char) -> bool {
    matches!(c as u32,
        0x1F000..=0x1FAFF
        | 0x2600..=0x27BF
        | 0x2300..=0x23FF
        | 0x2B00..=0x2BFF
        | 0x1F1E6..=0x1F1FF
        | 0x3030 | 0x303D | 0x3297 | 0x3299
    )
}

/// Emoji plus the invisible joiners that glue them together
fn is_emoji_component(c: char) -> bool {
    is_emoji(c) || matches!(c as u32, 0xFE0E | 0xFE0F | 0x200D | 0x20E3)
}

pub fn strip_emoji(text: &str) -> String {
    text.chars().filter(|c| !is_emoji_component(*c)).collect()
}

pub fn starts_with_emoji(text: &str) -> bool {
    text.trim_start().chars().next().is_some_and(is_emoji)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunStyle {
    Heading(u8),
    Bullet,
    Bold,
    Italic,
    Code,
    Link(String),
}

/// A style applied to `range`, measured in chars of the rendered text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StyleRun {
    pub range: Range<usize>,
    pub style: RunStyle,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormattedText {
    pub text: String,
    pub runs: Vec<StyleRun>,
}

impl FormattedText {
    fn push(&mut self, s: &str) -> Range<usize> {
        let start = self.text.chars().count();
        self.text.push_str(s);
        start..start + s.chars().count()
    }

    fn push_inlines(&mut self, inlines: &[Inline]) {
        for inline in inlines {
            match inline {
                Inline::Text(t) => {
                    self.push(t);
                }
                Inline::Code(t) => {
                    let range = self.push(t);
                    self.runs.push(StyleRun {
                        range,
                        style: RunStyle::Code,
                    });
                }
                Inline::Strong(children) | Inline::Emphasis(children) => {
                    let start = self.text.chars().count();
                    self.push_inlines(children);
                    let end = self.text.chars().count();
                    let style = if matches!(inline, Inline::Strong(_)) {
                        RunStyle::Bold
                    } else {
                        RunStyle::Italic
                    };
                    self.runs.push(StyleRun {
                        range: start..end,
                        style,
                    });
                }
                Inline::Link { text, url } => {
                    let range = self.push(&inline_text(&parse_inlines(text)));
                    self.runs.push(StyleRun {
                        range,
                        style: RunStyle::Link(url.clone()),
                    });
                }
            }
        }
    }
}

/// Render the document to plain text plus the style runs a rich-text
/// document service needs to rebuild the formatting.
pub fn format_runs(doc: &Document) -> FormattedText {
    let mut out = FormattedText::default();

    for block in &doc.blocks {
        let start = out.text.chars().count();
        match block.kind {
            BlockKind::Blank => {}
            BlockKind::Code => {
                let range = out.push(&block.text());
                out.runs.push(StyleRun {
                    range,
                    style: RunStyle::Code,
                });
            }
            BlockKind::Heading(level) => {
                out.push_inlines(&block.inlines);
                let end = out.text.chars().count();
                out.runs.push(StyleRun {
                    range: start..end,
                    style: RunStyle::Heading(level),
                });
            }
            BlockKind::Bullet => {
                out.push_inlines(&block.inlines);
                let end = out.text.chars().count();
                out.runs.push(StyleRun {
                    range: start..end,
                    style: RunStyle::Bullet,
                });
            }
            BlockKind::Paragraph => out.push_inlines(&block.inlines),
        }
        out.push("\n");
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_headings_bullets_and_paragraphs() {
        let doc = parse("# Title\n\n- one\nplain text\n### Deep\n");
        let kinds: Vec<_> = doc.blocks.iter().map(|b| b.kind).collect();
        assert_eq!(
            kinds,
            vec![
                BlockKind::Heading(1),
                BlockKind::Blank,
                BlockKind::Bullet,
                BlockKind::Paragraph,
                BlockKind::Heading(3),
            ]
        );
        assert_eq!(doc.blocks[0].text(), "Title");
        assert_eq!(doc.blocks[2].text(), "one");
    }

    #[test]
    fn test_hashtag_without_space_is_not_heading() {
        let doc = parse("#hashtag\n");
        assert_eq!(doc.blocks[0].kind, BlockKind::Paragraph);
    }

    #[test]
    fn test_bold_line_is_not_bullet() {
        let doc = parse("**Subject:** Hello\n");
        assert_eq!(doc.blocks[0].kind, BlockKind::Paragraph);
        assert_eq!(doc.blocks[0].text(), "Subject: Hello");
    }

    #[test]
    fn test_inline_link_and_emphasis() {
        let inlines = parse_inlines("See [the post](https://a.com/x) and *this* and **that**.");
        assert_eq!(
            inlines,
            vec![
                Inline::Text("See ".into()),
                Inline::Link {
                    text: "the post".into(),
                    url: "https://a.com/x".into()
                },
                Inline::Text(" and ".into()),
                Inline::Emphasis(vec![Inline::Text("this".into())]),
                Inline::Text(" and ".into()),
                Inline::Strong(vec![Inline::Text("that".into())]),
                Inline::Text(".".into()),
            ]
        );
    }

    #[test]
    fn test_link_with_parens_in_url() {
        let inlines = parse_inlines("[wiki](https://en.wikipedia.org/wiki/Rust_(language))");
        assert_eq!(
            inlines,
            vec![Inline::Link {
                text: "wiki".into(),
                url: "https://en.wikipedia.org/wiki/Rust_(language)".into()
            }]
        );
    }

    #[test]
    fn test_brackets_without_target_stay_text() {
        let inlines = parse_inlines("array[0] is fine");
        assert_eq!(inlines, vec![Inline::Text("array[0] is fine".into())]);
    }

    #[test]
    fn test_link_inside_bold_is_collected() {
        let doc = parse("**[Bold link](https://b.com)** trailing\n");
        let links = doc.links();
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].url, "https://b.com");
    }

    #[test]
    fn test_text_runs_exclude_link_targets() {
        let doc = parse("Visit [site](https://a.com) or https://bare.com\n");
        let runs = doc.blocks[0].text_runs();
        assert!(runs.iter().all(|r| !r.contains("https://a.com")));
        assert!(runs.iter().any(|r| r.contains("https://bare.com")));
    }

    #[test]
    fn test_fenced_code_is_opaque() {
        let doc = parse("```\n# not a heading\n```\n");
        assert!(doc.blocks.iter().all(|b| b.kind == BlockKind::Code));
    }

    #[test]
    fn test_section_spans_until_next_peer_heading() {
        let doc = parse("## 📰 The Big Story\nBody one\n### Sub\nMore\n## Next\nOther\n");
        let section = doc.section("The Big Story").unwrap();
        assert_eq!(section.heading, 0);
        assert_eq!(section.body, 1..4);
        assert_eq!(doc.section_markdown(&section), "Body one\n### Sub\nMore\n");
    }

    #[test]
    fn test_section_matching_ignores_emoji_and_case() {
        let doc = parse("## 🔎 also worth KNOWING\ntext\n");
        assert!(doc.section("Also Worth Knowing").is_some());
        assert!(doc.section("Quick Hits").is_none());
    }

    #[test]
    fn test_replace_section_body_keeps_neighbours() {
        let src = "Intro\n## A\nold body\n\n## B\nkeep\n";
        let doc = parse(src);
        let section = doc.section("A").unwrap();
        let replaced = doc.replace_section_body(&section, "new body");
        assert_eq!(replaced, "Intro\n## A\nnew body\n\n## B\nkeep\n");
    }

    #[test]
    fn test_replace_last_section_body() {
        let doc = parse("## A\nold\n");
        let section = doc.section("A").unwrap();
        assert_eq!(doc.replace_section_body(&section, "new"), "## A\nnew\n\n");
    }

    #[test]
    fn test_plain_text_strips_markup() {
        let doc = parse("## 🚀 Launch\n- ⚡ [Big news](https://x.com) today\n");
        assert_eq!(plain_text(&doc.blocks), " Launch\n Big news today");
        assert_eq!(word_count(&plain_text(&doc.blocks)), 4);
    }

    #[test]
    fn test_word_count_ignores_punctuation_tokens() {
        assert_eq!(word_count("one — two - three ..."), 3);
    }

    #[test]
    fn test_emoji_detection() {
        assert!(starts_with_emoji("🚀 launch"));
        assert!(starts_with_emoji("  ⚡ fast"));
        assert!(!starts_with_emoji("plain"));
        assert_eq!(strip_emoji("❤️ love"), " love");
    }

    #[test]
    fn test_format_runs_ranges_index_rendered_text() {
        let doc = parse("## Head\nSee [docs](https://d.com) **now**\n");
        let formatted = format_runs(&doc);
        assert_eq!(formatted.text, "Head\nSee docs now\n");

        let chars: Vec<char> = formatted.text.chars().collect();
        let slice = |r: &Range<usize>| chars[r.clone()].iter().collect::<String>();

        assert_eq!(formatted.runs[0].style, RunStyle::Heading(2));
        assert_eq!(slice(&formatted.runs[0].range), "Head");

        let link = formatted
            .runs
            .iter()
            .find(|r| matches!(r.style, RunStyle::Link(_)))
            .unwrap();
        assert_eq!(slice(&link.range), "docs");
        assert_eq!(link.style, RunStyle::Link("https://d.com".into()));

        let bold = formatted.runs.iter().find(|r| r.style == RunStyle::Bold).unwrap();
        assert_eq!(slice(&bold.range), "now");
    }

    #[test]
    fn test_format_runs_counts_chars_not_bytes() {
        let doc = parse("## 🚀 Go\n");
        let formatted = format_runs(&doc);
        assert_eq!(formatted.runs[0].range, 0..4);
    }
}
