//! Section-aware chunking of text extracted from financial PDF filings.
//!
//! Text is normalized first (page headers, currency spacing, digit grouping,
//! control characters, runs of whitespace), then split at statement and note
//! headings. Within a section, every paragraph that carries a currency amount
//! is treated as a table and emitted whole; the surrounding narrative is
//! packed to the token budget.

use once_cell::sync::Lazy;
use regex::Regex;

use super::packer::TokenPacker;

/// Lines that open a new section, matched against the upper-cased,
/// left-trimmed line.
pub const SECTION_MARKERS: [&str; 5] = [
    "CONSOLIDATED STATEMENTS OF",
    "NOTES TO",
    "PART ",
    "ITEM ",
    "TABLE OF CONTENTS",
];

static PAGE_HEADER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\n.*?\| Q\d 20\d{2} Form 10-Q \|.*?\n").unwrap());
static CURRENCY_SPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\$\s+").unwrap());
static DIGIT_GROUP_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d),(\d)").unwrap());
static CONTROL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[\x00-\x08\x0B-\x1F\x7F\u{FFFD}]").unwrap());
static SPACE_RUN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[ \t]{2,}").unwrap());
static BLANK_RUN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());
static CURRENCY_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\$\s*\d").unwrap());

/// Clean up PDF extraction artifacts.
pub fn normalize(text: &str) -> String {
    let text = PAGE_HEADER_RE.replace_all(text, "\n");
    let text = CURRENCY_SPACE_RE.replace_all(&text, "$$ ");
    let text = DIGIT_GROUP_RE.replace_all(&text, "${1}${2}");
    let text = CONTROL_RE.replace_all(&text, "");
    let text = SPACE_RUN_RE.replace_all(&text, " ");
    let text = BLANK_RUN_RE.replace_all(&text, "\n\n");
    text.trim().to_string()
}

fn starts_section(line: &str) -> bool {
    let upper = line.trim_start().to_uppercase();
    SECTION_MARKERS.iter().any(|marker| upper.starts_with(marker))
}

/// Split normalized text into sections at marker lines.
pub fn split_sections(text: &str) -> Vec<String> {
    let mut sections = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    for line in text.lines() {
        if starts_section(line) && !current.is_empty() {
            sections.push(current.join("\n"));
            current.clear();
        }
        current.push(line);
    }
    if !current.is_empty() {
        sections.push(current.join("\n"));
    }
    sections
}

/// A paragraph of a section: a maximal run of non-blank lines.
#[derive(Debug)]
enum Block {
    Table(String),
    Narrative(String),
}

fn blocks(section: &str) -> Vec<Block> {
    let mut blocks = Vec::new();
    let mut paragraph: Vec<&str> = Vec::new();
    for line in section.lines() {
        if line.trim().is_empty() {
            flush_paragraph(&mut paragraph, &mut blocks);
        } else {
            paragraph.push(line);
        }
    }
    flush_paragraph(&mut paragraph, &mut blocks);
    blocks
}

fn flush_paragraph(paragraph: &mut Vec<&str>, blocks: &mut Vec<Block>) {
    if paragraph.is_empty() {
        return;
    }
    let text = paragraph.join("\n");
    paragraph.clear();
    if CURRENCY_RE.is_match(&text) {
        blocks.push(Block::Table(text));
    } else {
        blocks.push(Block::Narrative(text));
    }
}

/// Chunks PDF text without ever splitting a table paragraph.
pub struct PdfChunker {
    packer: TokenPacker,
}

impl PdfChunker {
    pub fn new(packer: TokenPacker) -> Self {
        Self { packer }
    }

    pub fn chunk(&self, content: &str) -> Vec<String> {
        let normalized = normalize(content);
        let mut chunks = Vec::new();
        for section in split_sections(&normalized) {
            let mut narrative: Vec<String> = Vec::new();
            for block in blocks(&section) {
                match block {
                    Block::Narrative(text) => narrative.push(text),
                    Block::Table(text) => {
                        self.flush_narrative(&mut narrative, &mut chunks);
                        chunks.push(text);
                    }
                }
            }
            self.flush_narrative(&mut narrative, &mut chunks);
        }
        chunks
    }

    fn flush_narrative(&self, narrative: &mut Vec<String>, chunks: &mut Vec<String>) {
        if narrative.is_empty() {
            return;
        }
        let text = narrative.join("\n\n");
        narrative.clear();
        chunks.extend(
            self.packer
                .pack(&text)
                .into_iter()
                .map(|piece| piece.trim().to_string())
                .filter(|piece| !piece.is_empty()),
        );
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::tokenizer::WhitespaceTokenizer;

    fn chunker(budget: usize) -> PdfChunker {
        PdfChunker::new(TokenPacker::new(budget, Arc::new(WhitespaceTokenizer)))
    }

    #[test]
    fn test_normalize_artifacts() {
        let raw = "Intro\nApple Inc. | Q3 2024 Form 10-Q | 12\nNet sales $   1,234,567 rose\u{7}  sharply\n\n\n\nEnd";
        assert_eq!(normalize(raw), "Intro\nNet sales $ 1234567 rose sharply\n\nEnd");
    }

    #[test]
    fn test_section_markers_are_case_insensitive() {
        let text = "preface\n  Item 2. Management's Discussion\nbody\nNOTES TO CONSOLIDATED FINANCIAL STATEMENTS\nnote body";
        let sections = split_sections(text);
        assert_eq!(sections.len(), 3);
        assert!(sections[1].starts_with("  Item 2."));
        assert!(sections[2].starts_with("NOTES TO"));
    }

    #[test]
    fn test_currency_row_never_split() {
        let content = "CONSOLIDATED STATEMENTS OF OPERATIONS\nThe company reports quarterly. Results vary by segment. Demand was strong.\n\nRevenue $ 1,234\nCost of sales $ 567\n\nMore narrative follows here. It keeps going for a while.";
        let chunks = chunker(3).chunk(content);
        let holding: Vec<_> = chunks.iter().filter(|c| c.contains("Revenue")).collect();
        assert_eq!(holding.len(), 1);
        assert_eq!(holding[0], "Revenue $ 1234\nCost of sales $ 567");
        assert!(chunks.len() > 3);
    }

    #[test]
    fn test_table_kept_whole_regardless_of_budget() {
        let content = "Net sales $ 100 $ 200 $ 300 $ 400 $ 500 $ 600 $ 700 $ 800";
        let chunks = chunker(2).chunk(content);
        assert_eq!(chunks, vec![content.to_string()]);
    }

    #[test]
    fn test_narrative_only_section_is_packed() {
        let content = "PART I\nAlpha beta. Gamma delta. Epsilon zeta.";
        let chunks = chunker(3).chunk(content);
        assert!(chunks.len() >= 2);
        assert!(chunks.iter().all(|c| !c.contains('$')));
    }
}
