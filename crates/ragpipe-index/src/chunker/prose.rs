//! Heading-based chunking for markdown and Jupyter notebooks.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;

use super::packer::TokenPacker;
use crate::error::{Result, SearchError};

static FRONT_MATTER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)\A---[ \t]*\r?\n.*?\n---[ \t]*(\r?\n|\z)").unwrap());
static IMAGE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"!\[([^\]]*)\]\([^)]*\)").unwrap());
static LINK_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[([^\]]*)\]\([^)]*\)").unwrap());
static HTML_TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"</?[A-Za-z][^>]*>").unwrap());
static HEADING_MARK_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^ {0,3}#{1,6}[ \t]*").unwrap());
static QUOTE_MARK_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^ {0,3}>[ \t]?").unwrap());
static EMPHASIS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\*\*|\*|`)").unwrap());

/// Splits markdown into heading-delimited sections and packs each section.
pub struct MarkdownChunker {
    packer: TokenPacker,
}

impl MarkdownChunker {
    pub fn new(packer: TokenPacker) -> Self {
        Self { packer }
    }

    pub fn chunk(&self, markdown: &str) -> Vec<String> {
        split_sections(markdown)
            .iter()
            .flat_map(|section| self.packer.pack(section))
            .collect()
    }

    /// Convert a notebook to markdown, then chunk it like any markdown file.
    pub fn chunk_notebook(&self, notebook: &str, document: &str) -> Result<Vec<String>> {
        let markdown = notebook_to_markdown(notebook, document)?;
        Ok(self.chunk(&markdown))
    }
}

fn is_fence(line: &str) -> bool {
    let trimmed = line.trim_start_matches(' ');
    line.len() - trimmed.len() <= 3 && (trimmed.starts_with("```") || trimmed.starts_with("~~~"))
}

fn is_atx_heading(line: &str) -> bool {
    let trimmed = line.trim_start_matches(' ');
    if line.len() - trimmed.len() > 3 {
        return false;
    }
    let hashes = trimmed.chars().take_while(|c| *c == '#').count();
    if !(1..=6).contains(&hashes) {
        return false;
    }
    let rest = &trimmed[hashes..];
    rest.is_empty() || rest.starts_with(char::is_whitespace)
}

/// Sections starting at each ATX heading outside fenced code. Text before the
/// first heading is dropped.
pub fn split_sections(markdown: &str) -> Vec<String> {
    let mut sections = Vec::new();
    let mut current: Option<String> = None;
    let mut in_fence = false;

    for line in markdown.split_inclusive('\n') {
        if is_fence(line) {
            in_fence = !in_fence;
        } else if !in_fence && is_atx_heading(line) {
            if let Some(section) = current.take() {
                push_section(&mut sections, section);
            }
            current = Some(String::new());
        }
        if let Some(section) = current.as_mut() {
            section.push_str(line);
        }
    }
    if let Some(section) = current {
        push_section(&mut sections, section);
    }
    sections
}

fn push_section(sections: &mut Vec<String>, section: String) {
    let trimmed = section.trim();
    if !trimmed.is_empty() {
        sections.push(trimmed.to_string());
    }
}

/// Plain-text rendering of a markdown chunk, used as its embedding text.
pub fn markdown_to_plain(markdown: &str) -> String {
    let text = FRONT_MATTER_RE.replace(markdown, "");
    let text: String = text
        .split_inclusive('\n')
        .filter(|line| !is_fence(line))
        .collect();
    let text = IMAGE_RE.replace_all(&text, "$1");
    let text = LINK_RE.replace_all(&text, "$1");
    let text = HTML_TAG_RE.replace_all(&text, "");
    let text = HEADING_MARK_RE.replace_all(&text, "");
    let text = QUOTE_MARK_RE.replace_all(&text, "");
    let text = EMPHASIS_RE.replace_all(&text, "");
    text.trim().to_string()
}

#[derive(Debug, Deserialize)]
struct Notebook {
    #[serde(default)]
    cells: Vec<Cell>,
    #[serde(default)]
    metadata: Value,
}

#[derive(Debug, Deserialize)]
struct Cell {
    cell_type: String,
    #[serde(default)]
    source: CellSource,
}

/// nbformat allows a cell source to be one string or a list of lines.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CellSource {
    Text(String),
    Lines(Vec<String>),
}

impl Default for CellSource {
    fn default() -> Self {
        Self::Text(String::new())
    }
}

impl CellSource {
    fn joined(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Lines(lines) => lines.concat(),
        }
    }
}

impl Notebook {
    fn language(&self) -> &str {
        self.metadata
            .pointer("/language_info/name")
            .or_else(|| self.metadata.pointer("/kernelspec/language"))
            .and_then(Value::as_str)
            .unwrap_or("python")
    }
}

/// Render an nbformat 4 notebook as markdown: narrative cells verbatim, code
/// cells fenced with the kernel language, outputs dropped.
pub fn notebook_to_markdown(notebook: &str, document: &str) -> Result<String> {
    let notebook: Notebook =
        serde_json::from_str(notebook).map_err(|e| SearchError::MalformedDocument {
            document: document.to_string(),
            reason: format!("invalid notebook JSON: {}", e),
        })?;

    let language = notebook.language();
    let mut blocks = Vec::with_capacity(notebook.cells.len());
    for cell in &notebook.cells {
        let source = cell.source.joined();
        let source = source.trim_end();
        if source.trim().is_empty() {
            continue;
        }
        match cell.cell_type.as_str() {
            "code" => blocks.push(format!("```{}\n{}\n```", language, source)),
            _ => blocks.push(source.to_string()),
        }
    }
    Ok(blocks.join("\n\n"))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::tokenizer::WhitespaceTokenizer;

    fn chunker(budget: usize) -> MarkdownChunker {
        MarkdownChunker::new(TokenPacker::new(budget, Arc::new(WhitespaceTokenizer)))
    }

    #[test]
    fn test_split_sections_drops_preamble() {
        let md = "intro text\n\n# First\nbody one\n## Second\nbody two\n";
        let sections = split_sections(md);
        assert_eq!(sections, vec!["# First\nbody one", "## Second\nbody two"]);
    }

    #[test]
    fn test_headings_inside_fences_do_not_split() {
        let md = "# Usage\n```bash\n# not a heading\nrun it\n```\nafter\n";
        let sections = split_sections(md);
        assert_eq!(sections.len(), 1);
        assert!(sections[0].contains("# not a heading"));
    }

    #[test]
    fn test_hashtag_without_space_is_not_heading() {
        assert!(!is_atx_heading("#hashtag\n"));
        assert!(is_atx_heading("### Title\n"));
        assert!(is_atx_heading("#\n"));
        assert!(!is_atx_heading("    # indented code\n"));
    }

    #[test]
    fn test_chunk_packs_long_sections() {
        let md = "# Notes\nOne two three. Four five six. Seven eight nine.\n";
        let chunks = chunker(5).chunk(md);
        assert!(chunks.len() > 1);
        assert!(chunks[0].starts_with("# Notes"));
        assert!(chunks.iter().all(|c| !c.trim().is_empty()));
    }

    #[test]
    fn test_document_without_heading_yields_nothing() {
        assert!(chunker(100).chunk("just a paragraph\n").is_empty());
    }

    #[test]
    fn test_markdown_to_plain() {
        let md = "## Install\nRun **pip** with `--upgrade`. See [the docs](https://x.io) and ![logo](a.png).\n> quoted";
        assert_eq!(
            markdown_to_plain(md),
            "Install\nRun pip with --upgrade. See the docs and logo.\nquoted"
        );
    }

    #[test]
    fn test_markdown_to_plain_strips_front_matter() {
        let md = "---\ntitle: Intro\n---\n# Hello\ntext";
        assert_eq!(markdown_to_plain(md), "Hello\ntext");
    }

    #[test]
    fn test_notebook_to_markdown() {
        let nb = r##"{
            "cells": [
                {"cell_type": "markdown", "source": ["# Title\n", "Some prose."]},
                {"cell_type": "code", "source": "import os\nprint(os.sep)", "outputs": [{"text": "/"}]},
                {"cell_type": "raw", "source": ""}
            ],
            "metadata": {"kernelspec": {"language": "python"}},
            "nbformat": 4
        }"##;
        let md = notebook_to_markdown(nb, "nb.ipynb").unwrap();
        assert_eq!(
            md,
            "# Title\nSome prose.\n\n```python\nimport os\nprint(os.sep)\n```"
        );
        assert!(!md.contains("outputs"));
    }

    #[test]
    fn test_invalid_notebook_is_malformed() {
        let err = chunker(100).chunk_notebook("{not json", "bad.ipynb").unwrap_err();
        assert!(matches!(err, SearchError::MalformedDocument { .. }));
    }
}
