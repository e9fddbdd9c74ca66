//! Documents, chunks and search results.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Passthrough metadata carried from a document onto each of its chunks.
/// Values are arbitrary JSON; only `source` is interpreted.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// The structure a document's content is expected to have.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileType {
    /// Python source code
    #[serde(alias = "python")]
    SourceCode,
    /// Jupyter notebook (nbformat 4 JSON)
    Notebook,
    /// PDF-extracted text
    Pdf,
    /// Markdown; also the fallback for unrecognised types
    #[serde(other)]
    Markdown,
}

impl FileType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SourceCode => "source_code",
            Self::Notebook => "notebook",
            Self::Markdown => "markdown",
            Self::Pdf => "pdf",
        }
    }
}

impl std::str::FromStr for FileType {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "source_code" | "python" => Self::SourceCode,
            "notebook" => Self::Notebook,
            "pdf" => Self::Pdf,
            _ => Self::Markdown,
        })
    }
}

/// A raw input document. Immutable once loaded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub content: String,
    pub file_type: FileType,
    #[serde(default)]
    pub metadata: Metadata,
}

impl Document {
    pub fn new(content: impl Into<String>, file_type: FileType, source: impl Into<String>) -> Self {
        let mut metadata = Metadata::new();
        metadata.insert("source".to_string(), serde_json::Value::String(source.into()));
        Self {
            content: content.into(),
            file_type,
            metadata,
        }
    }

    /// The document's `source` metadata entry, or `"unknown"`.
    pub fn source(&self) -> &str {
        self.metadata
            .get("source")
            .and_then(serde_json::Value::as_str)
            .unwrap_or("unknown")
    }
}

/// Kind of code element a chunk was cut from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkType {
    Class,
    Function,
    Method,
}

impl ChunkType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Class => "class",
            Self::Function => "function",
            Self::Method => "method",
        }
    }
}

/// Names a code chunk depends on that live outside its own text.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkContext {
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub imports: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub module_variables: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_class: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_function: Option<String>,
}

impl ChunkContext {
    pub fn is_empty(&self) -> bool {
        self.imports.is_empty()
            && self.module_variables.is_empty()
            && self.parent_class.is_none()
            && self.parent_function.is_none()
    }

    /// `Some(self)` when at least one field is set.
    pub fn into_option(self) -> Option<Self> {
        if self.is_empty() {
            None
        } else {
            Some(self)
        }
    }
}

/// An independently indexable fragment of one document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// Raw extracted text
    pub chunk: String,
    /// Normalized text used for embedding and lexical indexing
    pub text: String,
    /// Content hash of the whole source document
    pub doc_id: String,
    /// Content hash of `chunk`
    pub chunk_id: String,
    /// 0-based position within the document
    pub chunk_number: usize,
    pub source: String,
    pub file_type: FileType,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub chunk_type: Option<ChunkType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<ChunkContext>,
    #[serde(default, skip_serializing_if = "Metadata::is_empty")]
    pub metadata: Metadata,
}

/// A chunk returned by a search, with its similarity score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    #[serde(flatten)]
    pub chunk: Chunk,
    /// Similarity in [0, 1], rounded to 4 decimals. Higher is better.
    pub score: f32,
}

impl SearchResult {
    pub fn new(chunk: Chunk, score: f32) -> Self {
        Self {
            chunk,
            score: round_score(score),
        }
    }

    pub fn chunk_id(&self) -> &str {
        &self.chunk.chunk_id
    }
}

/// SHA-256 hex digest of `content`.
pub fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}

/// Clamp a similarity into [0, 1] and round it to 4 decimals.
pub fn round_score(score: f32) -> f32 {
    if !score.is_finite() {
        return 0.0;
    }
    (score.clamp(0.0, 1.0) * 10_000.0).round() / 10_000.0
}
