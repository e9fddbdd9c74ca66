//! Content-aware chunking.
//!
//! [`ChunkRouter`] dispatches each [`Document`] to the chunker for its file
//! type and turns the resulting drafts into canonical [`Chunk`] records with
//! content-derived identifiers:
//! - source code: [`code::CodeChunker`] (tree-sitter, Python)
//! - markdown and notebooks: [`prose::MarkdownChunker`]
//! - PDF text: [`pdf::PdfChunker`]
//!
//! All of them pack their output with [`packer::TokenPacker`].

pub mod code;
pub mod packer;
pub mod pdf;
pub mod prose;

use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{Result, SearchError};
use crate::tokenizer::Tokenizer;
use crate::types::{content_hash, Chunk, ChunkContext, ChunkType, Document, FileType};

pub use code::CodeChunker;
pub use packer::TokenPacker;
pub use pdf::PdfChunker;
pub use prose::MarkdownChunker;

/// Default token budget per chunk.
pub const DEFAULT_CHUNK_SIZE: usize = 500;

/// A chunk before it is assigned identifiers.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkDraft {
    pub chunk: String,
    pub text: String,
    pub chunk_type: Option<ChunkType>,
    pub context: Option<ChunkContext>,
}

impl ChunkDraft {
    fn prose(chunk: String, text: String) -> Self {
        Self {
            chunk,
            text,
            chunk_type: None,
            context: None,
        }
    }
}

/// What to do with a document whose content cannot be parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MalformedPolicy {
    /// Fail the whole run on the first malformed document
    #[default]
    Abort,
    /// Log the document at warn level and continue
    Skip,
}

impl FromStr for MalformedPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "abort" => Ok(Self::Abort),
            "skip" => Ok(Self::Skip),
            other => Err(format!("unknown malformed-document policy '{}'", other)),
        }
    }
}

/// Chunking parameters.
#[derive(Debug, Clone, Copy)]
pub struct ChunkingConfig {
    /// Token budget per chunk
    pub chunk_size: usize,
    pub on_malformed: MalformedPolicy,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            on_malformed: MalformedPolicy::default(),
        }
    }
}

/// Routes documents to the chunker matching their declared type.
pub struct ChunkRouter {
    code: CodeChunker,
    markdown: MarkdownChunker,
    pdf: PdfChunker,
    on_malformed: MalformedPolicy,
}

impl ChunkRouter {
    pub fn new(config: ChunkingConfig, tokenizer: Arc<dyn Tokenizer>) -> Self {
        let packer = TokenPacker::new(config.chunk_size, tokenizer);
        Self {
            code: CodeChunker::new(packer.clone()),
            markdown: MarkdownChunker::new(packer.clone()),
            pdf: PdfChunker::new(packer),
            on_malformed: config.on_malformed,
        }
    }

    /// What happens to documents that cannot be loaded or parsed.
    pub fn on_malformed(&self) -> MalformedPolicy {
        self.on_malformed
    }

    /// Chunk one document. Identical content always yields identical chunks.
    pub fn chunk_document(&self, document: &Document) -> Result<Vec<Chunk>> {
        let source = document.source();
        let drafts = match document.file_type {
            FileType::SourceCode => self.code.chunk(&document.content, source)?,
            FileType::Notebook => self
                .markdown
                .chunk_notebook(&document.content, source)?
                .into_iter()
                .map(|chunk| ChunkDraft::prose(chunk.clone(), chunk))
                .collect(),
            FileType::Pdf => self
                .pdf
                .chunk(&document.content)
                .into_iter()
                .map(|chunk| {
                    let text = pdf::normalize(&chunk);
                    ChunkDraft::prose(chunk, text)
                })
                .collect(),
            FileType::Markdown => self
                .markdown
                .chunk(&document.content)
                .into_iter()
                .map(|chunk| {
                    let text = prose::markdown_to_plain(&chunk);
                    ChunkDraft::prose(chunk, text)
                })
                .collect(),
        };

        let doc_id = content_hash(&document.content);
        let chunks: Vec<Chunk> = drafts
            .into_iter()
            .enumerate()
            .map(|(chunk_number, draft)| Chunk {
                chunk_id: content_hash(&draft.chunk),
                doc_id: doc_id.clone(),
                chunk_number,
                source: source.to_string(),
                file_type: document.file_type,
                chunk_type: draft.chunk_type,
                context: draft.context,
                metadata: document.metadata.clone(),
                chunk: draft.chunk,
                text: draft.text,
            })
            .collect();

        debug!(
            source,
            file_type = document.file_type.as_str(),
            chunks = chunks.len(),
            "Chunked document"
        );
        Ok(chunks)
    }

    /// Chunk a whole dataset, applying the malformed-document policy.
    pub fn chunk_documents(&self, documents: &[Document]) -> Result<Vec<Chunk>> {
        let mut all_chunks = Vec::new();
        let mut skipped = 0usize;
        for document in documents {
            match self.chunk_document(document) {
                Ok(chunks) => all_chunks.extend(chunks),
                Err(err @ SearchError::MalformedDocument { .. })
                    if self.on_malformed == MalformedPolicy::Skip =>
                {
                    warn!("Skipping document: {}", err);
                    skipped += 1;
                }
                Err(err) => return Err(err),
            }
        }
        info!(
            documents = documents.len(),
            skipped,
            chunks = all_chunks.len(),
            "Chunked dataset"
        );
        Ok(all_chunks)
    }
}
