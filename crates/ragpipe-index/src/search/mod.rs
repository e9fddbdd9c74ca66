//! Retrieval backends behind one contract.
//!
//! Every backend is fitted once over a chunk corpus and then answers
//! `search(query, top_k, filter)` with [`SearchResult`]s whose scores are
//! similarities in [0, 1], ordered best-first. Ties keep corpus order.
//!
//! - [`tfidf::TfIdfBackend`]: sparse TF-IDF vectors, cosine similarity
//! - [`bm25::Bm25Backend`]: Okapi BM25 over stemmed, stop-word-filtered terms
//! - [`dense::DenseBackend`]: in-memory embeddings, cosine similarity
//! - [`vector_store::VectorStoreBackend`]: embeddings held by a vector store
//!
//! [`fuse_results`] merges a sparse and a dense result list for hybrid
//! retrieval.

pub mod bm25;
pub mod dense;
pub mod tfidf;
pub mod vector_store;

pub use bm25::{Bm25Backend, BM25Index};
pub use dense::DenseBackend;
pub use tfidf::TfIdfBackend;
pub use vector_store::{point_id, VectorHit, VectorPoint, VectorStore, VectorStoreBackend};

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::{round_score, Chunk, ChunkType, FileType, SearchResult};

/// A retrieval strategy over a fitted chunk corpus.
#[async_trait]
pub trait SearchBackend: Send + Sync {
    /// Short identifier used in logs and errors.
    fn name(&self) -> &str;

    /// Build the backend's index over `corpus`, replacing any previous one.
    async fn fit(&mut self, corpus: Vec<Chunk>) -> Result<()>;

    /// Up to `top_k` chunks most similar to `query`, best first.
    ///
    /// Fails with [`SearchError::NotFitted`](crate::SearchError::NotFitted)
    /// when called before [`fit`](Self::fit).
    async fn search(
        &self,
        query: &str,
        top_k: usize,
        filter: Option<&SearchFilter>,
    ) -> Result<Vec<SearchResult>>;
}

/// Constraints a chunk must satisfy to be returned. All set fields must match.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_type: Option<FileType>,
    /// Exact source match
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_prefix: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_type: Option<ChunkType>,
}

impl SearchFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file_type(mut self, file_type: FileType) -> Self {
        self.file_type = Some(file_type);
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_source_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.source_prefix = Some(prefix.into());
        self
    }

    pub fn with_doc_id(mut self, doc_id: impl Into<String>) -> Self {
        self.doc_id = Some(doc_id.into());
        self
    }

    pub fn with_chunk_type(mut self, chunk_type: ChunkType) -> Self {
        self.chunk_type = Some(chunk_type);
        self
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn matches(&self, chunk: &Chunk) -> bool {
        self.file_type.map_or(true, |ft| chunk.file_type == ft)
            && self.source.as_deref().map_or(true, |s| chunk.source == s)
            && self
                .source_prefix
                .as_deref()
                .map_or(true, |p| chunk.source.starts_with(p))
            && self.doc_id.as_deref().map_or(true, |d| chunk.doc_id == d)
            && self
                .chunk_type
                .map_or(true, |ct| chunk.chunk_type == Some(ct))
    }
}

/// Whether `chunk` passes an optional filter.
pub(crate) fn passes(filter: Option<&SearchFilter>, chunk: &Chunk) -> bool {
    filter.map_or(true, |f| f.matches(chunk))
}

/// Turn `(corpus position, similarity)` pairs into the `top_k` best results.
///
/// Ordering uses the rounded score that is returned, so results whose
/// reported scores are equal keep corpus order.
pub(crate) fn rank(scored: Vec<(usize, f32)>, corpus: &[Chunk], top_k: usize) -> Vec<SearchResult> {
    let mut scored: Vec<(usize, f32)> = scored
        .into_iter()
        .map(|(idx, score)| (idx, round_score(score)))
        .collect();
    scored.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
    scored
        .into_iter()
        .take(top_k)
        .map(|(idx, score)| SearchResult::new(corpus[idx].clone(), score))
        .collect()
}

/// Stable best-first ordering of already scored results.
pub fn sort_by_score(results: &mut [SearchResult]) {
    results.sort_by(|a, b| b.score.total_cmp(&a.score));
}

/// Cosine similarity of two equal-length vectors, 0.0 when either is zero.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a <= f32::EPSILON || norm_b <= f32::EPSILON {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Merge sparse and dense results for hybrid retrieval.
///
/// The lists are concatenated sparse-then-dense and deduplicated by
/// `chunk_id`. When a chunk appears twice, the later (dense) result replaces
/// the earlier one but keeps the earlier position.
pub fn fuse_results(sparse: Vec<SearchResult>, dense: Vec<SearchResult>) -> Vec<SearchResult> {
    let mut fused: Vec<SearchResult> = Vec::with_capacity(sparse.len() + dense.len());
    let mut positions: HashMap<String, usize> = HashMap::new();

    for result in sparse.into_iter().chain(dense) {
        match positions.get(result.chunk_id()).copied() {
            Some(pos) => fused[pos] = result,
            None => {
                positions.insert(result.chunk_id().to_string(), fused.len());
                fused.push(result);
            }
        }
    }

    fused
}
