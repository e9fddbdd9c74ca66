//! TF-IDF vectors with cosine similarity.

use std::collections::HashMap;

use async_trait::async_trait;
use tracing::debug;

use super::{passes, rank, SearchBackend, SearchFilter};
use crate::error::{Result, SearchError};
use crate::types::{Chunk, SearchResult};

/// Lower-cased alphanumeric terms, underscores kept.
fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|s| s.len() > 1)
        .map(String::from)
        .collect()
}

type SparseVector = HashMap<usize, f32>;

struct FittedTfIdf {
    corpus: Vec<Chunk>,
    vocabulary: HashMap<String, usize>,
    idf: Vec<f32>,
    vectors: Vec<SparseVector>,
}

impl FittedTfIdf {
    /// L2-normalized tf * idf vector over the fitted vocabulary.
    fn vectorize(&self, text: &str) -> SparseVector {
        let mut counts: SparseVector = HashMap::new();
        for term in tokenize(text) {
            if let Some(&id) = self.vocabulary.get(&term) {
                *counts.entry(id).or_insert(0.0) += 1.0;
            }
        }
        for (id, weight) in counts.iter_mut() {
            *weight *= self.idf[*id];
        }
        let norm = counts.values().map(|w| w * w).sum::<f32>().sqrt();
        if norm > f32::EPSILON {
            for weight in counts.values_mut() {
                *weight /= norm;
            }
        }
        counts
    }
}

fn dot(a: &SparseVector, b: &SparseVector) -> f32 {
    let (small, large) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    small
        .iter()
        .filter_map(|(id, w)| large.get(id).map(|v| w * v))
        .sum()
}

/// Lexical backend over smoothed TF-IDF vectors.
///
/// IDF is `ln((1 + n) / (1 + df)) + 1`; document and query vectors are
/// L2-normalized so the dot product is the cosine similarity.
#[derive(Default)]
pub struct TfIdfBackend {
    fitted: Option<FittedTfIdf>,
}

impl TfIdfBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SearchBackend for TfIdfBackend {
    fn name(&self) -> &str {
        "tfidf"
    }

    async fn fit(&mut self, corpus: Vec<Chunk>) -> Result<()> {
        let tokenized: Vec<Vec<String>> = corpus.iter().map(|c| tokenize(&c.text)).collect();

        let mut vocabulary: HashMap<String, usize> = HashMap::new();
        let mut doc_freqs: Vec<usize> = Vec::new();
        for terms in &tokenized {
            let mut seen = std::collections::HashSet::new();
            for term in terms {
                let next_id = vocabulary.len();
                let id = *vocabulary.entry(term.clone()).or_insert(next_id);
                if id == doc_freqs.len() {
                    doc_freqs.push(0);
                }
                if seen.insert(id) {
                    doc_freqs[id] += 1;
                }
            }
        }

        let n = corpus.len() as f32;
        let idf = doc_freqs
            .iter()
            .map(|&df| ((1.0 + n) / (1.0 + df as f32)).ln() + 1.0)
            .collect();

        let mut fitted = FittedTfIdf {
            corpus: Vec::new(),
            vocabulary,
            idf,
            vectors: Vec::new(),
        };
        fitted.vectors = corpus.iter().map(|c| fitted.vectorize(&c.text)).collect();
        fitted.corpus = corpus;

        debug!(
            documents = fitted.corpus.len(),
            vocabulary = fitted.vocabulary.len(),
            "Fitted TF-IDF index"
        );
        self.fitted = Some(fitted);
        Ok(())
    }

    async fn search(
        &self,
        query: &str,
        top_k: usize,
        filter: Option<&SearchFilter>,
    ) -> Result<Vec<SearchResult>> {
        let fitted = self.fitted.as_ref().ok_or_else(|| SearchError::NotFitted {
            backend: self.name().to_string(),
        })?;

        let query_vector = fitted.vectorize(query);
        if query_vector.is_empty() {
            return Ok(Vec::new());
        }

        let scored = fitted
            .vectors
            .iter()
            .enumerate()
            .filter(|(idx, _)| passes(filter, &fitted.corpus[*idx]))
            .map(|(idx, vector)| (idx, dot(&query_vector, vector).clamp(0.0, 1.0)))
            .filter(|(_, score)| *score > 0.0)
            .collect();

        Ok(rank(scored, &fitted.corpus, top_k))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::test_support::chunk;

    async fn fitted() -> TfIdfBackend {
        let mut backend = TfIdfBackend::new();
        backend
            .fit(vec![
                chunk("a.md", "net revenue grew in the quarter"),
                chunk("b.md", "operating expenses were flat"),
                chunk("c.md", "revenue recognition policy"),
            ])
            .await
            .unwrap();
        backend
    }

    #[tokio::test]
    async fn test_search_before_fit() {
        let err = TfIdfBackend::new().search("revenue", 3, None).await.unwrap_err();
        assert!(matches!(err, SearchError::NotFitted { .. }));
    }

    #[tokio::test]
    async fn test_scores_are_similarities() {
        let backend = fitted().await;
        let results = backend.search("revenue recognition", 10, None).await.unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].chunk.source, "c.md");
        assert!(results.iter().all(|r| r.score > 0.0 && r.score <= 1.0));
        assert!(results[0].score >= results[1].score);
    }

    #[tokio::test]
    async fn test_identical_text_scores_one() {
        let backend = fitted().await;
        let results = backend
            .search("operating expenses were flat", 1, None)
            .await
            .unwrap();
        assert_eq!(results[0].score, 1.0);
    }

    #[tokio::test]
    async fn test_no_overlap_returns_nothing() {
        let backend = fitted().await;
        assert!(backend.search("dividends", 5, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_filter_applies_before_ranking() {
        let backend = fitted().await;
        let filter = SearchFilter::new().with_source("a.md");
        let results = backend.search("revenue", 1, Some(&filter)).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].chunk.source, "a.md");
    }
}
