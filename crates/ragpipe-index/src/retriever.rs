//! Query orchestration: breadth policy, hybrid fusion and reranking.
//!
//! The [`Orchestrator`] only knows backends through [`SearchBackend`], so any
//! strategy (or a test double) can be plugged in.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Result, SearchError};
use crate::reranker::{rerank_results, Reranker};
use crate::search::{fuse_results, sort_by_score, SearchBackend, SearchFilter};
use crate::types::{Chunk, SearchResult};

/// Breadth and final count used when the caller gives neither.
pub const DEFAULT_BREADTH: usize = 10;
pub const DEFAULT_FINAL_COUNT: usize = 5;

/// A query plus the caller's sizing hints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalRequest {
    pub query: String,
    /// Candidates retrieved before any rerank
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<usize>,
    /// Results returned to the caller
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_n: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<SearchFilter>,
}

impl RetrievalRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            top_k: None,
            top_n: None,
            filter: None,
        }
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = Some(top_k);
        self
    }

    pub fn with_top_n(mut self, top_n: usize) -> Self {
        self.top_n = Some(top_n);
        self
    }

    pub fn with_filter(mut self, filter: SearchFilter) -> Self {
        self.filter = Some(filter);
        self
    }
}

/// How many candidates to retrieve and how many to return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetrievalPlan {
    pub breadth: usize,
    pub final_count: usize,
}

impl RetrievalPlan {
    /// Derive the plan from optional `top_k` (breadth) and `top_n` (final
    /// count).
    ///
    /// | inputs   | (breadth, final) |
    /// |----------|------------------|
    /// | k only   | (2k, k)          |
    /// | n only   | (2n, n)          |
    /// | k == n   | (2k, k)          |
    /// | neither  | (10, 5)          |
    /// | k > n    | (k, n)           |
    ///
    /// With both given and `k > n` the caller's values are kept as-is; they
    /// are never replaced by the (10, 5) defaults. `k < n` and zero values
    /// are rejected with [`SearchError::PolicyViolation`].
    pub fn derive(top_k: Option<usize>, top_n: Option<usize>) -> Result<Self> {
        if top_k == Some(0) || top_n == Some(0) {
            return Err(SearchError::PolicyViolation(
                "top_k and top_n must be positive".to_string(),
            ));
        }

        let (breadth, final_count) = match (top_k, top_n) {
            (None, None) => (DEFAULT_BREADTH, DEFAULT_FINAL_COUNT),
            (Some(k), None) => (k.saturating_mul(2), k),
            (None, Some(n)) => (n.saturating_mul(2), n),
            (Some(k), Some(n)) if k == n => (k.saturating_mul(2), k),
            (Some(k), Some(n)) if k > n => (k, n),
            (Some(k), Some(n)) => {
                return Err(SearchError::PolicyViolation(format!(
                    "top_k ({}) must not be smaller than top_n ({})",
                    k, n
                )))
            }
        };

        Ok(Self {
            breadth,
            final_count,
        })
    }
}

/// Which backends answer a query.
pub enum Retrieval {
    Single(Box<dyn SearchBackend>),
    /// Sparse results come first in the fused list, dense results second.
    Hybrid {
        sparse: Box<dyn SearchBackend>,
        dense: Box<dyn SearchBackend>,
    },
}

/// Composes backends with optional fusion and reranking.
pub struct Orchestrator {
    retrieval: Retrieval,
    reranker: Option<Arc<dyn Reranker>>,
}

impl Orchestrator {
    pub fn single(backend: Box<dyn SearchBackend>) -> Self {
        Self {
            retrieval: Retrieval::Single(backend),
            reranker: None,
        }
    }

    pub fn hybrid(sparse: Box<dyn SearchBackend>, dense: Box<dyn SearchBackend>) -> Self {
        Self {
            retrieval: Retrieval::Hybrid { sparse, dense },
            reranker: None,
        }
    }

    pub fn with_reranker(mut self, reranker: Arc<dyn Reranker>) -> Self {
        self.reranker = Some(reranker);
        self
    }

    pub fn has_reranker(&self) -> bool {
        self.reranker.is_some()
    }

    /// Human-readable description of the configured backends, e.g.
    /// `bm25+dense`.
    pub fn describe(&self) -> String {
        match &self.retrieval {
            Retrieval::Single(backend) => backend.name().to_string(),
            Retrieval::Hybrid { sparse, dense } => format!("{}+{}", sparse.name(), dense.name()),
        }
    }

    /// Fit every configured backend over the same corpus.
    pub async fn fit(&mut self, corpus: Vec<Chunk>) -> Result<()> {
        info!(chunks = corpus.len(), backends = %self.describe(), "Fitting retrieval backends");
        match &mut self.retrieval {
            Retrieval::Single(backend) => backend.fit(corpus).await,
            Retrieval::Hybrid { sparse, dense } => {
                sparse.fit(corpus.clone()).await?;
                dense.fit(corpus).await
            }
        }
    }

    /// Answer `request` according to the derived [`RetrievalPlan`].
    pub async fn retrieve(&self, request: &RetrievalRequest) -> Result<Vec<SearchResult>> {
        let plan = RetrievalPlan::derive(request.top_k, request.top_n)?;
        let filter = request.filter.as_ref();
        debug!(
            query = %request.query,
            breadth = plan.breadth,
            final_count = plan.final_count,
            rerank = self.reranker.is_some(),
            "Retrieving"
        );

        let results = match (&self.retrieval, &self.reranker) {
            (Retrieval::Single(backend), None) => {
                backend
                    .search(&request.query, plan.final_count, filter)
                    .await?
            }
            (Retrieval::Single(backend), Some(reranker)) => {
                let candidates = backend.search(&request.query, plan.breadth, filter).await?;
                rerank_results(reranker.as_ref(), &request.query, candidates, plan.final_count)
                    .await?
            }
            (Retrieval::Hybrid { sparse, dense }, reranker) => {
                let (sparse_hits, dense_hits) = tokio::try_join!(
                    sparse.search(&request.query, plan.breadth, filter),
                    dense.search(&request.query, plan.breadth, filter),
                )?;
                let fused = fuse_results(sparse_hits, dense_hits);
                debug!(fused = fused.len(), "Fused sparse and dense results");
                match reranker {
                    Some(reranker) => {
                        rerank_results(reranker.as_ref(), &request.query, fused, plan.final_count)
                            .await?
                    }
                    None => {
                        let mut fused = fused;
                        sort_by_score(&mut fused);
                        fused.truncate(plan.final_count);
                        fused
                    }
                }
            }
        };

        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::reranker::RerankScore;
    use crate::search::test_support::chunk;

    /// Returns canned results, truncated to `top_k`, and records each `top_k`.
    struct CannedBackend {
        name: &'static str,
        results: Vec<SearchResult>,
        fitted: bool,
        requested: Arc<Mutex<Vec<usize>>>,
    }

    impl CannedBackend {
        fn new(name: &'static str, hits: &[(&str, f32)]) -> Self {
            Self {
                name,
                results: hits
                    .iter()
                    .map(|(text, score)| SearchResult::new(chunk(name, text), *score))
                    .collect(),
                fitted: true,
                requested: Arc::new(Mutex::new(Vec::new())),
            }
        }
    }

    #[async_trait]
    impl SearchBackend for CannedBackend {
        fn name(&self) -> &str {
            self.name
        }

        async fn fit(&mut self, _corpus: Vec<Chunk>) -> Result<()> {
            self.fitted = true;
            Ok(())
        }

        async fn search(
            &self,
            _query: &str,
            top_k: usize,
            _filter: Option<&SearchFilter>,
        ) -> Result<Vec<SearchResult>> {
            if !self.fitted {
                return Err(SearchError::NotFitted {
                    backend: self.name.to_string(),
                });
            }
            self.requested.lock().unwrap().push(top_k);
            Ok(self.results.iter().take(top_k).cloned().collect())
        }
    }

    /// Reverses candidate order with descending scores.
    struct ReverseReranker;

    #[async_trait]
    impl Reranker for ReverseReranker {
        async fn rerank(&self, _: &str, documents: &[String], top_n: usize) -> Result<Vec<RerankScore>> {
            Ok((0..documents.len())
                .rev()
                .take(top_n)
                .enumerate()
                .map(|(rank, index)| RerankScore {
                    index,
                    score: 1.0 - rank as f32 * 0.1,
                })
                .collect())
        }
    }

    fn texts(results: &[SearchResult]) -> Vec<&str> {
        results.iter().map(|r| r.chunk.text.as_str()).collect()
    }

    #[test]
    fn test_derive_table() {
        let plan = |k, n| RetrievalPlan::derive(k, n).map(|p| (p.breadth, p.final_count));
        assert_eq!(plan(Some(5), None).unwrap(), (10, 5));
        assert_eq!(plan(None, Some(4)).unwrap(), (8, 4));
        assert_eq!(plan(Some(6), Some(6)).unwrap(), (12, 6));
        assert_eq!(plan(None, None).unwrap(), (10, 5));
        assert_eq!(plan(Some(20), Some(5)).unwrap(), (20, 5));
    }

    #[test]
    fn test_derive_rejects_invalid() {
        assert!(matches!(
            RetrievalPlan::derive(Some(3), Some(5)),
            Err(SearchError::PolicyViolation(_))
        ));
        assert!(matches!(
            RetrievalPlan::derive(Some(0), None),
            Err(SearchError::PolicyViolation(_))
        ));
        assert!(matches!(
            RetrievalPlan::derive(None, Some(0)),
            Err(SearchError::PolicyViolation(_))
        ));
    }

    #[tokio::test]
    async fn test_single_without_reranker_searches_final_count() {
        let backend = CannedBackend::new("bm25", &[("a", 0.9), ("b", 0.8), ("c", 0.7)]);
        let requested = backend.requested.clone();
        let orchestrator = Orchestrator::single(Box::new(backend));

        let results = orchestrator
            .retrieve(&RetrievalRequest::new("q").with_top_k(2))
            .await
            .unwrap();

        assert_eq!(texts(&results), vec!["a", "b"]);
        assert_eq!(*requested.lock().unwrap(), vec![2]);
    }

    #[tokio::test]
    async fn test_single_with_reranker_searches_breadth() {
        let backend = CannedBackend::new("tfidf", &[("a", 0.9), ("b", 0.8), ("c", 0.7)]);
        let requested = backend.requested.clone();
        let orchestrator =
            Orchestrator::single(Box::new(backend)).with_reranker(Arc::new(ReverseReranker));

        let results = orchestrator
            .retrieve(&RetrievalRequest::new("q").with_top_n(2))
            .await
            .unwrap();

        assert_eq!(*requested.lock().unwrap(), vec![4]);
        assert_eq!(texts(&results), vec!["c", "b"]);
        assert_eq!(results[0].score, 1.0);
        assert_eq!(results[1].score, 0.9);
    }

    #[tokio::test]
    async fn test_hybrid_fuses_and_dedupes() {
        let sparse = CannedBackend::new("bm25", &[("A", 0.9), ("B", 0.5), ("C", 0.4)]);
        let mut dense = CannedBackend::new("dense", &[("B", 0.8), ("D", 0.7)]);
        // Same chunk_id as the sparse copy, different source.
        dense.results[0].chunk.doc_id = "dense-doc".to_string();
        let orchestrator = Orchestrator::hybrid(Box::new(sparse), Box::new(dense));

        let results = orchestrator
            .retrieve(&RetrievalRequest::new("q").with_top_k(10))
            .await
            .unwrap();

        assert_eq!(results.len(), 4);
        assert_eq!(texts(&results), vec!["A", "B", "D", "C"]);
        let b = results.iter().find(|r| r.chunk.text == "B").unwrap();
        assert_eq!(b.chunk.doc_id, "dense-doc");
        assert_eq!(b.chunk.source, "dense");
        assert_eq!(b.score, 0.8);
    }

    #[tokio::test]
    async fn test_hybrid_with_reranker_bounds_output() {
        let sparse = CannedBackend::new("bm25", &[("A", 0.9), ("B", 0.5), ("C", 0.4)]);
        let dense = CannedBackend::new("dense", &[("B", 0.8), ("D", 0.7)]);
        let orchestrator = Orchestrator::hybrid(Box::new(sparse), Box::new(dense))
            .with_reranker(Arc::new(ReverseReranker));
        assert_eq!(orchestrator.describe(), "bm25+dense");

        let results = orchestrator
            .retrieve(&RetrievalRequest::new("q").with_top_k(6).with_top_n(3))
            .await
            .unwrap();

        // Fused order is A, B, C, D; the reranker reverses it.
        assert_eq!(texts(&results), vec!["D", "C", "B"]);
    }

    #[tokio::test]
    async fn test_policy_violation_before_search() {
        let backend = CannedBackend::new("bm25", &[("a", 0.9)]);
        let requested = backend.requested.clone();
        let orchestrator = Orchestrator::single(Box::new(backend));

        let err = orchestrator
            .retrieve(&RetrievalRequest::new("q").with_top_k(2).with_top_n(3))
            .await
            .unwrap_err();
        assert!(matches!(err, SearchError::PolicyViolation(_)));
        assert!(requested.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_not_fitted_propagates() {
        let mut backend = CannedBackend::new("dense", &[]);
        backend.fitted = false;
        let mut orchestrator = Orchestrator::single(Box::new(backend));

        let err = orchestrator.retrieve(&RetrievalRequest::new("q")).await.unwrap_err();
        assert!(matches!(err, SearchError::NotFitted { .. }));

        orchestrator.fit(vec![chunk("a.md", "x")]).await.unwrap();
        assert!(orchestrator.retrieve(&RetrievalRequest::new("q")).await.is_ok());
    }
}
