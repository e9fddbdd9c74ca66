//! Dense retrieval over embeddings held in memory.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use super::{cosine_similarity, passes, rank, SearchBackend, SearchFilter};
use crate::embeddings::{batch_embed, embed_query, BatchPolicy, EmbeddingProvider, InputType};
use crate::error::{Result, SearchError};
use crate::types::{Chunk, SearchResult};

struct FittedDense {
    corpus: Vec<Chunk>,
    vectors: Vec<Vec<f32>>,
}

/// Embeds every chunk's `text` at fit time and ranks by cosine similarity.
pub struct DenseBackend {
    provider: Arc<dyn EmbeddingProvider>,
    policy: BatchPolicy,
    fitted: Option<FittedDense>,
}

impl DenseBackend {
    pub fn new(provider: Arc<dyn EmbeddingProvider>, policy: BatchPolicy) -> Self {
        Self {
            provider,
            policy,
            fitted: None,
        }
    }
}

#[async_trait]
impl SearchBackend for DenseBackend {
    fn name(&self) -> &str {
        "dense"
    }

    async fn fit(&mut self, corpus: Vec<Chunk>) -> Result<()> {
        let texts: Vec<String> = corpus.iter().map(|c| c.text.clone()).collect();
        info!(
            chunks = texts.len(),
            model = self.provider.model_name(),
            "Embedding corpus"
        );
        let vectors = batch_embed(
            self.provider.as_ref(),
            &texts,
            InputType::Passage,
            &self.policy,
        )
        .await?;
        self.fitted = Some(FittedDense { corpus, vectors });
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

        let query_vector = embed_query(self.provider.as_ref(), query, &self.policy).await?;
        if let Some(v) = fitted.vectors.iter().find(|v| v.len() != query_vector.len()) {
            return Err(SearchError::Upstream(format!(
                "query embedding has {} dimensions but the corpus was embedded with {}",
                query_vector.len(),
                v.len()
            )));
        }

        let scored = fitted
            .vectors
            .iter()
            .enumerate()
            .filter(|(idx, _)| passes(filter, &fitted.corpus[*idx]))
            .map(|(idx, v)| (idx, cosine_similarity(&query_vector, v).clamp(0.0, 1.0)))
            .collect();

        let results = rank(scored, &fitted.corpus, top_k);
        debug!(results = results.len(), "Dense search complete");
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::HashingEmbeddings;
    use crate::search::test_support::chunk;

    fn backend() -> DenseBackend {
        DenseBackend::new(
            Arc::new(HashingEmbeddings::new(256)),
            BatchPolicy {
                batch_size: 2,
                delay: std::time::Duration::ZERO,
                ..BatchPolicy::default()
            },
        )
    }

    #[tokio::test]
    async fn test_search_before_fit() {
        let err = backend().search("q", 1, None).await.unwrap_err();
        assert!(matches!(err, SearchError::NotFitted { backend } if backend == "dense"));
    }

    #[tokio::test]
    async fn test_dimension_change_is_an_error() {
        let mut backend = backend();
        backend
            .fit(vec![chunk("a.md", "cash flow"), chunk("b.md", "dividends")])
            .await
            .unwrap();
        backend.provider = Arc::new(HashingEmbeddings::new(128));

        let err = backend.search("cash", 2, None).await.unwrap_err();
        match err {
            SearchError::Upstream(msg) => assert!(msg.contains("128") && msg.contains("256"), "{msg}"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_dense_ranking() {
        let mut backend = backend();
        backend
            .fit(vec![
                chunk("a.md", "cash flow from operations"),
                chunk("b.md", "board of directors"),
                chunk("c.md", "cash flow statement"),
            ])
            .await
            .unwrap();

        let results = backend.search("cash flow statement", 3, None).await.unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].chunk.source, "c.md");
        assert_eq!(results[0].score, 1.0);
        assert!(results.windows(2).all(|w| w[0].score >= w[1].score));
        assert!(results.iter().all(|r| (0.0..=1.0).contains(&r.score)));
    }

    #[tokio::test]
    async fn test_dense_filter() {
        let mut backend = backend();
        backend
            .fit(vec![chunk("a.md", "alpha beta"), chunk("b.md", "alpha gamma")])
            .await
            .unwrap();
        let filter = SearchFilter::new().with_source("b.md");
        let results = backend.search("alpha beta", 5, Some(&filter)).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].chunk.source, "b.md");
    }
}
