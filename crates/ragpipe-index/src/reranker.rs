//! Cross-encoder reranking of retrieved candidates.
//!
//! A [`Reranker`] scores `(query, document)` pairs and returns the best
//! `top_n` as indices into the documents it was given. [`rerank_results`] is
//! the pipeline stage that applies those indices back onto search results.

use std::collections::HashSet;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::embeddings::{error_from_response, PINECONE_API_VERSION};
use crate::error::{Result, SearchError};
use crate::types::{round_score, SearchResult};

/// One reranked document: its index in the request and its relevance.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct RerankScore {
    pub index: usize,
    pub score: f32,
}

/// Trait for cross-encoder rerankers.
#[async_trait]
pub trait Reranker: Send + Sync {
    /// Score `documents` against `query`, best first, at most `top_n` entries.
    async fn rerank(&self, query: &str, documents: &[String], top_n: usize)
        -> Result<Vec<RerankScore>>;
}

#[async_trait]
impl<R: Reranker + ?Sized> Reranker for std::sync::Arc<R> {
    async fn rerank(
        &self,
        query: &str,
        documents: &[String],
        top_n: usize,
    ) -> Result<Vec<RerankScore>> {
        (**self).rerank(query, documents, top_n).await
    }
}

/// Reorder `candidates` by reranker relevance and keep at most `final_count`.
///
/// Each kept result gets the reranker's score; every other field is left
/// untouched. An empty candidate set returns immediately without calling
/// the reranker.
pub async fn rerank_results<R: Reranker + ?Sized>(
    reranker: &R,
    query: &str,
    candidates: Vec<SearchResult>,
    final_count: usize,
) -> Result<Vec<SearchResult>> {
    if candidates.is_empty() || final_count == 0 {
        return Ok(Vec::new());
    }

    let documents: Vec<String> = candidates.iter().map(|c| c.chunk.text.clone()).collect();
    let scores = reranker.rerank(query, &documents, final_count).await?;
    debug!(
        candidates = candidates.len(),
        returned = scores.len(),
        "Reranked candidates"
    );

    let mut slots: Vec<Option<SearchResult>> = candidates.into_iter().map(Some).collect();
    let mut seen = HashSet::new();
    let mut reranked = Vec::with_capacity(final_count.min(slots.len()));
    for RerankScore { index, score } in scores {
        if reranked.len() == final_count {
            break;
        }
        if !seen.insert(index) {
            continue;
        }
        let mut result = slots
            .get_mut(index)
            .and_then(Option::take)
            .ok_or_else(|| {
                SearchError::Upstream(format!(
                    "reranker returned index {} for {} documents",
                    index,
                    documents.len()
                ))
            })?;
        result.score = round_score(score);
        reranked.push(result);
    }

    Ok(reranked)
}

#[derive(Serialize)]
struct RerankRequest<'a> {
    model: &'a str,
    query: &'a str,
    documents: Vec<RerankDocument<'a>>,
    top_n: usize,
    return_documents: bool,
    parameters: RerankParameters,
}

#[derive(Serialize)]
struct RerankDocument<'a> {
    text: &'a str,
}

#[derive(Serialize)]
struct RerankParameters {
    truncate: &'static str,
}

#[derive(Deserialize)]
struct RerankResponse {
    data: Vec<RerankScore>,
}

/// Pinecone inference rerank API (bge-reranker-v2-m3 by default).
pub struct PineconeReranker {
    client: Client,
    base_url: String,
    model: String,
    api_key: String,
}

impl PineconeReranker {
    pub fn new(api_key: String, model: Option<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: "https://api.pinecone.io/rerank".to_string(),
            model: model.unwrap_or_else(|| "bge-reranker-v2-m3".to_string()),
            api_key,
        }
    }

    pub fn with_base_url(mut self, url: String) -> Self {
        self.base_url = url;
        self
    }
}

#[async_trait]
impl Reranker for PineconeReranker {
    async fn rerank(
        &self,
        query: &str,
        documents: &[String],
        top_n: usize,
    ) -> Result<Vec<RerankScore>> {
        let request = RerankRequest {
            model: &self.model,
            query,
            documents: documents.iter().map(|d| RerankDocument { text: d }).collect(),
            top_n,
            return_documents: false,
            parameters: RerankParameters { truncate: "END" },
        };

        debug!(documents = documents.len(), top_n, model = %self.model, "Rerank request");

        let response = self
            .client
            .post(&self.base_url)
            .header("Api-Key", &self.api_key)
            .header("X-Pinecone-API-Version", PINECONE_API_VERSION)
            .json(&request)
            .send()
            .await
            .map_err(|e| SearchError::Upstream(e.to_string()))?;

        if !response.status().is_success() {
            return Err(SearchError::Upstream(
                error_from_response(response).await.to_string(),
            ));
        }

        let body: RerankResponse = response
            .json()
            .await
            .map_err(|e| SearchError::Upstream(format!("invalid rerank response: {}", e)))?;
        Ok(body.data)
    }
}
