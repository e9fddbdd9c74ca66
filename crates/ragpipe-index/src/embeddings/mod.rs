//! Embedding provider trait, batch policy and implementations.
//!
//! Providers only translate one request into one API call. Batching,
//! inter-batch pacing and the single rate-limit retry live in
//! [`batch_embed`], so every backend that embeds text shares one policy.

mod hashing;
mod pinecone;

pub use hashing::HashingEmbeddings;
pub use pinecone::{PineconeEmbeddings, PINECONE_API_VERSION};

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::error::{Result, SearchError};

/// Errors that can occur during embedding generation.
#[derive(Error, Debug)]
pub enum EmbeddingError {
    #[error("API request failed: {0}")]
    ApiError(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// HTTP 429, with the provider's retry-after hint in seconds if given
    #[error("Rate limited by provider")]
    RateLimited(Option<u64>),

    #[error("Network error: {0}")]
    NetworkError(String),
}

pub type EmbeddingResult<T> = std::result::Result<T, EmbeddingError>;

/// How the embedded text will be used. Asymmetric models embed queries and
/// passages differently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputType {
    Passage,
    Query,
    SearchDocument,
}

impl InputType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Passage => "passage",
            Self::Query => "query",
            Self::SearchDocument => "search_document",
        }
    }
}

/// Trait for embedding providers.
///
/// Implementations should be Send + Sync to allow use in async contexts.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a batch of texts. The output is aligned 1:1 with `texts`.
    async fn embed_batch(
        &self,
        texts: &[String],
        input_type: InputType,
    ) -> EmbeddingResult<Vec<Vec<f32>>>;

    /// Embed a single text
    async fn embed(&self, text: &str, input_type: InputType) -> EmbeddingResult<Vec<f32>> {
        self.embed_batch(&[text.to_string()], input_type)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| EmbeddingError::InvalidResponse("No embedding returned".to_string()))
    }

    /// Get the number of dimensions
    fn dimensions(&self) -> usize;

    /// Get the model name
    fn model_name(&self) -> &str;
}

#[async_trait]
impl<E: EmbeddingProvider + ?Sized> EmbeddingProvider for std::sync::Arc<E> {
    async fn embed_batch(
        &self,
        texts: &[String],
        input_type: InputType,
    ) -> EmbeddingResult<Vec<Vec<f32>>> {
        (**self).embed_batch(texts, input_type).await
    }

    fn dimensions(&self) -> usize {
        (**self).dimensions()
    }

    fn model_name(&self) -> &str {
        (**self).model_name()
    }
}

/// Pacing for bulk embedding calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchPolicy {
    /// Texts per provider call
    pub batch_size: usize,
    /// Pause between consecutive batches
    pub delay: Duration,
    /// Wait before retrying a rate-limited batch
    pub cooldown: Duration,
}

impl Default for BatchPolicy {
    fn default() -> Self {
        Self {
            batch_size: 25,
            delay: Duration::from_millis(500),
            cooldown: Duration::from_secs(60),
        }
    }
}

/// Embed `texts` in sequential batches, each followed by `policy.delay`.
///
/// A rate-limited batch is retried exactly once after `policy.cooldown`; a
/// second rate limit fails with [`SearchError::RateLimitExhausted`]. Any other
/// provider error propagates immediately.
pub async fn batch_embed<E: EmbeddingProvider + ?Sized>(
    provider: &E,
    texts: &[String],
    input_type: InputType,
    policy: &BatchPolicy,
) -> Result<Vec<Vec<f32>>> {
    let batch_size = policy.batch_size.max(1);
    let total_batches = texts.len().div_ceil(batch_size);
    let mut vectors = Vec::with_capacity(texts.len());

    for (batch_idx, batch) in texts.chunks(batch_size).enumerate() {
        debug!(
            batch = batch_idx + 1,
            total_batches,
            size = batch.len(),
            model = provider.model_name(),
            "Embedding batch"
        );
        let embedded = embed_with_retry(provider, batch, input_type, policy).await?;
        if embedded.len() != batch.len() {
            return Err(SearchError::Upstream(format!(
                "provider returned {} embeddings for {} inputs",
                embedded.len(),
                batch.len()
            )));
        }
        vectors.extend(embedded);

        if !policy.delay.is_zero() {
            tokio::time::sleep(policy.delay).await;
        }
    }

    Ok(vectors)
}

/// Embed a single query. Same retry rule as [`batch_embed`], without the
/// inter-batch delay.
pub async fn embed_query<E: EmbeddingProvider + ?Sized>(
    provider: &E,
    query: &str,
    policy: &BatchPolicy,
) -> Result<Vec<f32>> {
    embed_with_retry(provider, &[query.to_string()], InputType::Query, policy)
        .await?
        .pop()
        .ok_or_else(|| SearchError::Upstream("empty query embedding".to_string()))
}

async fn embed_with_retry<E: EmbeddingProvider + ?Sized>(
    provider: &E,
    batch: &[String],
    input_type: InputType,
    policy: &BatchPolicy,
) -> Result<Vec<Vec<f32>>> {
    match provider.embed_batch(batch, input_type).await {
        Ok(vectors) => return Ok(vectors),
        Err(EmbeddingError::RateLimited(retry_after)) => {
            warn!(
                cooldown_secs = policy.cooldown.as_secs_f64(),
                ?retry_after,
                "Rate limited, cooling down before retrying batch"
            );
            tokio::time::sleep(policy.cooldown).await;
        }
        Err(e) => return Err(e.into()),
    }

    match provider.embed_batch(batch, input_type).await {
        Ok(vectors) => Ok(vectors),
        Err(EmbeddingError::RateLimited(_)) => Err(SearchError::RateLimitExhausted { attempts: 2 }),
        Err(e) => Err(e.into()),
    }
}

/// Map a non-success HTTP response onto an [`EmbeddingError`].
pub(crate) async fn error_from_response(response: reqwest::Response) -> EmbeddingError {
    let status = response.status();
    if status.as_u16() == 429 {
        let retry_after = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok());
        return EmbeddingError::RateLimited(retry_after);
    }
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());
    EmbeddingError::ApiError(format!("{}: {}", status.as_u16(), body))
}

/// Request body for embedding API
#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

/// Response from embedding API
#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

/// Individual embedding data in response
#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}

/// OpenAI-compatible `/embeddings` provider, OpenRouter by default.
pub struct OpenRouterEmbeddings {
    api_key: String,
    model: String,
    dimensions: usize,
    client: Client,
    base_url: String,
}

impl OpenRouterEmbeddings {
    /// Create a provider. Uses Qwen3-Embedding-8B with 4096 dimensions unless
    /// overridden.
    pub fn new(api_key: String, model: Option<String>, dimensions: Option<usize>) -> Self {
        Self {
            api_key,
            model: model.unwrap_or_else(|| "qwen/qwen3-embedding-8b".to_string()),
            dimensions: dimensions.unwrap_or(4096),
            client: Client::new(),
            base_url: "https://openrouter.ai/api/v1/embeddings".to_string(),
        }
    }

    /// Set a custom base URL (useful for testing or proxies).
    pub fn with_base_url(mut self, url: String) -> Self {
        self.base_url = url;
        self
    }
}

#[async_trait]
impl EmbeddingProvider for OpenRouterEmbeddings {
    async fn embed_batch(
        &self,
        texts: &[String],
        _input_type: InputType,
    ) -> EmbeddingResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        debug!(
            "Sending embedding request for {} texts to {}",
            texts.len(),
            self.base_url
        );

        let response = self
            .client
            .post(&self.base_url)
            .bearer_auth(&self.api_key)
            .json(&EmbeddingRequest {
                model: &self.model,
                input: texts,
            })
            .send()
            .await
            .map_err(|e| EmbeddingError::NetworkError(e.to_string()))?;

        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        let body: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| EmbeddingError::InvalidResponse(e.to_string()))?;

        // Sort by index to ensure correct order
        let mut embeddings: Vec<(usize, Vec<f32>)> = body
            .data
            .into_iter()
            .map(|d| (d.index, d.embedding))
            .collect();
        embeddings.sort_by_key(|(idx, _)| *idx);

        Ok(embeddings.into_iter().map(|(_, emb)| emb).collect())
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
