//! Dense retrieval backed by an external vector store.

use std::sync::Arc;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tracing::{debug, info};
use uuid::Uuid;

use super::{SearchBackend, SearchFilter};
use crate::embeddings::{batch_embed, embed_query, BatchPolicy, EmbeddingProvider, InputType};
use crate::error::{Result, SearchError};
use crate::types::{Chunk, SearchResult};

/// Default number of points per upsert call.
pub const DEFAULT_UPSERT_BATCH_SIZE: usize = 50;

/// A vector with its chunk payload, ready to upsert.
#[derive(Debug, Clone)]
pub struct VectorPoint {
    /// Stable id derived from the chunk's `chunk_id`
    pub id: String,
    pub vector: Vec<f32>,
    pub payload: Chunk,
}

/// A stored chunk returned by a similarity query.
#[derive(Debug, Clone)]
pub struct VectorHit {
    pub chunk: Chunk,
    /// Cosine similarity as reported by the store
    pub score: f32,
}

/// Persistent nearest-neighbour index.
#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn collection_exists(&self) -> Result<bool>;

    /// Create the collection for vectors of `dimensions` if it is missing.
    async fn ensure_collection(&self, dimensions: usize) -> Result<()>;

    /// Insert or replace points by id.
    async fn upsert(&self, points: Vec<VectorPoint>) -> Result<()>;

    async fn query(
        &self,
        vector: Vec<f32>,
        top_k: usize,
        filter: Option<&SearchFilter>,
    ) -> Result<Vec<VectorHit>>;
}

/// Point id for a chunk: a UUID built from the first 16 bytes of
/// SHA-256(`chunk_id`). Re-indexing the same chunk overwrites its point.
pub fn point_id(chunk_id: &str) -> String {
    let digest = Sha256::digest(chunk_id.as_bytes());
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    Uuid::from_bytes(bytes).to_string()
}

/// Search backend whose index lives in a [`VectorStore`].
pub struct VectorStoreBackend {
    store: Arc<dyn VectorStore>,
    provider: Arc<dyn EmbeddingProvider>,
    policy: BatchPolicy,
    upsert_batch_size: usize,
    ready: bool,
}

impl VectorStoreBackend {
    pub fn new(
        store: Arc<dyn VectorStore>,
        provider: Arc<dyn EmbeddingProvider>,
        policy: BatchPolicy,
    ) -> Self {
        Self {
            store,
            provider,
            policy,
            upsert_batch_size: DEFAULT_UPSERT_BATCH_SIZE,
            ready: false,
        }
    }

    pub fn with_upsert_batch_size(mut self, size: usize) -> Self {
        self.upsert_batch_size = size.max(1);
        self
    }

    /// Attach to an already populated collection without re-indexing.
    pub async fn load(&mut self) -> Result<()> {
        if !self.store.collection_exists().await? {
            return Err(SearchError::Upstream(
                "vector store collection does not exist".to_string(),
            ));
        }
        info!("Attached to existing vector store collection");
        self.ready = true;
        Ok(())
    }

    async fn upsert_in_batches(&self, points: Vec<VectorPoint>) -> Result<()> {
        let total_batches = points.len().div_ceil(self.upsert_batch_size);
        let mut points = points.into_iter().peekable();
        let mut batch_idx = 0;
        while points.peek().is_some() {
            let batch: Vec<VectorPoint> = points.by_ref().take(self.upsert_batch_size).collect();
            batch_idx += 1;
            debug!(batch = batch_idx, total_batches, size = batch.len(), "Upserting batch");
            self.store.upsert(batch).await?;
            if batch_idx < total_batches && !self.policy.delay.is_zero() {
                tokio::time::sleep(self.policy.delay).await;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl SearchBackend for VectorStoreBackend {
    fn name(&self) -> &str {
        "vector-store"
    }

    async fn fit(&mut self, corpus: Vec<Chunk>) -> Result<()> {
        self.store
            .ensure_collection(self.provider.dimensions())
            .await?;

        let texts: Vec<String> = corpus.iter().map(|c| c.text.clone()).collect();
        let vectors = batch_embed(
            self.provider.as_ref(),
            &texts,
            InputType::SearchDocument,
            &self.policy,
        )
        .await?;

        let points: Vec<VectorPoint> = corpus
            .into_iter()
            .zip(vectors)
            .map(|(chunk, vector)| VectorPoint {
                id: point_id(&chunk.chunk_id),
                vector,
                payload: chunk,
            })
            .collect();
        let count = points.len();
        self.upsert_in_batches(points).await?;

        info!(points = count, "Indexed corpus into vector store");
        self.ready = true;
        Ok(())
    }

    async fn search(
        &self,
        query: &str,
        top_k: usize,
        filter: Option<&SearchFilter>,
    ) -> Result<Vec<SearchResult>> {
        if !self.ready {
            return Err(SearchError::NotFitted {
                backend: self.name().to_string(),
            });
        }

        let query_vector = embed_query(self.provider.as_ref(), query, &self.policy).await?;

        let hits = self.store.query(query_vector, top_k, filter).await?;
        let mut results: Vec<SearchResult> = hits
            .into_iter()
            .map(|hit| SearchResult::new(hit.chunk, hit.score))
            .collect();
        super::sort_by_score(&mut results);
        results.truncate(top_k);
        Ok(results)
    }
}
