//! Builds index-crate components from loaded configuration.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::ValueEnum;
use ragpipe_config::Config;
use ragpipe_index::cache::{CachedEmbeddings, ResponseCache};
use ragpipe_index::chunker::{ChunkRouter, ChunkingConfig, MalformedPolicy};
use ragpipe_index::embeddings::{
    BatchPolicy, EmbeddingProvider, HashingEmbeddings, OpenRouterEmbeddings, PineconeEmbeddings,
};
use ragpipe_index::qdrant::{QdrantConfig, QdrantStore};
use ragpipe_index::reranker::{PineconeReranker, Reranker};
use ragpipe_index::retriever::Orchestrator;
use ragpipe_index::search::{
    Bm25Backend, DenseBackend, SearchBackend, TfIdfBackend, VectorStoreBackend,
};
use ragpipe_index::tokenizer::{TiktokenTokenizer, Tokenizer, WhitespaceTokenizer};
use tracing::{debug, info};

use crate::cli::BackendKind;

/// Vector size of the offline hashing provider when none is configured.
const DEFAULT_HASHING_DIMENSIONS: usize = 384;

type SharedCache = CachedEmbeddings<Arc<dyn EmbeddingProvider>>;

pub fn tokenizer(config: &Config) -> Result<Arc<dyn Tokenizer>> {
    Ok(match config.chunking.tokenizer.as_str() {
        "whitespace" => Arc::new(WhitespaceTokenizer),
        _ => Arc::new(TiktokenTokenizer::o200k().context("Failed to load o200k tokenizer")?),
    })
}

pub fn chunk_router(
    config: &Config,
    chunk_size: Option<usize>,
    skip_malformed: bool,
) -> Result<ChunkRouter> {
    let on_malformed = if skip_malformed {
        MalformedPolicy::Skip
    } else {
        config
            .chunking
            .on_malformed
            .parse()
            .map_err(anyhow::Error::msg)?
    };
    let chunking = ChunkingConfig {
        chunk_size: chunk_size.unwrap_or(config.chunking.chunk_size),
        on_malformed,
    };
    if chunking.chunk_size == 0 {
        bail!("chunk size must be positive");
    }
    Ok(ChunkRouter::new(chunking, tokenizer(config)?))
}

pub fn batch_policy(config: &Config) -> BatchPolicy {
    BatchPolicy {
        batch_size: config.embeddings.batch_size,
        delay: Duration::from_millis(config.embeddings.batch_delay_ms),
        cooldown: Duration::from_secs(config.embeddings.rate_limit_cooldown_secs),
    }
}

/// The configured embedding provider, wrapped in the response cache when
/// caching is enabled.
pub struct EmbeddingStack {
    provider: Arc<dyn EmbeddingProvider>,
    cached: Option<Arc<SharedCache>>,
}

impl EmbeddingStack {
    pub fn from_config(config: &Config) -> Result<Self> {
        let embeddings = &config.embeddings;
        let base: Arc<dyn EmbeddingProvider> = match embeddings.provider.as_str() {
            "hashing" => Arc::new(HashingEmbeddings::new(
                embeddings.dimensions.unwrap_or(DEFAULT_HASHING_DIMENSIONS),
            )),
            provider => {
                let api_key = embeddings
                    .resolved_api_key()?
                    .with_context(|| format!("No API key configured for '{}' embeddings", provider))?;
                if provider == "openrouter" {
                    let mut p = OpenRouterEmbeddings::new(
                        api_key,
                        embeddings.model.clone(),
                        embeddings.dimensions,
                    );
                    if let Some(url) = &embeddings.base_url {
                        p = p.with_base_url(url.clone());
                    }
                    Arc::new(p)
                } else {
                    let mut p = PineconeEmbeddings::new(
                        api_key,
                        embeddings.model.clone(),
                        embeddings.dimensions,
                    );
                    if let Some(url) = &embeddings.base_url {
                        p = p.with_base_url(url.clone());
                    }
                    Arc::new(p)
                }
            }
        };
        info!(
            provider = %embeddings.provider,
            model = base.model_name(),
            dimensions = base.dimensions(),
            "Embedding provider ready"
        );

        if !config.cache.enabled {
            return Ok(Self {
                provider: base,
                cached: None,
            });
        }

        let path = config.cache.resolved_path()?;
        let cache = ResponseCache::open(&path)
            .with_context(|| format!("Failed to open embedding cache {}", path.display()))?;
        debug!(entries = cache.len(), path = %path.display(), "Opened embedding cache");
        let cached = Arc::new(CachedEmbeddings::new(
            base,
            Arc::new(tokio::sync::Mutex::new(cache)),
        ));
        Ok(Self {
            provider: cached.clone(),
            cached: Some(cached),
        })
    }

    pub fn provider(&self) -> Arc<dyn EmbeddingProvider> {
        self.provider.clone()
    }

    /// Persist cached responses, if caching is enabled.
    pub async fn flush(&self) -> Result<()> {
        if let Some(cached) = &self.cached {
            cached.flush().await.context("Failed to flush embedding cache")?;
        }
        Ok(())
    }
}

pub fn qdrant_store(config: &Config) -> Result<QdrantStore> {
    let qdrant = QdrantConfig {
        url: config.vector_store.url.clone(),
        api_key: config.vector_store.resolved_api_key()?,
        collection_name: config.vector_store.collection.clone(),
    };
    QdrantStore::from_config(&qdrant).context("Failed to connect to Qdrant")
}

pub fn vector_store_backend(config: &Config, embeddings: &EmbeddingStack) -> Result<VectorStoreBackend> {
    Ok(VectorStoreBackend::new(
        Arc::new(qdrant_store(config)?),
        embeddings.provider(),
        batch_policy(config),
    )
    .with_upsert_batch_size(config.vector_store.upsert_batch_size))
}

pub fn reranker(config: &Config) -> Result<Arc<dyn Reranker>> {
    let api_key = config
        .reranker
        .resolved_api_key()?
        .context("No API key configured for the reranker")?;
    let mut reranker = PineconeReranker::new(api_key, config.reranker.model.clone());
    if let Some(url) = &config.reranker.base_url {
        reranker = reranker.with_base_url(url.clone());
    }
    Ok(Arc::new(reranker))
}

/// The backend named by the CLI flag, falling back to `retrieval.backend`.
pub fn backend_kind(config: &Config, flag: Option<BackendKind>) -> Result<BackendKind> {
    match flag {
        Some(kind) => Ok(kind),
        None => BackendKind::from_str(&config.retrieval.backend, true)
            .map_err(|e| anyhow::anyhow!("retrieval.backend: {}", e)),
    }
}

fn boxed_backend(
    kind: BackendKind,
    config: &Config,
    embeddings: &EmbeddingStack,
) -> Result<Box<dyn SearchBackend>> {
    Ok(match kind {
        BackendKind::Tfidf => Box::new(TfIdfBackend::new()),
        BackendKind::Bm25 => Box::new(Bm25Backend::new()),
        BackendKind::Dense => Box::new(DenseBackend::new(
            embeddings.provider(),
            batch_policy(config),
        )),
        BackendKind::VectorStore => Box::new(vector_store_backend(config, embeddings)?),
        BackendKind::Hybrid => bail!("hybrid is not a single backend"),
    })
}

/// An unfitted orchestrator for `kind`, with the reranker attached when
/// requested or enabled in config.
pub fn orchestrator(
    kind: BackendKind,
    rerank: bool,
    config: &Config,
    embeddings: &EmbeddingStack,
) -> Result<Orchestrator> {
    let orchestrator = match kind {
        BackendKind::Hybrid => Orchestrator::hybrid(
            boxed_backend(BackendKind::Bm25, config, embeddings)?,
            boxed_backend(BackendKind::Dense, config, embeddings)?,
        ),
        single => Orchestrator::single(boxed_backend(single, config, embeddings)?),
    };
    if rerank || config.reranker.enabled {
        Ok(orchestrator.with_reranker(reranker(config)?))
    } else {
        Ok(orchestrator)
    }
}
