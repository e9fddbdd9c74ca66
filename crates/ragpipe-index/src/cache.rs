//! Persistent cache of embedding responses.
//!
//! The cache is keyed by a hash of `(model, input_type, text)` and consulted
//! before calling a provider; misses are written through. It is an explicit
//! value with an `open` / `flush` lifecycle that callers construct and inject
//! into [`CachedEmbeddings`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::embeddings::{EmbeddingProvider, EmbeddingResult, InputType};
use crate::error::Result;

#[derive(Debug, Default, Deserialize)]
struct CacheFile {
    entries: HashMap<String, Vec<f32>>,
}

#[derive(Serialize)]
struct CacheFileRef<'a> {
    entries: &'a HashMap<String, Vec<f32>>,
}

/// Embedding vectors keyed by request hash, optionally backed by a JSON file.
#[derive(Debug, Default)]
pub struct ResponseCache {
    path: Option<PathBuf>,
    entries: HashMap<String, Vec<f32>>,
    dirty: bool,
}

impl ResponseCache {
    /// A cache that is never written to disk.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Open the cache file at `path`, starting empty if it does not exist.
    pub fn open(path: &Path) -> Result<Self> {
        let entries = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let file: CacheFile = serde_json::from_str(&content)?;
            info!("Loaded {} cached embeddings from {:?}", file.entries.len(), path);
            file.entries
        } else {
            HashMap::new()
        };
        Ok(Self {
            path: Some(path.to_path_buf()),
            entries,
            dirty: false,
        })
    }

    pub fn key(model: &str, input_type: InputType, text: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(model.as_bytes());
        hasher.update([0u8]);
        hasher.update(input_type.as_str().as_bytes());
        hasher.update([0u8]);
        hasher.update(text.as_bytes());
        hex::encode(hasher.finalize())
    }

    pub fn get(&self, key: &str) -> Option<&Vec<f32>> {
        self.entries.get(key)
    }

    pub fn insert(&mut self, key: String, vector: Vec<f32>) {
        self.entries.insert(key, vector);
        self.dirty = true;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Write pending entries to disk. A no-op for in-memory caches and when
    /// nothing changed since the last flush.
    pub fn flush(&mut self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if !self.dirty {
            return Ok(());
        }
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string(&CacheFileRef {
            entries: &self.entries,
        })?;
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, content)?;
        std::fs::rename(&tmp, path)?;
        self.dirty = false;
        debug!("Flushed {} cached embeddings to {:?}", self.entries.len(), path);
        Ok(())
    }
}

/// Wraps a provider so repeated texts are served from a [`ResponseCache`].
pub struct CachedEmbeddings<E> {
    inner: E,
    cache: Arc<Mutex<ResponseCache>>,
}

impl<E: EmbeddingProvider> CachedEmbeddings<E> {
    pub fn new(inner: E, cache: Arc<Mutex<ResponseCache>>) -> Self {
        Self { inner, cache }
    }

    pub fn cache(&self) -> &Arc<Mutex<ResponseCache>> {
        &self.cache
    }

    pub async fn flush(&self) -> Result<()> {
        self.cache.lock().await.flush()
    }
}

#[async_trait]
impl<E: EmbeddingProvider> EmbeddingProvider for CachedEmbeddings<E> {
    async fn embed_batch(
        &self,
        texts: &[String],
        input_type: InputType,
    ) -> EmbeddingResult<Vec<Vec<f32>>> {
        let model = self.inner.model_name();
        let keys: Vec<String> = texts
            .iter()
            .map(|t| ResponseCache::key(model, input_type, t))
            .collect();

        let mut out: Vec<Option<Vec<f32>>> = {
            let cache = self.cache.lock().await;
            keys.iter().map(|k| cache.get(k).cloned()).collect()
        };

        let missing: Vec<usize> = (0..texts.len()).filter(|&i| out[i].is_none()).collect();
        debug!(
            hits = texts.len() - missing.len(),
            misses = missing.len(),
            "Embedding cache lookup"
        );

        if !missing.is_empty() {
            let miss_texts: Vec<String> = missing.iter().map(|&i| texts[i].clone()).collect();
            let fresh = self.inner.embed_batch(&miss_texts, input_type).await?;
            let mut cache = self.cache.lock().await;
            for (&i, vector) in missing.iter().zip(fresh) {
                cache.insert(keys[i].clone(), vector.clone());
                out[i] = Some(vector);
            }
        }

        Ok(out.into_iter().flatten().collect())
    }

    fn dimensions(&self) -> usize {
        self.inner.dimensions()
    }

    fn model_name(&self) -> &str {
        self.inner.model_name()
    }
}
