//! Layered configuration for ragpipe.
//!
//! Values are resolved in order, later sources winning:
//! built-in defaults, `~/.config/ragpipe/ragpipe.toml`, `./ragpipe.toml`
//! (or an explicit `--config` file instead of both), then `RAGPIPE__*`
//! environment variables such as `RAGPIPE__RETRIEVAL__TOP_K=20`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use config::{Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const CONFIG_FILE_NAME: &str = "ragpipe.toml";
pub const ENV_PREFIX: &str = "RAGPIPE";

pub const BACKENDS: &[&str] = &["tfidf", "bm25", "dense", "vector-store", "hybrid"];
pub const EMBEDDING_PROVIDERS: &[&str] = &["pinecone", "openrouter", "hashing"];
pub const TOKENIZERS: &[&str] = &["o200k", "whitespace"];

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Environment variable '{var}' not set (from config value '{value}')")]
    MissingEnv { var: String, value: String },

    #[error("Invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

fn invalid(key: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        key,
        reason: reason.into(),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub chunking: ChunkingConfig,
    pub embeddings: EmbeddingsConfig,
    pub vector_store: VectorStoreConfig,
    pub reranker: RerankerConfig,
    pub retrieval: RetrievalConfig,
    pub cache: CacheConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Token budget per chunk
    pub chunk_size: usize,
    /// "abort" or "skip"
    pub on_malformed: String,
    /// "o200k" or "whitespace"
    pub tokenizer: String,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 500,
            on_malformed: "abort".to_string(),
            tokenizer: "o200k".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingsConfig {
    pub provider: String,
    pub model: Option<String>,
    pub dimensions: Option<usize>,
    /// Literal key or `${ENV_VAR}`
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub batch_size: usize,
    pub batch_delay_ms: u64,
    pub rate_limit_cooldown_secs: u64,
}

impl Default for EmbeddingsConfig {
    fn default() -> Self {
        Self {
            provider: "pinecone".to_string(),
            model: None,
            dimensions: None,
            api_key: None,
            base_url: None,
            batch_size: 25,
            batch_delay_ms: 500,
            rate_limit_cooldown_secs: 60,
        }
    }
}

impl EmbeddingsConfig {
    /// The configured key, falling back to the provider's conventional
    /// environment variable. The hashing provider needs no key.
    pub fn resolved_api_key(&self) -> Result<Option<String>, ConfigError> {
        if let Some(key) = resolve_secret(&self.api_key)? {
            return Ok(Some(key));
        }
        let fallback = match self.provider.as_str() {
            "pinecone" => "PINECONE_API_KEY",
            "openrouter" => "OPENROUTER_API_KEY",
            _ => return Ok(None),
        };
        Ok(std::env::var(fallback).ok().filter(|k| !k.is_empty()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VectorStoreConfig {
    /// Qdrant gRPC endpoint
    pub url: String,
    pub api_key: Option<String>,
    pub collection: String,
    pub upsert_batch_size: usize,
}

impl Default for VectorStoreConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:6334".to_string(),
            api_key: None,
            collection: "ragpipe-chunks".to_string(),
            upsert_batch_size: 50,
        }
    }
}

impl VectorStoreConfig {
    pub fn resolved_api_key(&self) -> Result<Option<String>, ConfigError> {
        resolve_secret(&self.api_key)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RerankerConfig {
    pub enabled: bool,
    pub model: Option<String>,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
}

impl RerankerConfig {
    /// Falls back to `PINECONE_API_KEY`.
    pub fn resolved_api_key(&self) -> Result<Option<String>, ConfigError> {
        if let Some(key) = resolve_secret(&self.api_key)? {
            return Ok(Some(key));
        }
        Ok(std::env::var("PINECONE_API_KEY").ok().filter(|k| !k.is_empty()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub backend: String,
    /// Candidate breadth
    pub top_k: Option<usize>,
    /// Final result count
    pub top_n: Option<usize>,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            backend: "hybrid".to_string(),
            top_k: None,
            top_n: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    /// Embedding response cache file; `~` and `$VAR` are expanded
    pub path: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: "~/.cache/ragpipe/embeddings.json".to_string(),
        }
    }
}

impl CacheConfig {
    pub fn resolved_path(&self) -> Result<PathBuf, ConfigError> {
        shellexpand::full(&self.path)
            .map(|p| PathBuf::from(p.into_owned()))
            .map_err(|e| invalid("cache.path", e.to_string()))
    }
}

/// Resolve a secret that may reference an environment variable as `${VAR}`.
///
/// Empty values count as unset.
pub fn resolve_secret(value: &Option<String>) -> Result<Option<String>, ConfigError> {
    match value {
        Some(key) if key.starts_with("${") && key.ends_with('}') => {
            let var = &key[2..key.len() - 1];
            std::env::var(var)
                .map(Some)
                .map_err(|_| ConfigError::MissingEnv {
                    var: var.to_string(),
                    value: key.clone(),
                })
        }
        Some(key) if !key.is_empty() => Ok(Some(key.clone())),
        _ => Ok(None),
    }
}

/// `~/.config/ragpipe/ragpipe.toml`, if a config directory exists.
pub fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("ragpipe").join(CONFIG_FILE_NAME))
}

impl Config {
    /// Load configuration from files and the environment.
    ///
    /// An explicit `path` must exist; the default locations are optional.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        match path {
            Some(path) => {
                builder = builder.add_source(File::from(path).required(true));
            }
            None => {
                if let Some(user) = user_config_path() {
                    builder = builder.add_source(File::from(user).required(false));
                }
                builder = builder.add_source(File::from(Path::new(CONFIG_FILE_NAME)).required(false));
            }
        }
        let builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        );

        let config: Config = builder
            .build()
            .context("Failed to read configuration")?
            .try_deserialize()
            .context("Failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML document on top of the defaults, without consulting the
    /// environment.
    pub fn from_toml_str(toml: &str) -> Result<Self> {
        let config: Config = config::Config::builder()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()
            .context("Failed to read configuration")?
            .try_deserialize()
            .context("Failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration")
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunking.chunk_size == 0 {
            return Err(invalid("chunking.chunk_size", "must be positive"));
        }
        if !matches!(
            self.chunking.on_malformed.to_ascii_lowercase().as_str(),
            "abort" | "skip"
        ) {
            return Err(invalid(
                "chunking.on_malformed",
                format!("'{}' is not abort or skip", self.chunking.on_malformed),
            ));
        }
        check_one_of("chunking.tokenizer", &self.chunking.tokenizer, TOKENIZERS)?;
        check_one_of("embeddings.provider", &self.embeddings.provider, EMBEDDING_PROVIDERS)?;
        if self.embeddings.batch_size == 0 {
            return Err(invalid("embeddings.batch_size", "must be positive"));
        }
        if self.embeddings.provider == "hashing" && self.embeddings.dimensions == Some(0) {
            return Err(invalid("embeddings.dimensions", "must be positive"));
        }
        if self.vector_store.upsert_batch_size == 0 {
            return Err(invalid("vector_store.upsert_batch_size", "must be positive"));
        }
        if self.vector_store.collection.is_empty() {
            return Err(invalid("vector_store.collection", "must not be empty"));
        }
        check_one_of("retrieval.backend", &self.retrieval.backend, BACKENDS)?;
        Ok(())
    }
}

fn check_one_of(key: &'static str, value: &str, allowed: &[&str]) -> Result<(), ConfigError> {
    if allowed.contains(&value) {
        Ok(())
    } else {
        Err(invalid(
            key,
            format!("'{}' is not one of {}", value, allowed.join(", ")),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.chunking.chunk_size, 500);
        assert_eq!(config.embeddings.batch_size, 25);
        assert_eq!(config.embeddings.batch_delay_ms, 500);
        assert_eq!(config.embeddings.rate_limit_cooldown_secs, 60);
        assert_eq!(config.vector_store.upsert_batch_size, 50);
        assert_eq!(config.retrieval.backend, "hybrid");
        assert!(!config.reranker.enabled);
    }

    #[test]
    fn test_partial_toml_keeps_other_defaults() {
        let config = Config::from_toml_str(
            r#"
            [chunking]
            chunk_size = 200
            on_malformed = "skip"

            [retrieval]
            backend = "bm25"
            top_n = 3
            "#,
        )
        .unwrap();

        assert_eq!(config.chunking.chunk_size, 200);
        assert_eq!(config.chunking.on_malformed, "skip");
        assert_eq!(config.chunking.tokenizer, "o200k");
        assert_eq!(config.retrieval.backend, "bm25");
        assert_eq!(config.retrieval.top_k, None);
        assert_eq!(config.retrieval.top_n, Some(3));
        assert_eq!(config.embeddings, EmbeddingsConfig::default());
    }

    #[test]
    fn test_rejects_unknown_backend() {
        let err = Config::from_toml_str("[retrieval]\nbackend = \"fuzzy\"\n").unwrap_err();
        assert!(err.to_string().contains("retrieval.backend"));
    }

    #[test]
    fn test_rejects_zero_chunk_size() {
        let mut config = Config::default();
        config.chunking.chunk_size = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid {
                key: "chunking.chunk_size",
                ..
            })
        ));
    }

    #[test]
    fn test_explicit_file_is_required() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Config::load(Some(&dir.path().join("missing.toml"))).is_err());
    }

    #[test]
    fn test_load_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        std::fs::write(
            &path,
            "[vector_store]\ncollection = \"filings\"\n\n[reranker]\nenabled = true\n",
        )
        .unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.vector_store.collection, "filings");
        assert!(config.reranker.enabled);
    }

    #[test]
    fn test_toml_roundtrip() {
        let mut config = Config::default();
        config.retrieval.top_k = Some(12);
        config.embeddings.model = Some("multilingual-e5-large".to_string());

        let text = config.to_toml_string().unwrap();
        assert_eq!(Config::from_toml_str(&text).unwrap(), config);
    }

    #[test]
    fn test_resolve_secret() {
        assert_eq!(resolve_secret(&None).unwrap(), None);
        assert_eq!(resolve_secret(&Some(String::new())).unwrap(), None);
        assert_eq!(
            resolve_secret(&Some("literal".to_string())).unwrap(),
            Some("literal".to_string())
        );

        std::env::set_var("RAGPIPE_TEST_SECRET_PRESENT", "s3cret");
        assert_eq!(
            resolve_secret(&Some("${RAGPIPE_TEST_SECRET_PRESENT}".to_string())).unwrap(),
            Some("s3cret".to_string())
        );

        let err = resolve_secret(&Some("${RAGPIPE_TEST_SECRET_ABSENT}".to_string())).unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnv { var, .. } if var == "RAGPIPE_TEST_SECRET_ABSENT"));
    }

    #[test]
    fn test_hashing_provider_needs_no_key() {
        let embeddings = EmbeddingsConfig {
            provider: "hashing".to_string(),
            ..Default::default()
        };
        assert_eq!(embeddings.resolved_api_key().unwrap(), None);
    }

    #[test]
    fn test_cache_path_expands_home() {
        let cache = CacheConfig {
            enabled: true,
            path: "~/ragpipe-cache.json".to_string(),
        };
        let path = cache.resolved_path().unwrap();
        assert!(!path.to_string_lossy().starts_with('~'));
        assert!(path.ends_with("ragpipe-cache.json"));
    }

    #[test]
    fn test_serializes_to_json() {
        let json = serde_json::to_value(Config::default()).unwrap();
        assert_eq!(json["vector_store"]["url"], "http://localhost:6334");
        assert_eq!(json["retrieval"]["top_k"], serde_json::Value::Null);
    }
}
