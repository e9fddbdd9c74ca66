//! Error taxonomy shared by the chunking and retrieval paths.

use thiserror::Error;

use crate::embeddings::EmbeddingError;

/// Errors surfaced by chunking, indexing and querying.
#[derive(Error, Debug)]
pub enum SearchError {
    /// `search` was called on a backend that has not been fitted.
    #[error("Backend '{backend}' has no index: call fit() before search()")]
    NotFitted { backend: String },

    /// The provider rate-limited us, we waited and retried once, and it
    /// rate-limited us again.
    #[error("Rate limited after {attempts} attempts")]
    RateLimitExhausted { attempts: u32 },

    /// Any other failure reported by an embedding, vector-store or rerank
    /// provider. Never retried.
    #[error("Upstream failure: {0}")]
    Upstream(String),

    /// A document could not be parsed into the structure its type requires.
    #[error("Malformed document '{document}': {reason}")]
    MalformedDocument { document: String, reason: String },

    /// Retrieval parameters that cannot produce the requested result count.
    #[error("Retrieval policy violation: {0}")]
    PolicyViolation(String),

    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Parser error: {0}")]
    Parser(String),

    #[error("Tokenizer error: {0}")]
    Tokenizer(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<EmbeddingError> for SearchError {
    fn from(err: EmbeddingError) -> Self {
        match err {
            // A bare rate-limit signal that escaped the batch policy counts as
            // a single exhausted attempt.
            EmbeddingError::RateLimited(_) => SearchError::RateLimitExhausted { attempts: 1 },
            other => SearchError::Upstream(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, SearchError>;
