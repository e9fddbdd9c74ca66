//! Document chunking and multi-strategy retrieval for ragpipe.
//!
//! This crate provides:
//! - Content-aware chunking: tree-sitter for Python sources, section-aware
//!   splitting for markdown, notebooks and PDF-extracted filings, all packed
//!   to a token budget
//! - Search backends behind one trait: TF-IDF, BM25, in-memory dense
//!   embeddings and a Qdrant vector store
//! - Hybrid fusion, cross-encoder reranking and the top_k/top_n policy
//! - Embedding providers (Pinecone, OpenRouter, offline hashing) with
//!   rate-limit-aware batching and a persistent response cache
//! - A tool-calling surface for agents

pub mod cache;
pub mod chunker;
pub mod dataset;
pub mod embeddings;
pub mod error;
pub mod qdrant;
pub mod reranker;
pub mod retriever;
pub mod search;
pub mod tokenizer;
pub mod tools;
pub mod types;

// Re-exports
pub use cache::{CachedEmbeddings, ResponseCache};
pub use chunker::{ChunkRouter, ChunkingConfig, MalformedPolicy};
pub use embeddings::{BatchPolicy, EmbeddingError, EmbeddingProvider, InputType};
pub use error::{Result, SearchError};
pub use qdrant::{QdrantConfig, QdrantStore};
pub use reranker::{rerank_results, PineconeReranker, RerankScore, Reranker};
pub use retriever::{Orchestrator, RetrievalPlan, RetrievalRequest};
pub use search::{
    fuse_results, Bm25Backend, DenseBackend, SearchBackend, SearchFilter, TfIdfBackend,
    VectorStore, VectorStoreBackend,
};
pub use tokenizer::{TiktokenTokenizer, Tokenizer, WhitespaceTokenizer};
pub use tools::{create_tool_definitions, format_doc, Tool, ToolRunner};
pub use types::{Chunk, ChunkContext, ChunkType, Document, FileType, SearchResult};

/// Default Qdrant collection name
pub const DEFAULT_COLLECTION: &str = "ragpipe-chunks";
