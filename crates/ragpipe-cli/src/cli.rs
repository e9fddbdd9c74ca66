use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use ragpipe_index::types::{ChunkType, FileType};

#[derive(Parser, Debug)]
#[command(name = "ragpipe")]
#[command(about = "Chunk documents and retrieve them with sparse, dense and hybrid search", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to config file (defaults to ./ragpipe.toml and ~/.config/ragpipe/ragpipe.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Chunk a JSONL dataset into a JSONL file of chunks
    Chunk {
        /// Dataset root: a JSONL file or a directory searched recursively
        dataset: PathBuf,

        /// Output file for the chunks
        #[arg(short, long, default_value = "chunks.jsonl")]
        out: PathBuf,

        /// Token budget per chunk (overrides chunking.chunk_size)
        #[arg(long)]
        chunk_size: Option<usize>,

        /// Skip malformed documents instead of aborting
        #[arg(long)]
        skip_malformed: bool,
    },
    /// Embed chunks and upsert them into the Qdrant collection
    Index {
        /// JSONL file of chunks produced by `chunk`
        chunks: PathBuf,
    },
    /// Query the corpus
    Search {
        query: String,

        /// JSONL chunk file to fit in-memory backends on
        #[arg(long)]
        chunks: Option<PathBuf>,

        /// Retrieval backend (overrides retrieval.backend)
        #[arg(long, value_enum)]
        backend: Option<BackendKind>,

        /// Candidate breadth
        #[arg(long)]
        top_k: Option<usize>,

        /// Number of results to return
        #[arg(long)]
        top_n: Option<usize>,

        /// Rerank candidates with the configured cross-encoder
        #[arg(long)]
        rerank: bool,

        #[arg(long, value_enum)]
        file_type: Option<FileTypeArg>,

        /// Only chunks whose source starts with this prefix
        #[arg(long)]
        source_prefix: Option<String>,

        #[arg(long, value_enum)]
        chunk_type: Option<ChunkTypeArg>,

        /// Print results as JSON lines instead of formatted documents
        #[arg(long)]
        json: bool,
    },
    /// Print the tool definitions as JSON function schemas
    Tools,
    /// Print the effective configuration as TOML
    Config,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackendKind {
    Tfidf,
    Bm25,
    Dense,
    VectorStore,
    /// BM25 fused with in-memory dense search
    Hybrid,
}

impl BackendKind {
    /// Whether the backend is fitted from a local chunk file.
    pub fn needs_chunks(self) -> bool {
        !matches!(self, Self::VectorStore)
    }
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileTypeArg {
    SourceCode,
    Notebook,
    Markdown,
    Pdf,
}

impl From<FileTypeArg> for FileType {
    fn from(arg: FileTypeArg) -> Self {
        match arg {
            FileTypeArg::SourceCode => FileType::SourceCode,
            FileTypeArg::Notebook => FileType::Notebook,
            FileTypeArg::Markdown => FileType::Markdown,
            FileTypeArg::Pdf => FileType::Pdf,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChunkTypeArg {
    Class,
    Method,
    Function,
}

impl From<ChunkTypeArg> for ChunkType {
    fn from(arg: ChunkTypeArg) -> Self {
        match arg {
            ChunkTypeArg::Class => ChunkType::Class,
            ChunkTypeArg::Method => ChunkType::Method,
            ChunkTypeArg::Function => ChunkType::Function,
        }
    }
}
