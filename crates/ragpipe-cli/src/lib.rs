//! Command-line entry point for ragpipe.

pub mod cli;
pub mod pipeline;

use std::path::Path;

use anyhow::{bail, Context, Result};
use clap::Parser;
use ragpipe_config::Config;
use ragpipe_index::dataset::{load_documents, read_chunks, write_chunks};
use ragpipe_index::retriever::RetrievalRequest;
use ragpipe_index::search::{SearchBackend, SearchFilter};
use ragpipe_index::tools::{create_tool_definitions, render_doc};
use ragpipe_index::types::SearchResult;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::cli::{BackendKind, ChunkTypeArg, Cli, Commands, FileTypeArg};
use crate::pipeline::EmbeddingStack;

pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = Config::load(cli.config.as_deref())?;
    let output = execute(cli.command, &config).await?;
    if !output.is_empty() {
        println!("{}", output);
    }
    Ok(())
}

/// `RUST_LOG` wins when set; otherwise `ragpipe=info`, or debug with
/// `--verbose`.
fn init_logging(verbose: bool) {
    let default = if verbose { "ragpipe=debug" } else { "ragpipe=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Run one subcommand and return what it prints to stdout.
pub async fn execute(command: Commands, config: &Config) -> Result<String> {
    match command {
        Commands::Chunk {
            dataset,
            out,
            chunk_size,
            skip_malformed,
        } => chunk(config, &dataset, &out, chunk_size, skip_malformed),
        Commands::Index { chunks } => index(config, &chunks).await,
        Commands::Search {
            query,
            chunks,
            backend,
            top_k,
            top_n,
            rerank,
            file_type,
            source_prefix,
            chunk_type,
            json,
        } => {
            let kind = pipeline::backend_kind(config, backend)?;
            let request = RetrievalRequest {
                query,
                top_k: top_k.or(config.retrieval.top_k),
                top_n: top_n.or(config.retrieval.top_n),
                filter: build_filter(file_type, source_prefix, chunk_type),
            };
            let results = search(config, kind, chunks.as_deref(), rerank, &request).await?;
            Ok(render_results(&results, json)?)
        }
        Commands::Tools => {
            let schemas: Vec<_> = create_tool_definitions()
                .iter()
                .map(|t| t.to_function_schema())
                .collect();
            Ok(serde_json::to_string_pretty(&schemas)?)
        }
        Commands::Config => config.to_toml_string(),
    }
}

fn chunk(
    config: &Config,
    dataset: &Path,
    out: &Path,
    chunk_size: Option<usize>,
    skip_malformed: bool,
) -> Result<String> {
    let router = pipeline::chunk_router(config, chunk_size, skip_malformed)?;
    let documents = load_documents(dataset, router.on_malformed())
        .with_context(|| format!("Failed to load dataset {}", dataset.display()))?;
    let chunks = router.chunk_documents(&documents)?;
    write_chunks(out, &chunks)?;
    Ok(format!(
        "Chunked {} documents into {} chunks at {}",
        documents.len(),
        chunks.len(),
        out.display()
    ))
}

async fn index(config: &Config, chunks_path: &Path) -> Result<String> {
    let chunks = read_chunks(chunks_path)
        .with_context(|| format!("Failed to read chunks {}", chunks_path.display()))?;
    let count = chunks.len();
    let embeddings = EmbeddingStack::from_config(config)?;
    let mut backend = pipeline::vector_store_backend(config, &embeddings)?;

    let fitted = backend.fit(chunks).await;
    // Keep whatever was embedded before a failure.
    embeddings.flush().await?;
    fitted?;

    info!(chunks = count, collection = %config.vector_store.collection, "Indexed chunks");
    Ok(format!(
        "Indexed {} chunks into collection '{}'",
        count, config.vector_store.collection
    ))
}

fn build_filter(
    file_type: Option<FileTypeArg>,
    source_prefix: Option<String>,
    chunk_type: Option<ChunkTypeArg>,
) -> Option<SearchFilter> {
    let mut filter = SearchFilter::new();
    if let Some(file_type) = file_type {
        filter = filter.with_file_type(file_type.into());
    }
    if let Some(prefix) = source_prefix {
        filter = filter.with_source_prefix(prefix);
    }
    if let Some(chunk_type) = chunk_type {
        filter = filter.with_chunk_type(chunk_type.into());
    }
    (!filter.is_empty()).then_some(filter)
}

async fn search(
    config: &Config,
    kind: BackendKind,
    chunks_path: Option<&Path>,
    rerank: bool,
    request: &RetrievalRequest,
) -> Result<Vec<SearchResult>> {
    let needs_embeddings = matches!(
        kind,
        BackendKind::Dense | BackendKind::VectorStore | BackendKind::Hybrid
    );
    let embeddings = if needs_embeddings {
        Some(EmbeddingStack::from_config(config)?)
    } else {
        None
    };

    let results = match &embeddings {
        Some(stack) => run_search(config, kind, chunks_path, rerank, request, stack).await,
        None => {
            // Sparse backends never touch the provider.
            let mut offline = config.clone();
            offline.embeddings.provider = "hashing".to_string();
            offline.cache.enabled = false;
            let stack = EmbeddingStack::from_config(&offline)?;
            run_search(config, kind, chunks_path, rerank, request, &stack).await
        }
    };

    if let Some(stack) = &embeddings {
        stack.flush().await?;
    }
    results
}

async fn run_search(
    config: &Config,
    kind: BackendKind,
    chunks_path: Option<&Path>,
    rerank: bool,
    request: &RetrievalRequest,
    embeddings: &EmbeddingStack,
) -> Result<Vec<SearchResult>> {
    if !kind.needs_chunks() {
        let mut backend = pipeline::vector_store_backend(config, embeddings)?;
        backend.load().await?;
        let mut orchestrator = ragpipe_index::Orchestrator::single(Box::new(backend));
        if rerank || config.reranker.enabled {
            orchestrator = orchestrator.with_reranker(pipeline::reranker(config)?);
        }
        return Ok(orchestrator.retrieve(request).await?);
    }

    let Some(chunks_path) = chunks_path else {
        bail!("--chunks is required for the {:?} backend", kind);
    };
    let corpus = read_chunks(chunks_path)
        .with_context(|| format!("Failed to read chunks {}", chunks_path.display()))?;
    let mut orchestrator = pipeline::orchestrator(kind, rerank, config, embeddings)?;
    orchestrator.fit(corpus).await?;
    Ok(orchestrator.retrieve(request).await?)
}

fn render_results(results: &[SearchResult], json: bool) -> Result<String> {
    if json {
        let lines = results
            .iter()
            .map(serde_json::to_string)
            .collect::<std::result::Result<Vec<_>, _>>()?;
        return Ok(lines.join("\n"));
    }
    Ok(results.iter().map(|r| render_doc(r, None)).collect())
}

#[cfg(test)]
mod tests {
    use std::fs;

    use ragpipe_index::types::{Document, FileType};

    use super::*;

    fn offline_config() -> Config {
        let mut config = Config::default();
        config.chunking.tokenizer = "whitespace".to_string();
        config.embeddings.provider = "hashing".to_string();
        config.embeddings.dimensions = Some(128);
        config.embeddings.batch_delay_ms = 0;
        config.cache.enabled = false;
        config
    }

    fn write_dataset(dir: &Path) {
        let docs = [
            Document::new(
                "# Liquidity\nCash and equivalents rose to fund the buyback.",
                FileType::Markdown,
                "notes/liquidity.md",
            ),
            Document::new(
                "def buyback(shares):\n    return shares * 2\n",
                FileType::SourceCode,
                "src/buyback.py",
            ),
        ];
        let body: Vec<String> = docs
            .iter()
            .map(|d| serde_json::to_string(d).unwrap())
            .collect();
        fs::write(dir.join("docs.jsonl"), body.join("\n")).unwrap();
    }

    #[tokio::test]
    async fn test_chunk_then_search_offline() {
        let dir = tempfile::tempdir().unwrap();
        write_dataset(dir.path());
        let config = offline_config();
        let out = dir.path().join("chunks.jsonl");

        let summary = execute(
            Commands::Chunk {
                dataset: dir.path().to_path_buf(),
                out: out.clone(),
                chunk_size: None,
                skip_malformed: false,
            },
            &config,
        )
        .await
        .unwrap();
        assert!(summary.contains("Chunked 2 documents"));

        for backend in [BackendKind::Bm25, BackendKind::Tfidf, BackendKind::Hybrid] {
            let output = execute(
                Commands::Search {
                    query: "cash equivalents".to_string(),
                    chunks: Some(out.clone()),
                    backend: Some(backend),
                    top_k: None,
                    top_n: Some(1),
                    rerank: false,
                    file_type: Some(FileTypeArg::Markdown),
                    source_prefix: None,
                    chunk_type: None,
                    json: false,
                },
                &config,
            )
            .await
            .unwrap();
            assert!(output.contains("- source: notes/liquidity.md"), "{backend:?}: {output}");
            assert!(output.ends_with("\n\n---\n\n"));
        }
    }

    #[tokio::test]
    async fn test_skip_malformed_reaches_dataset_lines() {
        let dir = tempfile::tempdir().unwrap();
        let dataset = dir.path().join("docs.jsonl");
        let good = serde_json::to_string(&Document::new("# A\nalpha", FileType::Markdown, "a.md")).unwrap();
        fs::write(&dataset, format!("{}\n{{broken\n", good)).unwrap();
        let out = dir.path().join("chunks.jsonl");
        let chunk_cmd = |skip_malformed| Commands::Chunk {
            dataset: dataset.clone(),
            out: out.clone(),
            chunk_size: None,
            skip_malformed,
        };

        let err = execute(chunk_cmd(false), &offline_config()).await.unwrap_err();
        assert!(format!("{err:#}").contains("docs.jsonl:2"));

        let summary = execute(chunk_cmd(true), &offline_config()).await.unwrap();
        assert!(summary.contains("Chunked 1 documents into 1 chunks"), "{summary}");
    }

    #[tokio::test]
    async fn test_search_requires_chunks_for_local_backends() {
        let err = execute(
            Commands::Search {
                query: "q".to_string(),
                chunks: None,
                backend: Some(BackendKind::Bm25),
                top_k: None,
                top_n: None,
                rerank: false,
                file_type: None,
                source_prefix: None,
                chunk_type: None,
                json: true,
            },
            &offline_config(),
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("--chunks"));
    }

    #[tokio::test]
    async fn test_tools_prints_function_schemas() {
        let output = execute(Commands::Tools, &offline_config()).await.unwrap();
        let schemas: serde_json::Value = serde_json::from_str(&output).unwrap();
        assert_eq!(schemas[0]["type"], "function");
        assert_eq!(schemas[0]["function"]["name"], "SearchDocumentation");
    }

    #[test]
    fn test_empty_filter_is_none() {
        assert!(build_filter(None, None, None).is_none());
        let filter = build_filter(Some(FileTypeArg::Pdf), Some("filings/".to_string()), None).unwrap();
        assert_eq!(filter.file_type, Some(FileType::Pdf));
        assert_eq!(filter.source_prefix.as_deref(), Some("filings/"));
    }
}
