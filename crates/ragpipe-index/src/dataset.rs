//! JSONL input and output for documents and chunks.

use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::chunker::MalformedPolicy;
use crate::error::{Result, SearchError};
use crate::types::{Chunk, Document};

/// All `*.jsonl` files under `root` (or `root` itself if it is a file),
/// sorted for a stable load order.
pub fn discover_jsonl(root: &Path) -> Vec<PathBuf> {
    if root.is_file() {
        return vec![root.to_path_buf()];
    }
    let mut files: Vec<PathBuf> = WalkDir::new(root)
        .follow_links(true)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| p.extension().is_some_and(|ext| ext == "jsonl"))
        .collect();
    files.sort();
    files
}

/// Parse one JSONL line. `Ok(None)` for blank lines.
fn parse_line<T: DeserializeOwned>(bytes: &[u8]) -> std::result::Result<Option<T>, String> {
    let line = std::str::from_utf8(bytes).map_err(|e| format!("invalid UTF-8: {}", e))?;
    if line.trim().is_empty() {
        return Ok(None);
    }
    serde_json::from_str(line).map(Some).map_err(|e| e.to_string())
}

/// Read one record per line. Lines that are not valid UTF-8 or not valid
/// JSON for `T` are [`SearchError::MalformedDocument`] located as
/// `path:line`, and `on_malformed` decides whether they abort the read.
fn read_jsonl<T: DeserializeOwned>(path: &Path, on_malformed: MalformedPolicy) -> Result<Vec<T>> {
    let reader = BufReader::new(File::open(path)?);
    let mut records = Vec::new();
    let mut skipped = 0usize;
    for (line_no, line) in reader.split(b'\n').enumerate() {
        match parse_line(&line?) {
            Ok(Some(record)) => records.push(record),
            Ok(None) => {}
            Err(reason) => {
                let err = SearchError::MalformedDocument {
                    document: format!("{}:{}", path.display(), line_no + 1),
                    reason,
                };
                if on_malformed == MalformedPolicy::Abort {
                    return Err(err);
                }
                warn!("Skipping record: {}", err);
                skipped += 1;
            }
        }
    }
    if skipped > 0 {
        warn!(file = %path.display(), skipped, "Skipped malformed records");
    }
    Ok(records)
}

fn write_jsonl<T: Serialize>(path: &Path, records: &[T]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let mut writer = BufWriter::new(File::create(path)?);
    for record in records {
        serde_json::to_writer(&mut writer, record)?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;
    Ok(())
}

/// Load every document from the JSONL files under `root`.
pub fn load_documents(root: &Path, on_malformed: MalformedPolicy) -> Result<Vec<Document>> {
    let mut documents = Vec::new();
    for file in discover_jsonl(root) {
        let loaded: Vec<Document> = read_jsonl(&file, on_malformed)?;
        debug!(file = %file.display(), documents = loaded.len(), "Loaded documents");
        documents.extend(loaded);
    }
    info!(documents = documents.len(), root = %root.display(), "Loaded dataset");
    Ok(documents)
}

/// Chunk files are written by [`write_chunks`], so any bad line aborts.
pub fn read_chunks(path: &Path) -> Result<Vec<Chunk>> {
    read_jsonl(path, MalformedPolicy::Abort)
}

pub fn write_chunks(path: &Path, chunks: &[Chunk]) -> Result<()> {
    write_jsonl(path, chunks)?;
    info!(chunks = chunks.len(), path = %path.display(), "Wrote chunks");
    Ok(())
}
