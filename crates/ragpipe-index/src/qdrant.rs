//! Qdrant vector database client wrapper.
//!
//! Implements [`VectorStore`] on top of a Qdrant collection. Each point's
//! payload carries the full chunk record so hits can be turned back into
//! [`Chunk`]s without a side lookup.

use std::collections::HashMap;

use async_trait::async_trait;
use qdrant_client::qdrant::{
    value::Kind, Condition, CreateCollectionBuilder, Distance, Filter, PointStruct,
    QuantizationType, ScalarQuantizationBuilder, SearchPointsBuilder, UpsertPointsBuilder, Value,
    VectorParamsBuilder,
};
use qdrant_client::Qdrant;
use tracing::{debug, info};

use crate::error::{Result, SearchError};
use crate::search::{SearchFilter, VectorHit, VectorPoint, VectorStore};
use crate::types::{Chunk, FileType};

pub use qdrant_client::QdrantError;

impl From<QdrantError> for SearchError {
    fn from(err: QdrantError) -> Self {
        SearchError::Upstream(format!("qdrant: {}", err))
    }
}

/// Configuration for connecting to Qdrant.
#[derive(Debug, Clone)]
pub struct QdrantConfig {
    /// Qdrant server URL (gRPC port)
    pub url: String,
    pub api_key: Option<String>,
    pub collection_name: String,
}

impl Default for QdrantConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:6334".to_string(),
            api_key: None,
            collection_name: crate::DEFAULT_COLLECTION.to_string(),
        }
    }
}

/// A Qdrant collection used as a [`VectorStore`].
pub struct QdrantStore {
    client: Qdrant,
    collection_name: String,
}

impl QdrantStore {
    pub fn from_config(config: &QdrantConfig) -> Result<Self> {
        let mut builder = Qdrant::from_url(&config.url).skip_compatibility_check();
        if let Some(ref api_key) = config.api_key {
            builder = builder.api_key(api_key.clone());
        }
        let client = builder.build()?;

        info!("Connected to Qdrant at {}", config.url);

        Ok(Self {
            client,
            collection_name: config.collection_name.clone(),
        })
    }

    pub fn collection_name(&self) -> &str {
        &self.collection_name
    }
}

#[async_trait]
impl VectorStore for QdrantStore {
    async fn collection_exists(&self) -> Result<bool> {
        let collections = self.client.list_collections().await?;
        Ok(collections
            .collections
            .iter()
            .any(|c| c.name == self.collection_name))
    }

    /// Creates the collection with cosine distance and int8 scalar
    /// quantization when it is missing.
    async fn ensure_collection(&self, dimensions: usize) -> Result<()> {
        if self.collection_exists().await? {
            debug!("Collection {} already exists", self.collection_name);
            return Ok(());
        }

        info!(
            "Creating collection: {} with {} dimensions",
            self.collection_name, dimensions
        );
        self.client
            .create_collection(
                CreateCollectionBuilder::new(&self.collection_name)
                    .vectors_config(VectorParamsBuilder::new(dimensions as u64, Distance::Cosine))
                    .quantization_config(
                        ScalarQuantizationBuilder::default()
                            .r#type(QuantizationType::Int8.into())
                            .quantile(0.99)
                            .always_ram(true),
                    ),
            )
            .await?;
        Ok(())
    }

    async fn upsert(&self, points: Vec<VectorPoint>) -> Result<()> {
        if points.is_empty() {
            debug!("No points to upsert");
            return Ok(());
        }

        debug!("Upserting {} points", points.len());
        let qdrant_points: Vec<PointStruct> = points
            .into_iter()
            .map(|p| PointStruct::new(p.id, p.vector, chunk_to_payload(&p.payload)))
            .collect();

        self.client
            .upsert_points(UpsertPointsBuilder::new(&self.collection_name, qdrant_points).wait(true))
            .await?;
        Ok(())
    }

    async fn query(
        &self,
        vector: Vec<f32>,
        top_k: usize,
        filter: Option<&SearchFilter>,
    ) -> Result<Vec<VectorHit>> {
        let prefix = filter.and_then(|f| f.source_prefix.as_deref());
        // Prefix matching happens client-side, so over-fetch when it applies.
        let limit = if prefix.is_some() { top_k.saturating_mul(4) } else { top_k };

        let mut search = SearchPointsBuilder::new(&self.collection_name, vector, limit as u64)
            .with_payload(true);
        if let Some(server_filter) = filter.and_then(to_qdrant_filter) {
            search = search.filter(server_filter);
        }

        let response = self.client.search_points(search).await?;
        let mut hits = Vec::with_capacity(response.result.len());
        for point in response.result {
            let chunk = payload_to_chunk(&point.payload)?;
            if prefix.map_or(true, |p| chunk.source.starts_with(p)) {
                hits.push(VectorHit {
                    chunk,
                    score: point.score,
                });
            }
        }
        hits.truncate(top_k);

        debug!("Found {} search hits", hits.len());
        Ok(hits)
    }
}

/// Exact-match conditions Qdrant can evaluate on payload keywords.
fn to_qdrant_filter(filter: &SearchFilter) -> Option<Filter> {
    let mut conditions: Vec<Condition> = Vec::new();
    if let Some(file_type) = filter.file_type {
        conditions.push(Condition::matches("file_type", file_type.as_str().to_string()));
    }
    if let Some(ref source) = filter.source {
        conditions.push(Condition::matches("source", source.clone()));
    }
    if let Some(ref doc_id) = filter.doc_id {
        conditions.push(Condition::matches("doc_id", doc_id.clone()));
    }
    if let Some(chunk_type) = filter.chunk_type {
        conditions.push(Condition::matches("type", chunk_type.as_str().to_string()));
    }
    if conditions.is_empty() {
        None
    } else {
        Some(Filter::must(conditions))
    }
}

/// Flatten a chunk into Qdrant payload values. `context` and `metadata` are
/// stored as JSON strings.
fn chunk_to_payload(chunk: &Chunk) -> HashMap<String, Value> {
    let mut map = HashMap::new();
    map.insert("chunk".to_string(), Value::from(chunk.chunk.clone()));
    map.insert("text".to_string(), Value::from(chunk.text.clone()));
    map.insert("doc_id".to_string(), Value::from(chunk.doc_id.clone()));
    map.insert("chunk_id".to_string(), Value::from(chunk.chunk_id.clone()));
    map.insert(
        "chunk_number".to_string(),
        Value::from(chunk.chunk_number as i64),
    );
    map.insert("source".to_string(), Value::from(chunk.source.clone()));
    map.insert(
        "file_type".to_string(),
        Value::from(chunk.file_type.as_str().to_string()),
    );
    if let Some(chunk_type) = chunk.chunk_type {
        map.insert("type".to_string(), Value::from(chunk_type.as_str().to_string()));
    }
    if let Some(ref context) = chunk.context {
        if let Ok(json) = serde_json::to_string(context) {
            map.insert("context".to_string(), Value::from(json));
        }
    }
    if !chunk.metadata.is_empty() {
        if let Ok(json) = serde_json::to_string(&chunk.metadata) {
            map.insert("metadata".to_string(), Value::from(json));
        }
    }
    map
}

fn payload_to_chunk(map: &HashMap<String, Value>) -> Result<Chunk> {
    let chunk_type = match extract_string_opt(map.get("type")) {
        Some(s) => Some(serde_json::from_value(serde_json::Value::String(s))?),
        None => None,
    };
    let context = match extract_string_opt(map.get("context")) {
        Some(json) => Some(serde_json::from_str(&json)?),
        None => None,
    };
    let metadata = match extract_string_opt(map.get("metadata")) {
        Some(json) => serde_json::from_str(&json)?,
        None => Default::default(),
    };
    let file_type: FileType = extract_string(map.get("file_type"))
        .parse()
        .unwrap_or(FileType::Markdown);

    Ok(Chunk {
        chunk: extract_string(map.get("chunk")),
        text: extract_string(map.get("text")),
        doc_id: extract_string(map.get("doc_id")),
        chunk_id: extract_string(map.get("chunk_id")),
        chunk_number: extract_integer(map.get("chunk_number")).max(0) as usize,
        source: extract_string(map.get("source")),
        file_type,
        chunk_type,
        context,
        metadata,
    })
}

fn extract_string(value: Option<&Value>) -> String {
    extract_string_opt(value).unwrap_or_default()
}

fn extract_string_opt(value: Option<&Value>) -> Option<String> {
    match value.and_then(|v| v.kind.as_ref()) {
        Some(Kind::StringValue(s)) => Some(s.clone()),
        _ => None,
    }
}

fn extract_integer(value: Option<&Value>) -> i64 {
    match value.and_then(|v| v.kind.as_ref()) {
        Some(Kind::IntegerValue(i)) => *i,
        _ => 0,
    }
}
