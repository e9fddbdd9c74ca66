//! Tool-calling surface for agents.
//!
//! Exposes retrieval as a named, schema-described function an LLM can call,
//! plus the formatting that turns search results into tool output.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use crate::error::{Result, SearchError};
use crate::retriever::{Orchestrator, RetrievalRequest};
use crate::types::{FileType, SearchResult};

pub const SEARCH_DOCUMENTATION: &str = "SearchDocumentation";

/// Result count used when a call omits `num_results`.
pub const DEFAULT_NUM_RESULTS: usize = 10;

/// A tool definition with its JSON-schema input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tool {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

impl Tool {
    /// The `{"type": "function", "function": {...}}` form used by
    /// OpenAI-compatible chat APIs.
    pub fn to_function_schema(&self) -> Value {
        json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": self.input_schema,
            }
        })
    }
}

/// Every tool this crate can run.
pub fn create_tool_definitions() -> Vec<Tool> {
    vec![Tool {
        name: SEARCH_DOCUMENTATION.to_string(),
        description: "Searches financial documents and SEC filings. Use this tool for queries related to company financial reports, earnings calls, and regulatory filings.".to_string(),
        input_schema: json!({
            "type": "object",
            "properties": {
                "search_query": {
                    "type": "string",
                    "description": "A detailed query to search financial documents and SEC filings"
                },
                "num_results": {
                    "type": "integer",
                    "description": "The number of results to return",
                    "default": DEFAULT_NUM_RESULTS
                }
            },
            "required": ["search_query"]
        }),
    }]
}

fn default_num_results() -> usize {
    DEFAULT_NUM_RESULTS
}

/// Arguments of a `SearchDocumentation` call.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SearchDocumentationArgs {
    pub search_query: String,
    #[serde(default = "default_num_results")]
    pub num_results: usize,
}

impl SearchDocumentationArgs {
    /// Retrieve twice as many candidates as are returned.
    pub fn to_request(&self) -> RetrievalRequest {
        RetrievalRequest::new(self.search_query.clone())
            .with_top_k(self.num_results.saturating_mul(2))
            .with_top_n(self.num_results)
    }
}

/// Output of a tool call, serialized as `{"results": "..."}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolOutput {
    pub results: String,
}

/// Runs tool calls against an [`Orchestrator`].
pub struct ToolRunner {
    orchestrator: Arc<Orchestrator>,
}

impl ToolRunner {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self { orchestrator }
    }

    /// Dispatch a call by tool name with its JSON arguments.
    pub async fn call(&self, name: &str, arguments: Value) -> Result<ToolOutput> {
        match name {
            SEARCH_DOCUMENTATION => {
                let args: SearchDocumentationArgs = serde_json::from_value(arguments)?;
                self.search_documentation(&args).await
            }
            other => Err(SearchError::UnknownTool(other.to_string())),
        }
    }

    pub async fn search_documentation(&self, args: &SearchDocumentationArgs) -> Result<ToolOutput> {
        debug!(query = %args.search_query, num_results = args.num_results, "SearchDocumentation");
        let results = self.orchestrator.retrieve(&args.to_request()).await?;
        let formatted: Vec<String> = results.iter().map(|r| format_doc(r, false, None)).collect();
        Ok(ToolOutput {
            results: formatted.join("\n\n"),
        })
    }
}

/// Render a result as `- key: value` lines followed by its payload.
///
/// Keys come from the serialized result in alphabetical order; the payload
/// fields are never listed and the ids only when `with_ids` is set. Source
/// code shows `text`, everything else `chunk`. With `max_length`, the payload
/// is cut to that many characters and an ellipsis block is appended.
pub fn format_doc(result: &SearchResult, with_ids: bool, max_length: Option<usize>) -> String {
    let mut out = String::new();
    if let Ok(Value::Object(fields)) = serde_json::to_value(result) {
        for (key, value) in fields {
            if matches!(key.as_str(), "text" | "chunk" | "content") {
                continue;
            }
            if !with_ids && matches!(key.as_str(), "doc_id" | "chunk_id") {
                continue;
            }
            let rendered = match value {
                Value::String(s) => s,
                other => other.to_string(),
            };
            out.push_str(&format!("- {}: {}\n", key, rendered));
        }
    }
    out.push_str("\n\n");

    let payload = match result.chunk.file_type {
        FileType::SourceCode => &result.chunk.text,
        _ => &result.chunk.chunk,
    };
    match max_length {
        Some(limit) => {
            out.extend(payload.chars().take(limit));
            out.push_str("\n\n...\n\n");
        }
        None => out.push_str(payload),
    }
    out
}

/// [`format_doc`] with ids, followed by a horizontal rule.
pub fn render_doc(result: &SearchResult, max_length: Option<usize>) -> String {
    let mut out = format_doc(result, true, max_length);
    out.push_str("\n\n---\n\n");
    out
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::search::test_support::chunk;
    use crate::search::{SearchBackend, SearchFilter};
    use crate::types::Chunk;

    fn pdf_result() -> SearchResult {
        let mut c = chunk("10q.pdf", "Revenue $ 1,234 million");
        c.file_type = FileType::Pdf;
        c.text = "Revenue $ 1234 million".to_string();
        SearchResult::new(c, 0.75)
    }

    #[test]
    fn test_tool_schema_shape() {
        let tools = create_tool_definitions();
        assert_eq!(tools.len(), 1);
        let schema = tools[0].to_function_schema();
        assert_eq!(schema["type"], "function");
        assert_eq!(schema["function"]["name"], "SearchDocumentation");
        assert_eq!(schema["function"]["parameters"]["type"], "object");
        assert_eq!(schema["function"]["parameters"]["required"], json!(["search_query"]));
        assert!(schema["function"]["parameters"]["properties"]["num_results"].is_object());
    }

    #[test]
    fn test_args_default_and_request() {
        let args: SearchDocumentationArgs =
            serde_json::from_value(json!({"search_query": "gross margin"})).unwrap();
        assert_eq!(args.num_results, 10);

        let request = SearchDocumentationArgs {
            search_query: "q".to_string(),
            num_results: 5,
        }
        .to_request();
        assert_eq!(request.top_k, Some(10));
        assert_eq!(request.top_n, Some(5));
    }

    #[test]
    fn test_format_doc_hides_payload_keys_and_ids() {
        let out = format_doc(&pdf_result(), false, None);
        assert!(out.contains("- source: 10q.pdf\n"));
        assert!(out.contains("- file_type: pdf\n"));
        assert!(out.contains("- score: 0.75\n"));
        assert!(!out.contains("- chunk_id"));
        assert!(!out.contains("- text:"));
        assert!(out.ends_with("\n\nRevenue $ 1,234 million"));
    }

    #[test]
    fn test_format_doc_with_ids_and_truncation() {
        let out = format_doc(&pdf_result(), true, Some(7));
        assert!(out.contains("- chunk_id: "));
        assert!(out.contains("- doc_id: "));
        assert!(out.ends_with("\n\nRevenue\n\n...\n\n"));
        assert!(render_doc(&pdf_result(), None).ends_with("\n\n---\n\n"));
    }

    #[test]
    fn test_format_doc_source_code_uses_text() {
        let mut c = chunk("m.py", "raw");
        c.file_type = FileType::SourceCode;
        c.text = "normalized".to_string();
        let out = format_doc(&SearchResult::new(c, 0.5), false, None);
        assert!(out.ends_with("normalized"));
    }

    struct Fixed(Vec<SearchResult>);

    #[async_trait]
    impl SearchBackend for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn fit(&mut self, _: Vec<Chunk>) -> Result<()> {
            Ok(())
        }

        async fn search(
            &self,
            _: &str,
            top_k: usize,
            _: Option<&SearchFilter>,
        ) -> Result<Vec<SearchResult>> {
            Ok(self.0.iter().take(top_k).cloned().collect())
        }
    }

    #[tokio::test]
    async fn test_runner_dispatch() {
        let results = vec![pdf_result(), SearchResult::new(chunk("b.md", "second"), 0.5)];
        let runner = ToolRunner::new(Arc::new(Orchestrator::single(Box::new(Fixed(results)))));

        let output = runner
            .call(SEARCH_DOCUMENTATION, json!({"search_query": "revenue", "num_results": 2}))
            .await
            .unwrap();
        assert_eq!(output.results.matches("- source: ").count(), 2);
        assert!(output.results.contains("million\n\n- "));

        let err = runner.call("SearchInternet", json!({})).await.unwrap_err();
        assert!(matches!(err, SearchError::UnknownTool(name) if name == "SearchInternet"));

        let err = runner.call(SEARCH_DOCUMENTATION, json!({})).await.unwrap_err();
        assert!(matches!(err, SearchError::Serialization(_)));
    }
}
