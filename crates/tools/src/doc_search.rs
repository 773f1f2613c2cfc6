//! `search_docs`: lets the model run its own retrieval mid-conversation.
//!
//! Only chunks scoring at or above the threshold are returned; each is
//! tagged with its source so the model can cite it.

use async_trait::async_trait;
use docent_core::error::ToolError;
use docent_core::tool::{Tool, ToolResult};
use docent_index::Retriever;
use tracing::debug;

pub const NO_RESULTS: &str = "No relevant documents found.";
pub const CHUNK_SEPARATOR: &str = "\n\n---NEXT-CHUNK---\n\n";

const MAX_TOP_K: u64 = 20;

pub struct DocSearchTool {
    retriever: Retriever,
    top_k: usize,
    threshold: f32,
}

impl DocSearchTool {
    pub fn new(retriever: Retriever, top_k: usize, threshold: f32) -> Self {
        Self {
            retriever,
            top_k,
            threshold,
        }
    }
}

#[async_trait]
impl Tool for DocSearchTool {
    fn name(&self) -> &str {
        "search_docs"
    }

    fn description(&self) -> &str {
        "Search the indexed documents for passages relevant to a query. \
         Returns matching passages tagged with their source."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "minLength": 1,
                    "description": "What to search for"
                },
                "top_k": {
                    "type": "integer",
                    "minimum": 1,
                    "maximum": MAX_TOP_K,
                    "description": "Maximum number of passages to return"
                }
            },
            "required": ["query"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let query = arguments["query"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("'query' must be a string".into()))?;
        let k = arguments["top_k"]
            .as_u64()
            .map(|k| k.min(MAX_TOP_K) as usize)
            .unwrap_or(self.top_k);

        let results = self
            .retriever
            .retrieve(query, k)
            .await
            .map_err(|e| ToolError::ExecutionFailed {
                tool_name: "search_docs".into(),
                reason: e.to_string(),
            })?;

        let candidates = results.len();
        let kept: Vec<_> = results.into_iter().filter(|r| r.score >= self.threshold).collect();
        debug!(candidates, kept = kept.len(), threshold = self.threshold, "search_docs filtered results");

        if kept.is_empty() {
            return Ok(ToolResult::ok("", NO_RESULTS));
        }

        let sources: Vec<_> = kept
            .iter()
            .map(|r| serde_json::json!({ "id": r.chunk.id, "source": r.chunk.source, "score": r.score }))
            .collect();
        let output = kept
            .iter()
            .map(|r| format!("[Source: {}]\n{}", r.chunk.source, r.chunk.text))
            .collect::<Vec<_>>()
            .join(CHUNK_SEPARATOR);

        Ok(ToolResult::ok("", output).with_data(serde_json::Value::Array(sources)))
    }
}
