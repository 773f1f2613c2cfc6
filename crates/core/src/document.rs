//! Documents and the chunks they are split into.

use serde::{Deserialize, Serialize};

/// A source document handed to ingestion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    /// Source reference (usually a file name). Re-ingesting the same
    /// source replaces its chunks.
    pub source: String,

    /// Full text
    pub text: String,

    /// Extra scalar metadata copied onto every chunk
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl Document {
    pub fn new(source: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            text: text.into(),
            metadata: serde_json::Map::new(),
        }
    }
}

/// One embedded span of a document. Immutable once stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentChunk {
    /// Stable identifier: `{source}#{seq}`
    pub id: String,

    /// Source reference this chunk came from
    pub source: String,

    /// Position of the chunk within its source
    pub seq: usize,

    /// The text span
    pub text: String,

    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub embedding: Vec<f32>,
}

impl DocumentChunk {
    pub fn new(source: impl Into<String>, seq: usize, text: impl Into<String>) -> Self {
        let source = source.into();
        Self {
            id: Self::chunk_id(&source, seq),
            source,
            seq,
            text: text.into(),
            metadata: serde_json::Map::new(),
            embedding: Vec::new(),
        }
    }

    pub fn chunk_id(source: &str, seq: usize) -> String {
        format!("{source}#{seq}")
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = embedding;
        self
    }
}

/// A chunk paired with its similarity to the query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredChunk {
    pub chunk: DocumentChunk,
    pub score: f32,
}

/// Per-source chunk count, as reported by index administration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSummary {
    pub source: String,
    pub chunks: usize,
}
