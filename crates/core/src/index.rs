//! VectorIndex trait — the abstraction over the similarity store.
//!
//! Implementations: in-memory and JSONL file-backed (see `docent-index`).

use async_trait::async_trait;
use crate::document::{DocumentChunk, SourceSummary};
use crate::error::IndexError;

/// A store of embedded chunks searchable by vector similarity.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// A human-readable name (e.g., "memory", "file").
    fn name(&self) -> &str;

    /// Insert a chunk, replacing any chunk with the same id.
    async fn upsert(&self, chunk: DocumentChunk) -> std::result::Result<(), IndexError>;

    /// Insert many chunks. Default implementation upserts one at a time.
    async fn upsert_batch(
        &self,
        chunks: Vec<DocumentChunk>,
    ) -> std::result::Result<(), IndexError> {
        for chunk in chunks {
            self.upsert(chunk).await?;
        }
        Ok(())
    }

    /// Ids and similarity scores of the `k` nearest chunks.
    async fn search(
        &self,
        embedding: &[f32],
        k: usize,
    ) -> std::result::Result<Vec<(String, f32)>, IndexError>;

    /// Fetch a chunk by id.
    async fn get(&self, id: &str) -> std::result::Result<Option<DocumentChunk>, IndexError>;

    /// Remove every chunk of a source. Returns how many were removed.
    async fn delete_by_source(&self, source: &str) -> std::result::Result<usize, IndexError>;

    /// Swap the chunks of `source` for `chunks` in one step. Readers and
    /// concurrent writers see either the old set or the new one, never a
    /// mix. On error the old set is kept. Returns how many were removed.
    async fn replace_source(
        &self,
        source: &str,
        chunks: Vec<DocumentChunk>,
    ) -> std::result::Result<usize, IndexError>;

    /// Chunk counts per source, sorted by source.
    async fn summary(&self) -> std::result::Result<Vec<SourceSummary>, IndexError>;

    /// Total number of stored chunks.
    async fn count(&self) -> std::result::Result<usize, IndexError>;
}
