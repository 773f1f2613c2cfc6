//! In-memory index — useful for testing and ephemeral deployments.

use async_trait::async_trait;
use docent_core::document::{DocumentChunk, SourceSummary};
use docent_core::error::IndexError;
use docent_core::index::VectorIndex;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use crate::vector;

/// Chunks keyed by id, searched by brute-force cosine similarity.
///
/// All vectors must share the length of the first chunk stored.
#[derive(Clone, Default)]
pub struct InMemoryIndex {
    chunks: Arc<RwLock<BTreeMap<String, DocumentChunk>>>,
}

impl InMemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an index pre-populated with `chunks`.
    pub(crate) fn from_chunks(chunks: Vec<DocumentChunk>) -> Self {
        let map = chunks.into_iter().map(|c| (c.id.clone(), c)).collect();
        Self {
            chunks: Arc::new(RwLock::new(map)),
        }
    }

    /// Every stored chunk, ordered by id.
    pub(crate) async fn snapshot(&self) -> Vec<DocumentChunk> {
        self.chunks.read().await.values().cloned().collect()
    }

    fn check_dimensions(
        chunks: &BTreeMap<String, DocumentChunk>,
        incoming: &DocumentChunk,
    ) -> Result<(), IndexError> {
        if incoming.embedding.is_empty() {
            return Err(IndexError::Storage(format!("chunk {} has no embedding", incoming.id)));
        }
        match chunks.values().next() {
            Some(existing) if existing.embedding.len() != incoming.embedding.len() => {
                Err(IndexError::DimensionMismatch {
                    expected: existing.embedding.len(),
                    actual: incoming.embedding.len(),
                })
            }
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl VectorIndex for InMemoryIndex {
    fn name(&self) -> &str {
        "memory"
    }

    async fn upsert(&self, chunk: DocumentChunk) -> Result<(), IndexError> {
        let mut chunks = self.chunks.write().await;
        Self::check_dimensions(&chunks, &chunk)?;
        chunks.insert(chunk.id.clone(), chunk);
        Ok(())
    }

    async fn upsert_batch(&self, batch: Vec<DocumentChunk>) -> Result<(), IndexError> {
        let mut chunks = self.chunks.write().await;
        for chunk in &batch {
            Self::check_dimensions(&chunks, chunk)?;
            if let Some(first) = batch.first()
                && first.embedding.len() != chunk.embedding.len()
            {
                return Err(IndexError::DimensionMismatch {
                    expected: first.embedding.len(),
                    actual: chunk.embedding.len(),
                });
            }
        }
        for chunk in batch {
            chunks.insert(chunk.id.clone(), chunk);
        }
        Ok(())
    }

    async fn search(&self, embedding: &[f32], k: usize) -> Result<Vec<(String, f32)>, IndexError> {
        let chunks = self.chunks.read().await;
        if let Some(existing) = chunks.values().next()
            && existing.embedding.len() != embedding.len()
        {
            return Err(IndexError::DimensionMismatch {
                expected: existing.embedding.len(),
                actual: embedding.len(),
            });
        }
        Ok(vector::top_k(
            chunks.values().map(|c| (c.id.as_str(), c.embedding.as_slice())),
            embedding,
            k,
        ))
    }

    async fn get(&self, id: &str) -> Result<Option<DocumentChunk>, IndexError> {
        Ok(self.chunks.read().await.get(id).cloned())
    }

    async fn delete_by_source(&self, source: &str) -> Result<usize, IndexError> {
        let mut chunks = self.chunks.write().await;
        let before = chunks.len();
        chunks.retain(|_, c| c.source != source);
        Ok(before - chunks.len())
    }

    async fn replace_source(&self, source: &str, batch: Vec<DocumentChunk>) -> Result<usize, IndexError> {
        let mut chunks = self.chunks.write().await;
        let expected = chunks
            .values()
            .find(|c| c.source != source)
            .or(batch.first())
            .map(|c| c.embedding.len());
        for chunk in &batch {
            if chunk.embedding.is_empty() {
                return Err(IndexError::Storage(format!("chunk {} has no embedding", chunk.id)));
            }
            if let Some(expected) = expected
                && expected != chunk.embedding.len()
            {
                return Err(IndexError::DimensionMismatch {
                    expected,
                    actual: chunk.embedding.len(),
                });
            }
        }

        let before = chunks.len();
        chunks.retain(|_, c| c.source != source);
        let removed = before - chunks.len();
        for chunk in batch {
            chunks.insert(chunk.id.clone(), chunk);
        }
        Ok(removed)
    }

    async fn summary(&self) -> Result<Vec<SourceSummary>, IndexError> {
        let chunks = self.chunks.read().await;
        let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
        for chunk in chunks.values() {
            *counts.entry(chunk.source.as_str()).or_default() += 1;
        }
        Ok(counts
            .into_iter()
            .map(|(source, chunks)| SourceSummary {
                source: source.to_string(),
                chunks,
            })
            .collect())
    }

    async fn count(&self) -> Result<usize, IndexError> {
        Ok(self.chunks.read().await.len())
    }
}
