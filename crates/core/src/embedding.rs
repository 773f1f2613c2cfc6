//! Embedder trait — the abstraction over the embedding service.

use async_trait::async_trait;
use crate::error::EmbeddingError;

/// Turns text into a fixed-length vector.
///
/// Every vector produced by one embedder has the same length; the index
/// relies on that when comparing query and chunk vectors.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// A human-readable name (e.g., "openai", "hash").
    fn name(&self) -> &str;

    /// Embed a single text.
    async fn embed(&self, text: &str) -> std::result::Result<Vec<f32>, EmbeddingError>;

    /// Embed many texts, preserving order.
    ///
    /// Default implementation calls `embed()` once per text.
    async fn embed_batch(
        &self,
        texts: &[String],
    ) -> std::result::Result<Vec<Vec<f32>>, EmbeddingError> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }
}
