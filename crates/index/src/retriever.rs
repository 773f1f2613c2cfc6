//! Retrieval client: query text in, ranked chunks out.

use docent_config::AppConfig;
use docent_core::document::ScoredChunk;
use docent_core::embedding::Embedder;
use docent_core::error::RetrievalError;
use docent_core::index::VectorIndex;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Embeds a query and looks up its nearest chunks. Never mutates the index.
#[derive(Clone)]
pub struct Retriever {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    embedding_timeout: Duration,
    index_timeout: Duration,
    min_score: f32,
}

impl Retriever {
    pub fn new(embedder: Arc<dyn Embedder>, index: Arc<dyn VectorIndex>) -> Self {
        Self {
            embedder,
            index,
            embedding_timeout: Duration::from_secs(10),
            index_timeout: Duration::from_secs(5),
            min_score: f32::MIN,
        }
    }

    pub fn from_config(
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
        config: &AppConfig,
    ) -> Self {
        Self::new(embedder, index)
            .with_timeouts(config.timeouts.embedding(), config.timeouts.index())
            .with_min_score(config.retrieval.min_score)
    }

    pub fn with_timeouts(mut self, embedding: Duration, index: Duration) -> Self {
        self.embedding_timeout = embedding;
        self.index_timeout = index;
        self
    }

    /// Drop hits scoring below `min_score`.
    pub fn with_min_score(mut self, min_score: f32) -> Self {
        self.min_score = min_score;
        self
    }

    pub fn index(&self) -> &Arc<dyn VectorIndex> {
        &self.index
    }

    /// At most `k` chunks, by descending similarity, ties broken by
    /// ascending chunk id.
    pub async fn retrieve(
        &self,
        query_text: &str,
        k: usize,
    ) -> Result<Vec<ScoredChunk>, RetrievalError> {
        if k == 0 {
            return Ok(Vec::new());
        }

        let embedding = timeout(self.embedding_timeout, self.embedder.embed(query_text))
            .await
            .map_err(|_| RetrievalError::Timeout {
                stage: "embedding",
                timeout_secs: self.embedding_timeout.as_secs(),
            })??;

        let mut results = timeout(self.index_timeout, self.lookup(&embedding, k))
            .await
            .map_err(|_| RetrievalError::Timeout {
                stage: "index search",
                timeout_secs: self.index_timeout.as_secs(),
            })??;

        results.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.chunk.id.cmp(&b.chunk.id))
        });
        results.truncate(k);
        debug!(k, returned = results.len(), "Retrieved context");
        Ok(results)
    }

    async fn lookup(&self, embedding: &[f32], k: usize) -> Result<Vec<ScoredChunk>, RetrievalError> {
        let hits = self.index.search(embedding, k).await?;
        let mut results = Vec::with_capacity(hits.len());
        for (id, score) in hits {
            if score < self.min_score {
                continue;
            }
            match self.index.get(&id).await? {
                Some(chunk) => results.push(ScoredChunk { chunk, score }),
                None => warn!(chunk_id = %id, "Search hit vanished before fetch"),
            }
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash_embedder::HashEmbedder;
    use crate::in_memory::InMemoryIndex;
    use async_trait::async_trait;
    use docent_core::document::{DocumentChunk, SourceSummary};
    use docent_core::error::{EmbeddingError, ErrorKind, IndexError};

    struct DownEmbedder;

    #[async_trait]
    impl Embedder for DownEmbedder {
        fn name(&self) -> &str {
            "down"
        }
        async fn embed(&self, _: &str) -> Result<Vec<f32>, EmbeddingError> {
            Err(EmbeddingError::Unavailable("connection refused".into()))
        }
    }

    struct HangingIndex;

    #[async_trait]
    impl VectorIndex for HangingIndex {
        fn name(&self) -> &str {
            "hanging"
        }
        async fn upsert(&self, _: DocumentChunk) -> Result<(), IndexError> {
            Ok(())
        }
        async fn search(&self, _: &[f32], _: usize) -> Result<Vec<(String, f32)>, IndexError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(Vec::new())
        }
        async fn get(&self, _: &str) -> Result<Option<DocumentChunk>, IndexError> {
            Ok(None)
        }
        async fn delete_by_source(&self, _: &str) -> Result<usize, IndexError> {
            Ok(0)
        }
        async fn replace_source(&self, _: &str, _: Vec<DocumentChunk>) -> Result<usize, IndexError> {
            Ok(0)
        }
        async fn summary(&self) -> Result<Vec<SourceSummary>, IndexError> {
            Ok(Vec::new())
        }
        async fn count(&self) -> Result<usize, IndexError> {
            Ok(0)
        }
    }

    async fn seeded() -> Retriever {
        let embedder = Arc::new(HashEmbedder::new(128));
        let index = Arc::new(InMemoryIndex::new());
        for (source, text) in [
            ("rust.md", "Rust guarantees memory safety without a garbage collector"),
            ("python.md", "Python is dynamically typed and garbage collected"),
            ("tea.md", "Green tea is steeped at eighty degrees"),
        ] {
            let embedding = embedder.embed(text).await.unwrap();
            index
                .upsert(DocumentChunk::new(source, 0, text).with_embedding(embedding))
                .await
                .unwrap();
        }
        Retriever::new(embedder, index)
    }

    #[tokio::test]
    async fn exact_chunk_text_ranks_first() {
        let retriever = seeded().await;
        let results = retriever
            .retrieve("Green tea is steeped at eighty degrees", 2)
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].chunk.id, "tea.md#0");
        assert!((results[0].score - 1.0).abs() < 1e-4);
        assert!(results[0].score >= results[1].score);
    }

    #[tokio::test]
    async fn never_returns_more_than_k() {
        let retriever = seeded().await;
        assert_eq!(retriever.retrieve("garbage", 1).await.unwrap().len(), 1);
        assert!(retriever.retrieve("garbage", 0).await.unwrap().is_empty());
        assert_eq!(retriever.retrieve("garbage", 10).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn min_score_filters_weak_hits() {
        let retriever = seeded().await.with_min_score(0.99);
        let results = retriever.retrieve("Green tea is steeped at eighty degrees", 3).await.unwrap();
        assert_eq!(results.len(), 1);
    }

    #[tokio::test]
    async fn ties_break_by_chunk_id() {
        let embedder = Arc::new(HashEmbedder::new(32));
        let index = Arc::new(InMemoryIndex::new());
        let embedding = embedder.embed("same text").await.unwrap();
        for source in ["b.md", "a.md", "c.md"] {
            index
                .upsert(DocumentChunk::new(source, 0, "same text").with_embedding(embedding.clone()))
                .await
                .unwrap();
        }
        let results = Retriever::new(embedder, index).retrieve("same text", 3).await.unwrap();
        let ids: Vec<&str> = results.iter().map(|r| r.chunk.id.as_str()).collect();
        assert_eq!(ids, vec!["a.md#0", "b.md#0", "c.md#0"]);
    }

    #[tokio::test]
    async fn embedding_outage_is_retrieval_unavailable() {
        let retriever = Retriever::new(Arc::new(DownEmbedder), Arc::new(InMemoryIndex::new()));
        let err = retriever.retrieve("anything", 3).await.unwrap_err();
        assert!(matches!(err, RetrievalError::Embedding(_)));
        assert_eq!(err.kind(), ErrorKind::RetrievalUnavailable);
    }

    #[tokio::test(start_paused = true)]
    async fn index_timeout_is_retrieval_unavailable() {
        let retriever = Retriever::new(Arc::new(HashEmbedder::new(8)), Arc::new(HangingIndex))
            .with_timeouts(Duration::from_secs(1), Duration::from_secs(2));
        let err = retriever.retrieve("anything", 3).await.unwrap_err();
        assert!(matches!(err, RetrievalError::Timeout { stage: "index search", timeout_secs: 2 }));
    }
}
