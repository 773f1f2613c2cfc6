//! Ingestion pipeline: document → chunks → embeddings → index.
//!
//! Re-ingesting a source replaces its chunks. All chunks are embedded before
//! the old ones are swapped out in a single index call, so an embedding
//! failure leaves the previous version searchable and concurrent ingests of
//! one source never leave a mix of versions behind.

use chrono::Utc;
use docent_config::IngestionConfig;
use docent_core::document::{Document, DocumentChunk};
use docent_core::embedding::Embedder;
use docent_core::error::{EmbeddingError, IndexError};
use docent_core::event::{DomainEvent, EventBus};
use docent_core::index::VectorIndex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use crate::chunker::TextSplitter;

/// Texts sent to the embedder per request.
const EMBED_BATCH: usize = 64;

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("embedding failed: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("index write failed: {0}")]
    Index(#[from] IndexError),

    #[error("failed to read {path}: {reason}")]
    Io { path: PathBuf, reason: String },

    #[error("documents not found: {}", .0.join(", "))]
    NotFound(Vec<String>),

    #[error("invalid document name: {0:?}")]
    InvalidName(String),
}

/// Outcome of a multi-document ingestion.
#[derive(Debug, Default, Clone, Serialize)]
pub struct IngestReport {
    /// Chunks stored per source
    pub sources: BTreeMap<String, usize>,
    /// Files that could not be read
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub skipped: Vec<String>,
}

impl IngestReport {
    pub fn total_chunks(&self) -> usize {
        self.sources.values().sum()
    }
}

/// Reject names that could escape the documents directory.
pub fn validate_source_name(name: &str) -> Result<(), IngestError> {
    if name.is_empty() || name.starts_with('.') || name.contains('/') || name.contains('\\') {
        return Err(IngestError::InvalidName(name.to_string()));
    }
    Ok(())
}

pub struct Ingestor {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    splitter: TextSplitter,
    events: Option<Arc<EventBus>>,
}

impl Ingestor {
    pub fn new(embedder: Arc<dyn Embedder>, index: Arc<dyn VectorIndex>, splitter: TextSplitter) -> Self {
        Self {
            embedder,
            index,
            splitter,
            events: None,
        }
    }

    pub fn from_config(
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
        config: &IngestionConfig,
    ) -> Self {
        Self::new(
            embedder,
            index,
            TextSplitter::new(config.chunk_size, config.chunk_overlap),
        )
    }

    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn index(&self) -> &Arc<dyn VectorIndex> {
        &self.index
    }

    /// Chunk, embed and store one document. Returns the number of chunks stored.
    pub async fn ingest(&self, document: &Document) -> Result<usize, IngestError> {
        let texts = self.splitter.split(&document.text);

        let mut embeddings = Vec::with_capacity(texts.len());
        for batch in texts.chunks(EMBED_BATCH) {
            embeddings.extend(self.embedder.embed_batch(batch).await?);
        }

        let chunks: Vec<DocumentChunk> = texts
            .into_iter()
            .zip(embeddings)
            .enumerate()
            .map(|(seq, (text, embedding))| {
                let mut chunk = DocumentChunk::new(&document.source, seq, text).with_embedding(embedding);
                chunk.metadata = document.metadata.clone();
                chunk.metadata.insert("source".into(), document.source.clone().into());
                chunk.metadata.insert("seq".into(), seq.into());
                chunk
            })
            .collect();
        let stored = chunks.len();

        let replaced = self.index.replace_source(&document.source, chunks).await?;

        info!(source = %document.source, chunks = stored, replaced, "Ingested document");
        if let Some(events) = &self.events {
            events.publish(DomainEvent::DocumentIngested {
                source: document.source.clone(),
                chunks: stored,
                replaced,
                timestamp: Utc::now(),
            });
        }
        Ok(stored)
    }

    /// Ingest every `*.md` file under `dir`, recursively. The file name is
    /// the source reference. Unreadable files are skipped and reported.
    pub async fn ingest_dir(&self, dir: &Path) -> Result<IngestReport, IngestError> {
        let files = markdown_files(dir).map_err(|e| IngestError::Io {
            path: dir.to_path_buf(),
            reason: e.to_string(),
        })?;

        let mut report = IngestReport::default();
        for path in files {
            let source = file_name(&path);
            match tokio::fs::read_to_string(&path).await {
                Ok(text) => {
                    let count = self.ingest(&Document::new(source.clone(), text)).await?;
                    report.sources.insert(source, count);
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping unreadable document");
                    report.skipped.push(source);
                }
            }
        }
        Ok(report)
    }

    /// Ingest the named files from `dir`. Fails before touching the index
    /// if any name is invalid or missing.
    pub async fn ingest_files(&self, dir: &Path, names: &[String]) -> Result<IngestReport, IngestError> {
        for name in names {
            validate_source_name(name)?;
        }
        let missing: Vec<String> = names
            .iter()
            .filter(|name| !dir.join(name).is_file())
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(IngestError::NotFound(missing));
        }

        let mut report = IngestReport::default();
        for name in names {
            let path = dir.join(name);
            let text = tokio::fs::read_to_string(&path).await.map_err(|e| IngestError::Io {
                path: path.clone(),
                reason: e.to_string(),
            })?;
            let count = self.ingest(&Document::new(name.clone(), text)).await?;
            report.sources.insert(name.clone(), count);
        }
        Ok(report)
    }

    /// Remove every chunk of each named source. Returns per-source counts;
    /// zero means the source was not indexed.
    pub async fn delete_sources(&self, names: &[String]) -> Result<BTreeMap<String, usize>, IndexError> {
        let mut deleted = BTreeMap::new();
        for name in names {
            let count = self.index.delete_by_source(name).await?;
            info!(source = %name, chunks = count, "Deleted source");
            deleted.insert(name.clone(), count);
        }
        Ok(deleted)
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn markdown_files(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut pending = vec![dir.to_path_buf()];
    while let Some(current) = pending.pop() {
        for entry in std::fs::read_dir(&current)? {
            let path = entry?.path();
            if path.is_dir() {
                pending.push(path);
            } else if path.extension().is_some_and(|ext| ext == "md") {
                files.push(path);
            }
        }
    }
    files.sort();
    Ok(files)
}
