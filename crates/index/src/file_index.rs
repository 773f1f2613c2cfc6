//! File-backed index — persistent JSON-lines storage.
//!
//! Each line is one JSON-encoded `DocumentChunk`, embedding included. The
//! whole file is loaded on open and rewritten after every mutation, so the
//! file on disk always matches the index the process is serving.
//!
//! Default location: `~/.docent/index.jsonl`

use async_trait::async_trait;
use docent_core::document::{DocumentChunk, SourceSummary};
use docent_core::error::IndexError;
use docent_core::index::VectorIndex;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, warn};
use crate::in_memory::InMemoryIndex;

/// A JSONL-persisted index that serves reads from memory.
pub struct FileIndex {
    path: PathBuf,
    inner: InMemoryIndex,
    // Held across each mutation and its flush
    write_lock: Mutex<()>,
}

impl FileIndex {
    /// Open the index at `path`.
    ///
    /// A missing file starts an empty index (created on first write).
    /// Corrupted lines are skipped with a warning.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, IndexError> {
        let path = path.into();
        let chunks = Self::load_from_disk(&path).await?;
        debug!(path = %path.display(), count = chunks.len(), "File index loaded");
        Ok(Self {
            path,
            inner: InMemoryIndex::from_chunks(chunks),
            write_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load_from_disk(path: &Path) -> Result<Vec<DocumentChunk>, IndexError> {
        let content = match tokio::fs::read_to_string(path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(IndexError::Unavailable(format!(
                    "failed to read {}: {e}",
                    path.display()
                )));
            }
        };

        Ok(content
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .filter_map(|(n, line)| match serde_json::from_str::<DocumentChunk>(line) {
                Ok(chunk) => Some(chunk),
                Err(e) => {
                    warn!(line = n + 1, error = %e, "Skipping corrupted index entry");
                    None
                }
            })
            .collect())
    }

    /// Rewrite the file from the in-memory state via a temp file + rename.
    /// Callers hold `write_lock`.
    async fn flush(&self) -> Result<(), IndexError> {
        let chunks = self.inner.snapshot().await;

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                IndexError::Storage(format!("Failed to create index directory: {e}"))
            })?;
        }

        let mut content = String::new();
        for chunk in &chunks {
            let line = serde_json::to_string(chunk)
                .map_err(|e| IndexError::Storage(format!("Failed to serialize chunk: {e}")))?;
            content.push_str(&line);
            content.push('\n');
        }

        let tmp = self.path.with_extension("jsonl.tmp");
        tokio::fs::write(&tmp, content)
            .await
            .map_err(|e| IndexError::Storage(format!("Failed to write index file: {e}")))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| IndexError::Storage(format!("Failed to replace index file: {e}")))?;
        Ok(())
    }
}

#[async_trait]
impl VectorIndex for FileIndex {
    fn name(&self) -> &str {
        "file"
    }

    async fn upsert(&self, chunk: DocumentChunk) -> Result<(), IndexError> {
        let _guard = self.write_lock.lock().await;
        self.inner.upsert(chunk).await?;
        self.flush().await
    }

    async fn upsert_batch(&self, chunks: Vec<DocumentChunk>) -> Result<(), IndexError> {
        let _guard = self.write_lock.lock().await;
        self.inner.upsert_batch(chunks).await?;
        self.flush().await
    }

    async fn search(&self, embedding: &[f32], k: usize) -> Result<Vec<(String, f32)>, IndexError> {
        self.inner.search(embedding, k).await
    }

    async fn get(&self, id: &str) -> Result<Option<DocumentChunk>, IndexError> {
        self.inner.get(id).await
    }

    async fn delete_by_source(&self, source: &str) -> Result<usize, IndexError> {
        let _guard = self.write_lock.lock().await;
        let removed = self.inner.delete_by_source(source).await?;
        if removed > 0 {
            self.flush().await?;
        }
        Ok(removed)
    }

    async fn replace_source(&self, source: &str, chunks: Vec<DocumentChunk>) -> Result<usize, IndexError> {
        let _guard = self.write_lock.lock().await;
        let added = chunks.len();
        let removed = self.inner.replace_source(source, chunks).await?;
        if removed > 0 || added > 0 {
            self.flush().await?;
        }
        Ok(removed)
    }

    async fn summary(&self) -> Result<Vec<SourceSummary>, IndexError> {
        self.inner.summary().await
    }

    async fn count(&self) -> Result<usize, IndexError> {
        self.inner.count().await
    }
}
