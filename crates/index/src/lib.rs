//! Vector index, chunking, retrieval and ingestion for Docent.
//!
//! Two `docent_core::VectorIndex` implementations live here (in-memory and
//! JSONL file), plus a local hashing embedder, the text splitter, the
//! [`Retriever`] used at query time and the [`Ingestor`] used to fill the
//! index.

pub mod chunker;
pub mod file_index;
pub mod hash_embedder;
pub mod in_memory;
pub mod ingest;
pub mod retriever;
pub mod vector;

pub use chunker::TextSplitter;
pub use file_index::FileIndex;
pub use hash_embedder::HashEmbedder;
pub use in_memory::InMemoryIndex;
pub use ingest::{IngestError, IngestReport, Ingestor, validate_source_name};
pub use retriever::Retriever;
pub use vector::cosine_similarity;
