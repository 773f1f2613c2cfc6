//! # Docent Core
//!
//! Domain types, traits, and error definitions for the Docent chat-serving
//! pipeline. This crate has no HTTP or storage dependencies; it defines the
//! model every other crate implements against.
//!
//! ## Seams
//!
//! Every external collaborator is a trait here:
//! - [`Provider`] for the language model
//! - [`Embedder`] for the embedding service
//! - [`VectorIndex`] for the similarity store
//! - [`Tool`] for agent capabilities
//!
//! Implementations live in their respective crates, so tests can swap in
//! scripted stand-ins without touching the pipeline.

pub mod document;
pub mod embedding;
pub mod error;
pub mod event;
pub mod index;
pub mod message;
pub mod provider;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use document::{Document, DocumentChunk, ScoredChunk, SourceSummary};
pub use embedding::Embedder;
pub use error::{
    EmbeddingError, Error, ErrorKind, IndexError, ProviderError, Result, RetrievalError,
    ToolError,
};
pub use event::{DomainEvent, EventBus};
pub use index::VectorIndex;
pub use message::{ConversationId, Message, MessageToolCall, Query, Role};
pub use provider::{Provider, ProviderRequest, ProviderResponse, StreamChunk, ToolDefinition};
pub use tool::{Tool, ToolCall, ToolRegistry, ToolResult};
