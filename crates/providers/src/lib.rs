//! LLM and embedding provider implementations for Docent.
//!
//! The chat side implements `docent_core::Provider`; [`ProviderEmbedder`]
//! adapts any provider's embeddings endpoint to `docent_core::Embedder`.

pub mod embedder;
pub mod openai_compat;
pub mod retry;

pub use embedder::ProviderEmbedder;
pub use openai_compat::OpenAiCompatProvider;
pub use retry::RetryPolicy;
