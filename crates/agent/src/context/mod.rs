//! Prompt assembly under a token budget.
//!
//! | Layer | Source | Trim strategy |
//! |-------|--------|---------------|
//! | System preamble | config | Never trimmed |
//! | Retrieved context | retriever | Lowest similarity dropped (after history) |
//! | Conversation history | query | Oldest turns dropped first |
//! | Current query | query | Never trimmed |

pub mod assembler;
pub mod token;

pub use assembler::{AssemblyError, AssemblyMetadata, DropInfo, ModelInput, PromptAssembler};
