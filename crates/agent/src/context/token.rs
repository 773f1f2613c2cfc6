//! Token estimation.
//!
//! Character heuristic: about 4 bytes per token, rounded up. Close enough
//! for BPE tokenizers on English text and, more importantly, stable, so
//! budget decisions are reproducible.

use docent_core::document::ScoredChunk;
use docent_core::message::Message;

/// Per-message overhead for role and delimiters in the wire format.
pub const MESSAGE_OVERHEAD: usize = 4;

/// Estimate the token count for a string.
pub fn estimate_tokens(text: &str) -> usize {
    text.len().div_ceil(4)
}

pub fn estimate_message_tokens(message: &Message) -> usize {
    let calls: usize = message
        .tool_calls
        .iter()
        .map(|c| estimate_tokens(&c.name) + estimate_tokens(&c.arguments))
        .sum();
    MESSAGE_OVERHEAD + estimate_tokens(&message.content) + calls
}

pub fn estimate_messages_tokens(messages: &[Message]) -> usize {
    messages.iter().map(estimate_message_tokens).sum()
}

/// Tokens a retrieved chunk costs once rendered into the prompt.
pub fn estimate_chunk_tokens(chunk: &ScoredChunk) -> usize {
    estimate_tokens(&render_chunk(chunk))
}

/// How a chunk appears in the prompt: tagged with its source, followed
/// by a blank line.
pub fn render_chunk(chunk: &ScoredChunk) -> String {
    format!("[Source: {}]\n{}\n\n", chunk.chunk.source, chunk.chunk.text)
}
