//! Prompt assembler: preamble, retrieved context, history and the current
//! query, fitted into a token budget.
//!
//! The assembled input is a message list:
//!
//! 1. one system message holding the preamble followed by a
//!    `[Retrieved Context]` section, each chunk tagged with its source,
//!    in descending similarity;
//! 2. the surviving history turns, oldest first;
//! 3. the current query as a user message.
//!
//! When the whole thing does not fit, history goes first (oldest turn
//! first, an assistant tool call together with its tool replies), then context (lowest similarity first). The preamble and the
//! query are never trimmed; if they alone exceed the budget the query
//! cannot be served.
//!
//! # Determinism
//!
//! Identical inputs yield identical message roles and contents. Context
//! order ties are broken by chunk id, and nothing time-dependent feeds
//! into trimming.

use crate::context::token;
use docent_config::PromptConfig;
use docent_core::document::ScoredChunk;
use docent_core::error::ErrorKind;
use docent_core::message::{Message, Query, Role};
use serde::Serialize;
use std::collections::VecDeque;

const CONTEXT_HEADER: &str = "\n\n[Retrieved Context]\n";

/// Model input for the first round of a query.
#[derive(Debug, Clone)]
pub struct ModelInput {
    pub messages: Vec<Message>,
    /// Context that made it into the prompt, highest similarity first
    pub context: Vec<ScoredChunk>,
    pub metadata: AssemblyMetadata,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AssemblyMetadata {
    /// Estimated tokens in the assembled input
    pub total_tokens: usize,
    pub budget: usize,
    pub history_included: usize,
    pub context_included: usize,
    pub drops: Vec<DropInfo>,
}

/// Items removed from one layer to satisfy the budget.
#[derive(Debug, Clone, Serialize)]
pub struct DropInfo {
    pub layer: &'static str,
    pub items_dropped: usize,
    pub tokens_dropped: usize,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum AssemblyError {
    #[error(
        "system preamble ({preamble_tokens} tokens) and query ({query_tokens} tokens) exceed the budget of {budget} tokens"
    )]
    Overflow {
        preamble_tokens: usize,
        query_tokens: usize,
        budget: usize,
    },
}

impl AssemblyError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::AssemblyOverflow
    }
}

/// Stateless; build once and share.
#[derive(Debug, Clone)]
pub struct PromptAssembler {
    preamble: String,
    budget_tokens: usize,
}

impl PromptAssembler {
    pub fn new(preamble: impl Into<String>, budget_tokens: usize) -> Self {
        Self {
            preamble: preamble.into(),
            budget_tokens,
        }
    }

    pub fn from_config(config: &PromptConfig) -> Self {
        Self::new(config.system_preamble.clone(), config.budget_tokens)
    }

    pub fn budget(&self) -> usize {
        self.budget_tokens
    }

    /// Assemble the model input for `query`.
    ///
    /// `history` is oldest first. `context` may arrive in any order.
    pub fn assemble(
        &self,
        query: &Query,
        history: &[Message],
        context: &[ScoredChunk],
    ) -> Result<ModelInput, AssemblyError> {
        let preamble_tokens = token::MESSAGE_OVERHEAD + token::estimate_tokens(&self.preamble);
        let query_tokens = token::MESSAGE_OVERHEAD + token::estimate_tokens(&query.text);
        let reserved = preamble_tokens + query_tokens;
        if reserved > self.budget_tokens {
            return Err(AssemblyError::Overflow {
                preamble_tokens,
                query_tokens,
                budget: self.budget_tokens,
            });
        }
        let available = self.budget_tokens - reserved;

        let mut ranked = context.to_vec();
        ranked.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.chunk.id.cmp(&b.chunk.id))
        });
        let mut chunks: Vec<(ScoredChunk, usize)> = ranked
            .into_iter()
            .map(|c| {
                let cost = token::estimate_chunk_tokens(&c);
                (c, cost)
            })
            .collect();
        let mut turns: VecDeque<(&Message, usize)> = history
            .iter()
            .map(|m| (m, token::estimate_message_tokens(m)))
            .collect();

        let header_tokens = token::estimate_tokens(CONTEXT_HEADER);
        let context_cost = |chunks: &[(ScoredChunk, usize)]| -> usize {
            if chunks.is_empty() {
                0
            } else {
                header_tokens + chunks.iter().map(|(_, t)| t).sum::<usize>()
            }
        };
        let mut history_cost: usize = turns.iter().map(|(_, t)| t).sum();

        let mut drops = Vec::new();

        let mut dropped = DropInfo {
            layer: "history",
            items_dropped: 0,
            tokens_dropped: 0,
        };
        while context_cost(&chunks) + history_cost > available {
            let Some((_, cost)) = turns.pop_front() else { break };
            history_cost -= cost;
            dropped.items_dropped += 1;
            dropped.tokens_dropped += cost;
            // A tool reply must not outlive the call that requested it
            while let Some(&(message, cost)) = turns.front()
                && message.role == Role::Tool
            {
                turns.pop_front();
                history_cost -= cost;
                dropped.items_dropped += 1;
                dropped.tokens_dropped += cost;
            }
        }
        if dropped.items_dropped > 0 {
            drops.push(dropped);
        }

        let mut dropped = DropInfo {
            layer: "context",
            items_dropped: 0,
            tokens_dropped: 0,
        };
        while context_cost(&chunks) + history_cost > available {
            let Some((_, cost)) = chunks.pop() else { break };
            dropped.items_dropped += 1;
            dropped.tokens_dropped += cost;
        }
        if dropped.items_dropped > 0 {
            drops.push(dropped);
        }

        let mut system = self.preamble.clone();
        if !chunks.is_empty() {
            system.push_str(CONTEXT_HEADER);
            for (chunk, _) in &chunks {
                system.push_str(&token::render_chunk(chunk));
            }
            system.truncate(system.trim_end().len());
        }

        let mut messages = Vec::with_capacity(turns.len() + 2);
        let mut system_message = Message::system(system);
        system_message.id = format!("{}:system", query.id);
        messages.push(system_message);
        messages.extend(turns.iter().map(|(m, _)| (*m).clone()));
        let mut user = Message::user(&query.text);
        user.id = query.id.clone();
        messages.push(user);

        let metadata = AssemblyMetadata {
            total_tokens: reserved + context_cost(&chunks) + history_cost,
            budget: self.budget_tokens,
            history_included: turns.len(),
            context_included: chunks.len(),
            drops,
        };
        Ok(ModelInput {
            messages,
            context: chunks.into_iter().map(|(c, _)| c).collect(),
            metadata,
        })
    }
}
