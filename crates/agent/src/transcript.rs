//! Agent transcript: the turns exchanged with the model while serving one
//! query.
//!
//! Turn sequence numbers strictly increase, and a tool result is only
//! accepted for a call that an earlier model turn requested and that has
//! not been answered yet. Call ids only need to be unique among the calls
//! still outstanding, since some providers number calls per turn.

use docent_core::message::{Message, MessageToolCall};
use docent_core::tool::{ToolCall, ToolResult};
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub enum TurnContent {
    ModelOutput { text: String, calls: Vec<ToolCall> },
    ToolResult { name: String, result: ToolResult },
}

#[derive(Debug, Clone)]
pub struct Turn {
    pub seq: u64,
    pub content: TurnContent,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TranscriptError {
    #[error("duplicate tool call id '{0}'")]
    DuplicateCallId(String),

    #[error("tool result for unknown or already answered call '{0}'")]
    UnmatchedResult(String),
}

#[derive(Debug, Default)]
pub struct Transcript {
    turns: Vec<Turn>,
    next_seq: u64,
    /// call id -> tool name, for calls still awaiting a result
    outstanding: HashMap<String, String>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn has_outstanding_calls(&self) -> bool {
        !self.outstanding.is_empty()
    }

    /// Append a model turn. Rejected as a whole if any call id repeats
    /// within the turn or collides with an unanswered call.
    pub fn push_model_output(
        &mut self,
        text: impl Into<String>,
        calls: Vec<ToolCall>,
    ) -> Result<u64, TranscriptError> {
        let mut ids = std::collections::HashSet::new();
        for call in &calls {
            if !ids.insert(call.id.as_str()) || self.outstanding.contains_key(&call.id) {
                return Err(TranscriptError::DuplicateCallId(call.id.clone()));
            }
        }
        for call in &calls {
            self.outstanding.insert(call.id.clone(), call.name.clone());
        }
        Ok(self.push(TurnContent::ModelOutput {
            text: text.into(),
            calls,
        }))
    }

    pub fn push_tool_result(&mut self, result: ToolResult) -> Result<u64, TranscriptError> {
        let name = self
            .outstanding
            .remove(&result.call_id)
            .ok_or_else(|| TranscriptError::UnmatchedResult(result.call_id.clone()))?;
        Ok(self.push(TurnContent::ToolResult { name, result }))
    }

    fn push(&mut self, content: TurnContent) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.turns.push(Turn { seq, content });
        seq
    }

    /// The transcript in provider message form, to append after the
    /// assembled prompt.
    pub fn to_messages(&self) -> Vec<Message> {
        self.turns
            .iter()
            .map(|turn| match &turn.content {
                TurnContent::ModelOutput { text, calls } => {
                    let mut message = Message::assistant(text.clone());
                    message.tool_calls = calls
                        .iter()
                        .map(|c| MessageToolCall {
                            id: c.id.clone(),
                            name: c.name.clone(),
                            arguments: c.arguments.to_string(),
                        })
                        .collect();
                    message
                }
                TurnContent::ToolResult { result, .. } => {
                    Message::tool_result(result.call_id.clone(), result.model_content())
                }
            })
            .collect()
    }
}
