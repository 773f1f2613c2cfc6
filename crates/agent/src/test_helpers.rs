//! Shared test helpers: a provider that plays back scripted turns.

use docent_core::error::ProviderError;
use docent_core::message::{Message, MessageToolCall};
use docent_core::provider::{Provider, ProviderRequest, ProviderResponse, StreamChunk, Usage};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;

/// One scripted model turn.
#[derive(Debug, Clone)]
pub enum Step {
    /// Stream these text deltas, then finish with these tool calls.
    Reply {
        deltas: Vec<String>,
        tool_calls: Vec<MessageToolCall>,
    },
    /// Fail the call outright.
    Fail(ProviderError),
    /// Stream the deltas, then stop without a final chunk.
    Interrupted { deltas: Vec<String> },
    /// Never answer.
    Hang,
}

pub fn text(deltas: &[&str]) -> Step {
    Step::Reply {
        deltas: deltas.iter().map(|s| s.to_string()).collect(),
        tool_calls: vec![],
    }
}

pub fn calls(tool_calls: Vec<MessageToolCall>) -> Step {
    Step::Reply {
        deltas: vec![],
        tool_calls,
    }
}

pub fn tool_call(id: &str, name: &str, args: serde_json::Value) -> MessageToolCall {
    MessageToolCall {
        id: id.into(),
        name: name.into(),
        arguments: args.to_string(),
    }
}

/// Plays back `steps` in order; once exhausted, repeats the last one.
pub struct ScriptedProvider {
    steps: Mutex<VecDeque<Step>>,
    last: Mutex<Option<Step>>,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl ScriptedProvider {
    pub fn new(steps: Vec<Step>) -> Self {
        Self {
            steps: Mutex::new(steps.into()),
            last: Mutex::new(None),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn next_step(&self, request: ProviderRequest) -> Step {
        self.requests.lock().unwrap().push(request);
        let mut last = self.last.lock().unwrap();
        match self.steps.lock().unwrap().pop_front() {
            Some(step) => {
                *last = Some(step.clone());
                step
            }
            None => last.clone().expect("ScriptedProvider has no steps"),
        }
    }
}

fn usage() -> Usage {
    Usage {
        prompt_tokens: 10,
        completion_tokens: 5,
        total_tokens: 15,
    }
}

#[async_trait::async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        match self.next_step(request) {
            Step::Reply { deltas, tool_calls } => {
                let mut message = Message::assistant(deltas.concat());
                message.tool_calls = tool_calls;
                Ok(ProviderResponse {
                    message,
                    usage: Some(usage()),
                    model: "scripted".into(),
                    metadata: serde_json::Map::new(),
                })
            }
            Step::Fail(e) => Err(e),
            Step::Interrupted { .. } => Err(ProviderError::StreamInterrupted("scripted".into())),
            Step::Hang => std::future::pending().await,
        }
    }

    async fn stream(
        &self,
        request: ProviderRequest,
    ) -> Result<mpsc::Receiver<Result<StreamChunk, ProviderError>>, ProviderError> {
        let step = self.next_step(request);
        let (tx, rx) = mpsc::channel(16);
        match step {
            Step::Fail(e) => return Err(e),
            Step::Hang => {
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    drop(tx);
                });
            }
            Step::Reply { deltas, tool_calls } => {
                tokio::spawn(async move {
                    for delta in deltas {
                        let _ = tx.send(Ok(StreamChunk::text(delta))).await;
                    }
                    let _ = tx
                        .send(Ok(StreamChunk {
                            content: None,
                            tool_calls,
                            done: true,
                            usage: Some(usage()),
                        }))
                        .await;
                });
            }
            Step::Interrupted { deltas } => {
                tokio::spawn(async move {
                    for delta in deltas {
                        let _ = tx.send(Ok(StreamChunk::text(delta))).await;
                    }
                    let _ = tx
                        .send(Err(ProviderError::StreamInterrupted("connection reset".into())))
                        .await;
                });
            }
        }
        Ok(rx)
    }
}
