//! The agent loop: a small state machine driving one query.
//!
//! ```text
//!            ┌──────── tool calls ────────┐
//!            v                            │
//!   AWAITING_MODEL ──tool calls──> AWAITING_TOOLS
//!       │    │
//!       │    └── final text ──> DONE
//!       └── model error / round limit ──> FAILED
//!   (any state) ── cancel ──> CANCELLED
//! ```
//!
//! Text deltas are forwarded to the response sink as they arrive. Every
//! wait (model stream, tool dispatch, sink send) is raced against the
//! query's cancellation token.

use crate::context::ModelInput;
use crate::dispatcher::ToolDispatcher;
use crate::stream::{Outcome, ResponseSink, SinkError, StreamEvent};
use crate::transcript::Transcript;
use docent_config::AppConfig;
use docent_core::error::{ErrorKind, ProviderError};
use docent_core::message::{Message, MessageToolCall};
use docent_core::provider::{Provider, ProviderRequest, StreamChunk, ToolDefinition, Usage};
use docent_core::tool::ToolCall;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct AgentSettings {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    /// Tool rounds allowed before the loop gives up
    pub max_rounds: usize,
    /// Limit on opening the model stream and on each gap between chunks
    pub model_timeout: Duration,
}

impl AgentSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            model: config.provider.chat_model.clone(),
            temperature: config.provider.temperature,
            max_tokens: Some(config.provider.max_tokens),
            max_rounds: config.agent.max_rounds,
            model_timeout: config.timeouts.model(),
        }
    }
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

/// Loop states. `Done`, `Failed` and `Cancelled` are terminal.
#[derive(Debug, Clone, PartialEq)]
pub enum LoopState {
    AwaitingModel,
    AwaitingTools(Vec<ToolCall>),
    Done,
    Failed { kind: ErrorKind, message: String },
    Cancelled,
}

impl LoopState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed { .. } | Self::Cancelled)
    }

    fn failed(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::Failed {
            kind,
            message: message.into(),
        }
    }

    fn into_outcome(self) -> Outcome {
        match self {
            Self::Done => Outcome::Success,
            Self::Failed { kind, message } => Outcome::Failed { kind, message },
            Self::Cancelled => Outcome::Cancelled,
            // Only reachable through a logic error in the loop itself
            Self::AwaitingModel | Self::AwaitingTools(_) => {
                Outcome::failed(ErrorKind::Internal, "agent loop exited in a non-terminal state")
            }
        }
    }
}

/// What a finished run looked like.
#[derive(Debug, Clone)]
pub struct LoopReport {
    pub outcome: Outcome,
    /// Model calls made
    pub model_calls: usize,
    /// Tool rounds completed
    pub tool_rounds: usize,
    pub transcript_turns: usize,
    pub usage: Option<Usage>,
}

/// One complete model turn.
struct ModelTurn {
    text: String,
    calls: Vec<ToolCall>,
    usage: Option<Usage>,
}

pub struct AgentLoop {
    provider: Arc<dyn Provider>,
    dispatcher: ToolDispatcher,
    tool_definitions: Vec<ToolDefinition>,
    settings: AgentSettings,
}

impl AgentLoop {
    pub fn new(provider: Arc<dyn Provider>, dispatcher: ToolDispatcher, settings: AgentSettings) -> Self {
        let tool_definitions = dispatcher.registry().definitions();
        Self {
            provider,
            dispatcher,
            tool_definitions,
            settings,
        }
    }

    pub fn settings(&self) -> &AgentSettings {
        &self.settings
    }

    /// Drive the loop to a terminal state. Does not send the terminal
    /// marker; the caller owns the sink's lifetime.
    pub async fn run(
        &self,
        input: &ModelInput,
        sink: &mut ResponseSink,
        cancel: &CancellationToken,
    ) -> LoopReport {
        let mut transcript = Transcript::new();
        let mut state = LoopState::AwaitingModel;
        let mut model_calls = 0;
        let mut tool_rounds = 0;
        let mut usage: Option<Usage> = None;

        while !state.is_terminal() {
            if cancel.is_cancelled() {
                state = LoopState::Cancelled;
                break;
            }

            state = match state {
                LoopState::AwaitingModel => {
                    model_calls += 1;
                    debug!(round = model_calls, turns = transcript.len(), "Calling model");
                    let mut messages = input.messages.clone();
                    messages.extend(transcript.to_messages());

                    match self.call_model(messages, sink, cancel).await {
                        Err(halt) => halt,
                        Ok(turn) => {
                            accumulate(&mut usage, turn.usage.as_ref());
                            if turn.calls.is_empty() {
                                match transcript.push_model_output(turn.text, vec![]) {
                                    Ok(_) => LoopState::Done,
                                    Err(e) => LoopState::failed(ErrorKind::ModelProtocolError, e.to_string()),
                                }
                            } else if tool_rounds >= self.settings.max_rounds {
                                warn!(max_rounds = self.settings.max_rounds, "Round limit reached");
                                LoopState::failed(
                                    ErrorKind::AgentRoundLimitExceeded,
                                    format!(
                                        "model still requesting tools after {} rounds",
                                        self.settings.max_rounds
                                    ),
                                )
                            } else {
                                match transcript.push_model_output(turn.text, turn.calls.clone()) {
                                    Ok(_) => LoopState::AwaitingTools(turn.calls),
                                    Err(e) => LoopState::failed(ErrorKind::ModelProtocolError, e.to_string()),
                                }
                            }
                        }
                    }
                }

                LoopState::AwaitingTools(calls) => {
                    tool_rounds += 1;
                    self.run_tools(&calls, &mut transcript, sink, cancel).await
                }

                terminal => terminal,
            };
        }

        info!(
            outcome = %state_label(&state),
            model_calls,
            tool_rounds,
            "Agent loop finished"
        );
        LoopReport {
            outcome: state.into_outcome(),
            model_calls,
            tool_rounds,
            transcript_turns: transcript.len(),
            usage,
        }
    }

    async fn run_tools(
        &self,
        calls: &[ToolCall],
        transcript: &mut Transcript,
        sink: &mut ResponseSink,
        cancel: &CancellationToken,
    ) -> LoopState {
        for call in calls {
            let started = StreamEvent::ToolStarted {
                call_id: call.id.clone(),
                name: call.name.clone(),
                arguments: call.arguments.clone(),
            };
            if let Err(e) = sink.send(started).await {
                return halt_on_sink(e);
            }
        }

        let Some(results) = self.dispatcher.dispatch_all(calls, cancel).await else {
            return LoopState::Cancelled;
        };

        for (call, result) in calls.iter().zip(results) {
            let finished = StreamEvent::ToolFinished {
                call_id: call.id.clone(),
                name: call.name.clone(),
                success: result.success,
                output: result.model_content(),
            };
            if let Err(e) = transcript.push_tool_result(result) {
                return LoopState::failed(ErrorKind::Internal, e.to_string());
            }
            if let Err(e) = sink.send(finished).await {
                return halt_on_sink(e);
            }
        }
        LoopState::AwaitingModel
    }

    /// Stream one model turn, forwarding text as it arrives.
    async fn call_model(
        &self,
        messages: Vec<Message>,
        sink: &mut ResponseSink,
        cancel: &CancellationToken,
    ) -> Result<ModelTurn, LoopState> {
        let request = ProviderRequest {
            model: self.settings.model.clone(),
            messages,
            temperature: self.settings.temperature,
            max_tokens: self.settings.max_tokens,
            tools: self.tool_definitions.clone(),
            stream: true,
            stop: vec![],
        };
        let timeout = self.settings.model_timeout;

        let opened = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(LoopState::Cancelled),
            opened = tokio::time::timeout(timeout, self.provider.stream(request)) => opened,
        };
        let mut rx = match opened {
            Err(_) => return Err(model_timeout(timeout)),
            Ok(Err(e)) => return Err(model_failure(e)),
            Ok(Ok(rx)) => rx,
        };

        let mut text = String::new();
        loop {
            let chunk = next_chunk(&mut rx, timeout, cancel).await?;
            if let Some(delta) = chunk.content
                && !delta.is_empty()
            {
                text.push_str(&delta);
                sink.send(StreamEvent::Text { content: delta })
                    .await
                    .map_err(halt_on_sink)?;
            }
            if chunk.done {
                let calls = validate_tool_calls(chunk.tool_calls)?;
                return Ok(ModelTurn {
                    text,
                    calls,
                    usage: chunk.usage,
                });
            }
        }
    }
}

async fn next_chunk(
    rx: &mut mpsc::Receiver<Result<StreamChunk, ProviderError>>,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<StreamChunk, LoopState> {
    let received = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(LoopState::Cancelled),
        received = tokio::time::timeout(timeout, rx.recv()) => received,
    };
    match received {
        Err(_) => Err(model_timeout(timeout)),
        Ok(None) => Err(LoopState::failed(
            ErrorKind::ModelUnavailable,
            "model stream ended before completion",
        )),
        Ok(Some(Err(e))) => Err(model_failure(e)),
        Ok(Some(Ok(chunk))) => Ok(chunk),
    }
}

/// Check the model's tool calls: non-empty names and ids, arguments that
/// are a JSON object, ids unique within the turn.
fn validate_tool_calls(raw: Vec<MessageToolCall>) -> Result<Vec<ToolCall>, LoopState> {
    let protocol = |message: String| LoopState::failed(ErrorKind::ModelProtocolError, message);
    let mut seen = HashSet::new();
    raw.into_iter()
        .map(|call| {
            if call.name.trim().is_empty() {
                return Err(protocol(format!("tool call '{}' has an empty name", call.id)));
            }
            if call.id.is_empty() {
                return Err(protocol(format!("call to '{}' has no id", call.name)));
            }
            if !seen.insert(call.id.clone()) {
                return Err(protocol(format!("duplicate tool call id '{}'", call.id)));
            }
            let arguments = if call.arguments.trim().is_empty() {
                serde_json::Value::Object(serde_json::Map::new())
            } else {
                serde_json::from_str(&call.arguments).map_err(|e| {
                    protocol(format!("arguments for '{}' are not valid JSON: {e}", call.name))
                })?
            };
            if !arguments.is_object() {
                return Err(protocol(format!("arguments for '{}' are not a JSON object", call.name)));
            }
            Ok(ToolCall {
                id: call.id,
                name: call.name,
                arguments,
            })
        })
        .collect()
}

fn model_failure(e: ProviderError) -> LoopState {
    warn!(error = %e, "Model call failed");
    LoopState::failed(e.kind(), e.to_string())
}

fn model_timeout(timeout: Duration) -> LoopState {
    warn!(timeout_secs = timeout.as_secs(), "Model call timed out");
    LoopState::failed(
        ErrorKind::ModelUnavailable,
        format!("model did not respond within {}s", timeout.as_secs()),
    )
}

fn halt_on_sink(e: SinkError) -> LoopState {
    match e {
        SinkError::Overflow => LoopState::failed(ErrorKind::StreamOverflow, e.to_string()),
        SinkError::Cancelled | SinkError::Closed => LoopState::Cancelled,
    }
}

fn state_label(state: &LoopState) -> &'static str {
    match state {
        LoopState::AwaitingModel => "awaiting_model",
        LoopState::AwaitingTools(_) => "awaiting_tools",
        LoopState::Done => "done",
        LoopState::Failed { .. } => "failed",
        LoopState::Cancelled => "cancelled",
    }
}

fn accumulate(total: &mut Option<Usage>, turn: Option<&Usage>) {
    let Some(turn) = turn else { return };
    let sum = total.get_or_insert(Usage {
        prompt_tokens: 0,
        completion_tokens: 0,
        total_tokens: 0,
    });
    sum.prompt_tokens += turn.prompt_tokens;
    sum.completion_tokens += turn.completion_tokens;
    sum.total_tokens += turn.total_tokens;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::PromptAssembler;
    use crate::stream::{Increment, response_channel};
    use crate::test_helpers::{ScriptedProvider, Step, calls, text, tool_call};
    use docent_config::Backpressure;
    use docent_core::message::{Query, Role};
    use docent_core::tool::ToolRegistry;
    use docent_tools::CalculatorTool;
    use futures::StreamExt;

    fn registry() -> Arc<ToolRegistry> {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(CalculatorTool)).unwrap();
        Arc::new(registry)
    }

    fn settings(max_rounds: usize) -> AgentSettings {
        AgentSettings {
            model: "test-model".into(),
            temperature: 0.0,
            max_tokens: None,
            max_rounds,
            model_timeout: Duration::from_secs(5),
        }
    }

    fn input(question: &str) -> ModelInput {
        PromptAssembler::new("You are a test assistant.", 4096)
            .assemble(&Query::new(question), &[], &[])
            .unwrap()
    }

    /// Run the loop to completion and collect everything the consumer saw.
    async fn run(provider: Arc<ScriptedProvider>, max_rounds: usize) -> (LoopReport, Vec<Increment>) {
        let cancel = CancellationToken::new();
        let (mut sink, stream) = response_channel(64, Backpressure::Block, cancel.clone());
        let agent = AgentLoop::new(provider, ToolDispatcher::new(registry()), settings(max_rounds));
        let report = agent.run(&input("question"), &mut sink, &cancel).await;
        sink.finish(report.outcome.clone());
        (report, stream.collect().await)
    }

    fn texts(increments: &[Increment]) -> String {
        increments
            .iter()
            .filter_map(|i| match &i.event {
                StreamEvent::Text { content } => Some(content.as_str()),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn plain_answer_streams_deltas_in_order() {
        let provider = Arc::new(ScriptedProvider::new(vec![text(&["Hel", "lo", " there"])]));
        let (report, increments) = run(provider, 5).await;

        assert_eq!(report.outcome, Outcome::Success);
        assert_eq!(report.model_calls, 1);
        let events: Vec<_> = increments.iter().map(|i| i.event.clone()).collect();
        assert_eq!(
            events,
            vec![
                StreamEvent::Text { content: "Hel".into() },
                StreamEvent::Text { content: "lo".into() },
                StreamEvent::Text { content: " there".into() },
                StreamEvent::Done,
            ]
        );
    }

    #[tokio::test]
    async fn calculator_round_trip() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            calls(vec![tool_call("c1", "calculator", serde_json::json!({"expression": "2+2"}))]),
            text(&["2+2 is ", "4."]),
        ]));
        let (report, increments) = run(provider.clone(), 5).await;

        assert_eq!(report.outcome, Outcome::Success);
        assert_eq!(report.tool_rounds, 1);
        assert_eq!(texts(&increments), "2+2 is 4.");
        assert!(increments.iter().any(|i| matches!(
            &i.event,
            StreamEvent::ToolFinished { name, success: true, output, .. } if name == "calculator" && output == "4"
        )));

        // The second model call saw the call and its result.
        let second = &provider.requests()[1];
        let tail: Vec<_> = second.messages.iter().rev().take(2).collect();
        assert_eq!(tail[0].role, Role::Tool);
        assert_eq!(tail[0].content, "4");
        assert_eq!(tail[1].tool_calls[0].name, "calculator");
    }

    #[tokio::test]
    async fn round_limit_fails_the_query() {
        let provider = Arc::new(ScriptedProvider::new(vec![calls(vec![tool_call(
            "c1",
            "calculator",
            serde_json::json!({"expression": "1+1"}),
        )])]));
        let (report, increments) = run(provider, 2).await;

        assert!(matches!(
            report.outcome,
            Outcome::Failed { kind: ErrorKind::AgentRoundLimitExceeded, .. }
        ));
        assert_eq!(report.tool_rounds, 2);
        assert_eq!(report.model_calls, 3);
        let last = increments.last().unwrap();
        assert!(matches!(
            last.event,
            StreamEvent::Error { kind: ErrorKind::AgentRoundLimitExceeded, .. }
        ));
    }

    #[tokio::test]
    async fn tool_errors_are_fed_back_not_fatal() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            calls(vec![tool_call("c1", "no_such_tool", serde_json::json!({}))]),
            text(&["Sorry, I could not do that."]),
        ]));
        let (report, _) = run(provider.clone(), 5).await;

        assert_eq!(report.outcome, Outcome::Success);
        let fed_back = provider.requests()[1].messages.last().unwrap().content.clone();
        assert!(fed_back.starts_with("Error (unknown_tool)"));
    }

    #[tokio::test]
    async fn malformed_tool_calls_are_protocol_errors() {
        for bad in [
            tool_call("c1", "", serde_json::json!({})),
            tool_call("c1", "calculator", serde_json::json!([1, 2])),
            MessageToolCall {
                id: "c1".into(),
                name: "calculator".into(),
                arguments: "{not json".into(),
            },
        ] {
            let provider = Arc::new(ScriptedProvider::new(vec![calls(vec![bad])]));
            let (report, _) = run(provider, 5).await;
            assert!(matches!(
                report.outcome,
                Outcome::Failed { kind: ErrorKind::ModelProtocolError, .. }
            ));
        }
    }

    #[tokio::test]
    async fn duplicate_call_ids_are_protocol_errors() {
        let args = serde_json::json!({"expression": "1"});
        let provider = Arc::new(ScriptedProvider::new(vec![calls(vec![
            tool_call("dup", "calculator", args.clone()),
            tool_call("dup", "calculator", args),
        ])]));
        let (report, _) = run(provider, 5).await;
        assert!(matches!(
            report.outcome,
            Outcome::Failed { kind: ErrorKind::ModelProtocolError, .. }
        ));
    }

    #[tokio::test]
    async fn model_errors_map_to_kinds() {
        let cases = [
            (Step::Fail(ProviderError::Network("refused".into())), ErrorKind::ModelUnavailable),
            (
                Step::Fail(ProviderError::Protocol("garbage".into())),
                ErrorKind::ModelProtocolError,
            ),
            (
                Step::Interrupted { deltas: vec!["par".into()] },
                ErrorKind::ModelUnavailable,
            ),
        ];
        for (step, kind) in cases {
            let provider = Arc::new(ScriptedProvider::new(vec![step]));
            let (report, increments) = run(provider, 5).await;
            assert!(matches!(&report.outcome, Outcome::Failed { kind: k, .. } if *k == kind));
            assert!(increments.last().unwrap().event.is_terminal());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn silent_model_times_out() {
        let provider = Arc::new(ScriptedProvider::new(vec![Step::Hang]));
        let (report, _) = run(provider, 5).await;
        assert!(matches!(
            report.outcome,
            Outcome::Failed { kind: ErrorKind::ModelUnavailable, .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_while_waiting_on_the_model() {
        let provider = Arc::new(ScriptedProvider::new(vec![Step::Hang]));
        let cancel = CancellationToken::new();
        let (mut sink, stream) = response_channel(8, Backpressure::Block, cancel.clone());
        let agent = AgentLoop::new(provider, ToolDispatcher::new(registry()), settings(5));

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let report = agent.run(&input("q"), &mut sink, &cancel).await;
        assert_eq!(report.outcome, Outcome::Cancelled);
        sink.finish(report.outcome);
        let items: Vec<_> = stream.collect().await;
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].event, StreamEvent::Cancelled);
    }

    struct SlowTool;

    #[async_trait::async_trait]
    impl docent_core::tool::Tool for SlowTool {
        fn name(&self) -> &str {
            "slow"
        }
        fn description(&self) -> &str {
            "Takes an hour"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({ "type": "object" })
        }
        async fn execute(
            &self,
            _: serde_json::Value,
        ) -> Result<docent_core::tool::ToolResult, docent_core::error::ToolError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(docent_core::tool::ToolResult::ok("", "too late"))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_while_a_tool_runs() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            calls(vec![tool_call("c1", "slow", serde_json::json!({}))]),
            text(&["never sent"]),
        ]));
        let mut registry = ToolRegistry::new().with_timeout(Duration::from_secs(7200));
        registry.register(Box::new(SlowTool)).unwrap();
        let cancel = CancellationToken::new();
        let (mut sink, stream) = response_channel(8, Backpressure::Block, cancel.clone());
        let agent = AgentLoop::new(
            provider.clone(),
            ToolDispatcher::new(Arc::new(registry)),
            settings(5),
        );

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let report = agent.run(&input("q"), &mut sink, &cancel).await;
        assert_eq!(report.outcome, Outcome::Cancelled);
        assert_eq!(report.model_calls, 1);
        // Only the model's call turn; no tool result was appended.
        assert_eq!(report.transcript_turns, 1);
        assert_eq!(provider.requests().len(), 1);

        sink.finish(report.outcome);
        let events: Vec<_> = stream.map(|i| i.event).collect().await;
        assert_eq!(events.len(), 2);
        assert!(matches!(&events[0], StreamEvent::ToolStarted { name, .. } if name == "slow"));
        assert_eq!(events[1], StreamEvent::Cancelled);
    }

    #[test]
    fn usage_accumulates() {
        let mut total = None;
        let turn = Usage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
        };
        accumulate(&mut total, Some(&turn));
        accumulate(&mut total, None);
        accumulate(&mut total, Some(&turn));
        assert_eq!(total.unwrap().total_tokens, 30);
    }
}
