//! End-to-end tests for the Docent query pipeline.
//!
//! These drive a query from submission to terminal marker through
//! retrieval, prompt assembly, the agent loop, tool dispatch and the
//! response stream, with only the model service scripted.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use docent_agent::{ChatPipeline, Increment, StreamEvent};
use docent_config::{AppConfig, RetrievalFailurePolicy};
use docent_core::document::Document;
use docent_core::embedding::Embedder;
use docent_core::error::{EmbeddingError, ErrorKind, ProviderError};
use docent_core::event::EventBus;
use docent_core::message::{Message, MessageToolCall, Query, Role};
use docent_core::provider::{Provider, ProviderRequest, ProviderResponse, StreamChunk, Usage};
use docent_index::{HashEmbedder, InMemoryIndex, Ingestor, Retriever, TextSplitter};
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

// ── Mock Provider ────────────────────────────────────────────────────────

/// Returns scripted responses in sequence, repeating the last one once
/// exhausted, and records every request.
struct ScriptedProvider {
    responses: Mutex<VecDeque<ProviderResponse>>,
    last: Mutex<Option<ProviderResponse>>,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl ScriptedProvider {
    fn new(responses: Vec<ProviderResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            last: Mutex::new(None),
            requests: Mutex::new(Vec::new()),
        }
    }

    fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "e2e_mock"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        self.requests.lock().unwrap().push(request);
        let mut last = self.last.lock().unwrap();
        if let Some(next) = self.responses.lock().unwrap().pop_front() {
            *last = Some(next);
        }
        Ok(last.clone().expect("ScriptedProvider has no responses"))
    }
}

/// Streams one text delta, then goes quiet without finishing.
struct StallingProvider;

#[async_trait::async_trait]
impl Provider for StallingProvider {
    fn name(&self) -> &str {
        "stalling"
    }

    async fn complete(&self, _request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        std::future::pending().await
    }

    async fn stream(
        &self,
        _request: ProviderRequest,
    ) -> Result<mpsc::Receiver<Result<StreamChunk, ProviderError>>, ProviderError> {
        let (tx, rx) = mpsc::channel(4);
        tokio::spawn(async move {
            let _ = tx.send(Ok(StreamChunk::text("Thinking"))).await;
            tx.closed().await;
        });
        Ok(rx)
    }
}

struct DownEmbedder;

#[async_trait::async_trait]
impl Embedder for DownEmbedder {
    fn name(&self) -> &str {
        "down"
    }

    async fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
        Err(EmbeddingError::Unavailable("connection refused".into()))
    }
}

fn text_response(text: &str) -> ProviderResponse {
    ProviderResponse {
        message: Message::assistant(text),
        usage: Some(Usage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
        }),
        model: "mock-model".into(),
        metadata: serde_json::Map::new(),
    }
}

fn tool_response(id: &str, name: &str, args: serde_json::Value) -> ProviderResponse {
    let mut response = text_response("");
    response.message.tool_calls = vec![MessageToolCall {
        id: id.into(),
        name: name.into(),
        arguments: args.to_string(),
    }];
    response
}

// ── Harness ──────────────────────────────────────────────────────────────

struct Harness {
    pipeline: ChatPipeline,
    ingestor: Ingestor,
}

fn harness_with(
    config: &AppConfig,
    provider: Arc<dyn Provider>,
    embedder: Arc<dyn Embedder>,
) -> Harness {
    let index = Arc::new(InMemoryIndex::new());
    let retriever = Retriever::from_config(Arc::clone(&embedder), index.clone(), config);
    let tools = Arc::new(
        docent_tools::default_registry(
            retriever.clone(),
            config.retrieval.top_k,
            config.retrieval.tool_threshold,
            config.timeouts.tool(),
        )
        .unwrap(),
    );
    let events = Arc::new(EventBus::default());
    Harness {
        pipeline: ChatPipeline::from_config(config, provider, retriever, tools, events),
        ingestor: Ingestor::new(embedder, index, TextSplitter::new(200, 20)),
    }
}

fn harness(provider: Arc<dyn Provider>) -> Harness {
    harness_with(&AppConfig::default(), provider, Arc::new(HashEmbedder::new(256)))
}

async fn collect(pipeline: &ChatPipeline, text: &str) -> Vec<Increment> {
    pipeline.submit(Query::new(text)).collect().await
}

fn answer_text(increments: &[Increment]) -> String {
    increments
        .iter()
        .filter_map(|i| match &i.event {
            StreamEvent::Text { content } => Some(content.as_str()),
            _ => None,
        })
        .collect()
}

fn event_types(increments: &[Increment]) -> Vec<&'static str> {
    increments.iter().map(|i| i.event.event_type()).collect()
}

// ── Scenarios ────────────────────────────────────────────────────────────

#[tokio::test]
async fn calculator_round_trip() {
    let provider = Arc::new(ScriptedProvider::new(vec![
        tool_response("call_0", "calculator", serde_json::json!({ "expression": "2+2" })),
        text_response("2 + 2 = 4"),
    ]));
    let h = harness(provider.clone());

    let increments = collect(&h.pipeline, "What is 2+2, using the calculator tool?").await;

    assert_eq!(
        event_types(&increments),
        ["tool_started", "tool_finished", "text", "done"]
    );
    match &increments[1].event {
        StreamEvent::ToolFinished { name, success, output, .. } => {
            assert_eq!(name, "calculator");
            assert!(success);
            assert_eq!(output, "4");
        }
        other => panic!("unexpected event {other:?}"),
    }
    assert!(answer_text(&increments).contains('4'));

    // The tool result went back to the model with the originating call id.
    let requests = provider.requests();
    assert_eq!(requests.len(), 2);
    let tool_message = requests[1]
        .messages
        .iter()
        .find(|m| m.role == Role::Tool)
        .expect("tool result in second request");
    assert_eq!(tool_message.tool_call_id.as_deref(), Some("call_0"));
    assert_eq!(tool_message.content, "4");
}

#[tokio::test]
async fn sequence_numbers_are_gapless() {
    let provider = Arc::new(ScriptedProvider::new(vec![
        tool_response("call_0", "add", serde_json::json!({ "x": 1, "y": 2 })),
        text_response("3"),
    ]));
    let h = harness(provider);

    let increments = collect(&h.pipeline, "add 1 and 2").await;
    let seqs: Vec<u64> = increments.iter().map(|i| i.seq).collect();
    let expected: Vec<u64> = (0..increments.len() as u64).collect();
    assert_eq!(seqs, expected);
    assert_eq!(increments.iter().filter(|i| i.event.is_terminal()).count(), 1);
}

#[tokio::test]
async fn ingested_chunk_reaches_the_prompt() {
    let provider = Arc::new(ScriptedProvider::new(vec![text_response("Refunds take 5 days.")]));
    let h = harness(provider.clone());
    let chunk = "Refunds are processed within five business days of approval.";
    h.ingestor
        .ingest(&Document::new("refunds.md", chunk))
        .await
        .unwrap();

    let increments = collect(&h.pipeline, chunk).await;
    assert_eq!(event_types(&increments).last(), Some(&"done"));

    let system = &provider.requests()[0].messages[0];
    assert_eq!(system.role, Role::System);
    assert!(system.content.contains("[Source: refunds.md]"));
    assert!(system.content.contains(chunk));
}

#[tokio::test]
async fn reingesting_keeps_only_latest_chunks() {
    let h = harness(Arc::new(ScriptedProvider::new(vec![text_response("ok")])));
    let long = "Docent splits long documents into overlapping chunks. ".repeat(20);

    let first = h.ingestor.ingest(&Document::new("guide.md", long)).await.unwrap();
    assert!(first > 1);
    let second = h
        .ingestor
        .ingest(&Document::new("guide.md", "A much shorter guide."))
        .await
        .unwrap();
    assert_eq!(second, 1);

    let summary = h.ingestor.index().summary().await.unwrap();
    assert_eq!(summary.len(), 1);
    assert_eq!(summary[0].chunks, 1);
}

#[tokio::test]
async fn round_limit_fails_the_query() {
    // The model asks for a tool on every turn.
    let provider = Arc::new(ScriptedProvider::new(vec![tool_response(
        "call_0",
        "calculator",
        serde_json::json!({ "expression": "1+1" }),
    )]));
    let mut config = AppConfig::default();
    config.agent.max_rounds = 2;
    let h = harness_with(&config, provider.clone(), Arc::new(HashEmbedder::new(256)));

    let increments = collect(&h.pipeline, "loop forever").await;

    match &increments.last().unwrap().event {
        StreamEvent::Error { kind, .. } => assert_eq!(*kind, ErrorKind::AgentRoundLimitExceeded),
        other => panic!("unexpected terminal {other:?}"),
    }
    assert_eq!(provider.requests().len(), 3);
}

#[tokio::test]
async fn tool_errors_are_fed_back_not_fatal() {
    let provider = Arc::new(ScriptedProvider::new(vec![
        tool_response("call_0", "calculator", serde_json::json!({ "expression": "1/0" })),
        text_response("That division is undefined."),
    ]));
    let h = harness(provider.clone());

    let increments = collect(&h.pipeline, "What is 1/0?").await;

    match &increments[1].event {
        StreamEvent::ToolFinished { success, .. } => assert!(!success),
        other => panic!("unexpected event {other:?}"),
    }
    assert_eq!(event_types(&increments).last(), Some(&"done"));
    let tool_message = provider.requests()[1]
        .messages
        .iter()
        .find(|m| m.role == Role::Tool)
        .cloned()
        .unwrap();
    assert!(tool_message.content.starts_with("Error (tool_execution_error)"));
}

#[tokio::test]
async fn retrieval_outage_proceeds_without_context() {
    let provider = Arc::new(ScriptedProvider::new(vec![text_response("General answer.")]));
    let h = harness_with(&AppConfig::default(), provider.clone(), Arc::new(DownEmbedder));

    let increments = collect(&h.pipeline, "Anything?").await;

    assert_eq!(
        event_types(&increments),
        ["retrieval_unavailable", "text", "done"]
    );
    let system = &provider.requests()[0].messages[0];
    assert!(!system.content.contains("[Retrieved Context]"));
}

#[tokio::test]
async fn retrieval_outage_aborts_when_configured() {
    let provider = Arc::new(ScriptedProvider::new(vec![text_response("unused")]));
    let mut config = AppConfig::default();
    config.retrieval.on_failure = RetrievalFailurePolicy::Abort;
    let h = harness_with(&config, provider.clone(), Arc::new(DownEmbedder));

    let increments = collect(&h.pipeline, "Anything?").await;

    assert_eq!(increments.len(), 1);
    match &increments[0].event {
        StreamEvent::Error { kind, .. } => assert_eq!(*kind, ErrorKind::RetrievalUnavailable),
        other => panic!("unexpected terminal {other:?}"),
    }
    assert!(provider.requests().is_empty());
}

#[tokio::test]
async fn cancellation_mid_stream_ends_with_marker() {
    let h = harness(Arc::new(StallingProvider));
    let cancel = CancellationToken::new();
    let mut stream = h
        .pipeline
        .submit_with_cancel(Query::new("Tell me a long story"), cancel.clone());

    let first = stream.next().await.unwrap();
    assert_eq!(first.event, StreamEvent::Text { content: "Thinking".into() });

    cancel.cancel();
    let rest: Vec<Increment> = stream.collect().await;
    assert_eq!(event_types(&rest), ["cancelled"]);
}
