//! OpenAI-compatible provider implementation.
//!
//! Works with OpenAI, Ollama, vLLM, LM Studio and any endpoint exposing
//! `/chat/completions` and `/embeddings` in the OpenAI wire format.
//!
//! Supports:
//! - Chat completions (non-streaming and streaming SSE)
//! - Tool use / function calling
//! - Embeddings
//!
//! Every request goes through [`RetryPolicy`]; only the initial HTTP
//! exchange is retried, never a stream that has started delivering.

use async_trait::async_trait;
use docent_config::AppConfig;
use docent_core::error::ProviderError;
use docent_core::message::{Message, MessageToolCall, Role};
use docent_core::provider::*;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};
use crate::retry::RetryPolicy;

const MAX_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// An OpenAI-compatible LLM provider.
pub struct OpenAiCompatProvider {
    name: String,
    base_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
    timeout: Duration,
    retry: RetryPolicy,
}

impl OpenAiCompatProvider {
    /// Create a provider.
    ///
    /// `timeout` bounds connecting and every wait for the next bytes of a
    /// response. Non-streaming calls must also finish within it; a stream
    /// may run as long as it keeps delivering.
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .connect_timeout(timeout.min(MAX_CONNECT_TIMEOUT))
            .read_timeout(timeout)
            .build()
            .map_err(|e| ProviderError::NotConfigured(format!("HTTP client: {e}")))?;

        Ok(Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            client,
            timeout,
            retry: RetryPolicy::default(),
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Build the provider described by `[provider]`, `[timeouts]` and `[retry]`.
    ///
    /// Local endpoints work without a key; anything else needs one.
    pub fn from_config(config: &AppConfig) -> Result<Self, ProviderError> {
        let base_url = &config.provider.base_url;
        let local = base_url.contains("localhost") || base_url.contains("127.0.0.1");
        if config.api_key.is_none() && !local {
            return Err(ProviderError::NotConfigured(
                "no API key: set DOCENT_API_KEY or OPENAI_API_KEY".into(),
            ));
        }
        let name = if local { "local" } else { "openai" };
        Ok(Self::new(name, base_url.clone(), config.api_key.clone(), config.timeouts.model())?
            .with_retry(RetryPolicy::from(&config.retry)))
    }

    /// Convert our Message types to OpenAI API format.
    fn to_api_messages(messages: &[Message]) -> Vec<ApiMessage> {
        messages
            .iter()
            .map(|m| ApiMessage {
                role: match m.role {
                    Role::User => "user",
                    Role::Assistant => "assistant",
                    Role::System => "system",
                    Role::Tool => "tool",
                }
                .into(),
                content: Some(m.content.clone()),
                tool_calls: (!m.tool_calls.is_empty()).then(|| {
                    m.tool_calls
                        .iter()
                        .map(|tc| ApiToolCall {
                            id: tc.id.clone(),
                            r#type: "function".into(),
                            function: ApiFunction {
                                name: tc.name.clone(),
                                arguments: tc.arguments.clone(),
                            },
                        })
                        .collect()
                }),
                tool_call_id: m.tool_call_id.clone(),
            })
            .collect()
    }

    /// Convert tool definitions to OpenAI API format.
    fn to_api_tools(tools: &[ToolDefinition]) -> Vec<ApiToolDefinition> {
        tools
            .iter()
            .map(|t| ApiToolDefinition {
                r#type: "function".into(),
                function: ApiToolFunction {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    parameters: t.parameters.clone(),
                },
            })
            .collect()
    }

    fn chat_body(request: &ProviderRequest, stream: bool) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": request.model,
            "messages": Self::to_api_messages(&request.messages),
            "temperature": request.temperature,
            "stream": stream,
        });
        if stream {
            body["stream_options"] = serde_json::json!({ "include_usage": true });
        }
        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }
        if !request.tools.is_empty() {
            body["tools"] = serde_json::json!(Self::to_api_tools(&request.tools));
        }
        if !request.stop.is_empty() {
            body["stop"] = serde_json::json!(request.stop);
        }
        body
    }

    /// POST `body` to `path`, retrying transient failures. Unless
    /// `streaming`, the whole exchange is held to the provider timeout.
    async fn post(
        &self,
        path: &str,
        body: &serde_json::Value,
        streaming: bool,
    ) -> Result<reqwest::Response, ProviderError> {
        let url = format!("{}{path}", self.base_url);
        let url = url.as_str();
        self.retry
            .run(path, move || self.post_once(url, body, streaming))
            .await
    }

    async fn post_once(
        &self,
        url: &str,
        body: &serde_json::Value,
        streaming: bool,
    ) -> Result<reqwest::Response, ProviderError> {
        let mut builder = self.client.post(url).json(body);
        if !streaming {
            builder = builder.timeout(self.timeout);
        }
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        let response = builder.send().await.map_err(map_transport_error)?;
        check_status(response).await
    }
}

fn map_transport_error(e: reqwest::Error) -> ProviderError {
    if e.is_timeout() {
        ProviderError::Timeout(e.to_string())
    } else {
        ProviderError::Network(e.to_string())
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ProviderError> {
    let status = response.status().as_u16();
    match status {
        200..=299 => Ok(response),
        429 => {
            let retry_after_secs = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse().ok())
                .unwrap_or(0);
            Err(ProviderError::RateLimited { retry_after_secs })
        }
        401 | 403 => Err(ProviderError::AuthenticationFailed(
            "Invalid API key or insufficient permissions".into(),
        )),
        _ => {
            let message = response.text().await.unwrap_or_default();
            warn!(status, body = %message, "Provider returned error");
            Err(ProviderError::ApiError {
                status_code: status,
                message,
            })
        }
    }
}

#[async_trait]
impl docent_core::Provider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ProviderResponse, ProviderError> {
        debug!(provider = %self.name, model = %request.model, "Sending completion request");
        let response = self
            .post("/chat/completions", &Self::chat_body(&request, false), false)
            .await?;

        let api_response: ApiResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Protocol(format!("Failed to parse response: {e}")))?;

        let choice = api_response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::Protocol("No choices in response".into()))?;

        let mut message = Message::assistant(choice.message.content.unwrap_or_default());
        message.tool_calls = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|tc| MessageToolCall {
                id: tc.id,
                name: tc.function.name,
                arguments: tc.function.arguments,
            })
            .collect();

        Ok(ProviderResponse {
            message,
            usage: api_response.usage.map(Usage::from),
            model: api_response.model,
            metadata: serde_json::Map::new(),
        })
    }

    async fn embed(
        &self,
        request: EmbeddingRequest,
    ) -> std::result::Result<EmbeddingResponse, ProviderError> {
        debug!(
            provider = %self.name,
            model = %request.model,
            count = request.inputs.len(),
            "Sending embedding request"
        );
        let body = serde_json::json!({
            "model": request.model,
            "input": request.inputs,
            "encoding_format": "float",
        });
        let response = self.post("/embeddings", &body, false).await?;

        let mut api_resp: EmbeddingApiResponse = response.json().await.map_err(|e| {
            ProviderError::Protocol(format!("Failed to parse embedding response: {e}"))
        })?;
        api_resp.data.sort_by_key(|d| d.index);

        Ok(EmbeddingResponse {
            embeddings: api_resp.data.into_iter().map(|d| d.embedding).collect(),
            model: api_resp.model,
            usage: api_resp.usage.map(|u| Usage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: 0,
                total_tokens: u.total_tokens,
            }),
        })
    }

    async fn stream(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<
        mpsc::Receiver<std::result::Result<StreamChunk, ProviderError>>,
        ProviderError,
    > {
        debug!(provider = %self.name, model = %request.model, tools = request.tools.len(), "Sending streaming request");
        let response = self
            .post("/chat/completions", &Self::chat_body(&request, true), true)
            .await?;

        let (tx, rx) = mpsc::channel(64);
        let provider_name = self.name.clone();
        tokio::spawn(async move {
            if pump_events(response.bytes_stream(), &tx).await.is_err() {
                trace!(provider = %provider_name, "Stream receiver dropped");
            }
        });

        Ok(rx)
    }
}

/// Decode an SSE body into stream chunks on `tx`.
///
/// Exactly one terminal item is sent: the final `done` chunk after
/// `[DONE]`, or an error. A body that ends early is `StreamInterrupted`;
/// a payload that cannot be decoded, or an in-stream error object, is
/// `Protocol`. Returns `Err` once the receiver is gone.
async fn pump_events<S, B, E>(
    body: S,
    tx: &mpsc::Sender<Result<StreamChunk, ProviderError>>,
) -> Result<(), mpsc::error::SendError<Result<StreamChunk, ProviderError>>>
where
    S: futures::Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
{
    let mut body = std::pin::pin!(body);
    let mut decoder = SseDecoder::default();
    let mut usage = None;

    while let Some(next) = body.next().await {
        let bytes = match next {
            Ok(b) => b,
            Err(e) => return tx.send(Err(ProviderError::StreamInterrupted(e.to_string()))).await,
        };

        for event in decoder.feed(bytes.as_ref()) {
            match event {
                SseEvent::Text(text) => tx.send(Ok(StreamChunk::text(text))).await?,
                SseEvent::Usage(u) => usage = Some(u),
                SseEvent::Malformed(reason) => {
                    warn!(reason = %reason, "Malformed model stream");
                    return tx.send(Err(ProviderError::Protocol(reason))).await;
                }
                SseEvent::Done => return tx.send(Ok(decoder.final_chunk(usage))).await,
            }
        }
    }

    tx.send(Err(ProviderError::StreamInterrupted(
        "response ended before [DONE]".into(),
    )))
    .await
}

// --- SSE decoding ---

#[derive(Debug, PartialEq)]
enum SseEvent {
    Text(String),
    Usage(Usage),
    /// Undecodable payload or an error reported mid-stream
    Malformed(String),
    Done,
}

/// Incremental decoder for a `/chat/completions` event stream.
///
/// Buffers raw bytes so multi-byte characters split across network
/// chunks survive intact.
#[derive(Default)]
struct SseDecoder {
    buffer: Vec<u8>,
    tool_calls: ToolCallAssembler,
}

impl SseDecoder {
    fn feed(&mut self, bytes: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(bytes);
        let mut events = Vec::new();

        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw);
            let line = line.trim_end_matches(['\n', '\r']);

            let Some(data) = line.strip_prefix("data:") else {
                // blank separators, comments, event names
                continue;
            };
            let data = data.trim();
            if data == "[DONE]" {
                events.push(SseEvent::Done);
                continue;
            }

            let value: serde_json::Value = match serde_json::from_str(data) {
                Ok(value) => value,
                Err(e) => {
                    events.push(SseEvent::Malformed(format!("unparseable stream chunk: {e}")));
                    continue;
                }
            };
            if let Some(error) = value.get("error") {
                let message = error
                    .get("message")
                    .and_then(|m| m.as_str())
                    .map_or_else(|| error.to_string(), str::to_string);
                events.push(SseEvent::Malformed(format!("model service error: {message}")));
                continue;
            }

            match serde_json::from_value::<StreamResponse>(value) {
                Ok(resp) => {
                    if let Some(choice) = resp.choices.into_iter().next() {
                        for delta in choice.delta.tool_calls.unwrap_or_default() {
                            self.tool_calls.apply(delta);
                        }
                        if let Some(text) = choice.delta.content.filter(|c| !c.is_empty()) {
                            events.push(SseEvent::Text(text));
                        }
                    }
                    if let Some(usage) = resp.usage {
                        events.push(SseEvent::Usage(usage.into()));
                    }
                }
                Err(e) => events.push(SseEvent::Malformed(format!("unexpected stream chunk: {e}"))),
            }
        }

        events
    }

    fn final_chunk(&mut self, usage: Option<Usage>) -> StreamChunk {
        StreamChunk {
            content: None,
            tool_calls: self.tool_calls.finish(),
            done: true,
            usage,
        }
    }
}

/// Reassembles tool calls that arrive as fragments keyed by index.
#[derive(Default)]
struct ToolCallAssembler {
    partial: BTreeMap<u32, PartialToolCall>,
}

#[derive(Default)]
struct PartialToolCall {
    id: String,
    name: String,
    arguments: String,
}

impl ToolCallAssembler {
    fn apply(&mut self, delta: StreamToolCallDelta) {
        let entry = self.partial.entry(delta.index).or_default();
        if let Some(id) = delta.id {
            entry.id = id;
        }
        if let Some(function) = delta.function {
            if let Some(name) = function.name {
                entry.name = name;
            }
            if let Some(args) = function.arguments {
                entry.arguments.push_str(&args);
            }
        }
    }

    /// Completed calls in index order. Missing ids are synthesized.
    fn finish(&mut self) -> Vec<MessageToolCall> {
        std::mem::take(&mut self.partial)
            .into_iter()
            .map(|(index, p)| MessageToolCall {
                id: if p.id.is_empty() { format!("call_{index}") } else { p.id },
                name: p.name,
                arguments: p.arguments,
            })
            .collect()
    }
}

// --- OpenAI API types (internal) ---

#[derive(Debug, Serialize, Deserialize)]
struct ApiMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ApiToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolCall {
    id: String,
    r#type: String,
    function: ApiFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiFunction {
    name: String,
    arguments: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolDefinition {
    r#type: String,
    function: ApiToolFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    model: String,
    choices: Vec<ApiChoice>,
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiMessage,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

impl From<ApiUsage> for Usage {
    fn from(u: ApiUsage) -> Self {
        Usage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        }
    }
}

#[derive(Debug, Deserialize)]
struct EmbeddingApiResponse {
    data: Vec<EmbeddingData>,
    model: String,
    usage: Option<EmbeddingApiUsage>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    #[serde(default)]
    index: usize,
}

#[derive(Debug, Deserialize)]
struct EmbeddingApiUsage {
    prompt_tokens: u32,
    total_tokens: u32,
}

/// A single SSE `data: {...}` chunk from a streaming response.
#[derive(Debug, Deserialize)]
struct StreamResponse {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<StreamToolCallDelta>>,
}

#[derive(Debug, Deserialize)]
struct StreamToolCallDelta {
    index: u32,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<StreamFunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct StreamFunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use docent_core::Provider;

    fn sse(lines: &[&str]) -> Vec<u8> {
        lines
            .iter()
            .map(|l| format!("data: {l}\n\n"))
            .collect::<String>()
            .into_bytes()
    }

    #[test]
    fn constructor_trims_trailing_slash() {
        let provider =
            OpenAiCompatProvider::new("ollama", "http://localhost:11434/v1/", None, Duration::from_secs(5))
                .unwrap();
        assert_eq!(provider.name(), "ollama");
        assert_eq!(provider.base_url, "http://localhost:11434/v1");
    }

    #[test]
    fn from_config_requires_key_for_remote_endpoint() {
        let config = AppConfig::default();
        assert!(matches!(
            OpenAiCompatProvider::from_config(&config),
            Err(ProviderError::NotConfigured(_))
        ));

        let mut local = AppConfig::default();
        local.provider.base_url = "http://localhost:11434/v1".into();
        assert_eq!(OpenAiCompatProvider::from_config(&local).unwrap().name(), "local");
    }

    #[test]
    fn message_conversion() {
        let messages = vec![Message::system("You are helpful"), Message::user("Hello")];
        let api_messages = OpenAiCompatProvider::to_api_messages(&messages);
        assert_eq!(api_messages.len(), 2);
        assert_eq!(api_messages[0].role, "system");
        assert_eq!(api_messages[1].role, "user");
        assert!(api_messages[1].tool_calls.is_none());
    }

    #[test]
    fn message_conversion_with_tool_calls_and_results() {
        let mut msg = Message::assistant("");
        msg.tool_calls = vec![MessageToolCall {
            id: "call_1".into(),
            name: "calculator".into(),
            arguments: r#"{"expression":"2+2"}"#.into(),
        }];
        let api_msgs =
            OpenAiCompatProvider::to_api_messages(&[msg, Message::tool_result("call_1", "4")]);
        let tc = api_msgs[0].tool_calls.as_ref().unwrap();
        assert_eq!(tc[0].function.name, "calculator");
        assert_eq!(api_msgs[1].role, "tool");
        assert_eq!(api_msgs[1].tool_call_id.as_deref(), Some("call_1"));
    }

    #[test]
    fn chat_body_includes_tools_only_when_present() {
        let mut request = ProviderRequest {
            model: "m".into(),
            messages: vec![Message::user("hi")],
            temperature: 0.0,
            max_tokens: Some(64),
            tools: vec![],
            stream: true,
            stop: vec![],
        };
        let body = OpenAiCompatProvider::chat_body(&request, true);
        assert!(body.get("tools").is_none());
        assert_eq!(body["stream_options"]["include_usage"], true);
        assert_eq!(body["max_tokens"], 64);

        request.tools.push(ToolDefinition {
            name: "calculator".into(),
            description: "math".into(),
            parameters: serde_json::json!({"type": "object"}),
        });
        let body = OpenAiCompatProvider::chat_body(&request, false);
        assert_eq!(body["tools"][0]["type"], "function");
        assert_eq!(body["tools"][0]["function"]["name"], "calculator");
        assert!(body.get("stream_options").is_none());
    }

    #[test]
    fn decoder_emits_text_in_order() {
        let mut decoder = SseDecoder::default();
        let events = decoder.feed(&sse(&[
            r#"{"choices":[{"delta":{"role":"assistant","content":""}}]}"#,
            r#"{"choices":[{"delta":{"content":"Hel"}}]}"#,
            r#"{"choices":[{"delta":{"content":"lo"},"finish_reason":null}]}"#,
            "[DONE]",
        ]));
        assert_eq!(
            events,
            vec![
                SseEvent::Text("Hel".into()),
                SseEvent::Text("lo".into()),
                SseEvent::Done
            ]
        );
    }

    #[test]
    fn decoder_handles_lines_split_across_chunks() {
        let bytes = sse(&[r#"{"choices":[{"delta":{"content":"héllo"}}]}"#]);
        // split inside the two-byte 'é'
        let split = bytes.iter().position(|b| *b == 0xC3).unwrap() + 1;
        let mut decoder = SseDecoder::default();
        assert!(decoder.feed(&bytes[..split]).is_empty());
        assert_eq!(decoder.feed(&bytes[split..]), vec![SseEvent::Text("héllo".into())]);
    }

    #[test]
    fn decoder_skips_comments_and_event_names() {
        let mut decoder = SseDecoder::default();
        let events = decoder.feed(b": keep-alive\n\nevent: ping\n\n");
        assert!(events.is_empty());
    }

    #[test]
    fn decoder_flags_garbage_and_error_objects() {
        let mut decoder = SseDecoder::default();
        let events = decoder.feed(&sse(&[
            "{not json}",
            r#"{"error":{"message":"context length exceeded","type":"invalid_request_error"}}"#,
            r#"{"choices":"nope"}"#,
        ]));
        assert_eq!(events.len(), 3);
        assert!(matches!(&events[0], SseEvent::Malformed(r) if r.starts_with("unparseable")));
        assert_eq!(
            events[1],
            SseEvent::Malformed("model service error: context length exceeded".into())
        );
        assert!(matches!(&events[2], SseEvent::Malformed(r) if r.starts_with("unexpected")));
    }

    async fn pump(parts: Vec<&'static str>) -> Vec<Result<StreamChunk, ProviderError>> {
        let body = futures::stream::iter(parts.into_iter().map(Ok::<_, std::io::Error>));
        let (tx, mut rx) = mpsc::channel(16);
        pump_events(body, &tx).await.unwrap();
        drop(tx);
        let mut items = Vec::new();
        while let Some(item) = rx.recv().await {
            items.push(item);
        }
        items
    }

    #[tokio::test]
    async fn complete_stream_ends_with_done_chunk() {
        let items = pump(vec![
            "data: {\"choices\":[{\"delta\":{\"content\":\"Hi\"}}]}\n\n",
            "data: [DONE]\n\n",
        ])
        .await;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_ref().unwrap().content.as_deref(), Some("Hi"));
        assert!(items[1].as_ref().unwrap().done);
    }

    #[tokio::test]
    async fn body_ending_without_done_is_interrupted() {
        let items = pump(vec!["data: {\"choices\":[{\"delta\":{\"content\":\"The answer is\"}}]}\n\n"]).await;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_ref().unwrap().content.as_deref(), Some("The answer is"));
        assert!(matches!(items[1], Err(ProviderError::StreamInterrupted(_))));
    }

    #[tokio::test]
    async fn in_stream_error_is_a_protocol_failure() {
        let items = pump(vec![
            "data: {\"error\":{\"message\":\"overloaded\"}}\n\n",
            "data: [DONE]\n\n",
        ])
        .await;
        assert_eq!(items.len(), 1);
        assert!(matches!(&items[0], Err(ProviderError::Protocol(m)) if m.contains("overloaded")));
    }

    #[test]
    fn decoder_reports_usage() {
        let mut decoder = SseDecoder::default();
        let events = decoder.feed(&sse(&[
            r#"{"choices":[],"usage":{"prompt_tokens":10,"completion_tokens":5,"total_tokens":15}}"#,
        ]));
        assert_eq!(
            events,
            vec![SseEvent::Usage(Usage { prompt_tokens: 10, completion_tokens: 5, total_tokens: 15 })]
        );
    }

    #[test]
    fn tool_call_fragments_assemble_in_index_order() {
        let mut decoder = SseDecoder::default();
        decoder.feed(&sse(&[
            r#"{"choices":[{"delta":{"tool_calls":[{"index":1,"id":"call_b","function":{"name":"search_docs","arguments":""}}]}}]}"#,
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_a","function":{"name":"calculator","arguments":"{\"expr"}}]}}]}"#,
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"ession\": \"2+2\"}"}}]}}]}"#,
            r#"{"choices":[{"delta":{"tool_calls":[{"index":1,"function":{"arguments":"{\"query\":\"x\"}"}}]}}]}"#,
        ]));
        let chunk = decoder.final_chunk(None);
        assert!(chunk.done);
        assert_eq!(chunk.tool_calls.len(), 2);
        assert_eq!(chunk.tool_calls[0].id, "call_a");
        assert_eq!(chunk.tool_calls[0].arguments, r#"{"expression": "2+2"}"#);
        assert_eq!(chunk.tool_calls[1].name, "search_docs");
    }

    #[test]
    fn missing_tool_call_id_is_synthesized() {
        let mut assembler = ToolCallAssembler::default();
        assembler.apply(StreamToolCallDelta {
            index: 3,
            id: None,
            function: Some(StreamFunctionDelta { name: Some("add".into()), arguments: None }),
        });
        let calls = assembler.finish();
        assert_eq!(calls[0].id, "call_3");
        assert!(assembler.finish().is_empty());
    }

    #[test]
    fn parse_embedding_response_restores_input_order() {
        let data = r#"{
            "data": [
                {"embedding": [0.4, 0.5], "index": 1},
                {"embedding": [0.1, 0.2], "index": 0}
            ],
            "model": "text-embedding-3-small",
            "usage": {"prompt_tokens": 8, "total_tokens": 8}
        }"#;
        let mut parsed: EmbeddingApiResponse = serde_json::from_str(data).unwrap();
        parsed.data.sort_by_key(|d| d.index);
        assert_eq!(parsed.data[0].embedding, vec![0.1, 0.2]);
        assert_eq!(parsed.usage.unwrap().prompt_tokens, 8);
    }
}
