//! Request orchestration: query → retrieval → prompt assembly → agent loop
//! → response stream.
//!
//! [`ChatPipeline::submit`] spawns one task per query and hands back the
//! consumer half of that query's response channel immediately. Nothing is
//! shared between queries except the read-only collaborators held here.

use crate::context::PromptAssembler;
use crate::loop_runner::{AgentLoop, AgentSettings};
use crate::stream::{Outcome, ResponseSink, ResponseStream, StreamEvent, response_channel};
use crate::dispatcher::ToolDispatcher;
use chrono::Utc;
use docent_config::{AppConfig, Backpressure, RetrievalFailurePolicy};
use docent_core::error::ErrorKind;
use docent_core::event::{DomainEvent, EventBus};
use docent_core::message::Query;
use docent_core::provider::Provider;
use docent_core::tool::ToolRegistry;
use docent_index::Retriever;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};

/// Retrieval knobs applied per query.
#[derive(Debug, Clone, Copy)]
pub struct RetrievalSettings {
    pub top_k: usize,
    pub on_failure: RetrievalFailurePolicy,
}

/// Response channel knobs.
#[derive(Debug, Clone, Copy)]
pub struct ChannelSettings {
    pub capacity: usize,
    pub backpressure: Backpressure,
}

struct Inner {
    retriever: Retriever,
    assembler: PromptAssembler,
    agent: AgentLoop,
    retrieval: RetrievalSettings,
    channel: ChannelSettings,
    events: Arc<EventBus>,
}

/// Cheap to clone; clones share the same collaborators.
#[derive(Clone)]
pub struct ChatPipeline {
    inner: Arc<Inner>,
}

impl ChatPipeline {
    pub fn new(
        retriever: Retriever,
        assembler: PromptAssembler,
        agent: AgentLoop,
        retrieval: RetrievalSettings,
        channel: ChannelSettings,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                retriever,
                assembler,
                agent,
                retrieval,
                channel,
                events,
            }),
        }
    }

    /// Wire a pipeline from configuration.
    pub fn from_config(
        config: &AppConfig,
        provider: Arc<dyn Provider>,
        retriever: Retriever,
        tools: Arc<ToolRegistry>,
        events: Arc<EventBus>,
    ) -> Self {
        let dispatcher = ToolDispatcher::new(tools).with_events(Arc::clone(&events));
        Self::new(
            retriever,
            PromptAssembler::from_config(&config.prompt),
            AgentLoop::new(provider, dispatcher, AgentSettings::from_config(config)),
            RetrievalSettings {
                top_k: config.retrieval.top_k,
                on_failure: config.retrieval.on_failure,
            },
            ChannelSettings {
                capacity: config.agent.channel_capacity,
                backpressure: config.agent.backpressure,
            },
            events,
        )
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.inner.events
    }

    /// Start serving `query`. Dropping the returned stream cancels it.
    pub fn submit(&self, query: Query) -> ResponseStream {
        self.submit_with_cancel(query, CancellationToken::new())
    }

    /// Like [`submit`](Self::submit), with a caller-held token that cancels
    /// the query when fired.
    pub fn submit_with_cancel(&self, query: Query, cancel: CancellationToken) -> ResponseStream {
        let (sink, stream) = response_channel(
            self.inner.channel.capacity,
            self.inner.channel.backpressure,
            cancel.clone(),
        );
        let span = info_span!(
            "query",
            query_id = %query.id,
            conversation_id = %query.conversation_id
        );
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move { inner.serve(query, sink, cancel).await }.instrument(span));
        stream
    }
}

impl Inner {
    async fn serve(&self, query: Query, mut sink: ResponseSink, cancel: CancellationToken) {
        let started = Instant::now();
        info!(history = query.history.len(), "Query received");
        self.events.publish(DomainEvent::QueryReceived {
            query_id: query.id.clone(),
            conversation_id: query.conversation_id.to_string(),
            content_preview: preview(&query.text),
            timestamp: Utc::now(),
        });

        let (outcome, rounds) = self.answer(&query, &mut sink, &cancel).await;

        info!(outcome = %outcome.label(), rounds, elapsed_ms = started.elapsed().as_millis() as u64, "Query finished");
        self.events.publish(DomainEvent::QueryFinished {
            query_id: query.id.clone(),
            outcome: outcome.label(),
            rounds,
            duration_ms: started.elapsed().as_millis() as u64,
            timestamp: Utc::now(),
        });
        sink.finish(outcome);
    }

    async fn answer(
        &self,
        query: &Query,
        sink: &mut ResponseSink,
        cancel: &CancellationToken,
    ) -> (Outcome, usize) {
        let retrieved = tokio::select! {
            biased;
            _ = cancel.cancelled() => return (Outcome::Cancelled, 0),
            r = self.retriever.retrieve(&query.text, self.retrieval.top_k) => r,
        };

        let context = match retrieved {
            Ok(context) => context,
            Err(e) => {
                let proceed = self.retrieval.on_failure == RetrievalFailurePolicy::Proceed;
                warn!(error = %e, proceed, "Retrieval unavailable");
                self.events.publish(DomainEvent::RetrievalFailed {
                    query_id: query.id.clone(),
                    error_message: e.to_string(),
                    proceeded: proceed,
                    timestamp: Utc::now(),
                });
                if !proceed {
                    return (Outcome::failed(ErrorKind::RetrievalUnavailable, e.to_string()), 0);
                }
                let notice = StreamEvent::RetrievalUnavailable {
                    message: e.to_string(),
                };
                if let Err(e) = sink.send(notice).await {
                    return (e.outcome(), 0);
                }
                Vec::new()
            }
        };
        debug!(chunks = context.len(), "Retrieved context");

        let input = match self.assembler.assemble(query, &query.history, &context) {
            Ok(input) => input,
            Err(e) => {
                warn!(error = %e, "Prompt assembly failed");
                return (Outcome::failed(e.kind(), e.to_string()), 0);
            }
        };
        debug!(
            tokens = input.metadata.total_tokens,
            budget = input.metadata.budget,
            history = input.metadata.history_included,
            context = input.metadata.context_included,
            "Prompt assembled"
        );

        let report = self.agent.run(&input, sink, cancel).await;
        (report.outcome, report.tool_rounds)
    }
}

fn preview(text: &str) -> String {
    const MAX: usize = 80;
    match text.char_indices().nth(MAX) {
        Some((end, _)) => format!("{}…", &text[..end]),
        None => text.to_string(),
    }
}
