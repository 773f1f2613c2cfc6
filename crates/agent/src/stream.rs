//! Streaming response channel.
//!
//! One producer ([`ResponseSink`]) and one consumer ([`ResponseStream`]) per
//! query. Increments flow through a bounded buffer in production order and
//! carry a sequence number starting at 0. The terminal marker travels on
//! its own slot, so it can always be delivered even when the buffer is full,
//! and it is always the last thing the consumer sees.
//!
//! Dropping the consumer cancels the query.

use docent_config::Backpressure;
use docent_core::error::ErrorKind;
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::{CancellationToken, DropGuard};

/// Events carried by the channel.
///
/// Wire names (the `type` tag) double as SSE event names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Answer text delta from the model.
    Text { content: String },

    /// A tool call is about to run.
    ToolStarted {
        call_id: String,
        name: String,
        arguments: serde_json::Value,
    },

    /// A tool call finished (successfully or not).
    ToolFinished {
        call_id: String,
        name: String,
        success: bool,
        output: String,
    },

    /// Retrieval failed and the query continues without context.
    RetrievalUnavailable { message: String },

    /// Terminal: the answer is complete.
    Done,

    /// Terminal: the query failed.
    Error { kind: ErrorKind, message: String },

    /// Terminal: the query was cancelled.
    Cancelled,
}

impl StreamEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Text { .. } => "text",
            Self::ToolStarted { .. } => "tool_started",
            Self::ToolFinished { .. } => "tool_finished",
            Self::RetrievalUnavailable { .. } => "retrieval_unavailable",
            Self::Done => "done",
            Self::Error { .. } => "error",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Error { .. } | Self::Cancelled)
    }
}

/// How a query ended.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Success,
    Failed { kind: ErrorKind, message: String },
    Cancelled,
}

impl Outcome {
    pub fn failed(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::Failed {
            kind,
            message: message.into(),
        }
    }

    pub fn label(&self) -> String {
        match self {
            Self::Success => "success".into(),
            Self::Failed { kind, .. } => format!("error:{kind}"),
            Self::Cancelled => "cancelled".into(),
        }
    }

    fn into_event(self) -> StreamEvent {
        match self {
            Self::Success => StreamEvent::Done,
            Self::Failed { kind, message } => StreamEvent::Error { kind, message },
            Self::Cancelled => StreamEvent::Cancelled,
        }
    }
}

/// One element of the stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Increment {
    pub seq: u64,
    #[serde(flatten)]
    pub event: StreamEvent,
}

/// Why a send did not go through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SinkError {
    #[error("query cancelled")]
    Cancelled,

    #[error("consumer is too slow; stream terminated")]
    Overflow,

    #[error("stream already terminated")]
    Closed,
}

impl SinkError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Overflow => ErrorKind::StreamOverflow,
            Self::Cancelled | Self::Closed => ErrorKind::Cancelled,
        }
    }

    /// How the query ends when a send fails this way.
    pub fn outcome(&self) -> Outcome {
        match self {
            Self::Overflow => Outcome::failed(ErrorKind::StreamOverflow, self.to_string()),
            Self::Cancelled | Self::Closed => Outcome::Cancelled,
        }
    }
}

/// Create a channel for one query.
///
/// `cancel` is cancelled when the returned [`ResponseStream`] is dropped.
pub fn response_channel(
    capacity: usize,
    backpressure: Backpressure,
    cancel: CancellationToken,
) -> (ResponseSink, ResponseStream) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let (terminal_tx, terminal_rx) = oneshot::channel();
    let sink = ResponseSink {
        tx: Some(tx),
        terminal: Some(terminal_tx),
        next_seq: 0,
        backpressure,
        cancel: cancel.clone(),
    };
    let stream = ResponseStream {
        rx,
        terminal: Some(terminal_rx),
        next_seq: 0,
        finished: false,
        _cancel_on_drop: cancel.drop_guard(),
    };
    (sink, stream)
}

/// Producer half.
#[derive(Debug)]
pub struct ResponseSink {
    tx: Option<mpsc::Sender<Increment>>,
    terminal: Option<oneshot::Sender<Increment>>,
    next_seq: u64,
    backpressure: Backpressure,
    cancel: CancellationToken,
}

impl ResponseSink {
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// True once a terminal marker has been sent.
    pub fn is_terminated(&self) -> bool {
        self.terminal.is_none()
    }

    /// Send a non-terminal increment.
    ///
    /// Under `block` this waits for buffer space, racing cancellation.
    /// Under `drop_with_error` a full buffer ends the stream with a
    /// `stream_overflow` error marker and cancels the query.
    pub async fn send(&mut self, event: StreamEvent) -> Result<(), SinkError> {
        debug_assert!(!event.is_terminal(), "terminal events go through finish()");
        let Some(tx) = self.tx.as_ref() else {
            return Err(SinkError::Closed);
        };
        let increment = Increment {
            seq: self.next_seq,
            event,
        };

        match self.backpressure {
            Backpressure::Block => {
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => return Err(SinkError::Cancelled),
                    sent = tx.send(increment) => sent.map_err(|_| SinkError::Cancelled)?,
                }
            }
            Backpressure::DropWithError => match tx.try_send(increment) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::warn!(seq = self.next_seq, "Response buffer full, terminating stream");
                    self.terminate(StreamEvent::Error {
                        kind: ErrorKind::StreamOverflow,
                        message: SinkError::Overflow.to_string(),
                    });
                    self.cancel.cancel();
                    return Err(SinkError::Overflow);
                }
                Err(mpsc::error::TrySendError::Closed(_)) => return Err(SinkError::Cancelled),
            },
        }
        self.next_seq += 1;
        Ok(())
    }

    /// Send the terminal marker. A no-op if the stream already terminated.
    pub fn finish(mut self, outcome: Outcome) {
        self.terminate(outcome.into_event());
    }

    fn terminate(&mut self, event: StreamEvent) {
        self.tx = None;
        if let Some(terminal) = self.terminal.take() {
            // Consumer may be gone already
            let _ = terminal.send(Increment {
                seq: self.next_seq,
                event,
            });
        }
    }
}

/// Consumer half. Yields increments in order, ending with exactly one
/// terminal increment.
#[derive(Debug)]
pub struct ResponseStream {
    rx: mpsc::Receiver<Increment>,
    terminal: Option<oneshot::Receiver<Increment>>,
    next_seq: u64,
    finished: bool,
    _cancel_on_drop: DropGuard,
}

impl Stream for ResponseStream {
    type Item = Increment;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Increment>> {
        let this = self.get_mut();
        if this.finished {
            return Poll::Ready(None);
        }

        match this.rx.poll_recv(cx) {
            Poll::Ready(Some(increment)) => {
                this.next_seq = increment.seq + 1;
                return Poll::Ready(Some(increment));
            }
            Poll::Ready(None) => {}
            Poll::Pending => return Poll::Pending,
        }

        let Some(terminal) = this.terminal.as_mut() else {
            this.finished = true;
            return Poll::Ready(None);
        };
        let increment = match Pin::new(terminal).poll(cx) {
            Poll::Pending => return Poll::Pending,
            Poll::Ready(Ok(increment)) => increment,
            // Producer went away without a terminal marker
            Poll::Ready(Err(_)) => Increment {
                seq: this.next_seq,
                event: StreamEvent::Error {
                    kind: ErrorKind::Internal,
                    message: "response producer ended without a result".into(),
                },
            },
        };
        this.terminal = None;
        this.finished = true;
        Poll::Ready(Some(increment))
    }
}
