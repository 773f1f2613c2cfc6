//! Request orchestration for Docent.
//!
//! One query flows through:
//!
//! 1. **Retrieve** context for the query text
//! 2. **Assemble** preamble, context, history and query into a bounded prompt
//! 3. **Loop**: call the model; if it asks for tools, dispatch them
//!    concurrently, feed the results back and call it again
//! 4. **Stream** text and status increments to the caller, ending with one
//!    terminal marker
//!
//! The loop stops on a final answer, a fatal error, the round limit, or
//! cancellation.

pub mod context;
pub mod dispatcher;
pub mod loop_runner;
pub mod pipeline;
pub mod stream;
pub mod transcript;

#[cfg(test)]
mod test_helpers;

pub use context::{AssemblyError, AssemblyMetadata, DropInfo, ModelInput, PromptAssembler};
pub use dispatcher::ToolDispatcher;
pub use loop_runner::{AgentLoop, AgentSettings, LoopReport, LoopState};
pub use pipeline::{ChannelSettings, ChatPipeline, RetrievalSettings};
pub use stream::{Increment, Outcome, ResponseSink, ResponseStream, SinkError, StreamEvent, response_channel};
pub use transcript::{Transcript, TranscriptError, Turn, TurnContent};
