//! Domain event system — decoupled communication between bounded contexts.
//!
//! Events are published when something interesting happens in the pipeline.
//! Other components can subscribe to react without tight coupling.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

/// All domain events in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DomainEvent {
    /// A query was accepted by the pipeline
    QueryReceived {
        query_id: String,
        conversation_id: String,
        content_preview: String,
        timestamp: DateTime<Utc>,
    },

    /// A query reached a terminal state
    QueryFinished {
        query_id: String,
        outcome: String, // "success", "error:<kind>", "cancelled"
        /// Tool rounds completed
        rounds: usize,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// Retrieval failed for a query
    RetrievalFailed {
        query_id: String,
        error_message: String,
        proceeded: bool,
        timestamp: DateTime<Utc>,
    },

    /// A tool was executed
    ToolExecuted {
        tool_name: String,
        success: bool,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// A document was (re-)ingested
    DocumentIngested {
        source: String,
        chunks: usize,
        replaced: usize,
        timestamp: DateTime<Utc>,
    },
}

/// A broadcast-based event bus for domain events.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub.
/// Components can subscribe to receive all events and filter for what they care about.
pub struct EventBus {
    sender: broadcast::Sender<Arc<DomainEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: DomainEvent) {
        // No subscribers is fine
        let _ = self.sender.send(Arc::new(event));
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<DomainEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
