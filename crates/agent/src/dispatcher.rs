//! Concurrent tool dispatch for one model turn.

use chrono::Utc;
use docent_core::error::ErrorKind;
use docent_core::event::{DomainEvent, EventBus};
use docent_core::tool::{ToolCall, ToolRegistry, ToolResult};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Runs every call of a turn on its own task and hands the results back in
/// request order, regardless of which finished first.
#[derive(Clone)]
pub struct ToolDispatcher {
    registry: Arc<ToolRegistry>,
    events: Option<Arc<EventBus>>,
}

impl ToolDispatcher {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self {
            registry,
            events: None,
        }
    }

    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// Dispatch `calls` concurrently.
    ///
    /// Returns `None` if `cancel` fires first. Calls already running are
    /// left to finish in the background and their results are dropped.
    pub async fn dispatch_all(
        &self,
        calls: &[ToolCall],
        cancel: &CancellationToken,
    ) -> Option<Vec<ToolResult>> {
        let handles: Vec<_> = calls
            .iter()
            .cloned()
            .map(|call| {
                let registry = Arc::clone(&self.registry);
                let events = self.events.clone();
                tokio::spawn(async move {
                    let started = Instant::now();
                    let result = registry.dispatch(&call).await;
                    let duration_ms = started.elapsed().as_millis() as u64;
                    debug!(tool = %call.name, call_id = %call.id, success = result.success, duration_ms, "Tool finished");
                    if let Some(events) = events {
                        events.publish(DomainEvent::ToolExecuted {
                            tool_name: call.name.clone(),
                            success: result.success,
                            duration_ms,
                            timestamp: Utc::now(),
                        });
                    }
                    result
                })
            })
            .collect();

        let mut results = Vec::with_capacity(handles.len());
        for (call, handle) in calls.iter().zip(handles) {
            let joined = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!(pending = calls.len() - results.len(), "Tool dispatch cancelled, discarding results");
                    return None;
                }
                joined = handle => joined,
            };
            results.push(match joined {
                Ok(result) => result,
                Err(e) => {
                    warn!(tool = %call.name, call_id = %call.id, error = %e, "Tool task failed");
                    ToolResult::failure(&call.id, ErrorKind::ToolExecutionError, format!("tool task failed: {e}"))
                }
            });
        }
        Some(results)
    }
}
