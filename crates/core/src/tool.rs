//! Tool trait — the abstraction over agent capabilities.
//!
//! Tools are registered once at startup. The registry compiles each tool's
//! argument schema on registration and validates every call against it
//! before the tool ever runs. Dispatch never fails: every outcome, including
//! unknown tools, bad arguments, errors, panics and timeouts, comes back as a
//! [`ToolResult`] that can be fed to the model.

use async_trait::async_trait;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use crate::error::{ErrorKind, ToolError};
use crate::provider::ToolDefinition;

/// Longest error description a failed [`ToolResult`] carries, in bytes.
pub const MAX_ERROR_DETAIL_BYTES: usize = 512;

const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(30);

/// A request to execute a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique call ID (matches the LLM's tool_call.id)
    pub id: String,

    /// Name of the tool to execute
    pub name: String,

    /// Arguments as a JSON value
    pub arguments: serde_json::Value,
}

/// The result of a tool execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    /// The call ID this result is for
    pub call_id: String,

    /// Whether the tool executed successfully
    pub success: bool,

    /// The output content, or the error description on failure
    pub output: String,

    /// Why the call failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,

    /// Optional structured data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl ToolResult {
    pub fn ok(call_id: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            success: true,
            output: output.into(),
            error_kind: None,
            data: None,
        }
    }

    /// A failed result. The detail is cut to [`MAX_ERROR_DETAIL_BYTES`].
    pub fn failure(call_id: impl Into<String>, kind: ErrorKind, detail: impl Into<String>) -> Self {
        let mut detail = detail.into();
        truncate_on_char_boundary(&mut detail, MAX_ERROR_DETAIL_BYTES);
        Self {
            call_id: call_id.into(),
            success: false,
            output: detail,
            error_kind: Some(kind),
            data: None,
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    /// The text the model sees for this result.
    pub fn model_content(&self) -> String {
        match self.error_kind {
            Some(kind) => format!("Error ({kind}): {}", self.output),
            None => self.output.clone(),
        }
    }
}

fn truncate_on_char_boundary(s: &mut String, max: usize) {
    if s.len() <= max {
        return;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    s.truncate(end);
}

/// The core Tool trait.
///
/// Each tool (calculator, search_docs, arithmetic) implements this trait.
/// Tools are registered in the ToolRegistry and made available to the
/// agent loop.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (e.g., "calculator").
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the LLM).
    fn description(&self) -> &str;

    /// JSON Schema describing this tool's parameters.
    fn parameters_schema(&self) -> serde_json::Value;

    /// Execute the tool with the given arguments.
    ///
    /// Arguments have already been validated against
    /// [`parameters_schema`](Tool::parameters_schema).
    async fn execute(&self, arguments: serde_json::Value) -> std::result::Result<ToolResult, ToolError>;

    /// Convert this tool into a ToolDefinition for sending to the LLM.
    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

struct RegisteredTool {
    tool: Box<dyn Tool>,
    validator: jsonschema::Validator,
}

/// A registry of available tools.
///
/// The agent loop uses this to:
/// 1. Get tool definitions to send to the LLM
/// 2. Dispatch tool calls when the LLM requests them
///
/// Read-only after startup; share it behind an `Arc`.
pub struct ToolRegistry {
    tools: BTreeMap<String, RegisteredTool>,
    timeout: Duration,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: BTreeMap::new(),
            timeout: DEFAULT_TOOL_TIMEOUT,
        }
    }

    /// Per-call execution timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Register a tool.
    ///
    /// Fails if the name is taken or the argument schema does not compile.
    pub fn register(&mut self, tool: Box<dyn Tool>) -> std::result::Result<(), ToolError> {
        let name = tool.name().to_string();
        if self.tools.contains_key(&name) {
            return Err(ToolError::Duplicate(name));
        }
        let validator = jsonschema::Validator::new(&tool.parameters_schema()).map_err(|e| {
            ToolError::InvalidSchema {
                tool_name: name.clone(),
                reason: e.to_string(),
            }
        })?;
        debug!(tool = %name, "Registered tool");
        self.tools.insert(name, RegisteredTool { tool, validator });
        Ok(())
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.get(name).map(|t| t.tool.as_ref())
    }

    /// Get all tool definitions (for sending to the LLM), sorted by name.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(|t| t.tool.to_definition()).collect()
    }

    /// List all registered tool names, sorted.
    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(|s| s.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Check a call's name and arguments without running anything.
    pub fn validate(&self, call: &ToolCall) -> std::result::Result<(), ToolError> {
        let entry = self
            .tools
            .get(&call.name)
            .ok_or_else(|| ToolError::NotFound(call.name.clone()))?;
        entry
            .validator
            .validate(&call.arguments)
            .map_err(|e| ToolError::InvalidArguments(format!("{}: {e}", call.name)))
    }

    /// Validate and execute a tool call.
    pub async fn dispatch(&self, call: &ToolCall) -> ToolResult {
        if let Err(err) = self.validate(call) {
            warn!(tool = %call.name, call_id = %call.id, error = %err, "Rejected tool call");
            return ToolResult::failure(&call.id, err.kind(), err.to_string());
        }
        // validate() guarantees the entry exists
        let Some(entry) = self.tools.get(&call.name) else {
            return ToolResult::failure(&call.id, ErrorKind::UnknownTool, call.name.clone());
        };

        let started = Instant::now();
        let run = AssertUnwindSafe(entry.tool.execute(call.arguments.clone())).catch_unwind();
        let outcome = match tokio::time::timeout(self.timeout, run).await {
            Ok(Ok(result)) => result,
            Ok(Err(panic)) => Err(ToolError::ExecutionFailed {
                tool_name: call.name.clone(),
                reason: format!("panicked: {}", panic_message(panic.as_ref())),
            }),
            Err(_) => Err(ToolError::Timeout {
                tool_name: call.name.clone(),
                timeout_secs: self.timeout.as_secs(),
            }),
        };

        let elapsed_ms = started.elapsed().as_millis() as u64;
        match outcome {
            Ok(mut result) => {
                debug!(tool = %call.name, call_id = %call.id, elapsed_ms, success = result.success, "Tool finished");
                result.call_id = call.id.clone();
                if !result.success {
                    result.error_kind.get_or_insert(ErrorKind::ToolExecutionError);
                    truncate_on_char_boundary(&mut result.output, MAX_ERROR_DETAIL_BYTES);
                }
                result
            }
            Err(err) => {
                warn!(tool = %call.name, call_id = %call.id, elapsed_ms, error = %err, "Tool failed");
                ToolResult::failure(&call.id, ErrorKind::ToolExecutionError, err.to_string())
            }
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
