//! Built-in tools for the Docent agent.
//!
//! Arithmetic helpers plus `search_docs`, which lets the model query the
//! document index itself.

pub mod arithmetic;
pub mod calculator;
pub mod doc_search;

use docent_core::error::ToolError;
use docent_core::tool::ToolRegistry;
use docent_index::Retriever;
use std::time::Duration;

pub use arithmetic::{ArithmeticTool, Operation};
pub use calculator::CalculatorTool;
pub use doc_search::DocSearchTool;

/// Registry with the arithmetic tools only.
pub fn math_registry(timeout: Duration) -> Result<ToolRegistry, ToolError> {
    let mut registry = ToolRegistry::new().with_timeout(timeout);
    registry.register(Box::new(CalculatorTool))?;
    for tool in ArithmeticTool::all() {
        registry.register(Box::new(tool))?;
    }
    Ok(registry)
}

/// Registry with every built-in tool.
pub fn default_registry(
    retriever: Retriever,
    top_k: usize,
    threshold: f32,
    timeout: Duration,
) -> Result<ToolRegistry, ToolError> {
    let mut registry = math_registry(timeout)?;
    registry.register(Box::new(DocSearchTool::new(retriever, top_k, threshold)))?;
    Ok(registry)
}
