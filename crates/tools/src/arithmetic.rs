//! Two-operand arithmetic tools: `add`, `subtract`, `multiply`, `exponentiate`.
//!
//! Each takes numbers `x` and `y`. `subtract` computes `y - x` and
//! `exponentiate` computes `x ^ y`.

use async_trait::async_trait;
use docent_core::error::{ErrorKind, ToolError};
use docent_core::tool::{Tool, ToolResult};
use crate::calculator::format_number;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Add,
    Subtract,
    Multiply,
    Exponentiate,
}

impl Operation {
    pub const ALL: [Operation; 4] = [
        Operation::Add,
        Operation::Subtract,
        Operation::Multiply,
        Operation::Exponentiate,
    ];

    fn name(self) -> &'static str {
        match self {
            Operation::Add => "add",
            Operation::Subtract => "subtract",
            Operation::Multiply => "multiply",
            Operation::Exponentiate => "exponentiate",
        }
    }

    fn description(self) -> &'static str {
        match self {
            Operation::Add => "Add 'x' and 'y'.",
            Operation::Subtract => "Subtract 'x' from 'y'.",
            Operation::Multiply => "Multiply 'x' and 'y'.",
            Operation::Exponentiate => "Raise 'x' to the power of 'y'.",
        }
    }

    pub fn apply(self, x: f64, y: f64) -> f64 {
        match self {
            Operation::Add => x + y,
            Operation::Subtract => y - x,
            Operation::Multiply => x * y,
            Operation::Exponentiate => x.powf(y),
        }
    }
}

pub struct ArithmeticTool {
    op: Operation,
}

impl ArithmeticTool {
    pub fn new(op: Operation) -> Self {
        Self { op }
    }

    /// One tool per [`Operation`].
    pub fn all() -> Vec<ArithmeticTool> {
        Operation::ALL.into_iter().map(Self::new).collect()
    }
}

fn operand(arguments: &serde_json::Value, key: &str) -> Result<f64, ToolError> {
    arguments[key]
        .as_f64()
        .ok_or_else(|| ToolError::InvalidArguments(format!("'{key}' must be a number")))
}

#[async_trait]
impl Tool for ArithmeticTool {
    fn name(&self) -> &str {
        self.op.name()
    }

    fn description(&self) -> &str {
        self.op.description()
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "x": { "type": "number" },
                "y": { "type": "number" }
            },
            "required": ["x", "y"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let x = operand(&arguments, "x")?;
        let y = operand(&arguments, "y")?;
        let value = self.op.apply(x, y);
        if !value.is_finite() {
            return Ok(ToolResult::failure(
                "",
                ErrorKind::ToolExecutionError,
                format!("{} of {x} and {y} is not a finite number", self.op.name()),
            ));
        }
        Ok(ToolResult::ok("", format_number(value)).with_data(serde_json::json!({ "result": value })))
    }
}
