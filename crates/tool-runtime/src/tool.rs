//! The local tool abstraction that remote tools are adapted into.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Name, description and argument schema of a callable tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema of the argument object.
    pub input_schema: Value,
}

impl fmt::Display for ToolDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name, self.description)
    }
}

/// Outcome of one invocation, always as text.
///
/// Failures the caller should see (bad arguments, remote errors) are
/// results with `is_error` set, not `Err`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub tool_call_id: String,
    pub content: String,
    pub is_error: bool,
}

impl ToolResult {
    pub fn text(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self::build(tool_call_id.into(), content.into(), false)
    }

    pub fn error(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self::build(tool_call_id.into(), content.into(), true)
    }

    fn build(tool_call_id: String, content: String, is_error: bool) -> Self {
        Self {
            tool_call_id,
            content,
            is_error,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ToolContext {
    /// Echoed into the [`ToolResult`] of this invocation.
    pub tool_call_id: String,
}

impl ToolContext {
    pub fn new(tool_call_id: impl Into<String>) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
        }
    }
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn definition(&self) -> ToolDefinition;

    async fn execute(&self, input: Value, context: &ToolContext) -> Result<ToolResult, ToolError>;
}

/// Arguments rejected before a tool runs.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Missing required argument: {0}")]
    MissingArgument(String),
    #[error("Argument '{name}' should be {expected}")]
    WrongType { name: String, expected: &'static str },
}
