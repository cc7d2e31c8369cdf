//! Bridges discovered remote tools into the local `Tool` trait.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

use toolmesh_tool_runtime::{Tool, ToolContext, ToolDefinition, ToolError, ToolResult, ToolSignature};

use crate::client::McpClient;
use crate::manager::ConnectionManager;
use crate::types::{CallToolResult, ToolInfo};

/// A remote tool plus the client that owns it.
///
/// Execution never fails with `Err`: bad arguments, transport failures and
/// remote errors all come back as an error `ToolResult` whose text says what
/// went wrong.
pub struct McpToolAdapter {
    tool: ToolInfo,
    signature: ToolSignature,
    client: Arc<McpClient>,
}

impl McpToolAdapter {
    pub fn new(tool: ToolInfo, client: Arc<McpClient>) -> Self {
        let signature = ToolSignature::from_input_schema(&tool.input_schema);
        Self {
            tool,
            signature,
            client,
        }
    }

    pub fn server_name(&self) -> &str {
        self.client.server_name()
    }

    pub fn tool_name(&self) -> &str {
        &self.tool.name
    }

    pub fn signature(&self) -> &ToolSignature {
        &self.signature
    }
}

#[async_trait]
impl Tool for McpToolAdapter {
    fn definition(&self) -> ToolDefinition {
        self.tool.clone().into()
    }

    async fn execute(&self, input: Value, context: &ToolContext) -> Result<ToolResult, ToolError> {
        if let Err(e) = self.signature.check(&input) {
            debug!(server = %self.server_name(), tool = %self.tool.name, error = %e, "Rejected arguments");
            return Ok(ToolResult::error(
                &context.tool_call_id,
                format!("Invalid arguments for tool '{}': {e}", self.tool.name),
            ));
        }
        let arguments = match input {
            Value::Null => Value::Object(Default::default()),
            other => other,
        };

        match self.client.call_tool(&self.tool.name, arguments).await {
            Ok(result) => Ok(render(&context.tool_call_id, &result)),
            Err(e) => {
                warn!(server = %self.server_name(), tool = %self.tool.name, error = %e, "Tool call failed");
                Ok(ToolResult::error(
                    &context.tool_call_id,
                    format!(
                        "Error calling tool '{}' on server '{}': {e}",
                        self.tool.name,
                        self.server_name()
                    ),
                ))
            }
        }
    }
}

/// Join the content parts into one text; non-text parts are stringified.
fn render(tool_call_id: &str, result: &CallToolResult) -> ToolResult {
    let text = result
        .content
        .iter()
        .map(|part| part.to_text())
        .collect::<Vec<_>>()
        .join("\n");
    if result.is_error {
        ToolResult::error(tool_call_id, text)
    } else {
        ToolResult::text(tool_call_id, text)
    }
}

/// One adapter per cached tool, in registration order.
pub async fn adapters_for(manager: &ConnectionManager) -> Vec<McpToolAdapter> {
    manager
        .routes()
        .await
        .into_iter()
        .flat_map(|(client, tools)| {
            tools
                .into_iter()
                .map(move |tool| McpToolAdapter::new(tool, Arc::clone(&client)))
        })
        .collect()
}
