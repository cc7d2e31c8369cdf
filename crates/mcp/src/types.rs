//! Wire types: JSON-RPC 2.0 envelopes and the MCP payloads a client sends
//! and receives.
//!
//! Payloads accept what real servers send rather than what the protocol
//! strictly requires. Optional fields default, unknown fields are ignored
//! and capability blocks stay raw JSON.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use toolmesh_tool_runtime::ToolDefinition;

/// Protocol revision announced in `initialize`.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

fn jsonrpc_version() -> String {
    "2.0".to_string()
}

// ── Envelopes ───────────────────────────────────────────────────────

/// Correlation id. Servers may use numbers or strings; this client only
/// issues numbers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RpcId {
    Number(i64),
    String(String),
}

impl fmt::Display for RpcId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RpcId::Number(n) => write!(f, "{n}"),
            RpcId::String(s) => f.write_str(s),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    #[serde(default = "jsonrpc_version")]
    pub jsonrpc: String,
    pub id: RpcId,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    pub fn new(id: RpcId, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: jsonrpc_version(),
            id,
            method: method.into(),
            params,
        }
    }
}

/// Reply to a request. Exactly one of `result` or `error` is set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    #[serde(default = "jsonrpc_version")]
    pub jsonrpc: String,
    pub id: RpcId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    pub fn ok(id: RpcId, result: Value) -> Self {
        Self {
            jsonrpc: jsonrpc_version(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn err(id: RpcId, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: jsonrpc_version(),
            id,
            result: None,
            error: Some(error),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Fire-and-forget message; never answered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    #[serde(default = "jsonrpc_version")]
    pub jsonrpc: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcNotification {
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: jsonrpc_version(),
            method: method.into(),
            params,
        }
    }
}

/// Reserved JSON-RPC error codes this crate produces.
pub mod error_codes {
    pub const PARSE_ERROR: i64 = -32700;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INTERNAL_ERROR: i64 = -32603;
}

// ── Handshake ───────────────────────────────────────────────────────

/// Name and version of either end of a session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Implementation {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    pub protocol_version: String,
    /// Always `{}`: roots and sampling are not offered.
    pub capabilities: Map<String, Value>,
    pub client_info: Implementation,
}

impl InitializeParams {
    pub fn new(client: Implementation) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: Map::new(),
            client_info: client,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    pub protocol_version: String,
    #[serde(default)]
    pub capabilities: ServerCapabilities,
    #[serde(default)]
    pub server_info: Implementation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

/// What the server says it supports. Only presence is interpreted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerCapabilities {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<Value>,
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

impl ServerCapabilities {
    pub fn has_tools(&self) -> bool {
        self.tools.is_some()
    }

    pub fn has_resources(&self) -> bool {
        self.resources.is_some()
    }
}

// ── Tools ───────────────────────────────────────────────────────────

/// Request body shared by the paginated list methods.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PaginatedParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListToolsResult {
    #[serde(default)]
    pub tools: Vec<ToolInfo>,
    #[serde(default)]
    pub next_cursor: Option<String>,
}

/// A tool as a server describes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolInfo {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Servers that omit the schema take no arguments.
    #[serde(default = "no_arguments_schema")]
    pub input_schema: Value,
}

fn no_arguments_schema() -> Value {
    serde_json::json!({"type": "object"})
}

impl From<ToolInfo> for ToolDefinition {
    fn from(tool: ToolInfo) -> Self {
        ToolDefinition {
            name: tool.name,
            description: tool.description,
            input_schema: tool.input_schema,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CallToolParams {
    pub name: String,
    pub arguments: Value,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallToolResult {
    #[serde(default)]
    pub content: Vec<ContentPart>,
    /// Tool-level failure, delivered as a normal result.
    #[serde(default)]
    pub is_error: bool,
}

/// One block of a tool result.
///
/// Only `text` is interpreted; image, audio and embedded-resource parts keep
/// their remaining fields in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentPart {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            kind: "text".to_string(),
            text: Some(text.into()),
            extra: Map::new(),
        }
    }

    /// The part's text, or the whole part as JSON when it carries none.
    pub fn to_text(&self) -> String {
        match &self.text {
            Some(text) => text.clone(),
            None => serde_json::to_string(self).unwrap_or_else(|_| format!("[{} content]", self.kind)),
        }
    }
}

// ── Resources ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    pub uri: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListResourcesResult {
    #[serde(default)]
    pub resources: Vec<Resource>,
    #[serde(default)]
    pub next_cursor: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReadResourceParams {
    pub uri: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReadResourceResult {
    #[serde(default)]
    pub contents: Vec<ResourceContents>,
}

/// One body of a read resource: `text`, or base64 in `blob`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceContents {
    pub uri: String,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub blob: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_rpc_id_forms() {
        assert_eq!(serde_json::to_string(&RpcId::Number(42)).unwrap(), "42");
        assert_eq!(
            serde_json::from_str::<RpcId>("\"req-1\"").unwrap(),
            RpcId::String("req-1".to_string())
        );
        assert_eq!(RpcId::Number(7).to_string(), "7");
    }

    #[test]
    fn test_envelope_without_version_field() {
        let resp: JsonRpcResponse = serde_json::from_value(json!({"id": 1, "result": {}})).unwrap();
        assert_eq!(resp.jsonrpc, "2.0");

        let value = serde_json::to_value(JsonRpcResponse::ok(RpcId::Number(1), json!(true))).unwrap();
        assert_eq!(value, json!({"jsonrpc": "2.0", "id": 1, "result": true}));
    }

    #[test]
    fn test_tool_info_defaults() {
        let info: ToolInfo = serde_json::from_value(json!({"name": "ping"})).unwrap();
        assert_eq!(info.description, "");
        assert_eq!(info.input_schema, json!({"type": "object"}));

        let def: ToolDefinition = info.into();
        assert_eq!(def.name, "ping");
    }

    #[test]
    fn test_list_tools_page() {
        let page: ListToolsResult = serde_json::from_value(json!({
            "tools": [{"name": "a", "description": "A", "inputSchema": {"type": "object"}}],
            "nextCursor": "page-2"
        }))
        .unwrap();
        assert_eq!(page.tools.len(), 1);
        assert_eq!(page.next_cursor.as_deref(), Some("page-2"));

        let empty: ListToolsResult = serde_json::from_value(json!({})).unwrap();
        assert!(empty.tools.is_empty());
        assert!(empty.next_cursor.is_none());
    }

    #[test]
    fn test_content_parts() {
        let result: CallToolResult = serde_json::from_value(json!({
            "content": [
                {"type": "text", "text": "hello"},
                {"type": "image", "data": "AAAA", "mimeType": "image/png"}
            ],
            "isError": true
        }))
        .unwrap();
        assert!(result.is_error);
        assert_eq!(result.content[0].to_text(), "hello");

        let image = &result.content[1];
        assert_eq!(image.kind, "image");
        assert!(image.text.is_none());
        let rendered: Value = serde_json::from_str(&image.to_text()).unwrap();
        assert_eq!(rendered["mimeType"], "image/png");
        assert_eq!(rendered["type"], "image");
    }

    #[test]
    fn test_initialize_shapes() {
        let params = InitializeParams::new(Implementation {
            name: "toolmesh".to_string(),
            version: Some("0.1.0".to_string()),
        });
        let value = serde_json::to_value(&params).unwrap();
        assert_eq!(value["protocolVersion"], PROTOCOL_VERSION);
        assert_eq!(value["clientInfo"]["name"], "toolmesh");
        assert_eq!(value["capabilities"], json!({}));

        let sparse: InitializeResult =
            serde_json::from_value(json!({"protocolVersion": "2024-11-05"})).unwrap();
        assert!(!sparse.capabilities.has_tools());
        assert_eq!(sparse.server_info.name, "");

        let full: InitializeResult = serde_json::from_value(json!({
            "protocolVersion": "2024-11-05",
            "capabilities": {"tools": {"listChanged": true}, "logging": {}},
            "serverInfo": {"name": "files", "version": "2.1"}
        }))
        .unwrap();
        assert!(full.capabilities.has_tools());
        assert!(!full.capabilities.has_resources());
        assert!(full.capabilities.other.contains_key("logging"));
        assert_eq!(full.server_info.version.as_deref(), Some("2.1"));
    }

    #[test]
    fn test_resource_contents() {
        let result: ReadResourceResult = serde_json::from_value(json!({
            "contents": [{"uri": "file:///a.txt", "mimeType": "text/plain", "text": "hi"}]
        }))
        .unwrap();
        assert_eq!(result.contents[0].text.as_deref(), Some("hi"));
        assert!(result.contents[0].blob.is_none());
    }
}
