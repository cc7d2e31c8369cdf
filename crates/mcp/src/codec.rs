//! Single-envelope JSON-RPC codec.
//!
//! Every transport frames messages differently (lines on a pipe, `data:`
//! fields on an event stream, whole bodies on a POST) but hands one complete
//! JSON text at a time to [`decode`].

use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::McpError;
use crate::types::{JsonRpcError, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, RpcId};

/// Any envelope that can travel in either direction.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum JsonRpcMessage {
    Request(JsonRpcRequest),
    Response(JsonRpcResponse),
    Notification(JsonRpcNotification),
}

impl JsonRpcMessage {
    /// Correlation id, for requests and responses.
    pub fn id(&self) -> Option<&RpcId> {
        match self {
            JsonRpcMessage::Request(req) => Some(&req.id),
            JsonRpcMessage::Response(resp) => Some(&resp.id),
            JsonRpcMessage::Notification(_) => None,
        }
    }

    pub fn method(&self) -> Option<&str> {
        match self {
            JsonRpcMessage::Request(req) => Some(&req.method),
            JsonRpcMessage::Notification(n) => Some(&n.method),
            JsonRpcMessage::Response(_) => None,
        }
    }
}

impl From<JsonRpcRequest> for JsonRpcMessage {
    fn from(req: JsonRpcRequest) -> Self {
        JsonRpcMessage::Request(req)
    }
}

impl From<JsonRpcResponse> for JsonRpcMessage {
    fn from(resp: JsonRpcResponse) -> Self {
        JsonRpcMessage::Response(resp)
    }
}

impl From<JsonRpcNotification> for JsonRpcMessage {
    fn from(n: JsonRpcNotification) -> Self {
        JsonRpcMessage::Notification(n)
    }
}

/// Encode one envelope as a single line of JSON.
pub fn encode(message: &JsonRpcMessage) -> Result<String, McpError> {
    Ok(serde_json::to_string(message)?)
}

/// Decode one envelope from JSON text.
pub fn decode(text: &str) -> Result<JsonRpcMessage, McpError> {
    let value: Value = serde_json::from_str(text.trim()).map_err(|e| McpError::Decode {
        id: None,
        reason: format!("invalid JSON: {e}"),
    })?;
    decode_value(value)
}

/// Classify an already-parsed envelope.
///
/// Failures carry the envelope's `id` whenever one could be read, so the
/// matching pending call can be failed instead of left waiting.
pub fn decode_value(value: Value) -> Result<JsonRpcMessage, McpError> {
    let Value::Object(obj) = value else {
        return Err(McpError::Decode {
            id: None,
            reason: "envelope is not a JSON object".to_string(),
        });
    };

    let id = match obj.get("id") {
        None | Some(Value::Null) => None,
        Some(raw) => Some(serde_json::from_value::<RpcId>(raw.clone()).map_err(|_| {
            McpError::Decode {
                id: None,
                reason: format!("unsupported id {raw}"),
            }
        })?),
    };
    let fail = |reason: String| McpError::Decode {
        id: id.clone(),
        reason,
    };

    if let Some(method) = obj.get("method") {
        let method = method
            .as_str()
            .ok_or_else(|| fail("method is not a string".to_string()))?
            .to_string();
        let params = obj.get("params").cloned();
        return Ok(match id.clone() {
            Some(id) => JsonRpcMessage::Request(JsonRpcRequest::new(id, method, params)),
            None => JsonRpcMessage::Notification(JsonRpcNotification::new(method, params)),
        });
    }

    let Some(id) = id.clone() else {
        return Err(fail("envelope has neither id nor method".to_string()));
    };

    if let Some(error) = non_null(&obj, "error") {
        let error: JsonRpcError = serde_json::from_value(error.clone())
            .map_err(|e| fail(format!("malformed error object: {e}")))?;
        return Ok(JsonRpcMessage::Response(JsonRpcResponse::err(id, error)));
    }

    // A response without `result` still settles its call.
    let result = obj.get("result").cloned().unwrap_or(Value::Null);
    Ok(JsonRpcMessage::Response(JsonRpcResponse::ok(id, result)))
}

fn non_null<'a>(obj: &'a Map<String, Value>, key: &str) -> Option<&'a Value> {
    obj.get(key).filter(|v| !v.is_null())
}
