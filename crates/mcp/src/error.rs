//! Error types for the MCP crate.

use std::time::Duration;

use serde_json::Value;
use toolmesh_core::ConfigError;

use crate::types::{error_codes, JsonRpcError, RpcId};

/// Errors that can occur during MCP operations.
#[derive(Debug, thiserror::Error)]
pub enum McpError {
    /// Failed to parse or produce JSON.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Pipe I/O error.
    #[error("Transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP client error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The server descriptor could not be turned into a transport.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The session could not be established.
    #[error("Connection failed: {0}")]
    Connection(String),

    /// A POST was answered with a non-success status.
    #[error("HTTP status {status}: {body}")]
    HttpStatus { status: u16, body: String },

    /// The server announced an endpoint on a different origin.
    #[error("Endpoint origin {actual} does not match connection origin {expected}")]
    OriginMismatch { expected: String, actual: String },

    /// An inbound message could not be decoded.
    #[error("Malformed message: {reason}")]
    Decode { id: Option<RpcId>, reason: String },

    /// An outbound request could not be handed to the server.
    #[error("Request delivery failed: {reason}")]
    Delivery { id: Option<RpcId>, reason: String },

    /// The server answered with a JSON-RPC error envelope.
    #[error("Server error {code}: {message}")]
    Remote {
        code: i64,
        message: String,
        data: Option<Value>,
    },

    /// The requested method is not supported.
    #[error("Method not found: {0}")]
    MethodNotFound(String),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Transport closed")]
    TransportClosed,

    #[error("Server '{0}' is not connected")]
    NotConnected(String),

    #[error("Server '{0}' was already connected once; build a new client to reconnect")]
    AlreadyConnected(String),

    #[error("Session already initialized")]
    AlreadyInitialized,

    #[error("Not initialized: call initialize first")]
    NotInitialized,
}

impl McpError {
    /// The request this error belongs to, when it can be pinned to one.
    pub fn request_id(&self) -> Option<&RpcId> {
        match self {
            McpError::Decode { id, .. } | McpError::Delivery { id, .. } => id.as_ref(),
            _ => None,
        }
    }

    /// Only an origin mismatch may tear a transport down on its own.
    pub fn is_fatal_to_transport(&self) -> bool {
        matches!(self, McpError::OriginMismatch { .. })
    }

    /// Convert to a JSON-RPC error object.
    pub fn to_rpc_error(&self) -> JsonRpcError {
        let (code, data) = match self {
            McpError::Json(_) | McpError::Decode { .. } => (error_codes::PARSE_ERROR, None),
            McpError::MethodNotFound(_) => (error_codes::METHOD_NOT_FOUND, None),
            McpError::Remote { code, data, .. } => (*code, data.clone()),
            _ => (error_codes::INTERNAL_ERROR, None),
        };
        JsonRpcError {
            code,
            message: self.to_string(),
            data,
        }
    }
}

impl From<JsonRpcError> for McpError {
    fn from(err: JsonRpcError) -> Self {
        McpError::Remote {
            code: err.code,
            message: err.message,
            data: err.data,
        }
    }
}
