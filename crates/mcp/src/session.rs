//! Protocol session: request/response correlation over an open transport.
//!
//! A background dispatch task owns the inbound side of the transport and
//! routes every response to the caller waiting on its id. Server-initiated
//! requests are answered in place (`ping` with an empty result, anything else
//! with "method not found"). When the inbound side ends, every call still
//! waiting fails with [`McpError::TransportClosed`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::codec::JsonRpcMessage;
use crate::error::McpError;
use crate::transport::{Inbound, TaskGuard, TransportLink};
use crate::types::{
    CallToolParams, CallToolResult, Implementation, InitializeParams, InitializeResult,
    JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, ListResourcesResult, ListToolsResult,
    PaginatedParams, ReadResourceParams, ReadResourceResult, Resource, RpcId, ToolInfo,
};

type Reply = Result<Value, McpError>;

/// Calls waiting for a response, plus the closed flag they are guarded by.
#[derive(Default)]
struct Pending {
    calls: Mutex<HashMap<RpcId, oneshot::Sender<Reply>>>,
    closed: AtomicBool,
}

impl Pending {
    async fn settle(&self, id: &RpcId, reply: Reply) -> bool {
        match self.calls.lock().await.remove(id) {
            Some(tx) => {
                let _ = tx.send(reply);
                true
            }
            None => false,
        }
    }

    /// Mark closed and fail everything still waiting. Idempotent.
    async fn close(&self) {
        let mut calls = self.calls.lock().await;
        self.closed.store(true, Ordering::SeqCst);
        for (_, tx) in calls.drain() {
            let _ = tx.send(Err(McpError::TransportClosed));
        }
    }
}

/// One initialized (or initializing) conversation with a server.
pub struct McpSession {
    server: String,
    outbound: mpsc::Sender<JsonRpcMessage>,
    pending: Arc<Pending>,
    next_id: AtomicI64,
    request_timeout: Duration,
    session_id: Option<String>,
    init_started: AtomicBool,
    init_result: OnceLock<InitializeResult>,
    transport: std::sync::Mutex<TaskGuard>,
    dispatch: JoinHandle<()>,
}

impl McpSession {
    /// Take over an open transport and start dispatching its inbound messages.
    pub fn start(server: impl Into<String>, link: TransportLink, request_timeout: Duration) -> Self {
        let server = server.into();
        let pending = Arc::new(Pending::default());
        let dispatch = tokio::spawn(dispatch(
            server.clone(),
            link.inbound,
            link.outbound.clone(),
            Arc::clone(&pending),
        ));

        Self {
            server,
            outbound: link.outbound,
            pending,
            next_id: AtomicI64::new(1),
            request_timeout,
            session_id: link.session_id,
            init_started: AtomicBool::new(false),
            init_result: OnceLock::new(),
            transport: std::sync::Mutex::new(link.task),
            dispatch,
        }
    }

    pub fn server(&self) -> &str {
        &self.server
    }

    /// Session identifier announced by the server's endpoint, if any.
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// The server's answer to `initialize`, once the handshake completed.
    pub fn server_info(&self) -> Option<&InitializeResult> {
        self.init_result.get()
    }

    pub fn is_closed(&self) -> bool {
        self.pending.closed.load(Ordering::SeqCst)
    }

    /// Perform the handshake. Allowed once per session.
    pub async fn initialize(
        &self,
        client_name: &str,
        client_version: &str,
    ) -> Result<InitializeResult, McpError> {
        if self.init_started.swap(true, Ordering::SeqCst) {
            return Err(McpError::AlreadyInitialized);
        }

        let params = InitializeParams::new(Implementation {
            name: client_name.to_string(),
            version: Some(client_version.to_string()),
        });
        let result: InitializeResult = self
            .request("initialize", Some(serde_json::to_value(params)?))
            .await?;
        self.notify("notifications/initialized", None).await?;

        info!(
            server = %self.server,
            remote_name = %result.server_info.name,
            remote_version = result.server_info.version.as_deref().unwrap_or("-"),
            protocol = %result.protocol_version,
            "Session initialized"
        );
        let _ = self.init_result.set(result.clone());
        Ok(result)
    }

    /// Every tool the server exposes, across all pages.
    pub async fn list_tools(&self) -> Result<Vec<ToolInfo>, McpError> {
        self.ensure_initialized()?;
        self.paginate::<ListToolsResult>("tools/list").await
    }

    /// Every resource the server exposes, across all pages.
    pub async fn list_resources(&self) -> Result<Vec<Resource>, McpError> {
        self.ensure_initialized()?;
        self.paginate::<ListResourcesResult>("resources/list").await
    }

    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<CallToolResult, McpError> {
        self.ensure_initialized()?;
        let params = CallToolParams {
            name: name.to_string(),
            arguments,
        };
        self.request("tools/call", Some(serde_json::to_value(params)?))
            .await
    }

    pub async fn read_resource(&self, uri: &str) -> Result<ReadResourceResult, McpError> {
        self.ensure_initialized()?;
        let params = ReadResourceParams {
            uri: uri.to_string(),
        };
        self.request("resources/read", Some(serde_json::to_value(params)?))
            .await
    }

    /// Stop the transport and fail every call still waiting.
    pub async fn close(&self) {
        match self.transport.lock() {
            Ok(mut guard) => guard.abort(),
            Err(poisoned) => poisoned.into_inner().abort(),
        }
        self.dispatch.abort();
        self.pending.close().await;
        debug!(server = %self.server, "Session closed");
    }

    fn ensure_initialized(&self) -> Result<(), McpError> {
        if self.init_result.get().is_none() {
            return Err(McpError::NotInitialized);
        }
        Ok(())
    }

    async fn paginate<P: Page>(&self, method: &str) -> Result<Vec<P::Item>, McpError> {
        let mut items = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let params = PaginatedParams {
                cursor: cursor.clone(),
            };
            let page: P = self
                .request(method, Some(serde_json::to_value(params)?))
                .await?;
            let (batch, next) = page.into_parts();
            items.extend(batch);
            match next {
                Some(next) if cursor.as_ref() != Some(&next) => cursor = Some(next),
                _ => break,
            }
        }
        Ok(items)
    }

    async fn request<R: DeserializeOwned>(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<R, McpError> {
        let value = self.request_value(method, params).await?;
        Ok(serde_json::from_value(value)?)
    }

    #[instrument(skip_all, fields(server = %self.server, method = %method))]
    async fn request_value(&self, method: &str, params: Option<Value>) -> Result<Value, McpError> {
        let id = RpcId::Number(self.next_id.fetch_add(1, Ordering::SeqCst));
        let (tx, rx) = oneshot::channel();
        {
            let mut calls = self.pending.calls.lock().await;
            if self.pending.closed.load(Ordering::SeqCst) {
                return Err(McpError::TransportClosed);
            }
            calls.insert(id.clone(), tx);
        }

        debug!(id = %id, "Sending request");
        let request = JsonRpcRequest::new(id.clone(), method, params);
        let exchange = async {
            self.outbound
                .send(request.into())
                .await
                .map_err(|_| McpError::TransportClosed)?;
            rx.await.unwrap_or(Err(McpError::TransportClosed))
        };
        let reply = match tokio::time::timeout(self.request_timeout, exchange).await {
            Ok(reply) => reply,
            Err(_) => {
                warn!(id = %id, timeout = ?self.request_timeout, "Request timed out");
                Err(McpError::Timeout(self.request_timeout))
            }
        };
        if reply.is_err() {
            self.pending.calls.lock().await.remove(&id);
        }
        reply
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), McpError> {
        self.outbound
            .send(JsonRpcNotification::new(method, params).into())
            .await
            .map_err(|_| McpError::TransportClosed)
    }
}

impl Drop for McpSession {
    fn drop(&mut self) {
        self.dispatch.abort();
    }
}

/// A paginated list result.
trait Page: DeserializeOwned {
    type Item;
    fn into_parts(self) -> (Vec<Self::Item>, Option<String>);
}

impl Page for ListToolsResult {
    type Item = ToolInfo;
    fn into_parts(self) -> (Vec<ToolInfo>, Option<String>) {
        (self.tools, self.next_cursor)
    }
}

impl Page for ListResourcesResult {
    type Item = Resource;
    fn into_parts(self) -> (Vec<Resource>, Option<String>) {
        (self.resources, self.next_cursor)
    }
}

async fn dispatch(
    server: String,
    mut inbound: mpsc::Receiver<Inbound>,
    outbound: mpsc::Sender<JsonRpcMessage>,
    pending: Arc<Pending>,
) {
    while let Some(message) = inbound.recv().await {
        match message {
            Ok(JsonRpcMessage::Response(response)) => {
                let id = response.id.clone();
                let reply = match response.error {
                    Some(error) => Err(McpError::from(error)),
                    None => Ok(response.result.unwrap_or(Value::Null)),
                };
                if !pending.settle(&id, reply).await {
                    debug!(server = %server, id = %id, "Response for unknown request");
                }
            }
            Ok(JsonRpcMessage::Request(request)) => answer(&server, &outbound, request),
            Ok(JsonRpcMessage::Notification(notification)) => {
                debug!(server = %server, method = %notification.method, "Server notification");
            }
            Err(e) => match e.request_id().cloned() {
                Some(id) => {
                    if !pending.settle(&id, Err(e)).await {
                        debug!(server = %server, id = %id, "Error for unknown request");
                    }
                }
                None => warn!(server = %server, error = %e, "Dropped inbound message"),
            },
        }
    }
    debug!(server = %server, "Inbound channel closed");
    pending.close().await;
}

fn answer(server: &str, outbound: &mpsc::Sender<JsonRpcMessage>, request: JsonRpcRequest) {
    let response = if request.method == "ping" {
        JsonRpcResponse::ok(request.id, json!({}))
    } else {
        debug!(server = %server, method = %request.method, "Unsupported server request");
        let error = McpError::MethodNotFound(request.method).to_rpc_error();
        JsonRpcResponse::err(request.id, error)
    };
    if let Err(e) = outbound.try_send(response.into()) {
        warn!(server = %server, error = %e, "Could not answer server request");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{ChannelPeer, ChannelTransport, McpTransport};
    use crate::types::{error_codes, PROTOCOL_VERSION};

    async fn session_with_peer(timeout: Duration) -> (McpSession, ChannelPeer) {
        let (mut transport, peer) = ChannelTransport::pair();
        let link = transport.open().await.unwrap();
        (McpSession::start("test", link, timeout), peer)
    }

    /// Answers like a small server with two pages of tools.
    async fn serve(mut peer: ChannelPeer) {
        while let Some(text) = peer.receive().await {
            let msg: Value = serde_json::from_str(&text).unwrap();
            let Some(id) = msg.get("id").cloned() else { continue };
            let cursor = msg["params"]["cursor"].as_str().map(str::to_string);
            let reply = match (msg["method"].as_str().unwrap_or_default(), cursor.as_deref()) {
                ("initialize", _) => json!({"jsonrpc": "2.0", "id": id, "result": {
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": {"tools": {}},
                    "serverInfo": {"name": "fake", "version": "1.0"}
                }}),
                ("tools/list", None) => json!({"jsonrpc": "2.0", "id": id, "result": {
                    "tools": [{"name": "a"}], "nextCursor": "p2"
                }}),
                ("tools/list", Some("p2")) => json!({"jsonrpc": "2.0", "id": id, "result": {
                    "tools": [{"name": "b"}]
                }}),
                ("tools/call", _) => json!({"jsonrpc": "2.0", "id": id, "error": {
                    "code": -32000, "message": "tool exploded"
                }}),
                ("slow", _) => continue,
                _ => json!({"jsonrpc": "2.0", "id": id, "error": {
                    "code": error_codes::METHOD_NOT_FOUND, "message": "unknown"
                }}),
            };
            peer.send(&reply.to_string()).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_calls_require_initialize() {
        let (session, peer) = session_with_peer(Duration::from_secs(5)).await;
        tokio::spawn(serve(peer));

        assert!(matches!(session.list_tools().await, Err(McpError::NotInitialized)));

        let result = session.initialize("toolmesh", "0.1.0").await.unwrap();
        assert_eq!(result.server_info.name, "fake");
        assert_eq!(session.server_info().unwrap().server_info.name, "fake");
        assert!(matches!(
            session.initialize("toolmesh", "0.1.0").await,
            Err(McpError::AlreadyInitialized)
        ));
    }

    #[tokio::test]
    async fn test_list_tools_follows_cursor() {
        let (session, peer) = session_with_peer(Duration::from_secs(5)).await;
        tokio::spawn(serve(peer));
        session.initialize("toolmesh", "0.1.0").await.unwrap();

        let names: Vec<_> = session
            .list_tools()
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.name)
            .collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_remote_error_fails_only_that_call() {
        let (session, peer) = session_with_peer(Duration::from_secs(5)).await;
        tokio::spawn(serve(peer));
        session.initialize("toolmesh", "0.1.0").await.unwrap();

        let err = session.call_tool("boom", json!({})).await.unwrap_err();
        assert!(matches!(err, McpError::Remote { code: -32000, .. }));
        assert!(session.list_tools().await.is_ok());
        assert!(!session.is_closed());
    }

    #[tokio::test]
    async fn test_timeout_fails_only_that_call() {
        let (session, peer) = session_with_peer(Duration::from_millis(100)).await;
        tokio::spawn(serve(peer));
        session.initialize("toolmesh", "0.1.0").await.unwrap();

        let err = session.request_value("slow", None).await.unwrap_err();
        assert!(matches!(err, McpError::Timeout(_)));
        assert!(session.pending.calls.lock().await.is_empty());
        assert!(session.list_tools().await.is_ok());
    }

    #[tokio::test]
    async fn test_peer_hangup_fails_pending_calls() {
        let (session, mut peer) = session_with_peer(Duration::from_secs(5)).await;
        let hangup = tokio::spawn(async move {
            // Read the initialize request, then disappear.
            peer.receive().await;
        });

        let err = session.initialize("toolmesh", "0.1.0").await.unwrap_err();
        assert!(matches!(err, McpError::TransportClosed));
        hangup.await.unwrap();
        assert!(session.is_closed());
        assert!(matches!(
            session.request_value("ping", None).await,
            Err(McpError::TransportClosed)
        ));
    }

    #[tokio::test]
    async fn test_decode_error_pinned_to_call() {
        let (session, mut peer) = session_with_peer(Duration::from_secs(5)).await;
        tokio::spawn(async move {
            while let Some(text) = peer.receive().await {
                let msg: Value = serde_json::from_str(&text).unwrap();
                if let Some(id) = msg.get("id") {
                    let bad = format!(r#"{{"jsonrpc":"2.0","id":{id},"error":"oops"}}"#);
                    peer.send(&bad).await.unwrap();
                }
            }
        });

        let err = session.request_value("anything", None).await.unwrap_err();
        assert!(matches!(err, McpError::Decode { .. }));
        assert!(!session.is_closed());
    }

    #[tokio::test]
    async fn test_answers_server_requests() {
        let (session, mut peer) = session_with_peer(Duration::from_secs(5)).await;

        peer.send(r#"{"jsonrpc":"2.0","id":"s1","method":"ping"}"#).await.unwrap();
        let reply: Value = serde_json::from_str(&peer.receive().await.unwrap()).unwrap();
        assert_eq!(reply["id"], "s1");
        assert_eq!(reply["result"], json!({}));

        peer.send(r#"{"jsonrpc":"2.0","id":"s2","method":"sampling/createMessage"}"#)
            .await
            .unwrap();
        let reply: Value = serde_json::from_str(&peer.receive().await.unwrap()).unwrap();
        assert_eq!(reply["error"]["code"], error_codes::METHOD_NOT_FOUND);
        drop(session);
    }

    #[tokio::test]
    async fn test_close_fails_waiting_calls() {
        let (session, _peer) = session_with_peer(Duration::from_secs(5)).await;
        let session = Arc::new(session);
        let waiting = {
            let session = Arc::clone(&session);
            tokio::spawn(async move { session.request_value("never", None).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        session.close().await;
        assert!(matches!(waiting.await.unwrap(), Err(McpError::TransportClosed)));
        assert!(session.is_closed());
    }
}
