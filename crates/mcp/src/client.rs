//! MCP client: one session for one configured server.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde_json::Value;
use tracing::{info, instrument, warn};

use toolmesh_core::{RuntimeConfig, ServerDescriptor, TransportKind};

use crate::error::McpError;
use crate::session::McpSession;
use crate::transport;
use crate::types::{CallToolResult, InitializeResult, ReadResourceResult, Resource, ToolInfo};

/// Settings shared by every client a manager builds.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub client_name: String,
    pub client_version: String,
    /// Budget for transport bring-up plus the `initialize` handshake.
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    /// Idle budget on HTTP event streams.
    pub sse_read_timeout: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self::from(&RuntimeConfig::default())
    }
}

impl From<&RuntimeConfig> for ClientOptions {
    fn from(config: &RuntimeConfig) -> Self {
        Self {
            client_name: config.client_name.clone(),
            client_version: env!("CARGO_PKG_VERSION").to_string(),
            connect_timeout: config.connect_timeout,
            request_timeout: config.request_timeout,
            sse_read_timeout: config.sse_read_timeout,
        }
    }
}

/// Client for one configured server.
///
/// A client connects at most once. Reconnecting means building a new
/// client, which is what [`ConnectionManager::connect_server`] does.
///
/// [`ConnectionManager::connect_server`]: crate::manager::ConnectionManager::connect_server
pub struct McpClient {
    descriptor: ServerDescriptor,
    options: ClientOptions,
    attempted: AtomicBool,
    session: Mutex<Option<Arc<McpSession>>>,
}

impl McpClient {
    pub fn new(descriptor: ServerDescriptor, options: ClientOptions) -> Self {
        Self {
            descriptor,
            options,
            attempted: AtomicBool::new(false),
            session: Mutex::new(None),
        }
    }

    pub fn server_name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn transport_kind(&self) -> TransportKind {
        self.descriptor.transport_kind
    }

    pub fn descriptor(&self) -> &ServerDescriptor {
        &self.descriptor
    }

    /// Open the transport and complete the handshake within `connect_timeout`.
    #[instrument(skip_all, fields(server = %self.descriptor.name, transport = %self.descriptor.transport_kind))]
    pub async fn connect(&self) -> Result<(), McpError> {
        if self.attempted.swap(true, Ordering::SeqCst) {
            return Err(McpError::AlreadyConnected(self.descriptor.name.clone()));
        }

        let budget = self.options.connect_timeout;
        let session = tokio::time::timeout(budget, self.establish())
            .await
            .map_err(|_| McpError::Timeout(budget))??;

        *self.lock_session() = Some(Arc::new(session));
        info!(server = %self.descriptor.name, "Connected");
        Ok(())
    }

    async fn establish(&self) -> Result<McpSession, McpError> {
        let mut transport = transport::for_descriptor(&self.descriptor, &self.options)?;
        let link = transport.open().await?;
        let session = McpSession::start(&self.descriptor.name, link, self.options.request_timeout);
        if let Err(e) = session
            .initialize(&self.options.client_name, &self.options.client_version)
            .await
        {
            session.close().await;
            return Err(e);
        }
        Ok(session)
    }

    /// Close the session. Calls still waiting fail with `TransportClosed`.
    pub async fn disconnect(&self) {
        let session = self.lock_session().take();
        if let Some(session) = session {
            session.close().await;
            info!(server = %self.descriptor.name, "Disconnected");
        }
    }

    /// True while a session exists and its transport is open.
    pub fn connected(&self) -> bool {
        self.lock_session()
            .as_ref()
            .is_some_and(|session| !session.is_closed())
    }

    pub fn session_id(&self) -> Option<String> {
        self.lock_session()
            .as_ref()
            .and_then(|session| session.session_id().map(str::to_string))
    }

    pub fn server_info(&self) -> Option<InitializeResult> {
        self.lock_session()
            .as_ref()
            .and_then(|session| session.server_info().cloned())
    }

    pub async fn list_tools(&self) -> Result<Vec<ToolInfo>, McpError> {
        self.session()?.list_tools().await
    }

    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<CallToolResult, McpError> {
        self.session()?.call_tool(name, arguments).await
    }

    pub async fn list_resources(&self) -> Result<Vec<Resource>, McpError> {
        self.session()?.list_resources().await
    }

    pub async fn read_resource(&self, uri: &str) -> Result<ReadResourceResult, McpError> {
        self.session()?.read_resource(uri).await
    }

    fn session(&self) -> Result<Arc<McpSession>, McpError> {
        self.lock_session()
            .clone()
            .ok_or_else(|| McpError::NotConnected(self.descriptor.name.clone()))
    }

    fn lock_session(&self) -> MutexGuard<'_, Option<Arc<McpSession>>> {
        self.session.lock().unwrap_or_else(|poisoned| {
            warn!(server = %self.descriptor.name, "Session lock poisoned");
            poisoned.into_inner()
        })
    }
}
