//! Connection manager: the named set of clients plus their tool caches.
//!
//! The manager is an ordinary value. Build one at startup, share it behind an
//! `Arc`, and call [`ConnectionManager::shutdown`] before exiting.
//!
//! A server is present in the tool cache only while its client is registered
//! and has completed a successful discovery since it connected. Failures stay
//! with the server that caused them: a failed connect is returned to the
//! caller (or logged, for bulk bring-up), a failed discovery or refresh only
//! leaves the cache as it was.

use std::sync::Arc;

use futures::future::join_all;
use indexmap::IndexMap;
use serde::Serialize;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use toolmesh_core::ServerDescriptor;

use crate::client::{ClientOptions, McpClient};
use crate::error::McpError;
use crate::types::ToolInfo;

/// A discovered tool tagged with the server that exposes it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoutedTool {
    pub origin_server: String,
    #[serde(flatten)]
    pub tool: ToolInfo,
}

#[derive(Default)]
struct Registry {
    clients: IndexMap<String, Arc<McpClient>>,
    tools: IndexMap<String, Vec<ToolInfo>>,
}

impl Registry {
    fn is_current(&self, name: &str, client: &Arc<McpClient>) -> bool {
        self.clients
            .get(name)
            .is_some_and(|registered| Arc::ptr_eq(registered, client))
    }
}

pub struct ConnectionManager {
    options: ClientOptions,
    state: RwLock<Registry>,
}

/// Background connect attempts started by
/// [`ConnectionManager::load_and_connect_all`].
///
/// Dropping this value does not cancel the attempts.
#[derive(Debug)]
pub struct PendingConnects {
    handles: Vec<JoinHandle<()>>,
}

impl PendingConnects {
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Wait until every attempt has finished, successfully or not.
    pub async fn join(self) {
        for result in join_all(self.handles).await {
            if let Err(e) = result {
                warn!(error = %e, "Connect task aborted");
            }
        }
    }
}

impl ConnectionManager {
    pub fn new(options: ClientOptions) -> Self {
        Self {
            options,
            state: RwLock::new(Registry::default()),
        }
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    /// Start one independent connect attempt per active descriptor.
    ///
    /// Returns immediately. Failures are logged per server and never reach
    /// the caller.
    pub fn load_and_connect_all<I>(self: &Arc<Self>, descriptors: I) -> PendingConnects
    where
        I: IntoIterator<Item = ServerDescriptor>,
    {
        let mut handles = Vec::new();
        for descriptor in descriptors {
            if !descriptor.active {
                debug!(server = %descriptor.name, "Skipping inactive server");
                continue;
            }
            let manager = Arc::clone(self);
            handles.push(tokio::spawn(async move {
                let name = descriptor.name.clone();
                if let Err(e) = manager.connect_server(descriptor).await {
                    warn!(server = %name, error = %e, "Failed to connect server");
                }
            }));
        }
        info!(count = handles.len(), "Started connect attempts");
        PendingConnects { handles }
    }

    /// Connect a server and register it under its name, replacing any
    /// previous client of that name. Tool discovery follows; its failure is
    /// logged and leaves the server connected with no cache entry.
    #[instrument(skip_all, fields(server = %descriptor.name))]
    pub async fn connect_server(&self, descriptor: ServerDescriptor) -> Result<(), McpError> {
        let name = descriptor.name.clone();
        let client = Arc::new(McpClient::new(descriptor, self.options.clone()));
        client.connect().await?;

        let previous = {
            let mut state = self.state.write().await;
            state.tools.shift_remove(&name);
            state.clients.insert(name.clone(), Arc::clone(&client))
        };
        if let Some(previous) = previous {
            debug!(server = %name, "Replacing previous client");
            previous.disconnect().await;
        }

        match client.list_tools().await {
            Ok(tools) => {
                let count = tools.len();
                let mut state = self.state.write().await;
                if state.is_current(&name, &client) {
                    state.tools.insert(name.clone(), tools);
                    info!(server = %name, tools = count, "Tools discovered");
                }
            }
            Err(e) => warn!(server = %name, error = %e, "Tool discovery failed"),
        }
        Ok(())
    }

    /// Disconnect and forget a server. No-op for unknown names.
    pub async fn disconnect_server(&self, name: &str) {
        let client = {
            let mut state = self.state.write().await;
            state.tools.shift_remove(name);
            state.clients.shift_remove(name)
        };
        if let Some(client) = client {
            client.disconnect().await;
        }
    }

    pub async fn get_client(&self, name: &str) -> Option<Arc<McpClient>> {
        self.state.read().await.clients.get(name).cloned()
    }

    /// Cached tools; `None` until the first successful discovery.
    pub async fn get_tools(&self, name: &str) -> Option<Vec<ToolInfo>> {
        self.state.read().await.tools.get(name).cloned()
    }

    /// Names of every registered server, in registration order.
    pub async fn server_names(&self) -> Vec<String> {
        self.state.read().await.clients.keys().cloned().collect()
    }

    /// Re-run discovery and replace the cache entry wholesale.
    ///
    /// On failure the previous entry stays as it was.
    pub async fn refresh_tools(&self, name: &str) -> Result<usize, McpError> {
        let client = self
            .get_client(name)
            .await
            .ok_or_else(|| McpError::NotConnected(name.to_string()))?;

        let tools = match client.list_tools().await {
            Ok(tools) => tools,
            Err(e) => {
                warn!(server = %name, error = %e, "Tool refresh failed");
                return Err(e);
            }
        };

        let count = tools.len();
        let mut state = self.state.write().await;
        if !state.is_current(name, &client) {
            return Err(McpError::NotConnected(name.to_string()));
        }
        state.tools.insert(name.to_string(), tools);
        info!(server = %name, tools = count, "Tools refreshed");
        Ok(count)
    }

    /// Every cached tool, tagged with its origin server.
    pub async fn list_all_tools(&self) -> Vec<RoutedTool> {
        let state = self.state.read().await;
        state
            .tools
            .iter()
            .flat_map(|(server, tools)| {
                tools.iter().map(move |tool| RoutedTool {
                    origin_server: server.clone(),
                    tool: tool.clone(),
                })
            })
            .collect()
    }

    /// Snapshot of clients with their cached tools, for building adapters.
    pub(crate) async fn routes(&self) -> Vec<(Arc<McpClient>, Vec<ToolInfo>)> {
        let state = self.state.read().await;
        state
            .tools
            .iter()
            .filter_map(|(server, tools)| {
                state
                    .clients
                    .get(server)
                    .map(|client| (Arc::clone(client), tools.clone()))
            })
            .collect()
    }

    /// Disconnect everything. Always completes.
    pub async fn shutdown(&self) {
        let clients: Vec<_> = {
            let mut state = self.state.write().await;
            state.tools.clear();
            state.clients.drain(..).map(|(_, client)| client).collect()
        };
        let count = clients.len();
        join_all(clients.iter().map(|client| client.disconnect())).await;
        info!(servers = count, "Connection manager shut down");
    }
}
