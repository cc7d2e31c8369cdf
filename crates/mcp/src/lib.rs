//! MCP (Model Context Protocol) client runtime for toolmesh.
//!
//! Discovers and invokes the tools of many independent MCP servers, each
//! reached over its own transport.
//!
//! # Architecture
//!
//! - **types**: JSON-RPC 2.0 and MCP-specific protocol types
//! - **codec**: single-envelope encode/decode
//! - **sse**: incremental Server-Sent-Events decoding
//! - **transport**: pipe, event-stream, hybrid HTTP and in-memory transports
//! - **session**: initialize handshake and id-correlated calls
//! - **client**: one session for one configured server
//! - **manager**: named clients, tool caches, bulk bring-up and shutdown
//! - **adapter**: remote tools as local `Tool` implementations
//! - **error**: unified error type
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use toolmesh_core::{RuntimeConfig, ServersFile};
//! use toolmesh_mcp::{ClientOptions, ConnectionManager};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = RuntimeConfig::from_env();
//! let servers = ServersFile::from_file(&config.servers_file)?;
//!
//! let manager = Arc::new(ConnectionManager::new(ClientOptions::from(&config)));
//! manager.load_and_connect_all(servers.servers).join().await;
//!
//! for tool in manager.list_all_tools().await {
//!     println!("{}/{}", tool.origin_server, tool.tool.name);
//! }
//! manager.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod adapter;
pub mod client;
pub mod codec;
pub mod error;
pub mod manager;
pub mod session;
pub mod sse;
pub mod transport;
pub mod types;

pub use adapter::{adapters_for, McpToolAdapter};
pub use client::{ClientOptions, McpClient};
pub use codec::JsonRpcMessage;
pub use error::McpError;
pub use manager::{ConnectionManager, PendingConnects, RoutedTool};
pub use session::McpSession;
pub use transport::{ChannelPeer, ChannelTransport, McpTransport, TransportLink};
pub use types::*;
