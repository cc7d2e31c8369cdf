//! MCP transport layer.
//!
//! A transport turns one server connection into a pair of message channels:
//! outbound envelopes go into [`TransportLink::outbound`], decoded inbound
//! envelopes (or per-message decode errors) come out of
//! [`TransportLink::inbound`]. The inbound channel ending means the
//! transport is closed.
//!
//! - **pipe**: child process, newline-delimited JSON over stdin/stdout
//! - **http**: event-stream and hybrid streamable-HTTP variants
//! - **channel**: in-memory pair for embedding a server in-process

mod channel;
mod http;
mod pipe;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use toolmesh_core::{ServerDescriptor, TransportKind};

use crate::client::ClientOptions;
use crate::codec::JsonRpcMessage;
use crate::error::McpError;

pub use channel::{ChannelPeer, ChannelTransport};
pub use http::{HttpFlavor, HttpTransport};
pub use pipe::PipeTransport;

/// Capacity of both link channels; a full inbound channel throttles the reader.
pub const CHANNEL_CAPACITY: usize = 32;

/// What the reader side hands to the session.
pub type Inbound = Result<JsonRpcMessage, McpError>;

/// Trait for MCP message transport.
#[async_trait]
pub trait McpTransport: Send {
    /// Establish the connection and start moving messages.
    ///
    /// Resolves once the transport can accept outbound messages (for the
    /// HTTP variants: once the POST target is known).
    async fn open(&mut self) -> Result<TransportLink, McpError>;
}

/// An open transport, as seen by the protocol session.
pub struct TransportLink {
    pub outbound: mpsc::Sender<JsonRpcMessage>,
    pub inbound: mpsc::Receiver<Inbound>,
    /// Session identifier announced by the server, if any.
    pub session_id: Option<String>,
    pub task: TaskGuard,
}

/// Owns the transport's background task; aborting it closes the transport.
#[derive(Debug, Default)]
pub struct TaskGuard(Option<JoinHandle<()>>);

impl TaskGuard {
    pub fn new(handle: JoinHandle<()>) -> Self {
        Self(Some(handle))
    }

    pub fn abort(&mut self) {
        if let Some(handle) = self.0.take() {
            handle.abort();
        }
    }
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        self.abort();
    }
}

/// Build the transport a descriptor asks for.
pub fn for_descriptor(
    descriptor: &ServerDescriptor,
    options: &ClientOptions,
) -> Result<Box<dyn McpTransport>, McpError> {
    Ok(match descriptor.transport_kind {
        TransportKind::Pipe => Box::new(PipeTransport::new(
            &descriptor.name,
            descriptor.pipe_params()?,
        )),
        TransportKind::EventStream => Box::new(HttpTransport::new(
            &descriptor.name,
            HttpFlavor::EventStream,
            descriptor.http_params()?,
            options,
        )?),
        TransportKind::Http => Box::new(HttpTransport::new(
            &descriptor.name,
            HttpFlavor::Hybrid,
            descriptor.http_params()?,
            options,
        )?),
    })
}
