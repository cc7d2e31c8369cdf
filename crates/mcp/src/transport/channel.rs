//! In-memory transport for running a server in-process.

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{McpTransport, TaskGuard, TransportLink, CHANNEL_CAPACITY};
use crate::codec::{self, JsonRpcMessage};
use crate::error::McpError;

/// Client half of an in-memory pair. Can be opened once.
pub struct ChannelTransport {
    ends: Option<(mpsc::Sender<JsonRpcMessage>, mpsc::Receiver<super::Inbound>)>,
}

/// Server half: sees raw JSON text, the same as a pipe server would.
pub struct ChannelPeer {
    rx: mpsc::Receiver<JsonRpcMessage>,
    tx: mpsc::Sender<super::Inbound>,
}

impl ChannelTransport {
    /// Create a connected transport/peer pair.
    pub fn pair() -> (Self, ChannelPeer) {
        let (to_peer, from_client) = mpsc::channel(CHANNEL_CAPACITY);
        let (to_client, from_peer) = mpsc::channel(CHANNEL_CAPACITY);
        (
            Self {
                ends: Some((to_peer, from_peer)),
            },
            ChannelPeer {
                rx: from_client,
                tx: to_client,
            },
        )
    }
}

#[async_trait]
impl McpTransport for ChannelTransport {
    async fn open(&mut self) -> Result<TransportLink, McpError> {
        let (outbound, inbound) = self.ends.take().ok_or(McpError::TransportClosed)?;
        Ok(TransportLink {
            outbound,
            inbound,
            session_id: None,
            task: TaskGuard::default(),
        })
    }
}

impl ChannelPeer {
    /// Next message from the client as JSON text; `None` once the client is gone.
    pub async fn receive(&mut self) -> Option<String> {
        let message = self.rx.recv().await?;
        codec::encode(&message).ok()
    }

    /// Deliver JSON text to the client. Undecodable text reaches the client
    /// as a decode error, as it would from any other transport.
    pub async fn send(&self, text: &str) -> Result<(), McpError> {
        self.tx
            .send(codec::decode(text))
            .await
            .map_err(|_| McpError::TransportClosed)
    }
}
