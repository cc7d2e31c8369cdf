//! HTTP transports: one long-lived GET read as an event stream, one POST
//! per outbound message.
//!
//! Both flavors share the same machinery and differ in two places:
//!
//! | | `EventStream` | `Hybrid` |
//! |---|---|---|
//! | `ping` before `endpoint` | ignored | POST to the connection URL |
//! | POST reply body | never read | JSON or embedded SSE delivered inline |
//!
//! Lifecycle: the GET is issued and read until a POST target is known.
//! Messages arriving meanwhile are queued locally (the inbound channel has
//! no reader until `open` returns) and delivered first once the transport is
//! active. Then a reader and a writer run side by side in one task; when
//! either ends, or the task is aborted, both stop and the inbound channel
//! closes.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, CONTENT_TYPE};
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};
use url::Url;

use toolmesh_core::{ConfigError, HttpParams};

use super::{Inbound, McpTransport, TaskGuard, TransportLink, CHANNEL_CAPACITY};
use crate::client::ClientOptions;
use crate::codec::{self, JsonRpcMessage};
use crate::error::McpError;
use crate::sse::{self, SseDecoder, SseFrame, ServerEvent};
use crate::types::RpcId;

const ACCEPT_BOTH: &str = "application/json, text/event-stream";

/// Which conventions the server is expected to follow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpFlavor {
    /// Strict: POST target only from an `endpoint` event, replies only on the stream.
    EventStream,
    /// Streamable HTTP with fallbacks for heartbeat-only and inline-reply servers.
    Hybrid,
}

pub struct HttpTransport {
    server: String,
    flavor: HttpFlavor,
    url: Url,
    headers: HeaderMap,
    client: reqwest::Client,
    request_timeout: Duration,
    sse_read_timeout: Duration,
}

impl HttpTransport {
    pub fn new(
        server: &str,
        flavor: HttpFlavor,
        params: HttpParams,
        options: &ClientOptions,
    ) -> Result<Self, McpError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static(ACCEPT_BOTH));
        for (key, value) in &params.headers {
            let invalid = |reason: String| ConfigError::InvalidParam {
                server: server.to_string(),
                param: "headers",
                reason,
            };
            let name = HeaderName::from_bytes(key.as_bytes())
                .map_err(|e| invalid(format!("header name '{key}': {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| invalid(format!("header value for '{key}': {e}")))?;
            headers.insert(name, value);
        }

        let client = reqwest::Client::builder()
            .connect_timeout(options.connect_timeout)
            .build()?;

        Ok(Self {
            server: server.to_string(),
            flavor,
            url: params.url,
            headers,
            client,
            request_timeout: options.request_timeout,
            sse_read_timeout: options.sse_read_timeout,
        })
    }

    /// Read the stream until a POST target is known. Messages seen on the
    /// way are queued in `early`.
    async fn await_endpoint(
        &self,
        stream: &mut EventStream,
        early: &mut Vec<Inbound>,
    ) -> Result<Url, McpError> {
        loop {
            let event = stream.next_event().await?.ok_or_else(|| {
                McpError::Connection("event stream ended before an endpoint was announced".into())
            })?;
            match event {
                ServerEvent::Endpoint(raw) => {
                    let endpoint = resolve_endpoint(&self.url, &raw)?;
                    debug!(server = %self.server, endpoint = %endpoint, "Endpoint announced");
                    return Ok(endpoint);
                }
                ServerEvent::Ping if self.flavor == HttpFlavor::Hybrid => {
                    debug!(server = %self.server, "Ping before endpoint, posting to connection URL");
                    return Ok(self.url.clone());
                }
                ServerEvent::Ping => {
                    debug!(server = %self.server, "Ignoring ping while awaiting endpoint");
                }
                ServerEvent::Message(data) => early.push(decode_event(&self.server, &data)),
                ServerEvent::Unknown { event, .. } => {
                    debug!(server = %self.server, event = %event, "Ignoring unknown event");
                }
            }
        }
    }
}

#[async_trait]
impl McpTransport for HttpTransport {
    #[instrument(skip_all, fields(server = %self.server, url = %self.url, flavor = ?self.flavor))]
    async fn open(&mut self) -> Result<TransportLink, McpError> {
        let response = self
            .client
            .get(self.url.clone())
            .headers(self.headers.clone())
            .send()
            .await
            .map_err(|e| McpError::Connection(format!("GET {} failed: {e}", self.url)))?;
        let status = response.status();
        if !status.is_success() {
            return Err(McpError::Connection(format!(
                "GET {} returned {status}",
                self.url
            )));
        }

        let mut stream = EventStream::new(response, self.sse_read_timeout);
        let (outbound_tx, outbound_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (inbound_tx, inbound_rx) = mpsc::channel(CHANNEL_CAPACITY);

        let mut early = Vec::new();
        let endpoint = self.await_endpoint(&mut stream, &mut early).await?;
        let session_id = session_id_from(&endpoint);
        info!(
            server = %self.server,
            endpoint = %endpoint,
            session_id = session_id.as_deref().unwrap_or("-"),
            early_messages = early.len(),
            "HTTP transport active"
        );

        let writer = PostWriter {
            server: self.server.clone(),
            flavor: self.flavor,
            client: self.client.clone(),
            endpoint,
            headers: self.headers.clone(),
            request_timeout: self.request_timeout,
        };
        let server = self.server.clone();
        let task = tokio::spawn(async move {
            tokio::select! {
                _ = read_stream(&server, early, stream, inbound_tx.clone()) => {}
                _ = writer.run(outbound_rx, inbound_tx) => {}
            }
            info!(server = %server, "HTTP transport closed");
        });

        Ok(TransportLink {
            outbound: outbound_tx,
            inbound: inbound_rx,
            session_id,
            task: TaskGuard::new(task),
        })
    }
}

// ── GET side ────────────────────────────────────────────────────────

/// Event reader over a streaming response body with an idle timeout.
struct EventStream {
    body: BoxStream<'static, reqwest::Result<Bytes>>,
    decoder: SseDecoder,
    ready: VecDeque<SseFrame>,
    idle_timeout: Duration,
    finished: bool,
}

impl EventStream {
    fn new(response: reqwest::Response, idle_timeout: Duration) -> Self {
        Self {
            body: response.bytes_stream().boxed(),
            decoder: SseDecoder::new(),
            ready: VecDeque::new(),
            idle_timeout,
            finished: false,
        }
    }

    /// Next event, `Ok(None)` at end of stream.
    async fn next_event(&mut self) -> Result<Option<ServerEvent>, McpError> {
        loop {
            if let Some(frame) = self.ready.pop_front() {
                return Ok(Some(frame.into()));
            }
            if self.finished {
                return Ok(None);
            }
            match tokio::time::timeout(self.idle_timeout, self.body.next()).await {
                Err(_) => return Err(McpError::Timeout(self.idle_timeout)),
                Ok(Some(Ok(chunk))) => self.ready.extend(self.decoder.push(&chunk)),
                Ok(Some(Err(e))) => return Err(McpError::Http(e)),
                Ok(None) => {
                    self.finished = true;
                    self.ready.extend(self.decoder.finish());
                }
            }
        }
    }
}

async fn read_stream(
    server: &str,
    early: Vec<Inbound>,
    mut stream: EventStream,
    inbound: mpsc::Sender<Inbound>,
) {
    for message in early {
        if inbound.send(message).await.is_err() {
            return;
        }
    }
    loop {
        match stream.next_event().await {
            Ok(Some(ServerEvent::Message(data))) => {
                if inbound.send(decode_event(server, &data)).await.is_err() {
                    return;
                }
            }
            Ok(Some(ServerEvent::Endpoint(_) | ServerEvent::Ping)) => {
                debug!(server = %server, "Ignoring repeated endpoint/ping");
            }
            Ok(Some(ServerEvent::Unknown { event, .. })) => {
                debug!(server = %server, event = %event, "Ignoring unknown event");
            }
            Ok(None) => {
                info!(server = %server, "Event stream ended");
                return;
            }
            Err(e) => {
                warn!(server = %server, error = %e, "Event stream failed");
                return;
            }
        }
    }
}

fn decode_event(server: &str, data: &str) -> Inbound {
    let decoded = codec::decode(data);
    if let Err(e) = &decoded {
        warn!(server = %server, error = %e, "Undecodable message event");
    }
    decoded
}

// ── POST side ───────────────────────────────────────────────────────

struct PostWriter {
    server: String,
    flavor: HttpFlavor,
    client: reqwest::Client,
    endpoint: Url,
    headers: HeaderMap,
    request_timeout: Duration,
}

impl PostWriter {
    /// POST every outbound message in order, one at a time.
    ///
    /// A slow POST holds back every message queued behind it, and a queued
    /// request's own timeout keeps running while it waits.
    async fn run(self, mut outbound: mpsc::Receiver<JsonRpcMessage>, inbound: mpsc::Sender<Inbound>) {
        while let Some(message) = outbound.recv().await {
            let posted_id = match &message {
                JsonRpcMessage::Request(req) => Some(req.id.clone()),
                _ => None,
            };
            let outcome = match self.post(&message, posted_id.as_ref()).await {
                Ok(reply) => reply,
                Err(e) => {
                    warn!(server = %self.server, error = %e, "POST failed");
                    posted_id.map(|id| {
                        Err(McpError::Delivery {
                            id: Some(id),
                            reason: e.to_string(),
                        })
                    })
                }
            };
            if let Some(inbound_message) = outcome {
                if inbound.send(inbound_message).await.is_err() {
                    return;
                }
            }
        }
    }

    /// Send one message; returns a reply when the response body carried one.
    async fn post(
        &self,
        message: &JsonRpcMessage,
        posted_id: Option<&RpcId>,
    ) -> Result<Option<Inbound>, McpError> {
        let body = codec::encode(message)?;
        debug!(server = %self.server, method = message.method().unwrap_or("-"), "POST");
        let response = self
            .client
            .post(self.endpoint.clone())
            .headers(self.headers.clone())
            .header(CONTENT_TYPE, "application/json")
            .timeout(self.request_timeout)
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(McpError::HttpStatus {
                status: status.as_u16(),
                body,
            });
        }
        if self.flavor == HttpFlavor::EventStream {
            return Ok(None);
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_ascii_lowercase();
        if content_type.starts_with("text/event-stream") {
            return Ok(None);
        }
        let body = response.text().await?;
        Ok(match classify_post_reply(&content_type, &body) {
            PostReply::Json(text) => Some(decode_reply(&self.server, text, posted_id)),
            PostReply::EmbeddedSse(text) => {
                debug!(server = %self.server, "Reply embedded as SSE in POST body");
                Some(decode_reply(&self.server, &text, posted_id))
            }
            PostReply::OnStream => None,
        })
    }
}

/// Where the reply to a POST will come from.
#[derive(Debug, PartialEq, Eq)]
enum PostReply<'a> {
    /// Synchronous JSON body.
    Json(&'a str),
    /// Compatibility: a single `event: message` frame in a non-SSE body.
    EmbeddedSse(String),
    /// Nothing inline; the reply arrives on the GET stream.
    OnStream,
}

fn classify_post_reply<'a>(content_type: &str, body: &'a str) -> PostReply<'a> {
    if content_type.starts_with("application/json") {
        if body.trim().is_empty() {
            return PostReply::OnStream;
        }
        return PostReply::Json(body);
    }
    if content_type.starts_with("text/event-stream") {
        return PostReply::OnStream;
    }
    match sse::extract_embedded_message(body) {
        Some(data) => PostReply::EmbeddedSse(data),
        None => PostReply::OnStream,
    }
}

/// Decode an inline reply; failures are pinned to the posted request.
fn decode_reply(server: &str, text: &str, posted_id: Option<&RpcId>) -> Inbound {
    codec::decode(text).map_err(|e| {
        warn!(server = %server, error = %e, "Undecodable POST reply");
        match e {
            McpError::Decode { id: None, reason } => McpError::Decode {
                id: posted_id.cloned(),
                reason,
            },
            other => other,
        }
    })
}

// ── Endpoint handling ───────────────────────────────────────────────

/// Resolve a possibly relative endpoint and require the connection's origin.
fn resolve_endpoint(base: &Url, raw: &str) -> Result<Url, McpError> {
    let endpoint = base
        .join(raw)
        .map_err(|e| McpError::Connection(format!("invalid endpoint '{raw}': {e}")))?;
    if endpoint.origin() != base.origin() {
        return Err(McpError::OriginMismatch {
            expected: base.origin().ascii_serialization(),
            actual: endpoint.origin().ascii_serialization(),
        });
    }
    Ok(endpoint)
}

fn session_id_from(endpoint: &Url) -> Option<String> {
    endpoint
        .query_pairs()
        .find(|(key, _)| key == "session_id" || key == "sessionId")
        .map(|(_, value)| value.into_owned())
}
