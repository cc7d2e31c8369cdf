//! Integration tests for the HTTP transports against an in-process axum server.
//!
//! The fake server opens its event stream with an `endpoint` event (possibly
//! preceded by a burst of messages), a `ping` event, or nothing at all. It
//! answers POSTs on one of three paths: pushed onto the event stream, as a
//! JSON body, or as an SSE frame wrapped in a plain-text body.

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, StatusCode, Uri};
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use toolmesh_core::{ServerDescriptor, TransportKind};
use toolmesh_mcp::{ClientOptions, ConnectionManager, McpClient, McpError};

#[derive(Clone, Copy)]
enum Bootstrap {
    Endpoint(&'static str),
    Ping,
    /// `early - 1` notifications and one `ping` request (id `"early-ping"`),
    /// then the endpoint.
    Chatty { early: usize, endpoint: &'static str },
    /// Stream opens but never sends an event.
    Silent,
}

#[derive(Clone, Copy)]
enum ReplyPath {
    Stream,
    Json,
    Embedded,
}

type EventTx = mpsc::Sender<Result<Event, Infallible>>;

struct FakeServer {
    bootstrap: Bootstrap,
    reply: ReplyPath,
    stream: Mutex<Option<EventTx>>,
    accept_headers: Mutex<Vec<String>>,
    post_paths: Mutex<Vec<String>>,
    session_ids: Mutex<Vec<Option<String>>>,
    posted: Mutex<Vec<Value>>,
}

impl FakeServer {
    fn new(bootstrap: Bootstrap, reply: ReplyPath) -> Arc<Self> {
        Arc::new(Self {
            bootstrap,
            reply,
            stream: Mutex::new(None),
            accept_headers: Mutex::new(Vec::new()),
            post_paths: Mutex::new(Vec::new()),
            session_ids: Mutex::new(Vec::new()),
            posted: Mutex::new(Vec::new()),
        })
    }

    fn record_accept(&self, headers: &HeaderMap) {
        let accept = headers
            .get(header::ACCEPT)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        self.accept_headers.lock().unwrap().push(accept);
    }

    /// End the event stream.
    fn close_stream(&self) {
        self.stream.lock().unwrap().take();
    }
}

fn reply_for(message: &Value) -> Option<Value> {
    let id = message.get("id")?.clone();
    let result = match message["method"].as_str()? {
        "initialize" => json!({
            "protocolVersion": "2024-11-05",
            "capabilities": {"tools": {}},
            "serverInfo": {"name": "axum-fake", "version": "0.0.1"}
        }),
        "tools/list" => json!({"tools": [{
            "name": "lookup",
            "description": "Look something up",
            "inputSchema": {"type": "object", "properties": {"q": {"type": "string"}}}
        }]}),
        "tools/call" if message["params"]["name"] == "hang" => return None,
        "tools/call" => json!({"content": [{"type": "text", "text": "looked up"}]}),
        _ => return None,
    };
    Some(json!({"jsonrpc": "2.0", "id": id, "result": result}))
}

async fn open_stream(
    State(server): State<Arc<FakeServer>>,
    headers: HeaderMap,
) -> Sse<ReceiverStream<Result<Event, Infallible>>> {
    server.record_accept(&headers);
    let (tx, rx) = mpsc::channel(64);
    let opening = match server.bootstrap {
        Bootstrap::Endpoint(path) => vec![Event::default().event("endpoint").data(path)],
        Bootstrap::Ping => vec![Event::default().event("ping").data("heartbeat")],
        Bootstrap::Chatty { early, endpoint } => {
            let mut events: Vec<Event> = (1..early)
                .map(|seq| {
                    let note = json!({
                        "jsonrpc": "2.0",
                        "method": "notifications/message",
                        "params": {"level": "info", "data": seq}
                    });
                    Event::default().event("message").data(note.to_string())
                })
                .collect();
            let ping = json!({"jsonrpc": "2.0", "id": "early-ping", "method": "ping"});
            events.push(Event::default().event("message").data(ping.to_string()));
            events.push(Event::default().event("endpoint").data(endpoint));
            events
        }
        Bootstrap::Silent => Vec::new(),
    };
    for event in opening {
        tx.try_send(Ok(event)).unwrap();
    }
    *server.stream.lock().unwrap() = Some(tx);
    Sse::new(ReceiverStream::new(rx))
}

async fn handle_post(
    State(server): State<Arc<FakeServer>>,
    Query(query): Query<HashMap<String, String>>,
    uri: Uri,
    headers: HeaderMap,
    body: String,
) -> Response {
    server.record_accept(&headers);
    server.post_paths.lock().unwrap().push(uri.path().to_string());
    server
        .session_ids
        .lock()
        .unwrap()
        .push(query.get("session_id").cloned());
    assert_eq!(
        headers.get(header::CONTENT_TYPE).unwrap(),
        "application/json"
    );

    let message: Value = serde_json::from_str(&body).unwrap();
    server.posted.lock().unwrap().push(message.clone());
    if message["params"]["name"] == "garbled" {
        return ([(header::CONTENT_TYPE, "application/json")], "{not json").into_response();
    }
    let Some(reply) = reply_for(&message) else {
        return StatusCode::ACCEPTED.into_response();
    };
    match server.reply {
        ReplyPath::Stream => {
            let tx = server.stream.lock().unwrap().clone();
            if let Some(tx) = tx {
                let event = Event::default().event("message").data(reply.to_string());
                tx.send(Ok(event)).await.ok();
            }
            StatusCode::ACCEPTED.into_response()
        }
        ReplyPath::Json => Json(reply).into_response(),
        ReplyPath::Embedded => (
            [(header::CONTENT_TYPE, "text/plain")],
            format!("event: message\ndata: {reply}\n\n"),
        )
            .into_response(),
    }
}

async fn spawn(server: Arc<FakeServer>) -> String {
    let app = Router::new()
        .route("/sse", get(open_stream).post(handle_post))
        .route("/messages", post(handle_post))
        .with_state(server);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}/sse")
}

/// Poll `check` until it holds, for at most three seconds.
async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..150 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

fn options() -> ClientOptions {
    ClientOptions {
        connect_timeout: Duration::from_secs(5),
        request_timeout: Duration::from_secs(5),
        ..ClientOptions::default()
    }
}

#[tokio::test]
async fn endpoint_negotiation_with_replies_on_stream() {
    let server = FakeServer::new(
        Bootstrap::Endpoint("/messages?session_id=abc"),
        ReplyPath::Stream,
    );
    let url = spawn(Arc::clone(&server)).await;

    let manager = ConnectionManager::new(options());
    manager
        .connect_server(ServerDescriptor::http("remote", TransportKind::Http, url))
        .await
        .unwrap();

    let client = manager.get_client("remote").await.unwrap();
    assert!(client.connected());
    assert_eq!(client.session_id().as_deref(), Some("abc"));
    assert_eq!(client.server_info().unwrap().server_info.name, "axum-fake");

    let tools = manager.get_tools("remote").await.unwrap();
    assert_eq!(tools.len(), 1);
    assert_eq!(tools[0].name, "lookup");

    let result = client.call_tool("lookup", json!({"q": "x"})).await.unwrap();
    assert_eq!(result.content[0].text.as_deref(), Some("looked up"));

    assert!(server
        .post_paths
        .lock()
        .unwrap()
        .iter()
        .all(|p| p == "/messages"));
    assert!(server
        .session_ids
        .lock()
        .unwrap()
        .iter()
        .all(|id| id.as_deref() == Some("abc")));
    assert!(server
        .accept_headers
        .lock()
        .unwrap()
        .iter()
        .all(|a| a == "application/json, text/event-stream"));

    manager.shutdown().await;
}

#[tokio::test]
async fn ping_bootstrap_with_synchronous_json_replies() {
    // Never sends `endpoint` and never pushes replies on the stream.
    let server = FakeServer::new(Bootstrap::Ping, ReplyPath::Json);
    let url = spawn(Arc::clone(&server)).await;

    let manager = ConnectionManager::new(options());
    manager
        .connect_server(ServerDescriptor::http("sync", TransportKind::Http, url))
        .await
        .unwrap();

    assert!(manager.get_client("sync").await.unwrap().connected());
    assert_eq!(manager.get_tools("sync").await.unwrap()[0].name, "lookup");
    // POSTs went to the connection URL itself.
    assert!(server.post_paths.lock().unwrap().iter().all(|p| p == "/sse"));
    manager.shutdown().await;
}

#[tokio::test]
async fn embedded_sse_reply_in_plain_body() {
    let server = FakeServer::new(Bootstrap::Endpoint("/messages"), ReplyPath::Embedded);
    let url = spawn(Arc::clone(&server)).await;

    let client = McpClient::new(
        ServerDescriptor::http("wrapped", TransportKind::Http, url),
        options(),
    );
    client.connect().await.unwrap();
    assert!(client.session_id().is_none());

    let result = client.call_tool("lookup", json!({})).await.unwrap();
    assert_eq!(result.content[0].text.as_deref(), Some("looked up"));
    client.disconnect().await;
    assert!(!client.connected());
}

#[tokio::test]
async fn endpoint_on_foreign_origin_is_rejected() {
    let server = FakeServer::new(
        Bootstrap::Endpoint("http://evil.example:9/messages"),
        ReplyPath::Stream,
    );
    let url = spawn(server).await;

    let manager = ConnectionManager::new(options());
    let err = manager
        .connect_server(ServerDescriptor::http("hijack", TransportKind::Http, url))
        .await
        .unwrap_err();
    assert!(matches!(err, McpError::OriginMismatch { .. }));
    assert!(manager.get_client("hijack").await.is_none());
    assert!(manager.get_tools("hijack").await.is_none());
}

#[tokio::test]
async fn event_stream_flavor_ignores_ping_bootstrap() {
    let server = FakeServer::new(Bootstrap::Ping, ReplyPath::Json);
    let url = spawn(server).await;

    let client = McpClient::new(
        ServerDescriptor::http("strict", TransportKind::EventStream, url),
        ClientOptions {
            connect_timeout: Duration::from_millis(500),
            ..options()
        },
    );
    let err = client.connect().await.unwrap_err();
    assert!(matches!(err, McpError::Timeout(_)));
    assert!(!client.connected());
}

#[tokio::test]
async fn event_stream_flavor_with_endpoint() {
    let server = FakeServer::new(Bootstrap::Endpoint("/messages?sessionId=s1"), ReplyPath::Stream);
    let url = spawn(server).await;

    let client = McpClient::new(
        ServerDescriptor::http("strict", TransportKind::EventStream, url),
        options(),
    );
    client.connect().await.unwrap();
    assert_eq!(client.session_id().as_deref(), Some("s1"));
    assert_eq!(client.list_tools().await.unwrap().len(), 1);
    client.disconnect().await;
}

#[tokio::test]
async fn stream_end_fails_pending_call() {
    let server = FakeServer::new(Bootstrap::Endpoint("/messages"), ReplyPath::Stream);
    let url = spawn(Arc::clone(&server)).await;

    let client = Arc::new(McpClient::new(
        ServerDescriptor::http("closing", TransportKind::Http, url),
        options(),
    ));
    client.connect().await.unwrap();

    let waiting = {
        let client = Arc::clone(&client);
        tokio::spawn(async move { client.call_tool("hang", json!({})).await })
    };
    tokio::time::sleep(Duration::from_millis(200)).await;
    server.close_stream();

    let err = waiting.await.unwrap().unwrap_err();
    assert!(matches!(err, McpError::TransportClosed));
    assert!(!client.connected());
}

#[tokio::test]
async fn messages_before_endpoint_are_delivered() {
    // More early messages than the transport's channel holds.
    let server = FakeServer::new(
        Bootstrap::Chatty {
            early: 40,
            endpoint: "/messages",
        },
        ReplyPath::Stream,
    );
    let url = spawn(Arc::clone(&server)).await;

    let client = McpClient::new(
        ServerDescriptor::http("chatty", TransportKind::Http, url),
        options(),
    );
    client.connect().await.unwrap();
    assert_eq!(client.list_tools().await.unwrap().len(), 1);

    // The early ping was dispatched and answered over the endpoint.
    let answered = eventually(|| {
        let server = Arc::clone(&server);
        async move {
            let posted = server.posted.lock().unwrap();
            let found = posted
                .iter()
                .any(|m| m["id"] == "early-ping" && m["result"] == json!({}));
            found
        }
    })
    .await;
    assert!(answered);
    client.disconnect().await;
}

#[tokio::test]
async fn idle_event_stream_closes_transport() {
    let server = FakeServer::new(Bootstrap::Endpoint("/messages"), ReplyPath::Stream);
    let url = spawn(server).await;

    let client = McpClient::new(
        ServerDescriptor::http("idle", TransportKind::Http, url),
        ClientOptions {
            sse_read_timeout: Duration::from_millis(400),
            ..options()
        },
    );
    client.connect().await.unwrap();

    // Never answered; the stream goes quiet and the read timeout fires first.
    let err = client.call_tool("hang", json!({})).await.unwrap_err();
    assert!(matches!(err, McpError::TransportClosed));
    assert!(!client.connected());
}

#[tokio::test]
async fn undecodable_post_reply_fails_only_that_call() {
    let server = FakeServer::new(Bootstrap::Endpoint("/messages"), ReplyPath::Json);
    let url = spawn(server).await;

    let client = McpClient::new(
        ServerDescriptor::http("garbling", TransportKind::Http, url),
        options(),
    );
    client.connect().await.unwrap();

    let err = client.call_tool("garbled", json!({})).await.unwrap_err();
    assert!(matches!(err, McpError::Decode { id: Some(_), .. }));
    assert!(client.connected());

    let result = client.call_tool("lookup", json!({})).await.unwrap();
    assert_eq!(result.content[0].text.as_deref(), Some("looked up"));
    client.disconnect().await;
}

#[tokio::test]
async fn bulk_connect_does_not_wait_on_hung_server() {
    let hung = spawn(FakeServer::new(Bootstrap::Silent, ReplyPath::Stream)).await;
    let good = spawn(FakeServer::new(Bootstrap::Endpoint("/messages"), ReplyPath::Stream)).await;

    let manager = Arc::new(ConnectionManager::new(ClientOptions {
        connect_timeout: Duration::from_secs(30),
        ..options()
    }));
    let pending = manager.load_and_connect_all(vec![
        ServerDescriptor::http("hung", TransportKind::Http, hung),
        ServerDescriptor::http("good", TransportKind::Http, good),
    ]);
    assert_eq!(pending.len(), 2);

    // The good server is up and discovered long before the hung one times out.
    let discovered = eventually(|| {
        let manager = Arc::clone(&manager);
        async move {
            let tools = manager.get_tools("good").await;
            tools.is_some()
        }
    })
    .await;
    assert!(discovered);
    assert!(manager.get_client("hung").await.is_none());
    manager.shutdown().await;
}
