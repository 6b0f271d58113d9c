//! Live-room integration test harness
//!
//! Provides:
//! - An embedded WebSocket signaling server on a random port that records
//!   every connection, credential and inbound message, answers the
//!   directory and join requests, and can push scripted messages or drop a
//!   socket without a close frame
//! - A TCP listener that accepts sockets and never answers the upgrade
//! - An embedded REST credential issuer
//! - Polling helpers with timeouts

#![allow(dead_code)]

use encore_live_rooms::{ClientMessage, ServerMessage};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::Message;

/// Install a test subscriber once per binary
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("encore_live_rooms=debug")
        .with_test_writer()
        .try_init();
}

/// Poll `check` until it holds or `timeout` passes
pub async fn wait_until<F>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Await `future`, failing the test on timeout
pub async fn within<T>(timeout: Duration, what: &str, future: impl Future<Output = T>) -> T {
    match tokio::time::timeout(timeout, future).await {
        Ok(value) => value,
        Err(_) => panic!("Timed out waiting for {}", what),
    }
}

/// Something the server observed, in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerLog {
    Opened(usize),
    Closed(usize),
    Dropped(usize),
}

struct Connection {
    outbound: mpsc::UnboundedSender<Message>,
    task: JoinHandle<()>,
}

#[derive(Default)]
struct ServerState {
    tokens: Mutex<Vec<Option<String>>>,
    inbound: Mutex<Vec<(usize, ClientMessage)>>,
    log: Mutex<Vec<ServerLog>>,
    connections: Mutex<HashMap<usize, Connection>>,
    accepted: AtomicUsize,
    reject_next: AtomicUsize,
    rooms: Mutex<Vec<String>>,
}

/// Embedded signaling server
pub struct MockSignalingServer {
    addr: SocketAddr,
    state: Arc<ServerState>,
    accept_task: JoinHandle<()>,
}

impl MockSignalingServer {
    /// Start on a random local port
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind signaling listener");
        let addr = listener.local_addr().expect("No local address");
        let state = Arc::new(ServerState::default());

        let accept_state = Arc::clone(&state);
        let accept_task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let state = Arc::clone(&accept_state);
                tokio::spawn(accept_connection(state, stream));
            }
        });

        Self {
            addr,
            state,
            accept_task,
        }
    }

    /// Signaling URL clients should dial
    pub fn url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    /// Rooms listed in every `available_rooms` reply
    pub fn set_rooms(&self, rooms: &[&str]) {
        *self.state.rooms.lock() = rooms.iter().map(|r| r.to_string()).collect();
    }

    /// Refuse the next `count` upgrades with HTTP 401
    pub fn reject_next(&self, count: usize) {
        self.state.reject_next.store(count, Ordering::SeqCst);
    }

    /// Upgrade attempts seen, including rejected ones
    pub fn tokens(&self) -> Vec<Option<String>> {
        self.state.tokens.lock().clone()
    }

    /// Successfully upgraded connections
    pub fn accepted(&self) -> usize {
        self.state.accepted.load(Ordering::SeqCst)
    }

    /// Connections currently open on the server side
    pub fn open_connections(&self) -> usize {
        self.state.connections.lock().len()
    }

    pub fn log(&self) -> Vec<ServerLog> {
        self.state.log.lock().clone()
    }

    /// Every inbound message with the index of its connection
    pub fn inbound(&self) -> Vec<(usize, ClientMessage)> {
        self.state.inbound.lock().clone()
    }

    pub fn inbound_of(&self, kind: &str) -> Vec<ClientMessage> {
        self.state
            .inbound
            .lock()
            .iter()
            .filter(|(_, m)| m.kind() == kind)
            .map(|(_, m)| m.clone())
            .collect()
    }

    /// Wait until `count` messages of `kind` have arrived
    pub async fn wait_for(&self, kind: &str, count: usize) -> Vec<ClientMessage> {
        let reached =
            wait_until(Duration::from_secs(10), || self.inbound_of(kind).len() >= count).await;
        assert!(reached, "Server never received {} x {}", count, kind);
        self.inbound_of(kind)
    }

    /// Push a message on the most recent connection
    pub fn push(&self, message: &ServerMessage) {
        let text = serde_json::to_string(message).expect("Failed to encode server message");
        let connections = self.state.connections.lock();
        let latest = connections.keys().max().copied();
        if let Some(conn) = latest.and_then(|index| connections.get(&index)) {
            let _ = conn.outbound.send(Message::Text(text));
        }
    }

    /// Kill the most recent connection without a close frame
    pub fn drop_latest(&self) {
        let mut connections = self.state.connections.lock();
        let latest = connections.keys().max().copied();
        if let Some(index) = latest {
            if let Some(conn) = connections.remove(&index) {
                conn.task.abort();
                self.state.log.lock().push(ServerLog::Dropped(index));
            }
        }
    }

    pub fn shutdown(&self) {
        self.accept_task.abort();
        for (_, conn) in self.state.connections.lock().drain() {
            conn.task.abort();
        }
    }
}

impl Drop for MockSignalingServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn accept_connection(state: Arc<ServerState>, stream: TcpStream) {
    let hdr_state = Arc::clone(&state);
    let callback = move |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        let token = request.uri().query().and_then(|query| {
            url::form_urlencoded::parse(query.as_bytes())
                .find(|(key, _)| key == "token")
                .map(|(_, value)| value.into_owned())
        });
        hdr_state.tokens.lock().push(token);

        let reject = hdr_state
            .reject_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if reject {
            let mut refused = ErrorResponse::new(Some("invalid token".to_string()));
            *refused.status_mut() = StatusCode::UNAUTHORIZED;
            return Err(refused);
        }
        Ok(response)
    };

    let ws = match tokio_tungstenite::accept_hdr_async(stream, callback).await {
        Ok(ws) => ws,
        Err(_) => return,
    };

    let index = state.accepted.fetch_add(1, Ordering::SeqCst);
    let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<Message>();
    let (mut write, mut read) = ws.split();

    let (ready_tx, ready_rx) = oneshot::channel::<()>();

    let conn_state = Arc::clone(&state);
    let reply = outbound.clone();
    let task = tokio::spawn(async move {
        if ready_rx.await.is_err() {
            return;
        }
        loop {
            tokio::select! {
                Some(message) = outbound_rx.recv() => {
                    if write.send(message).await.is_err() {
                        break;
                    }
                }
                frame = read.next() => {
                    match frame {
                        Some(Ok(Message::Text(text))) => {
                            let Ok(message) = serde_json::from_str::<ClientMessage>(&text) else {
                                continue;
                            };
                            respond(&conn_state, &reply, &message);
                            conn_state.inbound.lock().push((index, message));
                        }
                        Some(Ok(Message::Close(_))) | None | Some(Err(_)) => {
                            conn_state.log.lock().push(ServerLog::Closed(index));
                            let _ = write.close().await;
                            break;
                        }
                        Some(Ok(_)) => {}
                    }
                }
            }
        }
        conn_state.connections.lock().remove(&index);
    });

    state.log.lock().push(ServerLog::Opened(index));
    state
        .connections
        .lock()
        .insert(index, Connection { outbound, task });
    let _ = ready_tx.send(());
}

fn respond(state: &ServerState, reply: &mpsc::UnboundedSender<Message>, message: &ClientMessage) {
    let response = match message {
        ClientMessage::GetAvailableRooms => Some(ServerMessage::AvailableRooms {
            rooms: state.rooms.lock().clone(),
            room_info: None,
        }),
        ClientMessage::JoinRoom { room_id, .. } => Some(ServerMessage::RoomJoined {
            room_id: room_id.clone(),
            existing_participants: 0,
            room_info: None,
        }),
        ClientMessage::Chat { message, .. } => Some(ServerMessage::Chat {
            username: "echo".to_string(),
            message: message.clone(),
        }),
        _ => None,
    };

    if let Some(response) = response {
        if let Ok(text) = serde_json::to_string(&response) {
            let _ = reply.send(Message::Text(text));
        }
    }
}

/// Accepts TCP connections and holds them without speaking
pub struct SilentServer {
    addr: SocketAddr,
    accepted: Arc<AtomicUsize>,
    task: JoinHandle<()>,
}

impl SilentServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind silent listener");
        let addr = listener.local_addr().expect("No local address");
        let accepted = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&accepted);
        let task = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                held.push(stream);
            }
        });

        Self {
            addr,
            accepted,
            task,
        }
    }

    pub fn url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }
}

impl Drop for SilentServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[derive(Default)]
struct IssuerState {
    requests: Mutex<Vec<(Option<String>, serde_json::Value)>>,
    minted: AtomicUsize,
}

/// Embedded REST credential issuer
pub struct MockCredentialIssuer {
    addr: SocketAddr,
    state: Arc<IssuerState>,
    task: JoinHandle<()>,
}

impl MockCredentialIssuer {
    /// Start an issuer minting tokens that live `ttl_secs`
    pub async fn start(ttl_secs: u64) -> Self {
        use axum::extract::State;
        use axum::http::HeaderMap;
        use axum::routing::post;
        use axum::{Json, Router};

        let state = Arc::new(IssuerState::default());
        let app = Router::new()
            .route(
                "/api/live/token",
                post(
                    move |State(state): State<Arc<IssuerState>>,
                          headers: HeaderMap,
                          Json(body): Json<serde_json::Value>| async move {
                        let auth = headers
                            .get("authorization")
                            .and_then(|v| v.to_str().ok())
                            .map(str::to_string);
                        state.requests.lock().push((auth, body));
                        let n = state.minted.fetch_add(1, Ordering::SeqCst) + 1;
                        Json(serde_json::json!({
                            "token": format!("issued-{}", n),
                            "expiresIn": ttl_secs,
                        }))
                    },
                ),
            )
            .with_state(Arc::clone(&state));

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind issuer listener");
        let addr = listener.local_addr().expect("No local address");
        let task = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Self { addr, state, task }
    }

    pub fn endpoint(&self) -> String {
        format!("http://{}/api/live/token", self.addr)
    }

    /// Authorization header and JSON body of every request
    pub fn requests(&self) -> Vec<(Option<String>, serde_json::Value)> {
        self.state.requests.lock().clone()
    }
}

impl Drop for MockCredentialIssuer {
    fn drop(&mut self) {
        self.task.abort();
    }
}
