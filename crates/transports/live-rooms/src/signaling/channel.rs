//! WebSocket signaling channel with reconnect and credential rotation
//!
//! A [`SignalingChannel`] owns at most one live socket. Each socket is tagged
//! with a connection generation; reconnects and rotations replace the socket
//! and bump the generation, and anything produced by an older generation is
//! ignored. Inbound frames are parsed into [`ServerMessage`]s and forwarded,
//! in arrival order, as [`ChannelEvent`]s to a single consumer.

use super::protocol::{ClientMessage, ServerMessage};
use super::reconnect::ReconnectPolicy;
use super::token::TokenManager;
use crate::config::LiveClientConfig;
use crate::{Error, Result};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Close code reported when the socket ended without a close frame
pub const ABNORMAL_CLOSURE: u16 = 1006;

/// Close codes the server uses to reject a credential
const AUTH_CLOSE_CODES: [u16; 4] = [1008, 4001, 4401, 4403];

/// Time allowed for a replaced socket to flush its close frame
const CLOSE_FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

/// Observable state of the signaling socket
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connecting,
    Open,
    Closed,
}

impl ConnectionStatus {
    pub fn is_open(&self) -> bool {
        matches!(self, ConnectionStatus::Open)
    }
}

/// Why a socket was opened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenReason {
    /// Explicit [`SignalingChannel::connect`]
    Connect,
    /// Reconnect timer fired after a failure
    Reconnect,
    /// Replaced on purpose after a credential renewal
    Rotation,
}

impl OpenReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            OpenReason::Connect => "connect",
            OpenReason::Reconnect => "reconnect",
            OpenReason::Rotation => "rotation",
        }
    }
}

/// Event delivered to the channel's consumer
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// A socket opened for `generation`
    Opened {
        generation: u64,
        reason: OpenReason,
    },

    /// Inbound message received on `generation`
    Message {
        generation: u64,
        message: ServerMessage,
    },

    /// The socket for `generation` closed
    Closed {
        generation: u64,
        code: u16,
        will_reconnect: bool,
    },
}

/// Outbound half of the signaling channel
///
/// Room, chat and peer logic only ever need to send; they depend on this
/// trait rather than on the socket.
pub trait SignalSink: Send + Sync {
    /// Queue a message for the current connection
    fn send(&self, message: ClientMessage) -> Result<()>;
}

/// WebSocket signaling channel
#[derive(Clone)]
pub struct SignalingChannel {
    inner: Arc<ChannelInner>,
}

struct ConnectionHandle {
    generation: u64,
    outbound: mpsc::UnboundedSender<Message>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

struct ChannelInner {
    url: String,
    token_query_param: String,
    policy: ReconnectPolicy,
    connect_timeout: Duration,
    credential_check_interval: Duration,
    tokens: Arc<TokenManager>,
    events: mpsc::UnboundedSender<ChannelEvent>,
    status: watch::Sender<ConnectionStatus>,
    generation: AtomicU64,
    failed_attempts: AtomicU32,
    reconnects_scheduled: AtomicU64,
    closed: AtomicBool,
    connection: Mutex<Option<ConnectionHandle>>,
    reconnect_timer: Mutex<Option<JoinHandle<()>>>,
    renewal_task: Mutex<Option<JoinHandle<()>>>,
}

impl SignalingChannel {
    /// Create a channel; nothing connects until [`connect`](Self::connect)
    ///
    /// Returns the channel and the receiving end of its event stream.
    pub fn new(
        config: &LiveClientConfig,
        tokens: Arc<TokenManager>,
    ) -> (Self, mpsc::UnboundedReceiver<ChannelEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (status_tx, _) = watch::channel(ConnectionStatus::Closed);

        let inner = ChannelInner {
            url: config.signaling_url.clone(),
            token_query_param: config.token_query_param.clone(),
            policy: ReconnectPolicy::from(&config.reconnect),
            connect_timeout: config.connect_timeout(),
            credential_check_interval: config.credential_check_interval(),
            tokens,
            events: events_tx,
            status: status_tx,
            generation: AtomicU64::new(0),
            failed_attempts: AtomicU32::new(0),
            reconnects_scheduled: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            connection: Mutex::new(None),
            reconnect_timer: Mutex::new(None),
            renewal_task: Mutex::new(None),
        };

        (
            Self {
                inner: Arc::new(inner),
            },
            events_rx,
        )
    }

    /// Open the socket and start the credential renewal timer
    ///
    /// A failed attempt is returned and a reconnect is scheduled, so callers
    /// may treat the error as informational.
    pub async fn connect(&self) -> Result<()> {
        self.inner.closed.store(false, Ordering::SeqCst);
        self.inner.ensure_renewal_task();
        ChannelInner::connect(self.inner.clone(), OpenReason::Connect).await
    }

    /// Replace the socket with one opened on the current credential
    pub async fn rotate(&self) -> Result<()> {
        info!("Rotating signaling connection");
        ChannelInner::connect(self.inner.clone(), OpenReason::Rotation).await
    }

    /// Close intentionally; no reconnect follows
    pub async fn close(&self) {
        let inner = &self.inner;
        inner.closed.store(true, Ordering::SeqCst);
        let generation = inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        inner.cancel_reconnect();
        if let Some(task) = inner.renewal_task.lock().take() {
            task.abort();
        }

        let was_open = inner.connection.lock().is_some();
        inner.drop_connection("client closing").await;
        inner.set_status(ConnectionStatus::Closed);

        if was_open {
            inner.emit(ChannelEvent::Closed {
                generation,
                code: u16::from(CloseCode::Normal),
                will_reconnect: false,
            });
        }
        info!("Signaling channel closed");
    }

    /// Current socket status
    pub fn status(&self) -> ConnectionStatus {
        *self.inner.status.borrow()
    }

    /// Watch socket status changes
    pub fn subscribe_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.inner.status.subscribe()
    }

    /// Current connection generation
    pub fn generation(&self) -> u64 {
        self.inner.generation.load(Ordering::SeqCst)
    }

    /// Total reconnect timers scheduled since creation
    pub fn reconnects_scheduled(&self) -> u64 {
        self.inner.reconnects_scheduled.load(Ordering::SeqCst)
    }

    /// Whether a reconnect timer is waiting to fire
    pub fn has_pending_reconnect(&self) -> bool {
        self.inner
            .reconnect_timer
            .lock()
            .as_ref()
            .is_some_and(|timer| !timer.is_finished())
    }
}

impl SignalSink for SignalingChannel {
    fn send(&self, message: ClientMessage) -> Result<()> {
        let text = message.to_json()?;
        let connection = self.inner.connection.lock();
        let handle = connection.as_ref().ok_or(Error::NotConnected)?;

        debug!(
            generation = handle.generation,
            kind = message.kind(),
            target = message.target().unwrap_or(""),
            "Sending signaling message"
        );
        handle
            .outbound
            .send(Message::Text(text))
            .map_err(|_| Error::NotConnected)
    }
}

impl ChannelInner {
    fn is_stale(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) != generation
    }

    fn set_status(&self, status: ConnectionStatus) {
        self.status.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
    }

    fn emit(&self, event: ChannelEvent) {
        if self.events.send(event).is_err() {
            debug!("Channel event dropped, consumer gone");
        }
    }

    async fn connect(inner: Arc<Self>, reason: OpenReason) -> Result<()> {
        let generation = inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        inner.cancel_reconnect();
        inner.drop_connection("replaced").await;
        inner.set_status(ConnectionStatus::Connecting);

        let credential = match inner.tokens.get_credential().await {
            Ok(credential) => credential,
            Err(e) => {
                if !inner.is_stale(generation) {
                    warn!(generation, "Could not obtain signaling credential: {}", e);
                    inner.set_status(ConnectionStatus::Closed);
                    inner.schedule_reconnect(generation);
                }
                return Err(e);
            }
        };
        if inner.is_stale(generation) {
            debug!(generation, "Connect superseded before dialing");
            return Ok(());
        }

        let uri = connection_uri(&inner.url, &inner.token_query_param, &credential.token)?;
        info!(
            generation,
            url = %inner.url,
            reason = reason.as_str(),
            "Connecting to signaling server"
        );

        let dial = tokio::time::timeout(inner.connect_timeout, connect_async(uri.as_str()));
        let dialed = match dial.await {
            Ok(result) => result.map_err(classify_connect_error),
            Err(_elapsed) => Err(Error::WebSocketError(format!(
                "Upgrade did not complete within {}ms",
                inner.connect_timeout.as_millis()
            ))),
        };
        let ws_stream = match dialed {
            Ok((ws_stream, _response)) => ws_stream,
            Err(err) => {
                if inner.is_stale(generation) {
                    return Err(err);
                }
                if matches!(err, Error::CredentialRejected(_)) {
                    inner.tokens.invalidate().await;
                }
                warn!(generation, "Signaling connect failed: {}", err);
                inner.set_status(ConnectionStatus::Closed);
                inner.schedule_reconnect(generation);
                return Err(err);
            }
        };

        let (write, read) = ws_stream.split();
        let (gate_tx, gate_rx) = oneshot::channel();
        {
            let mut slot = inner.connection.lock();
            if inner.is_stale(generation) {
                debug!(generation, "Connect superseded after dialing");
                return Ok(());
            }

            let (outbound, outbound_rx) = mpsc::unbounded_channel();
            let writer = tokio::spawn(writer_task(write, outbound_rx, generation));
            let reader = tokio::spawn(reader_task(
                Arc::downgrade(&inner),
                read,
                generation,
                gate_rx,
            ));
            *slot = Some(ConnectionHandle {
                generation,
                outbound,
                reader,
                writer,
            });
        }

        inner.failed_attempts.store(0, Ordering::SeqCst);
        inner.set_status(ConnectionStatus::Open);
        info!(generation, reason = reason.as_str(), "Signaling connection open");
        inner.emit(ChannelEvent::Opened { generation, reason });
        let _ = gate_tx.send(());

        Ok(())
    }

    /// Tear down the current socket, waiting for its close frame to flush
    async fn drop_connection(&self, reason: &'static str) {
        let Some(handle) = self.connection.lock().take() else {
            return;
        };
        debug!(generation = handle.generation, reason, "Dropping signaling connection");

        handle.reader.abort();
        let _ = handle.reader.await;

        let _ = handle.outbound.send(Message::Close(Some(CloseFrame {
            code: CloseCode::Normal,
            reason: reason.into(),
        })));
        drop(handle.outbound);

        let mut writer = handle.writer;
        if tokio::time::timeout(CLOSE_FLUSH_TIMEOUT, &mut writer)
            .await
            .is_err()
        {
            warn!(generation = handle.generation, "Signaling writer did not finish, aborting");
            writer.abort();
        }
    }

    async fn handle_closed(self: Arc<Self>, generation: u64, code: u16) {
        if self.is_stale(generation) || self.closed.load(Ordering::SeqCst) {
            debug!(generation, code, "Ignoring close of superseded connection");
            return;
        }

        {
            let mut slot = self.connection.lock();
            if slot.as_ref().map(|h| h.generation) == Some(generation) {
                slot.take();
            }
        }
        self.set_status(ConnectionStatus::Closed);

        let clean = code == u16::from(CloseCode::Normal);
        if clean {
            info!(generation, "Signaling connection closed by server");
        } else {
            warn!(generation, code, "Signaling connection lost");
        }
        if AUTH_CLOSE_CODES.contains(&code) {
            warn!(generation, code, "Server rejected signaling credential");
            self.tokens.invalidate().await;
        }

        self.emit(ChannelEvent::Closed {
            generation,
            code,
            will_reconnect: !clean,
        });

        if !clean {
            self.schedule_reconnect(generation);
        }
    }

    /// Arm the reconnect timer unless one is already pending
    fn schedule_reconnect(self: &Arc<Self>, generation: u64) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }

        let mut timer = self.reconnect_timer.lock();
        if timer.as_ref().is_some_and(|t| !t.is_finished()) {
            debug!(generation, "Reconnect already pending");
            return;
        }

        let attempt = self.failed_attempts.fetch_add(1, Ordering::SeqCst);
        let delay = self.policy.delay_for(attempt);
        self.reconnects_scheduled.fetch_add(1, Ordering::SeqCst);
        info!(
            generation,
            attempt,
            delay_ms = delay.as_millis() as u64,
            "Scheduling signaling reconnect"
        );

        let weak = Arc::downgrade(self);
        *timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            inner.reconnect_timer.lock().take();
            if let Err(e) = ChannelInner::connect(inner, OpenReason::Reconnect).await {
                debug!("Reconnect attempt failed: {}", e);
            }
        }));
    }

    fn cancel_reconnect(&self) {
        if let Some(timer) = self.reconnect_timer.lock().take() {
            timer.abort();
        }
    }

    fn ensure_renewal_task(self: &Arc<Self>) {
        let mut slot = self.renewal_task.lock();
        if slot.as_ref().is_some_and(|t| !t.is_finished()) {
            return;
        }

        let weak = Arc::downgrade(self);
        let period = self.credential_check_interval;
        *slot = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                inner.check_credential().await;
            }
        }));
    }

    async fn check_credential(self: Arc<Self>) {
        match self.tokens.renew_if_expiring().await {
            Ok(true) => {
                let open = self.status.borrow().is_open();
                if !open {
                    debug!("Credential renewed while disconnected");
                    return;
                }
                info!("Credential renewed, rotating signaling connection");
                if let Err(e) = ChannelInner::connect(self.clone(), OpenReason::Rotation).await {
                    warn!("Rotation after renewal failed: {}", e);
                }
            }
            Ok(false) => {}
            Err(e) => warn!("Credential renewal check failed: {}", e),
        }
    }

    fn dispatch_text(&self, generation: u64, text: &str) {
        match ServerMessage::from_json(text) {
            Ok(message) => {
                debug!(generation, kind = message.kind(), "Received signaling message");
                self.emit(ChannelEvent::Message {
                    generation,
                    message,
                });
            }
            Err(e) => warn!(generation, "Dropping signaling frame: {}", e),
        }
    }
}

/// Build the connection URI carrying the credential as a query parameter
pub fn connection_uri(base: &str, param: &str, token: &str) -> Result<url::Url> {
    let mut uri = url::Url::parse(base)
        .map_err(|e| Error::InvalidConfig(format!("Invalid signaling URL {}: {}", base, e)))?;
    uri.query_pairs_mut().append_pair(param, token);
    Ok(uri)
}

fn classify_connect_error(e: tungstenite::Error) -> Error {
    match e {
        tungstenite::Error::Http(response)
            if matches!(response.status().as_u16(), 401 | 403) =>
        {
            Error::CredentialRejected(format!("Upgrade refused with HTTP {}", response.status()))
        }
        other => Error::WebSocketError(format!("Failed to connect: {}", other)),
    }
}

async fn writer_task(
    mut write: SplitSink<WsStream, Message>,
    mut outbound: mpsc::UnboundedReceiver<Message>,
    generation: u64,
) {
    while let Some(message) = outbound.recv().await {
        if let Err(e) = write.send(message).await {
            error!(generation, "Failed to send signaling frame: {}", e);
            break;
        }
    }
    let _ = write.close().await;

    debug!(generation, "Signaling writer terminated");
}

async fn reader_task(
    inner: Weak<ChannelInner>,
    mut read: SplitStream<WsStream>,
    generation: u64,
    gate: oneshot::Receiver<()>,
) {
    if gate.await.is_err() {
        return;
    }

    let mut close_code = None;
    while let Some(frame) = read.next().await {
        match frame {
            Ok(Message::Text(text)) => {
                let Some(inner) = inner.upgrade() else {
                    return;
                };
                inner.dispatch_text(generation, &text);
            }
            Ok(Message::Close(frame)) => {
                close_code = Some(frame.map(|f| u16::from(f.code)).unwrap_or(1005));
                break;
            }
            Ok(Message::Binary(_)) => debug!(generation, "Ignoring binary signaling frame"),
            Ok(_) => {}
            Err(e) => {
                warn!(generation, "Signaling socket error: {}", e);
                break;
            }
        }
    }

    debug!(generation, "Signaling reader terminated");
    if let Some(inner) = inner.upgrade() {
        inner
            .handle_closed(generation, close_code.unwrap_or(ABNORMAL_CLOSURE))
            .await;
    }
}
