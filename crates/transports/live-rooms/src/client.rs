//! Live-room client handle
//!
//! [`LiveClient::start`] wires the signaling channel, the peer mesh, local
//! media and the room dispatcher together and runs them on a single task.
//! The handle is cheap to clone; every call is forwarded to that task as a
//! command with a reply channel.

use crate::config::LiveClientConfig;
use crate::events::LiveEvent;
use crate::media::{CaptureBackend, MediaConstraints};
use crate::peer::{PeerEvent, PeerManager, RemoteTrackSink};
use crate::session::{Room, RoomController};
use crate::signaling::channel::{ChannelEvent, ConnectionStatus, SignalingChannel};
use crate::signaling::token::{CredentialRequest, CredentialSource, TokenManager};
use crate::{Error, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Capacity of the room event broadcast
const EVENT_CAPACITY: usize = 256;

type Reply<T> = oneshot::Sender<Result<T>>;

enum Command {
    RefreshRooms(Reply<()>),
    JoinRoom {
        room_id: String,
        constraints: MediaConstraints,
        reply: Reply<()>,
    },
    GoLive(Reply<()>),
    LeaveRoom(Reply<()>),
    SendChat {
        text: String,
        reply: Reply<()>,
    },
    ToggleVideo(Reply<bool>),
    ToggleAudio(Reply<bool>),
    StartScreenShare(Reply<usize>),
    StopScreenShare(Reply<usize>),
    Shutdown(oneshot::Sender<()>),
}

/// Handle to a running live-room client
#[derive(Clone)]
pub struct LiveClient {
    commands: mpsc::UnboundedSender<Command>,
    events: broadcast::Sender<LiveEvent>,
    rooms: watch::Receiver<Vec<Room>>,
    status: watch::Receiver<ConnectionStatus>,
    task: Arc<parking_lot::Mutex<Option<JoinHandle<()>>>>,
}

impl LiveClient {
    /// Validate `config`, start the dispatcher and open the signaling socket
    ///
    /// A failed first connection attempt is logged; the channel keeps
    /// retrying on its own.
    ///
    /// # Errors
    ///
    /// Returns error if the configuration is invalid or the WebRTC stack
    /// cannot be initialized.
    pub async fn start(
        config: LiveClientConfig,
        credentials: Arc<dyn CredentialSource>,
        capture: Arc<dyn CaptureBackend>,
        track_sink: Arc<dyn RemoteTrackSink>,
    ) -> Result<Self> {
        config.validate()?;

        let tokens = Arc::new(TokenManager::new(
            credentials,
            CredentialRequest {
                role: config.role,
                channel_name: config.channel_name.clone(),
            },
            config.credential_renewal_floor(),
        ));
        let (channel, channel_events) = SignalingChannel::new(&config, tokens);
        let (peers, peer_events) = PeerManager::new(&config)?;
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        let controller = RoomController::new(
            &config,
            Arc::new(channel.clone()),
            peers,
            capture,
            track_sink,
            events.clone(),
        );
        let rooms = controller.directory().subscribe();
        let status = channel.subscribe_status();

        let (commands, command_rx) = mpsc::unbounded_channel();
        let actor = Dispatcher {
            controller,
            channel: channel.clone(),
            events: events.clone(),
            commands: command_rx,
            channel_events,
            peer_events,
            status: channel.subscribe_status(),
            poll_interval: config.directory_poll_interval(),
        };
        let task = tokio::spawn(actor.run());

        info!(url = %config.signaling_url, username = %config.username, "Live client started");
        if let Err(e) = channel.connect().await {
            warn!("Initial signaling connection failed: {}", e);
        }

        Ok(Self {
            commands,
            events,
            rooms,
            status,
            task: Arc::new(parking_lot::Mutex::new(Some(task))),
        })
    }

    async fn request<T>(&self, build: impl FnOnce(Reply<T>) -> Command) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(build(reply))
            .map_err(|_| Error::ClientStopped)?;
        response.await.map_err(|_| Error::ClientStopped)?
    }

    /// Ask the server for the room list
    pub async fn refresh_rooms(&self) -> Result<()> {
        self.request(Command::RefreshRooms).await
    }

    /// Join a room, leaving the current one first
    pub async fn join_room(
        &self,
        room_id: impl Into<String>,
        constraints: MediaConstraints,
    ) -> Result<()> {
        let room_id = room_id.into();
        self.request(|reply| Command::JoinRoom {
            room_id,
            constraints,
            reply,
        })
        .await
    }

    /// Broadcast from this client's canonical room
    pub async fn go_live(&self) -> Result<()> {
        self.request(Command::GoLive).await
    }

    pub async fn leave_room(&self) -> Result<()> {
        self.request(Command::LeaveRoom).await
    }

    pub async fn send_chat(&self, text: impl Into<String>) -> Result<()> {
        let text = text.into();
        self.request(|reply| Command::SendChat { text, reply }).await
    }

    /// Flip the outgoing video; returns whether it is now enabled
    pub async fn toggle_video(&self) -> Result<bool> {
        self.request(Command::ToggleVideo).await
    }

    /// Flip the outgoing audio; returns whether it is now enabled
    pub async fn toggle_audio(&self) -> Result<bool> {
        self.request(Command::ToggleAudio).await
    }

    /// Send the screen instead of the camera on every link
    pub async fn start_screen_share(&self) -> Result<usize> {
        self.request(Command::StartScreenShare).await
    }

    pub async fn stop_screen_share(&self) -> Result<usize> {
        self.request(Command::StopScreenShare).await
    }

    /// Latest room list
    pub fn rooms(&self) -> Vec<Room> {
        self.rooms.borrow().clone()
    }

    pub fn subscribe_rooms(&self) -> watch::Receiver<Vec<Room>> {
        self.rooms.clone()
    }

    /// Subscribe to room activity
    pub fn events(&self) -> broadcast::Receiver<LiveEvent> {
        self.events.subscribe()
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.status.borrow()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.clone()
    }

    /// Leave any room, close the socket and stop the dispatcher
    pub async fn shutdown(&self) {
        let (reply, done) = oneshot::channel();
        if self.commands.send(Command::Shutdown(reply)).is_ok() {
            let _ = done.await;
        }

        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!("Live client task ended abnormally: {}", e);
            }
        }
    }
}

/// Single task that owns all room state
struct Dispatcher {
    controller: RoomController,
    channel: SignalingChannel,
    events: broadcast::Sender<LiveEvent>,
    commands: mpsc::UnboundedReceiver<Command>,
    channel_events: mpsc::UnboundedReceiver<ChannelEvent>,
    peer_events: mpsc::UnboundedReceiver<PeerEvent>,
    status: watch::Receiver<ConnectionStatus>,
    poll_interval: Duration,
}

impl Dispatcher {
    async fn run(mut self) {
        debug!("Live client dispatcher started");

        let mut poll = interval_at(Instant::now() + self.poll_interval, self.poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                command = self.commands.recv() => {
                    match command {
                        Some(Command::Shutdown(reply)) => {
                            self.stop().await;
                            let _ = reply.send(());
                            break;
                        }
                        Some(command) => self.handle_command(command).await,
                        None => {
                            // Every handle was dropped
                            self.stop().await;
                            break;
                        }
                    }
                }

                Some(event) = self.channel_events.recv() => {
                    self.controller.handle_channel_event(event).await;
                }

                Some(event) = self.peer_events.recv() => {
                    self.controller.handle_peer_event(event).await;
                }

                Ok(()) = self.status.changed() => {
                    let status = *self.status.borrow_and_update();
                    let _ = self.events.send(LiveEvent::StatusChanged(status));
                }

                _ = poll.tick() => {
                    if self.channel.status().is_open() {
                        self.controller.poll_directory();
                    }
                }
            }
        }

        debug!("Live client dispatcher stopped");
    }

    async fn handle_command(&mut self, command: Command) {
        let controller = &mut self.controller;
        match command {
            Command::RefreshRooms(reply) => {
                let _ = reply.send(controller.refresh_rooms());
            }
            Command::JoinRoom {
                room_id,
                constraints,
                reply,
            } => {
                let _ = reply.send(controller.join(&room_id, constraints).await);
            }
            Command::GoLive(reply) => {
                let _ = reply.send(controller.go_live().await);
            }
            Command::LeaveRoom(reply) => {
                let _ = reply.send(controller.leave().await);
            }
            Command::SendChat { text, reply } => {
                let _ = reply.send(controller.send_chat(&text));
            }
            Command::ToggleVideo(reply) => {
                let _ = reply.send(controller.toggle_video());
            }
            Command::ToggleAudio(reply) => {
                let _ = reply.send(controller.toggle_audio());
            }
            Command::StartScreenShare(reply) => {
                let _ = reply.send(controller.start_screen_share().await);
            }
            Command::StopScreenShare(reply) => {
                let _ = reply.send(controller.stop_screen_share().await);
            }
            Command::Shutdown(reply) => {
                let _ = reply.send(());
            }
        }
    }

    async fn stop(&mut self) {
        info!("Live client shutting down");
        self.controller.shutdown().await;
        self.channel.close().await;
    }
}
