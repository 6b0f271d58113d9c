//! Room dispatcher
//!
//! [`RoomController`] owns the room session, the peer mesh, local media, the
//! chat transcript and the room directory. Inbound signaling messages and
//! peer callbacks arrive as typed events and are routed here one at a time;
//! every PeerLink is created or destroyed from a room session transition.

use super::directory::RoomDirectory;
use super::room::{Room, RoomSession, RoomStatus};
use crate::channels::chat::ChatRelay;
use crate::config::LiveClientConfig;
use crate::events::LiveEvent;
use crate::media::{CaptureBackend, LocalMediaSession, MediaConstraints, TrackKind};
use crate::peer::{LinkRole, PeerEvent, PeerEventKind, PeerManager, RemoteTrackSink};
use crate::signaling::channel::{ChannelEvent, OpenReason, SignalSink};
use crate::signaling::protocol::{ClientMessage, IceCandidate, RoomInfo, ServerMessage};
use crate::{Error, Result};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Routes signaling and peer events into room state
pub struct RoomController {
    username: String,
    user_id: Option<String>,
    rejoin_on_reconnect: bool,
    sink: Arc<dyn SignalSink>,
    session: RoomSession,
    peers: PeerManager,
    media: LocalMediaSession,
    chat: ChatRelay,
    directory: RoomDirectory,
    track_sink: Arc<dyn RemoteTrackSink>,
    events: broadcast::Sender<LiveEvent>,
    generation: u64,
    deferred: Vec<ServerMessage>,
    renegotiated: HashSet<String>,
    rejoin: Option<(String, MediaConstraints)>,
}

impl RoomController {
    pub fn new(
        config: &LiveClientConfig,
        sink: Arc<dyn SignalSink>,
        peers: PeerManager,
        capture: Arc<dyn CaptureBackend>,
        track_sink: Arc<dyn RemoteTrackSink>,
        events: broadcast::Sender<LiveEvent>,
    ) -> Self {
        Self {
            username: config.username.clone(),
            user_id: config.user_id.clone(),
            rejoin_on_reconnect: config.rejoin_on_reconnect,
            sink,
            session: RoomSession::new(),
            peers,
            media: LocalMediaSession::new(capture),
            chat: ChatRelay::new(),
            directory: RoomDirectory::new(),
            track_sink,
            events,
            generation: 0,
            deferred: Vec::new(),
            renegotiated: HashSet::new(),
            rejoin: None,
        }
    }

    pub fn session(&self) -> &RoomSession {
        &self.session
    }

    pub fn peers(&self) -> &PeerManager {
        &self.peers
    }

    pub fn media(&self) -> &LocalMediaSession {
        &self.media
    }

    pub fn chat(&self) -> &ChatRelay {
        &self.chat
    }

    pub fn directory(&self) -> &RoomDirectory {
        &self.directory
    }

    fn emit(&self, event: LiveEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn emit_room_status(&self) {
        self.emit(LiveEvent::RoomStatusChanged(self.session.status().clone()));
    }

    /// Ask the server for the room list
    pub fn refresh_rooms(&self) -> Result<()> {
        self.directory.request_refresh(self.sink.as_ref())
    }

    /// Fallback directory poll; only runs outside a room
    pub fn poll_directory(&self) {
        if *self.session.status() != RoomStatus::NotInRoom {
            return;
        }
        if let Err(e) = self.refresh_rooms() {
            debug!("Directory poll skipped: {}", e);
        }
    }

    /// Route one event from the signaling channel
    pub async fn handle_channel_event(&mut self, event: ChannelEvent) {
        match event {
            ChannelEvent::Opened { generation, reason } => {
                self.generation = generation;
                if *self.session.status() != RoomStatus::NotInRoom {
                    // The server dropped our membership with the old socket
                    if reason == OpenReason::Rotation {
                        self.rotate_session().await;
                    } else {
                        self.remember_for_rejoin();
                        self.teardown_local("signaling connection replaced").await;
                    }
                }
                self.poll_directory();

                if let Some((room_id, constraints)) = self.rejoin.take() {
                    info!(room_id = %room_id, "Rejoining room after reconnect");
                    if let Err(e) = self.join(&room_id, constraints).await {
                        warn!(room_id = %room_id, "Rejoin failed: {}", e);
                    }
                }
            }
            ChannelEvent::Message {
                generation,
                message,
            } => {
                if generation != self.generation {
                    debug!(
                        generation,
                        current = self.generation,
                        kind = message.kind(),
                        "Dropping message from superseded connection"
                    );
                    return;
                }
                self.handle_server_message(message).await;
            }
            ChannelEvent::Closed { generation, .. } => {
                if generation != self.generation {
                    return;
                }
                if *self.session.status() != RoomStatus::NotInRoom {
                    self.remember_for_rejoin();
                    self.teardown_local("signaling connection lost").await;
                }
            }
        }
    }

    /// Re-enter the room on a rotated socket, keeping local capture live
    async fn rotate_session(&mut self) {
        let Some(room_id) = self.session.room_id().map(str::to_string) else {
            return;
        };
        info!(room_id = %room_id, "Credential rotation, rebuilding peer links");
        self.rejoin = Some((room_id, self.session.constraints()));
        self.release_links().await;
        self.session.reset();
        self.emit_room_status();
    }

    fn remember_for_rejoin(&mut self) {
        if !self.rejoin_on_reconnect {
            return;
        }
        if let Some(room_id) = self.session.room_id() {
            self.rejoin = Some((room_id.to_string(), self.session.constraints()));
        }
    }

    /// Route one inbound signaling message
    pub async fn handle_server_message(&mut self, message: ServerMessage) {
        match message {
            ServerMessage::AvailableRooms { rooms, room_info } => {
                let rooms = self.directory.apply(rooms, room_info);
                self.emit(LiveEvent::RoomsUpdated(rooms));
            }
            ServerMessage::RoomJoined {
                room_id,
                existing_participants,
                room_info,
            } => {
                self.on_room_joined(room_id, existing_participants, room_info)
                    .await
            }
            ServerMessage::NewPeer { peer } => self.on_new_peer(&peer).await,
            ServerMessage::PeerLeft { peer } if self.session.is_joining() => {
                self.forget_deferred(&peer)
            }
            ServerMessage::PeerLeft { peer } => self.on_peer_left(&peer).await,
            message @ (ServerMessage::Offer { .. } | ServerMessage::IceCandidate { .. })
                if self.session.is_joining() =>
            {
                debug!(kind = message.kind(), "Deferring peer message until joined");
                self.deferred.push(message);
            }
            ServerMessage::Offer { sender, sdp, .. } => self.on_offer(&sender, sdp).await,
            ServerMessage::Answer { sender, sdp, .. } => self.on_answer(&sender, sdp).await,
            ServerMessage::IceCandidate { sender, candidate } => {
                self.on_remote_candidate(&sender, candidate).await
            }
            ServerMessage::Chat { username, message } => {
                if let Some(line) = self.chat.receive(username, message) {
                    let line = line.clone();
                    self.emit(LiveEvent::ChatReceived(line));
                }
            }
            ServerMessage::Error { message } => {
                warn!(%message, "Signaling server reported an error");
                if self.session.is_joining() {
                    self.session.reset();
                    self.deferred.clear();
                    self.media.stop();
                    self.emit_room_status();
                }
                self.emit(LiveEvent::ServerError { message });
            }
        }
    }

    /// Join `room_id`, leaving the current room first if needed
    pub async fn join(&mut self, room_id: &str, constraints: MediaConstraints) -> Result<()> {
        match self.session.status() {
            RoomStatus::InRoom { room_id: current } if current != room_id => {
                info!(from = %current, to = room_id, "Leaving current room before joining");
                self.leave().await?;
            }
            _ => {}
        }

        self.session.begin_join(room_id, constraints)?;
        self.rejoin = None;

        let is_artist_room = self
            .directory
            .find(room_id)
            .unwrap_or_else(|| Room::new(room_id, None))
            .is_artist_room();

        let request = ClientMessage::JoinRoom {
            room_id: room_id.to_string(),
            username: self.username.clone(),
            is_artist_room,
        };
        if let Err(e) = self.sink.send(request) {
            self.session.reset();
            self.media.stop();
            return Err(e);
        }

        info!(room_id, is_artist_room, "Joining room");
        self.emit_room_status();
        Ok(())
    }

    /// Join the broadcaster's canonical room with camera and microphone
    pub async fn go_live(&mut self) -> Result<()> {
        let user_id = self
            .user_id
            .clone()
            .ok_or_else(|| Error::InvalidConfig("user_id is required to go live".to_string()))?;
        self.join(&Room::artist_room_id(&user_id), MediaConstraints::AUDIO_VIDEO)
            .await
    }

    /// Full leave sequence, ending in a directory refresh
    pub async fn leave(&mut self) -> Result<()> {
        let room_id = self.session.begin_leave()?;
        info!(room_id = %room_id, "Leaving room");
        self.emit_room_status();

        self.release_room().await;
        if let Err(e) = self.sink.send(ClientMessage::LeaveRoom {
            room_id: room_id.clone(),
        }) {
            debug!("Leave notification not sent: {}", e);
        }

        self.session.finish_leave()?;
        self.emit_room_status();

        if let Err(e) = self.refresh_rooms() {
            debug!("Directory refresh after leave skipped: {}", e);
        }
        Ok(())
    }

    /// Drop the room locally after the transport went away
    async fn teardown_local(&mut self, reason: &str) {
        warn!(room_id = self.session.room_id().unwrap_or(""), reason, "Tearing down room session");
        self.release_room().await;
        self.session.reset();
        self.emit_room_status();
    }

    async fn release_room(&mut self) {
        self.media.stop();
        self.release_links().await;
    }

    async fn release_links(&mut self) {
        for peer_id in self.peers.peer_ids() {
            self.track_sink.on_remote_track_removed(&peer_id);
        }
        self.peers.clear().await;
        self.chat.close();
        self.deferred.clear();
        self.renegotiated.clear();
    }

    /// Shut down whatever room is active
    pub async fn shutdown(&mut self) {
        match self.session.status() {
            RoomStatus::InRoom { .. } | RoomStatus::Joining { .. } => {
                if let Err(e) = self.leave().await {
                    warn!("Leave during shutdown failed: {}", e);
                }
            }
            RoomStatus::Leaving { .. } => self.teardown_local("shutdown").await,
            RoomStatus::NotInRoom => {}
        }
        self.rejoin = None;
    }

    async fn on_room_joined(
        &mut self,
        room_id: String,
        existing_participants: u32,
        room_info: Option<RoomInfo>,
    ) {
        if let Err(e) = self
            .session
            .confirm_joined(&room_id, existing_participants, room_info)
        {
            warn!("Ignoring room_joined: {}", e);
            return;
        }
        info!(room_id = %room_id, existing_participants, "Joined room");
        self.chat.open(&room_id);
        self.emit_room_status();

        // Capture survives a credential rotation
        let media = if self.media.is_active() {
            Ok(())
        } else {
            self.media.start(self.session.constraints()).await
        };
        if let Err(e) = media {
            error!(room_id = %room_id, "Local media failed to start: {}", e);
            self.emit(LiveEvent::MediaError {
                message: e.to_string(),
            });
            if let Err(e) = self.leave().await {
                warn!("Leave after media failure failed: {}", e);
            }
            return;
        }

        // Tracks are live before any link exists, so every link attaches them
        let deferred = std::mem::take(&mut self.deferred);
        for message in deferred {
            match message {
                ServerMessage::Offer { sender, sdp, .. } => self.on_offer(&sender, sdp).await,
                ServerMessage::IceCandidate { sender, candidate } => {
                    self.on_remote_candidate(&sender, candidate).await
                }
                other => debug!(kind = other.kind(), "Skipping deferred message"),
            }
        }
    }

    async fn on_new_peer(&mut self, peer_id: &str) {
        let Some(room_id) = self.current_room() else {
            debug!(peer_id, "Ignoring new_peer outside a room");
            return;
        };

        if self.peers.contains(peer_id) {
            info!(peer_id, "Participant re-announced, replacing link");
            self.peers.remove(peer_id).await;
        }
        if self.session.add_participant(peer_id) {
            self.emit(LiveEvent::participant_joined(&room_id, peer_id));
        }

        self.renegotiated.remove(peer_id);
        self.start_offer(peer_id, &room_id).await;
    }

    /// Create an INITIATOR link and send its offer, retrying once
    async fn start_offer(&mut self, peer_id: &str, room_id: &str) {
        loop {
            let tracks = self.media.tracks();
            let attempt = match self.peers.open(peer_id, LinkRole::Initiator, &tracks).await {
                Ok(link) => link.create_offer().await,
                Err(e) => Err(e),
            };

            let failure = match attempt {
                Ok(sdp) => match self.sink.send(ClientMessage::Offer {
                    target: peer_id.to_string(),
                    sdp,
                    room_id: room_id.to_string(),
                }) {
                    Ok(()) => {
                        debug!(peer_id, "Offer sent");
                        return;
                    }
                    Err(e) => e,
                },
                Err(e) => e,
            };

            warn!(peer_id, "Offer negotiation failed: {}", failure);
            self.peers.remove(peer_id).await;

            if failure.is_peer_error() && self.renegotiated.insert(peer_id.to_string()) {
                info!(peer_id, "Retrying negotiation with a fresh link");
                continue;
            }

            self.drop_participant(peer_id).await;
            return;
        }
    }

    async fn on_offer(&mut self, sender: &str, sdp: String) {
        let Some(room_id) = self.current_room() else {
            warn!(peer_id = sender, "Dropping offer received outside a room");
            return;
        };

        if self.peers.contains(sender) {
            info!(peer_id = sender, "New offer from connected peer, replacing link");
            self.peers.remove(sender).await;
        }
        if self.session.add_participant(sender) {
            self.emit(LiveEvent::participant_joined(&room_id, sender));
        }

        let tracks = self.media.tracks();
        let answer = match self.peers.open(sender, LinkRole::Responder, &tracks).await {
            Ok(link) => link.accept_offer(sdp).await,
            Err(e) => Err(e),
        };

        let result = answer.and_then(|sdp| {
            self.sink.send(ClientMessage::Answer {
                target: sender.to_string(),
                sdp,
                room_id: room_id.clone(),
            })
        });

        match result {
            Ok(()) => debug!(peer_id = sender, "Answer sent"),
            Err(e) => {
                warn!(peer_id = sender, "Failed to answer offer: {}", e);
                self.drop_participant(sender).await;
            }
        }
    }

    async fn on_answer(&mut self, sender: &str, sdp: String) {
        let Some(room_id) = self.current_room() else {
            return;
        };
        let link = match self.peers.link_mut(sender) {
            Ok(link) => link,
            Err(e) => {
                warn!("Dropping answer: {}", e);
                return;
            }
        };

        if let Err(e) = link.apply_answer(sdp).await {
            warn!(peer_id = sender, "Failed to apply answer: {}", e);
            if link.has_remote_description() {
                return;
            }
            self.peers.remove(sender).await;
            if self.renegotiated.insert(sender.to_string()) {
                self.start_offer(sender, &room_id).await;
            } else {
                self.drop_participant(sender).await;
            }
        }
    }

    async fn on_remote_candidate(&mut self, sender: &str, candidate: IceCandidate) {
        let result = match self.peers.link_mut(sender) {
            Ok(link) => link.add_remote_candidate(candidate).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => {}
            Err(e @ Error::PeerNotFound(_)) => debug!("Dropping candidate: {}", e),
            Err(e) => warn!(peer_id = sender, "Failed to apply remote candidate: {}", e),
        }
    }

    /// Discard queued offers and candidates from a peer that left mid-join
    fn forget_deferred(&mut self, peer_id: &str) {
        let before = self.deferred.len();
        self.deferred.retain(|message| message.sender() != Some(peer_id));
        let dropped = before - self.deferred.len();
        if dropped > 0 {
            debug!(peer_id, dropped, "Peer left before join completed");
        }
    }

    async fn on_peer_left(&mut self, peer_id: &str) {
        let Some(room_id) = self.current_room() else {
            return;
        };
        let had_link = self.peers.remove(peer_id).await;
        let was_member = self.session.remove_participant(peer_id);
        self.renegotiated.remove(peer_id);

        if had_link {
            self.track_sink.on_remote_track_removed(peer_id);
        }
        if was_member {
            info!(peer_id, "Participant left");
            self.emit(LiveEvent::participant_left(room_id, peer_id));
        }
    }

    /// Remove a peer from both the mesh and the roster
    async fn drop_participant(&mut self, peer_id: &str) {
        if self.peers.remove(peer_id).await {
            self.track_sink.on_remote_track_removed(peer_id);
        }
        if self.session.remove_participant(peer_id) {
            if let Some(room_id) = self.current_room() {
                self.emit(LiveEvent::participant_left(room_id, peer_id));
            }
        }
    }

    fn current_room(&self) -> Option<String> {
        match self.session.status() {
            RoomStatus::InRoom { room_id } => Some(room_id.clone()),
            _ => None,
        }
    }

    /// Route one peer connection callback
    pub async fn handle_peer_event(&mut self, event: PeerEvent) {
        let PeerEvent {
            peer_id,
            link_id,
            kind,
        } = event;

        if !self.peers.is_current(&peer_id, link_id) {
            debug!(peer_id = %peer_id, link_id, "Dropping event from replaced peer link");
            return;
        }

        match kind {
            PeerEventKind::LocalCandidate(candidate) => {
                if let Err(e) = self.sink.send(ClientMessage::IceCandidate {
                    target: peer_id.clone(),
                    candidate,
                }) {
                    debug!(peer_id = %peer_id, "Local candidate not sent: {}", e);
                }
            }
            PeerEventKind::StateChanged(state) => {
                let Some(link) = self.peers.get_mut(&peer_id) else {
                    return;
                };
                let next = link.observe_state(state);
                if next.is_terminal() {
                    warn!(peer_id = %peer_id, ?state, "Peer connection ended, tearing down link");
                    self.drop_participant(&peer_id).await;
                } else {
                    debug!(peer_id = %peer_id, ?state, "Peer connection state");
                }
            }
            PeerEventKind::RemoteTrack(track) => {
                let Some(link) = self.peers.get_mut(&peer_id) else {
                    return;
                };
                let kind = TrackKind::from(track.kind());
                link.add_remote_track(Arc::clone(&track));
                info!(peer_id = %peer_id, kind = kind.as_str(), "Remote track received");
                self.track_sink.on_remote_track(&peer_id, kind, track);
                self.emit(LiveEvent::RemoteTrackAdded { peer_id, kind });
            }
        }
    }

    /// Send a chat line to the current room
    pub fn send_chat(&self, text: &str) -> Result<()> {
        self.chat.send(self.sink.as_ref(), text)
    }

    pub fn toggle_video(&self) -> Result<bool> {
        self.media.toggle_video()
    }

    pub fn toggle_audio(&self) -> Result<bool> {
        self.media.toggle_audio()
    }

    /// Swap the screen in for the camera on every link
    ///
    /// Returns the number of links now sending the screen.
    pub async fn start_screen_share(&mut self) -> Result<usize> {
        if !self.session.is_in_room() {
            return Err(Error::InvalidState("Not in a room".to_string()));
        }
        let screen = self.media.start_screen_share().await?;
        Ok(self.peers.replace_video_track_all(&screen).await)
    }

    /// Restore the camera on every link
    pub async fn stop_screen_share(&mut self) -> Result<usize> {
        let camera = self.media.stop_screen_share()?;
        Ok(self.peers.replace_video_track_all(&camera).await)
    }
}
