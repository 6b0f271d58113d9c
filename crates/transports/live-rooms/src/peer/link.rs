//! One WebRTC connection to one remote participant
//!
//! A [`PeerLink`] is owned by the room's dispatcher and only ever mutated
//! there. The webrtc callbacks registered on its connection never touch the
//! link: they post [`PeerEvent`]s tagged with the link's `link_id`, so the
//! dispatcher can discard events from a link that has since been replaced.

use crate::media::{LocalTrack, TrackKind};
use crate::signaling::protocol::{IceCandidate, PeerId};
use crate::{Error, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};
use webrtc::api::API;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::track::track_remote::TrackRemote;

/// Which side creates the offer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkRole {
    /// This client sends the offer (the remote peer joined after us)
    Initiator,
    /// The remote peer sent the offer
    Responder,
}

/// PeerLink lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    New,
    Negotiating,
    Connected,
    Failed,
    Closed,
}

impl LinkState {
    /// Whether the link should be torn down
    pub fn is_terminal(&self) -> bool {
        matches!(self, LinkState::Failed | LinkState::Closed)
    }
}

/// What a connection callback observed
#[derive(Clone)]
pub enum PeerEventKind {
    /// Locally gathered candidate to trickle to the remote peer
    LocalCandidate(IceCandidate),
    /// Underlying transport state changed
    StateChanged(RTCPeerConnectionState),
    /// Remote media arrived
    RemoteTrack(Arc<TrackRemote>),
}

impl std::fmt::Debug for PeerEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PeerEventKind::LocalCandidate(c) => f.debug_tuple("LocalCandidate").field(c).finish(),
            PeerEventKind::StateChanged(s) => f.debug_tuple("StateChanged").field(s).finish(),
            PeerEventKind::RemoteTrack(t) => f.debug_tuple("RemoteTrack").field(&t.id()).finish(),
        }
    }
}

/// Event posted from a connection callback to the dispatcher
#[derive(Debug, Clone)]
pub struct PeerEvent {
    pub peer_id: PeerId,
    pub link_id: u64,
    pub kind: PeerEventKind,
}

/// Playback boundary for remote media
///
/// Attaching a remote track to a rendering surface is the host's concern;
/// the room only reports arrival and removal.
pub trait RemoteTrackSink: Send + Sync {
    /// A remote track arrived for `peer_id`
    fn on_remote_track(&self, peer_id: &str, kind: TrackKind, track: Arc<TrackRemote>);

    /// Every track from `peer_id` is gone
    fn on_remote_track_removed(&self, peer_id: &str);
}

/// Sink that discards remote tracks
pub struct NullTrackSink;

impl RemoteTrackSink for NullTrackSink {
    fn on_remote_track(&self, _peer_id: &str, _kind: TrackKind, _track: Arc<TrackRemote>) {}

    fn on_remote_track_removed(&self, _peer_id: &str) {}
}

/// Map a transport state onto the link lifecycle
///
/// Returns `None` for states that do not move the link.
pub fn map_connection_state(state: RTCPeerConnectionState) -> Option<LinkState> {
    match state {
        RTCPeerConnectionState::Connected => Some(LinkState::Connected),
        RTCPeerConnectionState::Failed => Some(LinkState::Failed),
        RTCPeerConnectionState::Disconnected | RTCPeerConnectionState::Closed => {
            Some(LinkState::Closed)
        }
        _ => None,
    }
}

/// A single peer connection plus its negotiation bookkeeping
pub struct PeerLink {
    peer_id: PeerId,
    link_id: u64,
    role: LinkRole,
    state: LinkState,
    connection: Arc<RTCPeerConnection>,
    senders: HashMap<TrackKind, Arc<RTCRtpSender>>,
    remote_tracks: Vec<Arc<TrackRemote>>,
    pending_candidates: Vec<RTCIceCandidateInit>,
    local_description_set: bool,
    remote_description_set: bool,
    applied_candidates: usize,
}

impl PeerLink {
    /// Build the connection, register callbacks and attach `tracks`
    #[instrument(skip(api, ice_servers, events, tracks), fields(peer_id = %peer_id))]
    pub async fn new(
        peer_id: PeerId,
        link_id: u64,
        role: LinkRole,
        api: &API,
        ice_servers: Vec<RTCIceServer>,
        events: mpsc::UnboundedSender<PeerEvent>,
        tracks: &[LocalTrack],
    ) -> Result<Self> {
        info!(?role, "Creating peer link");

        let rtc_config = RTCConfiguration {
            ice_servers,
            ..Default::default()
        };
        let connection = Arc::new(api.new_peer_connection(rtc_config).await.map_err(|e| {
            Error::PeerConnectionError(format!("Failed to create peer connection: {}", e))
        })?);

        register_callbacks(&connection, &peer_id, link_id, events);

        let mut link = Self {
            peer_id,
            link_id,
            role,
            state: LinkState::New,
            connection,
            senders: HashMap::new(),
            remote_tracks: Vec::new(),
            pending_candidates: Vec::new(),
            local_description_set: false,
            remote_description_set: false,
            applied_candidates: 0,
        };

        for track in tracks {
            if let Err(e) = link.attach_track(track).await {
                link.close().await;
                return Err(e);
            }
        }

        Ok(link)
    }

    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    pub fn link_id(&self) -> u64 {
        self.link_id
    }

    pub fn role(&self) -> LinkRole {
        self.role
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn remote_tracks(&self) -> &[Arc<TrackRemote>] {
        &self.remote_tracks
    }

    /// Remote candidates waiting for both descriptions
    pub fn pending_candidate_count(&self) -> usize {
        self.pending_candidates.len()
    }

    /// Remote candidates handed to the ICE agent so far
    pub fn applied_candidates(&self) -> usize {
        self.applied_candidates
    }

    pub fn has_remote_description(&self) -> bool {
        self.remote_description_set
    }

    /// Outgoing track currently bound for `kind`, if any
    pub async fn sending_track_id(&self, kind: TrackKind) -> Option<String> {
        let sender = self.senders.get(&kind)?;
        sender.track().await.map(|t| t.id().to_string())
    }

    async fn attach_track(&mut self, track: &LocalTrack) -> Result<()> {
        let sender = self
            .connection
            .add_track(track.rtc_track())
            .await
            .map_err(|e| Error::MediaTrackError(format!("Failed to add track: {}", e)))?;

        // Drain RTCP so interceptors keep running
        let rtcp_sender = Arc::clone(&sender);
        tokio::spawn(async move {
            let mut buf = vec![0u8; 1500];
            while rtcp_sender.read(&mut buf).await.is_ok() {}
        });

        debug!(peer_id = %self.peer_id, kind = track.kind().as_str(), "Local track attached");
        self.senders.insert(track.kind(), sender);
        Ok(())
    }

    /// Create an offer, set it locally and return its SDP
    pub async fn create_offer(&mut self) -> Result<String> {
        let offer = self
            .connection
            .create_offer(None)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to create offer: {}", e)))?;

        self.connection
            .set_local_description(offer)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to set local description: {}", e)))?;
        self.local_description_set = true;
        self.state = LinkState::Negotiating;

        let sdp = self.local_sdp().await?;
        debug!(peer_id = %self.peer_id, "Created SDP offer");
        Ok(sdp)
    }

    /// Apply a remote offer and return the answer SDP
    pub async fn accept_offer(&mut self, offer_sdp: String) -> Result<String> {
        let offer = RTCSessionDescription::offer(offer_sdp)
            .map_err(|e| Error::SdpError(format!("Failed to parse offer: {}", e)))?;

        self.connection
            .set_remote_description(offer)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to set remote description: {}", e)))?;
        self.remote_description_set = true;
        self.state = LinkState::Negotiating;

        let answer = self
            .connection
            .create_answer(None)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to create answer: {}", e)))?;

        self.connection
            .set_local_description(answer)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to set local description: {}", e)))?;
        self.local_description_set = true;

        let sdp = self.local_sdp().await?;
        debug!(peer_id = %self.peer_id, "Created SDP answer");

        self.flush_pending_candidates().await;
        Ok(sdp)
    }

    /// Apply the remote answer to our offer
    pub async fn apply_answer(&mut self, answer_sdp: String) -> Result<()> {
        if self.role != LinkRole::Initiator || !self.local_description_set {
            return Err(Error::SdpError(format!(
                "Unexpected answer from {}",
                self.peer_id
            )));
        }
        if self.remote_description_set {
            return Err(Error::SdpError(format!(
                "Duplicate answer from {}",
                self.peer_id
            )));
        }

        let answer = RTCSessionDescription::answer(answer_sdp)
            .map_err(|e| Error::SdpError(format!("Failed to parse answer: {}", e)))?;

        self.connection
            .set_remote_description(answer)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to set remote description: {}", e)))?;
        self.remote_description_set = true;
        debug!(peer_id = %self.peer_id, "Remote answer applied");

        self.flush_pending_candidates().await;
        Ok(())
    }

    /// Apply a remote candidate, queueing it until both descriptions are set
    pub async fn add_remote_candidate(&mut self, candidate: IceCandidate) -> Result<()> {
        let init = RTCIceCandidateInit::from(candidate);
        if !(self.remote_description_set && self.local_description_set) {
            debug!(
                peer_id = %self.peer_id,
                queued = self.pending_candidates.len() + 1,
                "Queueing early ICE candidate"
            );
            self.pending_candidates.push(init);
            return Ok(());
        }

        self.apply_candidate(init).await
    }

    async fn apply_candidate(&mut self, init: RTCIceCandidateInit) -> Result<()> {
        self.connection
            .add_ice_candidate(init)
            .await
            .map_err(|e| Error::IceCandidateError(format!("Failed to add ICE candidate: {}", e)))?;
        self.applied_candidates += 1;
        Ok(())
    }

    async fn flush_pending_candidates(&mut self) {
        if self.pending_candidates.is_empty() {
            return;
        }

        let pending = std::mem::take(&mut self.pending_candidates);
        debug!(peer_id = %self.peer_id, count = pending.len(), "Flushing queued ICE candidates");
        for init in pending {
            if let Err(e) = self.apply_candidate(init).await {
                warn!(peer_id = %self.peer_id, "Dropping queued candidate: {}", e);
            }
        }
    }

    /// Record a transport state change, returning the resulting link state
    pub fn observe_state(&mut self, state: RTCPeerConnectionState) -> LinkState {
        if let Some(next) = map_connection_state(state) {
            if next != self.state && !self.state.is_terminal() {
                debug!(peer_id = %self.peer_id, from = ?self.state, to = ?next, "Peer link state transition");
                self.state = next;
            }
        }
        self.state
    }

    pub fn add_remote_track(&mut self, track: Arc<TrackRemote>) {
        self.remote_tracks.push(track);
    }

    /// Swap the outgoing video track in place, without renegotiating
    ///
    /// Returns `false` when this link carries no video sender.
    pub async fn replace_video_track(&self, track: &LocalTrack) -> Result<bool> {
        let Some(sender) = self.senders.get(&TrackKind::Video) else {
            return Ok(false);
        };

        sender
            .replace_track(Some(track.rtc_track()))
            .await
            .map_err(|e| Error::MediaTrackError(format!("Failed to replace track: {}", e)))?;
        debug!(peer_id = %self.peer_id, track_id = track.id(), "Outgoing video track replaced");
        Ok(true)
    }

    /// Close the connection and release its resources
    pub async fn close(&mut self) {
        if let Err(e) = self.connection.close().await {
            warn!(peer_id = %self.peer_id, "Error closing peer connection: {}", e);
        }
        self.senders.clear();
        self.remote_tracks.clear();
        self.pending_candidates.clear();
        if self.state != LinkState::Failed {
            self.state = LinkState::Closed;
        }
        info!(peer_id = %self.peer_id, link_id = self.link_id, "Peer link closed");
    }

    async fn local_sdp(&self) -> Result<String> {
        self.connection
            .local_description()
            .await
            .map(|desc| desc.sdp)
            .ok_or_else(|| Error::SdpError("No local description after setting it".to_string()))
    }
}

fn register_callbacks(
    connection: &RTCPeerConnection,
    peer_id: &str,
    link_id: u64,
    events: mpsc::UnboundedSender<PeerEvent>,
) {
    let ice_events = events.clone();
    let ice_peer = peer_id.to_string();
    connection.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
        let events = ice_events.clone();
        let peer_id = ice_peer.clone();
        Box::pin(async move {
            let Some(candidate) = candidate else {
                return;
            };
            match candidate.to_json() {
                Ok(init) => {
                    let _ = events.send(PeerEvent {
                        peer_id,
                        link_id,
                        kind: PeerEventKind::LocalCandidate(init.into()),
                    });
                }
                Err(e) => warn!(peer_id = %peer_id, "Failed to serialize ICE candidate: {}", e),
            }
        })
    }));

    let state_events = events.clone();
    let state_peer = peer_id.to_string();
    connection.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
        let _ = state_events.send(PeerEvent {
            peer_id: state_peer.clone(),
            link_id,
            kind: PeerEventKind::StateChanged(state),
        });
        Box::pin(async {})
    }));

    let track_peer = peer_id.to_string();
    connection.on_track(Box::new(
        move |track: Arc<TrackRemote>,
              _receiver: Arc<RTCRtpReceiver>,
              _transceiver: Arc<RTCRtpTransceiver>| {
            let _ = events.send(PeerEvent {
                peer_id: track_peer.clone(),
                link_id,
                kind: PeerEventKind::RemoteTrack(track),
            });
            Box::pin(async {})
        },
    ));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_mapping() {
        assert_eq!(
            map_connection_state(RTCPeerConnectionState::Connected),
            Some(LinkState::Connected)
        );
        assert_eq!(
            map_connection_state(RTCPeerConnectionState::Failed),
            Some(LinkState::Failed)
        );
        assert_eq!(
            map_connection_state(RTCPeerConnectionState::Disconnected),
            Some(LinkState::Closed)
        );
        assert_eq!(map_connection_state(RTCPeerConnectionState::Connecting), None);
        assert!(LinkState::Failed.is_terminal());
        assert!(!LinkState::Negotiating.is_terminal());
    }
}
