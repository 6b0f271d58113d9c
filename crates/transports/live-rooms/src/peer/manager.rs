//! Peer connection management for the room mesh

use super::link::{LinkRole, PeerEvent, PeerLink};
use crate::config::LiveClientConfig;
use crate::media::LocalTrack;
use crate::signaling::protocol::PeerId;
use crate::{Error, Result};
use std::collections::{BTreeSet, HashMap};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::{APIBuilder, API};
use webrtc::ice_transport::ice_server::RTCIceServer;

/// Build the ICE server list from STUN and TURN settings
pub fn ice_servers(config: &LiveClientConfig) -> Vec<RTCIceServer> {
    config
        .stun_servers
        .iter()
        .map(|url| RTCIceServer {
            urls: vec![url.clone()],
            ..Default::default()
        })
        .chain(config.turn_servers.iter().map(|turn| {
            #[allow(clippy::needless_update)]
            RTCIceServer {
                urls: vec![turn.url.clone()],
                username: turn.username.clone(),
                credential: turn.credential.clone(),
                ..Default::default()
            }
        }))
        .collect()
}

/// Owns every PeerLink in the current room, keyed by remote peer id
pub struct PeerManager {
    api: API,
    ice_servers: Vec<RTCIceServer>,
    max_peers: usize,
    links: HashMap<PeerId, PeerLink>,
    next_link_id: u64,
    events: mpsc::UnboundedSender<PeerEvent>,
}

impl PeerManager {
    /// Create a manager and the receiver its links post events to
    pub fn new(config: &LiveClientConfig) -> Result<(Self, mpsc::UnboundedReceiver<PeerEvent>)> {
        if config.max_peers == 0 || config.max_peers > 10 {
            return Err(Error::InvalidConfig(format!(
                "max_peers must be in range 1-10, got {}",
                config.max_peers
            )));
        }

        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| Error::WebRtcError(format!("Failed to register codecs: {}", e)))?;

        let interceptor_registry =
            register_default_interceptors(Default::default(), &mut media_engine).map_err(|e| {
                Error::WebRtcError(format!("Failed to register interceptors: {}", e))
            })?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(interceptor_registry)
            .build();

        let (events, events_rx) = mpsc::unbounded_channel();

        Ok((
            Self {
                api,
                ice_servers: ice_servers(config),
                max_peers: config.max_peers as usize,
                links: HashMap::new(),
                next_link_id: 0,
                events,
            },
            events_rx,
        ))
    }

    /// Create a link for `peer_id` with the given role and local tracks
    ///
    /// # Errors
    ///
    /// Returns error if the mesh is full, a link for `peer_id` already
    /// exists, or the connection cannot be built.
    pub async fn open(
        &mut self,
        peer_id: &str,
        role: LinkRole,
        tracks: &[LocalTrack],
    ) -> Result<&mut PeerLink> {
        if self.links.contains_key(peer_id) {
            return Err(Error::PeerConnectionError(format!(
                "Peer {} already has a link",
                peer_id
            )));
        }
        if self.links.len() >= self.max_peers {
            return Err(Error::PeerConnectionError(format!(
                "Maximum peer limit reached ({})",
                self.max_peers
            )));
        }

        self.next_link_id += 1;
        let link = PeerLink::new(
            peer_id.to_string(),
            self.next_link_id,
            role,
            &self.api,
            self.ice_servers.clone(),
            self.events.clone(),
            tracks,
        )
        .await?;

        info!(peer_id, link_id = link.link_id(), ?role, "Peer link added");
        Ok(self.links.entry(peer_id.to_string()).or_insert(link))
    }

    pub fn get(&self, peer_id: &str) -> Option<&PeerLink> {
        self.links.get(peer_id)
    }

    pub fn get_mut(&mut self, peer_id: &str) -> Option<&mut PeerLink> {
        self.links.get_mut(peer_id)
    }

    /// Link for `peer_id`, or [`Error::PeerNotFound`]
    pub fn link_mut(&mut self, peer_id: &str) -> Result<&mut PeerLink> {
        self.links
            .get_mut(peer_id)
            .ok_or_else(|| Error::PeerNotFound(peer_id.to_string()))
    }

    pub fn contains(&self, peer_id: &str) -> bool {
        self.links.contains_key(peer_id)
    }

    /// Whether `link_id` is still the live link for `peer_id`
    pub fn is_current(&self, peer_id: &str, link_id: u64) -> bool {
        self.links
            .get(peer_id)
            .is_some_and(|link| link.link_id() == link_id)
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    /// Ids of every peer with a live link
    pub fn peer_ids(&self) -> BTreeSet<PeerId> {
        self.links.keys().cloned().collect()
    }

    /// Close and drop the link for `peer_id`
    ///
    /// Returns `false` if there was none.
    pub async fn remove(&mut self, peer_id: &str) -> bool {
        match self.links.remove(peer_id) {
            Some(mut link) => {
                link.close().await;
                debug!(peer_id, "Peer link removed");
                true
            }
            None => false,
        }
    }

    /// Close every link
    pub async fn clear(&mut self) {
        let count = self.links.len();
        for (_, mut link) in self.links.drain() {
            link.close().await;
        }
        if count > 0 {
            info!(count, "All peer links closed");
        }
    }

    /// Swap the outgoing video track on every link
    ///
    /// A failure on one link is logged and does not affect the others.
    /// Returns how many links now send `track`.
    pub async fn replace_video_track_all(&self, track: &LocalTrack) -> usize {
        let mut replaced = 0;
        for (peer_id, link) in &self.links {
            match link.replace_video_track(track).await {
                Ok(true) => replaced += 1,
                Ok(false) => debug!(peer_id = %peer_id, "Link has no video sender"),
                Err(e) => warn!(peer_id = %peer_id, "Video track replacement failed: {}", e),
            }
        }
        replaced
    }
}
