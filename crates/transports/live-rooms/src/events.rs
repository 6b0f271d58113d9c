//! Room activity events published to the host application
//!
//! These flow from the room dispatcher to any number of subscribers over a
//! broadcast channel. Slow subscribers may lag and miss events; durable
//! state (connection status, room list) is also exposed through watch
//! channels.

use crate::channels::chat::ChatMessage;
use crate::media::TrackKind;
use crate::session::room::{Room, RoomStatus};
use crate::signaling::channel::ConnectionStatus;
use crate::signaling::protocol::PeerId;

/// Something observable happened in the client
#[derive(Debug, Clone, PartialEq)]
pub enum LiveEvent {
    /// Signaling socket status changed
    StatusChanged(ConnectionStatus),

    /// The room directory was refreshed
    RoomsUpdated(Vec<Room>),

    /// Local membership changed
    RoomStatusChanged(RoomStatus),

    /// A participant entered the current room
    ParticipantJoined {
        room_id: String,
        peer_id: PeerId,
    },

    /// A participant left or its link was torn down
    ParticipantLeft {
        room_id: String,
        peer_id: PeerId,
    },

    /// Remote media arrived from a participant
    RemoteTrackAdded {
        peer_id: PeerId,
        kind: TrackKind,
    },

    /// Chat line received in the current room
    ChatReceived(ChatMessage),

    /// Capture failed; the join or go-live attempt was abandoned
    MediaError {
        message: String,
    },

    /// The server reported an error
    ServerError {
        message: String,
    },
}

impl LiveEvent {
    pub fn participant_joined(room_id: impl Into<String>, peer_id: impl Into<String>) -> Self {
        Self::ParticipantJoined {
            room_id: room_id.into(),
            peer_id: peer_id.into(),
        }
    }

    pub fn participant_left(room_id: impl Into<String>, peer_id: impl Into<String>) -> Self {
        Self::ParticipantLeft {
            room_id: room_id.into(),
            peer_id: peer_id.into(),
        }
    }

    /// Event name for logging
    pub fn name(&self) -> &'static str {
        match self {
            Self::StatusChanged(_) => "status_changed",
            Self::RoomsUpdated(_) => "rooms_updated",
            Self::RoomStatusChanged(_) => "room_status_changed",
            Self::ParticipantJoined { .. } => "participant_joined",
            Self::ParticipantLeft { .. } => "participant_left",
            Self::RemoteTrackAdded { .. } => "remote_track_added",
            Self::ChatReceived(_) => "chat_received",
            Self::MediaError { .. } => "media_error",
            Self::ServerError { .. } => "server_error",
        }
    }
}
