//! Room identity and the room session state machine

use crate::media::MediaConstraints;
use crate::signaling::protocol::{PeerId, RoomInfo};
use crate::{Error, Result};
use std::collections::BTreeSet;
use std::fmt;
use tracing::debug;

/// Id prefix of a broadcaster's canonical room
pub const ARTIST_ROOM_PREFIX: &str = "artist_";

/// Kind of room
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoomKind {
    /// Canonical room owned by a broadcaster
    Artist { artist_id: String },
    /// Any other room
    Open,
}

/// A joinable room as listed by the directory
#[derive(Debug, Clone, PartialEq)]
pub struct Room {
    pub room_id: String,
    pub kind: RoomKind,
    pub info: Option<RoomInfo>,
}

impl Room {
    /// Build a room, classifying it from metadata first and the id prefix second
    pub fn new(room_id: impl Into<String>, info: Option<RoomInfo>) -> Self {
        let room_id = room_id.into();
        let kind = classify(&room_id, info.as_ref());
        Self {
            room_id,
            kind,
            info,
        }
    }

    /// Canonical room id for a broadcaster
    pub fn artist_room_id(user_id: &str) -> String {
        format!("{}{}", ARTIST_ROOM_PREFIX, user_id)
    }

    pub fn is_artist_room(&self) -> bool {
        matches!(self.kind, RoomKind::Artist { .. })
    }

    /// Owner's display name, falling back to the room id
    pub fn display_name(&self) -> &str {
        self.info
            .as_ref()
            .and_then(|info| info.owner_name.as_deref())
            .unwrap_or(&self.room_id)
    }
}

fn classify(room_id: &str, info: Option<&RoomInfo>) -> RoomKind {
    let prefixed = room_id.strip_prefix(ARTIST_ROOM_PREFIX);
    let explicit = info.and_then(|i| i.is_artist_room);
    let owner = info.and_then(|i| i.owner_id.clone());

    match (explicit, prefixed) {
        (Some(false), _) => RoomKind::Open,
        (Some(true), _) | (None, Some(_)) => RoomKind::Artist {
            artist_id: owner
                .or_else(|| prefixed.map(str::to_string))
                .unwrap_or_else(|| room_id.to_string()),
        },
        (None, None) => RoomKind::Open,
    }
}

/// Membership state of the local client
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoomStatus {
    NotInRoom,
    Joining { room_id: String },
    InRoom { room_id: String },
    Leaving { room_id: String },
}

impl RoomStatus {
    pub fn room_id(&self) -> Option<&str> {
        match self {
            RoomStatus::NotInRoom => None,
            RoomStatus::Joining { room_id }
            | RoomStatus::InRoom { room_id }
            | RoomStatus::Leaving { room_id } => Some(room_id),
        }
    }
}

impl fmt::Display for RoomStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoomStatus::NotInRoom => write!(f, "NOT_IN_ROOM"),
            RoomStatus::Joining { room_id } => write!(f, "JOINING({})", room_id),
            RoomStatus::InRoom { room_id } => write!(f, "IN_ROOM({})", room_id),
            RoomStatus::Leaving { room_id } => write!(f, "LEAVING({})", room_id),
        }
    }
}

/// The local client's membership in at most one room
///
/// The participant set is the source of truth for which peer links should
/// exist. Transition methods reject calls that are invalid from the current
/// state instead of silently coercing it.
#[derive(Debug)]
pub struct RoomSession {
    status: RoomStatus,
    room: Option<Room>,
    existing_participants: u32,
    participants: BTreeSet<PeerId>,
    constraints: MediaConstraints,
}

impl Default for RoomSession {
    fn default() -> Self {
        Self::new()
    }
}

impl RoomSession {
    pub fn new() -> Self {
        Self {
            status: RoomStatus::NotInRoom,
            room: None,
            existing_participants: 0,
            participants: BTreeSet::new(),
            constraints: MediaConstraints::NONE,
        }
    }

    pub fn status(&self) -> &RoomStatus {
        &self.status
    }

    pub fn room_id(&self) -> Option<&str> {
        self.status.room_id()
    }

    pub fn room(&self) -> Option<&Room> {
        self.room.as_ref()
    }

    pub fn is_in_room(&self) -> bool {
        matches!(self.status, RoomStatus::InRoom { .. })
    }

    pub fn is_joining(&self) -> bool {
        matches!(self.status, RoomStatus::Joining { .. })
    }

    pub fn participants(&self) -> &BTreeSet<PeerId> {
        &self.participants
    }

    /// Participants reported present when the join was acknowledged
    pub fn existing_participants(&self) -> u32 {
        self.existing_participants
    }

    /// Capture requested for this session
    pub fn constraints(&self) -> MediaConstraints {
        self.constraints
    }

    /// `NOT_IN_ROOM -> JOINING`
    pub fn begin_join(&mut self, room_id: &str, constraints: MediaConstraints) -> Result<()> {
        if self.status != RoomStatus::NotInRoom {
            return Err(Error::InvalidState(format!(
                "Cannot join {} while {}",
                room_id, self.status
            )));
        }

        self.status = RoomStatus::Joining {
            room_id: room_id.to_string(),
        };
        self.constraints = constraints;
        debug!(room_id, "Room session joining");
        Ok(())
    }

    /// `JOINING -> IN_ROOM` on the server's acknowledgement
    pub fn confirm_joined(
        &mut self,
        room_id: &str,
        existing_participants: u32,
        info: Option<RoomInfo>,
    ) -> Result<&Room> {
        match &self.status {
            RoomStatus::Joining { room_id: pending } if pending == room_id => {}
            other => {
                return Err(Error::InvalidState(format!(
                    "Unexpected room_joined for {} while {}",
                    room_id, other
                )))
            }
        }

        self.status = RoomStatus::InRoom {
            room_id: room_id.to_string(),
        };
        self.existing_participants = existing_participants;
        self.participants.clear();
        debug!(room_id, existing_participants, "Room session joined");
        Ok(self.room.insert(Room::new(room_id, info)))
    }

    /// Record a participant; only meaningful while `IN_ROOM`
    pub fn add_participant(&mut self, peer_id: &str) -> bool {
        self.is_in_room() && self.participants.insert(peer_id.to_string())
    }

    pub fn remove_participant(&mut self, peer_id: &str) -> bool {
        self.participants.remove(peer_id)
    }

    pub fn has_participant(&self, peer_id: &str) -> bool {
        self.participants.contains(peer_id)
    }

    /// `IN_ROOM | JOINING -> LEAVING`, returning the room being left
    pub fn begin_leave(&mut self) -> Result<String> {
        let room_id = match &self.status {
            RoomStatus::InRoom { room_id } | RoomStatus::Joining { room_id } => room_id.clone(),
            other => {
                return Err(Error::InvalidState(format!("Cannot leave while {}", other)))
            }
        };

        self.status = RoomStatus::Leaving {
            room_id: room_id.clone(),
        };
        Ok(room_id)
    }

    /// `LEAVING -> NOT_IN_ROOM`
    pub fn finish_leave(&mut self) -> Result<()> {
        if !matches!(self.status, RoomStatus::Leaving { .. }) {
            return Err(Error::InvalidState(format!(
                "Cannot finish leaving while {}",
                self.status
            )));
        }
        self.reset();
        Ok(())
    }

    /// Drop back to `NOT_IN_ROOM` from any state
    pub fn reset(&mut self) {
        self.status = RoomStatus::NotInRoom;
        self.room = None;
        self.existing_participants = 0;
        self.participants.clear();
        self.constraints = MediaConstraints::NONE;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_room_kind_from_prefix() {
        let room = Room::new("artist_42", None);
        assert_eq!(
            room.kind,
            RoomKind::Artist {
                artist_id: "42".to_string()
            }
        );
        assert!(!Room::new("open-mic", None).is_artist_room());
        assert_eq!(Room::artist_room_id("42"), "artist_42");
    }

    #[test]
    fn test_explicit_flag_wins_over_prefix() {
        let info = RoomInfo {
            is_artist_room: Some(false),
            ..Default::default()
        };
        assert_eq!(Room::new("artist_7", Some(info)).kind, RoomKind::Open);

        let info = RoomInfo {
            is_artist_room: Some(true),
            owner_id: Some("u-9".to_string()),
            owner_name: Some("DJ Nine".to_string()),
            ..Default::default()
        };
        let room = Room::new("friday-session", Some(info));
        assert_eq!(
            room.kind,
            RoomKind::Artist {
                artist_id: "u-9".to_string()
            }
        );
        assert_eq!(room.display_name(), "DJ Nine");
    }

    #[test]
    fn test_join_lifecycle() {
        let mut session = RoomSession::new();
        session
            .begin_join("artist_42", MediaConstraints::AUDIO_VIDEO)
            .unwrap();
        assert!(session.is_joining());

        // Participants are not tracked before the join is acknowledged
        assert!(!session.add_participant("early"));

        let room = session.confirm_joined("artist_42", 1, None).unwrap();
        assert!(room.is_artist_room());
        assert!(session.is_in_room());
        assert_eq!(session.existing_participants(), 1);

        assert!(session.add_participant("p7"));
        assert!(!session.add_participant("p7"));
        assert!(session.has_participant("p7"));

        assert_eq!(session.begin_leave().unwrap(), "artist_42");
        session.finish_leave().unwrap();
        assert_eq!(session.status(), &RoomStatus::NotInRoom);
        assert!(session.participants().is_empty());
        assert!(session.room().is_none());
    }

    #[test]
    fn test_invalid_transitions_rejected() {
        let mut session = RoomSession::new();
        assert!(session.begin_leave().is_err());
        assert!(session.finish_leave().is_err());
        assert!(session.confirm_joined("x", 0, None).is_err());

        session.begin_join("a", MediaConstraints::NONE).unwrap();
        assert!(session.begin_join("b", MediaConstraints::NONE).is_err());
        assert!(session.confirm_joined("b", 0, None).is_err());

        session.confirm_joined("a", 0, None).unwrap();
        let err = session.begin_join("b", MediaConstraints::NONE).unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));
    }

    #[test]
    fn test_leave_while_joining() {
        let mut session = RoomSession::new();
        session.begin_join("a", MediaConstraints::NONE).unwrap();
        assert_eq!(session.begin_leave().unwrap(), "a");
        assert!(session.confirm_joined("a", 0, None).is_err());
        session.finish_leave().unwrap();
        assert!(session.begin_join("a", MediaConstraints::NONE).is_ok());
    }
}
