//! Live-room signaling protocol types
//!
//! Every frame is a JSON object discriminated by its `type` field. There are
//! no request ids: each message targets either the current room or a named
//! peer (`target` outbound, `sender` inbound).

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;

/// Remote participant identifier assigned by the signaling server
pub type PeerId = String;

/// Messages sent by the client
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Ask for the list of joinable rooms
    GetAvailableRooms,

    /// Join a room
    JoinRoom {
        /// Room to join
        #[serde(rename = "roomId")]
        room_id: String,
        /// Display name
        username: String,
        /// Whether this is a broadcaster's canonical room
        is_artist_room: bool,
    },

    /// Leave (and stop publishing into) a room
    LeaveRoom {
        /// Room being left
        #[serde(rename = "roomId")]
        room_id: String,
    },

    /// SDP offer for one peer
    Offer {
        /// Target peer
        target: PeerId,
        /// Offer SDP
        sdp: String,
        /// Current room
        #[serde(rename = "roomId")]
        room_id: String,
    },

    /// SDP answer for one peer
    Answer {
        /// Target peer
        target: PeerId,
        /// Answer SDP
        sdp: String,
        /// Current room
        #[serde(rename = "roomId")]
        room_id: String,
    },

    /// Trickled ICE candidate for one peer
    IceCandidate {
        /// Target peer
        target: PeerId,
        /// Candidate
        candidate: IceCandidate,
    },

    /// Chat line for the current room
    Chat {
        /// Current room
        #[serde(rename = "roomId")]
        room_id: String,
        /// Text
        message: String,
    },
}

/// Messages received from the server
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Current directory of joinable rooms
    AvailableRooms {
        /// Room ids
        rooms: Vec<String>,
        /// Optional per-room metadata keyed by room id
        #[serde(default)]
        room_info: Option<HashMap<String, RoomInfo>>,
    },

    /// Join acknowledgement
    RoomJoined {
        /// Joined room
        #[serde(rename = "roomId")]
        room_id: String,
        /// Number of participants already in the room
        #[serde(rename = "existingParticipants", default)]
        existing_participants: u32,
        /// Room metadata
        #[serde(default)]
        room_info: Option<RoomInfo>,
    },

    /// A participant joined the current room
    NewPeer {
        /// Joining peer
        peer: PeerId,
    },

    /// A participant left the current room
    PeerLeft {
        /// Leaving peer
        peer: PeerId,
    },

    /// SDP offer from a peer
    Offer {
        /// Originating peer
        sender: PeerId,
        /// Offer SDP
        #[serde(deserialize_with = "deserialize_sdp")]
        sdp: String,
        /// Room the offer belongs to
        #[serde(rename = "roomId", default)]
        room_id: Option<String>,
    },

    /// SDP answer from a peer
    Answer {
        /// Originating peer
        sender: PeerId,
        /// Answer SDP
        #[serde(deserialize_with = "deserialize_sdp")]
        sdp: String,
        /// Room the answer belongs to
        #[serde(rename = "roomId", default)]
        room_id: Option<String>,
    },

    /// Trickled ICE candidate from a peer
    IceCandidate {
        /// Originating peer
        sender: PeerId,
        /// Candidate
        candidate: IceCandidate,
    },

    /// Chat line relayed by the server
    Chat {
        /// Author
        username: String,
        /// Text
        message: String,
    },

    /// Server-side failure report
    Error {
        /// Human-readable reason
        message: String,
    },
}

impl ServerMessage {
    /// Parse a server frame
    pub fn from_json(text: &str) -> crate::Result<Self> {
        serde_json::from_str(text)
            .map_err(|e| crate::Error::ProtocolError(format!("Invalid server message: {}", e)))
    }

    /// Message type name for logging
    pub fn kind(&self) -> &'static str {
        match self {
            ServerMessage::AvailableRooms { .. } => "available_rooms",
            ServerMessage::RoomJoined { .. } => "room_joined",
            ServerMessage::NewPeer { .. } => "new_peer",
            ServerMessage::PeerLeft { .. } => "peer_left",
            ServerMessage::Offer { .. } => "offer",
            ServerMessage::Answer { .. } => "answer",
            ServerMessage::IceCandidate { .. } => "ice_candidate",
            ServerMessage::Chat { .. } => "chat",
            ServerMessage::Error { .. } => "error",
        }
    }

    /// Peer this message is addressed from, for peer-scoped messages
    pub fn sender(&self) -> Option<&str> {
        match self {
            ServerMessage::Offer { sender, .. }
            | ServerMessage::Answer { sender, .. }
            | ServerMessage::IceCandidate { sender, .. } => Some(sender),
            _ => None,
        }
    }
}

impl ClientMessage {
    /// Serialize to a JSON text frame
    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Message type name for logging
    pub fn kind(&self) -> &'static str {
        match self {
            ClientMessage::GetAvailableRooms => "get_available_rooms",
            ClientMessage::JoinRoom { .. } => "join_room",
            ClientMessage::LeaveRoom { .. } => "leave_room",
            ClientMessage::Offer { .. } => "offer",
            ClientMessage::Answer { .. } => "answer",
            ClientMessage::IceCandidate { .. } => "ice_candidate",
            ClientMessage::Chat { .. } => "chat",
        }
    }

    /// Peer this message targets, for peer-scoped messages
    pub fn target(&self) -> Option<&str> {
        match self {
            ClientMessage::Offer { target, .. }
            | ClientMessage::Answer { target, .. }
            | ClientMessage::IceCandidate { target, .. } => Some(target),
            _ => None,
        }
    }
}

/// Per-room metadata published by the server
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RoomInfo {
    /// Explicit broadcaster-room flag; overrides the id prefix when present
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_artist_room: Option<bool>,

    /// Owner's user id
    #[serde(
        default,
        alias = "owner",
        alias = "ownerId",
        skip_serializing_if = "Option::is_none"
    )]
    pub owner_id: Option<String>,

    /// Owner's display name
    #[serde(
        default,
        alias = "ownerName",
        alias = "artist_name",
        skip_serializing_if = "Option::is_none"
    )]
    pub owner_name: Option<String>,

    /// Peer id currently broadcasting, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub broadcaster: Option<PeerId>,

    /// Current participant count
    #[serde(
        default,
        alias = "participants",
        skip_serializing_if = "Option::is_none"
    )]
    pub participant_count: Option<u32>,
}

/// ICE candidate as exchanged with browsers
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct IceCandidate {
    /// Candidate attribute line
    pub candidate: String,

    /// Media stream identification tag
    #[serde(rename = "sdpMid", default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,

    /// Index of the m-line the candidate belongs to
    #[serde(
        rename = "sdpMLineIndex",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub sdp_mline_index: Option<u16>,

    /// ICE username fragment
    #[serde(
        rename = "usernameFragment",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub username_fragment: Option<String>,
}

impl From<webrtc::ice_transport::ice_candidate::RTCIceCandidateInit> for IceCandidate {
    fn from(init: webrtc::ice_transport::ice_candidate::RTCIceCandidateInit) -> Self {
        Self {
            candidate: init.candidate,
            sdp_mid: init.sdp_mid,
            sdp_mline_index: init.sdp_mline_index,
            username_fragment: init.username_fragment,
        }
    }
}

impl From<IceCandidate> for webrtc::ice_transport::ice_candidate::RTCIceCandidateInit {
    fn from(c: IceCandidate) -> Self {
        Self {
            candidate: c.candidate,
            sdp_mid: c.sdp_mid,
            sdp_mline_index: c.sdp_mline_index,
            username_fragment: c.username_fragment,
        }
    }
}

/// Accepts either a bare SDP string or a `{type, sdp}` description object
fn deserialize_sdp<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum SdpPayload {
        Text(String),
        Description { sdp: String },
    }

    Ok(match SdpPayload::deserialize(deserializer)? {
        SdpPayload::Text(sdp) | SdpPayload::Description { sdp } => sdp,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    #[test]
    fn test_join_room_wire_format() {
        let msg = ClientMessage::JoinRoom {
            room_id: "artist_42".to_string(),
            username: "kay".to_string(),
            is_artist_room: true,
        };
        let value: Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "join_room",
                "roomId": "artist_42",
                "username": "kay",
                "is_artist_room": true
            })
        );
    }

    #[test]
    fn test_get_available_rooms_has_no_fields() {
        let json = ClientMessage::GetAvailableRooms.to_json().unwrap();
        assert_eq!(json, r#"{"type":"get_available_rooms"}"#);
    }

    #[test]
    fn test_ice_candidate_uses_browser_field_names() {
        let msg = ClientMessage::IceCandidate {
            target: "p7".to_string(),
            candidate: IceCandidate {
                candidate: "candidate:1 1 udp 2130706431 10.0.0.2 50000 typ host".to_string(),
                sdp_mid: Some("0".to_string()),
                sdp_mline_index: Some(0),
                username_fragment: None,
            },
        };
        let value: Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(value["candidate"]["sdpMid"], "0");
        assert_eq!(value["candidate"]["sdpMLineIndex"], 0);
        assert!(value["candidate"].get("usernameFragment").is_none());
        assert_eq!(msg.target(), Some("p7"));
    }

    #[test]
    fn test_parse_available_rooms_with_info() {
        let text = r#"{
            "type": "available_rooms",
            "rooms": ["artist_42", "lounge"],
            "room_info": {
                "artist_42": {"owner": "42", "ownerName": "Kay", "participants": 3, "cover": "x.png"}
            }
        }"#;
        let msg = ServerMessage::from_json(text).unwrap();
        match msg {
            ServerMessage::AvailableRooms { rooms, room_info } => {
                assert_eq!(rooms, vec!["artist_42", "lounge"]);
                let info = &room_info.unwrap()["artist_42"];
                assert_eq!(info.owner_id.as_deref(), Some("42"));
                assert_eq!(info.owner_name.as_deref(), Some("Kay"));
                assert_eq!(info.participant_count, Some(3));
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_parse_room_joined() {
        let text = r#"{"type":"room_joined","roomId":"artist_42","existingParticipants":1,"room_info":{"is_artist_room":true}}"#;
        let msg = ServerMessage::from_json(text).unwrap();
        assert_eq!(
            msg,
            ServerMessage::RoomJoined {
                room_id: "artist_42".to_string(),
                existing_participants: 1,
                room_info: Some(RoomInfo {
                    is_artist_room: Some(true),
                    ..Default::default()
                }),
            }
        );
    }

    #[test]
    fn test_offer_accepts_description_object() {
        let text = r#"{"type":"offer","sender":"p7","sdp":{"type":"offer","sdp":"v=0\r\n"},"roomId":"r"}"#;
        match ServerMessage::from_json(text).unwrap() {
            ServerMessage::Offer { sender, sdp, room_id } => {
                assert_eq!(sender, "p7");
                assert_eq!(sdp, "v=0\r\n");
                assert_eq!(room_id.as_deref(), Some("r"));
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_unknown_type_is_protocol_error() {
        let err = ServerMessage::from_json(r#"{"type":"teleport","to":"mars"}"#).unwrap_err();
        assert_eq!(err.category(), crate::error::ErrorCategory::Protocol);
    }

    #[test]
    fn test_candidate_conversion() {
        let candidate = IceCandidate {
            candidate: "candidate:abc".to_string(),
            sdp_mid: Some("1".to_string()),
            sdp_mline_index: Some(1),
            username_fragment: Some("uf".to_string()),
        };
        let init: webrtc::ice_transport::ice_candidate::RTCIceCandidateInit =
            candidate.clone().into();
        assert_eq!(init.sdp_mline_index, Some(1));
        assert_eq!(IceCandidate::from(init), candidate);
    }
}
