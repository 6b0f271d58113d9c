//! Peer connections of the room mesh

pub mod link;
pub mod manager;

pub use link::{
    LinkRole, LinkState, NullTrackSink, PeerEvent, PeerEventKind, PeerLink, RemoteTrackSink,
};
pub use manager::PeerManager;
