//! Signaling: wire protocol, credentials and the WebSocket channel

pub mod channel;
pub mod protocol;
pub mod reconnect;
pub mod token;

pub use channel::{ChannelEvent, ConnectionStatus, OpenReason, SignalSink, SignalingChannel};
pub use protocol::{ClientMessage, IceCandidate, PeerId, RoomInfo, ServerMessage};
pub use reconnect::ReconnectPolicy;
pub use token::{
    Credential, CredentialRequest, CredentialSource, HttpCredentialSource,
    StaticCredentialSource, TokenManager,
};
