//! Signaling and peer orchestration for Encore live rooms
//!
//! This crate is the real-time core of a live-room participant: it keeps an
//! authenticated WebSocket signaling channel open, tracks the room directory
//! and the local client's membership, and maintains one WebRTC peer
//! connection per remote participant in the current room.
//!
//! # Features
//!
//! - **Credential lifecycle**: short-lived signaling tokens fetched over REST,
//!   cached, renewed ahead of expiry and rotated onto a fresh socket
//! - **Resilient signaling**: reconnect with a configurable backoff, at most
//!   one pending reconnect, stale-socket events discarded by generation
//! - **Full-mesh peers**: up to 10 links, trickle ICE with queued candidates,
//!   per-peer teardown on failure
//! - **Local media**: microphone, camera and screen capture with in-place
//!   screen-share track replacement (no renegotiation)
//! - **Room chat**: per-session transcript relayed through signaling
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │  LiveClient (handle, commands + events)                   │
//! │  ↓                                                         │
//! │  Dispatcher task                                           │
//! │  ├─ SignalingChannel (WebSocket, TokenManager, reconnect) │
//! │  └─ RoomController                                         │
//! │     ├─ RoomDirectory / RoomSession                         │
//! │     ├─ PeerManager (mesh of PeerLinks)                     │
//! │     ├─ LocalMediaSession (capture tracks)                  │
//! │     └─ ChatRelay                                           │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use encore_live_rooms::LiveClientConfig;
//!
//! let config = LiveClientConfig {
//!     signaling_url: "wss://live.example.com/ws".to_string(),
//!     username: "listener".to_string(),
//!     ..Default::default()
//! };
//! assert!(config.validate().is_ok());
//! assert_eq!(config.max_peers, 10);
//! ```
//!
//! ## Async Usage
//!
//! ```no_run
//! use encore_live_rooms::{
//!     HttpCredentialSource, LiveClient, LiveClientConfig, MediaConstraints, NullTrackSink,
//!     SampleCaptureBackend,
//! };
//! use std::sync::Arc;
//!
//! # async fn example() -> encore_live_rooms::Result<()> {
//! let config = LiveClientConfig::default();
//! let credentials = Arc::new(HttpCredentialSource::new(config.token_endpoint.clone(), None));
//! let client = LiveClient::start(
//!     config,
//!     credentials,
//!     Arc::new(SampleCaptureBackend::new()),
//!     Arc::new(NullTrackSink),
//! )
//! .await?;
//!
//! client.join_room("artist_42", MediaConstraints::NONE).await?;
//! client.send_chat("hello").await?;
//! client.shutdown().await;
//! # Ok(())
//! # }
//! ```

#![warn(clippy::all)]

pub mod channels;
pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod media;
pub mod peer;
pub mod session;
pub mod signaling;

pub use channels::{ChatMessage, ChatRelay};
pub use client::LiveClient;
pub use config::{CredentialRole, LiveClientConfig, ReconnectConfig, TurnServerConfig};
pub use error::{Error, ErrorCategory, Result};
pub use events::LiveEvent;
pub use media::{
    CaptureBackend, CaptureSource, LocalMediaSession, LocalTrack, MediaConstraints,
    SampleCaptureBackend, TrackKind,
};
pub use peer::{LinkRole, LinkState, NullTrackSink, PeerManager, RemoteTrackSink};
pub use session::{Room, RoomController, RoomDirectory, RoomKind, RoomSession, RoomStatus};
pub use signaling::{
    ChannelEvent, ClientMessage, ConnectionStatus, Credential, CredentialRequest, CredentialSource,
    HttpCredentialSource, OpenReason, PeerId, ReconnectPolicy, RoomInfo, ServerMessage,
    SignalSink, SignalingChannel, StaticCredentialSource, TokenManager,
};

/// Get the version of this crate
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
pub(crate) mod testing {
    use crate::signaling::{ClientMessage, SignalSink};
    use crate::Result;
    use parking_lot::Mutex;

    /// Sink that keeps every message it is given
    #[derive(Default)]
    pub struct RecordingSink {
        sent: Mutex<Vec<ClientMessage>>,
    }

    impl RecordingSink {
        pub fn sent(&self) -> Vec<ClientMessage> {
            self.sent.lock().clone()
        }

        /// Drain what has been recorded so far
        pub fn take(&self) -> Vec<ClientMessage> {
            std::mem::take(&mut *self.sent.lock())
        }
    }

    impl SignalSink for RecordingSink {
        fn send(&self, message: ClientMessage) -> Result<()> {
            self.sent.lock().push(message);
            Ok(())
        }
    }
}
