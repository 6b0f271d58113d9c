//! Error types for live-room signaling and peer orchestration

/// Result type alias using the live-rooms Error
pub type Result<T> = std::result::Result<T, Error>;

/// Recovery class an error belongs to
///
/// Each class has its own propagation rule: transport and authentication
/// failures are recovered inside the signaling channel, negotiation failures
/// stay with the peer they happened on, media failures reach the caller, and
/// protocol failures are logged and dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Socket error or abnormal close
    Transport,
    /// Credential rejected, expired, or unobtainable
    Authentication,
    /// SDP or ICE failure on a single peer
    Negotiation,
    /// Capture permission denied or device unavailable
    Media,
    /// Malformed or unexpected signaling message
    Protocol,
    /// Operation not valid in the current room/peer state
    State,
    /// Invalid configuration
    Config,
}

/// Errors that can occur in live-room operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid configuration parameter
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// WebSocket transport error
    #[error("WebSocket error: {0}")]
    WebSocketError(String),

    /// Signaling channel is not open
    #[error("Signaling channel not connected")]
    NotConnected,

    /// Credential could not be fetched from the issuer
    #[error("Credential fetch failed: {0}")]
    CredentialFetch(String),

    /// Credential was rejected by the signaling server
    #[error("Credential rejected: {0}")]
    CredentialRejected(String),

    /// Malformed or unexpected protocol message
    #[error("Protocol error: {0}")]
    ProtocolError(String),

    /// Peer not found
    #[error("Peer not found: {0}")]
    PeerNotFound(String),

    /// WebRTC peer connection error
    #[error("Peer connection error: {0}")]
    PeerConnectionError(String),

    /// SDP negotiation error
    #[error("SDP negotiation error: {0}")]
    SdpError(String),

    /// ICE candidate error
    #[error("ICE candidate error: {0}")]
    IceCandidateError(String),

    /// Media track error
    #[error("Media track error: {0}")]
    MediaTrackError(String),

    /// Capture permission was denied
    #[error("Media permission denied: {0}")]
    MediaPermissionDenied(String),

    /// Capture device missing or busy
    #[error("Media device unavailable: {0}")]
    MediaDeviceUnavailable(String),

    /// Operation rejected by the room or peer state machine
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Background task has stopped
    #[error("Client stopped")]
    ClientStopped,

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// WebRTC library error
    #[error("WebRTC error: {0}")]
    WebRtcError(String),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::SerializationError(e.to_string())
    }
}

impl Error {
    /// Map this error onto its recovery class
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::WebSocketError(_) | Error::NotConnected | Error::IoError(_) => {
                ErrorCategory::Transport
            }
            Error::CredentialFetch(_) | Error::CredentialRejected(_) => {
                ErrorCategory::Authentication
            }
            Error::PeerNotFound(_)
            | Error::PeerConnectionError(_)
            | Error::SdpError(_)
            | Error::IceCandidateError(_)
            | Error::WebRtcError(_) => ErrorCategory::Negotiation,
            Error::MediaTrackError(_)
            | Error::MediaPermissionDenied(_)
            | Error::MediaDeviceUnavailable(_) => ErrorCategory::Media,
            Error::ProtocolError(_) | Error::SerializationError(_) => ErrorCategory::Protocol,
            Error::InvalidState(_) | Error::ClientStopped => ErrorCategory::State,
            Error::InvalidConfig(_) => ErrorCategory::Config,
        }
    }

    /// Check if this error is recovered automatically by reconnecting
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Transport | ErrorCategory::Authentication
        )
    }

    /// Check if this error is a configuration error
    pub fn is_config_error(&self) -> bool {
        matches!(self, Error::InvalidConfig(_))
    }

    /// Check if this error is scoped to a single peer
    pub fn is_peer_error(&self) -> bool {
        self.category() == ErrorCategory::Negotiation
    }

    /// Check if this error should be shown to the user
    pub fn is_user_visible(&self) -> bool {
        self.category() == ErrorCategory::Media
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::InvalidConfig("test".to_string());
        assert_eq!(err.to_string(), "Invalid configuration: test");
    }

    #[test]
    fn test_error_categories() {
        assert_eq!(
            Error::WebSocketError("reset".into()).category(),
            ErrorCategory::Transport
        );
        assert_eq!(
            Error::CredentialRejected("401".into()).category(),
            ErrorCategory::Authentication
        );
        assert_eq!(
            Error::SdpError("bad offer".into()).category(),
            ErrorCategory::Negotiation
        );
        assert_eq!(
            Error::MediaPermissionDenied("camera".into()).category(),
            ErrorCategory::Media
        );
        assert_eq!(
            Error::ProtocolError("unknown type".into()).category(),
            ErrorCategory::Protocol
        );
    }

    #[test]
    fn test_error_is_retryable() {
        assert!(Error::WebSocketError("test".to_string()).is_retryable());
        assert!(Error::CredentialFetch("test".to_string()).is_retryable());
        assert!(!Error::MediaPermissionDenied("test".to_string()).is_retryable());
        assert!(!Error::InvalidConfig("test".to_string()).is_retryable());
    }

    #[test]
    fn test_error_is_peer_error() {
        assert!(Error::PeerNotFound("test".to_string()).is_peer_error());
        assert!(Error::IceCandidateError("test".to_string()).is_peer_error());
        assert!(!Error::NotConnected.is_peer_error());
    }

    #[test]
    fn test_media_errors_are_user_visible() {
        assert!(Error::MediaDeviceUnavailable("mic".into()).is_user_visible());
        assert!(!Error::ProtocolError("x".into()).is_user_visible());
    }

    #[test]
    fn test_json_error_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err = Error::from(json_err);
        assert!(matches!(err, Error::SerializationError(_)));
        assert_eq!(err.category(), ErrorCategory::Protocol);
    }
}
