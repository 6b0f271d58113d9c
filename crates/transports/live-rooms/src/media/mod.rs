//! Local capture and outgoing tracks

pub mod local;
pub mod tracks;

pub use local::{LocalMediaSession, MediaConstraints};
pub use tracks::{CaptureBackend, CaptureSource, LocalTrack, SampleCaptureBackend, TrackKind};
