//! Local track handles and the capture backend seam
//!
//! A [`LocalTrack`] wraps a `TrackLocalStaticSample`. The host application
//! feeds it encoded samples; while the track is disabled samples are
//! dropped, so the negotiated media section stays in place but the remote
//! side renders nothing.

use crate::{Error, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::media::Sample;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

/// Media kind of a track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackKind {
    Audio,
    Video,
}

impl TrackKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackKind::Audio => "audio",
            TrackKind::Video => "video",
        }
    }
}

impl From<webrtc::rtp_transceiver::rtp_codec::RTPCodecType> for TrackKind {
    fn from(codec_type: webrtc::rtp_transceiver::rtp_codec::RTPCodecType) -> Self {
        match codec_type {
            webrtc::rtp_transceiver::rtp_codec::RTPCodecType::Audio => TrackKind::Audio,
            _ => TrackKind::Video,
        }
    }
}

/// Device a local track is captured from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CaptureSource {
    Microphone,
    Camera,
    Screen,
}

impl CaptureSource {
    /// Kind of track this source produces
    pub fn kind(&self) -> TrackKind {
        match self {
            CaptureSource::Microphone => TrackKind::Audio,
            CaptureSource::Camera | CaptureSource::Screen => TrackKind::Video,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CaptureSource::Microphone => "microphone",
            CaptureSource::Camera => "camera",
            CaptureSource::Screen => "screen",
        }
    }
}

/// Outgoing track owned by the local media session
#[derive(Clone)]
pub struct LocalTrack {
    source: CaptureSource,
    track: Arc<TrackLocalStaticSample>,
    enabled: Arc<AtomicBool>,
}

impl std::fmt::Debug for LocalTrack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalTrack")
            .field("id", &self.track.id())
            .field("source", &self.source)
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

impl LocalTrack {
    /// Wrap an existing sample track
    pub fn new(source: CaptureSource, track: Arc<TrackLocalStaticSample>) -> Self {
        Self {
            source,
            track,
            enabled: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Track id as announced in SDP
    pub fn id(&self) -> &str {
        self.track.id()
    }

    pub fn source(&self) -> CaptureSource {
        self.source
    }

    pub fn kind(&self) -> TrackKind {
        self.source.kind()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Enable or disable sending without detaching the track
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    /// Underlying sample track
    pub fn sample_track(&self) -> Arc<TrackLocalStaticSample> {
        Arc::clone(&self.track)
    }

    /// Track handle suitable for `add_track`/`replace_track`
    pub fn rtc_track(&self) -> Arc<dyn TrackLocal + Send + Sync> {
        self.track.clone()
    }

    /// Write one encoded sample; dropped while the track is disabled
    pub async fn write_sample(&self, sample: &Sample) -> Result<()> {
        if !self.is_enabled() {
            return Ok(());
        }

        self.track
            .write_sample(sample)
            .await
            .map_err(|e| Error::MediaTrackError(format!("Failed to write sample: {}", e)))
    }
}

/// Acquires and releases capture devices
///
/// Acquisition is where permission is checked: implementations return
/// [`Error::MediaPermissionDenied`] or [`Error::MediaDeviceUnavailable`].
#[async_trait]
pub trait CaptureBackend: Send + Sync {
    /// Acquire a track from `source`
    async fn acquire(&self, source: CaptureSource) -> Result<LocalTrack>;

    /// Release a previously acquired track
    fn release(&self, track: &LocalTrack);
}

/// Capture backend producing sample tracks fed by the host application
///
/// Audio tracks are Opus, video tracks VP8. Sources can be marked
/// unavailable, which models hosts without a camera or display.
pub struct SampleCaptureBackend {
    stream_id: String,
    unavailable: HashSet<CaptureSource>,
    live: Mutex<HashSet<String>>,
}

impl Default for SampleCaptureBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl SampleCaptureBackend {
    pub fn new() -> Self {
        Self {
            stream_id: format!("local-{}", uuid::Uuid::new_v4()),
            unavailable: HashSet::new(),
            live: Mutex::new(HashSet::new()),
        }
    }

    /// Mark `source` as missing on this host
    pub fn without(mut self, source: CaptureSource) -> Self {
        self.unavailable.insert(source);
        self
    }

    /// Number of acquired tracks not yet released
    pub fn live_tracks(&self) -> usize {
        self.live.lock().len()
    }
}

#[async_trait]
impl CaptureBackend for SampleCaptureBackend {
    async fn acquire(&self, source: CaptureSource) -> Result<LocalTrack> {
        if self.unavailable.contains(&source) {
            return Err(Error::MediaDeviceUnavailable(format!(
                "No {} available",
                source.as_str()
            )));
        }

        let capability = match source.kind() {
            TrackKind::Audio => RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_string(),
                clock_rate: 48000,
                channels: 2,
                ..Default::default()
            },
            TrackKind::Video => RTCRtpCodecCapability {
                mime_type: MIME_TYPE_VP8.to_string(),
                clock_rate: 90000,
                ..Default::default()
            },
        };

        let id = format!("{}-{}", source.as_str(), uuid::Uuid::new_v4());
        let track = Arc::new(TrackLocalStaticSample::new(
            capability,
            id.clone(),
            self.stream_id.clone(),
        ));

        self.live.lock().insert(id);
        debug!(source = source.as_str(), "Capture track acquired");
        Ok(LocalTrack::new(source, track))
    }

    fn release(&self, track: &LocalTrack) {
        if self.live.lock().remove(track.id()) {
            debug!(source = track.source().as_str(), "Capture track released");
        }
    }
}
