//! Local media session: capture lifetime, toggles and screen share

use super::tracks::{CaptureBackend, CaptureSource, LocalTrack};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

/// Which kinds of capture a join asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MediaConstraints {
    pub audio: bool,
    pub video: bool,
}

impl MediaConstraints {
    /// Receive-only participant
    pub const NONE: Self = Self {
        audio: false,
        video: false,
    };

    /// Camera and microphone
    pub const AUDIO_VIDEO: Self = Self {
        audio: true,
        video: true,
    };

    pub fn is_empty(&self) -> bool {
        !self.audio && !self.video
    }
}

/// Owns the local capture tracks
///
/// Tracks are only ever mutated here. The peer layer attaches clones and is
/// told which video track to swap in when screen sharing starts or stops.
pub struct LocalMediaSession {
    backend: Arc<dyn CaptureBackend>,
    audio: Option<LocalTrack>,
    camera: Option<LocalTrack>,
    screen: Option<LocalTrack>,
}

impl LocalMediaSession {
    pub fn new(backend: Arc<dyn CaptureBackend>) -> Self {
        Self {
            backend,
            audio: None,
            camera: None,
            screen: None,
        }
    }

    /// Whether any capture is running
    pub fn is_active(&self) -> bool {
        self.audio.is_some() || self.camera.is_some()
    }

    /// Acquire the requested tracks
    ///
    /// All-or-nothing: if any acquisition fails, tracks acquired earlier in
    /// the same call are released before the error is returned.
    pub async fn start(&mut self, constraints: MediaConstraints) -> Result<()> {
        if self.is_active() {
            return Err(Error::InvalidState(
                "Local media already started".to_string(),
            ));
        }
        if constraints.is_empty() {
            return Ok(());
        }

        let mut acquired: Vec<LocalTrack> = Vec::with_capacity(2);
        let mut wanted = Vec::with_capacity(2);
        if constraints.audio {
            wanted.push(CaptureSource::Microphone);
        }
        if constraints.video {
            wanted.push(CaptureSource::Camera);
        }

        for source in wanted {
            match self.backend.acquire(source).await {
                Ok(track) => acquired.push(track),
                Err(e) => {
                    warn!(source = source.as_str(), "Capture failed: {}", e);
                    for track in &acquired {
                        self.backend.release(track);
                    }
                    return Err(e);
                }
            }
        }

        for track in acquired {
            match track.source() {
                CaptureSource::Microphone => self.audio = Some(track),
                _ => self.camera = Some(track),
            }
        }

        info!(
            audio = self.audio.is_some(),
            video = self.camera.is_some(),
            "Local media started"
        );
        Ok(())
    }

    /// Release every track
    pub fn stop(&mut self) {
        let tracks = [self.screen.take(), self.camera.take(), self.audio.take()];
        let mut released = 0;
        for track in tracks.iter().flatten() {
            self.backend.release(track);
            released += 1;
        }
        if released > 0 {
            info!(released, "Local media stopped");
        }
    }

    /// Tracks currently published: audio plus the outgoing video track
    pub fn tracks(&self) -> Vec<LocalTrack> {
        self.audio
            .iter()
            .chain(self.outgoing_video())
            .cloned()
            .collect()
    }

    pub fn audio_track(&self) -> Option<&LocalTrack> {
        self.audio.as_ref()
    }

    /// Video track peers are receiving: the screen while sharing, else the camera
    pub fn outgoing_video(&self) -> Option<&LocalTrack> {
        self.screen.as_ref().or(self.camera.as_ref())
    }

    pub fn is_screen_sharing(&self) -> bool {
        self.screen.is_some()
    }

    /// Flip the outgoing video track's enabled flag, returning the new state
    pub fn toggle_video(&self) -> Result<bool> {
        let track = self
            .outgoing_video()
            .ok_or_else(|| Error::InvalidState("No video track".to_string()))?;
        let enabled = !track.is_enabled();
        track.set_enabled(enabled);
        Ok(enabled)
    }

    /// Flip the audio track's enabled flag, returning the new state
    pub fn toggle_audio(&self) -> Result<bool> {
        let track = self
            .audio
            .as_ref()
            .ok_or_else(|| Error::InvalidState("No audio track".to_string()))?;
        let enabled = !track.is_enabled();
        track.set_enabled(enabled);
        Ok(enabled)
    }

    /// Acquire a screen track; the caller swaps it into every peer
    pub async fn start_screen_share(&mut self) -> Result<LocalTrack> {
        if self.camera.is_none() {
            return Err(Error::InvalidState(
                "Screen share requires an active video track".to_string(),
            ));
        }
        if self.screen.is_some() {
            return Err(Error::InvalidState("Already screen sharing".to_string()));
        }

        let screen = self.backend.acquire(CaptureSource::Screen).await?;
        info!("Screen share started");
        self.screen = Some(screen.clone());
        Ok(screen)
    }

    /// Release the screen track and return the camera track to restore
    pub fn stop_screen_share(&mut self) -> Result<LocalTrack> {
        let screen = self
            .screen
            .take()
            .ok_or_else(|| Error::InvalidState("Not screen sharing".to_string()))?;
        self.backend.release(&screen);

        let camera = self
            .camera
            .clone()
            .ok_or_else(|| Error::InvalidState("Camera track missing".to_string()))?;
        info!("Screen share stopped");
        Ok(camera)
    }
}

impl Drop for LocalMediaSession {
    fn drop(&mut self) {
        self.stop();
    }
}
