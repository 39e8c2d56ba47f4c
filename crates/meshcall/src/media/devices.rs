//! Capture device access

use super::track::{CaptureStream, TrackSource};
use crate::config::MediaConstraints;
use crate::{Error, Result};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info};

/// Source of local capture streams
#[async_trait]
pub trait MediaDevices: Send + Sync {
    /// Acquire microphone and camera according to `constraints`
    ///
    /// # Errors
    ///
    /// Returns [`Error::Device`] if permission is denied or no device matches.
    async fn open_user_media(&self, constraints: &MediaConstraints) -> Result<CaptureStream>;

    /// Acquire a display capture stream
    ///
    /// # Errors
    ///
    /// Returns [`Error::Device`] if the picker was cancelled or no display
    /// source exists.
    async fn open_display_media(&self, with_audio: bool) -> Result<CaptureStream>;
}

/// Devices backed by sample-fed webrtc tracks
///
/// The tracks carry whatever encoded samples the application writes into
/// them; no capture hardware is opened. Camera limits model the largest
/// mode the upstream encoder accepts.
pub struct StaticSampleDevices {
    max_width: u32,
    max_height: u32,
    camera_available: AtomicBool,
    display_available: AtomicBool,
}

impl StaticSampleDevices {
    /// Devices that accept any mode up to 1920x1080
    pub fn new() -> Self {
        Self::with_limits(1920, 1080)
    }

    /// Devices with a custom maximum camera mode
    pub fn with_limits(max_width: u32, max_height: u32) -> Self {
        Self {
            max_width,
            max_height,
            camera_available: AtomicBool::new(true),
            display_available: AtomicBool::new(true),
        }
    }

    /// Simulate plugging or unplugging the camera
    pub fn set_camera_available(&self, available: bool) {
        self.camera_available.store(available, Ordering::Release);
    }

    /// Simulate availability of a display source
    pub fn set_display_available(&self, available: bool) {
        self.display_available.store(available, Ordering::Release);
    }
}

impl Default for StaticSampleDevices {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MediaDevices for StaticSampleDevices {
    async fn open_user_media(&self, constraints: &MediaConstraints) -> Result<CaptureStream> {
        if !constraints.audio && constraints.video.is_none() {
            return Err(Error::Device(
                "At least one of audio or video must be requested".to_string(),
            ));
        }

        if let Some(video) = &constraints.video {
            if !self.camera_available.load(Ordering::Acquire) {
                return Err(Error::Device("No camera available".to_string()));
            }
            if video.width > self.max_width || video.height > self.max_height {
                return Err(Error::Device(format!(
                    "No camera mode matches {}x{} (max {}x{})",
                    video.width, video.height, self.max_width, self.max_height
                )));
            }
        }

        let stream = CaptureStream::with_sources(
            constraints.audio,
            constraints.video.map(|_| TrackSource::Camera),
        );
        info!(stream_id = %stream.id, "Opened user media");
        Ok(stream)
    }

    async fn open_display_media(&self, with_audio: bool) -> Result<CaptureStream> {
        if !self.display_available.load(Ordering::Acquire) {
            return Err(Error::Device("No display source available".to_string()));
        }

        let stream = CaptureStream::with_sources(with_audio, Some(TrackSource::Screen));
        debug!(stream_id = %stream.id, "Opened display media");
        Ok(stream)
    }
}
