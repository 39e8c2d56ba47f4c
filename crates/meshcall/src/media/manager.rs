//! Local media ownership and outbound video source switching

use super::devices::MediaDevices;
use super::track::{CaptureStream, LocalTrack, TrackSource};
use crate::config::MediaConstraints;
use crate::room::events::RoomEvent;
use crate::{Error, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Receiver of outbound video substitutions
///
/// Implemented by the session arena: every registered session swaps the
/// track on its video sender without renegotiating.
#[async_trait]
pub trait VideoFanOut: Send {
    /// Replace the outbound video track everywhere
    ///
    /// Returns the participants whose substitution failed.
    async fn replace_outbound_video(&mut self, track: &Arc<LocalTrack>) -> Vec<(String, Error)>;
}

/// Owns local capture streams and the currently active outbound video track
pub struct MediaTrackManager {
    devices: Arc<dyn MediaDevices>,
    events: mpsc::UnboundedSender<RoomEvent>,
    constraints: MediaConstraints,
    camera: Option<CaptureStream>,
    screen: Option<CaptureStream>,
    screen_observer: Option<JoinHandle<()>>,
    audio_enabled: bool,
    video_enabled: bool,
}

impl MediaTrackManager {
    /// Create a manager that posts screen-capture end events to `events`
    pub fn new(devices: Arc<dyn MediaDevices>, events: mpsc::UnboundedSender<RoomEvent>) -> Self {
        Self {
            devices,
            events,
            constraints: MediaConstraints::default(),
            camera: None,
            screen: None,
            screen_observer: None,
            audio_enabled: true,
            video_enabled: true,
        }
    }

    /// Acquire microphone and camera
    ///
    /// A previously acquired camera stream is stopped and replaced.
    pub async fn acquire_camera_and_microphone(
        &mut self,
        constraints: &MediaConstraints,
    ) -> Result<()> {
        let stream = self.devices.open_user_media(constraints).await?;
        self.apply_enabled_flags(&stream);

        if let Some(previous) = self.camera.replace(stream) {
            debug!(stream_id = %previous.id, "Replacing previous camera stream");
            previous.stop();
        }
        self.constraints = constraints.clone();

        info!(
            audio = self.audio_track().is_some(),
            video = self.video_track().is_some(),
            "Local media acquired"
        );
        Ok(())
    }

    /// Camera/microphone stream, if acquired
    pub fn local_stream(&self) -> Option<&CaptureStream> {
        self.camera.as_ref()
    }

    /// Current outbound audio track
    pub fn audio_track(&self) -> Option<Arc<LocalTrack>> {
        self.camera.as_ref().and_then(|s| s.audio.clone())
    }

    /// Current outbound video track: the screen while sharing, else the camera
    pub fn video_track(&self) -> Option<Arc<LocalTrack>> {
        self.screen
            .as_ref()
            .and_then(|s| s.video.clone())
            .or_else(|| self.camera.as_ref().and_then(|s| s.video.clone()))
    }

    /// Tracks a new session should send: audio plus the current video
    pub fn outbound_tracks(&self) -> Vec<Arc<LocalTrack>> {
        self.audio_track().into_iter().chain(self.video_track()).collect()
    }

    /// Origin of the current outbound video track
    pub fn video_source(&self) -> Option<TrackSource> {
        self.video_track().map(|t| t.source())
    }

    pub fn is_screen_sharing(&self) -> bool {
        self.screen.is_some()
    }

    /// Start sharing the screen in place of the camera
    ///
    /// The new track is substituted on every session in `sessions`. Calling
    /// this while already sharing is a no-op.
    pub async fn start_screen_share<F>(&mut self, sessions: &mut F) -> Result<Vec<(String, Error)>>
    where
        F: VideoFanOut + ?Sized,
    {
        if self.is_screen_sharing() {
            debug!("Screen share already active");
            return Ok(Vec::new());
        }
        if self.camera.as_ref().and_then(|s| s.video.as_ref()).is_none() {
            return Err(Error::InvalidState(
                "No outbound video sender to substitute the screen into".to_string(),
            ));
        }

        let stream = self.devices.open_display_media(false).await?;
        let track = stream
            .video
            .clone()
            .ok_or_else(|| Error::Device("Display capture produced no video track".to_string()))?;
        track.set_enabled(self.video_enabled);

        let failures = sessions.replace_outbound_video(&track).await;

        self.screen_observer = Some(self.observe_screen_end(Arc::clone(&track)));
        self.screen = Some(stream);

        info!(track_id = %track.id(), "Screen share started");
        Ok(failures)
    }

    /// Restore the camera as the outbound video source
    ///
    /// The camera track is re-acquired if it ended while the screen was shared.
    /// If that fails the screen stays the active source and the call can be
    /// retried.
    pub async fn stop_screen_share<F>(&mut self, sessions: &mut F) -> Result<Vec<(String, Error)>>
    where
        F: VideoFanOut + ?Sized,
    {
        if !self.is_screen_sharing() {
            debug!("Screen share not active");
            return Ok(Vec::new());
        }

        let camera = self.restore_camera_video().await?;
        let failures = sessions.replace_outbound_video(&camera).await;

        if let Some(observer) = self.screen_observer.take() {
            observer.abort();
        }
        if let Some(screen) = self.screen.take() {
            screen.stop();
        }

        info!(track_id = %camera.id(), "Screen share stopped, camera restored");
        Ok(failures)
    }

    /// Whether `track_id` is the screen track currently being sent
    pub fn is_current_screen_track(&self, track_id: &str) -> bool {
        self.screen
            .as_ref()
            .and_then(|s| s.video.as_ref())
            .map(|t| t.id() == track_id)
            .unwrap_or(false)
    }

    /// Enable or mute the microphone without detaching it
    pub fn set_audio_enabled(&mut self, enabled: bool) {
        self.audio_enabled = enabled;
        if let Some(track) = self.audio_track() {
            track.set_enabled(enabled);
        }
        debug!(enabled, "Local audio toggled");
    }

    /// Enable or blank the outbound video without detaching it
    pub fn set_video_enabled(&mut self, enabled: bool) {
        self.video_enabled = enabled;
        for stream in self.camera.iter().chain(self.screen.iter()) {
            if let Some(track) = &stream.video {
                track.set_enabled(enabled);
            }
        }
        debug!(enabled, "Local video toggled");
    }

    pub fn audio_enabled(&self) -> bool {
        self.audio_enabled
    }

    pub fn video_enabled(&self) -> bool {
        self.video_enabled
    }

    /// Stop every local track
    ///
    /// Returns `false` if there was nothing left to release.
    pub fn release(&mut self) -> bool {
        if let Some(observer) = self.screen_observer.take() {
            observer.abort();
        }

        let mut released = false;
        for stream in self.screen.take().into_iter().chain(self.camera.take()) {
            stream.stop();
            released = true;
        }

        if released {
            info!("Local media released");
        }
        released
    }

    async fn restore_camera_video(&mut self) -> Result<Arc<LocalTrack>> {
        let existing = self
            .camera
            .as_ref()
            .and_then(|s| s.video.clone())
            .filter(|t| !t.is_ended());
        if let Some(track) = existing {
            return Ok(track);
        }

        warn!("Camera track ended during screen share, re-acquiring");
        let constraints = MediaConstraints {
            audio: false,
            video: self.constraints.video.or(Some(Default::default())),
        };
        let stream = self.devices.open_user_media(&constraints).await?;
        let track = stream
            .video
            .clone()
            .ok_or_else(|| Error::Device("Camera re-acquisition produced no video".to_string()))?;
        track.set_enabled(self.video_enabled);

        match self.camera.as_mut() {
            Some(camera) => camera.video = Some(Arc::clone(&track)),
            None => self.camera = Some(stream),
        }
        Ok(track)
    }

    fn observe_screen_end(&self, track: Arc<LocalTrack>) -> JoinHandle<()> {
        let events = self.events.clone();
        tokio::spawn(async move {
            track.ended().await;
            debug!(track_id = %track.id(), "Screen capture ended externally");
            let _ = events.send(RoomEvent::ScreenCaptureEnded {
                track_id: track.id().to_string(),
            });
        })
    }

    fn apply_enabled_flags(&self, stream: &CaptureStream) {
        if let Some(track) = &stream.audio {
            track.set_enabled(self.audio_enabled);
        }
        if let Some(track) = &stream.video {
            track.set_enabled(self.video_enabled);
        }
    }
}

impl Drop for MediaTrackManager {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::devices::StaticSampleDevices;

    /// Records every substitution
    #[derive(Default)]
    struct RecordingFanOut {
        replaced: Vec<String>,
    }

    #[async_trait]
    impl VideoFanOut for RecordingFanOut {
        async fn replace_outbound_video(
            &mut self,
            track: &Arc<LocalTrack>,
        ) -> Vec<(String, Error)> {
            self.replaced.push(track.id().to_string());
            Vec::new()
        }
    }

    fn manager() -> (MediaTrackManager, mpsc::UnboundedReceiver<RoomEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            MediaTrackManager::new(Arc::new(StaticSampleDevices::new()), tx),
            rx,
        )
    }

    #[tokio::test]
    async fn test_acquire_replaces_prior_camera_stream() {
        let (mut media, _rx) = manager();
        media
            .acquire_camera_and_microphone(&MediaConstraints::default())
            .await
            .unwrap();
        let first = media.video_track().unwrap();

        media
            .acquire_camera_and_microphone(&MediaConstraints::default())
            .await
            .unwrap();

        assert!(first.is_ended());
        assert_ne!(media.video_track().unwrap().id(), first.id());
    }

    #[tokio::test]
    async fn test_screen_share_switches_source_and_back() {
        let (mut media, _rx) = manager();
        let mut fan_out = RecordingFanOut::default();
        media
            .acquire_camera_and_microphone(&MediaConstraints::default())
            .await
            .unwrap();
        let camera_id = media.video_track().unwrap().id().to_string();

        media.start_screen_share(&mut fan_out).await.unwrap();
        assert_eq!(media.video_source(), Some(TrackSource::Screen));

        media.stop_screen_share(&mut fan_out).await.unwrap();
        assert_eq!(media.video_source(), Some(TrackSource::Camera));
        assert_eq!(fan_out.replaced.len(), 2);
        assert_eq!(fan_out.replaced[1], camera_id);
    }

    #[tokio::test]
    async fn test_failed_camera_restore_keeps_screen_share() {
        let devices = Arc::new(StaticSampleDevices::new());
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut media = MediaTrackManager::new(devices.clone(), tx);
        let mut fan_out = RecordingFanOut::default();
        media
            .acquire_camera_and_microphone(&MediaConstraints::default())
            .await
            .unwrap();
        media.start_screen_share(&mut fan_out).await.unwrap();
        let screen = media.video_track().unwrap();

        // Camera unplugged while sharing
        media.local_stream().unwrap().video.as_ref().unwrap().stop();
        devices.set_camera_available(false);

        let result = media.stop_screen_share(&mut fan_out).await;
        assert!(matches!(result, Err(Error::Device(_))));
        assert!(media.is_screen_sharing());
        assert!(media.is_current_screen_track(screen.id()));
        assert!(!screen.is_ended());
        assert_eq!(fan_out.replaced, vec![screen.id().to_string()]);

        devices.set_camera_available(true);
        media.stop_screen_share(&mut fan_out).await.unwrap();

        let camera = media.video_track().unwrap();
        assert!(!media.is_screen_sharing());
        assert!(screen.is_ended());
        assert_eq!(camera.source(), TrackSource::Camera);
        assert!(!camera.is_ended());
        assert_eq!(fan_out.replaced.last().map(String::as_str), Some(camera.id()));
    }

    #[tokio::test]
    async fn test_screen_share_twice_is_noop() {
        let (mut media, _rx) = manager();
        let mut fan_out = RecordingFanOut::default();
        media
            .acquire_camera_and_microphone(&MediaConstraints::default())
            .await
            .unwrap();

        media.start_screen_share(&mut fan_out).await.unwrap();
        media.start_screen_share(&mut fan_out).await.unwrap();
        assert_eq!(fan_out.replaced.len(), 1);
    }

    #[tokio::test]
    async fn test_screen_share_without_video_sender_fails() {
        let (mut media, _rx) = manager();
        let mut fan_out = RecordingFanOut::default();
        media
            .acquire_camera_and_microphone(&MediaConstraints {
                audio: true,
                video: None,
            })
            .await
            .unwrap();

        let result = media.start_screen_share(&mut fan_out).await;
        assert!(matches!(result, Err(Error::InvalidState(_))));
    }

    #[tokio::test]
    async fn test_external_stop_posts_event() {
        let (mut media, mut rx) = manager();
        let mut fan_out = RecordingFanOut::default();
        media
            .acquire_camera_and_microphone(&MediaConstraints::default())
            .await
            .unwrap();
        media.start_screen_share(&mut fan_out).await.unwrap();

        let screen = media.video_track().unwrap();
        screen.stop();

        match rx.recv().await {
            Some(RoomEvent::ScreenCaptureEnded { track_id }) => {
                assert!(media.is_current_screen_track(&track_id));
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_toggles_keep_tracks_attached() {
        let (mut media, _rx) = manager();
        media
            .acquire_camera_and_microphone(&MediaConstraints::default())
            .await
            .unwrap();

        media.set_audio_enabled(false);
        media.set_video_enabled(false);

        let audio = media.audio_track().unwrap();
        let video = media.video_track().unwrap();
        assert!(!audio.is_enabled() && !audio.is_ended());
        assert!(!video.is_enabled() && !video.is_ended());
    }

    #[tokio::test]
    async fn test_release_is_idempotent() {
        let (mut media, _rx) = manager();
        media
            .acquire_camera_and_microphone(&MediaConstraints::default())
            .await
            .unwrap();
        let audio = media.audio_track().unwrap();

        assert!(media.release());
        assert!(!media.release());
        assert!(audio.is_ended());
        assert!(media.video_track().is_none());
    }
}
