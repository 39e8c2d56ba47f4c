//! Local and remote media tracks

use crate::{Error, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use webrtc::media::Sample;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

/// Media kind of a track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackKind {
    Audio,
    Video,
}

/// Where a local track's media comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackSource {
    Microphone,
    Camera,
    Screen,
}

impl TrackSource {
    /// Media kind produced by this source
    pub fn kind(&self) -> TrackKind {
        match self {
            TrackSource::Microphone => TrackKind::Audio,
            TrackSource::Camera | TrackSource::Screen => TrackKind::Video,
        }
    }
}

/// Locally captured track fed by a capture pipeline
///
/// Wraps a sample-based webrtc track. The enabled flag gates sample writes
/// without detaching the track from any RTP sender, so peers keep the
/// negotiated stream and simply stop receiving frames while it is disabled.
pub struct LocalTrack {
    id: String,
    source: TrackSource,
    rtc: Arc<TrackLocalStaticSample>,
    enabled: AtomicBool,
    ended: watch::Sender<bool>,
}

impl LocalTrack {
    /// Create a track for the given source inside `stream_id`
    pub fn new(source: TrackSource, stream_id: &str) -> Arc<Self> {
        let id = format!("{:?}-{}", source, uuid::Uuid::new_v4()).to_lowercase();

        let capability = match source.kind() {
            TrackKind::Audio => RTCRtpCodecCapability {
                mime_type: "audio/opus".to_string(),
                clock_rate: 48000,
                channels: 2,
                ..Default::default()
            },
            TrackKind::Video => RTCRtpCodecCapability {
                mime_type: "video/VP8".to_string(),
                clock_rate: 90000,
                channels: 0,
                ..Default::default()
            },
        };

        let rtc = Arc::new(TrackLocalStaticSample::new(
            capability,
            id.clone(),
            stream_id.to_string(),
        ));
        let (ended, _) = watch::channel(false);

        Arc::new(Self {
            id,
            source,
            rtc,
            enabled: AtomicBool::new(true),
            ended,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> TrackKind {
        self.source.kind()
    }

    pub fn source(&self) -> TrackSource {
        self.source
    }

    /// The webrtc track handed to RTP senders
    pub fn rtc_track(&self) -> Arc<dyn TrackLocal + Send + Sync> {
        Arc::clone(&self.rtc) as Arc<dyn TrackLocal + Send + Sync>
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    /// Write one encoded sample
    ///
    /// Returns `Ok(false)` when the sample was dropped because the track is
    /// disabled or ended.
    pub async fn write_sample(&self, sample: &Sample) -> Result<bool> {
        if !self.is_enabled() || self.is_ended() {
            return Ok(false);
        }

        self.rtc
            .write_sample(sample)
            .await
            .map_err(|e| Error::WebRtc(format!("Failed to write sample on {}: {}", self.id, e)))?;
        Ok(true)
    }

    /// End the track
    ///
    /// Returns `true` only for the call that actually ended it.
    pub fn stop(&self) -> bool {
        !self.ended.send_replace(true)
    }

    pub fn is_ended(&self) -> bool {
        *self.ended.borrow()
    }

    /// Resolve once the track has ended, whoever stopped it
    pub async fn ended(&self) {
        let mut rx = self.ended.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = rx.wait_for(|ended| *ended).await;
    }
}

impl std::fmt::Debug for LocalTrack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalTrack")
            .field("id", &self.id)
            .field("source", &self.source)
            .field("enabled", &self.is_enabled())
            .field("ended", &self.is_ended())
            .finish()
    }
}

/// A set of tracks produced by one acquisition
#[derive(Debug, Clone)]
pub struct CaptureStream {
    pub id: String,
    pub audio: Option<Arc<LocalTrack>>,
    pub video: Option<Arc<LocalTrack>>,
}

impl CaptureStream {
    /// Build a stream with fresh tracks for the requested sources
    pub fn with_sources(audio: bool, video: Option<TrackSource>) -> Self {
        let id = format!("stream-{}", uuid::Uuid::new_v4());
        Self {
            audio: audio.then(|| LocalTrack::new(TrackSource::Microphone, &id)),
            video: video.map(|source| LocalTrack::new(source, &id)),
            id,
        }
    }

    /// Stop every track in the stream
    pub fn stop(&self) {
        for track in self.audio.iter().chain(self.video.iter()) {
            track.stop();
        }
    }
}

/// Inbound track reported by a peer connection
#[derive(Clone)]
pub struct RemoteTrack {
    pub kind: TrackKind,
    pub track_id: String,
    pub stream_id: String,
    remote: Option<Arc<TrackRemote>>,
}

impl RemoteTrack {
    /// Wrap a webrtc remote track
    pub fn from_webrtc(track: Arc<TrackRemote>) -> Self {
        let kind = match track.kind() {
            RTPCodecType::Audio => TrackKind::Audio,
            _ => TrackKind::Video,
        };

        Self {
            kind,
            track_id: track.id(),
            stream_id: track.stream_id(),
            remote: Some(track),
        }
    }

    /// Describe an inbound track produced by a non-webrtc connection
    pub fn detached(kind: TrackKind, track_id: &str, stream_id: &str) -> Self {
        Self {
            kind,
            track_id: track_id.to_string(),
            stream_id: stream_id.to_string(),
            remote: None,
        }
    }

    /// Underlying webrtc track for RTP reads, if any
    pub fn webrtc_track(&self) -> Option<&Arc<TrackRemote>> {
        self.remote.as_ref()
    }
}

impl std::fmt::Debug for RemoteTrack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteTrack")
            .field("kind", &self.kind)
            .field("track_id", &self.track_id)
            .field("stream_id", &self.stream_id)
            .finish()
    }
}
