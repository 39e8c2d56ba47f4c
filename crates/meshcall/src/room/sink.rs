//! Rendering surface for local and remote media

use crate::media::track::{CaptureStream, RemoteTrack};
use tracing::info;

/// Where the application renders media
///
/// Calls come from the room loop and must not block.
pub trait RenderSink: Send + Sync {
    /// Show inbound media from `participant_id`
    ///
    /// Called once per inbound track.
    fn attach_remote_stream(&self, participant_id: &str, track: &RemoteTrack);

    /// Remove everything shown for `participant_id`
    fn detach_remote_stream(&self, participant_id: &str);

    /// Show the local preview
    fn attach_local_stream(&self, stream: &CaptureStream);
}

/// Sink that only logs, for headless clients
#[derive(Debug, Default)]
pub struct LoggingSink;

impl RenderSink for LoggingSink {
    fn attach_remote_stream(&self, participant_id: &str, track: &RemoteTrack) {
        info!(
            participant_id,
            track_id = %track.track_id,
            stream_id = %track.stream_id,
            kind = ?track.kind,
            "Remote stream attached"
        );
    }

    fn detach_remote_stream(&self, participant_id: &str) {
        info!(participant_id, "Remote stream detached");
    }

    fn attach_local_stream(&self, stream: &CaptureStream) {
        info!(
            stream_id = %stream.id,
            audio = stream.audio.is_some(),
            video = stream.video.is_some(),
            "Local stream attached"
        );
    }
}
