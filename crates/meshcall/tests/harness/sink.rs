//! Render sink that records every call

use meshcall::media::{CaptureStream, RemoteTrack};
use meshcall::RenderSink;
use parking_lot::Mutex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkCall {
    AttachRemote {
        participant_id: String,
        track_id: String,
    },
    DetachRemote(String),
    AttachLocal(String),
}

#[derive(Default)]
pub struct RecordingSink {
    calls: Mutex<Vec<SinkCall>>,
}

impl RecordingSink {
    pub fn calls(&self) -> Vec<SinkCall> {
        self.calls.lock().clone()
    }

    /// Tracks attached for one remote participant
    pub fn attached(&self, participant_id: &str) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                SinkCall::AttachRemote {
                    participant_id: p,
                    track_id,
                } if p == participant_id => Some(track_id.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn detach_count(&self, participant_id: &str) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|call| matches!(call, SinkCall::DetachRemote(p) if p == participant_id))
            .count()
    }

    pub fn local_attached(&self) -> bool {
        self.calls
            .lock()
            .iter()
            .any(|call| matches!(call, SinkCall::AttachLocal(_)))
    }
}

impl RenderSink for RecordingSink {
    fn attach_remote_stream(&self, participant_id: &str, track: &RemoteTrack) {
        self.calls.lock().push(SinkCall::AttachRemote {
            participant_id: participant_id.to_string(),
            track_id: track.track_id.clone(),
        });
    }

    fn detach_remote_stream(&self, participant_id: &str) {
        self.calls
            .lock()
            .push(SinkCall::DetachRemote(participant_id.to_string()));
    }

    fn attach_local_stream(&self, stream: &CaptureStream) {
        self.calls
            .lock()
            .push(SinkCall::AttachLocal(stream.id.clone()));
    }
}
