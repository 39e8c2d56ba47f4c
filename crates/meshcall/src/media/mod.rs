//! Local capture and outbound track management

pub mod devices;
pub mod manager;
pub mod track;

pub use devices::{MediaDevices, StaticSampleDevices};
pub use manager::{MediaTrackManager, VideoFanOut};
pub use track::{CaptureStream, LocalTrack, RemoteTrack, TrackKind, TrackSource};
