//! Peer negotiation and session lifecycle for audio/video calls
//!
//! This crate establishes WebRTC media sessions between participants of a
//! call room over an asynchronous signaling relay, in two variants sharing
//! one protocol: a two-party call and an N-party mesh room.
//!
//! # Features
//!
//! - **Mesh topology**: One peer session per remote participant
//! - **Race tolerant**: Early ICE candidates are queued, offer collisions
//!   resolved deterministically
//! - **Screen sharing**: Outbound video substitution without renegotiation
//! - **Recovery**: ICE restart on failure, bounded by a recovery window
//! - **JSON signaling**: `{"event", "data"}` frames over WebSocket
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │  SignalingTransport (WebSocket / in-memory relay)    │
//! │  ↓ Subscription                                      │
//! │  CallRoom (single event loop)                        │
//! │  ├─ MediaTrackManager (camera / screen / mic)        │
//! │  ├─ SessionArena                                     │
//! │  │   └─ PeerSession ── MediaConnection (webrtc-rs)   │
//! │  │       └─ IceCandidateQueue                        │
//! │  └─ RenderSink (application rendering surface)       │
//! └──────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use meshcall::{CallConfig, CallMode};
//!
//! let config = CallConfig::mesh("ws://localhost:8080", 8);
//! assert!(config.validate().is_ok());
//! assert_eq!(config.mode, CallMode::Mesh);
//! ```
//!
//! ## Async Usage
//!
//! ```no_run
//! use meshcall::{
//!     CallConfig, CallRoom, LocalParticipant, LoggingSink, RtcConnectionFactory,
//!     StaticSampleDevices, WsSignalingClient,
//! };
//! use std::sync::Arc;
//!
//! # async fn example() -> meshcall::Result<()> {
//! let config = CallConfig::pair("ws://localhost:8080");
//! let signaling = WsSignalingClient::connect(&config.signaling_url).await?;
//! let factory = RtcConnectionFactory::new(&config)?;
//!
//! let mut room = CallRoom::new(
//!     config,
//!     Arc::new(signaling),
//!     Arc::new(factory),
//!     Arc::new(StaticSampleDevices::new()),
//!     Arc::new(LoggingSink),
//! )?;
//! room.join("r1", LocalParticipant::generated("Alice")).await?;
//! room.run().await?;
//! # Ok(())
//! # }
//! ```

#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod media;
pub mod peer;
pub mod room;
pub mod signaling;

pub use config::{
    CallConfig, CallMode, ConfigOptions, MediaConstraints, TurnServerConfig, VideoConstraints,
};
pub use error::{Error, Result};
pub use media::{
    CaptureStream, LocalTrack, MediaDevices, MediaTrackManager, RemoteTrack, StaticSampleDevices,
    TrackKind, TrackSource,
};
pub use peer::{
    ConnectionFactory, IceCandidateQueue, MediaConnection, PeerSession, RecoveryPolicy, Role,
    RtcConnectionFactory, SessionState,
};
pub use room::{
    CallRoom, LocalParticipant, LoggingSink, ParticipantInfo, RemovalReason, RenderSink,
    RoomNotice, RoomState,
};
pub use signaling::{IceCandidate, SignalMessage, SignalingTransport, WsSignalingClient};

/// Get the version of this crate
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!version().is_empty());
    }
}
