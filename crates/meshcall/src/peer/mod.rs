//! Per-participant peer sessions

pub mod candidate_queue;
pub mod connection;
pub mod lifecycle;
pub mod session;

pub use candidate_queue::IceCandidateQueue;
pub use connection::{
    ConnectionEvent, ConnectionFactory, IceState, MediaConnection, PeerEventSender, PeerState,
    RtcConnection, RtcConnectionFactory, SdpKind,
};
pub use lifecycle::{Recovery, RecoveryPolicy, RecoveryStep};
pub use session::{Envelope, PeerSession, Role, SessionState, StateOutcome};
