//! Signaling protocol and transports for room membership and SDP/ICE exchange

pub mod protocol;
pub mod transport;
pub mod websocket;

pub use protocol::{
    CandidatePayload, IceCandidate, JoinPayload, LeavePayload, ScreenSharePayload, SdpPayload,
    SignalMessage,
};
pub use transport::{SignalingTransport, SubscriberRegistry, Subscription};
pub use websocket::WsSignalingClient;
