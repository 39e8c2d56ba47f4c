//! Error types for call negotiation and session lifecycle

/// Result type alias using the call Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while joining, negotiating or leaving a call
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid configuration parameter
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Capture or display device denied, cancelled or unavailable
    #[error("Device error: {0}")]
    Device(String),

    /// Malformed or unexpected SDP / ICE candidate
    #[error("Negotiation error: {0}")]
    Negotiation(String),

    /// Connection failed and ICE restart did not recover it
    #[error("Connectivity failure: {0}")]
    ConnectivityFailure(String),

    /// Signaling delivery failure
    #[error("Signaling transport error: {0}")]
    Transport(String),

    /// No session for the given participant
    #[error("Peer not found: {0}")]
    PeerNotFound(String),

    /// Operation not valid in the current room or session state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// WebRTC library setup error
    #[error("WebRTC error: {0}")]
    WebRtc(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Any other error
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Check if this error is retryable
    ///
    /// Device errors are only retried when the user asks again, so they do
    /// not count here.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Transport(_) | Error::ConnectivityFailure(_) | Error::Io(_)
        )
    }

    /// Check if this error ends the whole call
    pub fn is_fatal_to_room(&self) -> bool {
        matches!(
            self,
            Error::Device(_) | Error::Transport(_) | Error::InvalidConfig(_)
        )
    }

    /// Check if this error is confined to a single peer session
    pub fn is_session_scoped(&self) -> bool {
        matches!(
            self,
            Error::Negotiation(_) | Error::ConnectivityFailure(_) | Error::PeerNotFound(_)
        )
    }
}
