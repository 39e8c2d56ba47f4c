//! Room-internal events and caller-facing notices

use crate::peer::connection::ConnectionEvent;

/// Event posted into the room loop by connections and media observers
#[derive(Debug, Clone)]
pub enum RoomEvent {
    /// Notification from the connection of session `epoch` toward `peer_id`
    Connection {
        peer_id: String,
        epoch: u64,
        event: ConnectionEvent,
    },
    /// A screen-capture track ended outside our control
    ScreenCaptureEnded { track_id: String },
}

/// Why a participant disappeared from the visible set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalReason {
    /// The participant left the room
    Left,
    /// ICE restart did not recover the connection in time
    ConnectivityFailure,
    /// Offer, answer or candidate handling failed
    NegotiationFailure,
    /// The connection closed on its own
    ConnectionClosed,
}

/// Notification for the application layer
#[derive(Debug, Clone, PartialEq)]
pub enum RoomNotice {
    /// Our own `participant-joined` came back from the relay
    Joined {
        room_id: String,
        participant_id: String,
    },
    ParticipantAdded {
        participant_id: String,
        display_name: String,
    },
    ParticipantConnected {
        participant_id: String,
        recovered: bool,
    },
    ParticipantRemoved {
        participant_id: String,
        reason: RemovalReason,
    },
    RemoteScreenShare {
        participant_id: String,
        sharing: bool,
    },
    LocalScreenShare {
        sharing: bool,
    },
    Left {
        room_id: String,
    },
}
