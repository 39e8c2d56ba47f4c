//! Call room coordination

pub mod arena;
pub mod coordinator;
pub mod events;
pub mod sink;

pub use arena::{ParticipantInfo, SessionArena};
pub use coordinator::{CallRoom, LocalParticipant, RoomState};
pub use events::{RemovalReason, RoomEvent, RoomNotice};
pub use sink::{LoggingSink, RenderSink};
