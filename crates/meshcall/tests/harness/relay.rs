//! In-memory room relay
//!
//! Mirrors what the signaling server does: `join` is echoed as
//! `participant-joined` to every member including the sender, `leave` becomes
//! `participant-left` for the others, and peer messages are routed by `toId`
//! or broadcast to everyone else when unaddressed.

use async_trait::async_trait;
use meshcall::signaling::{
    JoinPayload, LeavePayload, SignalMessage, SignalingTransport, SubscriberRegistry, Subscription,
};
use meshcall::{Error, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

struct Member {
    participant_id: String,
    registry: Arc<SubscriberRegistry>,
}

#[derive(Default)]
struct HubState {
    rooms: HashMap<String, Vec<Member>>,
    log: Vec<SignalMessage>,
}

/// Relay shared by every endpoint of a test
#[derive(Default)]
pub struct MemoryHub {
    state: Mutex<HubState>,
}

impl MemoryHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Transport handle for one participant
    pub fn endpoint(self: &Arc<Self>) -> Arc<HubEndpoint> {
        Arc::new(HubEndpoint {
            hub: Arc::clone(self),
            registry: SubscriberRegistry::new(),
            offline: AtomicBool::new(false),
        })
    }

    /// Every message sent through the relay, in order
    pub fn sent(&self) -> Vec<SignalMessage> {
        self.state.lock().log.clone()
    }

    /// Number of sent messages with the given wire name
    pub fn count(&self, event: &str) -> usize {
        self.state
            .lock()
            .log
            .iter()
            .filter(|m| m.event_name() == event)
            .count()
    }

    /// Number of sent messages with the given wire name from one participant
    pub fn count_from(&self, event: &str, from: &str) -> usize {
        self.state
            .lock()
            .log
            .iter()
            .filter(|m| m.event_name() == event && m.sender_id() == from)
            .count()
    }

    /// Deliver a message to one member as if the relay produced it
    pub fn inject(&self, room_id: &str, to: &str, message: SignalMessage) -> bool {
        let state = self.state.lock();
        let Some(member) = state
            .rooms
            .get(room_id)
            .and_then(|members| members.iter().find(|m| m.participant_id == to))
        else {
            return false;
        };
        member.registry.dispatch(&message);
        true
    }

    /// Current members of a room
    pub fn members(&self, room_id: &str) -> Vec<String> {
        self.state
            .lock()
            .rooms
            .get(room_id)
            .map(|members| members.iter().map(|m| m.participant_id.clone()).collect())
            .unwrap_or_default()
    }

    fn route(&self, registry: &Arc<SubscriberRegistry>, message: SignalMessage) {
        let mut state = self.state.lock();
        state.log.push(message.clone());

        let room_id = message.room_id().to_string();
        let sender = message.sender_id().to_string();
        let members = state.rooms.entry(room_id.clone()).or_default();

        let (outbound, targets): (SignalMessage, Vec<Arc<SubscriberRegistry>>) = match &message {
            SignalMessage::Join(payload) => {
                if !members.iter().any(|m| m.participant_id == sender) {
                    members.push(Member {
                        participant_id: sender.clone(),
                        registry: Arc::clone(registry),
                    });
                }
                let joined = SignalMessage::ParticipantJoined(JoinPayload {
                    room_id: room_id.clone(),
                    participant_id: sender.clone(),
                    display_name: payload.display_name.clone(),
                });
                (joined, members.iter().map(|m| Arc::clone(&m.registry)).collect())
            }
            SignalMessage::Leave(_) => {
                members.retain(|m| m.participant_id != sender);
                let left = SignalMessage::ParticipantLeft(LeavePayload {
                    room_id: room_id.clone(),
                    participant_id: sender.clone(),
                });
                (left, members.iter().map(|m| Arc::clone(&m.registry)).collect())
            }
            other => {
                let targets = match other.recipient() {
                    Some(to) => members
                        .iter()
                        .filter(|m| m.participant_id == to)
                        .map(|m| Arc::clone(&m.registry))
                        .collect(),
                    None => members
                        .iter()
                        .filter(|m| m.participant_id != sender)
                        .map(|m| Arc::clone(&m.registry))
                        .collect(),
                };
                (message.clone(), targets)
            }
        };

        debug!(
            event = outbound.event_name(),
            from = %sender,
            targets = targets.len(),
            "Relaying message"
        );
        for target in targets {
            target.dispatch(&outbound);
        }
    }
}

/// One participant's connection to the [`MemoryHub`]
pub struct HubEndpoint {
    hub: Arc<MemoryHub>,
    registry: Arc<SubscriberRegistry>,
    offline: AtomicBool,
}

impl HubEndpoint {
    /// Make every following send fail with a transport error
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::Release);
    }

    /// Drop the inbound stream as a closed socket would
    pub fn disconnect(&self) -> usize {
        self.registry.close()
    }

    /// Live inbound subscriptions on this endpoint
    pub fn subscribers(&self) -> usize {
        self.registry.len()
    }
}

#[async_trait]
impl SignalingTransport for HubEndpoint {
    async fn send(&self, message: SignalMessage) -> Result<()> {
        if self.offline.load(Ordering::Acquire) {
            return Err(Error::Transport("Relay unreachable".to_string()));
        }
        self.hub.route(&self.registry, message);
        Ok(())
    }

    fn subscribe(&self) -> Subscription {
        self.registry.subscribe()
    }
}
