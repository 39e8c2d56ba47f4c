//! Signaling transport abstraction
//!
//! The room coordinator is the only consumer of a transport. Inbound messages
//! are delivered through an explicit [`Subscription`] that the coordinator owns
//! and releases exactly once on teardown.

use super::protocol::SignalMessage;
use crate::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tracing::debug;

/// Bidirectional named-event channel to a logical room
#[async_trait]
pub trait SignalingTransport: Send + Sync {
    /// Deliver a message to the room relay
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Transport`] if the message could not be handed
    /// to the relay.
    async fn send(&self, message: SignalMessage) -> Result<()>;

    /// Register for inbound messages
    fn subscribe(&self) -> Subscription;
}

/// Fan-out table of inbound subscribers
///
/// Shared by transport implementations: the reader side calls
/// [`SubscriberRegistry::dispatch`] for each decoded message and
/// [`SubscriberRegistry::close`] once the inbound stream ends.
///
/// # Example
///
/// ```
/// use meshcall::signaling::{LeavePayload, SignalMessage, SubscriberRegistry};
///
/// # tokio_test::block_on(async {
/// let registry = SubscriberRegistry::new();
/// let mut sub = registry.subscribe();
///
/// registry.dispatch(&SignalMessage::ParticipantLeft(LeavePayload {
///     room_id: "r1".to_string(),
///     participant_id: "bob".to_string(),
/// }));
/// let received = sub.recv().await.map(|m| m.event_name());
/// assert_eq!(received, Some("participant-left"));
/// # });
/// ```
#[derive(Default)]
pub struct SubscriberRegistry {
    next_id: AtomicU64,
    subscribers: Mutex<Subscribers>,
}

#[derive(Default)]
struct Subscribers {
    senders: HashMap<u64, mpsc::UnboundedSender<SignalMessage>>,
    closed: bool,
}

impl SubscriberRegistry {
    /// Create an empty registry
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Add a subscriber
    ///
    /// On a closed registry the returned handle yields `None` right away.
    pub fn subscribe(self: &Arc<Self>) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();

        let mut subscribers = self.subscribers.lock();
        if subscribers.closed {
            drop(tx);
            debug!("Signaling subscriber {} registered on a closed transport", id);
        } else {
            subscribers.senders.insert(id, tx);
            debug!("Signaling subscriber {} registered", id);
        }
        drop(subscribers);

        Subscription {
            id,
            rx,
            registry: Arc::downgrade(self),
            active: true,
            ended: false,
        }
    }

    /// Deliver a message to every live subscriber, pruning closed ones
    pub fn dispatch(&self, message: &SignalMessage) -> usize {
        let mut subscribers = self.subscribers.lock();
        subscribers
            .senders
            .retain(|_, tx| tx.send(message.clone()).is_ok());
        subscribers.senders.len()
    }

    /// End every inbound stream
    ///
    /// Subscribers see `None` after draining what was already dispatched.
    /// Returns how many subscribers were still registered.
    pub fn close(&self) -> usize {
        let mut subscribers = self.subscribers.lock();
        subscribers.closed = true;
        let count = subscribers.senders.len();
        subscribers.senders.clear();
        count
    }

    /// Whether the inbound stream has ended
    pub fn is_closed(&self) -> bool {
        self.subscribers.lock().closed
    }

    /// Number of registered subscribers
    pub fn len(&self) -> usize {
        self.subscribers.lock().senders.len()
    }

    /// Whether no subscriber is registered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn remove(&self, id: u64) -> bool {
        self.subscribers.lock().senders.remove(&id).is_some()
    }
}

/// Handle to an inbound message stream
///
/// Dropping the handle unsubscribes as well.
pub struct Subscription {
    id: u64,
    rx: mpsc::UnboundedReceiver<SignalMessage>,
    registry: Weak<SubscriberRegistry>,
    active: bool,
    ended: bool,
}

impl Subscription {
    /// Wait for the next inbound message
    ///
    /// Returns `None` once unsubscribed or when the transport is gone.
    pub async fn recv(&mut self) -> Option<SignalMessage> {
        if !self.active {
            return None;
        }
        let message = self.rx.recv().await;
        if message.is_none() {
            self.ended = true;
        }
        message
    }

    /// Take the next message if one is already queued
    pub fn try_recv(&mut self) -> Option<SignalMessage> {
        if !self.active {
            return None;
        }
        match self.rx.try_recv() {
            Ok(message) => Some(message),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => {
                self.ended = true;
                None
            }
        }
    }

    /// Whether this handle still receives messages
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Whether the transport ended the stream while we were subscribed
    pub fn is_ended(&self) -> bool {
        self.ended
    }

    /// Stop receiving messages
    ///
    /// Returns `true` only on the call that actually removed the subscriber.
    pub fn unsubscribe(&mut self) -> bool {
        if !self.active {
            return false;
        }
        self.active = false;
        self.rx.close();

        let removed = self
            .registry
            .upgrade()
            .map(|registry| registry.remove(self.id))
            .unwrap_or(false);

        debug!("Signaling subscriber {} unsubscribed", self.id);
        removed
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}
