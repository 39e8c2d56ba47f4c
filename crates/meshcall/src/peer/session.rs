//! Negotiation state machine for one remote participant

use super::candidate_queue::IceCandidateQueue;
use super::connection::{ConnectionFactory, MediaConnection, PeerEventSender, PeerState, SdpKind};
use super::lifecycle::{Recovery, RecoveryPolicy, RecoveryStep};
use crate::media::track::LocalTrack;
use crate::signaling::{CandidatePayload, IceCandidate, SdpPayload, SignalMessage};
use crate::{Error, Result};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

pub use super::connection::IceState;

/// Negotiation role, fixed when the session is created
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Creates the offer
    Initiator,
    /// Answers the remote offer
    Responder,
}

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    New,
    Negotiating,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

/// Result of feeding a connection-state change into the session
#[derive(Debug, Clone, PartialEq)]
pub enum StateOutcome {
    /// Nothing visible changed
    Unchanged,
    /// Reached connected; `recovered` if this ended a recovery window
    Connected { recovered: bool },
    Disconnected,
    /// Recovery is under way and an ICE-restart offer must be sent
    RestartOffer(SignalMessage),
    /// Recovery is under way, waiting on the remote or the deadline
    Recovering,
    /// The connection closed on its own
    Closed,
}

/// Addressing used for outbound negotiation messages
#[derive(Debug, Clone)]
pub struct Envelope {
    pub room_id: String,
    pub local_id: String,
    /// Whether `toId` is set (mesh rooms)
    pub addressed: bool,
}

/// One peer-to-peer session toward a remote participant
pub struct PeerSession {
    remote_id: String,
    display_name: String,
    role: Role,
    epoch: u64,
    state: SessionState,
    ice_state: IceState,
    connection: Option<Arc<dyn MediaConnection>>,
    queue: IceCandidateQueue,
    recovery: Recovery,
    envelope: Envelope,
    awaiting_answer: bool,
    remote_sharing: bool,
}

impl PeerSession {
    pub fn new(
        remote_id: &str,
        display_name: &str,
        role: Role,
        epoch: u64,
        envelope: Envelope,
        policy: RecoveryPolicy,
    ) -> Self {
        Self {
            remote_id: remote_id.to_string(),
            display_name: display_name.to_string(),
            role,
            epoch,
            state: SessionState::New,
            ice_state: IceState::New,
            connection: None,
            queue: IceCandidateQueue::new(),
            recovery: Recovery::new(policy),
            envelope,
            awaiting_answer: false,
            remote_sharing: false,
        }
    }

    pub fn remote_id(&self) -> &str {
        &self.remote_id
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn ice_state(&self) -> IceState {
        self.ice_state
    }

    pub fn is_closed(&self) -> bool {
        self.state == SessionState::Closed
    }

    /// Whether our own offer is still unanswered
    pub fn is_awaiting_answer(&self) -> bool {
        self.awaiting_answer
    }

    pub fn remote_sharing(&self) -> bool {
        self.remote_sharing
    }

    /// Record the remote participant's screen-share flag
    ///
    /// The remote side substitutes its own track; the inbound track is reused.
    pub fn set_remote_sharing(&mut self, sharing: bool) {
        self.remote_sharing = sharing;
    }

    pub fn queued_candidates(&self) -> usize {
        self.queue.len()
    }

    pub fn recovery_deadline(&self) -> Option<Instant> {
        self.recovery.deadline()
    }

    /// Create the connection and attach local tracks
    ///
    /// An initiator also produces the offer to send.
    #[instrument(skip_all, fields(peer_id = %self.remote_id, role = ?self.role))]
    pub async fn start(
        &mut self,
        factory: &dyn ConnectionFactory,
        events: PeerEventSender,
        tracks: &[Arc<LocalTrack>],
    ) -> Result<Option<SignalMessage>> {
        if self.state != SessionState::New {
            return Err(Error::InvalidState(format!(
                "Session with {} already started ({:?})",
                self.remote_id, self.state
            )));
        }

        let connection = factory.create(&self.remote_id, events).await?;
        self.connection = Some(Arc::clone(&connection));
        self.state = SessionState::Negotiating;

        for track in tracks {
            connection.add_track(track).await?;
        }

        match self.role {
            Role::Initiator => {
                let sdp = connection.create_offer(false).await?;
                self.awaiting_answer = true;
                info!("Sending offer");
                Ok(Some(self.sdp_message(SdpKind::Offer, sdp)))
            }
            Role::Responder => {
                debug!("Waiting for offer");
                Ok(None)
            }
        }
    }

    /// Apply a remote offer and produce the answer
    ///
    /// Also serves renegotiation and ICE-restart offers on an established
    /// session. Rejected while our own offer is outstanding.
    pub async fn handle_offer(&mut self, sdp: String) -> Result<SignalMessage> {
        let connection = self.live_connection()?;
        if self.awaiting_answer {
            return Err(Error::Negotiation(format!(
                "Offer from {} collides with our own pending offer",
                self.remote_id
            )));
        }

        connection.set_remote_description(SdpKind::Offer, sdp).await?;
        self.apply_queued(&connection).await?;

        let answer = connection.create_answer().await?;
        debug!(peer_id = %self.remote_id, "Sending answer");
        Ok(self.sdp_message(SdpKind::Answer, answer))
    }

    /// Apply the remote answer to our offer
    pub async fn handle_answer(&mut self, sdp: String) -> Result<()> {
        let connection = self.live_connection()?;
        if !self.awaiting_answer {
            return Err(Error::Negotiation(format!(
                "Unexpected answer from {}",
                self.remote_id
            )));
        }

        connection
            .set_remote_description(SdpKind::Answer, sdp)
            .await?;
        self.awaiting_answer = false;
        debug!(peer_id = %self.remote_id, "Answer applied");

        self.apply_queued(&connection).await
    }

    /// Apply a remote candidate, or queue it until the remote description is set
    ///
    /// Returns `true` if the candidate was applied right away.
    pub async fn handle_candidate(&mut self, candidate: IceCandidate) -> Result<bool> {
        if self.is_closed() {
            return Ok(false);
        }

        let connection = match &self.connection {
            Some(connection) if connection.has_remote_description().await => {
                Arc::clone(connection)
            }
            _ => {
                self.queue.enqueue(candidate);
                debug!(
                    peer_id = %self.remote_id,
                    queued = self.queue.len(),
                    "Candidate queued until remote description"
                );
                return Ok(false);
            }
        };

        connection.add_ice_candidate(candidate).await?;
        Ok(true)
    }

    /// Queue a candidate received before this session existed
    pub fn enqueue_candidate(&mut self, candidate: IceCandidate) {
        self.queue.enqueue(candidate);
    }

    /// Wrap a locally gathered candidate for the remote side
    pub fn candidate_message(&self, candidate: IceCandidate) -> SignalMessage {
        SignalMessage::Candidate(CandidatePayload {
            room_id: self.envelope.room_id.clone(),
            candidate,
            from_id: self.envelope.local_id.clone(),
            to_id: self.recipient(),
        })
    }

    pub fn on_ice_state(&mut self, state: IceState) {
        if self.ice_state != state {
            debug!(peer_id = %self.remote_id, from = ?self.ice_state, to = ?state, "ICE state");
            self.ice_state = state;
        }
    }

    /// Feed a connection-state change into the state machine
    pub async fn on_connection_state(
        &mut self,
        state: PeerState,
        now: Instant,
    ) -> Result<StateOutcome> {
        if self.is_closed() || self.state == SessionState::Failed {
            return Ok(StateOutcome::Unchanged);
        }

        let outcome = match state {
            PeerState::New | PeerState::Connecting => StateOutcome::Unchanged,
            PeerState::Connected => {
                let recovered = self.recovery.on_connected();
                if self.state == SessionState::Connected {
                    StateOutcome::Unchanged
                } else {
                    self.state = SessionState::Connected;
                    StateOutcome::Connected { recovered }
                }
            }
            PeerState::Disconnected => {
                if self.state == SessionState::Connected {
                    self.state = SessionState::Disconnected;
                    StateOutcome::Disconnected
                } else {
                    StateOutcome::Unchanged
                }
            }
            PeerState::Failed => self.begin_recovery(now).await?,
            PeerState::Closed => StateOutcome::Closed,
        };

        if outcome != StateOutcome::Unchanged {
            debug!(peer_id = %self.remote_id, state = ?self.state, "Session state changed");
        }
        Ok(outcome)
    }

    /// Start or continue recovery after a `failed` report
    ///
    /// The initiator restarts ICE; the responder waits for the restart offer.
    pub async fn begin_recovery(&mut self, now: Instant) -> Result<StateOutcome> {
        let connection = self.live_connection()?;
        self.state = SessionState::Disconnected;

        let can_restart = self.role == Role::Initiator;
        match self.recovery.on_failure(now, can_restart) {
            RecoveryStep::Restart { attempt } => {
                warn!(peer_id = %self.remote_id, attempt, "Connection failed, restarting ICE");
                let sdp = connection.create_offer(true).await?;
                self.awaiting_answer = true;
                Ok(StateOutcome::RestartOffer(
                    self.sdp_message(SdpKind::Offer, sdp),
                ))
            }
            RecoveryStep::Wait => Ok(StateOutcome::Recovering),
        }
    }

    /// Mark the session failed if its recovery window has closed
    pub fn check_recovery(&mut self, now: Instant) -> bool {
        if self.is_closed() || !self.recovery.is_expired(now) {
            return false;
        }
        self.state = SessionState::Failed;
        true
    }

    /// Mark the session failed after a negotiation error
    pub fn fail(&mut self) {
        if !self.is_closed() {
            self.state = SessionState::Failed;
        }
    }

    /// Put `track` on the outbound video sender
    pub async fn replace_video(&self, track: &Arc<LocalTrack>) -> Result<()> {
        let connection = self.live_connection()?;
        connection.replace_video_track(track).await
    }

    /// Tear down the session
    ///
    /// Returns `false` if it was already closed.
    pub async fn close(&mut self) -> bool {
        if self.is_closed() {
            return false;
        }
        self.state = SessionState::Closed;
        self.awaiting_answer = false;

        let dropped = self.queue.clear();
        if dropped > 0 {
            debug!(peer_id = %self.remote_id, dropped, "Discarded queued candidates");
        }

        if let Some(connection) = self.connection.take() {
            if let Err(e) = connection.close().await {
                warn!(peer_id = %self.remote_id, "Error closing connection: {}", e);
            }
        }

        info!(peer_id = %self.remote_id, "Session closed");
        true
    }

    async fn apply_queued(&mut self, connection: &Arc<dyn MediaConnection>) -> Result<()> {
        let ready = connection.has_remote_description().await;
        let candidates = self.queue.drain_if_ready(ready);
        if candidates.is_empty() {
            return Ok(());
        }

        debug!(peer_id = %self.remote_id, count = candidates.len(), "Applying queued candidates");
        for candidate in candidates {
            connection.add_ice_candidate(candidate).await?;
        }
        Ok(())
    }

    fn live_connection(&self) -> Result<Arc<dyn MediaConnection>> {
        match &self.connection {
            Some(connection) if !self.is_closed() => Ok(Arc::clone(connection)),
            _ => Err(Error::InvalidState(format!(
                "Session with {} is not active ({:?})",
                self.remote_id, self.state
            ))),
        }
    }

    fn recipient(&self) -> Option<String> {
        self.envelope.addressed.then(|| self.remote_id.clone())
    }

    fn sdp_message(&self, kind: SdpKind, sdp: String) -> SignalMessage {
        let payload = SdpPayload {
            room_id: self.envelope.room_id.clone(),
            sdp,
            from_id: self.envelope.local_id.clone(),
            to_id: self.recipient(),
        };
        match kind {
            SdpKind::Offer => SignalMessage::Offer(payload),
            SdpKind::Answer => SignalMessage::Answer(payload),
        }
    }
}

impl std::fmt::Debug for PeerSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerSession")
            .field("remote_id", &self.remote_id)
            .field("role", &self.role)
            .field("epoch", &self.epoch)
            .field("state", &self.state)
            .field("ice_state", &self.ice_state)
            .field("queued", &self.queue.len())
            .field("remote_sharing", &self.remote_sharing)
            .finish()
    }
}
