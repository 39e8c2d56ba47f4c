//! Call room coordinator
//!
//! One [`CallRoom`] governs one call. It owns the signaling subscription, the
//! local media and one [`PeerSession`] per remote participant, and runs every
//! state transition from a single event loop.

use super::arena::{ParticipantInfo, SessionArena};
use super::events::{RemovalReason, RoomEvent, RoomNotice};
use super::sink::RenderSink;
use crate::config::{CallConfig, CallMode};
use crate::media::devices::MediaDevices;
use crate::media::manager::MediaTrackManager;
use crate::peer::connection::{ConnectionEvent, ConnectionFactory, PeerEventSender};
use crate::peer::lifecycle::RecoveryPolicy;
use crate::peer::session::{Envelope, PeerSession, Role, StateOutcome};
use crate::signaling::{
    CandidatePayload, JoinPayload, LeavePayload, ScreenSharePayload, SdpPayload, SignalMessage,
    SignalingTransport, Subscription,
};
use crate::{Error, Result};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, instrument, warn};

/// Notice channel capacity; slow subscribers see `Lagged`
const NOTICE_CAPACITY: usize = 64;

/// The local party of a call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalParticipant {
    pub id: String,
    pub display_name: String,
}

impl LocalParticipant {
    pub fn new(id: &str, display_name: &str) -> Self {
        Self {
            id: id.to_string(),
            display_name: display_name.to_string(),
        }
    }

    /// Participant with a random id
    pub fn generated(display_name: &str) -> Self {
        Self::new(&uuid::Uuid::new_v4().to_string(), display_name)
    }
}

/// Room lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomState {
    /// Not joined yet
    Idle,
    /// `join` sent, our own `participant-joined` not seen yet
    Joining,
    /// Membership confirmed by the relay
    Joined,
    /// Torn down; terminal
    Left,
}

enum Wake {
    Signal(Option<SignalMessage>),
    Event(Option<RoomEvent>),
    Deadline,
}

/// Coordinator for one call room
pub struct CallRoom {
    config: CallConfig,
    policy: RecoveryPolicy,
    transport: Arc<dyn SignalingTransport>,
    factory: Arc<dyn ConnectionFactory>,
    sink: Arc<dyn RenderSink>,
    media: MediaTrackManager,
    sessions: SessionArena,
    subscription: Option<Subscription>,
    events_tx: mpsc::UnboundedSender<RoomEvent>,
    events_rx: mpsc::UnboundedReceiver<RoomEvent>,
    notices: broadcast::Sender<RoomNotice>,
    local: LocalParticipant,
    room_id: String,
    state: RoomState,
    next_epoch: u64,
}

impl CallRoom {
    /// Create a room coordinator
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if `config` does not validate.
    pub fn new(
        config: CallConfig,
        transport: Arc<dyn SignalingTransport>,
        factory: Arc<dyn ConnectionFactory>,
        devices: Arc<dyn MediaDevices>,
        sink: Arc<dyn RenderSink>,
    ) -> Result<Self> {
        config.validate()?;

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (notices, _) = broadcast::channel(NOTICE_CAPACITY);

        Ok(Self {
            policy: RecoveryPolicy::from_config(&config),
            sessions: SessionArena::new(
                config.max_peers as usize,
                config.options.early_candidate_limit,
            ),
            media: MediaTrackManager::new(devices, events_tx.clone()),
            config,
            transport,
            factory,
            sink,
            subscription: None,
            events_tx,
            events_rx,
            notices,
            local: LocalParticipant::new("", ""),
            room_id: String::new(),
            state: RoomState::Idle,
            next_epoch: 0,
        })
    }

    pub fn state(&self) -> RoomState {
        self.state
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    pub fn local_participant(&self) -> &LocalParticipant {
        &self.local
    }

    pub fn is_active(&self) -> bool {
        matches!(self.state, RoomState::Joining | RoomState::Joined)
    }

    pub fn media(&self) -> &MediaTrackManager {
        &self.media
    }

    pub fn session(&self, participant_id: &str) -> Option<&PeerSession> {
        self.sessions.get(participant_id)
    }

    /// Visible remote participants in join order
    pub fn participants(&self) -> Vec<ParticipantInfo> {
        self.sessions.participants()
    }

    pub fn subscribe_notices(&self) -> broadcast::Receiver<RoomNotice> {
        self.notices.subscribe()
    }

    /// Acquire local media and announce ourselves to the room
    ///
    /// # Errors
    ///
    /// [`Error::Device`] if capture cannot start; the room stays idle and
    /// `join` may be retried. [`Error::Transport`] if the relay is
    /// unreachable; the room is torn down.
    #[instrument(skip(self, local), fields(room_id = %room_id, participant_id = %local.id))]
    pub async fn join(&mut self, room_id: &str, local: LocalParticipant) -> Result<()> {
        if self.state != RoomState::Idle {
            return Err(Error::InvalidState(format!(
                "Cannot join from state {:?}",
                self.state
            )));
        }

        self.media
            .acquire_camera_and_microphone(&self.config.media)
            .await?;
        if let Some(stream) = self.media.local_stream() {
            self.sink.attach_local_stream(stream);
        }

        self.room_id = room_id.to_string();
        self.local = local;
        self.subscription = Some(self.transport.subscribe());
        self.state = RoomState::Joining;

        let join = SignalMessage::Join(JoinPayload {
            room_id: self.room_id.clone(),
            participant_id: self.local.id.clone(),
            display_name: self.local.display_name.clone(),
        });
        let sent = self.send(join).await;
        self.check_fatal(sent).await?;

        info!(mode = ?self.config.mode, "Join sent");
        Ok(())
    }

    /// Handle every signaling message, connection event and expired
    /// recovery window that is already available
    ///
    /// Returns how many items were handled.
    pub async fn process_pending(&mut self) -> Result<usize> {
        let mut handled = 0;

        while self.is_active() {
            if let Some(message) = self.subscription.as_mut().and_then(Subscription::try_recv) {
                let result = self.handle_signal(message).await;
                self.absorb(result).await?;
                handled += 1;
                continue;
            }
            if self.subscription.as_ref().is_some_and(Subscription::is_ended) {
                return Err(self.signaling_closed().await);
            }

            if let Ok(event) = self.events_rx.try_recv() {
                let result = self.handle_event(event).await;
                self.absorb(result).await?;
                handled += 1;
                continue;
            }

            break;
        }

        if self.is_active() {
            handled += self.expire_recoveries().await;
        }
        Ok(handled)
    }

    /// Drive the room until it is left or fails
    pub async fn run(&mut self) -> Result<()> {
        while self.is_active() {
            self.process_pending().await?;
            if !self.is_active() {
                break;
            }

            let deadline = self.sessions.next_deadline();
            let wake = {
                let Some(subscription) = self.subscription.as_mut() else {
                    break;
                };
                let events = &mut self.events_rx;

                tokio::select! {
                    message = subscription.recv() => Wake::Signal(message),
                    event = events.recv() => Wake::Event(event),
                    _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                        Wake::Deadline
                    }
                }
            };

            match wake {
                Wake::Signal(Some(message)) => {
                    let result = self.handle_signal(message).await;
                    self.absorb(result).await?;
                }
                Wake::Signal(None) => {
                    return Err(self.signaling_closed().await);
                }
                Wake::Event(Some(event)) => {
                    let result = self.handle_event(event).await;
                    self.absorb(result).await?;
                }
                Wake::Event(None) => {}
                Wake::Deadline => {
                    self.expire_recoveries().await;
                }
            }
        }
        Ok(())
    }

    /// Share the screen in place of the camera on every session
    ///
    /// No renegotiation takes place. Calling this while already sharing is a
    /// no-op.
    #[instrument(skip(self), fields(room_id = %self.room_id))]
    pub async fn start_screen_share(&mut self) -> Result<()> {
        self.ensure_active()?;
        if self.media.is_screen_sharing() {
            return Ok(());
        }

        let failures = self.media.start_screen_share(&mut self.sessions).await?;
        self.drop_failed(failures).await;

        let result = self.announce_screen_share(true).await;
        self.check_fatal(result).await
    }

    /// Put the camera back on every session
    #[instrument(skip(self), fields(room_id = %self.room_id))]
    pub async fn stop_screen_share(&mut self) -> Result<()> {
        self.ensure_active()?;
        if !self.media.is_screen_sharing() {
            return Ok(());
        }

        let failures = self.media.stop_screen_share(&mut self.sessions).await?;
        self.drop_failed(failures).await;

        let result = self.announce_screen_share(false).await;
        self.check_fatal(result).await
    }

    /// Mute or unmute the microphone; the sender stays attached
    pub fn set_audio_enabled(&mut self, enabled: bool) {
        self.media.set_audio_enabled(enabled);
    }

    /// Blank or resume outbound video; the sender stays attached
    pub fn set_video_enabled(&mut self, enabled: bool) {
        self.media.set_video_enabled(enabled);
    }

    /// Close every session, release local media and announce the departure
    ///
    /// Cleanup always completes; the error, if any, is from sending `leave`.
    /// Leaving twice is a no-op.
    #[instrument(skip(self), fields(room_id = %self.room_id))]
    pub async fn leave(&mut self) -> Result<()> {
        match self.state {
            RoomState::Left => {
                debug!("Already left");
                return Ok(());
            }
            RoomState::Idle => {
                self.media.release();
                self.state = RoomState::Left;
                return Ok(());
            }
            RoomState::Joining | RoomState::Joined => {}
        }

        self.teardown().await;

        let leave = SignalMessage::Leave(LeavePayload {
            room_id: self.room_id.clone(),
            participant_id: self.local.id.clone(),
        });
        let sent = self.send(leave).await;
        if let Err(e) = &sent {
            warn!("Failed to announce leave: {}", e);
        }

        self.state = RoomState::Left;
        self.notify(RoomNotice::Left {
            room_id: self.room_id.clone(),
        });
        info!("Left room");
        sent
    }

    async fn handle_signal(&mut self, message: SignalMessage) -> Result<()> {
        if message.room_id() != self.room_id {
            debug!(
                event = message.event_name(),
                room = message.room_id(),
                "Dropping message for another room"
            );
            return Ok(());
        }
        if !self.accepts(&message) {
            return Ok(());
        }

        debug!(
            event = message.event_name(),
            from = message.sender_id(),
            "Handling signaling message"
        );

        match message {
            SignalMessage::ParticipantJoined(p) => self.on_participant_joined(p).await,
            SignalMessage::ParticipantLeft(p) => {
                self.remove_participant(&p.participant_id, RemovalReason::Left)
                    .await;
                self.sessions.mark_departed(&p.participant_id);
                Ok(())
            }
            SignalMessage::Offer(p) => self.on_offer(p).await,
            SignalMessage::Answer(p) => self.on_answer(p).await,
            SignalMessage::Candidate(p) => self.on_candidate(p).await,
            SignalMessage::ScreenShareStatus(p) => {
                self.on_remote_screen_share(p);
                Ok(())
            }
            SignalMessage::Join(_) | SignalMessage::Leave(_) => {
                debug!("Ignoring outbound-only event");
                Ok(())
            }
        }
    }

    /// Addressing rules: mesh rooms need `toId`, pair calls accept it absent
    fn accepts(&self, message: &SignalMessage) -> bool {
        let peer_scoped =
            message.is_negotiation() || matches!(message, SignalMessage::ScreenShareStatus(_));
        if !peer_scoped {
            return true;
        }
        if message.sender_id() == self.local.id {
            return false;
        }

        match (message.recipient(), self.config.mode) {
            (Some(to), _) => {
                if to != self.local.id {
                    debug!(event = message.event_name(), to, "Dropping message for another peer");
                }
                to == self.local.id
            }
            (None, CallMode::Pair) => true,
            (None, CallMode::Mesh) => {
                if message.is_negotiation() {
                    warn!(
                        event = message.event_name(),
                        from = message.sender_id(),
                        "Dropping unaddressed negotiation message"
                    );
                    return false;
                }
                true
            }
        }
    }

    async fn on_participant_joined(&mut self, payload: JoinPayload) -> Result<()> {
        if payload.participant_id == self.local.id {
            if self.state == RoomState::Joining {
                self.state = RoomState::Joined;
                info!("Membership confirmed");
                self.notify(RoomNotice::Joined {
                    room_id: self.room_id.clone(),
                    participant_id: self.local.id.clone(),
                });
            } else {
                debug!("Duplicate participant-joined for ourselves");
            }
            return Ok(());
        }

        if self.sessions.contains(&payload.participant_id) {
            debug!(peer_id = %payload.participant_id, "Session already exists");
            return Ok(());
        }
        if self.sessions.is_full() {
            warn!(peer_id = %payload.participant_id, "Peer limit reached, not connecting");
            return Ok(());
        }

        // Nothing buffered so far can belong to the offer we are about to make
        let stale = self.sessions.discard_early(&payload.participant_id);
        if stale > 0 {
            debug!(peer_id = %payload.participant_id, stale, "Discarded stale candidates");
        }

        self.open_session(
            &payload.participant_id,
            &payload.display_name,
            Role::Initiator,
            true,
        )
        .await
    }

    async fn on_offer(&mut self, payload: SdpPayload) -> Result<()> {
        let from = payload.from_id;
        let existing = self
            .sessions
            .get(&from)
            .map(|s| (s.is_awaiting_answer(), s.display_name().to_string()));

        let announce = existing.is_none();
        let display_name = match existing {
            Some((true, name)) => {
                // Both sides offered at once: the smaller id stays initiator
                if self.local.id < from {
                    debug!(peer_id = %from, "Offer collision, keeping initiator role");
                    return Ok(());
                }
                info!(peer_id = %from, "Offer collision, answering instead");
                if let Some(mut session) = self.sessions.remove(&from) {
                    session.close().await;
                }
                Some(name)
            }
            Some((false, _)) => None,
            None => Some(from.clone()),
        };

        if let Some(name) = display_name {
            if self.sessions.is_full() {
                warn!(peer_id = %from, "Peer limit reached, ignoring offer");
                return Ok(());
            }
            self.open_session(&from, &name, Role::Responder, announce)
                .await?;
        }

        let Some(session) = self.sessions.get_mut(&from) else {
            return Ok(());
        };
        match session.handle_offer(payload.sdp).await {
            Ok(answer) => self.send(answer).await,
            Err(e) => self.settle(&from, Err(e)).await,
        }
    }

    async fn on_answer(&mut self, payload: SdpPayload) -> Result<()> {
        let result = match self.sessions.get_mut(&payload.from_id) {
            Some(session) => session.handle_answer(payload.sdp).await,
            None => Err(Error::PeerNotFound(payload.from_id.clone())),
        };
        self.settle(&payload.from_id, result).await
    }

    async fn on_candidate(&mut self, payload: CandidatePayload) -> Result<()> {
        let from = payload.from_id;
        let result = match self.sessions.get_mut(&from) {
            Some(session) => session.handle_candidate(payload.candidate).await.map(|_| ()),
            None => {
                if self.sessions.has_departed(&from) {
                    debug!(peer_id = %from, "Dropping candidate from departed participant");
                } else {
                    self.sessions.buffer_early(&from, payload.candidate);
                    debug!(peer_id = %from, "Candidate buffered until session exists");
                }
                Ok(())
            }
        };
        self.settle(&from, result).await
    }

    fn on_remote_screen_share(&mut self, payload: ScreenSharePayload) {
        match self.sessions.get_mut(&payload.participant_id) {
            Some(session) => {
                session.set_remote_sharing(payload.sharing);
                info!(
                    peer_id = %payload.participant_id,
                    sharing = payload.sharing,
                    "Remote screen share changed"
                );
                self.notify(RoomNotice::RemoteScreenShare {
                    participant_id: payload.participant_id,
                    sharing: payload.sharing,
                });
            }
            None => debug!(peer_id = %payload.participant_id, "Screen share status for unknown peer"),
        }
    }

    async fn handle_event(&mut self, event: RoomEvent) -> Result<()> {
        match event {
            RoomEvent::Connection {
                peer_id,
                epoch,
                event,
            } => self.on_connection_event(peer_id, epoch, event).await,
            RoomEvent::ScreenCaptureEnded { track_id } => {
                if !self.media.is_current_screen_track(&track_id) {
                    debug!(track_id = %track_id, "Ignoring end of stale screen track");
                    return Ok(());
                }
                info!(track_id = %track_id, "Screen capture ended, restoring camera");
                self.stop_screen_share().await
            }
        }
    }

    async fn on_connection_event(
        &mut self,
        peer_id: String,
        epoch: u64,
        event: ConnectionEvent,
    ) -> Result<()> {
        let Some(session) = self.sessions.get_mut(&peer_id) else {
            debug!(peer_id = %peer_id, "Event for removed session");
            return Ok(());
        };
        if session.epoch() != epoch {
            debug!(peer_id = %peer_id, epoch, "Event from replaced connection");
            return Ok(());
        }

        match event {
            ConnectionEvent::LocalCandidate(candidate) => {
                let message = session.candidate_message(candidate);
                self.send(message).await
            }
            ConnectionEvent::IceStateChanged(state) => {
                session.on_ice_state(state);
                Ok(())
            }
            ConnectionEvent::RemoteTrack(track) => {
                self.sink.attach_remote_stream(&peer_id, &track);
                Ok(())
            }
            ConnectionEvent::StateChanged(state) => {
                match session.on_connection_state(state, Instant::now()).await {
                    Ok(StateOutcome::Connected { recovered }) => {
                        info!(peer_id = %peer_id, recovered, "Peer connected");
                        self.notify(RoomNotice::ParticipantConnected {
                            participant_id: peer_id,
                            recovered,
                        });
                        Ok(())
                    }
                    Ok(StateOutcome::RestartOffer(offer)) => self.send(offer).await,
                    Ok(StateOutcome::Closed) => {
                        self.remove_participant(&peer_id, RemovalReason::ConnectionClosed)
                            .await;
                        Ok(())
                    }
                    Ok(StateOutcome::Disconnected) => {
                        debug!(peer_id = %peer_id, "Peer disconnected, waiting");
                        Ok(())
                    }
                    Ok(StateOutcome::Recovering | StateOutcome::Unchanged) => Ok(()),
                    Err(e) => self.settle(&peer_id, Err(e)).await,
                }
            }
        }
    }

    async fn open_session(
        &mut self,
        participant_id: &str,
        display_name: &str,
        role: Role,
        announce: bool,
    ) -> Result<()> {
        self.next_epoch += 1;
        let epoch = self.next_epoch;

        let mut session = PeerSession::new(
            participant_id,
            display_name,
            role,
            epoch,
            self.envelope(),
            self.policy.clone(),
        );
        let events = PeerEventSender::new(participant_id, epoch, self.events_tx.clone());
        let tracks = self.media.outbound_tracks();

        let offer = match session.start(self.factory.as_ref(), events, &tracks).await {
            Ok(offer) => offer,
            Err(e) => {
                warn!(peer_id = %participant_id, "Failed to start session: {}", e);
                session.close().await;
                return Ok(());
            }
        };

        if let Err(e) = self.sessions.insert(session) {
            warn!(peer_id = %participant_id, "Failed to register session: {}", e);
            return Ok(());
        }
        info!(peer_id = %participant_id, ?role, epoch, "Session created");

        if announce {
            self.notify(RoomNotice::ParticipantAdded {
                participant_id: participant_id.to_string(),
                display_name: display_name.to_string(),
            });
        }

        match offer {
            Some(offer) => self.send(offer).await,
            None => Ok(()),
        }
    }

    /// Close and forget a participant's session
    ///
    /// Returns `false` if there was no session, e.g. a duplicate
    /// `participant-left`.
    async fn remove_participant(&mut self, participant_id: &str, reason: RemovalReason) -> bool {
        let Some(mut session) = self.sessions.remove(participant_id) else {
            debug!(peer_id = %participant_id, ?reason, "No session to remove");
            return false;
        };

        session.close().await;
        self.sink.detach_remote_stream(participant_id);

        info!(peer_id = %participant_id, ?reason, "Participant removed");
        self.notify(RoomNotice::ParticipantRemoved {
            participant_id: participant_id.to_string(),
            reason,
        });
        true
    }

    /// Route a session-scoped failure; only room-fatal errors propagate
    async fn settle(&mut self, participant_id: &str, result: Result<()>) -> Result<()> {
        match result {
            Ok(()) => Ok(()),
            Err(e) if e.is_fatal_to_room() => Err(e),
            Err(e) => {
                warn!(peer_id = %participant_id, "Session failed: {}", e);
                if let Some(session) = self.sessions.get_mut(participant_id) {
                    session.fail();
                }
                self.remove_participant(participant_id, RemovalReason::NegotiationFailure)
                    .await;
                Ok(())
            }
        }
    }

    async fn expire_recoveries(&mut self) -> usize {
        let expired = self.sessions.expire_recoveries(Instant::now());
        for participant_id in &expired {
            warn!(peer_id = %participant_id, "Connection did not recover in time");
            self.remove_participant(participant_id, RemovalReason::ConnectivityFailure)
                .await;
        }
        expired.len()
    }

    async fn drop_failed(&mut self, failures: Vec<(String, Error)>) {
        for (participant_id, e) in failures {
            warn!(peer_id = %participant_id, "Dropping session after track substitution failed: {}", e);
            self.remove_participant(&participant_id, RemovalReason::NegotiationFailure)
                .await;
        }
    }

    async fn announce_screen_share(&mut self, sharing: bool) -> Result<()> {
        self.notify(RoomNotice::LocalScreenShare { sharing });
        self.send(SignalMessage::ScreenShareStatus(ScreenSharePayload {
            room_id: self.room_id.clone(),
            participant_id: self.local.id.clone(),
            sharing,
        }))
        .await
    }

    async fn send(&self, message: SignalMessage) -> Result<()> {
        debug!(event = message.event_name(), to = ?message.recipient(), "Sending signaling message");
        self.transport.send(message).await
    }

    /// Tear the room down on a transport failure and hand the error back
    async fn check_fatal(&mut self, result: Result<()>) -> Result<()> {
        match result {
            Err(e @ Error::Transport(_)) => Err(self.abort(e).await),
            other => other,
        }
    }

    /// Loop-side variant of [`Self::check_fatal`]: other failures are logged
    /// and the room keeps running
    async fn absorb(&mut self, result: Result<()>) -> Result<()> {
        match result {
            Err(e @ Error::Transport(_)) => Err(self.abort(e).await),
            Err(e) => {
                warn!(room_id = %self.room_id, "Event handling failed: {}", e);
                Ok(())
            }
            Ok(()) => Ok(()),
        }
    }

    async fn signaling_closed(&mut self) -> Error {
        let closed = Error::Transport("Signaling channel closed".to_string());
        self.abort(closed).await
    }

    async fn abort(&mut self, e: Error) -> Error {
        if self.state == RoomState::Left {
            return e;
        }
        error!(room_id = %self.room_id, "Room failed: {}", e);
        self.teardown().await;
        self.state = RoomState::Left;
        self.notify(RoomNotice::Left {
            room_id: self.room_id.clone(),
        });
        e
    }

    async fn teardown(&mut self) {
        for mut session in self.sessions.drain() {
            session.close().await;
            self.sink.detach_remote_stream(session.remote_id());
        }
        self.media.release();
        if let Some(mut subscription) = self.subscription.take() {
            subscription.unsubscribe();
        }
    }

    fn ensure_active(&self) -> Result<()> {
        if self.is_active() {
            Ok(())
        } else {
            Err(Error::InvalidState(format!(
                "Room is not active ({:?})",
                self.state
            )))
        }
    }

    fn envelope(&self) -> Envelope {
        Envelope {
            room_id: self.room_id.clone(),
            local_id: self.local.id.clone(),
            addressed: self.config.mode == CallMode::Mesh,
        }
    }

    fn notify(&self, notice: RoomNotice) {
        // No subscribers is fine
        let _ = self.notices.send(notice);
    }
}

impl Drop for CallRoom {
    fn drop(&mut self) {
        if !self.is_active() {
            return;
        }
        warn!(room_id = %self.room_id, "Call room dropped without leave");

        let sessions = self.sessions.drain();
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                for mut session in sessions {
                    session.close().await;
                }
            });
        }
    }
}
