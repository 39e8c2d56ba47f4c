//! Media connection abstraction and its webrtc-rs implementation

use crate::config::CallConfig;
use crate::media::track::{LocalTrack, RemoteTrack, TrackKind};
use crate::room::events::RoomEvent;
use crate::signaling::IceCandidate;
use crate::{Error, Result};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, instrument, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::{APIBuilder, API};
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::offer_answer_options::RTCOfferOptions;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;

/// Kind of a session description
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdpKind {
    Offer,
    Answer,
}

/// Aggregate state reported by the underlying connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

/// ICE transport state reported by the underlying connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IceState {
    New,
    Checking,
    Connected,
    Completed,
    Disconnected,
    Failed,
    Closed,
}

impl From<RTCPeerConnectionState> for PeerState {
    fn from(state: RTCPeerConnectionState) -> Self {
        match state {
            RTCPeerConnectionState::Connecting => PeerState::Connecting,
            RTCPeerConnectionState::Connected => PeerState::Connected,
            RTCPeerConnectionState::Disconnected => PeerState::Disconnected,
            RTCPeerConnectionState::Failed => PeerState::Failed,
            RTCPeerConnectionState::Closed => PeerState::Closed,
            RTCPeerConnectionState::New | RTCPeerConnectionState::Unspecified => PeerState::New,
        }
    }
}

impl From<RTCIceConnectionState> for IceState {
    fn from(state: RTCIceConnectionState) -> Self {
        match state {
            RTCIceConnectionState::Checking => IceState::Checking,
            RTCIceConnectionState::Connected => IceState::Connected,
            RTCIceConnectionState::Completed => IceState::Completed,
            RTCIceConnectionState::Disconnected => IceState::Disconnected,
            RTCIceConnectionState::Failed => IceState::Failed,
            RTCIceConnectionState::Closed => IceState::Closed,
            RTCIceConnectionState::New | RTCIceConnectionState::Unspecified => IceState::New,
        }
    }
}

/// Asynchronous notification from a connection
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    StateChanged(PeerState),
    IceStateChanged(IceState),
    /// Locally gathered candidate to trickle to the remote side
    LocalCandidate(IceCandidate),
    /// Inbound media from the remote side
    RemoteTrack(RemoteTrack),
}

/// Routes connection events into the room loop
///
/// Every event carries the epoch of the session that created the connection,
/// so events from a replaced or closed connection can be told apart.
#[derive(Clone)]
pub struct PeerEventSender {
    peer_id: String,
    epoch: u64,
    tx: mpsc::UnboundedSender<RoomEvent>,
}

impl PeerEventSender {
    pub fn new(peer_id: &str, epoch: u64, tx: mpsc::UnboundedSender<RoomEvent>) -> Self {
        Self {
            peer_id: peer_id.to_string(),
            epoch,
            tx,
        }
    }

    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Post an event; returns `false` once the room loop is gone
    pub fn send(&self, event: ConnectionEvent) -> bool {
        self.tx
            .send(RoomEvent::Connection {
                peer_id: self.peer_id.clone(),
                epoch: self.epoch,
                event,
            })
            .is_ok()
    }
}

/// One peer-to-peer media connection
#[async_trait]
pub trait MediaConnection: Send + Sync {
    /// Attach a local track to a new RTP sender
    async fn add_track(&self, track: &Arc<LocalTrack>) -> Result<()>;

    /// Swap the track on the existing video sender without renegotiating
    async fn replace_video_track(&self, track: &Arc<LocalTrack>) -> Result<()>;

    /// Create an offer and set it as the local description
    async fn create_offer(&self, ice_restart: bool) -> Result<String>;

    /// Create an answer and set it as the local description
    async fn create_answer(&self) -> Result<String>;

    async fn set_remote_description(&self, kind: SdpKind, sdp: String) -> Result<()>;

    async fn has_remote_description(&self) -> bool;

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()>;

    /// Close the connection; closing twice is not an error
    async fn close(&self) -> Result<()>;
}

/// Builds connections for new peer sessions
#[async_trait]
pub trait ConnectionFactory: Send + Sync {
    async fn create(
        &self,
        remote_id: &str,
        events: PeerEventSender,
    ) -> Result<Arc<dyn MediaConnection>>;
}

/// Factory for [`RtcConnection`]s sharing one webrtc API instance
pub struct RtcConnectionFactory {
    api: API,
    rtc_config: RTCConfiguration,
}

impl RtcConnectionFactory {
    /// Build the webrtc API with default codecs and interceptors
    pub fn new(config: &CallConfig) -> Result<Self> {
        let mut media_engine = MediaEngine::default();

        // Opus for audio, VP8/VP9/H.264 for video
        media_engine
            .register_default_codecs()
            .map_err(|e| Error::WebRtc(format!("Failed to register codecs: {}", e)))?;

        let interceptor_registry =
            register_default_interceptors(Default::default(), &mut media_engine)
                .map_err(|e| Error::WebRtc(format!("Failed to register interceptors: {}", e)))?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(interceptor_registry)
            .build();

        let ice_servers: Vec<RTCIceServer> = config
            .stun_servers
            .iter()
            .map(|url| RTCIceServer {
                urls: vec![url.clone()],
                ..Default::default()
            })
            .chain(config.turn_servers.iter().map(|turn| {
                #[allow(clippy::needless_update)]
                RTCIceServer {
                    urls: vec![turn.url.clone()],
                    username: turn.username.clone(),
                    credential: turn.credential.clone(),
                    ..Default::default()
                }
            }))
            .collect();

        Ok(Self {
            api,
            rtc_config: RTCConfiguration {
                ice_servers,
                ..Default::default()
            },
        })
    }
}

#[async_trait]
impl ConnectionFactory for RtcConnectionFactory {
    #[instrument(skip(self, events), fields(peer_id = %remote_id))]
    async fn create(
        &self,
        remote_id: &str,
        events: PeerEventSender,
    ) -> Result<Arc<dyn MediaConnection>> {
        let pc = self
            .api
            .new_peer_connection(self.rtc_config.clone())
            .await
            .map_err(|e| Error::WebRtc(format!("Failed to create peer connection: {}", e)))?;

        let connection = RtcConnection::new(remote_id, Arc::new(pc), events);
        info!(connection_id = %connection.connection_id, "Created peer connection");
        Ok(Arc::new(connection))
    }
}

/// [`MediaConnection`] backed by an `RTCPeerConnection`
pub struct RtcConnection {
    peer_id: String,
    connection_id: String,
    pc: Arc<RTCPeerConnection>,
    video_sender: RwLock<Option<Arc<RTCRtpSender>>>,
    closed: AtomicBool,
}

impl RtcConnection {
    fn new(peer_id: &str, pc: Arc<RTCPeerConnection>, events: PeerEventSender) -> Self {
        let state_events = events.clone();
        pc.on_peer_connection_state_change(Box::new(move |s: RTCPeerConnectionState| {
            let events = state_events.clone();
            Box::pin(async move {
                debug!(peer_id = events.peer_id(), state = %s, "Peer connection state changed");
                events.send(ConnectionEvent::StateChanged(s.into()));
            })
        }));

        let ice_events = events.clone();
        pc.on_ice_connection_state_change(Box::new(move |s: RTCIceConnectionState| {
            let events = ice_events.clone();
            Box::pin(async move {
                events.send(ConnectionEvent::IceStateChanged(s.into()));
            })
        }));

        let candidate_events = events.clone();
        pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let events = candidate_events.clone();
            Box::pin(async move {
                // None marks the end of gathering
                let Some(candidate) = candidate else {
                    return;
                };
                match candidate.to_json() {
                    Ok(init) => {
                        events.send(ConnectionEvent::LocalCandidate(init.into()));
                    }
                    Err(e) => {
                        warn!(peer_id = events.peer_id(), "Failed to encode candidate: {}", e)
                    }
                }
            })
        }));

        let track_events = events;
        pc.on_track(Box::new(move |track, _receiver, _transceiver| {
            let events = track_events.clone();
            Box::pin(async move {
                let remote = RemoteTrack::from_webrtc(track);
                info!(
                    peer_id = events.peer_id(),
                    track_id = %remote.track_id,
                    kind = ?remote.kind,
                    "Remote track added"
                );
                events.send(ConnectionEvent::RemoteTrack(remote));
            })
        }));

        Self {
            peer_id: peer_id.to_string(),
            connection_id: uuid::Uuid::new_v4().to_string(),
            pc,
            video_sender: RwLock::new(None),
            closed: AtomicBool::new(false),
        }
    }

    async fn local_sdp(&self) -> Result<String> {
        self.pc
            .local_description()
            .await
            .map(|desc| desc.sdp)
            .ok_or_else(|| Error::Negotiation("No local description after setting it".to_string()))
    }
}

#[async_trait]
impl MediaConnection for RtcConnection {
    async fn add_track(&self, track: &Arc<LocalTrack>) -> Result<()> {
        let sender = self
            .pc
            .add_track(track.rtc_track())
            .await
            .map_err(|e| Error::WebRtc(format!("Failed to add track {}: {}", track.id(), e)))?;

        // RTCP has to be read for the interceptors to run
        let rtcp_sender = Arc::clone(&sender);
        tokio::spawn(async move {
            let mut buf = vec![0u8; 1500];
            while rtcp_sender.read(&mut buf).await.is_ok() {}
        });

        if track.kind() == TrackKind::Video {
            *self.video_sender.write().await = Some(sender);
        }

        debug!(peer_id = %self.peer_id, track_id = track.id(), "Track added");
        Ok(())
    }

    async fn replace_video_track(&self, track: &Arc<LocalTrack>) -> Result<()> {
        let sender = self.video_sender.read().await.clone().ok_or_else(|| {
            Error::InvalidState(format!("No video sender on connection to {}", self.peer_id))
        })?;

        sender
            .replace_track(Some(track.rtc_track()))
            .await
            .map_err(|e| Error::WebRtc(format!("Failed to replace video track: {}", e)))?;

        debug!(peer_id = %self.peer_id, track_id = track.id(), "Video track replaced");
        Ok(())
    }

    async fn create_offer(&self, ice_restart: bool) -> Result<String> {
        let options = ice_restart.then(|| RTCOfferOptions {
            ice_restart: true,
            ..Default::default()
        });

        let offer = self
            .pc
            .create_offer(options)
            .await
            .map_err(|e| Error::Negotiation(format!("Failed to create offer: {}", e)))?;

        self.pc
            .set_local_description(offer)
            .await
            .map_err(|e| Error::Negotiation(format!("Failed to set local description: {}", e)))?;

        debug!(peer_id = %self.peer_id, ice_restart, "Created SDP offer");
        self.local_sdp().await
    }

    async fn create_answer(&self) -> Result<String> {
        let answer = self
            .pc
            .create_answer(None)
            .await
            .map_err(|e| Error::Negotiation(format!("Failed to create answer: {}", e)))?;

        self.pc
            .set_local_description(answer)
            .await
            .map_err(|e| Error::Negotiation(format!("Failed to set local description: {}", e)))?;

        debug!(peer_id = %self.peer_id, "Created SDP answer");
        self.local_sdp().await
    }

    async fn set_remote_description(&self, kind: SdpKind, sdp: String) -> Result<()> {
        let desc = match kind {
            SdpKind::Offer => RTCSessionDescription::offer(sdp),
            SdpKind::Answer => RTCSessionDescription::answer(sdp),
        }
        .map_err(|e| Error::Negotiation(format!("Failed to parse {:?}: {}", kind, e)))?;

        self.pc
            .set_remote_description(desc)
            .await
            .map_err(|e| Error::Negotiation(format!("Failed to set remote description: {}", e)))
    }

    async fn has_remote_description(&self) -> bool {
        self.pc.remote_description().await.is_some()
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        let init: RTCIceCandidateInit = candidate.into();
        self.pc
            .add_ice_candidate(init)
            .await
            .map_err(|e| Error::Negotiation(format!("Failed to add ICE candidate: {}", e)))
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        info!(
            peer_id = %self.peer_id,
            connection_id = %self.connection_id,
            "Closing peer connection"
        );
        self.pc
            .close()
            .await
            .map_err(|e| Error::WebRtc(format!("Failed to close connection: {}", e)))
    }
}
