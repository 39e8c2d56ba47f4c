//! Fake media connections
//!
//! A [`FakeNetwork`] records what each side of every link did and, once both
//! sides of a link hold a local and a remote description, reports the link as
//! connected to both rooms together with one inbound video track.

use async_trait::async_trait;
use meshcall::media::{LocalTrack, RemoteTrack, TrackKind};
use meshcall::peer::{ConnectionEvent, PeerEventSender, PeerState, SdpKind};
use meshcall::signaling::IceCandidate;
use meshcall::{ConnectionFactory, Error, MediaConnection, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::debug;

type LinkKey = (String, String);

struct LinkState {
    serial: u64,
    events: PeerEventSender,
    local: Option<SdpKind>,
    remote: Option<SdpKind>,
    /// Offer/answer exchange in progress on this side
    pending: bool,
    connected: bool,
    track_announced: bool,
    closed: bool,
    applied: Vec<String>,
    video_track: Option<String>,
    offers: u32,
    restarts: u32,
    answers: u32,
}

impl LinkState {
    fn negotiated(&self) -> bool {
        !self.closed && !self.pending && self.local.is_some() && self.remote.is_some()
    }
}

/// Shared view of every fake connection in a test
pub struct FakeNetwork {
    links: Mutex<HashMap<LinkKey, LinkState>>,
    next_serial: AtomicU64,
    auto_connect: AtomicBool,
    candidates_per_side: AtomicUsize,
}

impl FakeNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            links: Mutex::new(HashMap::new()),
            next_serial: AtomicU64::new(1),
            auto_connect: AtomicBool::new(true),
            candidates_per_side: AtomicUsize::new(0),
        })
    }

    /// Factory for the room of `local_id`
    pub fn factory(self: &Arc<Self>, local_id: &str) -> Arc<FakeConnectionFactory> {
        Arc::new(FakeConnectionFactory {
            network: Arc::clone(self),
            local_id: local_id.to_string(),
        })
    }

    /// Whether links report `Connected` once negotiated
    pub fn set_auto_connect(&self, enabled: bool) {
        self.auto_connect.store(enabled, Ordering::Release);
    }

    /// Local candidates each side gathers per description it creates
    pub fn set_candidates_per_side(&self, count: usize) {
        self.candidates_per_side.store(count, Ordering::Release);
    }

    /// Report a connection state change to the room of `local_id`
    pub fn inject_state(&self, local_id: &str, remote_id: &str, state: PeerState) -> bool {
        let links = self.links.lock();
        match links.get(&key(local_id, remote_id)) {
            Some(link) => link.events.send(ConnectionEvent::StateChanged(state)),
            None => false,
        }
    }

    pub fn has_link(&self, local_id: &str, remote_id: &str) -> bool {
        self.links.lock().contains_key(&key(local_id, remote_id))
    }

    /// Candidates applied by `local_id`'s connection to `remote_id`, in order
    pub fn applied_candidates(&self, local_id: &str, remote_id: &str) -> Vec<String> {
        self.read(local_id, remote_id, |link| link.applied.clone())
            .unwrap_or_default()
    }

    /// Track currently on the video sender
    pub fn video_track(&self, local_id: &str, remote_id: &str) -> Option<String> {
        self.read(local_id, remote_id, |link| link.video_track.clone())
            .flatten()
    }

    pub fn offers(&self, local_id: &str, remote_id: &str) -> u32 {
        self.read(local_id, remote_id, |link| link.offers)
            .unwrap_or(0)
    }

    pub fn answers(&self, local_id: &str, remote_id: &str) -> u32 {
        self.read(local_id, remote_id, |link| link.answers)
            .unwrap_or(0)
    }

    pub fn ice_restarts(&self, local_id: &str, remote_id: &str) -> u32 {
        self.read(local_id, remote_id, |link| link.restarts)
            .unwrap_or(0)
    }

    pub fn is_closed(&self, local_id: &str, remote_id: &str) -> bool {
        self.read(local_id, remote_id, |link| link.closed)
            .unwrap_or(false)
    }

    fn read<T>(&self, local_id: &str, remote_id: &str, f: impl FnOnce(&LinkState) -> T) -> Option<T> {
        self.links.lock().get(&key(local_id, remote_id)).map(f)
    }

    /// Run `f` on the link if `serial` still owns it
    fn with_link<T>(
        &self,
        local_id: &str,
        remote_id: &str,
        serial: u64,
        f: impl FnOnce(&mut LinkState) -> Result<T>,
    ) -> Result<T> {
        let mut links = self.links.lock();
        match links.get_mut(&key(local_id, remote_id)) {
            Some(link) if link.serial == serial && !link.closed => f(link),
            _ => Err(Error::InvalidState(format!(
                "Connection {} -> {} is closed",
                local_id, remote_id
            ))),
        }
    }

    fn gather(&self, local_id: &str, remote_id: &str, round: u32) {
        let count = self.candidates_per_side.load(Ordering::Acquire);
        let links = self.links.lock();
        let Some(link) = links.get(&key(local_id, remote_id)) else {
            return;
        };
        for n in 0..count {
            let candidate = IceCandidate::new(format!(
                "candidate:{}-{}-{} 1 udp 2122260223 10.0.0.1 5000{} typ host",
                local_id, round, n, n
            ));
            link.events.send(ConnectionEvent::LocalCandidate(candidate));
        }
    }

    /// Report both sides connected once both finished negotiating
    fn try_connect(&self, local_id: &str, remote_id: &str) {
        if !self.auto_connect.load(Ordering::Acquire) {
            return;
        }

        let mut links = self.links.lock();
        let ready = |links: &HashMap<LinkKey, LinkState>, k: &LinkKey| {
            links.get(k).map(LinkState::negotiated).unwrap_or(false)
        };
        let ours = key(local_id, remote_id);
        let theirs = key(remote_id, local_id);
        if !ready(&*links, &ours) || !ready(&*links, &theirs) {
            return;
        }

        for (k, from) in [(&ours, remote_id), (&theirs, local_id)] {
            if let Some(link) = links.get_mut(k) {
                if link.connected {
                    continue;
                }
                link.connected = true;
                debug!(local = %k.0, remote = %k.1, "Fake link connected");
                link.events
                    .send(ConnectionEvent::StateChanged(PeerState::Connected));
                if !link.track_announced {
                    link.track_announced = true;
                    link.events.send(ConnectionEvent::RemoteTrack(RemoteTrack::detached(
                        TrackKind::Video,
                        &format!("{}-video", from),
                        &format!("{}-stream", from),
                    )));
                }
            }
        }
    }
}

fn key(local_id: &str, remote_id: &str) -> LinkKey {
    (local_id.to_string(), remote_id.to_string())
}

/// Builds [`FakeConnection`]s for one room
pub struct FakeConnectionFactory {
    network: Arc<FakeNetwork>,
    local_id: String,
}

#[async_trait]
impl ConnectionFactory for FakeConnectionFactory {
    async fn create(
        &self,
        remote_id: &str,
        events: PeerEventSender,
    ) -> Result<Arc<dyn MediaConnection>> {
        let serial = self.network.next_serial.fetch_add(1, Ordering::Relaxed);
        self.network.links.lock().insert(
            key(&self.local_id, remote_id),
            LinkState {
                serial,
                events,
                local: None,
                remote: None,
                pending: false,
                connected: false,
                track_announced: false,
                closed: false,
                applied: Vec::new(),
                video_track: None,
                offers: 0,
                restarts: 0,
                answers: 0,
            },
        );

        Ok(Arc::new(FakeConnection {
            network: Arc::clone(&self.network),
            local_id: self.local_id.clone(),
            remote_id: remote_id.to_string(),
            serial,
        }))
    }
}

/// One side of a fake link
pub struct FakeConnection {
    network: Arc<FakeNetwork>,
    local_id: String,
    remote_id: String,
    serial: u64,
}

impl FakeConnection {
    fn with_link<T>(&self, f: impl FnOnce(&mut LinkState) -> Result<T>) -> Result<T> {
        self.network
            .with_link(&self.local_id, &self.remote_id, self.serial, f)
    }
}

#[async_trait]
impl MediaConnection for FakeConnection {
    async fn add_track(&self, track: &Arc<LocalTrack>) -> Result<()> {
        self.with_link(|link| {
            if track.kind() == TrackKind::Video {
                link.video_track = Some(track.id().to_string());
            }
            Ok(())
        })
    }

    async fn replace_video_track(&self, track: &Arc<LocalTrack>) -> Result<()> {
        self.with_link(|link| match link.video_track {
            Some(_) => {
                link.video_track = Some(track.id().to_string());
                Ok(())
            }
            None => Err(Error::InvalidState("No video sender".to_string())),
        })
    }

    async fn create_offer(&self, ice_restart: bool) -> Result<String> {
        let round = self.with_link(|link| {
            link.offers += 1;
            if ice_restart {
                link.restarts += 1;
            }
            link.local = Some(SdpKind::Offer);
            link.pending = true;
            link.connected = false;
            Ok(link.offers)
        })?;

        self.network.gather(&self.local_id, &self.remote_id, round);
        Ok(format!(
            "v=0\r\no={} {} IN IP4 0.0.0.0\r\na=ice-restart:{}\r\n",
            self.local_id, round, ice_restart
        ))
    }

    async fn create_answer(&self) -> Result<String> {
        let round = self.with_link(|link| {
            if link.remote != Some(SdpKind::Offer) || !link.pending {
                return Err(Error::Negotiation(
                    "Cannot answer without a remote offer".to_string(),
                ));
            }
            link.answers += 1;
            link.local = Some(SdpKind::Answer);
            link.pending = false;
            Ok(link.answers)
        })?;

        self.network.gather(&self.local_id, &self.remote_id, round);
        self.network.try_connect(&self.local_id, &self.remote_id);
        Ok(format!(
            "v=0\r\no={} {} IN IP4 0.0.0.0\r\n",
            self.local_id, round
        ))
    }

    async fn set_remote_description(&self, kind: SdpKind, sdp: String) -> Result<()> {
        if !sdp.starts_with("v=0") {
            return Err(Error::Negotiation(format!(
                "Malformed {:?} from {}",
                kind, self.remote_id
            )));
        }

        self.with_link(|link| {
            link.remote = Some(kind);
            match kind {
                SdpKind::Offer => {
                    link.pending = true;
                    link.connected = false;
                }
                SdpKind::Answer => link.pending = false,
            }
            Ok(())
        })?;

        if kind == SdpKind::Answer {
            self.network.try_connect(&self.local_id, &self.remote_id);
        }
        Ok(())
    }

    async fn has_remote_description(&self) -> bool {
        self.with_link(|link| Ok(link.remote.is_some()))
            .unwrap_or(false)
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        self.with_link(|link| {
            link.applied.push(candidate.candidate);
            Ok(())
        })
    }

    async fn close(&self) -> Result<()> {
        let mut links = self.network.links.lock();
        if let Some(link) = links.get_mut(&key(&self.local_id, &self.remote_id)) {
            if link.serial == self.serial {
                link.closed = true;
            }
        }
        Ok(())
    }
}
