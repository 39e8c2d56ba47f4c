//! Session storage for one room

use crate::media::manager::VideoFanOut;
use crate::media::track::LocalTrack;
use crate::peer::session::{PeerSession, Role, SessionState};
use crate::signaling::IceCandidate;
use crate::{Error, Result};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Visible participant summary
#[derive(Debug, Clone, PartialEq)]
pub struct ParticipantInfo {
    pub participant_id: String,
    pub display_name: String,
    pub role: Role,
    pub state: SessionState,
    pub screen_sharing: bool,
}

/// Sessions keyed by remote participant id, kept in join order
///
/// Also holds candidates from senders that have no session yet.
pub struct SessionArena {
    /// Map of participant id to session
    sessions: HashMap<String, PeerSession>,

    /// Participant ids in the order their sessions were inserted
    order: Vec<String>,

    /// Candidates that arrived before the sender's session existed
    early: HashMap<String, VecDeque<IceCandidate>>,

    /// Participants that left; their late candidates are dropped
    departed: HashSet<String>,

    /// Maximum number of simultaneous sessions
    max_peers: usize,

    /// Per-sender limit for early candidates
    early_limit: usize,
}

impl SessionArena {
    pub fn new(max_peers: usize, early_limit: usize) -> Self {
        Self {
            sessions: HashMap::new(),
            order: Vec::new(),
            early: HashMap::new(),
            departed: HashSet::new(),
            max_peers,
            early_limit,
        }
    }

    /// Add a session
    ///
    /// Early candidates buffered for the participant move into its queue.
    ///
    /// # Errors
    ///
    /// Returns error if the limit is reached or a session for the same
    /// participant already exists.
    pub fn insert(&mut self, mut session: PeerSession) -> Result<()> {
        let id = session.remote_id().to_string();

        if self.sessions.contains_key(&id) {
            return Err(Error::InvalidState(format!(
                "Session for {} already exists",
                id
            )));
        }

        if self.is_full() {
            return Err(Error::InvalidState(format!(
                "Maximum peer limit reached ({})",
                self.max_peers
            )));
        }

        self.departed.remove(&id);
        if let Some(early) = self.early.remove(&id) {
            debug!(peer_id = %id, count = early.len(), "Moving early candidates into session");
            for candidate in early {
                session.enqueue_candidate(candidate);
            }
        }

        info!(peer_id = %id, role = ?session.role(), "Adding session");
        self.order.push(id.clone());
        self.sessions.insert(id, session);
        Ok(())
    }

    /// Detach a session from the arena without closing it
    pub fn remove(&mut self, participant_id: &str) -> Option<PeerSession> {
        self.early.remove(participant_id);
        let session = self.sessions.remove(participant_id)?;
        self.order.retain(|id| id != participant_id);
        Some(session)
    }

    pub fn get(&self, participant_id: &str) -> Option<&PeerSession> {
        self.sessions.get(participant_id)
    }

    pub fn get_mut(&mut self, participant_id: &str) -> Option<&mut PeerSession> {
        self.sessions.get_mut(participant_id)
    }

    pub fn contains(&self, participant_id: &str) -> bool {
        self.sessions.contains_key(participant_id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.sessions.len() >= self.max_peers
    }

    /// Participant ids in join order
    pub fn ids(&self) -> Vec<String> {
        self.order.clone()
    }

    /// Sessions in join order
    pub fn iter(&self) -> impl Iterator<Item = &PeerSession> {
        self.order.iter().filter_map(|id| self.sessions.get(id))
    }

    pub fn participants(&self) -> Vec<ParticipantInfo> {
        self.iter()
            .map(|s| ParticipantInfo {
                participant_id: s.remote_id().to_string(),
                display_name: s.display_name().to_string(),
                role: s.role(),
                state: s.state(),
                screen_sharing: s.remote_sharing(),
            })
            .collect()
    }

    /// Hold a candidate until `participant_id` gets a session
    ///
    /// Returns `false` if the oldest buffered candidate had to be dropped.
    pub fn buffer_early(&mut self, participant_id: &str, candidate: IceCandidate) -> bool {
        let queue = self.early.entry(participant_id.to_string()).or_default();
        queue.push_back(candidate);

        if queue.len() > self.early_limit {
            queue.pop_front();
            warn!(
                peer_id = %participant_id,
                limit = self.early_limit,
                "Early candidate buffer full, dropped oldest"
            );
            return false;
        }
        true
    }

    pub fn early_count(&self, participant_id: &str) -> usize {
        self.early.get(participant_id).map_or(0, VecDeque::len)
    }

    /// Drop buffered candidates for `participant_id` and let new ones buffer
    ///
    /// Returns how many were dropped.
    pub fn discard_early(&mut self, participant_id: &str) -> usize {
        self.departed.remove(participant_id);
        self.early.remove(participant_id).map_or(0, |q| q.len())
    }

    /// Record that `participant_id` left the room
    pub fn mark_departed(&mut self, participant_id: &str) {
        self.early.remove(participant_id);
        self.departed.insert(participant_id.to_string());
    }

    pub fn has_departed(&self, participant_id: &str) -> bool {
        self.departed.contains(participant_id)
    }

    /// Earliest pending recovery deadline across sessions
    pub fn next_deadline(&self) -> Option<Instant> {
        self.sessions
            .values()
            .filter_map(PeerSession::recovery_deadline)
            .min()
    }

    /// Ids of sessions whose recovery window closed, now marked failed
    pub fn expire_recoveries(&mut self, now: Instant) -> Vec<String> {
        let mut expired = Vec::new();
        for id in &self.order {
            if let Some(session) = self.sessions.get_mut(id) {
                if session.check_recovery(now) {
                    expired.push(id.clone());
                }
            }
        }
        expired
    }

    /// Remove every session in join order
    pub fn drain(&mut self) -> Vec<PeerSession> {
        self.early.clear();
        self.departed.clear();
        let order = std::mem::take(&mut self.order);
        order
            .into_iter()
            .filter_map(|id| self.sessions.remove(&id))
            .collect()
    }
}

#[async_trait]
impl VideoFanOut for SessionArena {
    async fn replace_outbound_video(&mut self, track: &Arc<LocalTrack>) -> Vec<(String, Error)> {
        let mut failures = Vec::new();
        for id in &self.order {
            let Some(session) = self.sessions.get(id) else {
                continue;
            };
            if let Err(e) = session.replace_video(track).await {
                warn!(peer_id = %id, "Failed to replace outbound video: {}", e);
                failures.push((id.clone(), e));
            }
        }
        debug!(
            track_id = track.id(),
            sessions = self.order.len(),
            failed = failures.len(),
            "Outbound video replaced"
        );
        failures
    }
}
