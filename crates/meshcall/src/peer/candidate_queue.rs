//! Buffer for ICE candidates that arrive before the remote description

use crate::signaling::IceCandidate;
use std::collections::VecDeque;

/// Per-peer FIFO of not-yet-appliable candidates
///
/// Candidates are handed back in arrival order. Nothing is reordered or
/// deduplicated; the connection layer tolerates duplicates.
#[derive(Debug, Default)]
pub struct IceCandidateQueue {
    pending: VecDeque<IceCandidate>,
}

impl IceCandidateQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a candidate
    pub fn enqueue(&mut self, candidate: IceCandidate) {
        self.pending.push_back(candidate);
    }

    /// Take every queued candidate once a remote description is present
    ///
    /// Without a remote description this returns nothing and leaves the
    /// queue untouched.
    pub fn drain_if_ready(&mut self, has_remote_description: bool) -> Vec<IceCandidate> {
        if !has_remote_description {
            return Vec::new();
        }
        self.pending.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Drop everything, returning how many candidates were discarded
    pub fn clear(&mut self) -> usize {
        let dropped = self.pending.len();
        self.pending.clear();
        dropped
    }
}
