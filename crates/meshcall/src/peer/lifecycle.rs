//! Connectivity recovery bookkeeping
//!
//! A peer connection that reports `failed` gets a bounded number of ICE
//! restarts and a recovery window. If it is not `connected` again when the
//! window closes, the session is given up.

use crate::config::CallConfig;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// How a session recovers from a failed connection
#[derive(Debug, Clone)]
pub struct RecoveryPolicy {
    /// ICE restarts allowed per failure occurrence (default: 1)
    pub max_ice_restarts: u32,
    /// Time allowed to get back to connected (default: 30s)
    pub timeout: Duration,
}

impl Default for RecoveryPolicy {
    fn default() -> Self {
        Self {
            max_ice_restarts: 1,
            timeout: Duration::from_secs(30),
        }
    }
}

impl RecoveryPolicy {
    pub fn from_config(config: &CallConfig) -> Self {
        Self {
            max_ice_restarts: config.options.ice_restart_attempts,
            timeout: config.ice_recovery_timeout(),
        }
    }

    /// Check if another restart is allowed
    pub fn should_restart(&self, attempt: u32) -> bool {
        attempt < self.max_ice_restarts
    }
}

/// What to do about a reported failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryStep {
    /// Send an ICE-restart offer
    Restart { attempt: u32 },
    /// Keep waiting for the remote side or the deadline
    Wait,
}

/// Recovery state of one session
#[derive(Debug, Clone)]
pub struct Recovery {
    policy: RecoveryPolicy,
    attempts: u32,
    deadline: Option<Instant>,
}

impl Recovery {
    pub fn new(policy: RecoveryPolicy) -> Self {
        Self {
            policy,
            attempts: 0,
            deadline: None,
        }
    }

    /// Record a failure
    ///
    /// The first failure of an occurrence opens the recovery window. Only the
    /// side allowed to send offers (`can_restart`) is told to restart.
    pub fn on_failure(&mut self, now: Instant, can_restart: bool) -> RecoveryStep {
        if self.deadline.is_none() {
            self.deadline = Some(now + self.policy.timeout);
            info!(timeout = ?self.policy.timeout, "Connection failed, recovery window opened");
        }

        if can_restart && self.policy.should_restart(self.attempts) {
            self.attempts += 1;
            return RecoveryStep::Restart {
                attempt: self.attempts,
            };
        }

        debug!(attempts = self.attempts, "Waiting for recovery");
        RecoveryStep::Wait
    }

    /// Record a successful (re)connection
    ///
    /// Returns `true` if this ended a recovery window.
    pub fn on_connected(&mut self) -> bool {
        let recovered = self.deadline.take().is_some();
        if recovered {
            info!(attempts = self.attempts, "Connection recovered");
        }
        self.attempts = 0;
        recovered
    }

    pub fn is_recovering(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Check whether the recovery window has closed without success
    pub fn is_expired(&self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                warn!(attempts = self.attempts, "Recovery window expired");
                true
            }
            _ => false,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}
