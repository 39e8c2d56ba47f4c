//! Configuration types for call rooms

use serde::{Deserialize, Serialize};

/// Main configuration for a CallRoom
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallConfig {
    /// WebSocket signaling server URL (ws:// or wss://)
    pub signaling_url: String,

    /// STUN server URLs (at least one required)
    pub stun_servers: Vec<String>,

    /// TURN server configurations (optional)
    pub turn_servers: Vec<TurnServerConfig>,

    /// Two-party call or N-party mesh room (default: Mesh)
    pub mode: CallMode,

    /// Maximum remote participants (default: 10, max: 16; Pair requires 1)
    pub max_peers: u32,

    /// Local capture constraints used on join
    pub media: MediaConstraints,

    /// Additional configuration options
    pub options: ConfigOptions,
}

/// TURN server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnServerConfig {
    /// TURN server URL (turn: or turns:)
    pub url: String,

    /// Username for TURN authentication
    pub username: String,

    /// Credential for TURN authentication
    pub credential: String,
}

/// Call topology
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallMode {
    /// Exactly one remote participant; messages carry no recipient id
    Pair,
    /// One session per remote participant; every message carries `toId`
    Mesh,
}

/// Local capture constraints
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaConstraints {
    /// Capture microphone audio
    pub audio: bool,

    /// Camera constraints, `None` disables camera capture
    pub video: Option<VideoConstraints>,
}

/// Camera constraints
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoConstraints {
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
    /// Frames per second
    pub frame_rate: u32,
}

/// Additional configuration options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigOptions {
    /// Seconds a failed connection gets to recover after ICE restart (default: 30)
    pub ice_recovery_timeout_secs: u32,

    /// ICE restart attempts per failure occurrence (default: 1)
    pub ice_restart_attempts: u32,

    /// Candidates buffered per sender before its session exists (default: 64)
    pub early_candidate_limit: usize,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            signaling_url: "ws://localhost:8080".to_string(),
            stun_servers: vec!["stun:stun.l.google.com:19302".to_string()],
            turn_servers: Vec::new(),
            mode: CallMode::Mesh,
            max_peers: 10,
            media: MediaConstraints::default(),
            options: ConfigOptions::default(),
        }
    }
}

impl Default for MediaConstraints {
    fn default() -> Self {
        Self {
            audio: true,
            video: Some(VideoConstraints::default()),
        }
    }
}

impl Default for VideoConstraints {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            frame_rate: 30,
        }
    }
}

impl Default for ConfigOptions {
    fn default() -> Self {
        Self {
            ice_recovery_timeout_secs: 30,
            ice_restart_attempts: 1,
            early_candidate_limit: 64,
        }
    }
}

impl CallConfig {
    /// Configuration for a two-party call
    pub fn pair(signaling_url: &str) -> Self {
        Self {
            signaling_url: signaling_url.to_string(),
            mode: CallMode::Pair,
            max_peers: 1,
            ..Default::default()
        }
    }

    /// Configuration for an N-party mesh room
    pub fn mesh(signaling_url: &str, max_peers: u32) -> Self {
        Self {
            signaling_url: signaling_url.to_string(),
            mode: CallMode::Mesh,
            max_peers,
            ..Default::default()
        }
    }

    /// Parse a configuration from JSON
    pub fn from_json_str(json: &str) -> crate::Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| crate::Error::Serialization(format!("Invalid call config: {}", e)))
    }

    /// Serialize the configuration to pretty JSON
    pub fn to_json_string(&self) -> crate::Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| crate::Error::Serialization(format!("Failed to serialize config: {}", e)))
    }

    /// ICE recovery timeout as a Duration
    pub fn ice_recovery_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(u64::from(self.options.ice_recovery_timeout_secs))
    }

    /// Validate configuration parameters
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `stun_servers` is empty
    /// - `max_peers` is not in range 1-16, or not 1 in Pair mode
    /// - `ice_recovery_timeout_secs` is not in range 1-300
    /// - `signaling_url` is not a valid WebSocket URL
    /// - a TURN URL does not use the turn: or turns: scheme
    pub fn validate(&self) -> crate::Result<()> {
        use crate::Error;

        if self.stun_servers.is_empty() {
            return Err(Error::InvalidConfig(
                "At least one STUN server is required".to_string(),
            ));
        }

        if self.max_peers == 0 || self.max_peers > 16 {
            return Err(Error::InvalidConfig(format!(
                "max_peers must be in range 1-16, got {}",
                self.max_peers
            )));
        }

        if self.mode == CallMode::Pair && self.max_peers != 1 {
            return Err(Error::InvalidConfig(format!(
                "pair mode allows exactly one remote participant, got max_peers={}",
                self.max_peers
            )));
        }

        let timeout = self.options.ice_recovery_timeout_secs;
        if timeout == 0 || timeout > 300 {
            return Err(Error::InvalidConfig(format!(
                "ice_recovery_timeout_secs must be in range 1-300, got {}",
                timeout
            )));
        }

        if !self.signaling_url.starts_with("ws://") && !self.signaling_url.starts_with("wss://") {
            return Err(Error::InvalidConfig(format!(
                "signaling_url must start with ws:// or wss://, got {}",
                self.signaling_url
            )));
        }

        for turn in &self.turn_servers {
            if !turn.url.starts_with("turn:") && !turn.url.starts_with("turns:") {
                return Err(Error::InvalidConfig(format!(
                    "TURN url must start with turn: or turns:, got {}",
                    turn.url
                )));
            }
        }

        Ok(())
    }
}
