//! Session configuration

use serde::{Deserialize, Serialize};

/// STUN servers used when none are configured
pub const DEFAULT_STUN_SERVERS: [&str; 5] = [
    "stun:stun.l.google.com:19302",
    "stun:stun1.l.google.com:19302",
    "stun:stun2.l.google.com:19302",
    "stun:stun3.l.google.com:19302",
    "stun:stun4.l.google.com:19302",
];

/// Main configuration for a rendezvous session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// WebSocket signaling server URL (ws:// or wss://)
    pub signaling_url: String,

    /// Session token presented to the signaling server
    pub token: String,

    /// STUN server URLs
    pub stun_servers: Vec<String>,

    /// TURN server configurations (optional)
    pub turn_servers: Vec<TurnServerConfig>,

    /// Label of the application data channel (default: "chat")
    pub data_channel_label: String,

    /// Data channel mode (default: Reliable)
    pub data_channel_mode: DataChannelMode,
}

/// TURN server configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnServerConfig {
    /// TURN server URL (turn:// or turns://)
    pub url: String,

    /// Username for TURN authentication
    pub username: String,

    /// Credential for TURN authentication
    pub credential: String,
}

/// Data channel reliability mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataChannelMode {
    /// Reliable, ordered delivery (default)
    #[default]
    Reliable,
    /// Unreliable, unordered delivery
    ///
    /// Messages may arrive out of order or be lost.
    Unreliable,
}

impl DataChannelMode {
    /// Get the ordered setting for the transport engine
    pub fn ordered(&self) -> bool {
        match self {
            DataChannelMode::Reliable => true,
            DataChannelMode::Unreliable => false,
        }
    }

    /// Get the max retransmits setting for the transport engine
    pub fn max_retransmits(&self) -> Option<u16> {
        match self {
            DataChannelMode::Reliable => None,      // Unlimited retransmits
            DataChannelMode::Unreliable => Some(0), // No retransmits
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            signaling_url: "ws://localhost:8080".to_string(),
            token: String::new(),
            stun_servers: DEFAULT_STUN_SERVERS.iter().map(|s| s.to_string()).collect(),
            turn_servers: Vec::new(),
            data_channel_label: "chat".to_string(),
            data_channel_mode: DataChannelMode::Reliable,
        }
    }
}

impl SessionConfig {
    /// Default configuration with the given session token
    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            ..Default::default()
        }
    }

    /// Validate configuration parameters
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `signaling_url` is not a valid WebSocket URL
    /// - `token` is empty or contains a `/`
    /// - `data_channel_label` is empty
    /// - a TURN server URL does not use the turn: or turns: scheme
    pub fn validate(&self) -> crate::Result<()> {
        use crate::Error;

        if !self.signaling_url.starts_with("ws://") && !self.signaling_url.starts_with("wss://") {
            return Err(Error::InvalidConfig(format!(
                "signaling_url must start with ws:// or wss://, got {}",
                self.signaling_url
            )));
        }

        if self.token.is_empty() {
            return Err(Error::InvalidConfig("token must not be empty".to_string()));
        }

        if self.token.contains('/') {
            return Err(Error::InvalidConfig(format!(
                "token must not contain '/', got {}",
                self.token
            )));
        }

        if self.data_channel_label.is_empty() {
            return Err(Error::InvalidConfig(
                "data_channel_label must not be empty".to_string(),
            ));
        }

        for turn in &self.turn_servers {
            if !turn.url.starts_with("turn:") && !turn.url.starts_with("turns:") {
                return Err(Error::InvalidConfig(format!(
                    "TURN server URL must start with turn: or turns:, got {}",
                    turn.url
                )));
            }
        }

        Ok(())
    }

    /// Signaling URL with the session token attached as a query parameter
    pub fn signaling_endpoint(&self) -> crate::Result<url::Url> {
        let mut endpoint = url::Url::parse(&self.signaling_url).map_err(|e| {
            crate::Error::InvalidConfig(format!(
                "invalid signaling_url {}: {}",
                self.signaling_url, e
            ))
        })?;
        endpoint.query_pairs_mut().append_pair("token", &self.token);
        Ok(endpoint)
    }
}
