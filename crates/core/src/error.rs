//! Error types for the coordination core

use crate::connection::NegotiationState;
use crate::types::PeerId;

/// Result type alias using the core Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while coordinating peer connections
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Signaling server rejected the session token (terminal)
    #[error("Invalid session: {0}")]
    InvalidSession(String),

    /// Signaling message that does not fit the current registry state
    #[error("Protocol violation for peer {peer_id}: {reason}")]
    ProtocolViolation {
        /// Peer named by the offending message
        peer_id: PeerId,
        /// What was wrong with it
        reason: String,
    },

    /// Creating or applying a session description failed
    #[error("Negotiation failed for peer {peer_id}: {reason}")]
    NegotiationFailure {
        /// Affected peer
        peer_id: PeerId,
        /// Underlying engine error
        reason: String,
    },

    /// A single remote candidate could not be applied
    #[error("Failed to apply candidate for peer {peer_id}: {reason}")]
    CandidateApplyFailure {
        /// Affected peer
        peer_id: PeerId,
        /// Underlying engine error
        reason: String,
    },

    /// Connectivity to a peer was permanently lost
    #[error("Transport failure for peer {peer_id}: {reason}")]
    TransportFailure {
        /// Affected peer
        peer_id: PeerId,
        /// Reported condition
        reason: String,
    },

    /// State machine asked to do something its current state forbids
    #[error("Peer {peer_id} cannot {action} while {state:?}")]
    InvalidTransition {
        /// Affected peer
        peer_id: PeerId,
        /// State at the time of the request
        state: NegotiationState,
        /// Requested step
        action: &'static str,
    },

    /// Invalid configuration parameter
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Signaling channel error
    #[error("Signaling error: {0}")]
    Signaling(String),

    /// Data channel error
    #[error("Data channel error: {0}")]
    DataChannel(String),

    /// Transport engine error
    #[error("Transport engine error: {0}")]
    Transport(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Check if this error ends the session
    pub fn is_terminal(&self) -> bool {
        matches!(self, Error::InvalidSession(_))
    }

    /// Check if this error only affects a single peer
    pub fn is_peer_scoped(&self) -> bool {
        self.peer_id().is_some()
    }

    /// Peer the error is attributed to, if any
    pub fn peer_id(&self) -> Option<&PeerId> {
        match self {
            Error::ProtocolViolation { peer_id, .. }
            | Error::NegotiationFailure { peer_id, .. }
            | Error::CandidateApplyFailure { peer_id, .. }
            | Error::TransportFailure { peer_id, .. }
            | Error::InvalidTransition { peer_id, .. } => Some(peer_id),
            _ => None,
        }
    }
}
