//! Typed event streams
//!
//! Transport engines never touch the registry. Every callback they receive is
//! turned into a [`PeerEvent`] tagged with the peer and the connection
//! instance it belongs to, and posted to the session loop. Negotiation tasks
//! report completion the same way. The loop drops events whose connection id
//! no longer matches the registered instance.

use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::engine::DataChannelHandle;
use crate::types::{ConnectionId, IceCandidate, PeerId, SessionDescription};

/// Event raised by a transport handle or a negotiation task
#[derive(Debug)]
pub struct PeerEvent {
    /// Peer the event belongs to
    pub peer_id: PeerId,
    /// Connection instance that raised it
    pub connection_id: ConnectionId,
    /// What happened
    pub kind: PeerEventKind,
}

/// Kinds of per-peer events
pub enum PeerEventKind {
    /// Engine discovered a local connectivity candidate
    CandidateDiscovered(IceCandidate),
    /// Engine-level signaling state changed (informational)
    NegotiationStateChanged(SignalingState),
    /// Connectivity of the underlying transport changed
    ConnectivityChanged(Connectivity),
    /// Remote side announced a data channel
    ChannelAccepted(Arc<dyn DataChannelHandle>),
    /// Data channel is open
    ChannelOpened,
    /// Data channel closed
    ChannelClosed,
    /// Text message arrived on the data channel
    MessageReceived(String),
    /// A spawned negotiation step finished
    Negotiated(NegotiationOutcome),
}

impl fmt::Debug for PeerEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CandidateDiscovered(c) => f.debug_tuple("CandidateDiscovered").field(c).finish(),
            Self::NegotiationStateChanged(s) => {
                f.debug_tuple("NegotiationStateChanged").field(s).finish()
            }
            Self::ConnectivityChanged(c) => f.debug_tuple("ConnectivityChanged").field(c).finish(),
            Self::ChannelAccepted(ch) => f.debug_tuple("ChannelAccepted").field(&ch.label()).finish(),
            Self::ChannelOpened => f.write_str("ChannelOpened"),
            Self::ChannelClosed => f.write_str("ChannelClosed"),
            Self::MessageReceived(text) => f.debug_tuple("MessageReceived").field(text).finish(),
            Self::Negotiated(outcome) => f.debug_tuple("Negotiated").field(outcome).finish(),
        }
    }
}

/// Transport connectivity as reported by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connectivity {
    New,
    Connecting,
    Connected,
    /// Temporary loss; the engine may recover on its own
    Disconnected,
    /// Permanent loss
    Failed,
    Closed,
}

/// Engine-level signaling state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalingState {
    Stable,
    HaveLocalOffer,
    HaveRemoteOffer,
    Closed,
    Other,
}

/// Negotiation step run off-loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationStep {
    /// Create the local offer and set it as local description
    CreateOffer,
    /// Apply the remote offer, create the answer and set it locally
    CreateAnswer,
    /// Apply the remote answer
    ApplyAnswer,
}

impl NegotiationStep {
    /// Short name used in logs and errors
    pub fn as_str(&self) -> &'static str {
        match self {
            NegotiationStep::CreateOffer => "create offer",
            NegotiationStep::CreateAnswer => "create answer",
            NegotiationStep::ApplyAnswer => "apply answer",
        }
    }
}

/// Result of a negotiation step
#[derive(Debug)]
pub enum NegotiationOutcome {
    OfferCreated(crate::Result<SessionDescription>),
    AnswerCreated(crate::Result<SessionDescription>),
    AnswerApplied(crate::Result<()>),
}

impl NegotiationOutcome {
    /// Step this outcome completes
    pub fn step(&self) -> NegotiationStep {
        match self {
            NegotiationOutcome::OfferCreated(_) => NegotiationStep::CreateOffer,
            NegotiationOutcome::AnswerCreated(_) => NegotiationStep::CreateAnswer,
            NegotiationOutcome::AnswerApplied(_) => NegotiationStep::ApplyAnswer,
        }
    }
}

/// Sending half of the per-peer event stream, bound to one connection instance
#[derive(Debug, Clone)]
pub struct PeerEventSender {
    peer_id: PeerId,
    connection_id: ConnectionId,
    tx: mpsc::UnboundedSender<PeerEvent>,
}

impl PeerEventSender {
    pub fn new(
        peer_id: PeerId,
        connection_id: ConnectionId,
        tx: mpsc::UnboundedSender<PeerEvent>,
    ) -> Self {
        Self {
            peer_id,
            connection_id,
            tx,
        }
    }

    pub fn peer_id(&self) -> &PeerId {
        &self.peer_id
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    /// Post an event to the session loop
    ///
    /// Returns false once the loop has gone away.
    pub fn emit(&self, kind: PeerEventKind) -> bool {
        self.tx
            .send(PeerEvent {
                peer_id: self.peer_id.clone(),
                connection_id: self.connection_id,
                kind,
            })
            .is_ok()
    }
}

/// Event surfaced to the application
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Text received on a data channel
    TextReceived {
        /// Sender, when known
        peer_id: Option<PeerId>,
        text: String,
    },
    /// Transport connectivity established
    PeerConnected(PeerId),
    /// Data channel with the peer is open
    ChannelOpened(PeerId),
    /// Data channel with the peer closed
    ChannelClosed(PeerId),
    /// Peer connection torn down after a failure
    PeerClosed { peer_id: PeerId, reason: String },
    /// Signaling server reported that nobody else is in the room
    RoomEmpty,
}
