//! Signaling wire messages
//!
//! Frames are JSON objects `{"event": NAME, "payload": {...}}` using the
//! event names of the rendezvous server.

use serde::{Deserialize, Serialize};

use crate::types::{IceCandidate, PeerId, SessionDescription};

/// Message received from the signaling server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload")]
pub enum InboundSignal {
    /// Session token rejected
    #[serde(rename = "INVALID_TOKEN")]
    InvalidToken,

    /// Nobody else is in the room yet
    #[serde(rename = "EMPTY_ROOM")]
    RoomEmpty,

    /// Create an offer for each listed peer
    #[serde(rename = "REQUEST_OFFER")]
    RequestOffer {
        #[serde(rename = "existingClients", alias = "existingPeers")]
        existing_peers: Vec<PeerId>,
    },

    /// Answer the offer of the given peer
    #[serde(rename = "REQUEST_ANSWER")]
    RequestAnswer {
        #[serde(rename = "initiatingClient", alias = "peerId")]
        peer_id: PeerId,
        offer: SessionDescription,
    },

    /// Remote answer to an offer we sent
    #[serde(rename = "ANSWER_OF_OFFER")]
    Answer {
        #[serde(rename = "remoteClient", alias = "peerId")]
        peer_id: PeerId,
        answer: SessionDescription,
    },

    /// Remote connectivity candidates
    #[serde(rename = "ICE_CANDIDATES")]
    CandidateBatch {
        #[serde(rename = "remoteClient", alias = "peerId")]
        peer_id: PeerId,
        candidates: Vec<IceCandidate>,
    },
}

impl InboundSignal {
    /// Peer the message is about, for per-peer messages
    pub fn peer_id(&self) -> Option<&PeerId> {
        match self {
            InboundSignal::RequestAnswer { peer_id, .. }
            | InboundSignal::Answer { peer_id, .. }
            | InboundSignal::CandidateBatch { peer_id, .. } => Some(peer_id),
            _ => None,
        }
    }

    /// Event name, for logging
    pub fn name(&self) -> &'static str {
        match self {
            InboundSignal::InvalidToken => "INVALID_TOKEN",
            InboundSignal::RoomEmpty => "EMPTY_ROOM",
            InboundSignal::RequestOffer { .. } => "REQUEST_OFFER",
            InboundSignal::RequestAnswer { .. } => "REQUEST_ANSWER",
            InboundSignal::Answer { .. } => "ANSWER_OF_OFFER",
            InboundSignal::CandidateBatch { .. } => "ICE_CANDIDATES",
        }
    }

    /// Serialize to a JSON frame
    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse a JSON frame
    pub fn from_json(json: &str) -> crate::Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Message sent to the signaling server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload")]
pub enum OutboundSignal {
    /// Offer for a peer listed in REQUEST_OFFER
    #[serde(rename = "WEBRTC_OFFER")]
    Offer {
        #[serde(rename = "remoteClient")]
        remote_peer: PeerId,
        offer: SessionDescription,
    },

    /// Answer for the peer that sent the offer
    #[serde(rename = "WEBRTC_ANSWER")]
    Answer {
        #[serde(rename = "initiatingClient")]
        initiating_peer: PeerId,
        answer: SessionDescription,
    },

    /// Locally discovered candidates for a peer
    #[serde(rename = "ICE_CANDIDATES")]
    CandidateBatch {
        #[serde(rename = "remoteClient")]
        peer_id: PeerId,
        candidates: Vec<IceCandidate>,
    },
}

impl OutboundSignal {
    /// Peer the message is addressed to
    pub fn peer_id(&self) -> &PeerId {
        match self {
            OutboundSignal::Offer { remote_peer, .. } => remote_peer,
            OutboundSignal::Answer {
                initiating_peer, ..
            } => initiating_peer,
            OutboundSignal::CandidateBatch { peer_id, .. } => peer_id,
        }
    }

    /// Serialize to a JSON frame
    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse a JSON frame
    pub fn from_json(json: &str) -> crate::Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}
