//! Coordination core for multi-peer WebRTC rendezvous
//!
//! Participants meet through a shared signaling server and then talk over
//! direct peer-to-peer data channels. This crate is the part in between: one
//! state machine per remote peer, the offer/answer exchange, candidate gating
//! and batching, and data channel role selection, all driven from a single
//! event loop while several peers negotiate at once.
//!
//! The signaling transport and the peer-to-peer engine are collaborators
//! behind [`signaling`] message types and the [`engine`] traits.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │  Signaling adapter        Application                    │
//! │   ↓ InboundSignal          ↓ SessionHandle               │
//! │  Session (single loop) ←── PeerEvent ── transport engine │
//! │   └─ SignalingMediator                                   │
//! │       └─ PeerRegistry                                    │
//! │           └─ PeerConnection (state machine)              │
//! │               ├─ CandidateBatcher                        │
//! │               └─ DataChannelSlot                         │
//! │   ↓ OutboundSignal         ↓ SessionEvent                │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use rendezvous_core::SessionConfig;
//!
//! let config = SessionConfig::with_token("room-42");
//! assert!(config.validate().is_ok());
//! assert_eq!(config.data_channel_label, "chat");
//! ```

#![warn(clippy::all)]

pub mod batcher;
pub mod channel;
pub mod config;
pub mod connection;
pub mod engine;
pub mod error;
pub mod event;
pub mod mediator;
pub mod registry;
pub mod session;
pub mod signaling;
pub mod types;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use batcher::{ApplyReport, CandidateBatcher};
pub use channel::{BroadcastReport, ChannelState, DataChannelSlot};
pub use config::{DataChannelMode, SessionConfig, TurnServerConfig};
pub use connection::{NegotiationState, PeerConnection};
pub use engine::{DataChannelHandle, TransportEngine, TransportHandle};
pub use error::{Error, Result};
pub use event::{Connectivity, PeerEvent, PeerEventKind, PeerEventSender, SessionEvent};
pub use mediator::SignalingMediator;
pub use registry::PeerRegistry;
pub use session::{Session, SessionCommand, SessionHandle};
pub use signaling::{InboundSignal, OutboundSignal};
pub use types::{ConnectionId, IceCandidate, PeerId, Role, SdpKind, SessionDescription};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get crate version
pub fn version() -> &'static str {
    VERSION
}
