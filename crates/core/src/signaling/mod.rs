//! Signaling message types
//!
//! The core consumes [`InboundSignal`]s and produces [`OutboundSignal`]s; how
//! they travel is up to the signaling adapter.

pub mod protocol;

pub use protocol::{InboundSignal, OutboundSignal};
