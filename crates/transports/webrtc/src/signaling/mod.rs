//! Signaling transport to the rendezvous server
//!
//! The wire vocabulary lives in `rendezvous_core::signaling`; this module
//! only moves those messages over a WebSocket.

pub mod websocket;

pub use websocket::WebSocketSignaling;
