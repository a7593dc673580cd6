//! WebRTC transport for rendezvous sessions
//!
//! Implements the core's [`TransportEngine`](rendezvous_core::TransportEngine)
//! on top of the `webrtc` crate and carries signaling messages over a
//! WebSocket connection to the rendezvous server.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use rendezvous_core::{Session, SessionConfig};
//! use rendezvous_webrtc::{WebRtcEngine, WebSocketSignaling};
//!
//! # async fn run() -> rendezvous_core::Result<()> {
//! let config = SessionConfig::with_token("room-42");
//! let engine = Arc::new(WebRtcEngine::new(&config)?);
//! let (outbound, inbound) = WebSocketSignaling::connect(&config).await?.split();
//!
//! let (session, handle, _events) = Session::new(&config, engine, outbound)?;
//! tokio::spawn(session.run(inbound));
//! handle.broadcast_text("hello room").await?;
//! # Ok(())
//! # }
//! ```

#![warn(clippy::all)]

pub mod channel;
pub mod engine;
pub mod peer;
pub mod signaling;

pub use channel::WebRtcDataChannel;
pub use engine::WebRtcEngine;
pub use peer::WebRtcPeerHandle;
pub use signaling::WebSocketSignaling;
