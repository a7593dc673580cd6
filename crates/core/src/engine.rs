//! Transport engine seams
//!
//! The core drives peer-to-peer transports only through these traits. The
//! engine reports everything it observes (candidates, connectivity, channel
//! lifecycle, messages) through the [`PeerEventSender`] it is handed at
//! creation time.

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::DataChannelMode;
use crate::event::PeerEventSender;
use crate::types::{IceCandidate, PeerId, SessionDescription};
use crate::Result;

/// Factory for per-peer transport handles
#[async_trait]
pub trait TransportEngine: Send + Sync {
    /// Create a transport handle for one connection instance
    ///
    /// All callbacks of the new handle must be reported through `events`.
    async fn create_handle(
        &self,
        peer_id: &PeerId,
        events: PeerEventSender,
    ) -> Result<Arc<dyn TransportHandle>>;
}

/// One peer-to-peer transport instance
#[async_trait]
pub trait TransportHandle: Send + Sync {
    async fn create_offer(&self) -> Result<SessionDescription>;

    async fn create_answer(&self) -> Result<SessionDescription>;

    async fn set_local_description(&self, description: SessionDescription) -> Result<()>;

    async fn set_remote_description(&self, description: SessionDescription) -> Result<()>;

    /// Apply one remote connectivity candidate
    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()>;

    /// Create the application data channel (initiator side)
    async fn create_data_channel(
        &self,
        label: &str,
        mode: DataChannelMode,
    ) -> Result<Arc<dyn DataChannelHandle>>;

    /// Release the transport
    async fn close(&self) -> Result<()>;
}

/// Application data channel created or accepted on a transport
#[async_trait]
pub trait DataChannelHandle: Send + Sync {
    fn label(&self) -> String;

    async fn send_text(&self, text: &str) -> Result<()>;

    async fn close(&self) -> Result<()>;
}
