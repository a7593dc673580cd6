//! Data channel management
//!
//! Initiators create the application channel before their offer; responders
//! receive it from the remote. Either way the channel lands in the peer's
//! [`DataChannelSlot`] and is driven by the same open/close/message events.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::engine::DataChannelHandle;
use crate::types::PeerId;
use crate::{Error, Result};

/// Largest text accepted by `broadcast_text`
pub const MAX_TEXT_SIZE: usize = 64 * 1024;

/// Data channel lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// Created or accepted, not yet open
    Connecting,
    Open,
    Closed,
}

/// Holder for the single data channel of a peer
#[derive(Default)]
pub struct DataChannelSlot {
    handle: Option<Arc<dyn DataChannelHandle>>,
    state: Option<ChannelState>,
}

impl std::fmt::Debug for DataChannelSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataChannelSlot")
            .field("label", &self.handle.as_ref().map(|h| h.label()))
            .field("state", &self.state)
            .finish()
    }
}

impl DataChannelSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the channel; a peer carries at most one
    pub fn attach(&mut self, handle: Arc<dyn DataChannelHandle>) -> Result<()> {
        if self.handle.is_some() {
            return Err(Error::DataChannel(format!(
                "data channel already attached, rejecting '{}'",
                handle.label()
            )));
        }
        self.handle = Some(handle);
        self.state = Some(ChannelState::Connecting);
        Ok(())
    }

    pub fn has_channel(&self) -> bool {
        self.handle.is_some()
    }

    /// State of the attached channel, None when nothing is attached
    pub fn state(&self) -> Option<ChannelState> {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == Some(ChannelState::Open)
    }

    pub fn mark_open(&mut self) {
        if self.handle.is_some() {
            self.state = Some(ChannelState::Open);
        }
    }

    pub fn mark_closed(&mut self) {
        if self.handle.is_some() {
            self.state = Some(ChannelState::Closed);
        }
    }

    /// Send text if the channel is open
    ///
    /// Returns Ok(false) when the send was skipped because the channel is not
    /// open. Nothing is queued.
    pub async fn send_text(&self, text: &str) -> Result<bool> {
        match &self.handle {
            Some(handle) if self.is_open() => {
                handle.send_text(text).await?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Close the channel if one is attached
    pub async fn close(&mut self) -> Result<()> {
        if let Some(handle) = &self.handle {
            if self.state != Some(ChannelState::Closed) {
                self.state = Some(ChannelState::Closed);
                handle.close().await?;
            }
        }
        Ok(())
    }
}

/// Reject texts the channel would not carry
pub fn check_text_size(text: &str) -> Result<()> {
    if text.len() > MAX_TEXT_SIZE {
        return Err(Error::DataChannel(format!(
            "text of {} bytes exceeds maximum of {} bytes",
            text.len(),
            MAX_TEXT_SIZE
        )));
    }
    Ok(())
}

/// Outcome of a broadcast
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Channels the text was written to
    pub sent: usize,
    /// Channels not open yet (or already closed)
    pub skipped: usize,
    /// Channels whose send returned an error
    pub failed: usize,
}

/// Send `text` on every open channel
///
/// A failing channel does not stop the broadcast.
pub async fn broadcast<'a, I>(slots: I, text: &str) -> Result<BroadcastReport>
where
    I: IntoIterator<Item = (&'a PeerId, &'a DataChannelSlot)>,
{
    check_text_size(text)?;

    let mut report = BroadcastReport::default();
    for (peer_id, slot) in slots {
        match slot.send_text(text).await {
            Ok(true) => report.sent += 1,
            Ok(false) => {
                debug!(peer_id = %peer_id, "Skipping peer without open data channel");
                report.skipped += 1;
            }
            Err(e) => {
                warn!(peer_id = %peer_id, "Failed to send text: {}", e);
                report.failed += 1;
            }
        }
    }
    Ok(report)
}
