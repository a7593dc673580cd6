//! In-memory transport engine for tests
//!
//! Descriptions are plain strings (`offer-for-<peer>`), candidates are
//! recorded, and any description or candidate containing `malformed` is
//! rejected the way a real engine would reject unparsable input.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::config::DataChannelMode;
use crate::engine::{DataChannelHandle, TransportEngine, TransportHandle};
use crate::event::{PeerEvent, PeerEventKind, PeerEventSender};
use crate::mediator::SignalingMediator;
use crate::types::{ConnectionId, IceCandidate, PeerId, SdpKind, SessionDescription};
use crate::{Error, Result};

/// Engine creating [`FakeHandle`]s
#[derive(Default)]
pub struct FakeEngine {
    handles: Mutex<HashMap<PeerId, Vec<Arc<FakeHandle>>>>,
}

impl FakeEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Most recent handle created for `peer_id`
    pub fn handle(&self, peer_id: &PeerId) -> Option<Arc<FakeHandle>> {
        self.handles
            .lock()
            .get(peer_id)
            .and_then(|handles| handles.last().cloned())
    }

    /// Number of handles ever created for `peer_id`
    pub fn handles_created(&self, peer_id: &PeerId) -> usize {
        self.handles.lock().get(peer_id).map_or(0, Vec::len)
    }
}

#[async_trait]
impl TransportEngine for FakeEngine {
    async fn create_handle(
        &self,
        peer_id: &PeerId,
        events: PeerEventSender,
    ) -> Result<Arc<dyn TransportHandle>> {
        let handle = FakeHandle::new(events);
        self.handles
            .lock()
            .entry(peer_id.clone())
            .or_default()
            .push(Arc::clone(&handle));
        Ok(handle)
    }
}

#[derive(Default)]
struct HandleState {
    local: Option<SessionDescription>,
    remote: Option<SessionDescription>,
    applied: Vec<IceCandidate>,
    channels: Vec<Arc<FakeChannel>>,
    offers: u32,
    answers: u32,
    closed: bool,
}

/// Transport handle that records every call
pub struct FakeHandle {
    events: PeerEventSender,
    state: Mutex<HandleState>,
}

impl FakeHandle {
    pub fn new(events: PeerEventSender) -> Arc<Self> {
        Arc::new(Self {
            events,
            state: Mutex::new(HandleState::default()),
        })
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.events.connection_id()
    }

    /// Raise an event as the engine would
    pub fn emit(&self, kind: PeerEventKind) -> bool {
        self.events.emit(kind)
    }

    /// Simulate the remote announcing its data channel
    pub fn accept_channel(&self, label: &str) -> Arc<FakeChannel> {
        let channel = FakeChannel::new(label);
        self.state.lock().channels.push(Arc::clone(&channel));
        self.events
            .emit(PeerEventKind::ChannelAccepted(channel.clone()));
        channel
    }

    pub fn applied_candidates(&self) -> Vec<IceCandidate> {
        self.state.lock().applied.clone()
    }

    pub fn local_description(&self) -> Option<SessionDescription> {
        self.state.lock().local.clone()
    }

    pub fn remote_description(&self) -> Option<SessionDescription> {
        self.state.lock().remote.clone()
    }

    pub fn channels(&self) -> Vec<Arc<FakeChannel>> {
        self.state.lock().channels.clone()
    }

    pub fn offers_created(&self) -> u32 {
        self.state.lock().offers
    }

    pub fn answers_created(&self) -> u32 {
        self.state.lock().answers
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    fn ensure_open(&self) -> Result<()> {
        if self.state.lock().closed {
            return Err(Error::Transport("transport closed".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl TransportHandle for FakeHandle {
    async fn create_offer(&self) -> Result<SessionDescription> {
        self.ensure_open()?;
        self.state.lock().offers += 1;
        Ok(SessionDescription::offer(format!(
            "offer-for-{}",
            self.events.peer_id()
        )))
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        self.ensure_open()?;
        let mut state = self.state.lock();
        if !matches!(&state.remote, Some(d) if d.kind == SdpKind::Offer) {
            return Err(Error::Transport("no remote offer to answer".to_string()));
        }
        state.answers += 1;
        Ok(SessionDescription::answer(format!(
            "answer-for-{}",
            self.events.peer_id()
        )))
    }

    async fn set_local_description(&self, description: SessionDescription) -> Result<()> {
        self.ensure_open()?;
        self.state.lock().local = Some(description);
        Ok(())
    }

    async fn set_remote_description(&self, description: SessionDescription) -> Result<()> {
        self.ensure_open()?;
        if description.sdp.contains("malformed") {
            return Err(Error::Transport(format!(
                "failed to parse remote description: {}",
                description.sdp
            )));
        }
        self.state.lock().remote = Some(description);
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        self.ensure_open()?;
        let mut state = self.state.lock();
        if state.remote.is_none() {
            return Err(Error::Transport(
                "remote description not set".to_string(),
            ));
        }
        if candidate.candidate.contains("malformed") {
            return Err(Error::Transport(format!(
                "failed to parse candidate: {}",
                candidate.candidate
            )));
        }
        state.applied.push(candidate);
        Ok(())
    }

    async fn create_data_channel(
        &self,
        label: &str,
        _mode: DataChannelMode,
    ) -> Result<Arc<dyn DataChannelHandle>> {
        self.ensure_open()?;
        let channel = FakeChannel::new(label);
        self.state.lock().channels.push(Arc::clone(&channel));
        Ok(channel)
    }

    async fn close(&self) -> Result<()> {
        self.state.lock().closed = true;
        Ok(())
    }
}

#[derive(Default)]
struct ChannelLog {
    sent: Vec<String>,
    closed: bool,
    fail_sends: bool,
}

/// Data channel that records sent texts
pub struct FakeChannel {
    label: String,
    state: Mutex<ChannelLog>,
}

impl FakeChannel {
    pub fn new(label: &str) -> Arc<Self> {
        Arc::new(Self {
            label: label.to_string(),
            state: Mutex::new(ChannelLog::default()),
        })
    }

    pub fn sent(&self) -> Vec<String> {
        self.state.lock().sent.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Make every following send fail
    pub fn fail_sends(&self) {
        self.state.lock().fail_sends = true;
    }
}

#[async_trait]
impl DataChannelHandle for FakeChannel {
    fn label(&self) -> String {
        self.label.clone()
    }

    async fn send_text(&self, text: &str) -> Result<()> {
        let mut state = self.state.lock();
        if state.closed || state.fail_sends {
            return Err(Error::DataChannel(format!(
                "cannot send on channel '{}'",
                self.label
            )));
        }
        state.sent.push(text.to_string());
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.state.lock().closed = true;
        Ok(())
    }
}

/// Feed pending peer events to the mediator until none arrive for a while
///
/// Returns the errors the mediator reported.
pub async fn drain_events(
    mediator: &mut SignalingMediator,
    events: &mut mpsc::UnboundedReceiver<PeerEvent>,
) -> Vec<Error> {
    let mut errors = Vec::new();
    while let Ok(Some(event)) = tokio::time::timeout(Duration::from_millis(100), events.recv()).await
    {
        if let Err(e) = mediator.handle_peer_event(event).await {
            errors.push(e);
        }
    }
    errors
}
