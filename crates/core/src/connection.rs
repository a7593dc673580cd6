//! Per-peer connection state machine

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

use crate::batcher::CandidateBatcher;
use crate::channel::DataChannelSlot;
use crate::engine::TransportHandle;
use crate::event::{NegotiationStep, PeerEventSender};
use crate::signaling::InboundSignal;
use crate::types::{ConnectionId, IceCandidate, PeerId, Role};
use crate::{Error, Result};

/// Negotiation stage of a peer connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NegotiationState {
    /// Created, no description exchanged yet
    New,
    /// Local offer set, waiting for the remote answer
    OfferCreated,
    /// Remote offer and local answer set
    AnswerCreated,
    /// Both descriptions set; candidates may flow
    Stable,
    /// Transport reported connectivity
    Connected,
    /// Torn down
    Closed,
}

/// State of one remote peer
pub struct PeerConnection {
    peer_id: PeerId,
    connection_id: ConnectionId,
    role: Role,
    state: NegotiationState,
    local_description_set: bool,
    remote_description_set: bool,
    negotiating: Option<NegotiationStep>,
    task: Option<AbortHandle>,
    offers_created: u32,
    answers_created: u32,
    batcher: CandidateBatcher,
    channel: DataChannelSlot,
    deferred: VecDeque<InboundSignal>,
    handle: Arc<dyn TransportHandle>,
    events: PeerEventSender,
    created_at: Instant,
    connected_at: Option<Instant>,
    connectivity_pending: bool,
}

impl std::fmt::Debug for PeerConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerConnection")
            .field("peer_id", &self.peer_id)
            .field("connection_id", &self.connection_id)
            .field("role", &self.role)
            .field("state", &self.state)
            .field("negotiating", &self.negotiating)
            .field("channel", &self.channel)
            .field("deferred", &self.deferred.len())
            .finish()
    }
}

impl PeerConnection {
    pub fn new(
        peer_id: PeerId,
        connection_id: ConnectionId,
        role: Role,
        handle: Arc<dyn TransportHandle>,
        events: PeerEventSender,
    ) -> Self {
        Self {
            peer_id,
            connection_id,
            role,
            state: NegotiationState::New,
            local_description_set: false,
            remote_description_set: false,
            negotiating: None,
            task: None,
            offers_created: 0,
            answers_created: 0,
            batcher: CandidateBatcher::new(),
            channel: DataChannelSlot::new(),
            deferred: VecDeque::new(),
            handle,
            events,
            created_at: Instant::now(),
            connected_at: None,
            connectivity_pending: false,
        }
    }

    pub fn peer_id(&self) -> &PeerId {
        &self.peer_id
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn state(&self) -> NegotiationState {
        self.state
    }

    /// Step currently running off-loop
    pub fn negotiating(&self) -> Option<NegotiationStep> {
        self.negotiating
    }

    pub fn has_local_description(&self) -> bool {
        self.local_description_set
    }

    pub fn has_remote_description(&self) -> bool {
        self.remote_description_set
    }

    pub fn offers_created(&self) -> u32 {
        self.offers_created
    }

    pub fn answers_created(&self) -> u32 {
        self.answers_created
    }

    pub fn batcher(&self) -> &CandidateBatcher {
        &self.batcher
    }

    pub fn channel(&self) -> &DataChannelSlot {
        &self.channel
    }

    pub fn channel_mut(&mut self) -> &mut DataChannelSlot {
        &mut self.channel
    }

    /// Transport handle owned by this connection
    pub fn handle(&self) -> Arc<dyn TransportHandle> {
        Arc::clone(&self.handle)
    }

    /// Event sender bound to this connection instance
    pub fn events(&self) -> &PeerEventSender {
        &self.events
    }

    /// Not torn down
    pub fn is_live(&self) -> bool {
        self.state != NegotiationState::Closed
    }

    /// Start a negotiation step
    ///
    /// Fails if the role, the current state or an in-flight step forbids it.
    pub fn begin(&mut self, step: NegotiationStep) -> Result<()> {
        let allowed = self.negotiating.is_none()
            && match step {
                NegotiationStep::CreateOffer => {
                    self.role == Role::Initiator && self.state == NegotiationState::New
                }
                NegotiationStep::CreateAnswer => {
                    self.role == Role::Responder && self.state == NegotiationState::New
                }
                NegotiationStep::ApplyAnswer => {
                    self.role == Role::Initiator && self.state == NegotiationState::OfferCreated
                }
            };

        if !allowed {
            return Err(self.invalid(step.as_str()));
        }

        debug!(peer_id = %self.peer_id, step = step.as_str(), "Negotiation step started");
        self.negotiating = Some(step);
        Ok(())
    }

    /// Remember the task running the current step so teardown can abort it
    pub fn set_task(&mut self, task: AbortHandle) {
        self.task = Some(task);
    }

    /// Local offer is set: `New -> OfferCreated`
    pub fn complete_offer(&mut self) -> Result<()> {
        self.finish(NegotiationStep::CreateOffer)?;
        self.local_description_set = true;
        self.offers_created += 1;
        self.transition(NegotiationState::OfferCreated);
        Ok(())
    }

    /// Remote offer and local answer are set: `New -> AnswerCreated -> Stable`
    ///
    /// Returns the candidates released by reaching Stable.
    pub fn complete_answer(&mut self) -> Result<Option<Vec<IceCandidate>>> {
        self.finish(NegotiationStep::CreateAnswer)?;
        self.remote_description_set = true;
        self.local_description_set = true;
        self.answers_created += 1;
        self.transition(NegotiationState::AnswerCreated);
        Ok(self.enter_stable())
    }

    /// Remote answer is set: `OfferCreated -> Stable`
    ///
    /// Returns the candidates released by reaching Stable.
    pub fn complete_apply_answer(&mut self) -> Result<Option<Vec<IceCandidate>>> {
        self.finish(NegotiationStep::ApplyAnswer)?;
        self.remote_description_set = true;
        Ok(self.enter_stable())
    }

    /// A negotiation step failed; the connection is unusable
    pub fn fail_negotiation(&mut self) {
        self.negotiating = None;
        self.task = None;
        self.transition(NegotiationState::Closed);
    }

    /// Record a locally discovered candidate
    ///
    /// Returns a batch to send when the gate is open.
    pub fn discover_candidate(&mut self, candidate: IceCandidate) -> Option<Vec<IceCandidate>> {
        if !self.is_live() {
            return None;
        }
        self.batcher.push(candidate)
    }

    /// Transport reported connectivity: `Stable -> Connected`
    ///
    /// Returns false when the connection was not in Stable. Connectivity
    /// reported before Stable is remembered and applied by
    /// [`PeerConnection::connect_if_pending`].
    pub fn mark_connected(&mut self) -> bool {
        if self.state != NegotiationState::Stable {
            if self.is_live() && self.state != NegotiationState::Connected {
                debug!(
                    peer_id = %self.peer_id,
                    state = ?self.state,
                    "Connectivity before Stable, holding it"
                );
                self.connectivity_pending = true;
            }
            return false;
        }

        self.connectivity_pending = false;

        let now = Instant::now();
        self.connected_at = Some(now);
        self.transition(NegotiationState::Connected);
        info!(
            peer_id = %self.peer_id,
            elapsed = ?now.duration_since(self.created_at),
            "Peer connected"
        );
        true
    }

    /// Apply connectivity that was reported before Stable
    pub fn connect_if_pending(&mut self) -> bool {
        self.connectivity_pending && self.mark_connected()
    }

    /// Transport lost connectivity it had not yet been credited for
    pub fn clear_pending_connectivity(&mut self) {
        self.connectivity_pending = false;
    }

    /// Remote candidates can be applied right away
    pub fn accepts_remote_candidates(&self) -> bool {
        self.remote_description_set && self.negotiating.is_none()
    }

    /// Hold an inbound message until the in-flight step completes
    pub fn defer(&mut self, signal: InboundSignal) {
        debug!(peer_id = %self.peer_id, queued = self.deferred.len() + 1, "Deferring signal");
        self.deferred.push_back(signal);
    }

    /// Drain held messages in arrival order
    pub fn take_deferred(&mut self) -> Vec<InboundSignal> {
        self.deferred.drain(..).collect()
    }

    pub fn deferred_len(&self) -> usize {
        self.deferred.len()
    }

    /// Release the transport and data channel
    pub async fn teardown(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.negotiating = None;
        self.deferred.clear();

        if let Err(e) = self.channel.close().await {
            warn!(peer_id = %self.peer_id, "Error closing data channel: {}", e);
        }
        if let Err(e) = self.handle.close().await {
            warn!(peer_id = %self.peer_id, "Error closing transport: {}", e);
        }

        self.transition(NegotiationState::Closed);
    }

    fn finish(&mut self, step: NegotiationStep) -> Result<()> {
        if self.negotiating != Some(step) {
            return Err(self.invalid(step.as_str()));
        }
        self.negotiating = None;
        self.task = None;
        Ok(())
    }

    fn enter_stable(&mut self) -> Option<Vec<IceCandidate>> {
        self.transition(NegotiationState::Stable);
        self.batcher.open_gate()
    }

    fn transition(&mut self, to: NegotiationState) {
        if self.state != to {
            debug!(peer_id = %self.peer_id, from = ?self.state, to = ?to, "Negotiation state changed");
            self.state = to;
        }
    }

    fn invalid(&self, action: &'static str) -> Error {
        Error::InvalidTransition {
            peer_id: self.peer_id.clone(),
            state: self.state,
            action,
        }
    }
}
