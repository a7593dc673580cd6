//! Signaling mediator
//!
//! Turns inbound signaling messages into state machine transitions and
//! transport artifacts (descriptions, candidates) into outbound signaling.
//! All registry mutation happens here, on the session loop. Description
//! creation and application run in spawned tasks and report back as
//! [`PeerEventKind::Negotiated`] events.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::batcher::apply_remote_candidates;
use crate::channel::{self, BroadcastReport, DataChannelSlot};
use crate::config::{DataChannelMode, SessionConfig};
use crate::connection::{NegotiationState, PeerConnection};
use crate::engine::{DataChannelHandle, TransportEngine, TransportHandle};
use crate::event::{
    Connectivity, NegotiationOutcome, NegotiationStep, PeerEvent, PeerEventKind, SessionEvent,
};
use crate::registry::PeerRegistry;
use crate::signaling::{InboundSignal, OutboundSignal};
use crate::types::{IceCandidate, PeerId, Role, SessionDescription};
use crate::{Error, Result};

/// Work carried by a negotiation task
enum Negotiation {
    CreateOffer,
    CreateAnswer(SessionDescription),
    ApplyAnswer(SessionDescription),
}

impl Negotiation {
    fn step(&self) -> NegotiationStep {
        match self {
            Negotiation::CreateOffer => NegotiationStep::CreateOffer,
            Negotiation::CreateAnswer(_) => NegotiationStep::CreateAnswer,
            Negotiation::ApplyAnswer(_) => NegotiationStep::ApplyAnswer,
        }
    }

    async fn run(self, handle: &dyn TransportHandle) -> NegotiationOutcome {
        match self {
            Negotiation::CreateOffer => NegotiationOutcome::OfferCreated(
                async {
                    let offer = handle.create_offer().await?;
                    handle.set_local_description(offer.clone()).await?;
                    Ok::<_, Error>(offer)
                }
                .await,
            ),
            Negotiation::CreateAnswer(offer) => NegotiationOutcome::AnswerCreated(
                async {
                    handle.set_remote_description(offer).await?;
                    let answer = handle.create_answer().await?;
                    handle.set_local_description(answer.clone()).await?;
                    Ok::<_, Error>(answer)
                }
                .await,
            ),
            Negotiation::ApplyAnswer(answer) => {
                NegotiationOutcome::AnswerApplied(handle.set_remote_description(answer).await)
            }
        }
    }
}

/// Start `work` off-loop for `conn`
fn spawn_negotiation(conn: &mut PeerConnection, work: Negotiation) -> Result<()> {
    conn.begin(work.step())?;

    let handle = conn.handle();
    let events = conn.events().clone();
    let task = tokio::spawn(async move {
        let outcome = work.run(handle.as_ref()).await;
        if !events.emit(PeerEventKind::Negotiated(outcome)) {
            debug!(peer_id = %events.peer_id(), "Session gone before negotiation finished");
        }
    });
    conn.set_task(task.abort_handle());
    Ok(())
}

/// Create the initiator's data channel, then start the offer
async fn begin_offer(conn: &mut PeerConnection, label: &str, mode: DataChannelMode) -> Result<()> {
    let channel = conn.handle().create_data_channel(label, mode).await?;
    conn.channel_mut().attach(channel)?;
    spawn_negotiation(conn, Negotiation::CreateOffer)
}

/// Coordinates every peer of one session
pub struct SignalingMediator {
    registry: PeerRegistry,
    label: String,
    mode: DataChannelMode,
    outbound: mpsc::UnboundedSender<OutboundSignal>,
    session_events: mpsc::UnboundedSender<SessionEvent>,
    terminated: bool,
}

impl SignalingMediator {
    /// Create a mediator
    ///
    /// Transport handles report into `peer_events`; the receiving end must be
    /// fed back through [`SignalingMediator::handle_peer_event`].
    pub fn new(
        engine: Arc<dyn TransportEngine>,
        config: &SessionConfig,
        peer_events: mpsc::UnboundedSender<PeerEvent>,
        outbound: mpsc::UnboundedSender<OutboundSignal>,
        session_events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Self {
        Self {
            registry: PeerRegistry::new(engine, peer_events),
            label: config.data_channel_label.clone(),
            mode: config.data_channel_mode,
            outbound,
            session_events,
            terminated: false,
        }
    }

    pub fn registry(&self) -> &PeerRegistry {
        &self.registry
    }

    /// The server rejected the session
    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// Handle one message from the signaling server
    pub async fn handle_signal(&mut self, signal: InboundSignal) -> Result<()> {
        if self.terminated {
            return Err(Error::InvalidSession(format!(
                "session terminated, rejecting {}",
                signal.name()
            )));
        }

        debug!(event = signal.name(), "Signal received");

        match signal {
            InboundSignal::InvalidToken => {
                self.terminated = true;
                error!("Signaling server rejected the session token");
                Err(Error::InvalidSession(
                    "signaling server rejected the session token".to_string(),
                ))
            }
            InboundSignal::RoomEmpty => {
                info!("Room is empty, waiting for peers");
                self.emit(SessionEvent::RoomEmpty);
                Ok(())
            }
            InboundSignal::RequestOffer { existing_peers } => {
                for peer_id in existing_peers {
                    if let Err(e) = self.start_offer(&peer_id).await {
                        warn!(peer_id = %peer_id, "Failed to start offer: {}", e);
                    }
                }
                Ok(())
            }
            InboundSignal::RequestAnswer { peer_id, offer } => {
                self.start_answer(&peer_id, offer).await
            }
            InboundSignal::Answer { peer_id, answer } => self.on_answer(peer_id, answer).await,
            InboundSignal::CandidateBatch {
                peer_id,
                candidates,
            } => self.on_remote_candidates(peer_id, candidates).await,
        }
    }

    /// Handle one event from a transport handle or negotiation task
    pub async fn handle_peer_event(&mut self, event: PeerEvent) -> Result<()> {
        let PeerEvent {
            peer_id,
            connection_id,
            kind,
        } = event;

        if !self.registry.is_current(&peer_id, connection_id) {
            debug!(
                peer_id = %peer_id,
                connection_id = %connection_id,
                event = ?kind,
                "Dropping event from stale connection"
            );
            return Ok(());
        }

        match kind {
            PeerEventKind::CandidateDiscovered(candidate) => {
                let batch = self
                    .registry
                    .get_mut(&peer_id)
                    .and_then(|conn| conn.discover_candidate(candidate));
                if let Some(candidates) = batch {
                    self.send_candidates(&peer_id, candidates);
                }
                Ok(())
            }
            PeerEventKind::NegotiationStateChanged(state) => {
                debug!(peer_id = %peer_id, state = ?state, "Engine signaling state changed");
                Ok(())
            }
            PeerEventKind::ConnectivityChanged(connectivity) => {
                self.on_connectivity(&peer_id, connectivity).await
            }
            PeerEventKind::ChannelAccepted(channel) => {
                self.on_channel_accepted(peer_id, channel).await
            }
            PeerEventKind::ChannelOpened => {
                if let Some(conn) = self.registry.get_mut(&peer_id) {
                    conn.channel_mut().mark_open();
                }
                info!(peer_id = %peer_id, "Data channel open");
                self.emit(SessionEvent::ChannelOpened(peer_id));
                Ok(())
            }
            PeerEventKind::ChannelClosed => {
                if let Some(conn) = self.registry.get_mut(&peer_id) {
                    conn.channel_mut().mark_closed();
                }
                info!(peer_id = %peer_id, "Data channel closed");
                self.emit(SessionEvent::ChannelClosed(peer_id));
                Ok(())
            }
            PeerEventKind::MessageReceived(text) => {
                self.emit(SessionEvent::TextReceived {
                    peer_id: Some(peer_id),
                    text,
                });
                Ok(())
            }
            PeerEventKind::Negotiated(outcome) => self.on_negotiated(&peer_id, outcome).await,
        }
    }

    /// Send `text` on every open data channel
    pub async fn broadcast_text(&self, text: &str) -> Result<BroadcastReport> {
        let slots: Vec<(&PeerId, &DataChannelSlot)> = self
            .registry
            .iter()
            .map(|(peer_id, conn)| (peer_id, conn.channel()))
            .collect();
        let report = channel::broadcast(slots, text).await?;
        debug!(
            sent = report.sent,
            skipped = report.skipped,
            failed = report.failed,
            "Broadcast text"
        );
        Ok(report)
    }

    /// Release every peer
    pub async fn shutdown(&mut self) {
        info!(peers = self.registry.len(), "Shutting down peers");
        self.registry.clear().await;
    }

    async fn start_offer(&mut self, peer_id: &PeerId) -> Result<()> {
        let label = self.label.clone();
        let mode = self.mode;

        let Some(conn) = self.prepare(peer_id, Role::Initiator).await? else {
            return Ok(());
        };

        if let Err(e) = begin_offer(conn, &label, mode).await {
            let err = Error::NegotiationFailure {
                peer_id: peer_id.clone(),
                reason: e.to_string(),
            };
            self.close_peer(peer_id, err.to_string()).await;
            return Err(err);
        }
        Ok(())
    }

    async fn start_answer(&mut self, peer_id: &PeerId, offer: SessionDescription) -> Result<()> {
        let Some(conn) = self.prepare(peer_id, Role::Responder).await? else {
            return Ok(());
        };
        spawn_negotiation(conn, Negotiation::CreateAnswer(offer))
    }

    /// Find or create the connection an offer/answer request refers to
    ///
    /// Returns None for a duplicate request whose negotiation is already
    /// running. An entry that has left New belongs to an earlier session of
    /// the same remote and is replaced.
    async fn prepare(&mut self, peer_id: &PeerId, role: Role) -> Result<Option<&mut PeerConnection>> {
        let existing = self
            .registry
            .get(peer_id)
            .filter(|conn| conn.is_live())
            .map(|conn| (conn.role(), conn.state()));

        match existing {
            Some((current, NegotiationState::New)) if current == role => {
                debug!(peer_id = %peer_id, role = %role, "Negotiation already in progress");
                Ok(None)
            }
            Some((current, NegotiationState::New)) => Err(Error::ProtocolViolation {
                peer_id: peer_id.clone(),
                reason: format!("{} requested while negotiating as {}", role, current),
            }),
            Some(_) => {
                info!(peer_id = %peer_id, "Peer re-joined, replacing connection");
                Ok(Some(self.registry.replace(peer_id, role).await?))
            }
            None => {
                let (conn, _) = self.registry.get_or_create(peer_id, role).await?;
                Ok(Some(conn))
            }
        }
    }

    async fn on_answer(&mut self, peer_id: PeerId, answer: SessionDescription) -> Result<()> {
        let Some(conn) = self
            .registry
            .get_mut(&peer_id)
            .filter(|conn| conn.is_live())
        else {
            return Err(Error::ProtocolViolation {
                peer_id,
                reason: "answer for unknown peer".to_string(),
            });
        };

        if conn.role() != Role::Initiator {
            return Err(Error::ProtocolViolation {
                peer_id,
                reason: "answer for a connection we did not offer".to_string(),
            });
        }

        if conn.negotiating().is_some() {
            conn.defer(InboundSignal::Answer { peer_id, answer });
            return Ok(());
        }

        if conn.state() != NegotiationState::OfferCreated {
            let reason = format!("unexpected answer while {:?}", conn.state());
            return Err(Error::ProtocolViolation { peer_id, reason });
        }

        spawn_negotiation(conn, Negotiation::ApplyAnswer(answer))
    }

    async fn on_remote_candidates(
        &mut self,
        peer_id: PeerId,
        candidates: Vec<IceCandidate>,
    ) -> Result<()> {
        let Some(conn) = self
            .registry
            .get_mut(&peer_id)
            .filter(|conn| conn.is_live())
        else {
            warn!(
                peer_id = %peer_id,
                count = candidates.len(),
                "Dropping candidates for unknown peer"
            );
            return Ok(());
        };

        if !conn.accepts_remote_candidates() {
            conn.defer(InboundSignal::CandidateBatch {
                peer_id,
                candidates,
            });
            return Ok(());
        }

        let handle = conn.handle();
        apply_remote_candidates(handle.as_ref(), &peer_id, candidates).await;
        Ok(())
    }

    async fn on_channel_accepted(
        &mut self,
        peer_id: PeerId,
        channel: Arc<dyn DataChannelHandle>,
    ) -> Result<()> {
        let label = channel.label();
        let Some(conn) = self.registry.get_mut(&peer_id) else {
            return Ok(());
        };

        if conn.role() != Role::Responder {
            warn!(peer_id = %peer_id, label = %label, "Initiator received a remote data channel");
        }

        if let Err(e) = conn.channel_mut().attach(Arc::clone(&channel)) {
            warn!(peer_id = %peer_id, label = %label, "Closing rejected data channel: {}", e);
            if let Err(close_err) = channel.close().await {
                debug!(peer_id = %peer_id, "Error closing rejected data channel: {}", close_err);
            }
            return Err(Error::ProtocolViolation {
                peer_id,
                reason: e.to_string(),
            });
        }

        info!(peer_id = %peer_id, label = %label, "Data channel accepted");
        Ok(())
    }

    async fn on_connectivity(&mut self, peer_id: &PeerId, connectivity: Connectivity) -> Result<()> {
        match connectivity {
            Connectivity::Connected => {
                let connected = self
                    .registry
                    .get_mut(peer_id)
                    .is_some_and(|conn| conn.mark_connected());
                if connected {
                    self.emit(SessionEvent::PeerConnected(peer_id.clone()));
                }
                Ok(())
            }
            Connectivity::Disconnected => {
                if let Some(conn) = self.registry.get_mut(peer_id) {
                    conn.clear_pending_connectivity();
                }
                warn!(peer_id = %peer_id, "Peer disconnected, waiting for recovery");
                Ok(())
            }
            Connectivity::Failed => {
                let err = Error::TransportFailure {
                    peer_id: peer_id.clone(),
                    reason: "connectivity failed".to_string(),
                };
                self.close_peer(peer_id, err.to_string()).await;
                Err(err)
            }
            other => {
                debug!(peer_id = %peer_id, connectivity = ?other, "Connectivity changed");
                Ok(())
            }
        }
    }

    async fn on_negotiated(&mut self, peer_id: &PeerId, outcome: NegotiationOutcome) -> Result<()> {
        let step = outcome.step();
        let Some(conn) = self.registry.get_mut(peer_id) else {
            return Ok(());
        };

        let completion = match outcome {
            NegotiationOutcome::OfferCreated(Ok(offer)) => conn.complete_offer().map(|()| {
                let signal = OutboundSignal::Offer {
                    remote_peer: peer_id.clone(),
                    offer,
                };
                (Some(signal), None)
            }),
            NegotiationOutcome::AnswerCreated(Ok(answer)) => {
                conn.complete_answer().map(|flush| {
                    let signal = OutboundSignal::Answer {
                        initiating_peer: peer_id.clone(),
                        answer,
                    };
                    (Some(signal), flush)
                })
            }
            NegotiationOutcome::AnswerApplied(Ok(())) => {
                conn.complete_apply_answer().map(|flush| (None, flush))
            }
            NegotiationOutcome::OfferCreated(Err(e))
            | NegotiationOutcome::AnswerCreated(Err(e))
            | NegotiationOutcome::AnswerApplied(Err(e)) => Err(Error::NegotiationFailure {
                peer_id: peer_id.clone(),
                reason: format!("{} failed: {}", step.as_str(), e),
            }),
        };

        match completion {
            Ok((description, flush)) => {
                debug!(peer_id = %peer_id, step = step.as_str(), "Negotiation step completed");
                if let Some(signal) = description {
                    self.send(signal);
                }
                if let Some(candidates) = flush {
                    self.send_candidates(peer_id, candidates);
                }
                let connected = self
                    .registry
                    .get_mut(peer_id)
                    .is_some_and(|conn| conn.connect_if_pending());
                if connected {
                    self.emit(SessionEvent::PeerConnected(peer_id.clone()));
                }
                self.replay_deferred(peer_id).await;
                Ok(())
            }
            Err(err) => {
                conn.fail_negotiation();
                self.close_peer(peer_id, err.to_string()).await;
                Err(err)
            }
        }
    }

    /// Re-dispatch messages held while a step was in flight
    async fn replay_deferred(&mut self, peer_id: &PeerId) {
        let deferred = match self.registry.get_mut(peer_id) {
            Some(conn) => conn.take_deferred(),
            None => return,
        };

        for signal in deferred {
            if let Err(e) = self.handle_signal(signal).await {
                warn!(peer_id = %peer_id, "Deferred signal failed: {}", e);
            }
        }
    }

    async fn close_peer(&mut self, peer_id: &PeerId, reason: String) {
        warn!(peer_id = %peer_id, reason = %reason, "Closing peer");
        if self.registry.remove(peer_id).await {
            self.emit(SessionEvent::PeerClosed {
                peer_id: peer_id.clone(),
                reason,
            });
        }
    }

    fn send_candidates(&self, peer_id: &PeerId, candidates: Vec<IceCandidate>) {
        debug!(peer_id = %peer_id, count = candidates.len(), "Flushing candidates");
        self.send(OutboundSignal::CandidateBatch {
            peer_id: peer_id.clone(),
            candidates,
        });
    }

    fn send(&self, signal: OutboundSignal) {
        if self.terminated {
            debug!(peer_id = %signal.peer_id(), "Session terminated, suppressing outbound signal");
            return;
        }
        if self.outbound.send(signal).is_err() {
            warn!("Signaling channel closed, dropping outbound signal");
        }
    }

    fn emit(&self, event: SessionEvent) {
        if self.session_events.send(event).is_err() {
            debug!("No session event listener");
        }
    }
}
