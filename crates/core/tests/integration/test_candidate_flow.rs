//! Candidate gating, batching and remote application

use std::sync::Arc;

use rendezvous_core::event::{Connectivity, PeerEventKind};
use rendezvous_core::testing::{drain_events, FakeEngine};
use rendezvous_core::{
    Error, IceCandidate, InboundSignal, NegotiationState, OutboundSignal, PeerEvent, PeerId,
    SessionConfig, SessionDescription, SignalingMediator,
};
use tokio::sync::mpsc;

struct Harness {
    mediator: SignalingMediator,
    engine: Arc<FakeEngine>,
    peer_events: mpsc::UnboundedReceiver<PeerEvent>,
    outbound: mpsc::UnboundedReceiver<OutboundSignal>,
    _session_events: mpsc::UnboundedReceiver<rendezvous_core::SessionEvent>,
}

impl Harness {
    fn new() -> Self {
        let engine = FakeEngine::new();
        let (peer_tx, peer_events) = mpsc::unbounded_channel();
        let (out_tx, outbound) = mpsc::unbounded_channel();
        let (session_tx, session_events) = mpsc::unbounded_channel();
        let mediator = SignalingMediator::new(
            engine.clone(),
            &SessionConfig::with_token("room"),
            peer_tx,
            out_tx,
            session_tx,
        );

        Self {
            mediator,
            engine,
            peer_events,
            outbound,
            _session_events: session_events,
        }
    }

    async fn signal(&mut self, signal: InboundSignal) {
        self.mediator.handle_signal(signal).await.unwrap();
    }

    async fn settle(&mut self) -> Vec<Error> {
        drain_events(&mut self.mediator, &mut self.peer_events).await
    }

    fn sent(&mut self) -> Vec<OutboundSignal> {
        std::iter::from_fn(|| self.outbound.try_recv().ok()).collect()
    }

    fn discover(&self, peer_id: &PeerId, candidate: &str) {
        let handle = self.engine.handle(peer_id).unwrap();
        assert!(handle.emit(PeerEventKind::CandidateDiscovered(IceCandidate::new(candidate))));
    }

    async fn offer_to(&mut self, peer_id: &PeerId) {
        self.signal(InboundSignal::RequestOffer {
            existing_peers: vec![peer_id.clone()],
        })
        .await;
    }

    async fn answer_from(&mut self, peer_id: &PeerId) {
        self.signal(InboundSignal::Answer {
            peer_id: peer_id.clone(),
            answer: SessionDescription::answer(format!("answer-from-{}", peer_id)),
        })
        .await;
    }

    async fn respond_to(&mut self, peer_id: &PeerId) {
        self.signal(InboundSignal::RequestAnswer {
            peer_id: peer_id.clone(),
            offer: SessionDescription::offer(format!("offer-from-{}", peer_id)),
        })
        .await;
    }
}

fn batch(peer_id: &PeerId, candidates: &[&str]) -> OutboundSignal {
    OutboundSignal::CandidateBatch {
        peer_id: peer_id.clone(),
        candidates: candidates.iter().map(|c| IceCandidate::new(*c)).collect(),
    }
}

fn candidates(list: &[&str]) -> Vec<IceCandidate> {
    list.iter().map(|c| IceCandidate::new(*c)).collect()
}

#[tokio::test]
async fn test_initiator_holds_candidates_until_stable() {
    let mut h = Harness::new();
    let a = PeerId::from("A");

    h.offer_to(&a).await;
    h.discover(&a, "candidate:1");
    h.settle().await;

    let sent = h.sent();
    assert_eq!(sent.len(), 1);
    assert!(matches!(sent[0], OutboundSignal::Offer { .. }));

    h.discover(&a, "candidate:2");
    h.settle().await;
    assert!(h.sent().is_empty(), "gate stays closed in OfferCreated");

    let conn = h.mediator.registry().get(&a).unwrap();
    assert!(!conn.batcher().can_flush());
    assert_eq!(conn.batcher().pending().len(), 2);

    h.answer_from(&a).await;
    h.settle().await;

    assert_eq!(h.sent(), vec![batch(&a, &["candidate:1", "candidate:2"])]);
    let conn = h.mediator.registry().get(&a).unwrap();
    assert!(conn.batcher().can_flush());
    assert!(conn.batcher().pending().is_empty());

    h.discover(&a, "candidate:3");
    h.settle().await;
    assert_eq!(h.sent(), vec![batch(&a, &["candidate:3"])]);
}

#[tokio::test]
async fn test_responder_flushes_after_answer() {
    let mut h = Harness::new();
    let c = PeerId::from("C");

    h.respond_to(&c).await;
    h.discover(&c, "candidate:1");
    h.discover(&c, "candidate:2");
    h.settle().await;

    let sent = h.sent();
    assert_eq!(sent.len(), 2);
    assert!(matches!(sent[0], OutboundSignal::Answer { .. }));
    assert_eq!(sent[1], batch(&c, &["candidate:1", "candidate:2"]));
}

#[tokio::test]
async fn test_stable_without_candidates_sends_no_batch() {
    let mut h = Harness::new();
    let c = PeerId::from("C");

    h.respond_to(&c).await;
    h.settle().await;

    let sent = h.sent();
    assert_eq!(sent.len(), 1, "no empty candidate batch");
    assert!(matches!(sent[0], OutboundSignal::Answer { .. }));
}

#[tokio::test]
async fn test_malformed_remote_candidate_does_not_block_others() {
    let mut h = Harness::new();
    let c = PeerId::from("C");

    h.respond_to(&c).await;
    h.settle().await;

    h.signal(InboundSignal::CandidateBatch {
        peer_id: c.clone(),
        candidates: candidates(&["candidate:1", "candidate:malformed", "candidate:3"]),
    })
    .await;

    let handle = h.engine.handle(&c).unwrap();
    assert_eq!(
        handle.applied_candidates(),
        candidates(&["candidate:1", "candidate:3"])
    );
    assert_eq!(
        h.mediator.registry().get(&c).unwrap().state(),
        NegotiationState::Stable
    );
}

#[tokio::test]
async fn test_remote_candidates_before_answer_are_deferred() {
    let mut h = Harness::new();
    let a = PeerId::from("A");

    h.offer_to(&a).await;
    h.settle().await;

    h.signal(InboundSignal::CandidateBatch {
        peer_id: a.clone(),
        candidates: candidates(&["candidate:r1", "candidate:r2"]),
    })
    .await;

    let handle = h.engine.handle(&a).unwrap();
    assert!(handle.applied_candidates().is_empty());
    assert_eq!(h.mediator.registry().get(&a).unwrap().deferred_len(), 1);

    h.answer_from(&a).await;
    h.settle().await;

    assert_eq!(
        handle.applied_candidates(),
        candidates(&["candidate:r1", "candidate:r2"])
    );
    assert_eq!(h.mediator.registry().get(&a).unwrap().deferred_len(), 0);
}

#[tokio::test]
async fn test_remote_candidates_during_answer_creation_are_deferred() {
    let mut h = Harness::new();
    let c = PeerId::from("C");

    h.respond_to(&c).await;
    h.signal(InboundSignal::CandidateBatch {
        peer_id: c.clone(),
        candidates: candidates(&["candidate:r1"]),
    })
    .await;
    h.signal(InboundSignal::CandidateBatch {
        peer_id: c.clone(),
        candidates: candidates(&["candidate:r2"]),
    })
    .await;
    h.settle().await;

    assert_eq!(
        h.engine.handle(&c).unwrap().applied_candidates(),
        candidates(&["candidate:r1", "candidate:r2"])
    );
}

#[tokio::test]
async fn test_events_from_replaced_connection_are_dropped() {
    let mut h = Harness::new();
    let a = PeerId::from("A");

    h.offer_to(&a).await;
    h.settle().await;
    let old = h.engine.handle(&a).unwrap();

    // the remote re-joined and now offers to us
    h.respond_to(&a).await;
    h.settle().await;
    h.sent();
    assert!(old.is_closed());

    assert!(old.emit(PeerEventKind::CandidateDiscovered(IceCandidate::new(
        "candidate:stale"
    ))));
    assert!(old.emit(PeerEventKind::ConnectivityChanged(Connectivity::Failed)));
    let errors = h.settle().await;

    assert!(errors.is_empty());
    assert!(h.sent().is_empty());
    let conn = h.mediator.registry().get(&a).unwrap();
    assert_eq!(conn.state(), NegotiationState::Stable);
    assert_ne!(conn.connection_id(), old.connection_id());

    h.discover(&a, "candidate:fresh");
    h.settle().await;
    assert_eq!(h.sent(), vec![batch(&a, &["candidate:fresh"])]);
}

#[tokio::test]
async fn test_candidates_are_not_shared_between_peers() {
    let mut h = Harness::new();
    let a = PeerId::from("A");
    let b = PeerId::from("B");

    h.signal(InboundSignal::RequestOffer {
        existing_peers: vec![a.clone(), b.clone()],
    })
    .await;
    h.discover(&a, "candidate:a1");
    h.discover(&b, "candidate:b1");
    h.settle().await;
    h.sent();

    h.answer_from(&b).await;
    h.settle().await;
    assert_eq!(h.sent(), vec![batch(&b, &["candidate:b1"])]);

    h.answer_from(&a).await;
    h.settle().await;
    assert_eq!(h.sent(), vec![batch(&a, &["candidate:a1"])]);
}
