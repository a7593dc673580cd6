//! Session loop: inbound signaling, engine events and application commands

use std::sync::Arc;
use std::time::Duration;

use rendezvous_core::event::PeerEventKind;
use rendezvous_core::testing::FakeEngine;
use rendezvous_core::{
    BroadcastReport, Error, InboundSignal, OutboundSignal, PeerId, Session, SessionConfig,
    SessionDescription, SessionEvent, SessionHandle,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(2);

struct Running {
    engine: Arc<FakeEngine>,
    handle: SessionHandle,
    inbound: mpsc::UnboundedSender<InboundSignal>,
    outbound: mpsc::UnboundedReceiver<OutboundSignal>,
    events: mpsc::UnboundedReceiver<SessionEvent>,
    task: JoinHandle<rendezvous_core::Result<()>>,
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn start() -> Running {
    init_tracing();
    let engine = FakeEngine::new();
    let (out_tx, outbound) = mpsc::unbounded_channel();
    let (in_tx, in_rx) = mpsc::unbounded_channel();

    let (session, handle, events) =
        Session::new(&SessionConfig::with_token("room"), engine.clone(), out_tx).unwrap();
    let task = tokio::spawn(session.run(in_rx));

    Running {
        engine,
        handle,
        inbound: in_tx,
        outbound,
        events,
        task,
    }
}

async fn next_outbound(rx: &mut mpsc::UnboundedReceiver<OutboundSignal>) -> OutboundSignal {
    timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for outbound signal")
        .expect("outbound channel closed")
}

async fn wait_for_event<F>(rx: &mut mpsc::UnboundedReceiver<SessionEvent>, mut wanted: F) -> SessionEvent
where
    F: FnMut(&SessionEvent) -> bool,
{
    loop {
        let event = timeout(WAIT, rx.recv())
            .await
            .expect("timed out waiting for session event")
            .expect("session event channel closed");
        if wanted(&event) {
            return event;
        }
    }
}

#[test]
fn test_session_rejects_invalid_config() {
    let (out_tx, _out_rx) = mpsc::unbounded_channel();
    let result = Session::new(&SessionConfig::default(), FakeEngine::new(), out_tx);
    assert!(matches!(result, Err(Error::InvalidConfig(_))));
}

#[tokio::test]
async fn test_broadcast_reaches_only_open_channels() {
    let mut s = start();
    let a = PeerId::from("A");
    let b = PeerId::from("B");

    s.inbound
        .send(InboundSignal::RequestOffer {
            existing_peers: vec![a.clone()],
        })
        .unwrap();
    s.inbound
        .send(InboundSignal::RequestAnswer {
            peer_id: b.clone(),
            offer: SessionDescription::offer("offer-from-B"),
        })
        .unwrap();

    let mut seen = vec![
        next_outbound(&mut s.outbound).await,
        next_outbound(&mut s.outbound).await,
    ];
    seen.sort_by(|x, y| x.peer_id().cmp(y.peer_id()));
    assert!(matches!(seen[0], OutboundSignal::Offer { .. }));
    assert!(matches!(seen[1], OutboundSignal::Answer { .. }));

    // A's own channel opens; B announces one that never opens
    let handle_a = s.engine.handle(&a).unwrap();
    let handle_b = s.engine.handle(&b).unwrap();
    let accepted = handle_b.accept_channel("chat");
    handle_a.emit(PeerEventKind::ChannelOpened);
    wait_for_event(&mut s.events, |e| *e == SessionEvent::ChannelOpened(a.clone())).await;

    let report = s.handle.broadcast_text("hello").await.unwrap();
    assert_eq!(
        report,
        BroadcastReport {
            sent: 1,
            skipped: 1,
            failed: 0
        }
    );
    assert_eq!(handle_a.channels()[0].sent(), vec!["hello".to_string()]);
    assert!(accepted.sent().is_empty());

    assert!(s.handle.shutdown());
    timeout(WAIT, s.task).await.unwrap().unwrap().unwrap();
}

#[tokio::test]
async fn test_received_text_is_surfaced() {
    let mut s = start();
    let c = PeerId::from("C");

    s.inbound
        .send(InboundSignal::RequestAnswer {
            peer_id: c.clone(),
            offer: SessionDescription::offer("offer-from-C"),
        })
        .unwrap();
    next_outbound(&mut s.outbound).await;

    let handle = s.engine.handle(&c).unwrap();
    handle.accept_channel("chat");
    handle.emit(PeerEventKind::ChannelOpened);
    handle.emit(PeerEventKind::MessageReceived("hi there".to_string()));

    let event = wait_for_event(&mut s.events, |e| {
        matches!(e, SessionEvent::TextReceived { .. })
    })
    .await;
    assert_eq!(
        event,
        SessionEvent::TextReceived {
            peer_id: Some(c.clone()),
            text: "hi there".to_string(),
        }
    );

    s.handle.shutdown();
    timeout(WAIT, s.task).await.unwrap().unwrap().unwrap();
}

#[tokio::test]
async fn test_invalid_token_ends_session() {
    let mut s = start();

    s.inbound.send(InboundSignal::InvalidToken).unwrap();

    let result = timeout(WAIT, s.task).await.unwrap().unwrap();
    assert!(matches!(result, Err(Error::InvalidSession(_))));
    assert!(s.outbound.try_recv().is_err());
    assert!(s.handle.broadcast_text("late").await.is_err());
}

#[tokio::test]
async fn test_shutdown_releases_peers() {
    let mut s = start();
    let a = PeerId::from("A");

    s.inbound
        .send(InboundSignal::RequestOffer {
            existing_peers: vec![a.clone()],
        })
        .unwrap();
    next_outbound(&mut s.outbound).await;

    assert!(s.handle.shutdown());
    timeout(WAIT, s.task).await.unwrap().unwrap().unwrap();

    let handle = s.engine.handle(&a).unwrap();
    assert!(handle.is_closed());
    assert!(handle.channels()[0].is_closed());
}

#[tokio::test]
async fn test_closed_signaling_ends_session() {
    let s = start();

    drop(s.inbound);

    timeout(WAIT, s.task).await.unwrap().unwrap().unwrap();
    assert!(!s.handle.shutdown());
}
