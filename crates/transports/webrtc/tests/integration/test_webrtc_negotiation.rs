//! Two sessions on real WebRTC engines, signaling routed in-process

use std::sync::Arc;
use std::time::Duration;

use rendezvous_core::{
    InboundSignal, OutboundSignal, PeerId, Session, SessionConfig, SessionEvent, SessionHandle,
};
use rendezvous_webrtc::WebRtcEngine;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(20);

struct Participant {
    handle: SessionHandle,
    inbound: mpsc::UnboundedSender<InboundSignal>,
    events: mpsc::UnboundedReceiver<SessionEvent>,
    task: JoinHandle<rendezvous_core::Result<()>>,
}

fn join() -> (Participant, mpsc::UnboundedReceiver<OutboundSignal>) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();

    let mut config = SessionConfig::with_token("room");
    config.stun_servers.clear();

    let engine = Arc::new(WebRtcEngine::new(&config).unwrap());
    let (out_tx, outbound) = mpsc::unbounded_channel();
    let (inbound, in_rx) = mpsc::unbounded_channel();
    let (session, handle, events) = Session::new(&config, engine, out_tx).unwrap();

    let participant = Participant {
        handle,
        inbound,
        events,
        task: tokio::spawn(session.run(in_rx)),
    };
    (participant, outbound)
}

/// Rewrite what `from` sent into what the signaling server delivers
fn deliver(from: &PeerId, signal: OutboundSignal) -> InboundSignal {
    match signal {
        OutboundSignal::Offer { offer, .. } => InboundSignal::RequestAnswer {
            peer_id: from.clone(),
            offer,
        },
        OutboundSignal::Answer { answer, .. } => InboundSignal::Answer {
            peer_id: from.clone(),
            answer,
        },
        OutboundSignal::CandidateBatch { candidates, .. } => InboundSignal::CandidateBatch {
            peer_id: from.clone(),
            candidates,
        },
    }
}

fn relay(
    from: PeerId,
    mut outbound: mpsc::UnboundedReceiver<OutboundSignal>,
    to: mpsc::UnboundedSender<InboundSignal>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(signal) = outbound.recv().await {
            if to.send(deliver(&from, signal)).is_err() {
                break;
            }
        }
    })
}

async fn wait_for(events: &mut mpsc::UnboundedReceiver<SessionEvent>, wanted: SessionEvent) {
    timeout(WAIT, async {
        while let Some(event) = events.recv().await {
            if event == wanted {
                return;
            }
        }
        panic!("session ended before {:?}", wanted);
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {:?}", wanted));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_two_peers_exchange_text() {
    let a = PeerId::from("A");
    let b = PeerId::from("B");

    let (mut alice, alice_out) = join();
    let (mut bob, bob_out) = join();

    let to_bob = relay(a.clone(), alice_out, bob.inbound.clone());
    let to_alice = relay(b.clone(), bob_out, alice.inbound.clone());

    // the server tells the newcomer to offer to everyone already present
    alice
        .inbound
        .send(InboundSignal::RequestOffer {
            existing_peers: vec![b.clone()],
        })
        .unwrap();

    wait_for(&mut alice.events, SessionEvent::ChannelOpened(b.clone())).await;
    wait_for(&mut bob.events, SessionEvent::ChannelOpened(a.clone())).await;

    let report = alice.handle.broadcast_text("hello bob").await.unwrap();
    assert_eq!(report.sent, 1);

    wait_for(
        &mut bob.events,
        SessionEvent::TextReceived {
            peer_id: Some(a.clone()),
            text: "hello bob".to_string(),
        },
    )
    .await;

    let report = bob.handle.broadcast_text("hi alice").await.unwrap();
    assert_eq!(report.sent, 1);
    wait_for(
        &mut alice.events,
        SessionEvent::TextReceived {
            peer_id: Some(b.clone()),
            text: "hi alice".to_string(),
        },
    )
    .await;

    assert!(alice.handle.shutdown());
    assert!(bob.handle.shutdown());
    timeout(WAIT, alice.task).await.unwrap().unwrap().unwrap();
    timeout(WAIT, bob.task).await.unwrap().unwrap().unwrap();
    to_bob.abort();
    to_alice.abort();
}
