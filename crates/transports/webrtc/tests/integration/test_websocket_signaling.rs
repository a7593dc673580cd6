//! WebSocket signaling against a local in-process server

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use rendezvous_core::{InboundSignal, OutboundSignal, PeerId, SessionConfig, SessionDescription};
use rendezvous_webrtc::WebSocketSignaling;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::time::timeout;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;

const WAIT: Duration = Duration::from_secs(5);

async fn local_server() -> (TcpListener, SessionConfig) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let mut config = SessionConfig::with_token("room-7");
    config.signaling_url = format!("ws://{}", listener.local_addr().unwrap());
    (listener, config)
}

#[tokio::test]
async fn test_signals_cross_the_socket() {
    let (listener, config) = local_server().await;
    let (uri_tx, uri_rx) = oneshot::channel();

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let record_uri = move |req: &Request, resp: Response| {
            let _ = uri_tx.send(req.uri().to_string());
            Ok::<_, ErrorResponse>(resp)
        };
        let mut ws = accept_hdr_async(stream, record_uri).await.unwrap();

        ws.send(Message::Text(
            json!({"event": "REQUEST_OFFER", "payload": {"existingClients": ["A"]}}).to_string(),
        ))
        .await
        .unwrap();
        ws.send(Message::Text("not a signaling frame".to_string()))
            .await
            .unwrap();
        ws.send(Message::Text(json!({"event": "EMPTY_ROOM"}).to_string()))
            .await
            .unwrap();

        let reply = loop {
            match ws.next().await.unwrap().unwrap() {
                Message::Text(text) => break text,
                _ => continue,
            }
        };
        ws.close(None).await.unwrap();
        reply
    });

    let (outbound, mut inbound) = timeout(WAIT, WebSocketSignaling::connect(&config))
        .await
        .unwrap()
        .unwrap()
        .split();

    let uri = uri_rx.await.unwrap();
    assert!(uri.contains("token=room-7"), "token missing from {}", uri);

    assert_eq!(
        timeout(WAIT, inbound.recv()).await.unwrap(),
        Some(InboundSignal::RequestOffer {
            existing_peers: vec![PeerId::from("A")],
        })
    );
    // the unparsable frame is skipped
    assert_eq!(
        timeout(WAIT, inbound.recv()).await.unwrap(),
        Some(InboundSignal::RoomEmpty)
    );

    outbound
        .send(OutboundSignal::Offer {
            remote_peer: PeerId::from("A"),
            offer: SessionDescription::offer("v=0"),
        })
        .unwrap();

    let reply: Value = serde_json::from_str(&timeout(WAIT, server).await.unwrap().unwrap()).unwrap();
    assert_eq!(reply["event"], "WEBRTC_OFFER");
    assert_eq!(reply["payload"]["remoteClient"], "A");
    assert_eq!(reply["payload"]["offer"]["type"], "offer");

    // server hung up, so the inbound stream ends
    assert_eq!(timeout(WAIT, inbound.recv()).await.unwrap(), None);
}

#[tokio::test]
async fn test_connect_failure_is_reported() {
    let (listener, config) = local_server().await;
    drop(listener);

    let result = WebSocketSignaling::connect(&config).await;
    assert!(matches!(result, Err(rendezvous_core::Error::Signaling(_))));
}
