//! WebSocket signaling client

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use rendezvous_core::{Error, InboundSignal, OutboundSignal, Result, SessionConfig};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connection to the signaling server
///
/// Outbound signals are serialized and written by a sender task; inbound
/// frames are parsed by a receiver task. The inbound stream ends when the
/// server closes the socket.
pub struct WebSocketSignaling {
    outbound: mpsc::UnboundedSender<OutboundSignal>,
    inbound: mpsc::UnboundedReceiver<InboundSignal>,
}

impl WebSocketSignaling {
    /// Connect to the server named in `config`, joining the room of its token
    pub async fn connect(config: &SessionConfig) -> Result<Self> {
        let endpoint = config.signaling_endpoint()?;
        info!("Connecting to signaling server: {}", config.signaling_url);

        let (ws_stream, _) = connect_async(endpoint.as_str())
            .await
            .map_err(|e| Error::Signaling(format!("Failed to connect: {}", e)))?;

        info!("Connected to signaling server");

        let (write, read) = ws_stream.split();
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound) = mpsc::unbounded_channel();

        tokio::spawn(sender_task(write, outbound_rx));
        tokio::spawn(receiver_task(read, inbound_tx));

        Ok(Self { outbound, inbound })
    }

    /// Channels to hand to [`Session::new`](rendezvous_core::Session::new)
    /// and [`Session::run`](rendezvous_core::Session::run)
    pub fn split(
        self,
    ) -> (
        mpsc::UnboundedSender<OutboundSignal>,
        mpsc::UnboundedReceiver<InboundSignal>,
    ) {
        (self.outbound, self.inbound)
    }
}

async fn sender_task(
    mut write: SplitSink<WsStream, Message>,
    mut rx: mpsc::UnboundedReceiver<OutboundSignal>,
) {
    while let Some(signal) = rx.recv().await {
        let text = match signal.to_json() {
            Ok(text) => text,
            Err(e) => {
                error!("Failed to encode signaling message: {}", e);
                continue;
            }
        };
        debug!(peer_id = %signal.peer_id(), "Sending signaling message");

        if let Err(e) = write.send(Message::Text(text)).await {
            error!("Failed to send WebSocket message: {}", e);
            break;
        }
    }

    let _ = write.close().await;
    debug!("Sender task terminated");
}

async fn receiver_task(
    mut read: SplitStream<WsStream>,
    tx: mpsc::UnboundedSender<InboundSignal>,
) {
    while let Some(msg_result) = read.next().await {
        match msg_result {
            Ok(Message::Text(text)) => match InboundSignal::from_json(&text) {
                Ok(signal) => {
                    debug!(signal = signal.name(), "Received signaling message");
                    if tx.send(signal).is_err() {
                        break;
                    }
                }
                Err(e) => warn!("Skipping unrecognized signaling message: {}", e),
            },
            Ok(Message::Close(_)) => {
                info!("WebSocket connection closed");
                break;
            }
            Err(e) => {
                error!("WebSocket error: {}", e);
                break;
            }
            _ => {}
        }
    }

    debug!("Receiver task terminated");
}
