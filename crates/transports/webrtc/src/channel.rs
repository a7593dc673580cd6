//! WebRTC data channel adapter

use std::sync::Arc;

use async_trait::async_trait;
use rendezvous_core::{DataChannelHandle, Error, PeerEventKind, PeerEventSender, Result};
use tracing::{debug, warn};
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::RTCDataChannel;

/// Data channel created locally or accepted from the remote peer
pub struct WebRtcDataChannel {
    rtc_channel: Arc<RTCDataChannel>,
    label: String,
}

impl WebRtcDataChannel {
    pub(crate) fn new(rtc_channel: Arc<RTCDataChannel>) -> Arc<Self> {
        Arc::new(Self {
            label: rtc_channel.label().to_string(),
            rtc_channel,
        })
    }

    /// Forward open, close and text message callbacks as peer events
    pub(crate) fn install_handlers(&self, events: PeerEventSender) {
        let on_open = events.clone();
        let label = self.label.clone();
        self.rtc_channel.on_open(Box::new(move || {
            Box::pin(async move {
                debug!(peer_id = %on_open.peer_id(), "Data channel '{}' opened", label);
                on_open.emit(PeerEventKind::ChannelOpened);
            })
        }));

        let on_close = events.clone();
        let label = self.label.clone();
        self.rtc_channel.on_close(Box::new(move || {
            let events = on_close.clone();
            let label = label.clone();
            Box::pin(async move {
                debug!(peer_id = %events.peer_id(), "Data channel '{}' closed", label);
                events.emit(PeerEventKind::ChannelClosed);
            })
        }));

        let on_error = events.clone();
        let label = self.label.clone();
        self.rtc_channel.on_error(Box::new(move |err| {
            let events = on_error.clone();
            let label = label.clone();
            Box::pin(async move {
                warn!(peer_id = %events.peer_id(), "Data channel '{}' error: {}", label, err);
            })
        }));

        self.rtc_channel
            .on_message(Box::new(move |msg: DataChannelMessage| {
                let events = events.clone();
                Box::pin(async move {
                    if !msg.is_string {
                        debug!(peer_id = %events.peer_id(), "Ignoring binary data channel message");
                        return;
                    }
                    match String::from_utf8(msg.data.to_vec()) {
                        Ok(text) => {
                            events.emit(PeerEventKind::MessageReceived(text));
                        }
                        Err(e) => warn!(peer_id = %events.peer_id(), "Dropping non UTF-8 text: {}", e),
                    }
                })
            }));
    }
}

#[async_trait]
impl DataChannelHandle for WebRtcDataChannel {
    fn label(&self) -> String {
        self.label.clone()
    }

    async fn send_text(&self, text: &str) -> Result<()> {
        self.rtc_channel
            .send_text(text.to_string())
            .await
            .map(|_| ())
            .map_err(|e| {
                Error::DataChannel(format!("Failed to send on '{}': {}", self.label, e))
            })
    }

    async fn close(&self) -> Result<()> {
        self.rtc_channel.close().await.map_err(|e| {
            Error::DataChannel(format!("Failed to close '{}': {}", self.label, e))
        })
    }
}
