//! One `RTCPeerConnection` behind the core's transport handle

use std::sync::Arc;

use async_trait::async_trait;
use rendezvous_core::event::SignalingState;
use rendezvous_core::{
    Connectivity, DataChannelHandle, DataChannelMode, Error, IceCandidate, PeerEventKind,
    PeerEventSender, PeerId, Result, SdpKind, SessionDescription, TransportHandle,
};
use tracing::{debug, info, warn};
use webrtc::data_channel::data_channel_init::RTCDataChannelInit;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::signaling_state::RTCSignalingState;
use webrtc::peer_connection::RTCPeerConnection;

use crate::channel::WebRtcDataChannel;

/// Transport handle backed by a webrtc-rs peer connection
///
/// Every callback of the connection is forwarded as a peer event; the handle
/// keeps no negotiation state of its own.
pub struct WebRtcPeerHandle {
    peer_id: PeerId,
    connection: Arc<RTCPeerConnection>,
    events: PeerEventSender,
}

impl WebRtcPeerHandle {
    pub(crate) fn new(connection: Arc<RTCPeerConnection>, events: PeerEventSender) -> Arc<Self> {
        let handle = Arc::new(Self {
            peer_id: events.peer_id().clone(),
            connection,
            events,
        });
        handle.install_handlers();
        handle
    }

    /// The underlying peer connection
    pub fn connection(&self) -> &Arc<RTCPeerConnection> {
        &self.connection
    }

    fn install_handlers(&self) {
        let events = self.events.clone();
        self.connection
            .on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
                let events = events.clone();
                Box::pin(async move {
                    // None marks the end of gathering
                    let Some(candidate) = candidate else {
                        return;
                    };
                    match candidate.to_json() {
                        Ok(init) => {
                            events.emit(PeerEventKind::CandidateDiscovered(from_init(init)));
                        }
                        Err(e) => warn!(peer_id = %events.peer_id(), "Unusable local candidate: {}", e),
                    }
                })
            }));

        let events = self.events.clone();
        self.connection.on_peer_connection_state_change(Box::new(
            move |state: RTCPeerConnectionState| {
                let events = events.clone();
                Box::pin(async move {
                    let connectivity = match state {
                        RTCPeerConnectionState::New => Connectivity::New,
                        RTCPeerConnectionState::Connecting => Connectivity::Connecting,
                        RTCPeerConnectionState::Connected => Connectivity::Connected,
                        RTCPeerConnectionState::Disconnected => Connectivity::Disconnected,
                        RTCPeerConnectionState::Failed => Connectivity::Failed,
                        RTCPeerConnectionState::Closed => Connectivity::Closed,
                        _ => return,
                    };
                    debug!(peer_id = %events.peer_id(), "Connectivity {:?}", connectivity);
                    events.emit(PeerEventKind::ConnectivityChanged(connectivity));
                })
            },
        ));

        let events = self.events.clone();
        self.connection
            .on_signaling_state_change(Box::new(move |state: RTCSignalingState| {
                let events = events.clone();
                Box::pin(async move {
                    let state = match state {
                        RTCSignalingState::Stable => SignalingState::Stable,
                        RTCSignalingState::HaveLocalOffer => SignalingState::HaveLocalOffer,
                        RTCSignalingState::HaveRemoteOffer => SignalingState::HaveRemoteOffer,
                        RTCSignalingState::Closed => SignalingState::Closed,
                        _ => SignalingState::Other,
                    };
                    events.emit(PeerEventKind::NegotiationStateChanged(state));
                })
            }));

        let events = self.events.clone();
        self.connection
            .on_data_channel(Box::new(move |rtc_channel: Arc<RTCDataChannel>| {
                let events = events.clone();
                Box::pin(async move {
                    let channel = WebRtcDataChannel::new(rtc_channel);
                    info!(
                        peer_id = %events.peer_id(),
                        label = %channel.label(),
                        "Remote data channel announced"
                    );
                    // Announce before any open/message event can be raised
                    events.emit(PeerEventKind::ChannelAccepted(channel.clone()));
                    channel.install_handlers(events);
                })
            }));
    }
}

fn from_init(init: RTCIceCandidateInit) -> IceCandidate {
    IceCandidate {
        candidate: init.candidate,
        sdp_mid: init.sdp_mid,
        sdp_m_line_index: init.sdp_mline_index,
        username_fragment: init.username_fragment,
    }
}

fn to_init(candidate: IceCandidate) -> RTCIceCandidateInit {
    RTCIceCandidateInit {
        candidate: candidate.candidate,
        sdp_mid: candidate.sdp_mid,
        sdp_mline_index: candidate.sdp_m_line_index,
        username_fragment: candidate.username_fragment,
    }
}

fn to_rtc(description: SessionDescription) -> Result<RTCSessionDescription> {
    let parsed = match description.kind {
        SdpKind::Offer => RTCSessionDescription::offer(description.sdp),
        SdpKind::Answer => RTCSessionDescription::answer(description.sdp),
    };
    parsed.map_err(|e| Error::Transport(format!("Invalid session description: {}", e)))
}

#[async_trait]
impl TransportHandle for WebRtcPeerHandle {
    async fn create_offer(&self) -> Result<SessionDescription> {
        let offer = self
            .connection
            .create_offer(None)
            .await
            .map_err(|e| Error::Transport(format!("Failed to create offer: {}", e)))?;
        Ok(SessionDescription::offer(offer.sdp))
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        let answer = self
            .connection
            .create_answer(None)
            .await
            .map_err(|e| Error::Transport(format!("Failed to create answer: {}", e)))?;
        Ok(SessionDescription::answer(answer.sdp))
    }

    async fn set_local_description(&self, description: SessionDescription) -> Result<()> {
        self.connection
            .set_local_description(to_rtc(description)?)
            .await
            .map_err(|e| Error::Transport(format!("Failed to set local description: {}", e)))
    }

    async fn set_remote_description(&self, description: SessionDescription) -> Result<()> {
        self.connection
            .set_remote_description(to_rtc(description)?)
            .await
            .map_err(|e| Error::Transport(format!("Failed to set remote description: {}", e)))
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        self.connection
            .add_ice_candidate(to_init(candidate))
            .await
            .map_err(|e| Error::Transport(format!("Failed to add ICE candidate: {}", e)))
    }

    async fn create_data_channel(
        &self,
        label: &str,
        mode: DataChannelMode,
    ) -> Result<Arc<dyn DataChannelHandle>> {
        let init = RTCDataChannelInit {
            ordered: Some(mode.ordered()),
            max_retransmits: mode.max_retransmits(),
            ..Default::default()
        };

        let rtc_channel = self
            .connection
            .create_data_channel(label, Some(init))
            .await
            .map_err(|e| Error::DataChannel(format!("Failed to create data channel: {}", e)))?;

        debug!(peer_id = %self.peer_id, label, ?mode, "Data channel created");
        let channel = WebRtcDataChannel::new(rtc_channel);
        channel.install_handlers(self.events.clone());
        Ok(channel)
    }

    async fn close(&self) -> Result<()> {
        info!(peer_id = %self.peer_id, "Closing peer connection");
        self.connection
            .close()
            .await
            .map_err(|e| Error::Transport(format!("Failed to close connection: {}", e)))
    }
}
