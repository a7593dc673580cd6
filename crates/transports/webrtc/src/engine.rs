//! WebRTC transport engine

use std::sync::Arc;

use async_trait::async_trait;
use rendezvous_core::{
    Error, PeerEventSender, PeerId, Result, SessionConfig, TransportEngine, TransportHandle,
};
use tracing::{debug, instrument};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::{APIBuilder, API};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;

use crate::peer::WebRtcPeerHandle;

/// Creates one `RTCPeerConnection` per connection instance
pub struct WebRtcEngine {
    api: API,
    ice_servers: Vec<RTCIceServer>,
}

impl WebRtcEngine {
    /// Build the engine from the session's STUN/TURN settings
    pub fn new(config: &SessionConfig) -> Result<Self> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| Error::Transport(format!("Failed to register codecs: {}", e)))?;

        let interceptor_registry =
            register_default_interceptors(Default::default(), &mut media_engine).map_err(|e| {
                Error::Transport(format!("Failed to register interceptors: {}", e))
            })?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(interceptor_registry)
            .build();

        Ok(Self {
            api,
            ice_servers: ice_servers(config),
        })
    }

    /// ICE servers handed to every new peer connection
    pub fn ice_servers(&self) -> &[RTCIceServer] {
        &self.ice_servers
    }
}

fn ice_servers(config: &SessionConfig) -> Vec<RTCIceServer> {
    config
        .stun_servers
        .iter()
        .map(|url| RTCIceServer {
            urls: vec![url.clone()],
            ..Default::default()
        })
        .chain(config.turn_servers.iter().map(|turn| {
            #[allow(clippy::needless_update)]
            RTCIceServer {
                urls: vec![turn.url.clone()],
                username: turn.username.clone(),
                credential: turn.credential.clone(),
                ..Default::default()
            }
        }))
        .collect()
}

#[async_trait]
impl TransportEngine for WebRtcEngine {
    #[instrument(skip(self, events), fields(peer_id = %peer_id))]
    async fn create_handle(
        &self,
        peer_id: &PeerId,
        events: PeerEventSender,
    ) -> Result<Arc<dyn TransportHandle>> {
        let rtc_config = RTCConfiguration {
            ice_servers: self.ice_servers.clone(),
            ..Default::default()
        };

        let connection = Arc::new(self.api.new_peer_connection(rtc_config).await.map_err(
            |e| Error::Transport(format!("Failed to create peer connection: {}", e)),
        )?);

        debug!(connection_id = %events.connection_id(), "Peer connection created");
        Ok(WebRtcPeerHandle::new(connection, events))
    }
}
