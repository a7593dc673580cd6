//! Peer registry
//!
//! Owned by the mediator and only touched from the session loop, so it needs
//! no lock.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, instrument};

use crate::connection::PeerConnection;
use crate::engine::TransportEngine;
use crate::event::{PeerEvent, PeerEventSender};
use crate::types::{ConnectionId, PeerId, Role};
use crate::{Error, Result};

/// Mapping from PeerId to its connection
pub struct PeerRegistry {
    peers: HashMap<PeerId, PeerConnection>,
    engine: Arc<dyn TransportEngine>,
    events: mpsc::UnboundedSender<PeerEvent>,
}

impl PeerRegistry {
    /// Create an empty registry
    ///
    /// Handles created by `engine` report into `events`.
    pub fn new(engine: Arc<dyn TransportEngine>, events: mpsc::UnboundedSender<PeerEvent>) -> Self {
        Self {
            peers: HashMap::new(),
            engine,
            events,
        }
    }

    pub fn get(&self, peer_id: &PeerId) -> Option<&PeerConnection> {
        self.peers.get(peer_id)
    }

    pub fn get_mut(&mut self, peer_id: &PeerId) -> Option<&mut PeerConnection> {
        self.peers.get_mut(peer_id)
    }

    pub fn contains(&self, peer_id: &PeerId) -> bool {
        self.peers.contains_key(peer_id)
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Registered peer ids, sorted
    pub fn peer_ids(&self) -> Vec<PeerId> {
        let mut ids: Vec<PeerId> = self.peers.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn iter(&self) -> impl Iterator<Item = (&PeerId, &PeerConnection)> {
        self.peers.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&PeerId, &mut PeerConnection)> {
        self.peers.iter_mut()
    }

    /// Whether `connection_id` is the instance currently registered for the peer
    pub fn is_current(&self, peer_id: &PeerId, connection_id: ConnectionId) -> bool {
        self.peers
            .get(peer_id)
            .is_some_and(|conn| conn.connection_id() == connection_id)
    }

    /// Return the live connection for `peer_id`, creating it with `role` if needed
    ///
    /// The boolean is true when a new connection was created. A closed entry
    /// is torn down and replaced.
    #[instrument(skip(self), fields(peer_id = %peer_id))]
    pub async fn get_or_create(
        &mut self,
        peer_id: &PeerId,
        role: Role,
    ) -> Result<(&mut PeerConnection, bool)> {
        let live = self.peers.get(peer_id).map(PeerConnection::is_live);

        let created = match live {
            Some(true) => false,
            Some(false) => {
                self.remove(peer_id).await;
                self.insert_new(peer_id, role).await?;
                true
            }
            None => {
                self.insert_new(peer_id, role).await?;
                true
            }
        };

        let conn = self.peers.get_mut(peer_id).ok_or_else(|| {
            Error::Transport(format!("connection for peer {} vanished", peer_id))
        })?;
        Ok((conn, created))
    }

    /// Tear down any existing entry and create a fresh one
    #[instrument(skip(self), fields(peer_id = %peer_id))]
    pub async fn replace(&mut self, peer_id: &PeerId, role: Role) -> Result<&mut PeerConnection> {
        self.remove(peer_id).await;
        self.insert_new(peer_id, role).await?;
        self.peers.get_mut(peer_id).ok_or_else(|| {
            Error::Transport(format!("connection for peer {} vanished", peer_id))
        })
    }

    /// Tear down and drop the entry; no-op for unknown peers
    pub async fn remove(&mut self, peer_id: &PeerId) -> bool {
        match self.peers.remove(peer_id) {
            Some(mut conn) => {
                conn.teardown().await;
                info!(peer_id = %peer_id, "Peer removed");
                true
            }
            None => false,
        }
    }

    /// Tear down every connection
    pub async fn clear(&mut self) {
        let peers: Vec<PeerConnection> = self.peers.drain().map(|(_, conn)| conn).collect();
        for mut conn in peers {
            conn.teardown().await;
        }
        debug!("Registry cleared");
    }

    async fn insert_new(&mut self, peer_id: &PeerId, role: Role) -> Result<()> {
        let connection_id = uuid::Uuid::new_v4();
        let events = PeerEventSender::new(peer_id.clone(), connection_id, self.events.clone());
        let handle = self.engine.create_handle(peer_id, events.clone()).await?;

        info!(
            peer_id = %peer_id,
            connection_id = %connection_id,
            role = %role,
            "Peer connection created"
        );

        let conn = PeerConnection::new(peer_id.clone(), connection_id, role, handle, events);
        self.peers.insert(peer_id.clone(), conn);
        Ok(())
    }
}
