//! Session event loop
//!
//! One task owns the mediator and multiplexes inbound signaling, transport
//! events and application commands. Nothing else touches the registry.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{error, info, warn};

use crate::channel::BroadcastReport;
use crate::config::SessionConfig;
use crate::engine::TransportEngine;
use crate::event::{PeerEvent, SessionEvent};
use crate::mediator::SignalingMediator;
use crate::signaling::{InboundSignal, OutboundSignal};
use crate::{Error, Result};

/// Command sent from the application to the session loop
#[derive(Debug)]
pub enum SessionCommand {
    /// Send text on every open data channel
    Broadcast {
        text: String,
        reply: oneshot::Sender<Result<BroadcastReport>>,
    },
    /// Stop the loop and release every peer
    Shutdown,
}

/// Cloneable handle for talking to a running session
#[derive(Debug, Clone)]
pub struct SessionHandle {
    commands: mpsc::UnboundedSender<SessionCommand>,
}

impl SessionHandle {
    /// Send `text` to every peer whose data channel is open
    pub async fn broadcast_text(&self, text: impl Into<String>) -> Result<BroadcastReport> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(SessionCommand::Broadcast {
                text: text.into(),
                reply,
            })
            .map_err(|_| Error::Signaling("session is not running".to_string()))?;

        response
            .await
            .map_err(|_| Error::Signaling("session stopped before replying".to_string()))?
    }

    /// Ask the loop to stop; returns false if it already has
    pub fn shutdown(&self) -> bool {
        self.commands.send(SessionCommand::Shutdown).is_ok()
    }
}

/// A rendezvous session
pub struct Session {
    mediator: SignalingMediator,
    peer_events: mpsc::UnboundedReceiver<PeerEvent>,
    commands: mpsc::UnboundedReceiver<SessionCommand>,
}

impl Session {
    /// Create a session
    ///
    /// Outbound signaling is written to `outbound`. Returns the session, a
    /// handle for application commands and the stream of session events.
    pub fn new(
        config: &SessionConfig,
        engine: Arc<dyn TransportEngine>,
        outbound: mpsc::UnboundedSender<OutboundSignal>,
    ) -> Result<(Self, SessionHandle, mpsc::UnboundedReceiver<SessionEvent>)> {
        config.validate()?;

        let (peer_tx, peer_events) = mpsc::unbounded_channel();
        let (command_tx, commands) = mpsc::unbounded_channel();
        let (session_tx, session_events) = mpsc::unbounded_channel();

        let mediator = SignalingMediator::new(engine, config, peer_tx, outbound, session_tx);

        Ok((
            Self {
                mediator,
                peer_events,
                commands,
            },
            SessionHandle {
                commands: command_tx,
            },
            session_events,
        ))
    }

    /// Run until the signaling channel closes, the token is rejected or
    /// shutdown is requested
    ///
    /// Every peer is released before this returns.
    pub async fn run(mut self, mut inbound: mpsc::UnboundedReceiver<InboundSignal>) -> Result<()> {
        info!("Session started");

        let result = loop {
            tokio::select! {
                signal = inbound.recv() => match signal {
                    Some(signal) => {
                        if let Err(e) = self.mediator.handle_signal(signal).await {
                            if e.is_terminal() {
                                error!("Session terminated: {}", e);
                                break Err(e);
                            }
                            warn!("{}", e);
                        }
                    }
                    None => {
                        info!("Signaling channel closed");
                        break Ok(());
                    }
                },
                Some(event) = self.peer_events.recv() => {
                    if let Err(e) = self.mediator.handle_peer_event(event).await {
                        warn!("{}", e);
                    }
                }
                Some(command) = self.commands.recv() => match command {
                    SessionCommand::Broadcast { text, reply } => {
                        let report = self.mediator.broadcast_text(&text).await;
                        let _ = reply.send(report);
                    }
                    SessionCommand::Shutdown => {
                        info!("Shutdown requested");
                        break Ok(());
                    }
                },
            }
        };

        self.mediator.shutdown().await;
        info!("Session stopped");
        result
    }
}
