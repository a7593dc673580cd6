//! Rendezvous peer
//!
//! Joins a room on a signaling server, connects to every other participant
//! and relays text: each stdin line is broadcast on all open data channels,
//! each received message is printed.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin rendezvous_peer --features cli -- \
//!   --signaling-url ws://localhost:8080 \
//!   --token room-42
//!
//! # Unreliable channel and a TURN relay
//! cargo run --bin rendezvous_peer --features cli -- \
//!   --token room-42 \
//!   --data-channel-mode unreliable \
//!   --turn-servers turn:turn.example.org:3478:alice:secret
//! ```

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use rendezvous_core::{
    DataChannelMode, Session, SessionConfig, SessionEvent, SessionHandle, TurnServerConfig,
};
use rendezvous_webrtc::{WebRtcEngine, WebSocketSignaling};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Multi-peer text chat over WebRTC data channels
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// WebSocket signaling URL
    #[arg(
        long,
        default_value = "ws://localhost:8080",
        env = "RENDEZVOUS_SIGNALING_URL"
    )]
    signaling_url: String,

    /// Room token shared by every participant
    #[arg(short, long, env = "RENDEZVOUS_TOKEN")]
    token: String,

    /// STUN servers (comma-separated)
    #[arg(long, value_delimiter = ',', env = "RENDEZVOUS_STUN_SERVERS")]
    stun_servers: Vec<String>,

    /// TURN servers (format: turn:host:port:username:password, comma-separated)
    #[arg(long, value_delimiter = ',', env = "RENDEZVOUS_TURN_SERVERS")]
    turn_servers: Vec<String>,

    /// Data channel label
    #[arg(long, default_value = "chat", env = "RENDEZVOUS_DATA_CHANNEL_LABEL")]
    data_channel_label: String,

    /// Data channel mode: reliable, unreliable
    #[arg(long, default_value = "reliable", env = "RENDEZVOUS_DATA_CHANNEL_MODE")]
    data_channel_mode: DataChannelModeArg,
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum DataChannelModeArg {
    Reliable,
    Unreliable,
}

impl From<DataChannelModeArg> for DataChannelMode {
    fn from(arg: DataChannelModeArg) -> Self {
        match arg {
            DataChannelModeArg::Reliable => DataChannelMode::Reliable,
            DataChannelModeArg::Unreliable => DataChannelMode::Unreliable,
        }
    }
}

fn parse_turn_server(s: &str) -> Result<TurnServerConfig, String> {
    let parts: Vec<&str> = s.split(':').collect();
    if parts.len() < 5 {
        return Err(format!(
            "Invalid TURN server format: '{}'. Expected: turn:host:port:username:password",
            s
        ));
    }

    let protocol = parts[0];
    if protocol != "turn" && protocol != "turns" {
        return Err(format!(
            "Invalid TURN protocol: '{}'. Expected 'turn' or 'turns'",
            protocol
        ));
    }

    // Password may contain colons
    Ok(TurnServerConfig {
        url: format!("{}:{}:{}", protocol, parts[1], parts[2]),
        username: parts[3].to_string(),
        credential: parts[4..].join(":"),
    })
}

fn build_config(args: Args) -> anyhow::Result<SessionConfig> {
    let mut config = SessionConfig {
        signaling_url: args.signaling_url,
        token: args.token,
        data_channel_label: args.data_channel_label,
        data_channel_mode: args.data_channel_mode.into(),
        ..Default::default()
    };

    if !args.stun_servers.is_empty() {
        config.stun_servers = args.stun_servers;
    }

    config.turn_servers = args
        .turn_servers
        .iter()
        .map(|s| parse_turn_server(s))
        .collect::<Result<Vec<_>, _>>()
        .map_err(anyhow::Error::msg)?;

    config.validate()?;
    Ok(config)
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn print_event(event: SessionEvent) {
    match event {
        SessionEvent::TextReceived {
            peer_id: Some(peer_id),
            text,
        } => println!("[{}] {}", peer_id, text),
        SessionEvent::TextReceived { peer_id: None, text } => println!("{}", text),
        SessionEvent::ChannelOpened(peer_id) => info!(%peer_id, "Peer joined the chat"),
        SessionEvent::ChannelClosed(peer_id) => info!(%peer_id, "Peer left the chat"),
        SessionEvent::PeerClosed { peer_id, reason } => {
            warn!(%peer_id, "Connection closed: {}", reason)
        }
        SessionEvent::PeerConnected(peer_id) => info!(%peer_id, "Transport connected"),
        SessionEvent::RoomEmpty => info!("Nobody else is in the room yet"),
    }
}

async fn relay_stdin(handle: SessionHandle) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        match lines.next_line().await {
            Ok(Some(line)) if line.trim().is_empty() => continue,
            Ok(Some(line)) => match handle.broadcast_text(line).await {
                Ok(report) if report.sent == 0 => warn!("No open data channel, message dropped"),
                Ok(_) => {}
                Err(e) => {
                    warn!("Broadcast failed: {}", e);
                    break;
                }
            },
            Ok(None) => break,
            Err(e) => {
                warn!("Failed to read stdin: {}", e);
                break;
            }
        }
    }

    handle.shutdown();
}

async fn forward_events(mut events: mpsc::UnboundedReceiver<SessionEvent>) {
    while let Some(event) = events.recv().await {
        print_event(event);
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = build_config(Args::parse())?;
    info!(
        signaling_url = %config.signaling_url,
        mode = ?config.data_channel_mode,
        "Starting rendezvous peer"
    );

    let engine = Arc::new(WebRtcEngine::new(&config)?);
    let (outbound, inbound) = WebSocketSignaling::connect(&config)
        .await
        .context("signaling server unreachable")?
        .split();

    let (session, handle, events) = Session::new(&config, engine, outbound)?;

    tokio::spawn(forward_events(events));
    tokio::spawn(relay_stdin(handle.clone()));

    let ctrl_c_handle = handle.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, shutting down");
            ctrl_c_handle.shutdown();
        }
    });

    session.run(inbound).await?;
    Ok(())
}
