//! Lobby Client
//!
//! Owns one connection to a lobby server and tracks the local lifecycle:
//! whether it has announced itself, and whether it has been paired with a
//! peer. Once paired, every inbound frame is an opaque relayed payload.

use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, RwLock};

use super::connection::{Connection, ConnectionError, ConnectionHandle, WireCmd};
use super::NetworkConfig;
use crate::lobby::Wire;

/// Client errors
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    #[error("Already connected")]
    AlreadyConnected,

    #[error("Not connected")]
    NotConnected,
}

pub type ClientResult<T> = Result<T, ClientError>;

/// Events emitted by the client
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// Connection to the lobby established
    Connected { server_addr: SocketAddr },
    /// The lobby paired us with a peer
    Paired,
    /// The lobby rejected a command
    ErrorReply { error: String },
    /// A relayed payload from the peer
    Message { frame: String },
    /// Connection to the lobby is gone
    Disconnected { reason: String },
}

/// Client lifecycle, as seen locally
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Disconnected,
    /// Connected to the lobby, not yet announced or paired
    Connected,
    /// Waiting for a peer under an announced endpoint id
    Announced,
    /// Bound to a peer; traffic is relayed
    Paired,
}

/// Lobby Client
pub struct LobbyClient {
    /// Current state
    state: Arc<RwLock<ClientState>>,
    /// Event sender
    event_tx: mpsc::Sender<ClientEvent>,
    /// Event receiver (for consumers)
    event_rx: Option<mpsc::Receiver<ClientEvent>>,
    /// Handle for sending frames on the live connection
    handle: Arc<RwLock<Option<ConnectionHandle>>>,
    /// Maximum frame size
    max_frame_bytes: usize,
}

impl LobbyClient {
    /// Create a new client
    pub fn new(config: NetworkConfig) -> Self {
        let (event_tx, event_rx) = mpsc::channel(256);

        Self {
            state: Arc::new(RwLock::new(ClientState::Disconnected)),
            event_tx,
            event_rx: Some(event_rx),
            handle: Arc::new(RwLock::new(None)),
            max_frame_bytes: config.max_frame_bytes,
        }
    }

    /// Take the event receiver (can only be called once)
    pub fn take_event_receiver(&mut self) -> Option<mpsc::Receiver<ClientEvent>> {
        self.event_rx.take()
    }

    /// Connect to a lobby server
    pub async fn connect(&self, server_addr: SocketAddr) -> ClientResult<()> {
        {
            let state = self.state.read().await;
            if *state != ClientState::Disconnected {
                return Err(ClientError::AlreadyConnected);
            }
        }

        tracing::info!("Connecting to lobby at {}", server_addr);

        let stream = TcpStream::connect(server_addr).await?;
        let mut conn = Connection::new(stream, self.max_frame_bytes);

        let (cmd_tx, mut cmd_rx) = mpsc::unbounded_channel::<WireCmd>();
        let handle = ConnectionHandle::new(cmd_tx);

        {
            let mut h = self.handle.write().await;
            *h = Some(handle.clone());
        }

        {
            let mut state = self.state.write().await;
            *state = ClientState::Connected;
        }

        let _ = self
            .event_tx
            .send(ClientEvent::Connected { server_addr })
            .await;

        // Spawn the message loop
        let event_tx = self.event_tx.clone();
        let state = self.state.clone();
        let client_handle = self.handle.clone();

        tokio::spawn(async move {
            let disconnect_reason = loop {
                tokio::select! {
                    result = conn.recv() => {
                        match result {
                            Ok(Some(frame)) => {
                                dispatch_frame(&state, &event_tx, frame).await;
                            }
                            Ok(None) => {
                                break "Connection closed".to_string();
                            }
                            Err(e) => {
                                break format!("Error: {}", e);
                            }
                        }
                    }

                    cmd = cmd_rx.recv() => {
                        match cmd {
                            Some(WireCmd::Frame(frame)) => {
                                if let Err(e) = conn.send(&frame).await {
                                    break format!("Send error: {}", e);
                                }
                            }
                            Some(WireCmd::Close) | None => {
                                break "Client shutdown requested".to_string();
                            }
                        }
                    }
                }
            };

            // Clean up
            handle.mark_closed();

            {
                let mut h = client_handle.write().await;
                *h = None;
            }

            {
                let mut s = state.write().await;
                *s = ClientState::Disconnected;
            }

            let _ = conn.shutdown().await;

            let _ = event_tx
                .send(ClientEvent::Disconnected {
                    reason: disconnect_reason,
                })
                .await;
        });

        Ok(())
    }

    /// Connect to a lobby server by hostname
    pub async fn connect_hostname(&self, hostname: &str, port: u16) -> ClientResult<()> {
        let addr = super::resolve_host(hostname, port).await?;
        self.connect(addr).await
    }

    /// Announce this client under an endpoint id
    pub async fn announce(&self, endpoint_id: &str) -> ClientResult<()> {
        self.send_frame(
            json!({ "command": "announce", "endpoint_id": endpoint_id }).to_string(),
        )
        .await?;

        let mut state = self.state.write().await;
        if *state == ClientState::Connected {
            *state = ClientState::Announced;
        }
        Ok(())
    }

    /// Ask the lobby to pair this client with an announced endpoint
    pub async fn connect_to(&self, endpoint_id: &str) -> ClientResult<()> {
        self.send_frame(json!({ "command": "connect", "endpoint_id": endpoint_id }).to_string())
            .await
    }

    /// Send a raw payload (relayed to the peer once paired)
    pub async fn send(&self, frame: String) -> ClientResult<()> {
        self.send_frame(frame).await
    }

    /// Disconnect from the lobby
    pub async fn disconnect(&self) -> ClientResult<()> {
        let handle = self.handle.read().await;
        match &*handle {
            Some(h) => {
                h.close();
                Ok(())
            }
            None => Err(ClientError::NotConnected),
        }
    }

    /// Get the current state
    pub async fn state(&self) -> ClientState {
        *self.state.read().await
    }

    /// Whether this client has announced itself
    pub async fn is_announced(&self) -> bool {
        *self.state.read().await == ClientState::Announced
    }

    /// Whether this client is bound to a peer
    pub async fn is_paired(&self) -> bool {
        *self.state.read().await == ClientState::Paired
    }

    async fn send_frame(&self, frame: String) -> ClientResult<()> {
        let handle = self.handle.read().await;
        match &*handle {
            Some(h) => {
                h.send(frame);
                Ok(())
            }
            None => Err(ClientError::NotConnected),
        }
    }
}

/// Interpret one inbound frame.
///
/// Before pairing, frames are lobby replies; afterwards everything is an
/// opaque relayed payload.
async fn dispatch_frame(
    state: &Arc<RwLock<ClientState>>,
    event_tx: &mpsc::Sender<ClientEvent>,
    frame: String,
) {
    if *state.read().await == ClientState::Paired {
        let _ = event_tx.send(ClientEvent::Message { frame }).await;
        return;
    }

    let reply: Option<serde_json::Value> = serde_json::from_str(&frame).ok();

    match reply {
        Some(value) if value.get("event").and_then(|e| e.as_str()) == Some("connected") => {
            {
                let mut s = state.write().await;
                *s = ClientState::Paired;
            }
            tracing::info!("Paired with a peer");
            let _ = event_tx.send(ClientEvent::Paired).await;
        }
        Some(value) if value.get("error").is_some() => {
            let error = value
                .get("error")
                .and_then(|e| e.as_str())
                .unwrap_or("unknown")
                .to_string();
            tracing::warn!("Lobby rejected a command: {}", error);
            let _ = event_tx.send(ClientEvent::ErrorReply { error }).await;
        }
        _ => {
            let _ = event_tx.send(ClientEvent::Message { frame }).await;
        }
    }
}
