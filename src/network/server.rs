//! Lobby Server
//!
//! Accepts TCP connections and wires each one into the lobby: inbound
//! frames go to the lobby's dispatcher, outbound commands from the lobby
//! (sends and closes) are drained onto the socket, and a dropped socket is
//! reported back so the lobby can cascade the disconnect.

use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, RwLock};

use super::connection::{Connection, ConnectionHandle, WireCmd};
use super::NetworkConfig;
use crate::lobby::Lobby;

/// Server errors
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Server already running")]
    AlreadyRunning,

    #[error("Server not running")]
    NotRunning,

    #[error("Bind failed: {0}")]
    BindFailed(String),
}

pub type ServerResult<T> = Result<T, ServerError>;

/// Events emitted by the server
#[derive(Debug, Clone)]
pub enum ServerEvent {
    /// Server started
    Started { bind_addr: SocketAddr },
    /// A new client has connected
    ClientConnected { addr: SocketAddr },
    /// A client has disconnected
    ClientDisconnected { addr: SocketAddr, reason: String },
    /// Server stopped
    Stopped,
}

/// Lobby Server
pub struct Server {
    /// Server configuration
    config: NetworkConfig,
    /// The rendezvous core all connections feed into
    lobby: Arc<Lobby>,
    /// Event sender
    event_tx: mpsc::Sender<ServerEvent>,
    /// Event receiver (for consumers)
    event_rx: Option<mpsc::Receiver<ServerEvent>>,
    /// Shutdown signal
    shutdown_tx: Option<mpsc::Sender<()>>,
    /// Whether the server is running
    running: Arc<RwLock<bool>>,
}

impl Server {
    /// Create a new server
    pub fn new(config: NetworkConfig, lobby: Arc<Lobby>) -> Self {
        let (event_tx, event_rx) = mpsc::channel(256);

        Self {
            config,
            lobby,
            event_tx,
            event_rx: Some(event_rx),
            shutdown_tx: None,
            running: Arc::new(RwLock::new(false)),
        }
    }

    /// Take the event receiver (can only be called once)
    pub fn take_event_receiver(&mut self) -> Option<mpsc::Receiver<ServerEvent>> {
        self.event_rx.take()
    }

    /// Start the server
    pub async fn start(&mut self) -> ServerResult<()> {
        {
            let running = self.running.read().await;
            if *running {
                return Err(ServerError::AlreadyRunning);
            }
        }

        let bind_addr = self.config.bind_addr();
        let listener = TcpListener::bind(&bind_addr).await.map_err(|e| {
            ServerError::BindFailed(format!("Failed to bind to {}: {}", bind_addr, e))
        })?;

        let local_addr = listener.local_addr()?;
        tracing::info!("Lobby listening on {}", local_addr);

        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        self.shutdown_tx = Some(shutdown_tx);

        {
            let mut running = self.running.write().await;
            *running = true;
        }

        let _ = self
            .event_tx
            .send(ServerEvent::Started {
                bind_addr: local_addr,
            })
            .await;

        let lobby = self.lobby.clone();
        let event_tx = self.event_tx.clone();
        let running = self.running.clone();
        let max_frame_bytes = self.config.max_frame_bytes;

        // Spawn the accept loop
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    result = listener.accept() => {
                        match result {
                            Ok((stream, addr)) => {
                                tracing::info!("New connection from {}", addr);

                                let lobby = lobby.clone();
                                let event_tx = event_tx.clone();

                                tokio::spawn(async move {
                                    handle_client(stream, addr, lobby, event_tx, max_frame_bytes)
                                        .await;
                                });
                            }
                            Err(e) => {
                                tracing::error!("Accept error: {}", e);
                            }
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        tracing::info!("Server shutdown requested");
                        break;
                    }
                }
            }

            let mut running = running.write().await;
            *running = false;

            let _ = event_tx.send(ServerEvent::Stopped).await;
        });

        Ok(())
    }

    /// Stop the server
    pub async fn stop(&mut self) -> ServerResult<()> {
        {
            let running = self.running.read().await;
            if !*running {
                return Err(ServerError::NotRunning);
            }
        }

        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(()).await;
        }

        Ok(())
    }

    /// Check if the server is running
    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }
}

/// Drive one client connection until either side lets go
async fn handle_client(
    stream: TcpStream,
    addr: SocketAddr,
    lobby: Arc<Lobby>,
    event_tx: mpsc::Sender<ServerEvent>,
    max_frame_bytes: usize,
) {
    let mut conn = Connection::new(stream, max_frame_bytes);

    // Outbound command channel for this client
    let (cmd_tx, mut cmd_rx) = mpsc::unbounded_channel::<WireCmd>();
    let handle = ConnectionHandle::new(cmd_tx);

    let id = lobby.client_connected(Arc::new(handle.clone())).await;

    let _ = event_tx.send(ServerEvent::ClientConnected { addr }).await;

    let disconnect_reason = loop {
        tokio::select! {
            // Inbound frames go to the lobby
            result = conn.recv() => {
                match result {
                    Ok(Some(frame)) => {
                        lobby.on_message(id, &frame).await;
                    }
                    Ok(None) => {
                        break "Connection closed".to_string();
                    }
                    Err(e) => {
                        break format!("Error: {}", e);
                    }
                }
            }

            // Outbound commands from the lobby
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(WireCmd::Frame(frame)) => {
                        if let Err(e) = conn.send(&frame).await {
                            break format!("Send error: {}", e);
                        }
                    }
                    Some(WireCmd::Close) => {
                        break "Closed by lobby".to_string();
                    }
                    None => {
                        break "Handle dropped".to_string();
                    }
                }
            }
        }
    };

    // Clean up
    handle.mark_closed();
    lobby.client_closed(id).await;

    let _ = conn.shutdown().await;

    tracing::info!("Client {} ({}) disconnected: {}", id, addr, disconnect_reason);

    let _ = event_tx
        .send(ServerEvent::ClientDisconnected {
            addr,
            reason: disconnect_reason,
        })
        .await;
}
