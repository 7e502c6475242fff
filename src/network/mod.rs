//! Network module - TCP transport for the lobby
//!
//! Provides:
//! - Server accepting incoming connections and feeding them to the lobby
//! - Client for announcing or joining an endpoint from the command line
//! - Per-connection framing and outbound handles

mod server;
mod client;
mod connection;

pub use server::*;
pub use client::*;
pub use connection::*;

use std::net::SocketAddr;

use crate::protocol::{DEFAULT_PORT, MAX_FRAME_BYTES};

/// Configuration for network operations
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Port to listen on or connect to
    pub port: u16,
    /// Interface to bind to (default: all)
    pub bind_address: Option<String>,
    /// Maximum frame size in bytes
    pub max_frame_bytes: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind_address: None,
            max_frame_bytes: MAX_FRAME_BYTES,
        }
    }
}

impl NetworkConfig {
    pub fn new(port: u16) -> Self {
        Self {
            port,
            ..Default::default()
        }
    }

    /// The address the server binds to
    pub fn bind_addr(&self) -> String {
        format!(
            "{}:{}",
            self.bind_address.as_deref().unwrap_or("0.0.0.0"),
            self.port
        )
    }
}

/// Resolve a hostname to a socket address
pub async fn resolve_host(host: &str, port: u16) -> std::io::Result<SocketAddr> {
    use tokio::net::lookup_host;

    let addr_string = format!("{}:{}", host, port);
    let mut addrs = lookup_host(&addr_string).await?;

    addrs.next().ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("Could not resolve host: {}", host),
        )
    })
}
