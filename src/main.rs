//! lobbyd - Rendezvous Lobby Server
//!
//! Pairs two peers by a shared endpoint id, then relays opaque traffic
//! between them until either side disconnects.

mod config;
mod lobby;
mod network;
mod protocol;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use config::Config;
use lobby::Lobby;
use network::{ClientEvent, LobbyClient, NetworkConfig as NetConfig, Server, ServerEvent};

/// lobbyd - Rendezvous lobby server
#[derive(Parser)]
#[command(name = "lobbyd")]
#[command(author = "Lobbyd Contributors")]
#[command(version = "0.1.0")]
#[command(about = "Pair peers by endpoint id and relay traffic between them", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the lobby server
    Serve {
        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,

        /// Interface to bind to
        #[arg(short, long)]
        bind: Option<String>,
    },

    /// Announce an endpoint and wait for a peer
    Announce {
        /// Endpoint id to announce
        endpoint_id: String,

        /// Lobby server to connect to
        #[arg(short, long, default_value = "127.0.0.1")]
        server: String,

        /// Lobby server port
        #[arg(short, long, default_value_t = protocol::DEFAULT_PORT)]
        port: u16,
    },

    /// Join a previously announced endpoint
    Join {
        /// Endpoint id to connect to
        endpoint_id: String,

        /// Lobby server to connect to
        #[arg(short, long, default_value = "127.0.0.1")]
        server: String,

        /// Lobby server port
        #[arg(short, long, default_value_t = protocol::DEFAULT_PORT)]
        port: u16,
    },

    /// Show current configuration
    Config {
        /// Generate sample configuration
        #[arg(long)]
        generate: bool,

        /// Output path for generated config
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    // Load configuration
    let config = if let Some(config_path) = &cli.config {
        Config::load(config_path)?
    } else {
        Config::load_default().unwrap_or_default()
    };

    match cli.command {
        Commands::Serve { port, bind } => {
            run_server(config, port, bind).await?;
        }
        Commands::Announce {
            endpoint_id,
            server,
            port,
        } => {
            run_client(&server, port, ClientRole::Announce(endpoint_id)).await?;
        }
        Commands::Join {
            endpoint_id,
            server,
            port,
        } => {
            run_client(&server, port, ClientRole::Join(endpoint_id)).await?;
        }
        Commands::Config { generate, output } => {
            if generate {
                let sample = config::generate_sample_config();
                if let Some(path) = output {
                    std::fs::write(&path, &sample)?;
                    println!("Configuration written to: {}", path.display());
                } else {
                    println!("{}", sample);
                }
            } else {
                println!("{}", toml::to_string_pretty(&config)?);
            }
        }
    }

    Ok(())
}

/// Run the lobby server
async fn run_server(
    config: Config,
    port: Option<u16>,
    bind: Option<String>,
) -> anyhow::Result<()> {
    let net_config = NetConfig {
        port: port.unwrap_or(config.network.port),
        bind_address: bind.or(config.network.bind_address),
        max_frame_bytes: config.network.max_frame_bytes,
    };

    tracing::info!("Starting lobby server on {}", net_config.bind_addr());

    let lobby = Arc::new(Lobby::new());
    let mut server = Server::new(net_config, lobby.clone());

    let mut event_rx = server
        .take_event_receiver()
        .ok_or_else(|| anyhow::anyhow!("Server event receiver already taken"))?;

    server.start().await?;

    println!("Lobby server running. Press Ctrl+C to stop.");

    // Main event loop
    loop {
        tokio::select! {
            Some(event) = event_rx.recv() => {
                match event {
                    ServerEvent::Started { bind_addr } => {
                        println!("Listening on {}", bind_addr);
                    }
                    ServerEvent::ClientConnected { addr } => {
                        tracing::debug!("Client connected: {}", addr);
                    }
                    ServerEvent::ClientDisconnected { addr, reason } => {
                        tracing::debug!("Client disconnected: {} ({})", addr, reason);
                    }
                    ServerEvent::Stopped => {
                        break;
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                println!("\nShutting down...");
                server.stop().await?;
            }
        }
    }

    tracing::info!("Server stopped");

    Ok(())
}

enum ClientRole {
    Announce(String),
    Join(String),
}

/// Run a lobby client: announce or join, then pipe stdin/stdout to the peer
async fn run_client(server: &str, port: u16, role: ClientRole) -> anyhow::Result<()> {
    let mut client = LobbyClient::new(NetConfig::new(port));

    let mut event_rx = client
        .take_event_receiver()
        .ok_or_else(|| anyhow::anyhow!("Client event receiver already taken"))?;

    client.connect_hostname(server, port).await?;

    match &role {
        ClientRole::Announce(endpoint_id) => {
            client.announce(endpoint_id).await?;
            println!("Announced as '{}'. Waiting for a peer...", endpoint_id);
        }
        ClientRole::Join(endpoint_id) => {
            client.connect_to(endpoint_id).await?;
            println!("Connecting to '{}'...", endpoint_id);
        }
    }

    let mut stdin_lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            Some(event) = event_rx.recv() => {
                match event {
                    ClientEvent::Connected { server_addr } => {
                        tracing::debug!("Connected to lobby at {}", server_addr);
                    }
                    ClientEvent::Paired => {
                        println!("Paired. Everything you type is relayed to the peer.");
                    }
                    ClientEvent::ErrorReply { error } => {
                        eprintln!("Lobby error: {}", error);
                    }
                    ClientEvent::Message { frame } => {
                        println!("{}", frame);
                    }
                    ClientEvent::Disconnected { reason } => {
                        println!("Disconnected: {}", reason);
                        break;
                    }
                }
            }
            line = stdin_lines.next_line(), if stdin_open => {
                match line? {
                    Some(line) => client.send(line).await?,
                    None => {
                        stdin_open = false;
                        let _ = client.disconnect().await;
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                println!("\nDisconnecting...");
                let _ = client.disconnect().await;
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parsing() {
        let cli = Cli::try_parse_from(["lobbyd", "serve", "--port", "5555"]);
        assert!(cli.is_ok());
    }

    #[test]
    fn test_cli_join_requires_endpoint_id() {
        let cli = Cli::try_parse_from(["lobbyd", "join"]);
        assert!(cli.is_err());
    }
}
