//! Protocol message definitions
//!
//! Defines the command messages clients send before pairing and the
//! replies the lobby sends back. After pairing, frames are opaque and
//! never pass through these types.

use serde::Deserialize;
use serde_json::json;

/// Commands a client may issue before it is paired.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "command", rename_all = "lowercase")]
pub enum Command {
    /// Register the sending connection under an endpoint id
    Announce { endpoint_id: String },

    /// Pair the sending connection with a previously announced endpoint
    Connect { endpoint_id: String },
}

impl Command {
    /// Parse a raw frame as a command.
    ///
    /// Any frame that is not a well-formed, recognized command is rejected;
    /// the dispatcher treats that as grounds for closing the connection.
    pub fn parse(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    /// The endpoint id the command refers to
    pub fn endpoint_id(&self) -> &str {
        match self {
            Command::Announce { endpoint_id } => endpoint_id,
            Command::Connect { endpoint_id } => endpoint_id,
        }
    }
}

/// Replies the lobby sends to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    /// Sent to both sides of a freshly formed pairing
    Connected,
    /// Sent to an announcer whose id is already taken, before closing it
    AlreadyAnnounced,
    /// Sent to a connector naming an unknown id, before closing it
    NotAnnounced,
}

impl Reply {
    /// Serialize to the exact wire shape
    pub fn to_frame(self) -> String {
        match self {
            Reply::Connected => json!({ "event": "connected" }),
            Reply::AlreadyAnnounced => json!({ "error": "endpoint-already-announced" }),
            Reply::NotAnnounced => json!({ "error": "endpoint-not-announced" }),
        }
        .to_string()
    }
}
