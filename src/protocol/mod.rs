//! Protocol module - Defines the wire protocol for lobby communication
//!
//! The protocol is line-oriented JSON text:
//! - Each frame is one UTF-8 line terminated by '\n'
//! - Pre-pairing frames are JSON command objects
//! - Post-pairing frames are opaque and relayed verbatim

mod message;
mod codec;

pub use message::*;
pub use codec::*;

/// Default port for the lobby server
pub const DEFAULT_PORT: u16 = 5555;
