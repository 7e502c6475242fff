//! Connection capability consumed by the lobby
//!
//! The lobby never touches sockets directly. Everything it needs from a
//! connection is behind the `Wire` trait, so the production TCP handle and
//! the recording stubs used in tests satisfy the same seam.

use std::fmt::Debug;

/// Outbound half of a client connection, as seen by the lobby.
///
/// Both operations are fire-and-forget: the lobby does not wait for
/// delivery and never retries.
pub trait Wire: Send + Sync + Debug {
    /// Transmit one frame verbatim
    fn send(&self, frame: String);

    /// Terminate the connection; idempotent
    fn close(&self);
}
