//! Connection handling
//!
//! One `Connection` per accepted socket: it owns the stream and turns the
//! byte flow into frames. The lobby side of the connection is a
//! `ConnectionHandle`, the production implementation of the `Wire`
//! capability.

use bytes::BytesMut;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use crate::lobby::Wire;
use crate::protocol::{CodecError, Decoder, Encoder};

/// Connection errors
#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Framing error: {0}")]
    Codec(#[from] CodecError),

    #[error("Connection closed mid-frame")]
    Closed,
}

pub type ConnectionResult<T> = Result<T, ConnectionError>;

/// A framed TCP connection to one lobby client
pub struct Connection {
    /// The TCP stream
    stream: TcpStream,
    /// Frame encoder
    encoder: Encoder,
    /// Frame decoder
    decoder: Decoder,
    /// Read buffer
    read_buf: BytesMut,
    /// Write buffer
    write_buf: BytesMut,
}

impl Connection {
    /// Create a new connection from an established TCP stream
    pub fn new(stream: TcpStream, max_frame_bytes: usize) -> Self {
        Self {
            stream,
            encoder: Encoder::new(),
            decoder: Decoder::with_max_frame_bytes(max_frame_bytes),
            read_buf: BytesMut::with_capacity(4096),
            write_buf: BytesMut::with_capacity(4096),
        }
    }

    /// Receive a frame (returns None on clean close)
    pub async fn recv(&mut self) -> ConnectionResult<Option<String>> {
        loop {
            if let Some(frame) = self.decoder.decode(&mut self.read_buf)? {
                return Ok(Some(frame));
            }

            let mut buf = [0u8; 4096];
            let n = self.stream.read(&mut buf).await?;

            if n == 0 {
                if self.read_buf.is_empty() {
                    return Ok(None); // Clean close
                } else {
                    return Err(ConnectionError::Closed);
                }
            }

            self.read_buf.extend_from_slice(&buf[..n]);
        }
    }

    /// Send a frame
    pub async fn send(&mut self, frame: &str) -> ConnectionResult<()> {
        self.write_buf.clear();
        self.encoder.encode(frame, &mut self.write_buf);

        self.stream.write_all(&self.write_buf).await?;
        self.stream.flush().await?;

        Ok(())
    }

    /// Shut down the stream
    pub async fn shutdown(&mut self) -> ConnectionResult<()> {
        self.stream.shutdown().await?;
        Ok(())
    }
}

/// Commands delivered to a connection's write half
#[derive(Debug, PartialEq, Eq)]
pub enum WireCmd {
    /// Write one frame
    Frame(String),
    /// Terminate the connection
    Close,
}

/// Outbound handle for a connection; the production `Wire` implementation.
///
/// Sends are fire-and-forget pushes onto the connection task's queue.
/// Close is idempotent: only the first call enqueues a termination.
#[derive(Clone, Debug)]
pub struct ConnectionHandle {
    tx: mpsc::UnboundedSender<WireCmd>,
    open: Arc<AtomicBool>,
}

impl ConnectionHandle {
    pub fn new(tx: mpsc::UnboundedSender<WireCmd>) -> Self {
        Self {
            tx,
            open: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Whether the connection has not yet been closed
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Mark the connection closed without enqueueing anything.
    /// Used by the connection task itself when the socket goes away.
    pub fn mark_closed(&self) {
        self.open.store(false, Ordering::SeqCst);
    }
}

impl Wire for ConnectionHandle {
    fn send(&self, frame: String) {
        if self.open.load(Ordering::SeqCst) {
            let _ = self.tx.send(WireCmd::Frame(frame));
        }
    }

    fn close(&self) {
        if self.open.swap(false, Ordering::SeqCst) {
            let _ = self.tx.send(WireCmd::Close);
        }
    }
}
