//! Frame codec for the line-oriented wire format
//!
//! Splits the byte stream into newline-terminated UTF-8 frames. The frame
//! content is not interpreted here; relayed traffic passes through this
//! codec untouched.

use bytes::{BufMut, BytesMut};
use std::str::Utf8Error;
use thiserror::Error;

/// Default maximum frame size (64 KB)
pub const MAX_FRAME_BYTES: usize = 64 * 1024;

/// Codec errors
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Frame too large: {0} bytes (max: {1})")]
    FrameTooLarge(usize, usize),

    #[error("Frame is not valid UTF-8: {0}")]
    Utf8(#[from] Utf8Error),
}

/// Encodes frames into the wire format
pub struct Encoder;

impl Encoder {
    pub fn new() -> Self {
        Self
    }

    /// Append a frame and its terminator to the buffer
    pub fn encode(&self, frame: &str, buf: &mut BytesMut) {
        buf.put_slice(frame.as_bytes());
        buf.put_u8(b'\n');
    }
}

impl Default for Encoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Decodes frames from the wire format
pub struct Decoder {
    /// Offset of the first byte not yet scanned for a terminator
    scanned: usize,
    /// Maximum accepted frame size
    max_frame_bytes: usize,
}

impl Decoder {
    pub fn new() -> Self {
        Self::with_max_frame_bytes(MAX_FRAME_BYTES)
    }

    pub fn with_max_frame_bytes(max_frame_bytes: usize) -> Self {
        Self {
            scanned: 0,
            max_frame_bytes,
        }
    }

    /// Attempt to decode a frame from the buffer
    /// Returns Ok(None) if more data is needed
    pub fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<String>, CodecError> {
        let newline = buf[self.scanned..]
            .iter()
            .position(|&b| b == b'\n')
            .map(|pos| self.scanned + pos);

        match newline {
            Some(pos) => {
                if pos > self.max_frame_bytes {
                    return Err(CodecError::FrameTooLarge(pos, self.max_frame_bytes));
                }

                let mut line = buf.split_to(pos + 1);
                self.scanned = 0;

                // Drop the '\n' and an optional preceding '\r'
                line.truncate(pos);
                if line.last() == Some(&b'\r') {
                    line.truncate(line.len() - 1);
                }

                let frame = std::str::from_utf8(&line)?.to_string();
                Ok(Some(frame))
            }
            None => {
                if buf.len() > self.max_frame_bytes {
                    return Err(CodecError::FrameTooLarge(buf.len(), self.max_frame_bytes));
                }
                self.scanned = buf.len();
                Ok(None)
            }
        }
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_decode_roundtrip() {
        let encoder = Encoder::new();
        let mut decoder = Decoder::new();
        let mut buf = BytesMut::new();

        encoder.encode(r#"{"command":"announce","endpoint_id":"a"}"#, &mut buf);

        let frame = decoder.decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame, r#"{"command":"announce","endpoint_id":"a"}"#);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_partial_frame_needs_more_data() {
        let mut decoder = Decoder::new();
        let mut buf = BytesMut::from(&b"{\"command\":"[..]);

        assert!(decoder.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(b"\"connect\"}\n");
        let frame = decoder.decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame, r#"{"command":"connect"}"#);
    }

    #[test]
    fn test_multiple_frames() {
        let mut decoder = Decoder::new();
        let mut buf = BytesMut::from(&b"one\ntwo\nthree\n"[..]);

        assert_eq!(decoder.decode(&mut buf).unwrap().unwrap(), "one");
        assert_eq!(decoder.decode(&mut buf).unwrap().unwrap(), "two");
        assert_eq!(decoder.decode(&mut buf).unwrap().unwrap(), "three");
        assert!(decoder.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_crlf_terminator() {
        let mut decoder = Decoder::new();
        let mut buf = BytesMut::from(&b"hello\r\n"[..]);

        assert_eq!(decoder.decode(&mut buf).unwrap().unwrap(), "hello");
    }

    #[test]
    fn test_empty_frame() {
        let mut decoder = Decoder::new();
        let mut buf = BytesMut::from(&b"\n"[..]);

        assert_eq!(decoder.decode(&mut buf).unwrap().unwrap(), "");
    }

    #[test]
    fn test_oversized_frame_rejected() {
        let mut decoder = Decoder::with_max_frame_bytes(8);
        let mut buf = BytesMut::from(&b"0123456789abcdef"[..]);

        assert!(matches!(
            decoder.decode(&mut buf),
            Err(CodecError::FrameTooLarge(..))
        ));
    }

    #[test]
    fn test_invalid_utf8_rejected() {
        let mut decoder = Decoder::new();
        let mut buf = BytesMut::from(&[0xff, 0xfe, b'\n'][..]);

        assert!(matches!(decoder.decode(&mut buf), Err(CodecError::Utf8(_))));
    }
}
