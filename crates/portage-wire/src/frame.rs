//! Length-prefixed frame codec.
//!
//! A frame on the wire is `u32 payload length (LE) + u32 tag (LE) + payload`.
//! The decoder consumes an arbitrary byte stream incrementally, so it works
//! both for blocking reads (worker side) and chunked async reads
//! (orchestrator side).

use crate::error::WireError;

/// Upper bound on a single frame payload. Data chunks are far smaller; the
/// bound exists so a corrupt length prefix cannot allocate unbounded memory.
pub const MAX_FRAME_PAYLOAD: usize = 16 * 1024 * 1024;

/// One decoded frame: raw tag plus opaque payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub tag: u32,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(tag: u32, payload: Vec<u8>) -> Self {
        Self { tag, payload }
    }

    /// Serialize into `out` (header plus payload).
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        out.reserve(8 + self.payload.len());
        out.extend_from_slice(&(self.payload.len() as u32).to_le_bytes());
        out.extend_from_slice(&self.tag.to_le_bytes());
        out.extend_from_slice(&self.payload);
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(8 + self.payload.len());
        self.encode_into(&mut out);
        out
    }
}

/// Incremental frame decoder over a byte stream.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append newly received bytes.
    pub fn feed(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Pop the next complete frame, if one is buffered.
    pub fn next_frame(&mut self) -> Result<Option<Frame>, WireError> {
        if self.buf.len() < 8 {
            return Ok(None);
        }
        let len = u32::from_le_bytes([self.buf[0], self.buf[1], self.buf[2], self.buf[3]]) as usize;
        if len > MAX_FRAME_PAYLOAD {
            return Err(WireError::Oversize {
                got: len,
                limit: MAX_FRAME_PAYLOAD,
            });
        }
        if self.buf.len() < 8 + len {
            return Ok(None);
        }
        let tag = u32::from_le_bytes([self.buf[4], self.buf[5], self.buf[6], self.buf[7]]);
        let payload = self.buf[8..8 + len].to_vec();
        self.buf.drain(..8 + len);
        Ok(Some(Frame { tag, payload }))
    }

    /// Bytes buffered but not yet decodable into a frame.
    pub fn pending_bytes(&self) -> usize {
        self.buf.len()
    }
}
