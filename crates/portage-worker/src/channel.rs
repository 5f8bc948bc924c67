//! Blocking framed channel over the rendezvous Unix socket.

use std::io::{Read, Write};
use std::os::unix::net::UnixStream;

use anyhow::{Context, Result};
use portage_wire::{Frame, FrameDecoder};

pub struct WorkerChannel {
    stream: UnixStream,
    decoder: FrameDecoder,
}

impl WorkerChannel {
    /// Connect to the orchestrator's rendezvous socket.
    pub fn connect(address: &str) -> Result<Self> {
        let stream = UnixStream::connect(address)
            .with_context(|| format!("connect to orchestrator at {address}"))?;
        Ok(Self::over(stream))
    }

    /// Wrap an already-connected stream (tests use a socketpair).
    pub fn over(stream: UnixStream) -> Self {
        Self {
            stream,
            decoder: FrameDecoder::new(),
        }
    }

    pub fn send(&mut self, frame: &Frame) -> Result<()> {
        self.stream
            .write_all(&frame.encode())
            .context("write frame")
    }

    /// Blocking read of the next frame. Errors on EOF or a corrupt stream.
    pub fn recv(&mut self) -> Result<Frame> {
        let mut buf = [0u8; 8192];
        loop {
            if let Some(frame) = self.decoder.next_frame()? {
                return Ok(frame);
            }
            let n = self.stream.read(&mut buf).context("read frame")?;
            if n == 0 {
                anyhow::bail!("orchestrator closed the connection");
            }
            self.decoder.feed(&buf[..n]);
        }
    }
}
