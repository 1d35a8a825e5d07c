//! `\n\n`-framed message transport.
//!
//! The node terminates every top-level JSON object with a blank line, and
//! expects the same from the plugin. `FrameReader` accumulates bytes from
//! the descriptor into a growable buffer and hands out one complete object
//! at a time; `FrameWriter` serializes one object plus its terminator per
//! call, so outbound objects never interleave.

use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

const READ_CHUNK: usize = 4096;

/// Buffered reader over a `\n\n`-framed stream.
///
/// Partial messages may straddle reads; callers `fill()` until
/// `pop_frame()` yields something. A `fill()` returning 0 means the peer
/// closed the stream.
pub struct FrameReader<R> {
    reader: R,
    buf: Vec<u8>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buf: Vec::with_capacity(READ_CHUNK),
        }
    }

    /// One read from the descriptor into the buffer. Returns the number of
    /// bytes read; 0 means EOF.
    pub async fn fill(&mut self) -> io::Result<usize> {
        let mut chunk = [0u8; READ_CHUNK];
        let n = self.reader.read(&mut chunk).await?;
        self.buf.extend_from_slice(&chunk[..n]);
        Ok(n)
    }

    /// Extract the next complete object, terminator included, compacting
    /// the buffer. Returns `None` while no boundary is present.
    pub fn pop_frame(&mut self) -> Option<Vec<u8>> {
        let end = find_boundary(&self.buf)?;
        Some(self.buf.drain(..end).collect())
    }

    /// Read until a full frame is available. `Ok(None)` on clean EOF.
    ///
    /// This is the synchronous-style path used while waiting for a single
    /// reply (the init-time `listconfigs` call); the event loop proper
    /// uses `fill`/`pop_frame` so it can multiplex.
    pub async fn read_frame(&mut self) -> io::Result<Option<Vec<u8>>> {
        loop {
            if let Some(frame) = self.pop_frame() {
                return Ok(Some(frame));
            }
            if self.fill().await? == 0 {
                return Ok(None);
            }
        }
    }

    /// Access the underlying stream, e.g. to write on a bidirectional
    /// socket whose read side this reader owns.
    pub fn inner_mut(&mut self) -> &mut R {
        &mut self.reader
    }
}

fn find_boundary(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\n\n").map(|i| i + 2)
}

/// True if a frame contains nothing but whitespace (the terminator of the
/// previous object can produce these; they are not messages).
pub fn is_blank(frame: &[u8]) -> bool {
    frame.iter().all(u8::is_ascii_whitespace)
}

/// Write one serialized object followed by the `\n\n` terminator.
pub async fn write_framed<W: AsyncWrite + Unpin>(writer: &mut W, obj: &[u8]) -> io::Result<()> {
    writer.write_all(obj).await?;
    writer.write_all(b"\n\n").await?;
    writer.flush().await
}

/// Framed writer over an `AsyncWrite`.
pub struct FrameWriter<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub async fn write_obj(&mut self, obj: &[u8]) -> io::Result<()> {
        write_framed(&mut self.writer, obj).await
    }
}
