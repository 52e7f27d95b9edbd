//! Sentinel-delimited framing
//!
//! Frames are text payloads terminated by a single `\0`. Outgoing frames
//! after the first on a connection carry a leading `\r\n`.

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Frame terminator
pub const SENTINEL: u8 = 0;

/// Separator written before every frame except the first
pub const LINE_TERMINATOR: &[u8] = b"\r\n";

/// Default cap on a buffered, unterminated frame
pub const DEFAULT_MAX_FRAME_LEN: usize = 1024 * 1024;

/// Accumulates raw chunks and yields complete frames
///
/// The trailing segment after the last sentinel (empty or partial) is kept
/// for the next chunk. Splitting happens on bytes, so a UTF-8 sequence cut
/// across two chunks is decoded whole.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    buf: BytesMut,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and drain every complete frame in order
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);
        let mut frames = Vec::new();
        while let Some(frame) = self.next_frame() {
            frames.push(frame);
        }
        frames
    }

    fn next_frame(&mut self) -> Option<String> {
        let pos = self.buf.iter().position(|&b| b == SENTINEL)?;
        let frame = self.buf.split_to(pos);
        self.buf.advance(1);
        Some(decode(&frame))
    }

    /// Bytes held for an unterminated frame
    pub fn pending_len(&self) -> usize {
        self.buf.len()
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }
}

/// Strips the `\r\n` the peer writes around payloads
fn decode(frame: &[u8]) -> String {
    let frame = frame.strip_prefix(LINE_TERMINATOR).unwrap_or(frame);
    let frame = frame.strip_suffix(LINE_TERMINATOR).unwrap_or(frame);
    String::from_utf8_lossy(frame).into_owned()
}

/// Encode one outgoing frame
pub fn encode_frame(payload: &str, first: bool) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + LINE_TERMINATOR.len() + 1);
    if !first {
        out.extend_from_slice(LINE_TERMINATOR);
    }
    out.extend_from_slice(payload.as_bytes());
    out.push(SENTINEL);
    out
}

#[derive(Debug)]
pub struct FrameReader<R> {
    inner: R,
    frames: FrameBuffer,
    ready: std::collections::VecDeque<String>,
    max_frame_len: usize,
}

impl<R> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            frames: FrameBuffer::new(),
            ready: std::collections::VecDeque::new(),
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }

    pub fn max_frame_len(mut self, max: usize) -> Self {
        self.max_frame_len = max.max(1);
        self
    }
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    /// Read one frame.
    ///
    /// Returns:
    /// - `Ok(Some(frame))` for a complete frame,
    /// - `Ok(None)` on EOF. A partial trailing frame is discarded.
    pub async fn read_frame(&mut self) -> std::io::Result<Option<String>> {
        let mut chunk = [0u8; 4096];
        loop {
            if let Some(frame) = self.ready.pop_front() {
                return Ok(Some(frame));
            }

            let n = self.inner.read(&mut chunk).await?;
            if n == 0 {
                return Ok(None);
            }
            self.ready.extend(self.frames.push(&chunk[..n]));

            if self.frames.pending_len() > self.max_frame_len {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    "frame too large",
                ));
            }
        }
    }
}

#[derive(Debug)]
pub struct FrameWriter<W> {
    inner: W,
    sent_first: bool,
}

impl<W> FrameWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            sent_first: false,
        }
    }
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub async fn write_frame(&mut self, payload: &str) -> std::io::Result<()> {
        let bytes = encode_frame(payload, !self.sent_first);
        self.inner.write_all(&bytes).await?;
        self.inner.flush().await?;
        self.sent_first = true;
        Ok(())
    }

    pub async fn shutdown(&mut self) -> std::io::Result<()> {
        self.inner.shutdown().await
    }
}
