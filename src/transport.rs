//! Connection plumbing
//!
//! `Connector` opens the duplex stream (TCP by default, in-memory in
//! tests). Each open connection gets one writer task that owns the write
//! half: every outbound frame goes through its channel, so frames never
//! interleave and each send pushes the keepalive deadline back.

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::TransportError;
use crate::frame::FrameWriter;

/// Any duplex byte stream
pub trait AsyncStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> AsyncStream for T {}

pub type BoxedStream = Box<dyn AsyncStream>;

#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, host: &str, port: u16) -> std::io::Result<BoxedStream>;
}

/// Plain TCP
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, host: &str, port: u16) -> std::io::Result<BoxedStream> {
        let stream = TcpStream::connect((host, port)).await?;
        stream.set_nodelay(true)?;
        debug!("TCP connected to {}:{}", host, port);
        Ok(Box::new(stream))
    }
}

#[derive(Debug)]
pub(crate) enum WriterCommand {
    Frame(String),
    /// Flush and shut down the write half
    Close,
}

/// Drain outbound frames; send an empty frame after `keepalive` of silence
pub(crate) async fn writer_loop<W: AsyncWrite + Unpin>(
    mut writer: FrameWriter<W>,
    mut rx: mpsc::UnboundedReceiver<WriterCommand>,
    keepalive: Duration,
) -> std::io::Result<()> {
    let idle = tokio::time::sleep(keepalive);
    tokio::pin!(idle);

    loop {
        tokio::select! {
            cmd = rx.recv() => match cmd {
                Some(WriterCommand::Frame(frame)) => {
                    writer.write_frame(&frame).await?;
                    idle.as_mut().reset(Instant::now() + keepalive);
                }
                Some(WriterCommand::Close) | None => {
                    debug!("writer closing");
                    let _ = writer.shutdown().await;
                    return Ok(());
                }
            },
            _ = &mut idle => {
                debug!("keepalive");
                writer.write_frame("").await?;
                idle.as_mut().reset(Instant::now() + keepalive);
            }
        }
    }
}

/// Handles to one open connection's tasks
#[derive(Debug)]
pub(crate) struct Connection {
    pub generation: u64,
    outbound: mpsc::UnboundedSender<WriterCommand>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl Connection {
    pub fn new(
        generation: u64,
        outbound: mpsc::UnboundedSender<WriterCommand>,
        reader: JoinHandle<()>,
        writer: JoinHandle<()>,
    ) -> Self {
        Self {
            generation,
            outbound,
            reader,
            writer,
        }
    }

    pub fn send(&self, frame: String) -> Result<(), TransportError> {
        self.outbound
            .send(WriterCommand::Frame(frame))
            .map_err(|_| TransportError::Closed)
    }

    /// Close the write half, then give the reader `timeout` to see EOF
    pub async fn close(self, timeout: Duration) {
        let _ = self.outbound.send(WriterCommand::Close);
        let Connection {
            mut reader, writer, ..
        } = self;

        if tokio::time::timeout(timeout, &mut reader).await.is_err() {
            warn!("graceful close timed out; aborting connection");
            reader.abort();
        }
        writer.abort();
    }

    /// Stop both tasks immediately
    ///
    /// Safe to call from inside either task: it only takes effect at that
    /// task's next await.
    pub fn abort(self) {
        self.reader.abort();
        self.writer.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FrameBuffer;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn test_frames_in_order_then_close() {
        let (client, mut server) = tokio::io::duplex(256);
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(writer_loop(
            FrameWriter::new(client),
            rx,
            Duration::from_secs(60),
        ));

        tx.send(WriterCommand::Frame("bauth:room:1::".into())).unwrap();
        tx.send(WriterCommand::Frame("gparticipants".into())).unwrap();
        tx.send(WriterCommand::Close).unwrap();
        task.await.unwrap().unwrap();

        let mut raw = Vec::new();
        server.read_to_end(&mut raw).await.unwrap();
        assert_eq!(raw, b"bauth:room:1::\0\r\ngparticipants\0".to_vec());
    }

    #[tokio::test]
    async fn test_keepalive_after_silence() {
        let (client, mut server) = tokio::io::duplex(256);
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(writer_loop(
            FrameWriter::new(client),
            rx,
            Duration::from_millis(30),
        ));
        tx.send(WriterCommand::Frame("bauth:r:1::".into())).unwrap();

        let mut frames = FrameBuffer::new();
        let mut seen = Vec::new();
        let mut chunk = [0u8; 64];
        while seen.len() < 2 {
            let n = server.read(&mut chunk).await.unwrap();
            seen.extend(frames.push(&chunk[..n]));
        }
        assert_eq!(seen, vec!["bauth:r:1::", ""]);
        drop(tx);
    }

    #[tokio::test]
    async fn test_sends_push_keepalive_back() {
        let (client, mut server) = tokio::io::duplex(1024);
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(writer_loop(
            FrameWriter::new(client),
            rx,
            Duration::from_millis(200),
        ));

        // Steady traffic for well over two keepalive periods
        for i in 0..5 {
            tx.send(WriterCommand::Frame(format!("bm:n{}:0:hi", i))).unwrap();
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        tx.send(WriterCommand::Close).unwrap();
        task.await.unwrap().unwrap();

        let mut raw = Vec::new();
        server.read_to_end(&mut raw).await.unwrap();
        let frames = FrameBuffer::new().push(&raw);
        assert_eq!(frames.len(), 5);
        assert!(frames.iter().all(|f| !f.is_empty()), "keepalive sent: {:?}", frames);
    }
}
