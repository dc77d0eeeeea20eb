//! Framed transports.
//!
//! A [`FrameTransport`] carries UTF-8 text frames with preserved boundaries
//! and ordering between exactly two endpoints. The node core never touches
//! sockets directly; everything above this trait only sees whole frames.
//!
//! Two implementations ship here: newline-delimited JSON over TCP (the
//! reference transport) and an in-process channel pair for tests.

use crate::NetError;
use async_trait::async_trait;
use std::net::SocketAddr;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc;

/// Largest accepted frame in bytes; a 64 KiB chunk grows to ~87 KiB as
/// base64 inside JSON, so this leaves ample headroom.
pub const MAX_FRAME_LEN: usize = 4 * 1024 * 1024;

/// An ordered, reliable, boundary-preserving text frame stream.
#[async_trait]
pub trait FrameTransport: Send + 'static {
    /// Send one frame.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::InvalidFrame`] if the frame would corrupt the
    /// framing, or [`NetError::Transport`] on I/O failure.
    async fn send(&mut self, frame: &str) -> Result<(), NetError>;

    /// Receive the next frame; `None` means the peer closed cleanly.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::Transport`] on I/O failure.
    async fn recv(&mut self) -> Result<Option<String>, NetError>;
}

/// Newline-delimited text frames over a TCP stream.
pub struct TcpTransport {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    peer_addr: Option<SocketAddr>,
    /// Partial line carried across calls; `recv` futures are raced inside
    /// `select!` loops, and bytes already read must survive cancellation.
    line: String,
}

impl TcpTransport {
    /// Wrap an established stream
    #[must_use]
    pub fn new(stream: TcpStream) -> Self {
        let peer_addr = stream.peer_addr().ok();
        let (read_half, write_half) = stream.into_split();
        Self {
            reader: BufReader::new(read_half),
            writer: write_half,
            peer_addr,
            line: String::new(),
        }
    }

    /// Connect to a listening peer
    ///
    /// # Errors
    ///
    /// Returns [`NetError::Transport`] if the connection cannot be opened.
    pub async fn connect(addr: SocketAddr) -> Result<Self, NetError> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true).ok();
        Ok(Self::new(stream))
    }

    /// The remote address, when known
    #[must_use]
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }
}

#[async_trait]
impl FrameTransport for TcpTransport {
    async fn send(&mut self, frame: &str) -> Result<(), NetError> {
        if frame.contains('\n') {
            return Err(NetError::InvalidFrame);
        }
        self.writer.write_all(frame.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await?;
        Ok(())
    }

    async fn recv(&mut self) -> Result<Option<String>, NetError> {
        loop {
            // read_line appends across polls, so a cancelled call leaves
            // its partial frame in self.line for the next call to finish.
            let n = self.reader.read_line(&mut self.line).await?;
            if n == 0 {
                // EOF; an unterminated trailing fragment is discarded.
                return Ok(None);
            }
            if self.line.len() > MAX_FRAME_LEN {
                return Err(NetError::Transport(format!(
                    "frame of {} bytes over limit",
                    self.line.len()
                )));
            }
            if !self.line.ends_with('\n') {
                continue;
            }
            let frame = self.line.trim_end_matches(['\r', '\n']).to_string();
            self.line.clear();
            if !frame.is_empty() {
                return Ok(Some(frame));
            }
        }
    }
}

/// In-process transport built from a pair of channels.
///
/// Used by unit tests and by embedding front-ends that run several nodes in
/// one process.
pub struct MemoryTransport {
    tx: mpsc::Sender<String>,
    rx: mpsc::Receiver<String>,
}

impl MemoryTransport {
    /// Create two connected endpoints
    #[must_use]
    pub fn pair() -> (Self, Self) {
        let (a_tx, a_rx) = mpsc::channel(256);
        let (b_tx, b_rx) = mpsc::channel(256);
        (
            Self { tx: a_tx, rx: b_rx },
            Self { tx: b_tx, rx: a_rx },
        )
    }
}

#[async_trait]
impl FrameTransport for MemoryTransport {
    async fn send(&mut self, frame: &str) -> Result<(), NetError> {
        self.tx
            .send(frame.to_string())
            .await
            .map_err(|_| NetError::Transport("peer endpoint dropped".to_string()))
    }

    async fn recv(&mut self) -> Result<Option<String>, NetError> {
        Ok(self.rx.recv().await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_memory_pair_roundtrip() {
        let (mut a, mut b) = MemoryTransport::pair();
        a.send("{\"type\":\"ping\",\"timestamp\":1}").await.unwrap();
        let frame = b.recv().await.unwrap().unwrap();
        assert_eq!(frame, "{\"type\":\"ping\",\"timestamp\":1}");
    }

    #[tokio::test]
    async fn test_memory_close_yields_none() {
        let (a, mut b) = MemoryTransport::pair();
        drop(a);
        assert!(b.recv().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_tcp_roundtrip() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut transport = TcpTransport::new(stream);
            let frame = transport.recv().await.unwrap().unwrap();
            transport.send(&frame).await.unwrap();
        });

        let mut client = TcpTransport::connect(addr).await.unwrap();
        client.send("{\"type\":\"ping\",\"timestamp\":7}").await.unwrap();
        let echoed = client.recv().await.unwrap().unwrap();
        assert_eq!(echoed, "{\"type\":\"ping\",\"timestamp\":7}");
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_tcp_rejects_embedded_newline() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accept = tokio::spawn(async move { listener.accept().await.unwrap() });

        let mut client = TcpTransport::connect(addr).await.unwrap();
        assert!(matches!(
            client.send("two\nframes").await,
            Err(NetError::InvalidFrame)
        ));
        accept.await.unwrap();
    }

    #[tokio::test]
    async fn test_tcp_close_yields_none() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            drop(stream);
        });

        let mut client = TcpTransport::connect(addr).await.unwrap();
        server.await.unwrap();
        assert!(client.recv().await.unwrap().is_none());
    }
}
