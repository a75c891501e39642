//! Transport module - duplex frame channels over concrete byte streams.
//!
//! The connection core only needs "receive the next frame" and "send these
//! frames". Transports provide both halves for:
//! - any `AsyncRead + AsyncWrite` stream with 24-bit length-prefixed frames
//!   ([`StreamTransport`], used over TCP and in-memory pipes)
//! - TCP ([`TcpClientTransport`], [`TcpServerTransport`])
//! - WebSocket, one frame per binary message
//!   ([`WebSocketClientTransport`], [`WebSocketServerTransport`])

mod stream;
mod tcp;
mod websocket;

pub use stream::{write_length_prefixed, LengthPrefixedReader, LengthPrefixedWriter, StreamTransport};
pub use tcp::{TcpClientTransport, TcpServerTransport};
pub use websocket::{WebSocketClientTransport, WebSocketServerTransport};

use bytes::Bytes;

use crate::error::Result;
use crate::handler::BoxFuture;

/// Read half of a connection.
pub trait FrameReader: Send + 'static {
    /// Next complete frame, without any transport framing.
    ///
    /// Returns `Ok(None)` when the peer closed the transport cleanly.
    fn read_frame(&mut self) -> BoxFuture<'_, Result<Option<Bytes>>>;
}

/// Write half of a connection.
pub trait FrameWriter: Send + 'static {
    /// Write a batch of encoded frames, in order, and flush.
    fn write_frames<'a>(&'a mut self, frames: &'a [Bytes]) -> BoxFuture<'a, Result<()>>;

    /// Close the write side of the transport.
    fn close(&mut self) -> BoxFuture<'_, Result<()>>;
}

/// Both halves of an established transport.
pub struct DuplexConnection {
    pub reader: Box<dyn FrameReader>,
    pub writer: Box<dyn FrameWriter>,
    /// Human-readable peer description for logs.
    pub peer: String,
}

impl DuplexConnection {
    /// Bundle a reader and a writer.
    pub fn new(
        reader: impl FrameReader,
        writer: impl FrameWriter,
        peer: impl Into<String>,
    ) -> Self {
        Self {
            reader: Box::new(reader),
            writer: Box::new(writer),
            peer: peer.into(),
        }
    }
}

impl std::fmt::Debug for DuplexConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DuplexConnection")
            .field("peer", &self.peer)
            .finish_non_exhaustive()
    }
}

/// Opens one outbound connection.
pub trait ClientTransport: Send + 'static {
    /// Establish the transport. Callers bound this with their own deadline.
    fn connect(self) -> BoxFuture<'static, Result<DuplexConnection>>;
}

/// Connection whose transport handshake still has to finish.
///
/// Servers spawn it so one slow handshake does not stall the accept loop.
pub type Incoming = BoxFuture<'static, Result<DuplexConnection>>;

/// Accepts inbound connections.
pub trait ServerTransport: Send + 'static {
    /// Wait for the next inbound connection.
    fn accept(&mut self) -> BoxFuture<'_, Result<Incoming>>;

    /// Address the transport listens on, if any.
    fn local_addr(&self) -> Option<std::net::SocketAddr>;
}
