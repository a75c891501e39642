//! TCP transport: length-prefixed frames over `TcpStream`.

use std::net::SocketAddr;

use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};

use super::{
    ClientTransport, DuplexConnection, Incoming, LengthPrefixedReader, LengthPrefixedWriter,
    ServerTransport,
};
use crate::error::{RSocketError, Result};
use crate::handler::BoxFuture;

fn into_connection(stream: TcpStream, peer: SocketAddr) -> Result<DuplexConnection> {
    stream.set_nodelay(true)?;
    let (read, write) = stream.into_split();
    Ok(DuplexConnection::new(
        LengthPrefixedReader::new(read),
        LengthPrefixedWriter::new(write),
        format!("tcp://{peer}"),
    ))
}

/// Connects to a TCP server.
#[derive(Debug, Clone)]
pub struct TcpClientTransport {
    addr: String,
}

impl TcpClientTransport {
    /// Target address, e.g. `127.0.0.1:7878`.
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }
}

impl ClientTransport for TcpClientTransport {
    fn connect(self) -> BoxFuture<'static, Result<DuplexConnection>> {
        Box::pin(async move {
            let stream = TcpStream::connect(&self.addr)
                .await
                .map_err(|e| RSocketError::Connect(format!("tcp connect to {}: {e}", self.addr)))?;
            let peer = stream.peer_addr()?;
            tracing::debug!(%peer, "tcp connected");
            into_connection(stream, peer)
        })
    }
}

/// Listens for TCP connections.
pub struct TcpServerTransport {
    listener: TcpListener,
}

impl TcpServerTransport {
    /// Bind a listener.
    pub async fn bind(addr: impl ToSocketAddrs) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { listener })
    }
}

impl ServerTransport for TcpServerTransport {
    fn accept(&mut self) -> BoxFuture<'_, Result<Incoming>> {
        Box::pin(async move {
            let (stream, peer) = self.listener.accept().await?;
            let incoming: Incoming = Box::pin(async move { into_connection(stream, peer) });
            Ok(incoming)
        })
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.local_addr().ok()
    }
}
