//! WebSocket transport: one frame per binary message, no length prefix.
//!
//! The server only upgrades requests for its configured path and answers
//! anything else with 404. Origins are not checked.

use std::net::SocketAddr;

use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, ToSocketAddrs};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{accept_hdr_async, connect_async, WebSocketStream};

use super::{ClientTransport, DuplexConnection, FrameReader, FrameWriter, Incoming, ServerTransport};
use crate::error::{RSocketError, Result};
use crate::handler::BoxFuture;
use crate::protocol::{DecodeError, DEFAULT_MAX_FRAME_SIZE};

struct WebSocketReader<S> {
    stream: SplitStream<WebSocketStream<S>>,
    max_frame_size: usize,
}

impl<S> FrameReader for WebSocketReader<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    fn read_frame(&mut self) -> BoxFuture<'_, Result<Option<Bytes>>> {
        Box::pin(async move {
            while let Some(message) = self.stream.next().await {
                let message = match message {
                    Ok(message) => message,
                    Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => {
                        return Ok(None)
                    }
                    Err(e) => return Err(e.into()),
                };

                match message {
                    Message::Binary(frame) => {
                        if frame.len() > self.max_frame_size {
                            return Err(DecodeError::FrameTooLarge {
                                size: frame.len(),
                                max: self.max_frame_size,
                            }
                            .into());
                        }
                        return Ok(Some(frame));
                    }
                    Message::Close(_) => return Ok(None),
                    Message::Text(_) => {
                        tracing::warn!("ignoring text websocket message");
                    }
                    // Ping/pong are answered by tungstenite.
                    _ => {}
                }
            }
            Ok(None)
        })
    }
}

struct WebSocketWriter<S> {
    sink: SplitSink<WebSocketStream<S>, Message>,
}

impl<S> FrameWriter for WebSocketWriter<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    fn write_frames<'a>(&'a mut self, frames: &'a [Bytes]) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            for frame in frames {
                self.sink.feed(Message::Binary(frame.clone())).await?;
            }
            self.sink.flush().await?;
            Ok(())
        })
    }

    fn close(&mut self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            match self.sink.close().await {
                Ok(()) => Ok(()),
                Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => {
                    Ok(())
                }
                Err(e) => Err(e.into()),
            }
        })
    }
}

fn into_connection<S>(ws: WebSocketStream<S>, peer: String) -> DuplexConnection
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (sink, stream) = ws.split();
    DuplexConnection::new(
        WebSocketReader {
            stream,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        },
        WebSocketWriter { sink },
        peer,
    )
}

/// Connects to a WebSocket server.
#[derive(Debug, Clone)]
pub struct WebSocketClientTransport {
    url: String,
}

impl WebSocketClientTransport {
    /// Full URL, e.g. `ws://127.0.0.1:7878/events`.
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    /// URL built from `host:port` and a path.
    pub fn from_addr(addr: impl std::fmt::Display, path: &str) -> Self {
        let path = if path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{path}")
        };
        Self::new(format!("ws://{addr}{path}"))
    }

    /// Target URL.
    pub fn url(&self) -> &str {
        &self.url
    }
}

impl ClientTransport for WebSocketClientTransport {
    fn connect(self) -> BoxFuture<'static, Result<DuplexConnection>> {
        Box::pin(async move {
            let (ws, _response) = connect_async(self.url.as_str())
                .await
                .map_err(|e| RSocketError::Connect(format!("websocket connect to {}: {e}", self.url)))?;
            tracing::debug!(url = %self.url, "websocket connected");
            Ok(into_connection(ws, self.url))
        })
    }
}

/// Listens for WebSocket upgrades on one path.
pub struct WebSocketServerTransport {
    listener: TcpListener,
    path: String,
}

impl WebSocketServerTransport {
    /// Bind a listener that upgrades requests for `path`.
    pub async fn bind(addr: impl ToSocketAddrs, path: impl Into<String>) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            path: path.into(),
        })
    }

    /// Path upgrades are accepted on.
    pub fn path(&self) -> &str {
        &self.path
    }
}

impl ServerTransport for WebSocketServerTransport {
    fn accept(&mut self) -> BoxFuture<'_, Result<Incoming>> {
        Box::pin(async move {
            let (stream, peer) = self.listener.accept().await?;
            stream.set_nodelay(true)?;
            let path = self.path.clone();

            let incoming: Incoming = Box::pin(async move {
                let check_path = |request: &Request, response: Response| {
                    if request.uri().path() == path {
                        Ok(response)
                    } else {
                        tracing::debug!(%peer, path = request.uri().path(), "rejecting upgrade");
                        let mut rejection =
                            ErrorResponse::new(Some(format!("no endpoint at {}", request.uri().path())));
                        *rejection.status_mut() = StatusCode::NOT_FOUND;
                        Err(rejection)
                    }
                };

                let ws = accept_hdr_async(stream, check_path).await?;
                Ok(into_connection(ws, format!("ws://{peer}")))
            });
            Ok(incoming)
        })
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.local_addr().ok()
    }
}
