//! Server builder and accept loop.
//!
//! A [`Server`] accepts connections from a [`ServerTransport`] and runs each
//! one on its own task:
//! 1. The first frame must be SETUP, within the setup timeout
//! 2. The acceptor decides on the setup; a rejection is answered with
//!    ERROR(REJECTED_SETUP) and the transport is closed
//! 3. On accept, the returned responder serves every request on the connection
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use rsocket_wire::handler::{accept_if_data_equals, RequestResponseFn};
//! use rsocket_wire::transport::TcpServerTransport;
//! use rsocket_wire::{Payload, Server};
//!
//! #[tokio::main]
//! async fn main() -> rsocket_wire::Result<()> {
//!     let responder = RequestResponseFn::new(|_payload: Payload| async move {
//!         Ok(Payload::from_str("data", "meta"))
//!     });
//!
//!     Server::builder()
//!         .acceptor(accept_if_data_equals("setup", Arc::new(responder)))
//!         .build()
//!         .serve(TcpServerTransport::bind("127.0.0.1:7878").await?)
//!         .await
//! }
//! ```

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::connection::{
    CloseCallback, Connection, ConnectionConfig, Keepalive, DEFAULT_MAX_CONCURRENT_HANDLERS,
};
use crate::error::{RSocketError, Result};
use crate::handler::{accept_all, AcceptResult, Acceptor, EmptyRSocket};
use crate::payload::SetupPayload;
use crate::protocol::{
    DecodeError, ErrorCode, Frame, FrameBody, CONNECTION_STREAM_ID, MAJOR_VERSION,
};
use crate::registry::StreamSide;
use crate::requester::Requester;
use crate::transport::{DuplexConnection, FrameReader, ServerTransport};
use crate::writer::WriterConfig;

/// Default deadline for a new connection to send SETUP.
pub const DEFAULT_SETUP_TIMEOUT: Duration = Duration::from_secs(10);

/// Pause after a failed accept before trying again.
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Called with the peer and the error that closed one of the server's connections.
pub type ConnectionCloseCallback = Arc<dyn Fn(&str, &RSocketError) + Send + Sync>;

/// Builder for configuring a server.
pub struct ServerBuilder {
    acceptor: Arc<Acceptor>,
    setup_timeout: Duration,
    writer_config: WriterConfig,
    max_concurrent_handlers: usize,
    on_connection_close: Option<ConnectionCloseCallback>,
}

impl ServerBuilder {
    /// Create a new server builder.
    ///
    /// Until an acceptor is set, every setup is accepted and answered by
    /// [`EmptyRSocket`].
    pub fn new() -> Self {
        Self {
            acceptor: accept_all(Arc::new(EmptyRSocket)),
            setup_timeout: DEFAULT_SETUP_TIMEOUT,
            writer_config: WriterConfig::default(),
            max_concurrent_handlers: DEFAULT_MAX_CONCURRENT_HANDLERS,
            on_connection_close: None,
        }
    }

    /// Set the acceptor deciding on each connection's SETUP.
    pub fn acceptor(mut self, acceptor: Arc<Acceptor>) -> Self {
        self.acceptor = acceptor;
        self
    }

    /// Set the acceptor from a closure.
    pub fn acceptor_fn<F>(mut self, acceptor: F) -> Self
    where
        F: Fn(&SetupPayload, Requester) -> AcceptResult + Send + Sync + 'static,
    {
        self.acceptor = Arc::new(acceptor);
        self
    }

    /// Set how long a new connection may take to send SETUP.
    ///
    /// Default: 10 seconds
    pub fn setup_timeout(mut self, timeout: Duration) -> Self {
        self.setup_timeout = timeout;
        self
    }

    /// Set the writer configuration used for every connection.
    pub fn writer_config(mut self, config: WriterConfig) -> Self {
        self.writer_config = config;
        self
    }

    /// Set the maximum number of concurrent handlers per connection.
    ///
    /// Requests beyond the limit are answered with REJECTED.
    /// Default: 256
    pub fn max_concurrent_handlers(mut self, limit: usize) -> Self {
        self.max_concurrent_handlers = limit;
        self
    }

    /// Register a callback invoked once per connection with its close cause.
    pub fn on_connection_close<F>(mut self, callback: F) -> Self
    where
        F: Fn(&str, &RSocketError) + Send + Sync + 'static,
    {
        self.on_connection_close = Some(Arc::new(callback));
        self
    }

    /// Build the server.
    pub fn build(self) -> Server {
        Server {
            inner: Arc::new(self),
        }
    }
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A configured server. Cheap to clone.
#[derive(Clone)]
pub struct Server {
    inner: Arc<ServerBuilder>,
}

impl Server {
    /// Create a new server builder.
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    /// Accept connections until the transport fails.
    pub async fn serve<T: ServerTransport>(&self, transport: T) -> Result<()> {
        self.serve_with_shutdown(transport, std::future::pending::<()>())
            .await
    }

    /// Accept connections until `shutdown` resolves.
    ///
    /// Connections already accepted keep running after the loop stops.
    pub async fn serve_with_shutdown<T, F>(&self, mut transport: T, shutdown: F) -> Result<()>
    where
        T: ServerTransport,
        F: Future<Output = ()> + Send,
    {
        if let Some(addr) = transport.local_addr() {
            tracing::info!(%addr, "server listening");
        }
        tokio::pin!(shutdown);

        loop {
            let incoming = tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("server shutting down");
                    return Ok(());
                }
                incoming = transport.accept() => incoming,
            };

            let incoming = match incoming {
                Ok(incoming) => incoming,
                Err(e) => {
                    tracing::warn!(error = %e, "accept failed");
                    tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
                    continue;
                }
            };

            let server = self.clone();
            tokio::spawn(async move {
                match incoming.await {
                    Ok(duplex) => {
                        if let Err(e) = server.serve_connection(duplex).await {
                            tracing::debug!(error = %e, "connection ended");
                        }
                    }
                    Err(e) => tracing::warn!(error = %e, "transport handshake failed"),
                }
            });
        }
    }

    /// Run one established connection until it closes.
    ///
    /// # Errors
    ///
    /// `Connect` describing why the connection never got past SETUP: no
    /// SETUP within the timeout, an invalid or unsupported SETUP, or a
    /// rejection by the acceptor.
    pub async fn serve_connection(&self, duplex: DuplexConnection) -> Result<()> {
        let DuplexConnection {
            mut reader,
            writer,
            peer,
        } = duplex;
        tracing::debug!(%peer, "connection opened");

        let setup = self.read_setup(&mut reader).await;

        let config = ConnectionConfig {
            side: StreamSide::Server,
            peer: peer.clone(),
            writer: self.inner.writer_config.clone(),
            max_concurrent_handlers: self.inner.max_concurrent_handlers,
            request_timeout: None,
            data_mime_type: setup
                .as_ref()
                .map(|setup| setup.data_mime_type.clone())
                .unwrap_or_default(),
        };
        let on_close = self.inner.on_connection_close.clone().map(|callback| {
            let peer = peer.clone();
            Box::new(move |cause: &RSocketError| callback(&peer, cause)) as CloseCallback
        });
        let conn = Connection::new(config, writer, on_close);

        let setup = match setup {
            Ok(setup) => setup,
            Err(failure) => return fail_setup(&conn, failure).await,
        };

        let requester = Requester::new(conn.clone());
        match (self.inner.acceptor)(&setup, requester) {
            Ok(responder) => {
                tracing::info!(
                    %peer,
                    version = %setup.version(),
                    data_mime_type = %setup.data_mime_type,
                    "setup accepted"
                );
                conn.set_responder(responder);
                conn.start(
                    reader,
                    Keepalive {
                        interval: setup.keepalive_interval,
                        max_lifetime: setup.max_lifetime,
                        send: false,
                    },
                );
                conn.closed().await;
                Ok(())
            }
            Err(message) => {
                tracing::info!(%peer, reason = %message, "setup rejected");
                fail_setup(&conn, SetupFailure::new(ErrorCode::REJECTED_SETUP, message)).await
            }
        }
    }

    async fn read_setup(
        &self,
        reader: &mut Box<dyn FrameReader>,
    ) -> std::result::Result<SetupPayload, SetupFailure> {
        let timeout = self.inner.setup_timeout;
        let bytes = match tokio::time::timeout(timeout, reader.read_frame()).await {
            Ok(Ok(Some(bytes))) => bytes,
            Ok(Ok(None)) => return Err(SetupFailure::silent(RSocketError::TransportClosed)),
            Ok(Err(e)) => return Err(SetupFailure::silent(e)),
            Err(_) => return Err(SetupFailure::silent(RSocketError::Timeout(timeout))),
        };

        let frame = match Frame::decode(bytes) {
            Ok(frame) => frame,
            Err(DecodeError::Unsupported(kind)) => {
                return Err(SetupFailure::new(
                    ErrorCode::UNSUPPORTED_SETUP,
                    format!("{kind} is not supported"),
                ))
            }
            Err(e) => return Err(SetupFailure::new(ErrorCode::INVALID_SETUP, e.to_string())),
        };

        let setup = match frame.body {
            FrameBody::Setup(setup) => setup,
            other => {
                return Err(SetupFailure::new(
                    ErrorCode::INVALID_SETUP,
                    format!("expected SETUP, got {}", other.frame_type()),
                ))
            }
        };

        if setup.major_version != MAJOR_VERSION {
            return Err(SetupFailure::new(
                ErrorCode::UNSUPPORTED_SETUP,
                format!("unsupported version {}", setup.version()),
            ));
        }
        if setup.lease {
            return Err(SetupFailure::new(
                ErrorCode::UNSUPPORTED_SETUP,
                "lease is not supported",
            ));
        }
        Ok(setup)
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("setup_timeout", &self.inner.setup_timeout)
            .field("max_concurrent_handlers", &self.inner.max_concurrent_handlers)
            .finish_non_exhaustive()
    }
}

/// Why a connection never got past SETUP.
struct SetupFailure {
    /// Connection-level ERROR to send, if the peer should be told.
    reply: Option<(ErrorCode, String)>,
    cause: RSocketError,
}

impl SetupFailure {
    fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        let message = message.into();
        let cause = if code == ErrorCode::REJECTED_SETUP {
            RSocketError::SetupRejected(message.clone())
        } else {
            RSocketError::Protocol(message.clone())
        };
        Self {
            reply: Some((code, message)),
            cause,
        }
    }

    fn silent(cause: RSocketError) -> Self {
        Self { reply: None, cause }
    }
}

async fn fail_setup(conn: &Arc<Connection>, failure: SetupFailure) -> Result<()> {
    if let Some((code, message)) = failure.reply {
        tracing::debug!(peer = %conn.config().peer, %code, %message, "refusing setup");
        conn.send_or_log(&Frame::error(CONNECTION_STREAM_ID, code, message))
            .await;
    }
    let cause = failure.cause.to_string();
    conn.close(failure.cause).await;
    Err(RSocketError::Connect(cause))
}
