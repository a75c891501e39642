//! Client builder and connected client.
//!
//! The [`ClientBuilder`] configures the setup payload, deadlines and
//! writer limits. [`ClientBuilder::connect`] then:
//! 1. Opens the transport within the connect timeout
//! 2. Sends SETUP before anything else
//! 3. Optionally confirms the setup with a KEEPALIVE round trip, so a
//!    rejection surfaces from `connect` as `SetupRejected`
//! 4. Starts the read and keepalive loops
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use rsocket_wire::transport::TcpClientTransport;
//! use rsocket_wire::{Client, Payload, SetupPayload};
//!
//! #[tokio::main]
//! async fn main() -> rsocket_wire::Result<()> {
//!     let client = Client::builder()
//!         .setup(SetupPayload::from_str("setup", ""))
//!         .connect_timeout(Duration::from_secs(1))
//!         .connect(TcpClientTransport::new("127.0.0.1:7878"))
//!         .await?;
//!
//!     let answer = client.request_response(Payload::from_str("data", "metadata")).await?;
//!     println!("{:?}", answer.data_utf8());
//!     client.close().await;
//!     Ok(())
//! }
//! ```

use std::ops::Deref;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::time::Instant;

use crate::connection::{
    CloseCallback, Connection, ConnectionConfig, Keepalive, DEFAULT_MAX_CONCURRENT_HANDLERS,
};
use crate::error::{RSocketError, Result};
use crate::handler::RSocket;
use crate::payload::SetupPayload;
use crate::protocol::Frame;
use crate::registry::StreamSide;
use crate::requester::Requester;
use crate::transport::ClientTransport;
use crate::writer::WriterConfig;

/// Default deadline for opening the transport and confirming the setup.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Data carried by the setup-confirmation KEEPALIVE.
const SETUP_CONFIRM_DATA: &[u8] = b"setup";

/// Builder for configuring and connecting a client.
pub struct ClientBuilder {
    setup: SetupPayload,
    connect_timeout: Duration,
    request_timeout: Option<Duration>,
    confirm_setup: bool,
    on_close: Option<CloseCallback>,
    responder: Option<Arc<dyn RSocket>>,
    writer_config: WriterConfig,
    max_concurrent_handlers: usize,
}

impl ClientBuilder {
    /// Create a new client builder.
    pub fn new() -> Self {
        Self {
            setup: SetupPayload::default(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            request_timeout: None,
            confirm_setup: true,
            on_close: None,
            responder: None,
            writer_config: WriterConfig::default(),
            max_concurrent_handlers: DEFAULT_MAX_CONCURRENT_HANDLERS,
        }
    }

    /// Set the SETUP payload sent when connecting.
    pub fn setup(mut self, setup: SetupPayload) -> Self {
        self.setup = setup;
        self
    }

    /// Set the keepalive interval and max lifetime advertised in SETUP.
    ///
    /// Default: 20 seconds / 90 seconds
    pub fn keepalive(mut self, interval: Duration, max_lifetime: Duration) -> Self {
        self.setup = self.setup.keepalive(interval, max_lifetime);
        self
    }

    /// Set the data MIME type advertised in SETUP.
    pub fn data_mime_type(mut self, mime: impl Into<String>) -> Self {
        self.setup = self.setup.data_mime_type(mime);
        self
    }

    /// Set the deadline for opening the transport and confirming the setup.
    ///
    /// Default: 10 seconds
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the default deadline of [`Requester::request_response`].
    ///
    /// Default: none
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Whether `connect` waits for a KEEPALIVE round trip after SETUP.
    ///
    /// When disabled, a rejected setup only reaches the close callback.
    /// Default: true
    pub fn confirm_setup(mut self, confirm: bool) -> Self {
        self.confirm_setup = confirm;
        self
    }

    /// Register a callback invoked once with the error that closed the connection.
    pub fn on_close<F>(mut self, callback: F) -> Self
    where
        F: FnOnce(&RSocketError) + Send + 'static,
    {
        self.on_close = Some(Box::new(callback));
        self
    }

    /// Answer server-initiated requests with `responder`.
    pub fn responder(mut self, responder: Arc<dyn RSocket>) -> Self {
        self.responder = Some(responder);
        self
    }

    /// Set the writer configuration (backpressure, channel, max frame size).
    pub fn writer_config(mut self, config: WriterConfig) -> Self {
        self.writer_config = config;
        self
    }

    /// Set the maximum number of concurrent handlers for server-initiated requests.
    ///
    /// Default: 256
    pub fn max_concurrent_handlers(mut self, limit: usize) -> Self {
        self.max_concurrent_handlers = limit;
        self
    }

    /// Open the transport and perform the setup handshake.
    ///
    /// # Errors
    ///
    /// `Connect` if the transport cannot be opened or closes before the
    /// setup is confirmed, or the deadline elapses; `SetupRejected` if the
    /// server rejects the setup (with confirmation enabled).
    pub async fn connect<T: ClientTransport>(self, transport: T) -> Result<Client> {
        let deadline = Instant::now() + self.connect_timeout;
        let timeout = self.connect_timeout;

        let duplex = match tokio::time::timeout_at(deadline, transport.connect()).await {
            Ok(Ok(duplex)) => duplex,
            Ok(Err(RSocketError::Connect(message))) => return Err(RSocketError::Connect(message)),
            Ok(Err(e)) => return Err(RSocketError::Connect(e.to_string())),
            Err(_) => {
                return Err(RSocketError::Connect(format!(
                    "transport not open after {timeout:?}"
                )))
            }
        };

        let config = ConnectionConfig {
            side: StreamSide::Client,
            peer: duplex.peer.clone(),
            writer: self.writer_config,
            max_concurrent_handlers: self.max_concurrent_handlers,
            request_timeout: self.request_timeout,
            data_mime_type: self.setup.data_mime_type.clone(),
        };
        let keepalive = Keepalive {
            interval: self.setup.keepalive_interval,
            max_lifetime: self.setup.max_lifetime,
            send: true,
        };

        let conn = Connection::new(config, duplex.writer, self.on_close);
        if let Some(responder) = self.responder {
            conn.set_responder(responder);
        }

        let ack = self.confirm_setup.then(|| conn.expect_setup_ack());

        tracing::debug!(
            peer = %duplex.peer,
            version = %self.setup.version(),
            data_mime_type = %self.setup.data_mime_type,
            "sending SETUP"
        );
        if let Err(e) = conn.writer().send(&Frame::setup(self.setup)).await {
            conn.close(RSocketError::TransportClosed).await;
            return Err(RSocketError::Connect(format!("SETUP not sent: {e}")));
        }
        conn.start(duplex.reader, keepalive);

        if let Some(ack) = ack {
            let confirm = Frame::keepalive(true, 0, Bytes::from_static(SETUP_CONFIRM_DATA));
            conn.send_or_log(&confirm).await;

            let outcome = match tokio::time::timeout_at(deadline, ack).await {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(_)) => Err(RSocketError::TransportClosed),
                Err(_) => Err(RSocketError::Connect(format!(
                    "setup not confirmed after {timeout:?}"
                ))),
            };

            if let Err(e) = outcome {
                let e = match e {
                    RSocketError::SetupRejected(_) | RSocketError::Connect(_) => e,
                    other => RSocketError::Connect(format!("connection closed during setup: {other}")),
                };
                conn.close(RSocketError::Connect(e.to_string())).await;
                return Err(e);
            }
            tracing::debug!(peer = %conn.config().peer, "setup confirmed");
        }

        Ok(Client {
            requester: Requester::new(conn),
        })
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A connected client.
///
/// Dereferences to its [`Requester`], so requests are issued directly on it.
#[derive(Debug, Clone)]
pub struct Client {
    requester: Requester,
}

impl Client {
    /// Create a new client builder.
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// A cloneable handle for issuing requests from other tasks.
    pub fn requester(&self) -> Requester {
        self.requester.clone()
    }
}

impl Deref for Client {
    type Target = Requester;

    fn deref(&self) -> &Requester {
        &self.requester
    }
}
