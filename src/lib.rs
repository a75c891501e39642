//! # rsocket-wire
//!
//! A minimal RSocket-style protocol engine: multiplexed request/response
//! (plus fire-and-forget, metadata push, request-stream and request-channel)
//! over one duplex connection, with a setup/acceptance handshake.
//!
//! ## Architecture
//!
//! - **Protocol**: 6-byte frame header, typed frame bodies, length-prefix buffering
//! - **Registry**: live streams by ID, per-side ID allocation, teardown on close
//! - **Connection**: read loop, keepalive, dedicated writer task with backpressure
//! - **Transports**: TCP (length-prefixed), WebSocket (one frame per binary message),
//!   and any `AsyncRead + AsyncWrite` stream
//!
//! ## Example
//!
//! ```ignore
//! use std::time::Duration;
//! use rsocket_wire::transport::WebSocketClientTransport;
//! use rsocket_wire::{Client, Payload, SetupPayload};
//!
//! #[tokio::main]
//! async fn main() -> rsocket_wire::Result<()> {
//!     let client = Client::builder()
//!         .setup(SetupPayload::from_str("setup", ""))
//!         .connect_timeout(Duration::from_secs(1))
//!         .connect(WebSocketClientTransport::from_addr("127.0.0.1:7878", "/events"))
//!         .await?;
//!
//!     let answer = client
//!         .request_response_timeout(Payload::from_str("data", "metadata"), Duration::from_secs(1))
//!         .await?;
//!     println!("{:?} {:?}", answer.data_utf8(), answer.metadata_utf8());
//!     Ok(())
//! }
//! ```

pub mod codec;
pub mod error;
pub mod handler;
pub mod payload;
pub mod protocol;
pub mod registry;
pub mod stream;
pub mod transport;
pub mod writer;

mod backpressure;
mod client;
mod connection;
mod requester;
mod server;

pub use client::{Client, ClientBuilder, DEFAULT_CONNECT_TIMEOUT};
pub use codec::MimeCodec;
pub use connection::{CloseCallback, DEFAULT_MAX_CONCURRENT_HANDLERS};
pub use error::{RSocketError, Result};
pub use handler::RSocket;
pub use payload::{Payload, SetupPayload};
pub use requester::{PayloadStream, PendingResponse, Requester};
pub use server::{ConnectionCloseCallback, Server, ServerBuilder, DEFAULT_SETUP_TIMEOUT};
pub use stream::StreamState;
pub use writer::WriterConfig;
