//! Error types for rsocket-wire.

use std::time::Duration;

use thiserror::Error;

use crate::protocol::{DecodeError, ErrorCode};

/// Main error type for all connection and request operations.
#[derive(Debug, Error)]
pub enum RSocketError {
    /// I/O error on the underlying transport.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A frame could not be decoded.
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    /// The transport could not be opened or the handshake failed.
    #[error("connect error: {0}")]
    Connect(String),

    /// The acceptor declined our setup.
    #[error("setup rejected: {0}")]
    SetupRejected(String),

    /// The peer answered a stream with an ERROR frame.
    #[error("request error ({code}): {message}")]
    Request { code: ErrorCode, message: String },

    /// The peer closed the connection with a connection-level ERROR frame.
    #[error("connection error ({code}): {message}")]
    Connection { code: ErrorCode, message: String },

    /// The peer completed a request/response without sending a value.
    #[error("empty response")]
    EmptyResponse,

    /// The stream was cancelled locally or by the peer.
    #[error("stream cancelled")]
    Cancelled,

    /// The underlying transport closed.
    #[error("transport closed")]
    TransportClosed,

    /// A deadline elapsed before the operation finished.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// Nothing was received from the peer within the max lifetime.
    #[error("keepalive timeout: nothing received for {0:?}")]
    KeepaliveTimeout(Duration),

    /// Protocol violation by the peer or by local usage.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// WebSocket transport error.
    #[error("websocket error: {0}")]
    WebSocket(#[from] Box<tokio_tungstenite::tungstenite::Error>),

    /// JSON payload codec error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// MsgPack payload encode error.
    #[error("MsgPack encode error: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),

    /// MsgPack payload decode error.
    #[error("MsgPack decode error: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),

    /// Backpressure timeout - write queue full.
    #[error("backpressure timeout")]
    BackpressureTimeout,
}

impl RSocketError {
    /// Build an application error, the kind handlers return to fail a request.
    pub fn application(message: impl Into<String>) -> Self {
        Self::Request {
            code: ErrorCode::APPLICATION_ERROR,
            message: message.into(),
        }
    }

    /// Error code and message used when this error is sent to the peer on a stream.
    pub fn to_stream_error(&self) -> (ErrorCode, String) {
        match self {
            Self::Request { code, message } => (*code, message.clone()),
            Self::Cancelled => (ErrorCode::CANCELED, self.to_string()),
            other => (ErrorCode::APPLICATION_ERROR, other.to_string()),
        }
    }

    /// Whether this error tears down the whole connection rather than one stream.
    pub fn is_connection_level(&self) -> bool {
        matches!(
            self,
            Self::Io(_)
                | Self::Decode(_)
                | Self::Connect(_)
                | Self::SetupRejected(_)
                | Self::Connection { .. }
                | Self::TransportClosed
                | Self::KeepaliveTimeout(_)
                | Self::WebSocket(_)
        )
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for RSocketError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocket(Box::new(err))
    }
}

/// Result type alias using RSocketError.
pub type Result<T> = std::result::Result<T, RSocketError>;
