//! Codec module - typed encoding of payload data by MIME type.
//!
//! The protocol treats data and metadata as opaque bytes. Applications that
//! exchange structured values pick a codec from the data MIME type
//! negotiated in SETUP:
//!
//! - [`JsonCodec`] - `application/json` via `serde_json`
//! - [`MsgPackCodec`] - `application/x-msgpack` via `rmp-serde` (struct-as-map)
//!
//! Any other MIME type is treated as raw binary and has no typed codec.
//!
//! # Example
//!
//! ```
//! use rsocket_wire::codec::MimeCodec;
//!
//! let codec = MimeCodec::from_mime_type("application/json");
//! let data = codec.encode(&vec![1, 2, 3]).unwrap();
//! let back: Vec<i32> = codec.decode(&data).unwrap();
//! assert_eq!(back, vec![1, 2, 3]);
//! ```

mod json;
mod msgpack;

pub use json::{JsonCodec, JSON_MIME_TYPE};
pub use msgpack::{MsgPackCodec, MSGPACK_MIME_TYPE};

use bytes::Bytes;

use crate::error::{RSocketError, Result};

/// Codec selected by a MIME type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MimeCodec {
    Json,
    MsgPack,
    /// Opaque bytes; typed encode/decode is refused.
    Binary,
}

impl MimeCodec {
    /// Pick the codec for a MIME type. Parameters such as `; charset=utf-8` are ignored.
    pub fn from_mime_type(mime: &str) -> Self {
        let essence = mime.split(';').next().unwrap_or("").trim();
        if essence.eq_ignore_ascii_case(JSON_MIME_TYPE) {
            Self::Json
        } else if essence.eq_ignore_ascii_case(MSGPACK_MIME_TYPE)
            || essence.eq_ignore_ascii_case("application/msgpack")
        {
            Self::MsgPack
        } else {
            Self::Binary
        }
    }

    /// Encode a value.
    ///
    /// # Errors
    ///
    /// Serialization errors, or `Protocol` for the binary codec.
    pub fn encode<T: serde::Serialize>(self, value: &T) -> Result<Bytes> {
        match self {
            Self::Json => JsonCodec::encode(value),
            Self::MsgPack => MsgPackCodec::encode(value),
            Self::Binary => Err(RSocketError::Protocol(
                "no typed codec for a binary MIME type".to_string(),
            )),
        }
    }

    /// Decode a value.
    ///
    /// # Errors
    ///
    /// Deserialization errors, or `Protocol` for the binary codec.
    pub fn decode<T: serde::de::DeserializeOwned>(self, bytes: &[u8]) -> Result<T> {
        match self {
            Self::Json => JsonCodec::decode(bytes),
            Self::MsgPack => MsgPackCodec::decode(bytes),
            Self::Binary => Err(RSocketError::Protocol(
                "no typed codec for a binary MIME type".to_string(),
            )),
        }
    }
}
