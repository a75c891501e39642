//! MsgPack codec using `rmp-serde`.
//!
//! Always uses `to_vec_named`, so structs travel as maps with field names
//! rather than positional arrays. Peers in other languages decode maps
//! without knowing the Rust field order.
//!
//! # Example
//!
//! ```
//! use rsocket_wire::codec::MsgPackCodec;
//! use serde::{Serialize, Deserialize};
//!
//! #[derive(Serialize, Deserialize, PartialEq, Debug)]
//! struct Message {
//!     id: u32,
//!     content: String,
//! }
//!
//! let msg = Message { id: 42, content: "hello".to_string() };
//! let encoded = MsgPackCodec::encode(&msg).unwrap();
//! let decoded: Message = MsgPackCodec::decode(&encoded).unwrap();
//! assert_eq!(decoded, msg);
//! ```

use bytes::Bytes;

use crate::error::Result;

/// MIME type served by this codec.
pub const MSGPACK_MIME_TYPE: &str = "application/x-msgpack";

/// MessagePack codec for structured payload data.
pub struct MsgPackCodec;

impl MsgPackCodec {
    /// Encode a value to MsgPack bytes (struct-as-map).
    ///
    /// # Errors
    ///
    /// Returns error if the value cannot be serialized.
    #[inline]
    pub fn encode<T: serde::Serialize>(value: &T) -> Result<Bytes> {
        Ok(Bytes::from(rmp_serde::to_vec_named(value)?))
    }

    /// Decode MsgPack bytes to a value.
    ///
    /// # Errors
    ///
    /// Returns error if the bytes cannot be deserialized to type T.
    #[inline]
    pub fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    struct RouteMetadata {
        route: String,
        tenant: Option<u32>,
        tags: Vec<String>,
    }

    fn sample() -> RouteMetadata {
        RouteMetadata {
            route: "events.latest".to_string(),
            tenant: Some(7),
            tags: vec!["a".to_string(), "b".to_string()],
        }
    }

    #[test]
    fn test_struct_survives_encoding() {
        let encoded = MsgPackCodec::encode(&sample()).unwrap();
        let decoded: RouteMetadata = MsgPackCodec::decode(&encoded).unwrap();
        assert_eq!(decoded, sample());
    }

    #[test]
    fn test_structs_travel_as_maps() {
        let encoded = MsgPackCodec::encode(&sample()).unwrap();
        // fixmap with 3 entries; a positional array would start with 0x93.
        assert_eq!(encoded[0], 0x83);
    }

    #[test]
    fn test_missing_value_is_nil() {
        let encoded = MsgPackCodec::encode(&None::<u32>).unwrap();
        assert_eq!(&encoded[..], &[0xc0]);
    }

    #[test]
    fn test_garbage_is_a_decode_error() {
        let result: Result<RouteMetadata> = MsgPackCodec::decode(b"\xc1 not msgpack");
        assert!(matches!(result, Err(crate::RSocketError::MsgPackDecode(_))));
    }
}
