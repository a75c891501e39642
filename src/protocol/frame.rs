//! Frame type with encode/decode.
//!
//! A [`Frame`] is a stream ID, the free flag bits and a typed body. The
//! METADATA flag (and LEASE on SETUP) are derived from the body when
//! encoding and folded back into it when decoding, so
//! `Frame::decode(frame.encode()) == Ok(frame)` holds for every frame.
//!
//! # Example
//!
//! ```
//! use rsocket_wire::protocol::Frame;
//! use rsocket_wire::Payload;
//!
//! let frame = Frame::request_response(1, Payload::from_str("data", "metadata"));
//! let bytes = frame.encode();
//! assert_eq!(Frame::decode(bytes).unwrap(), frame);
//! ```

use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};

use super::error_code::ErrorCode;
use super::wire_format::{
    flags, read_u24, write_u24, DecodeError, FrameType, Header, CONNECTION_STREAM_ID,
    HEADER_SIZE, MAX_STREAM_ID, MAX_U24, U24_SIZE,
};
use crate::payload::{Payload, SetupPayload};

/// Typed frame body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameBody {
    Setup(SetupPayload),
    KeepAlive { last_received_position: u64, data: Bytes },
    RequestResponse(Payload),
    RequestFnf(Payload),
    RequestStream { initial_request_n: u32, payload: Payload },
    RequestChannel { initial_request_n: u32, payload: Payload },
    RequestN(u32),
    Cancel,
    Payload(Payload),
    Error { code: ErrorCode, message: String },
    MetadataPush(Bytes),
}

impl FrameBody {
    /// Frame type code for this body.
    pub fn frame_type(&self) -> FrameType {
        match self {
            Self::Setup(_) => FrameType::Setup,
            Self::KeepAlive { .. } => FrameType::KeepAlive,
            Self::RequestResponse(_) => FrameType::RequestResponse,
            Self::RequestFnf(_) => FrameType::RequestFnf,
            Self::RequestStream { .. } => FrameType::RequestStream,
            Self::RequestChannel { .. } => FrameType::RequestChannel,
            Self::RequestN(_) => FrameType::RequestN,
            Self::Cancel => FrameType::Cancel,
            Self::Payload(_) => FrameType::Payload,
            Self::Error { .. } => FrameType::Error,
            Self::MetadataPush(_) => FrameType::MetadataPush,
        }
    }
}

/// A complete protocol frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Stream identifier (0 = connection).
    pub stream_id: u32,
    /// Flag bits other than METADATA (and LEASE on SETUP).
    pub flags: u16,
    /// Typed body.
    pub body: FrameBody,
}

impl Frame {
    /// Create a frame, dropping derived flag bits.
    ///
    /// The stream id is masked to 31 bits. On SETUP, LEASE comes from the
    /// payload, RESUME_ENABLE (the FOLLOWS bit) is never sent and timings are
    /// cut to whole milliseconds.
    pub fn new(stream_id: u32, flags: u16, body: FrameBody) -> Self {
        let mut free = flags & flags::MASK & !flags::METADATA;
        let body = match body {
            FrameBody::Setup(setup) => {
                free &= !(flags::LEASE | flags::FOLLOWS);
                FrameBody::Setup(setup.normalized())
            }
            other => other,
        };
        Self {
            stream_id: stream_id & MAX_STREAM_ID,
            flags: free,
            body,
        }
    }

    /// SETUP frame.
    pub fn setup(setup: SetupPayload) -> Self {
        Self::new(CONNECTION_STREAM_ID, 0, FrameBody::Setup(setup))
    }

    /// KEEPALIVE frame; `respond` asks the peer to echo it.
    pub fn keepalive(respond: bool, last_received_position: u64, data: Bytes) -> Self {
        let flags = if respond { flags::RESPOND } else { 0 };
        Self::new(
            CONNECTION_STREAM_ID,
            flags,
            FrameBody::KeepAlive {
                last_received_position,
                data,
            },
        )
    }

    /// REQUEST_RESPONSE frame.
    pub fn request_response(stream_id: u32, payload: Payload) -> Self {
        Self::new(stream_id, 0, FrameBody::RequestResponse(payload))
    }

    /// REQUEST_FNF frame.
    pub fn request_fnf(stream_id: u32, payload: Payload) -> Self {
        Self::new(stream_id, 0, FrameBody::RequestFnf(payload))
    }

    /// REQUEST_STREAM frame.
    pub fn request_stream(stream_id: u32, initial_request_n: u32, payload: Payload) -> Self {
        Self::new(
            stream_id,
            0,
            FrameBody::RequestStream {
                initial_request_n,
                payload,
            },
        )
    }

    /// REQUEST_CHANNEL frame; `complete` marks the requester's input as done.
    pub fn request_channel(
        stream_id: u32,
        initial_request_n: u32,
        payload: Payload,
        complete: bool,
    ) -> Self {
        let flags = if complete { flags::COMPLETE } else { 0 };
        Self::new(
            stream_id,
            flags,
            FrameBody::RequestChannel {
                initial_request_n,
                payload,
            },
        )
    }

    /// REQUEST_N frame.
    pub fn request_n(stream_id: u32, n: u32) -> Self {
        Self::new(stream_id, 0, FrameBody::RequestN(n))
    }

    /// CANCEL frame.
    pub fn cancel(stream_id: u32) -> Self {
        Self::new(stream_id, 0, FrameBody::Cancel)
    }

    /// PAYLOAD frame with explicit NEXT/COMPLETE flags.
    pub fn payload(stream_id: u32, payload: Payload, flags: u16) -> Self {
        Self::new(stream_id, flags, FrameBody::Payload(payload))
    }

    /// PAYLOAD(NEXT) frame.
    pub fn next(stream_id: u32, payload: Payload) -> Self {
        Self::payload(stream_id, payload, flags::NEXT)
    }

    /// PAYLOAD(NEXT|COMPLETE) frame, the single answer of a request/response.
    pub fn next_complete(stream_id: u32, payload: Payload) -> Self {
        Self::payload(stream_id, payload, flags::NEXT_COMPLETE)
    }

    /// PAYLOAD(COMPLETE) frame with no data.
    pub fn complete(stream_id: u32) -> Self {
        Self::payload(stream_id, Payload::default(), flags::COMPLETE)
    }

    /// ERROR frame.
    pub fn error(stream_id: u32, code: ErrorCode, message: impl Into<String>) -> Self {
        Self::new(
            stream_id,
            0,
            FrameBody::Error {
                code,
                message: message.into(),
            },
        )
    }

    /// METADATA_PUSH frame.
    pub fn metadata_push(metadata: Bytes) -> Self {
        Self::new(CONNECTION_STREAM_ID, 0, FrameBody::MetadataPush(metadata))
    }

    /// Get the frame type.
    #[inline]
    pub fn frame_type(&self) -> FrameType {
        self.body.frame_type()
    }

    /// Check a flag bit.
    #[inline]
    pub fn has(&self, flag: u16) -> bool {
        flags::has_flag(self.flags, flag)
    }

    /// Check if this PAYLOAD/REQUEST_CHANNEL marks completion.
    #[inline]
    pub fn is_complete(&self) -> bool {
        self.has(flags::COMPLETE)
    }

    /// Check if this PAYLOAD carries a value.
    #[inline]
    pub fn is_next(&self) -> bool {
        self.has(flags::NEXT)
    }

    /// Check if this KEEPALIVE expects an answer.
    #[inline]
    pub fn is_respond(&self) -> bool {
        matches!(self.body, FrameBody::KeepAlive { .. }) && self.has(flags::RESPOND)
    }

    /// The payload carried by request and PAYLOAD frames.
    pub fn payload_ref(&self) -> Option<&Payload> {
        match &self.body {
            FrameBody::RequestResponse(p)
            | FrameBody::RequestFnf(p)
            | FrameBody::Payload(p)
            | FrameBody::RequestStream { payload: p, .. }
            | FrameBody::RequestChannel { payload: p, .. } => Some(p),
            _ => None,
        }
    }

    /// Encode the frame (header + body), without any transport length prefix.
    pub fn encode(&self) -> Bytes {
        let mut frame_flags = self.flags;
        if self.carries_metadata() {
            frame_flags |= flags::METADATA;
        }
        if let FrameBody::Setup(setup) = &self.body {
            if setup.lease {
                frame_flags |= flags::LEASE;
            }
        }

        let header = Header::new(self.stream_id, self.frame_type(), frame_flags);
        let mut buf = BytesMut::with_capacity(HEADER_SIZE + self.body_len_hint());
        buf.put_slice(&header.encode());

        match &self.body {
            FrameBody::Setup(setup) => {
                buf.put_u16(setup.major_version);
                buf.put_u16(setup.minor_version);
                buf.put_u32(duration_millis(setup.keepalive_interval));
                buf.put_u32(duration_millis(setup.max_lifetime));
                put_mime(&mut buf, &setup.metadata_mime_type);
                put_mime(&mut buf, &setup.data_mime_type);
                put_payload(&mut buf, &setup.payload);
            }
            FrameBody::KeepAlive {
                last_received_position,
                data,
            } => {
                buf.put_u64(*last_received_position);
                buf.put_slice(data);
            }
            FrameBody::RequestResponse(payload)
            | FrameBody::RequestFnf(payload)
            | FrameBody::Payload(payload) => put_payload(&mut buf, payload),
            FrameBody::RequestStream {
                initial_request_n,
                payload,
            }
            | FrameBody::RequestChannel {
                initial_request_n,
                payload,
            } => {
                buf.put_u32(*initial_request_n);
                put_payload(&mut buf, payload);
            }
            FrameBody::RequestN(n) => buf.put_u32(*n),
            FrameBody::Cancel => {}
            FrameBody::Error { code, message } => {
                buf.put_u32(code.0);
                buf.put_slice(message.as_bytes());
            }
            FrameBody::MetadataPush(metadata) => buf.put_slice(metadata),
        }

        buf.freeze()
    }

    /// Decode one complete frame.
    ///
    /// `bytes` must hold exactly one frame (transport framing already removed).
    /// Truncated input yields [`DecodeError::Incomplete`]; an unassigned frame
    /// type yields the recoverable [`DecodeError::UnknownFrameType`].
    pub fn decode(bytes: Bytes) -> Result<Self, DecodeError> {
        let header = Header::decode(&bytes).ok_or_else(|| DecodeError::Incomplete {
            needed: HEADER_SIZE - bytes.len(),
        })?;
        let kind = header.validate()?;
        let mut body = BodyReader::new(bytes.slice(HEADER_SIZE..));
        let has_metadata = header.has(flags::METADATA);

        let body = match kind {
            FrameType::Setup => {
                if header.has(flags::FOLLOWS) {
                    // RESUME_ENABLE shares the bit; resumption is not supported.
                    return Err(DecodeError::Unsupported(FrameType::Resume));
                }
                let major_version = body.u16()?;
                let minor_version = body.u16()?;
                let keepalive_interval = Duration::from_millis(u64::from(body.u32()?));
                let max_lifetime = Duration::from_millis(u64::from(body.u32()?));
                let metadata_mime_type = body.mime()?;
                let data_mime_type = body.mime()?;
                let payload = body.payload(has_metadata)?;
                FrameBody::Setup(SetupPayload {
                    major_version,
                    minor_version,
                    keepalive_interval,
                    max_lifetime,
                    metadata_mime_type,
                    data_mime_type,
                    lease: header.has(flags::LEASE),
                    payload,
                })
            }
            FrameType::KeepAlive => FrameBody::KeepAlive {
                last_received_position: body.u64()?,
                data: body.rest(),
            },
            FrameType::RequestResponse => FrameBody::RequestResponse(body.payload(has_metadata)?),
            FrameType::RequestFnf => FrameBody::RequestFnf(body.payload(has_metadata)?),
            FrameType::RequestStream => FrameBody::RequestStream {
                initial_request_n: body.u32()?,
                payload: body.payload(has_metadata)?,
            },
            FrameType::RequestChannel => FrameBody::RequestChannel {
                initial_request_n: body.u32()?,
                payload: body.payload(has_metadata)?,
            },
            FrameType::RequestN => FrameBody::RequestN(body.u32()?),
            FrameType::Cancel => FrameBody::Cancel,
            FrameType::Payload => FrameBody::Payload(body.payload(has_metadata)?),
            FrameType::Error => {
                let code = ErrorCode(body.u32()?);
                let message = String::from_utf8_lossy(&body.rest()).into_owned();
                FrameBody::Error { code, message }
            }
            FrameType::MetadataPush => {
                if !has_metadata {
                    return Err(DecodeError::Malformed(
                        "METADATA_PUSH requires the METADATA flag".to_string(),
                    ));
                }
                FrameBody::MetadataPush(body.rest())
            }
            other => return Err(DecodeError::Unsupported(other)),
        };

        Ok(Self::new(header.stream_id, header.flags, body))
    }

    fn carries_metadata(&self) -> bool {
        match &self.body {
            FrameBody::Setup(setup) => setup.payload.has_metadata(),
            FrameBody::MetadataPush(_) => true,
            _ => self.payload_ref().is_some_and(Payload::has_metadata),
        }
    }

    fn body_len_hint(&self) -> usize {
        match &self.body {
            FrameBody::Setup(setup) => {
                14 + setup.metadata_mime_type.len()
                    + setup.data_mime_type.len()
                    + U24_SIZE
                    + setup.payload.len()
            }
            FrameBody::KeepAlive { data, .. } => 8 + data.len(),
            FrameBody::Error { message, .. } => 4 + message.len(),
            FrameBody::MetadataPush(metadata) => metadata.len(),
            _ => 4 + U24_SIZE + self.payload_ref().map_or(0, Payload::len),
        }
    }
}

fn duration_millis(duration: Duration) -> u32 {
    u32::try_from(duration.as_millis()).unwrap_or(u32::MAX)
}

fn put_mime(buf: &mut BytesMut, mime: &str) {
    // MIME types are ASCII and capped at 255 bytes by the u8 length.
    let bytes = &mime.as_bytes()[..mime.len().min(usize::from(u8::MAX))];
    buf.put_u8(bytes.len() as u8);
    buf.put_slice(bytes);
}

fn put_payload(buf: &mut BytesMut, payload: &Payload) {
    if let Some(metadata) = &payload.metadata {
        buf.put_slice(&write_u24(metadata.len().min(MAX_U24)));
        buf.put_slice(metadata);
    }
    buf.put_slice(&payload.data);
}

/// Cursor over a frame body that reports truncation as `Incomplete`.
struct BodyReader {
    buf: Bytes,
}

impl BodyReader {
    fn new(buf: Bytes) -> Self {
        Self { buf }
    }

    fn take(&mut self, n: usize) -> Result<Bytes, DecodeError> {
        if self.buf.len() < n {
            return Err(DecodeError::Incomplete {
                needed: n - self.buf.len(),
            });
        }
        Ok(self.buf.split_to(n))
    }

    fn u16(&mut self) -> Result<u16, DecodeError> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32, DecodeError> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self) -> Result<u64, DecodeError> {
        let b = self.take(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&b);
        Ok(u64::from_be_bytes(raw))
    }

    fn mime(&mut self) -> Result<String, DecodeError> {
        let len = self.take(1)?[0] as usize;
        let raw = self.take(len)?;
        String::from_utf8(raw.to_vec())
            .map_err(|_| DecodeError::Malformed("MIME type is not UTF-8".to_string()))
    }

    fn payload(&mut self, has_metadata: bool) -> Result<Payload, DecodeError> {
        let metadata = if has_metadata {
            let len = read_u24(&self.take(U24_SIZE)?);
            Some(self.take(len)?)
        } else {
            None
        };
        Ok(Payload {
            data: self.rest(),
            metadata,
        })
    }

    fn rest(&mut self) -> Bytes {
        std::mem::take(&mut self.buf)
    }
}
