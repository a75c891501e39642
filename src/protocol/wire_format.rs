//! Wire format encoding and decoding.
//!
//! Implements the 6-byte frame header:
//! ```text
//! ┌───────────────────────┬────────────┬─────────────┐
//! │ Stream ID             │ Frame type │ Flags       │
//! │ 4 bytes (31 bits) BE  │ 6 bits     │ 10 bits     │
//! └───────────────────────┴────────────┴─────────────┘
//! ```
//!
//! When the METADATA flag is set, the frame body carries a 24-bit metadata
//! length followed by the metadata and then the data segment.
//!
//! All multi-byte integers are Big Endian.

use std::fmt;

use thiserror::Error;

/// Header size in bytes (fixed, exactly 6).
pub const HEADER_SIZE: usize = 6;

/// Size of the 24-bit length fields (TCP frame prefix, metadata length).
pub const U24_SIZE: usize = 3;

/// Largest value a 24-bit length can carry.
pub const MAX_U24: usize = 0x00FF_FFFF;

/// Largest frame that fits a 24-bit TCP length prefix.
pub const DEFAULT_MAX_FRAME_SIZE: usize = MAX_U24;

/// Stream ID used by connection-level frames.
pub const CONNECTION_STREAM_ID: u32 = 0;

/// Highest stream ID (the top bit is reserved).
pub const MAX_STREAM_ID: u32 = 0x7FFF_FFFF;

/// Protocol version advertised in SETUP.
pub const MAJOR_VERSION: u16 = 1;
/// Protocol minor version advertised in SETUP.
pub const MINOR_VERSION: u16 = 0;

/// Flag constants for the protocol.
pub mod flags {
    /// Frame may be ignored if not understood.
    pub const IGNORE: u16 = 0b10_0000_0000;
    /// Metadata segment present.
    pub const METADATA: u16 = 0b01_0000_0000;
    /// More fragments follow.
    pub const FOLLOWS: u16 = 0b00_1000_0000;
    /// KEEPALIVE: the receiver must answer.
    pub const RESPOND: u16 = 0b00_1000_0000;
    /// SETUP: lease will be honoured.
    pub const LEASE: u16 = 0b00_0100_0000;
    /// PAYLOAD / REQUEST_CHANNEL: stream is complete.
    pub const COMPLETE: u16 = 0b00_0100_0000;
    /// PAYLOAD: frame carries a payload.
    pub const NEXT: u16 = 0b00_0010_0000;

    /// Mask of the 10 flag bits.
    pub const MASK: u16 = 0b11_1111_1111;

    /// Check if a specific flag is set.
    #[inline]
    pub fn has_flag(flags: u16, flag: u16) -> bool {
        flags & flag != 0
    }

    /// Flags of a single request/response answer.
    pub const NEXT_COMPLETE: u16 = NEXT | COMPLETE;
}

/// Frame type codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameType {
    Setup = 0x01,
    Lease = 0x02,
    KeepAlive = 0x03,
    RequestResponse = 0x04,
    RequestFnf = 0x05,
    RequestStream = 0x06,
    RequestChannel = 0x07,
    RequestN = 0x08,
    Cancel = 0x09,
    Payload = 0x0A,
    Error = 0x0B,
    MetadataPush = 0x0C,
    Resume = 0x0D,
    ResumeOk = 0x0E,
    Ext = 0x3F,
}

impl FrameType {
    /// Parse a 6-bit frame type code.
    pub fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            0x01 => Self::Setup,
            0x02 => Self::Lease,
            0x03 => Self::KeepAlive,
            0x04 => Self::RequestResponse,
            0x05 => Self::RequestFnf,
            0x06 => Self::RequestStream,
            0x07 => Self::RequestChannel,
            0x08 => Self::RequestN,
            0x09 => Self::Cancel,
            0x0A => Self::Payload,
            0x0B => Self::Error,
            0x0C => Self::MetadataPush,
            0x0D => Self::Resume,
            0x0E => Self::ResumeOk,
            0x3F => Self::Ext,
            _ => return None,
        })
    }

    /// Whether frames of this type always travel on stream 0.
    pub fn is_connection_level(self) -> bool {
        matches!(
            self,
            Self::Setup
                | Self::Lease
                | Self::KeepAlive
                | Self::MetadataPush
                | Self::Resume
                | Self::ResumeOk
        )
    }
}

impl fmt::Display for FrameType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Setup => "SETUP",
            Self::Lease => "LEASE",
            Self::KeepAlive => "KEEPALIVE",
            Self::RequestResponse => "REQUEST_RESPONSE",
            Self::RequestFnf => "REQUEST_FNF",
            Self::RequestStream => "REQUEST_STREAM",
            Self::RequestChannel => "REQUEST_CHANNEL",
            Self::RequestN => "REQUEST_N",
            Self::Cancel => "CANCEL",
            Self::Payload => "PAYLOAD",
            Self::Error => "ERROR",
            Self::MetadataPush => "METADATA_PUSH",
            Self::Resume => "RESUME",
            Self::ResumeOk => "RESUME_OK",
            Self::Ext => "EXT",
        };
        f.write_str(name)
    }
}

/// Errors produced while decoding frames.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// More bytes are needed before the frame can be decoded.
    #[error("incomplete frame: need {needed} more bytes")]
    Incomplete { needed: usize },

    /// The frame type is not one this implementation understands.
    #[error("unknown frame type 0x{code:02x} on stream {stream_id}")]
    UnknownFrameType { code: u8, stream_id: u32, ignorable: bool },

    /// The frame type is known but not supported (resume, lease, ext).
    #[error("unsupported frame type {0}")]
    Unsupported(FrameType),

    /// The frame is structurally invalid.
    #[error("malformed frame: {0}")]
    Malformed(String),

    /// A declared frame length exceeds the configured maximum.
    #[error("frame size {size} exceeds maximum {max}")]
    FrameTooLarge { size: usize, max: usize },
}

impl DecodeError {
    /// Whether the connection can keep going after skipping the frame.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::UnknownFrameType { .. } | Self::Unsupported(FrameType::Ext)
        )
    }
}

/// Decoded frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Stream identifier (0 = connection).
    pub stream_id: u32,
    /// Raw 6-bit frame type code.
    pub frame_type: u8,
    /// 10 flag bits (see `flags` module).
    pub flags: u16,
}

impl Header {
    /// Create a new header.
    pub fn new(stream_id: u32, frame_type: FrameType, flags: u16) -> Self {
        Self {
            stream_id,
            frame_type: frame_type as u8,
            flags: flags & flags::MASK,
        }
    }

    /// Encode header to bytes (Big Endian).
    ///
    /// # Example
    ///
    /// ```
    /// use rsocket_wire::protocol::{flags, FrameType, Header};
    ///
    /// let header = Header::new(1, FrameType::RequestResponse, flags::METADATA);
    /// let bytes = header.encode();
    /// assert_eq!(bytes.len(), 6);
    /// ```
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        self.encode_into(&mut buf);
        buf
    }

    /// Encode header into an existing buffer.
    ///
    /// # Panics
    ///
    /// Panics if buffer is smaller than `HEADER_SIZE` (6 bytes).
    pub fn encode_into(&self, buf: &mut [u8]) {
        debug_assert!(buf.len() >= HEADER_SIZE);
        buf[0..4].copy_from_slice(&(self.stream_id & MAX_STREAM_ID).to_be_bytes());
        let type_and_flags = (u16::from(self.frame_type) << 10) | (self.flags & flags::MASK);
        buf[4..6].copy_from_slice(&type_and_flags.to_be_bytes());
    }

    /// Decode header from bytes (Big Endian).
    ///
    /// Returns `None` if buffer is too short.
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < HEADER_SIZE {
            return None;
        }
        let type_and_flags = u16::from_be_bytes([buf[4], buf[5]]);
        Some(Self {
            stream_id: u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]),
            frame_type: (type_and_flags >> 10) as u8,
            flags: type_and_flags & flags::MASK,
        })
    }

    /// Resolve the frame type code.
    ///
    /// Unknown codes yield a recoverable `UnknownFrameType` error.
    pub fn kind(&self) -> Result<FrameType, DecodeError> {
        FrameType::from_code(self.frame_type).ok_or(DecodeError::UnknownFrameType {
            code: self.frame_type,
            stream_id: self.stream_id,
            ignorable: self.has(flags::IGNORE),
        })
    }

    /// Validate stream placement for protocol compliance.
    ///
    /// Checks:
    /// - Reserved stream ID bit is 0
    /// - Connection-level frames travel on stream 0
    /// - Stream-level frames do not use stream 0 (ERROR may use either)
    pub fn validate(&self) -> Result<FrameType, DecodeError> {
        if self.stream_id > MAX_STREAM_ID {
            return Err(DecodeError::Malformed(
                "reserved stream id bit must be 0".to_string(),
            ));
        }

        let kind = self.kind()?;

        if kind.is_connection_level() && self.stream_id != CONNECTION_STREAM_ID {
            return Err(DecodeError::Malformed(format!(
                "{kind} must use stream 0, got {}",
                self.stream_id
            )));
        }

        if !kind.is_connection_level()
            && kind != FrameType::Error
            && kind != FrameType::Ext
            && self.stream_id == CONNECTION_STREAM_ID
        {
            return Err(DecodeError::Malformed(format!("{kind} must not use stream 0")));
        }

        Ok(kind)
    }

    /// Check a flag bit.
    #[inline]
    pub fn has(&self, flag: u16) -> bool {
        flags::has_flag(self.flags, flag)
    }
}

/// Read a 24-bit big-endian length.
#[inline]
pub fn read_u24(buf: &[u8]) -> usize {
    (usize::from(buf[0]) << 16) | (usize::from(buf[1]) << 8) | usize::from(buf[2])
}

/// Write a 24-bit big-endian length.
///
/// # Panics
///
/// Panics in debug builds if `value` does not fit in 24 bits.
#[inline]
pub fn write_u24(value: usize) -> [u8; U24_SIZE] {
    debug_assert!(value <= MAX_U24);
    [(value >> 16) as u8, (value >> 8) as u8, value as u8]
}
