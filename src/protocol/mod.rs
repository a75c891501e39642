//! Protocol module - wire format, framing, and frame types.
//!
//! This module implements the binary protocol:
//! - 6-byte header encoding/decoding
//! - Typed frames with encode/decode
//! - Frame buffer for accumulating partial reads on byte streams
//! - ERROR frame codes

mod error_code;
mod frame;
mod frame_buffer;
mod wire_format;

pub use error_code::ErrorCode;
pub use frame::{Frame, FrameBody};
pub use frame_buffer::FrameBuffer;
pub use wire_format::{
    flags, read_u24, write_u24, DecodeError, FrameType, Header, CONNECTION_STREAM_ID,
    DEFAULT_MAX_FRAME_SIZE, HEADER_SIZE, MAJOR_VERSION, MAX_STREAM_ID, MAX_U24, MINOR_VERSION,
    U24_SIZE,
};
