//! Frame buffer for accumulating partial reads.
//!
//! Byte-stream transports (TCP, in-memory pipes) prefix every frame with a
//! 24-bit big-endian length. Uses `bytes::BytesMut` for zero-copy buffer
//! management and a state machine for fragmented frames:
//! - `WaitingForLength`: Need at least 3 bytes
//! - `WaitingForFrame`: Length parsed, need N more frame bytes
//!
//! # Example
//!
//! ```
//! use rsocket_wire::protocol::{Frame, FrameBuffer};
//!
//! let mut buffer = FrameBuffer::new();
//! let wire = FrameBuffer::prefix(&Frame::cancel(1).encode());
//!
//! let frames = buffer.push(&wire).unwrap();
//! assert_eq!(frames.len(), 1);
//! assert_eq!(Frame::decode(frames[0].clone()).unwrap(), Frame::cancel(1));
//! ```

use bytes::{Bytes, BytesMut};

use super::wire_format::{read_u24, write_u24, DecodeError, DEFAULT_MAX_FRAME_SIZE, U24_SIZE};

/// State machine for frame parsing.
#[derive(Debug, Clone)]
enum State {
    /// Waiting for the 3-byte length prefix.
    WaitingForLength,
    /// Length parsed, waiting for the frame bytes.
    WaitingForFrame { remaining: usize },
}

/// Buffer for accumulating incoming bytes and extracting complete frames.
///
/// Yields the raw bytes of each frame with the length prefix removed; pass
/// them to [`Frame::decode`](super::Frame::decode).
pub struct FrameBuffer {
    /// Accumulated bytes from socket reads.
    buffer: BytesMut,
    /// Current parsing state.
    state: State,
    /// Maximum allowed frame size.
    max_frame_size: usize,
}

impl FrameBuffer {
    /// Create a new frame buffer with default settings.
    ///
    /// Default capacity: 64KB, max frame: 16MB - 1.
    pub fn new() -> Self {
        Self::with_capacity_and_max_frame(64 * 1024, DEFAULT_MAX_FRAME_SIZE)
    }

    /// Create a new frame buffer with a custom max frame size.
    pub fn with_max_frame(max_frame_size: usize) -> Self {
        Self::with_capacity_and_max_frame(64 * 1024, max_frame_size)
    }

    /// Create a new frame buffer with custom capacity and max frame size.
    pub fn with_capacity_and_max_frame(capacity: usize, max_frame_size: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(capacity),
            state: State::WaitingForLength,
            max_frame_size: max_frame_size.min(DEFAULT_MAX_FRAME_SIZE),
        }
    }

    /// Encode the 24-bit length prefix for a frame.
    pub fn length_prefix(frame_len: usize) -> [u8; U24_SIZE] {
        write_u24(frame_len)
    }

    /// Prefix an encoded frame with its length (one contiguous buffer).
    pub fn prefix(frame: &[u8]) -> Vec<u8> {
        let mut buf = Vec::with_capacity(U24_SIZE + frame.len());
        buf.extend_from_slice(&write_u24(frame.len()));
        buf.extend_from_slice(frame);
        buf
    }

    /// Push data into the buffer and extract all complete frames.
    ///
    /// If data is fragmented, partial data is buffered internally for the
    /// next push.
    ///
    /// # Errors
    ///
    /// Returns `FrameTooLarge` if a declared length exceeds the maximum.
    pub fn push(&mut self, data: &[u8]) -> Result<Vec<Bytes>, DecodeError> {
        self.buffer.extend_from_slice(data);

        let mut frames = Vec::new();
        while let Some(frame) = self.try_extract_one()? {
            frames.push(frame);
        }

        Ok(frames)
    }

    /// Try to extract a single frame from the buffer.
    fn try_extract_one(&mut self) -> Result<Option<Bytes>, DecodeError> {
        loop {
            match self.state {
                State::WaitingForLength => {
                    if self.buffer.len() < U24_SIZE {
                        return Ok(None);
                    }

                    let length = read_u24(&self.buffer[..U24_SIZE]);
                    if length > self.max_frame_size {
                        return Err(DecodeError::FrameTooLarge {
                            size: length,
                            max: self.max_frame_size,
                        });
                    }

                    let _ = self.buffer.split_to(U24_SIZE);
                    self.state = State::WaitingForFrame { remaining: length };
                }

                State::WaitingForFrame { remaining } => {
                    if self.buffer.len() < remaining {
                        return Ok(None);
                    }

                    let frame = self.buffer.split_to(remaining).freeze();
                    self.state = State::WaitingForLength;
                    return Ok(Some(frame));
                }
            }
        }
    }

    /// Bytes still needed to finish the frame in progress.
    pub fn needed(&self) -> usize {
        match self.state {
            State::WaitingForLength => U24_SIZE.saturating_sub(self.buffer.len()),
            State::WaitingForFrame { remaining } => remaining.saturating_sub(self.buffer.len()),
        }
    }

    /// Get the number of buffered bytes.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Clear the buffer and reset state.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.state = State::WaitingForLength;
    }

    #[cfg(test)]
    fn state_name(&self) -> &'static str {
        match &self.state {
            State::WaitingForLength => "WaitingForLength",
            State::WaitingForFrame { .. } => "WaitingForFrame",
        }
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}
