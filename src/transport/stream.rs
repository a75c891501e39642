//! Length-prefixed frames over any async byte stream.
//!
//! Every frame is preceded by its 24-bit big-endian length. Reads go through
//! a [`FrameBuffer`] so partial reads and several frames per read are both
//! handled; writes use scatter/gather I/O so a batch of frames costs as few
//! syscalls as possible.

use std::collections::VecDeque;
use std::io::IoSlice;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};

use super::{ClientTransport, DuplexConnection, FrameReader, FrameWriter};
use crate::error::{RSocketError, Result};
use crate::handler::BoxFuture;
use crate::protocol::{write_u24, FrameBuffer, DEFAULT_MAX_FRAME_SIZE, U24_SIZE};

/// Read buffer size per syscall.
const READ_CHUNK_SIZE: usize = 16 * 1024;

/// Transport over an already-established byte stream.
///
/// Handy for in-memory pipes (`tokio::io::duplex`) in tests and for
/// streams set up by other code.
pub struct StreamTransport<S> {
    stream: S,
    peer: String,
    max_frame_size: usize,
}

impl<S> StreamTransport<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    /// Wrap a connected stream.
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            peer: "stream".to_string(),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }

    /// Set the peer description used in logs.
    pub fn peer(mut self, peer: impl Into<String>) -> Self {
        self.peer = peer.into();
        self
    }

    /// Reject inbound frames larger than this.
    pub fn max_frame_size(mut self, max: usize) -> Self {
        self.max_frame_size = max;
        self
    }

    /// Split into a frame reader and writer.
    pub fn into_connection(self) -> DuplexConnection {
        let (read, write) = tokio::io::split(self.stream);
        DuplexConnection::new(
            LengthPrefixedReader::<ReadHalf<S>>::with_max_frame(read, self.max_frame_size),
            LengthPrefixedWriter::<WriteHalf<S>>::new(write),
            self.peer,
        )
    }
}

impl<S> ClientTransport for StreamTransport<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    fn connect(self) -> BoxFuture<'static, Result<DuplexConnection>> {
        Box::pin(async move { Ok(self.into_connection()) })
    }
}

/// Reads length-prefixed frames.
pub struct LengthPrefixedReader<R> {
    inner: R,
    buffer: FrameBuffer,
    ready: VecDeque<Bytes>,
    chunk: Vec<u8>,
}

impl<R> LengthPrefixedReader<R>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    /// Reader with the default max frame size.
    pub fn new(inner: R) -> Self {
        Self::with_max_frame(inner, DEFAULT_MAX_FRAME_SIZE)
    }

    /// Reader rejecting frames larger than `max_frame_size`.
    pub fn with_max_frame(inner: R, max_frame_size: usize) -> Self {
        Self {
            inner,
            buffer: FrameBuffer::with_max_frame(max_frame_size),
            ready: VecDeque::new(),
            chunk: vec![0u8; READ_CHUNK_SIZE],
        }
    }

    async fn next_frame(&mut self) -> Result<Option<Bytes>> {
        loop {
            if let Some(frame) = self.ready.pop_front() {
                return Ok(Some(frame));
            }

            let n = self.inner.read(&mut self.chunk).await?;
            if n == 0 {
                if self.buffer.is_empty() {
                    return Ok(None);
                }
                return Err(RSocketError::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    format!("stream closed with {} bytes of a partial frame", self.buffer.len()),
                )));
            }

            self.ready.extend(self.buffer.push(&self.chunk[..n])?);
        }
    }
}

impl<R> FrameReader for LengthPrefixedReader<R>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    fn read_frame(&mut self) -> BoxFuture<'_, Result<Option<Bytes>>> {
        Box::pin(self.next_frame())
    }
}

/// Writes length-prefixed frames.
pub struct LengthPrefixedWriter<W> {
    inner: W,
}

impl<W> LengthPrefixedWriter<W>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(inner: W) -> Self {
        Self { inner }
    }
}

impl<W> FrameWriter for LengthPrefixedWriter<W>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    fn write_frames<'a>(&'a mut self, frames: &'a [Bytes]) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            write_length_prefixed(&mut self.inner, frames).await?;
            Ok(())
        })
    }

    fn close(&mut self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.inner.shutdown().await?;
            Ok(())
        })
    }
}

/// Write a batch of frames, each behind its 24-bit length, using write_vectored.
///
/// Falls back to rebuilding the slice list after a partial write.
pub async fn write_length_prefixed<W>(writer: &mut W, frames: &[Bytes]) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    if frames.is_empty() {
        return Ok(());
    }

    let prefixes: Vec<[u8; U24_SIZE]> = frames.iter().map(|f| write_u24(f.len())).collect();
    let total_size: usize = frames.iter().map(|f| U24_SIZE + f.len()).sum();

    let mut total_written = 0;
    while total_written < total_size {
        let slices = build_remaining_slices(&prefixes, frames, total_written);
        if slices.is_empty() {
            break;
        }

        let written = writer.write_vectored(&slices).await?;
        if written == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "write_vectored returned 0",
            ));
        }
        total_written += written;
    }

    writer.flush().await
}

/// Build the IoSlice list for everything after the first `skip_bytes` bytes.
fn build_remaining_slices<'a>(
    prefixes: &'a [[u8; U24_SIZE]],
    frames: &'a [Bytes],
    skip_bytes: usize,
) -> Vec<IoSlice<'a>> {
    let mut slices = Vec::with_capacity(frames.len() * 2);
    let mut offset = 0;

    for (prefix, frame) in prefixes.iter().zip(frames) {
        let prefix_end = offset + U24_SIZE;
        if skip_bytes < prefix_end {
            let start = skip_bytes.saturating_sub(offset);
            slices.push(IoSlice::new(&prefix[start..]));
        }
        offset = prefix_end;

        if !frame.is_empty() {
            let frame_end = offset + frame.len();
            if skip_bytes < frame_end {
                let start = skip_bytes.saturating_sub(offset);
                slices.push(IoSlice::new(&frame[start..]));
            }
            offset = frame_end;
        }
    }

    slices
}
