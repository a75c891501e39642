//! Dedicated writer task for outbound frames.
//!
//! The connection never writes to the transport directly. Every producer
//! (request callers, the read loop answering keepalives, handler tasks)
//! sends encoded frames through a cloneable [`WriterHandle`] into one task
//! that owns the [`FrameWriter`].
//!
//! ```text
//! Requester ──┐
//! Read loop ──┼─► mpsc::Sender<Command> ─► Writer Task ─► FrameWriter
//! Handlers  ──┘
//! ```
//!
//! Frames already queued are written in order, batched up to
//! `MAX_BATCH_SIZE` per transport write. Backpressure is tracked by a
//! [`BackpressureController`] shared by all handles.

use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::backpressure::{BackpressureController, BackpressureGuard};
use crate::error::{RSocketError, Result};
use crate::protocol::{Frame, FrameType, DEFAULT_MAX_FRAME_SIZE};
use crate::transport::FrameWriter;

/// Default maximum pending frames before backpressure kicks in.
pub const DEFAULT_MAX_PENDING_FRAMES: usize = 1024;

/// Default channel capacity.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Default backpressure timeout.
pub const DEFAULT_BACKPRESSURE_TIMEOUT: Duration = Duration::from_secs(5);

/// Maximum frames to batch in a single write operation.
const MAX_BATCH_SIZE: usize = 64;

/// An encoded frame ready to be written.
#[derive(Debug, Clone)]
pub struct OutboundFrame {
    pub stream_id: u32,
    pub frame_type: FrameType,
    /// Encoded frame, without transport framing.
    pub bytes: Bytes,
}

impl OutboundFrame {
    /// Encode a frame.
    #[inline]
    pub fn encode(frame: &Frame) -> Self {
        Self {
            stream_id: frame.stream_id,
            frame_type: frame.frame_type(),
            bytes: frame.encode(),
        }
    }

    /// Encoded size.
    #[inline]
    pub fn size(&self) -> usize {
        self.bytes.len()
    }
}

enum Command {
    Frame(OutboundFrame),
    /// Flush what is queued ahead of this, close the transport and stop.
    Shutdown,
}

/// Configuration for the writer task.
#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// Maximum pending frames before backpressure kicks in.
    pub max_pending_frames: usize,
    /// Channel capacity for the frame queue.
    pub channel_capacity: usize,
    /// Timeout when waiting for backpressure to clear.
    pub backpressure_timeout: Duration,
    /// Largest encoded frame that may be sent.
    pub max_frame_size: usize,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            max_pending_frames: DEFAULT_MAX_PENDING_FRAMES,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            backpressure_timeout: DEFAULT_BACKPRESSURE_TIMEOUT,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

/// Handle for sending frames to the writer task.
///
/// Cheap to clone; every clone feeds the same task.
#[derive(Clone)]
pub struct WriterHandle {
    tx: mpsc::Sender<Command>,
    backpressure: BackpressureController,
    max_frame_size: usize,
}

impl WriterHandle {
    fn prepare(&self, frame: &Frame) -> Result<OutboundFrame> {
        if self.tx.is_closed() {
            return Err(RSocketError::TransportClosed);
        }
        let out = OutboundFrame::encode(frame);
        if out.size() > self.max_frame_size {
            return Err(RSocketError::Protocol(format!(
                "{} frame of {} bytes exceeds max frame size {}",
                out.frame_type,
                out.size(),
                self.max_frame_size
            )));
        }
        Ok(out)
    }

    /// Queue a frame, waiting while backpressure is active.
    ///
    /// # Errors
    ///
    /// `TransportClosed` once the writer task stopped, `BackpressureTimeout`
    /// if the queue stays full, `Protocol` if the frame is too large.
    pub async fn send(&self, frame: &Frame) -> Result<()> {
        let out = self.prepare(frame)?;
        self.backpressure.reserve().await?;
        let guard = BackpressureGuard::new(self.backpressure.clone());

        self.tx
            .send(Command::Frame(out))
            .await
            .map_err(|_| RSocketError::TransportClosed)?;
        guard.disarm();
        Ok(())
    }

    /// Queue a frame without waiting.
    ///
    /// Used where awaiting is impossible (drop handlers) or undesirable
    /// (best-effort CANCEL after a timeout).
    ///
    /// # Errors
    ///
    /// Same as [`send`](Self::send), failing immediately instead of waiting.
    pub fn try_send(&self, frame: &Frame) -> Result<()> {
        let out = self.prepare(frame)?;
        self.backpressure.try_reserve()?;
        let guard = BackpressureGuard::new(self.backpressure.clone());

        self.tx.try_send(Command::Frame(out)).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => RSocketError::BackpressureTimeout,
            mpsc::error::TrySendError::Closed(_) => RSocketError::TransportClosed,
        })?;
        guard.disarm();
        Ok(())
    }

    /// Ask the task to write everything queued so far, then close the transport.
    pub async fn shutdown(&self) {
        let _ = self.tx.send(Command::Shutdown).await;
    }

    /// Whether the writer task has stopped.
    #[inline]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Check if backpressure is currently active.
    #[inline]
    pub fn is_backpressure_active(&self) -> bool {
        self.backpressure.is_active()
    }

    /// Get current pending frame count.
    #[inline]
    pub fn pending_count(&self) -> usize {
        self.backpressure.pending_count()
    }
}

/// Spawn the writer task and return a handle for sending frames.
///
/// The task ends after a [`WriterHandle::shutdown`], when every handle is
/// dropped, or on the first write error, which the `JoinHandle` returns.
pub fn spawn_writer_task(
    writer: Box<dyn FrameWriter>,
    config: WriterConfig,
) -> (WriterHandle, JoinHandle<Result<()>>) {
    let (tx, rx) = mpsc::channel(config.channel_capacity.max(1));
    let backpressure =
        BackpressureController::new(config.max_pending_frames, config.backpressure_timeout);

    let handle = WriterHandle {
        tx,
        backpressure: backpressure.clone(),
        max_frame_size: config.max_frame_size,
    };
    let task = tokio::spawn(writer_loop(rx, writer, backpressure));

    (handle, task)
}

async fn writer_loop(
    mut rx: mpsc::Receiver<Command>,
    mut writer: Box<dyn FrameWriter>,
    backpressure: BackpressureController,
) -> Result<()> {
    let mut batch: Vec<Bytes> = Vec::with_capacity(MAX_BATCH_SIZE);

    loop {
        let first = match rx.recv().await {
            Some(Command::Frame(frame)) => frame,
            Some(Command::Shutdown) | None => break,
        };

        batch.clear();
        batch.push(first.bytes);

        let mut shutdown = false;
        while batch.len() < MAX_BATCH_SIZE {
            match rx.try_recv() {
                Ok(Command::Frame(frame)) => batch.push(frame.bytes),
                Ok(Command::Shutdown) => {
                    shutdown = true;
                    break;
                }
                Err(_) => break,
            }
        }

        let result = writer.write_frames(&batch).await;
        backpressure.release_many(batch.len());
        if let Err(e) = result {
            tracing::debug!(error = %e, "writer task stopping on write error");
            return Err(e);
        }
        tracing::trace!(frames = batch.len(), "wrote batch");

        if shutdown {
            break;
        }
    }

    rx.close();
    if let Err(e) = writer.close().await {
        tracing::debug!(error = %e, "error closing transport");
    }
    Ok(())
}
