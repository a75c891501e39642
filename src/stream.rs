//! Request/response stream state machine.
//!
//! ```text
//! Pending ──sent──► AwaitingResponse ──PAYLOAD──► Completed
//!    │                     │ ──ERROR────► Errored
//!    └──────cancel/close───┴────────────► Cancelled
//! ```
//!
//! Exactly one terminal transition happens per stream. Every transition
//! method returns `false` once the stream is terminal, and the frame that
//! triggered it is discarded by the caller.

use std::fmt;

use tokio::sync::oneshot;

use crate::error::{RSocketError, Result};
use crate::payload::Payload;

/// Lifecycle state of a request/response stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamState {
    /// Registered, request frame not yet handed to the writer.
    Pending,
    /// Request frame sent, waiting for the answer.
    AwaitingResponse,
    /// Answer delivered.
    Completed,
    /// Cancelled locally, by timeout, or by connection close.
    Cancelled,
    /// Peer answered with ERROR, or the request could not be sent.
    Errored,
}

impl StreamState {
    /// Whether no further transition is possible.
    #[inline]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Errored)
    }
}

impl fmt::Display for StreamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::AwaitingResponse => "awaiting-response",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Errored => "errored",
        };
        f.write_str(name)
    }
}

/// Receiving end of a request/response stream.
pub(crate) type ResponseReceiver = oneshot::Receiver<Result<Payload>>;

/// Requester-side state of one request/response exchange.
#[derive(Debug)]
pub struct RequestResponseStream {
    stream_id: u32,
    state: StreamState,
    waiter: Option<oneshot::Sender<Result<Payload>>>,
}

impl RequestResponseStream {
    /// Create a stream in `Pending` together with the receiver its outcome is delivered to.
    pub(crate) fn new(stream_id: u32) -> (Self, ResponseReceiver) {
        let (tx, rx) = oneshot::channel();
        let stream = Self {
            stream_id,
            state: StreamState::Pending,
            waiter: Some(tx),
        };
        (stream, rx)
    }

    /// Stream identifier.
    #[inline]
    pub fn stream_id(&self) -> u32 {
        self.stream_id
    }

    /// Current state.
    #[inline]
    pub fn state(&self) -> StreamState {
        self.state
    }

    /// `Pending → AwaitingResponse` once the request frame is queued.
    pub fn on_sent(&mut self) -> bool {
        if self.state != StreamState::Pending {
            return false;
        }
        self.state = StreamState::AwaitingResponse;
        true
    }

    /// Deliver the answer. `→ Completed`.
    ///
    /// Accepted from `Pending` too: the writer task may flush the request and
    /// the answer may arrive before the requester observes the send.
    pub fn on_payload(&mut self, payload: Payload) -> bool {
        self.finish(StreamState::Completed, Ok(payload))
    }

    /// The peer completed without a value. `→ Completed`; the waiter sees
    /// `EmptyResponse`.
    pub fn on_complete_empty(&mut self) -> bool {
        self.finish(StreamState::Completed, Err(RSocketError::EmptyResponse))
    }

    /// Deliver an error. `→ Errored`.
    pub fn on_error(&mut self, error: RSocketError) -> bool {
        self.finish(StreamState::Errored, Err(error))
    }

    /// Cancel the stream; the waiter, if still listening, sees `cause`. `→ Cancelled`.
    pub fn cancel(&mut self, cause: RSocketError) -> bool {
        self.finish(StreamState::Cancelled, Err(cause))
    }

    fn finish(&mut self, next: StreamState, outcome: Result<Payload>) -> bool {
        if self.state.is_terminal() {
            tracing::debug!(
                stream_id = self.stream_id,
                state = %self.state,
                "discarding event for terminal stream"
            );
            return false;
        }
        self.state = next;
        if let Some(waiter) = self.waiter.take() {
            // The requester may have stopped waiting; that is not an error here.
            let _ = waiter.send(outcome);
        }
        true
    }
}
