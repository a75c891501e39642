//! Issuing requests on a live connection.
//!
//! [`Requester`] is a cheap, cloneable handle. Clients get one on connect;
//! server acceptors get one per connection for server-initiated requests.
//!
//! # Example
//!
//! ```ignore
//! let requester = client.requester();
//! let answer = requester
//!     .request_response_timeout(Payload::from_str("data", "metadata"), Duration::from_secs(1))
//!     .await?;
//! ```

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use futures_util::Stream;
use tokio::sync::mpsc;

use crate::codec::MimeCodec;
use crate::connection::Connection;
use crate::error::{RSocketError, Result};
use crate::payload::Payload;
use crate::protocol::Frame;
use crate::registry::StreamRecord;
use crate::stream::{RequestResponseStream, ResponseReceiver, StreamState};

/// REQUEST_N value meaning "as many as you have".
const UNBOUNDED_REQUEST_N: u32 = 0x7FFF_FFFF;

/// Handle for issuing requests to the peer.
#[derive(Clone)]
pub struct Requester {
    conn: Arc<Connection>,
}

impl Requester {
    pub(crate) fn new(conn: Arc<Connection>) -> Self {
        Self { conn }
    }

    /// Request/response using the configured default deadline, if any.
    pub async fn request_response(&self, payload: Payload) -> Result<Payload> {
        let mut pending = self.start_request_response(payload).await?;
        match self.conn.config().request_timeout {
            Some(deadline) => pending.response_timeout(deadline).await,
            None => pending.response().await,
        }
    }

    /// Request/response failing with `Timeout` once `deadline` elapses.
    ///
    /// On timeout the stream is cancelled and a best-effort CANCEL is sent.
    pub async fn request_response_timeout(
        &self,
        payload: Payload,
        deadline: Duration,
    ) -> Result<Payload> {
        self.start_request_response(payload)
            .await?
            .response_timeout(deadline)
            .await
    }

    /// Send a REQUEST_RESPONSE and return a handle to its outcome.
    ///
    /// # Errors
    ///
    /// `TransportClosed` if the connection is closed; send errors from the
    /// writer, in which case the stream ends `Errored`.
    pub async fn start_request_response(&self, payload: Payload) -> Result<PendingResponse> {
        let mut receiver = None;
        let stream_id = self.conn.registry().allocate(|id| {
            let (stream, rx) = RequestResponseStream::new(id);
            receiver = Some(rx);
            StreamRecord::RequestResponse(stream)
        })?;

        let pending = PendingResponse {
            stream_id,
            receiver,
            conn: self.conn.clone(),
        };

        let sent = self
            .conn
            .writer()
            .send(&Frame::request_response(stream_id, payload))
            .await;

        match sent {
            Ok(()) => {
                pending.with_stream(|stream| stream.on_sent());
                tracing::debug!(stream_id, "request sent");
                Ok(pending)
            }
            Err(e) => {
                pending.with_stream(|stream| {
                    stream.on_error(RSocketError::Protocol(format!("request not sent: {e}")))
                });
                Err(e)
            }
        }
    }

    /// Send a REQUEST_FNF. Nothing comes back.
    pub async fn fire_and_forget(&self, payload: Payload) -> Result<()> {
        let stream_id = self.conn.registry().allocate_id()?;
        self.conn
            .writer()
            .send(&Frame::request_fnf(stream_id, payload))
            .await
    }

    /// Send connection-level metadata.
    pub async fn metadata_push(&self, metadata: impl Into<Bytes>) -> Result<()> {
        if self.conn.is_closed() {
            return Err(RSocketError::TransportClosed);
        }
        self.conn
            .writer()
            .send(&Frame::metadata_push(metadata.into()))
            .await
    }

    /// Send a REQUEST_STREAM and receive its items.
    ///
    /// Requests an unbounded number of items; dropping the returned stream
    /// before it ends sends CANCEL.
    pub async fn request_stream(&self, payload: Payload) -> Result<PayloadStream> {
        let (items, rx) = mpsc::unbounded_channel();
        let stream_id = self
            .conn
            .registry()
            .allocate(|_| StreamRecord::Subscriber { items })?;

        let stream = PayloadStream {
            stream_id,
            items: rx,
            conn: self.conn.clone(),
        };

        self.conn
            .writer()
            .send(&Frame::request_stream(stream_id, UNBOUNDED_REQUEST_N, payload))
            .await?;
        Ok(stream)
    }

    /// Close the connection. Pending requests fail with `TransportClosed`.
    pub async fn close(&self) {
        self.conn.close(RSocketError::TransportClosed).await;
    }

    /// Whether the connection is closed.
    pub fn is_closed(&self) -> bool {
        self.conn.is_closed()
    }

    /// Wait until the connection is closed.
    pub async fn closed(&self) {
        self.conn.closed().await;
    }

    /// Codec for the negotiated data MIME type.
    pub fn data_codec(&self) -> MimeCodec {
        MimeCodec::from_mime_type(&self.conn.config().data_mime_type)
    }

    /// Number of live streams on the connection.
    pub fn live_streams(&self) -> usize {
        self.conn.registry().len()
    }
}

impl std::fmt::Debug for Requester {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Requester")
            .field("peer", &self.conn.config().peer)
            .field("closed", &self.conn.is_closed())
            .finish()
    }
}

/// An in-flight request/response.
///
/// Dropping it before the answer arrives cancels the stream and sends CANCEL.
pub struct PendingResponse {
    stream_id: u32,
    receiver: Option<ResponseReceiver>,
    conn: Arc<Connection>,
}

impl PendingResponse {
    /// Stream identifier.
    pub fn stream_id(&self) -> u32 {
        self.stream_id
    }

    /// Current state.
    ///
    /// A finished stream keeps its final state after the connection closes;
    /// one still waiting at that point reads as `Cancelled`.
    pub fn state(&self) -> StreamState {
        self.conn
            .registry()
            .state(self.stream_id)
            .unwrap_or(StreamState::Cancelled)
    }

    /// Wait for the answer.
    ///
    /// # Errors
    ///
    /// The peer's ERROR as `Request`, `EmptyResponse` if the peer completed
    /// without a value, `TransportClosed` if the connection closed, `Cancelled` after [`cancel`](Self::cancel), or `Protocol` when
    /// the answer was already taken.
    pub async fn response(&mut self) -> Result<Payload> {
        let receiver = self
            .receiver
            .take()
            .ok_or_else(|| RSocketError::Protocol("response already taken".to_string()))?;

        match receiver.await {
            Ok(outcome) => outcome,
            Err(_) => Err(RSocketError::TransportClosed),
        }
    }

    /// Wait for the answer at most `deadline`.
    ///
    /// # Errors
    ///
    /// `Timeout` when the deadline elapses; the stream is then `Cancelled`.
    pub async fn response_timeout(&mut self, deadline: Duration) -> Result<Payload> {
        match tokio::time::timeout(deadline, self.response()).await {
            Ok(outcome) => outcome,
            Err(_) => {
                tracing::debug!(stream_id = self.stream_id, ?deadline, "request timed out");
                self.cancel_with(RSocketError::Timeout(deadline));
                Err(RSocketError::Timeout(deadline))
            }
        }
    }

    /// Cancel the request. Returns `false` if it already finished.
    pub fn cancel(&mut self) -> bool {
        self.cancel_with(RSocketError::Cancelled)
    }

    fn cancel_with(&self, cause: RSocketError) -> bool {
        let cancelled = self.with_stream(|stream| stream.cancel(cause)).unwrap_or(false);
        if cancelled {
            self.send_cancel();
        }
        cancelled
    }

    fn send_cancel(&self) {
        if let Err(e) = self.conn.writer().try_send(&Frame::cancel(self.stream_id)) {
            tracing::debug!(stream_id = self.stream_id, error = %e, "CANCEL not sent");
        }
    }

    fn with_stream<R>(&self, f: impl FnOnce(&mut RequestResponseStream) -> R) -> Option<R> {
        self.conn
            .registry()
            .with_stream(self.stream_id, |record| match record {
                StreamRecord::RequestResponse(stream) => Some(f(stream)),
                _ => None,
            })
            .flatten()
    }
}

impl Drop for PendingResponse {
    fn drop(&mut self) {
        if let Some(StreamRecord::RequestResponse(mut stream)) =
            self.conn.registry().release(self.stream_id)
        {
            if stream.cancel(RSocketError::Cancelled) {
                self.send_cancel();
            }
        }
    }
}

impl std::fmt::Debug for PendingResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingResponse")
            .field("stream_id", &self.stream_id)
            .field("state", &self.state())
            .finish()
    }
}

/// Items of a request-stream.
///
/// Ends after COMPLETE, after an ERROR (yielded as the last item) or when
/// the connection closes (`TransportClosed`, yielded as the last item).
pub struct PayloadStream {
    stream_id: u32,
    items: mpsc::UnboundedReceiver<Result<Payload>>,
    conn: Arc<Connection>,
}

impl PayloadStream {
    /// Stream identifier.
    pub fn stream_id(&self) -> u32 {
        self.stream_id
    }
}

impl Stream for PayloadStream {
    type Item = Result<Payload>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.items.poll_recv(cx)
    }
}

impl Drop for PayloadStream {
    fn drop(&mut self) {
        // Still registered means neither COMPLETE nor ERROR arrived.
        if self.conn.registry().release(self.stream_id).is_some() {
            if let Err(e) = self.conn.writer().try_send(&Frame::cancel(self.stream_id)) {
                tracing::debug!(stream_id = self.stream_id, error = %e, "CANCEL not sent");
            }
        }
    }
}
