//! Connection core shared by client and server.
//!
//! A [`Connection`] owns the stream registry and the writer handle of one
//! transport. Three tasks drive it:
//! - the read loop decodes frames in receipt order and routes each to its
//!   stream, or spawns a handler task for new peer requests
//! - the keepalive loop sends KEEPALIVE (client) and enforces max lifetime
//! - the writer task (see [`crate::writer`]) owns the transport write half
//!
//! Closing is idempotent: the first cause cancels every live stream with
//! `TransportClosed`, wakes everything waiting on the connection and is
//! reported exactly once, to a pending setup confirmation if there is one
//! and to the close callback otherwise.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use bytes::Bytes;
use futures_util::{stream, StreamExt};
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot, watch, Semaphore};
use tokio::time::{Instant, MissedTickBehavior};

use crate::error::{RSocketError, Result};
use crate::handler::{BoxStream, EmptyRSocket, RSocket};
use crate::payload::Payload;
use crate::protocol::{ErrorCode, Frame, FrameBody, CONNECTION_STREAM_ID};
use crate::registry::{StreamRecord, StreamRegistry, StreamSide};
use crate::transport::{FrameReader, FrameWriter};
use crate::writer::{spawn_writer_task, WriterConfig, WriterHandle};

/// Default bound on concurrently running handler tasks per connection.
pub const DEFAULT_MAX_CONCURRENT_HANDLERS: usize = 256;

/// How long closing waits for the writer to accept its shutdown.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

/// Called once with the error that closed the connection.
pub type CloseCallback = Box<dyn FnOnce(&RSocketError) + Send + 'static>;

/// Per-connection settings.
#[derive(Debug, Clone)]
pub(crate) struct ConnectionConfig {
    pub side: StreamSide,
    pub peer: String,
    pub writer: WriterConfig,
    pub max_concurrent_handlers: usize,
    pub request_timeout: Option<Duration>,
    pub data_mime_type: String,
}

/// Keepalive timing, fixed once SETUP is known.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Keepalive {
    pub interval: Duration,
    pub max_lifetime: Duration,
    /// Whether this side emits KEEPALIVE frames (the client does).
    pub send: bool,
}

/// A peer request being dispatched to the responder.
enum Request {
    Response(Payload),
    Stream(Payload),
    Channel(Payload),
}

pub(crate) struct Connection {
    config: ConnectionConfig,
    registry: StreamRegistry,
    writer: WriterHandle,
    responder: OnceLock<Arc<dyn RSocket>>,
    handler_permits: Arc<Semaphore>,
    closed: AtomicBool,
    closed_tx: watch::Sender<bool>,
    on_close: Mutex<Option<CloseCallback>>,
    setup_ack: Mutex<Option<oneshot::Sender<Result<()>>>>,
    last_received: Mutex<Instant>,
}

impl Connection {
    /// Spawn the writer task over `writer`. Reading starts with [`start`](Self::start).
    pub(crate) fn new(
        config: ConnectionConfig,
        writer: Box<dyn FrameWriter>,
        on_close: Option<CloseCallback>,
    ) -> Arc<Self> {
        let (writer_handle, writer_task) = spawn_writer_task(writer, config.writer.clone());
        let (closed_tx, _) = watch::channel(false);

        let conn = Arc::new(Self {
            registry: StreamRegistry::new(config.side),
            handler_permits: Arc::new(Semaphore::new(config.max_concurrent_handlers.max(1))),
            config,
            writer: writer_handle,
            responder: OnceLock::new(),
            closed: AtomicBool::new(false),
            closed_tx,
            on_close: Mutex::new(on_close),
            setup_ack: Mutex::new(None),
            last_received: Mutex::new(Instant::now()),
        });

        let weak = Arc::downgrade(&conn);
        tokio::spawn(async move {
            let cause = match writer_task.await {
                Ok(Ok(())) => RSocketError::TransportClosed,
                Ok(Err(e)) => e,
                Err(e) => RSocketError::Protocol(format!("writer task failed: {e}")),
            };
            if let Some(conn) = weak.upgrade() {
                conn.close(cause).await;
            }
        });

        conn
    }

    pub(crate) fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub(crate) fn registry(&self) -> &StreamRegistry {
        &self.registry
    }

    pub(crate) fn writer(&self) -> &WriterHandle {
        &self.writer
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Install the responder for peer requests. Only the first call has an effect.
    pub(crate) fn set_responder(&self, responder: Arc<dyn RSocket>) {
        if self.responder.set(responder).is_err() {
            tracing::debug!(peer = %self.config.peer, "responder already set");
        }
    }

    fn responder(&self) -> Arc<dyn RSocket> {
        self.responder
            .get()
            .cloned()
            .unwrap_or_else(|| Arc::new(EmptyRSocket))
    }

    /// Resolves with `Ok` on the next KEEPALIVE answer, or with the close cause.
    pub(crate) fn expect_setup_ack(&self) -> oneshot::Receiver<Result<()>> {
        let (tx, rx) = oneshot::channel();
        *self.setup_ack.lock() = Some(tx);
        rx
    }

    /// Wait until the connection is closed.
    pub(crate) async fn closed(&self) {
        let mut closed = self.closed_tx.subscribe();
        let _ = closed.wait_for(|closed| *closed).await;
    }

    /// Start the read loop and, unless disabled by zero timings, the keepalive loop.
    pub(crate) fn start(self: &Arc<Self>, reader: Box<dyn FrameReader>, keepalive: Keepalive) {
        self.touch();
        tokio::spawn(self.clone().read_loop(reader));

        if keepalive.interval.is_zero() || keepalive.max_lifetime.is_zero() {
            tracing::debug!(peer = %self.config.peer, "keepalive disabled");
        } else {
            tokio::spawn(self.clone().keepalive_loop(keepalive));
        }
    }

    /// Queue a frame, logging instead of failing when the connection is gone.
    pub(crate) async fn send_or_log(&self, frame: &Frame) {
        if let Err(e) = self.writer.send(frame).await {
            tracing::debug!(
                stream_id = frame.stream_id,
                frame_type = %frame.frame_type(),
                error = %e,
                "dropping outbound frame"
            );
        }
    }

    /// Close the connection with `cause`. Later calls do nothing.
    pub(crate) async fn close(&self, cause: RSocketError) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        let cancelled = self.registry.close(&|| RSocketError::TransportClosed);
        tracing::info!(
            peer = %self.config.peer,
            cause = %cause,
            cancelled,
            "connection closed"
        );
        self.closed_tx.send_replace(true);
        self.report_close(cause);

        if tokio::time::timeout(SHUTDOWN_TIMEOUT, self.writer.shutdown())
            .await
            .is_err()
        {
            tracing::debug!(peer = %self.config.peer, "writer did not accept shutdown");
        }
    }

    fn report_close(&self, cause: RSocketError) {
        let ack = self.setup_ack.lock().take();
        let cause = match ack {
            Some(ack) => match ack.send(Err(cause)) {
                Ok(()) => return,
                Err(Err(cause)) => cause,
                Err(Ok(())) => return,
            },
            None => cause,
        };

        let callback = self.on_close.lock().take();
        if let Some(callback) = callback {
            callback(&cause);
        }
    }

    fn touch(&self) {
        *self.last_received.lock() = Instant::now();
    }

    async fn read_loop(self: Arc<Self>, mut reader: Box<dyn FrameReader>) {
        let mut closed = self.closed_tx.subscribe();

        let cause = loop {
            let next = tokio::select! {
                biased;
                _ = closed.wait_for(|closed| *closed) => return,
                next = reader.read_frame() => next,
            };

            let bytes = match next {
                Ok(Some(bytes)) => bytes,
                Ok(None) => break RSocketError::TransportClosed,
                Err(RSocketError::Decode(e)) => {
                    self.send_or_log(&Frame::error(
                        CONNECTION_STREAM_ID,
                        ErrorCode::CONNECTION_ERROR,
                        e.to_string(),
                    ))
                    .await;
                    break RSocketError::Decode(e);
                }
                Err(e) => break e,
            };

            self.touch();
            match Frame::decode(bytes) {
                Ok(frame) => self.handle_frame(frame).await,
                Err(e) if e.is_recoverable() => {
                    tracing::debug!(peer = %self.config.peer, error = %e, "skipping frame");
                }
                Err(e) => {
                    tracing::warn!(peer = %self.config.peer, error = %e, "malformed frame");
                    self.send_or_log(&Frame::error(
                        CONNECTION_STREAM_ID,
                        ErrorCode::CONNECTION_ERROR,
                        e.to_string(),
                    ))
                    .await;
                    break RSocketError::Decode(e);
                }
            }
        };

        self.close(cause).await;
    }

    async fn handle_frame(self: &Arc<Self>, frame: Frame) {
        let stream_id = frame.stream_id;
        tracing::trace!(stream_id, frame_type = %frame.frame_type(), "frame received");

        let respond = frame.is_respond();
        let next = frame.is_next();
        let complete = frame.is_complete();

        match frame.body {
            FrameBody::KeepAlive { data, .. } => {
                if respond {
                    self.send_or_log(&Frame::keepalive(false, 0, data)).await;
                } else {
                    let ack = self.setup_ack.lock().take();
                    if let Some(ack) = ack {
                        let _ = ack.send(Ok(()));
                    }
                }
            }
            FrameBody::Error { code, message } if stream_id == CONNECTION_STREAM_ID => {
                let cause = if code.is_setup_error() {
                    RSocketError::SetupRejected(message)
                } else {
                    RSocketError::Connection { code, message }
                };
                self.close(cause).await;
            }
            FrameBody::Setup(_) => {
                self.send_or_log(&Frame::error(
                    CONNECTION_STREAM_ID,
                    ErrorCode::CONNECTION_ERROR,
                    "unexpected SETUP",
                ))
                .await;
                self.close(RSocketError::Protocol("unexpected SETUP".to_string()))
                    .await;
            }
            FrameBody::MetadataPush(metadata) => {
                self.responder().metadata_push(Payload::from_metadata(metadata));
            }
            FrameBody::RequestFnf(payload) => {
                if self.is_peer_stream(stream_id) {
                    self.responder().fire_and_forget(payload);
                }
            }
            FrameBody::RequestResponse(payload) => {
                self.accept_request(stream_id, Request::Response(payload), true)
                    .await;
            }
            FrameBody::RequestStream { payload, .. } => {
                self.accept_request(stream_id, Request::Stream(payload), true)
                    .await;
            }
            FrameBody::RequestChannel { payload, .. } => {
                self.accept_request(stream_id, Request::Channel(payload), complete)
                    .await;
            }
            FrameBody::RequestN(n) => {
                tracing::trace!(stream_id, n, "REQUEST_N ignored");
            }
            FrameBody::Cancel => self.on_cancel(stream_id),
            FrameBody::Payload(payload) => self.on_payload(stream_id, payload, next, complete),
            FrameBody::Error { code, message } => self.on_stream_error(stream_id, code, message),
        }
    }

    fn is_peer_stream(&self, stream_id: u32) -> bool {
        let ok = self.config.side.peer().owns(stream_id);
        if !ok {
            tracing::warn!(stream_id, "request on a stream id the peer does not own");
        }
        ok
    }

    /// Register a responder stream and run the handler on its own task.
    async fn accept_request(self: &Arc<Self>, stream_id: u32, request: Request, inputs_done: bool) {
        if !self.is_peer_stream(stream_id) {
            return;
        }

        let Ok(permit) = self.handler_permits.clone().try_acquire_owned() else {
            tracing::warn!(stream_id, "handler limit reached");
            self.send_or_log(&Frame::error(
                stream_id,
                ErrorCode::REJECTED,
                "too many concurrent requests",
            ))
            .await;
            return;
        };

        let (cancel_tx, cancel_rx) = oneshot::channel();
        let (inbound, inputs) = if inputs_done {
            (None, None)
        } else {
            let (tx, rx) = mpsc::unbounded_channel();
            (Some(tx), Some(rx))
        };

        let record = StreamRecord::Responder {
            cancel: Some(cancel_tx),
            inbound,
        };
        if let Err(e) = self.registry.register(stream_id, record) {
            tracing::warn!(stream_id, error = %e, "cannot accept request");
            if !matches!(e, RSocketError::TransportClosed) {
                self.send_or_log(&Frame::error(stream_id, ErrorCode::INVALID, e.to_string()))
                    .await;
            }
            return;
        }

        let conn = self.clone();
        let responder = self.responder();
        tokio::spawn(async move {
            let _permit = permit;
            tokio::select! {
                _ = cancel_rx => tracing::debug!(stream_id, "request cancelled"),
                () = conn.respond(stream_id, request, responder, inputs) => {}
            }
            conn.registry.release(stream_id);
        });
    }

    async fn respond(
        &self,
        stream_id: u32,
        request: Request,
        responder: Arc<dyn RSocket>,
        inputs: Option<mpsc::UnboundedReceiver<Payload>>,
    ) {
        match request {
            Request::Response(payload) => {
                let frame = match responder.request_response(payload).await {
                    Ok(answer) => Frame::next_complete(stream_id, answer),
                    Err(e) => {
                        let (code, message) = e.to_stream_error();
                        Frame::error(stream_id, code, message)
                    }
                };
                self.send_or_log(&frame).await;
            }
            Request::Stream(payload) => {
                self.forward(stream_id, responder.request_stream(payload))
                    .await;
            }
            Request::Channel(payload) => {
                let first = stream::once(async move { payload });
                let inputs: BoxStream<'static, Payload> = match inputs {
                    Some(rx) => first
                        .chain(stream::unfold(rx, |mut rx| async move {
                            rx.recv().await.map(|payload| (payload, rx))
                        }))
                        .boxed(),
                    None => first.boxed(),
                };
                self.forward(stream_id, responder.request_channel(inputs))
                    .await;
            }
        }
    }

    /// Send a handler's output stream as NEXT frames, then COMPLETE or ERROR.
    async fn forward(&self, stream_id: u32, mut outputs: BoxStream<'static, Result<Payload>>) {
        while let Some(item) = outputs.next().await {
            match item {
                Ok(payload) => {
                    if self.writer.send(&Frame::next(stream_id, payload)).await.is_err() {
                        return;
                    }
                }
                Err(e) => {
                    let (code, message) = e.to_stream_error();
                    self.send_or_log(&Frame::error(stream_id, code, message))
                        .await;
                    return;
                }
            }
        }
        self.send_or_log(&Frame::complete(stream_id)).await;
    }

    fn on_cancel(&self, stream_id: u32) {
        let cancel = self
            .registry
            .with_stream(stream_id, |record| match record {
                StreamRecord::Responder { cancel, .. } => cancel.take(),
                _ => None,
            })
            .flatten();

        match cancel {
            Some(cancel) => {
                let _ = cancel.send(());
                self.registry.release(stream_id);
            }
            None => tracing::debug!(stream_id, "CANCEL for unknown stream"),
        }
    }

    fn on_payload(&self, stream_id: u32, payload: Payload, next: bool, complete: bool) {
        let finished = self.registry.with_stream(stream_id, |record| match record {
            StreamRecord::RequestResponse(stream) => {
                let accepted = match (next, complete) {
                    (true, _) => stream.on_payload(payload),
                    (false, true) => stream.on_complete_empty(),
                    (false, false) => {
                        tracing::debug!(stream_id, "PAYLOAD without NEXT or COMPLETE discarded");
                        return false;
                    }
                };
                if !accepted {
                    tracing::debug!(stream_id, "duplicate response discarded");
                }
                false
            }
            StreamRecord::Subscriber { items } => {
                if next {
                    let _ = items.send(Ok(payload));
                }
                complete
            }
            StreamRecord::Responder { inbound, .. } => {
                if next {
                    if let Some(inbound) = inbound {
                        let _ = inbound.send(payload);
                    }
                }
                if complete {
                    *inbound = None;
                }
                false
            }
        });

        match finished {
            Some(true) => {
                self.registry.release(stream_id);
            }
            Some(false) => {}
            None => tracing::debug!(stream_id, "PAYLOAD for unknown stream discarded"),
        }
    }

    fn on_stream_error(&self, stream_id: u32, code: ErrorCode, message: String) {
        let finished = self.registry.with_stream(stream_id, |record| match record {
            StreamRecord::RequestResponse(stream) => {
                if !stream.on_error(RSocketError::Request { code, message }) {
                    tracing::debug!(stream_id, "late ERROR discarded");
                }
                false
            }
            StreamRecord::Subscriber { items } => {
                let _ = items.send(Err(RSocketError::Request { code, message }));
                true
            }
            StreamRecord::Responder { cancel, .. } => {
                if let Some(cancel) = cancel.take() {
                    let _ = cancel.send(());
                }
                true
            }
        });

        match finished {
            Some(true) => {
                self.registry.release(stream_id);
            }
            Some(false) => {}
            None => tracing::debug!(stream_id, %code, "ERROR for unknown stream discarded"),
        }
    }

    async fn keepalive_loop(self: Arc<Self>, keepalive: Keepalive) {
        let mut closed = self.closed_tx.subscribe();
        let mut ticker = tokio::time::interval(keepalive.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            tokio::select! {
                biased;
                _ = closed.wait_for(|closed| *closed) => return,
                _ = ticker.tick() => {}
            }

            let silent = self.last_received.lock().elapsed();
            if silent >= keepalive.max_lifetime {
                tracing::warn!(
                    peer = %self.config.peer,
                    silent_ms = silent.as_millis() as u64,
                    "keepalive timeout"
                );
                self.close(RSocketError::KeepaliveTimeout(keepalive.max_lifetime))
                    .await;
                return;
            }

            if keepalive.send {
                self.send_or_log(&Frame::keepalive(true, 0, Bytes::new()))
                    .await;
            }
        }
    }
}
