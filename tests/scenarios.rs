//! End-to-end scenarios: client and server over in-memory pipes, loopback
//! TCP and loopback WebSocket, plus a raw frame peer for protocol edge cases.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::{stream, StreamExt};
use parking_lot::Mutex;
use rsocket_wire::handler::{
    accept_if_data_equals, AcceptResult, BoxFuture, BoxStream, RequestResponseFn,
};
use rsocket_wire::protocol::{ErrorCode, Frame, FrameBody};
use rsocket_wire::transport::{
    DuplexConnection, FrameReader, FrameWriter, ServerTransport, StreamTransport,
    TcpClientTransport, TcpServerTransport, WebSocketClientTransport, WebSocketServerTransport,
};
use rsocket_wire::{
    Client, ClientBuilder, Payload, RSocket, RSocketError, Requester, Result, Server,
    SetupPayload, StreamState,
};
use tokio::io::{duplex, DuplexStream};
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

const PIPE_SIZE: usize = 64 * 1024;

/// Responder used by most scenarios.
///
/// Request/response answers `Payload { "data", "meta" }`, except for the
/// data `"fail"` (application error) and `"block"` (never answers).
#[derive(Default)]
struct TestResponder {
    requests: AtomicUsize,
    one_way: Option<mpsc::UnboundedSender<Payload>>,
}

impl TestResponder {
    fn with_one_way(tx: mpsc::UnboundedSender<Payload>) -> Self {
        Self {
            requests: AtomicUsize::new(0),
            one_way: Some(tx),
        }
    }
}

impl RSocket for TestResponder {
    fn fire_and_forget(&self, payload: Payload) {
        if let Some(tx) = &self.one_way {
            let _ = tx.send(payload);
        }
    }

    fn metadata_push(&self, payload: Payload) {
        if let Some(tx) = &self.one_way {
            let _ = tx.send(payload);
        }
    }

    fn request_response(&self, payload: Payload) -> BoxFuture<'static, Result<Payload>> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        match payload.data_utf8() {
            Some("fail") => Box::pin(async { Err(RSocketError::application("boom")) }),
            Some("block") => Box::pin(std::future::pending::<Result<Payload>>()),
            _ => Box::pin(async { Ok(Payload::from_str("data", "meta")) }),
        }
    }

    fn request_stream(&self, payload: Payload) -> BoxStream<'static, Result<Payload>> {
        let count: usize = payload.data_utf8().and_then(|n| n.parse().ok()).unwrap_or(0);
        stream::iter((0..count).map(|i| Ok(Payload::from_data(format!("item-{i}"))))).boxed()
    }

    fn request_channel(
        &self,
        inputs: BoxStream<'static, Payload>,
    ) -> BoxStream<'static, Result<Payload>> {
        inputs
            .map(|payload| {
                let upper = payload.data_utf8().unwrap_or_default().to_uppercase();
                Ok(Payload::from_data(upper))
            })
            .boxed()
    }
}

fn demo_server(responder: Arc<TestResponder>) -> Server {
    Server::builder()
        .acceptor(accept_if_data_equals("setup", responder))
        .build()
}

fn setup_client(data: &str) -> ClientBuilder {
    Client::builder().setup(SetupPayload::from_str(data, "metadata"))
}

/// Connect a client to `server` over an in-memory pipe.
async fn connect_pair(server: Server, builder: ClientBuilder) -> Result<Client> {
    let (client_io, server_io) = duplex(PIPE_SIZE);
    tokio::spawn(async move {
        let conn = StreamTransport::new(server_io).peer("pipe").into_connection();
        let _ = server.serve_connection(conn).await;
    });
    builder.connect(StreamTransport::new(client_io)).await
}

/// The far end of a pipe, speaking raw frames.
struct RawPeer {
    reader: Box<dyn FrameReader>,
    writer: Box<dyn FrameWriter>,
}

impl RawPeer {
    fn new(io: DuplexStream) -> Self {
        let DuplexConnection { reader, writer, .. } = StreamTransport::new(io).into_connection();
        Self { reader, writer }
    }

    async fn recv(&mut self) -> Option<Frame> {
        let bytes = self.reader.read_frame().await.ok()??;
        Some(Frame::decode(bytes).unwrap())
    }

    /// Next frame that is not a KEEPALIVE.
    async fn recv_request(&mut self) -> Frame {
        loop {
            let frame = self.recv().await.expect("peer closed");
            if !matches!(frame.body, FrameBody::KeepAlive { .. }) {
                return frame;
            }
        }
    }

    async fn send(&mut self, frame: Frame) {
        self.writer.write_frames(&[frame.encode()]).await.unwrap();
    }

    /// Accept the client's SETUP and answer its confirmation KEEPALIVE.
    async fn accept_setup(&mut self) -> SetupPayload {
        let setup = match self.recv().await.expect("no SETUP").body {
            FrameBody::Setup(setup) => setup,
            other => panic!("expected SETUP, got {other:?}"),
        };
        let confirm = self.recv().await.expect("no KEEPALIVE");
        assert!(confirm.is_respond());
        let FrameBody::KeepAlive { data, .. } = confirm.body else {
            panic!("expected KEEPALIVE, got {:?}", confirm.body);
        };
        self.send(Frame::keepalive(false, 0, data)).await;
        setup
    }
}

fn raw_pair() -> (StreamTransport<DuplexStream>, RawPeer) {
    let (client_io, peer_io) = duplex(PIPE_SIZE);
    (StreamTransport::new(client_io), RawPeer::new(peer_io))
}

#[tokio::test]
async fn test_happy_path_request_response() {
    let responder = Arc::new(TestResponder::default());
    let client = connect_pair(demo_server(responder.clone()), setup_client("setup"))
        .await
        .unwrap();

    let mut pending = client
        .start_request_response(Payload::from_str("data", "metadata"))
        .await
        .unwrap();
    assert_eq!(pending.stream_id(), 1);

    let answer = pending.response().await.unwrap();
    assert_eq!(answer.data_utf8(), Some("data"));
    assert_eq!(answer.metadata_utf8(), Some("meta"));
    assert_eq!(pending.state(), StreamState::Completed);
    assert_eq!(responder.requests.load(Ordering::SeqCst), 1);

    drop(pending);
    assert_eq!(client.live_streams(), 0);
}

#[tokio::test]
async fn test_final_state_survives_close() {
    let responder = Arc::new(TestResponder::default());
    let client = connect_pair(demo_server(responder), setup_client("setup"))
        .await
        .unwrap();

    let mut answered = client
        .start_request_response(Payload::from_str("data", ""))
        .await
        .unwrap();
    answered.response().await.unwrap();
    let mut failed = client
        .start_request_response(Payload::from_str("fail", ""))
        .await
        .unwrap();
    assert!(failed.response().await.is_err());
    let waiting = client
        .start_request_response(Payload::from_str("block", ""))
        .await
        .unwrap();

    client.close().await;

    assert_eq!(answered.state(), StreamState::Completed);
    assert_eq!(failed.state(), StreamState::Errored);
    assert_eq!(waiting.state(), StreamState::Cancelled);
}

#[tokio::test]
async fn test_complete_without_value_is_empty_response() {
    let (transport, mut peer) = raw_pair();
    tokio::spawn(async move {
        peer.accept_setup().await;
        let first = peer.recv_request().await;
        // Neither NEXT nor COMPLETE: not an answer.
        peer.send(Frame::payload(first.stream_id, Payload::from_str("stray", ""), 0))
            .await;
        peer.send(Frame::complete(first.stream_id)).await;

        let second = peer.recv_request().await;
        peer.send(Frame::next_complete(second.stream_id, Payload::default()))
            .await;
        peer
    });

    let client = setup_client("setup").connect(transport).await.unwrap();
    let mut pending = client
        .start_request_response(Payload::from_str("data", ""))
        .await
        .unwrap();
    assert!(matches!(
        pending.response().await,
        Err(RSocketError::EmptyResponse)
    ));
    assert_eq!(pending.state(), StreamState::Completed);

    // An empty value is still a value.
    let answer = client
        .request_response(Payload::from_str("data", ""))
        .await
        .unwrap();
    assert!(answer.is_empty());
    assert!(!answer.has_metadata());
}

#[tokio::test]
async fn test_setup_data_compared_ignoring_case() {
    let client = connect_pair(
        demo_server(Arc::new(TestResponder::default())),
        setup_client("SeTuP"),
    )
    .await
    .unwrap();

    let answer = client
        .request_response(Payload::from_str("data", "metadata"))
        .await
        .unwrap();
    assert_eq!(answer.data_utf8(), Some("data"));
}

#[tokio::test]
async fn test_rejected_setup_fails_connect() {
    let responder = Arc::new(TestResponder::default());

    for data in ["nope", "data", ""] {
        let err = connect_pair(demo_server(responder.clone()), setup_client(data))
            .await
            .unwrap_err();
        assert!(
            matches!(err, RSocketError::SetupRejected(_)),
            "unexpected error: {err}"
        );
    }
    assert_eq!(responder.requests.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_acceptor_rejecting_everything_never_dispatches() {
    let acceptor_calls = Arc::new(AtomicUsize::new(0));
    let calls = acceptor_calls.clone();
    let server = Server::builder()
        .acceptor_fn(move |_setup: &SetupPayload, _requester: Requester| -> AcceptResult {
            calls.fetch_add(1, Ordering::SeqCst);
            Err("closed for maintenance".to_string())
        })
        .build();

    for _ in 0..3 {
        let err = connect_pair(server.clone(), setup_client("setup"))
            .await
            .unwrap_err();
        match err {
            RSocketError::SetupRejected(message) => assert_eq!(message, "closed for maintenance"),
            other => panic!("expected SetupRejected, got {other}"),
        }
    }
    assert_eq!(acceptor_calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_rejected_setup_without_confirmation_closes_pending_request() {
    let (closed_tx, closed_rx) = oneshot::channel();
    let client = connect_pair(
        demo_server(Arc::new(TestResponder::default())),
        setup_client("nope")
            .confirm_setup(false)
            .on_close(move |cause| {
                let _ = closed_tx.send(cause.to_string());
            }),
    )
    .await
    .unwrap();

    let err = client
        .request_response(Payload::from_str("data", "metadata"))
        .await
        .unwrap_err();
    assert!(matches!(err, RSocketError::TransportClosed), "unexpected error: {err}");

    let cause = closed_rx.await.unwrap();
    assert!(cause.starts_with("setup rejected"), "unexpected cause: {cause}");
    assert!(client.is_closed());
}

#[tokio::test(start_paused = true)]
async fn test_request_times_out_against_silent_server() {
    let (transport, mut peer) = raw_pair();
    let peer_task = tokio::spawn(async move {
        peer.accept_setup().await;
        let request = peer.recv_request().await;
        assert!(matches!(request.body, FrameBody::RequestResponse(_)));
        let cancel = peer.recv_request().await;
        assert_eq!(cancel.body, FrameBody::Cancel);
        assert_eq!(cancel.stream_id, request.stream_id);
        peer
    });

    let client = setup_client("setup").connect(transport).await.unwrap();
    let started = Instant::now();
    let mut pending = client
        .start_request_response(Payload::from_str("data", "metadata"))
        .await
        .unwrap();
    assert_eq!(pending.state(), StreamState::AwaitingResponse);

    let err = pending
        .response_timeout(Duration::from_secs(1))
        .await
        .unwrap_err();
    assert!(matches!(err, RSocketError::Timeout(d) if d == Duration::from_secs(1)));
    assert!(started.elapsed() >= Duration::from_secs(1));
    assert_eq!(pending.state(), StreamState::Cancelled);

    let _peer = peer_task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_default_request_timeout_applies() {
    let (transport, mut peer) = raw_pair();
    tokio::spawn(async move {
        peer.accept_setup().await;
        while peer.recv().await.is_some() {}
    });

    let client = setup_client("setup")
        .request_timeout(Duration::from_millis(250))
        .connect(transport)
        .await
        .unwrap();

    let err = client
        .request_response(Payload::from_str("data", ""))
        .await
        .unwrap_err();
    assert!(matches!(err, RSocketError::Timeout(_)));
    assert_eq!(client.live_streams(), 0);
}

#[tokio::test]
async fn test_duplicate_payloads_delivered_at_most_once() {
    let (transport, mut peer) = raw_pair();
    let peer_task = tokio::spawn(async move {
        peer.accept_setup().await;
        let first = peer.recv_request().await;
        peer.send(Frame::next_complete(first.stream_id, Payload::from_str("one", "")))
            .await;
        peer.send(Frame::next_complete(first.stream_id, Payload::from_str("two", "")))
            .await;
        peer.send(Frame::error(first.stream_id, ErrorCode::APPLICATION_ERROR, "late"))
            .await;

        let second = peer.recv_request().await;
        peer.send(Frame::next_complete(second.stream_id, Payload::from_str("three", "")))
            .await;
        peer
    });

    let client = setup_client("setup").connect(transport).await.unwrap();
    let mut pending = client
        .start_request_response(Payload::from_str("data", ""))
        .await
        .unwrap();
    let answer = pending.response().await.unwrap();
    assert_eq!(answer.data_utf8(), Some("one"));
    assert!(pending.response().await.is_err());
    assert_eq!(pending.state(), StreamState::Completed);

    // The duplicates must not leak into the next request on the connection.
    let answer = client
        .request_response(Payload::from_str("data", ""))
        .await
        .unwrap();
    assert_eq!(answer.data_utf8(), Some("three"));

    let _peer = peer_task.await.unwrap();
    assert_eq!(pending.state(), StreamState::Completed);
}

#[tokio::test]
async fn test_interleaved_streams_answered_out_of_order() {
    let (transport, mut peer) = raw_pair();
    tokio::spawn(async move {
        peer.accept_setup().await;
        let a = peer.recv_request().await;
        let b = peer.recv_request().await;
        assert_eq!((a.stream_id, b.stream_id), (1, 3));

        let echo = |frame: &Frame| frame.payload_ref().unwrap().clone();
        peer.send(Frame::next_complete(b.stream_id, echo(&b))).await;
        peer.send(Frame::next_complete(a.stream_id, echo(&a))).await;
        while peer.recv().await.is_some() {}
    });

    let client = setup_client("setup").connect(transport).await.unwrap();
    let (a, b) = tokio::join!(
        client.request_response(Payload::from_str("a", "ma")),
        client.request_response(Payload::from_str("b", "mb")),
    );

    let (a, b) = (a.unwrap(), b.unwrap());
    assert_eq!((a.data_utf8(), a.metadata_utf8()), (Some("a"), Some("ma")));
    assert_eq!((b.data_utf8(), b.metadata_utf8()), (Some("b"), Some("mb")));
}

#[tokio::test]
async fn test_cancel_sends_cancel_frame() {
    let (transport, mut peer) = raw_pair();
    let (seen_tx, seen_rx) = oneshot::channel();
    tokio::spawn(async move {
        peer.accept_setup().await;
        let request = peer.recv_request().await;
        let cancel = peer.recv_request().await;
        let _ = seen_tx.send((request.stream_id, cancel));
        while peer.recv().await.is_some() {}
    });

    let client = setup_client("setup").connect(transport).await.unwrap();
    let mut pending = client
        .start_request_response(Payload::from_str("data", ""))
        .await
        .unwrap();

    assert!(pending.cancel());
    assert!(!pending.cancel());
    assert_eq!(pending.state(), StreamState::Cancelled);
    assert!(matches!(pending.response().await, Err(RSocketError::Cancelled)));

    let (stream_id, cancel) = seen_rx.await.unwrap();
    assert_eq!(cancel, Frame::cancel(stream_id));
}

#[tokio::test]
async fn test_application_error_keeps_connection_alive() {
    let client = connect_pair(
        demo_server(Arc::new(TestResponder::default())),
        setup_client("setup"),
    )
    .await
    .unwrap();

    let mut pending = client
        .start_request_response(Payload::from_str("fail", ""))
        .await
        .unwrap();
    match pending.response().await {
        Err(RSocketError::Request { code, message }) => {
            assert_eq!(code, ErrorCode::APPLICATION_ERROR);
            assert_eq!(message, "boom");
        }
        other => panic!("expected request error, got {other:?}"),
    }
    assert_eq!(pending.state(), StreamState::Errored);

    let answer = client
        .request_response(Payload::from_str("data", ""))
        .await
        .unwrap();
    assert_eq!(answer.data_utf8(), Some("data"));
    assert!(!client.is_closed());
}

#[tokio::test]
async fn test_transport_close_fails_pending_requests() {
    let (transport, mut peer) = raw_pair();
    let (closed_tx, closed_rx) = oneshot::channel();
    tokio::spawn(async move {
        peer.accept_setup().await;
        let _request = peer.recv_request().await;
        drop(peer);
    });

    let client = setup_client("setup")
        .on_close(move |cause| {
            let _ = closed_tx.send(matches!(cause, RSocketError::TransportClosed));
        })
        .connect(transport)
        .await
        .unwrap();

    let err = client
        .request_response(Payload::from_str("data", ""))
        .await
        .unwrap_err();
    assert!(matches!(err, RSocketError::TransportClosed));
    assert!(closed_rx.await.unwrap());

    let err = client
        .request_response(Payload::from_str("again", ""))
        .await
        .unwrap_err();
    assert!(matches!(err, RSocketError::TransportClosed));
}

#[tokio::test]
async fn test_close_is_reported_once() {
    let closes = Arc::new(AtomicUsize::new(0));
    let counter = closes.clone();
    let client = connect_pair(
        demo_server(Arc::new(TestResponder::default())),
        setup_client("setup").on_close(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }),
    )
    .await
    .unwrap();

    client.close().await;
    client.close().await;
    client.closed().await;
    assert_eq!(closes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_request_stream_items_then_complete() {
    let client = connect_pair(
        demo_server(Arc::new(TestResponder::default())),
        setup_client("setup"),
    )
    .await
    .unwrap();

    let items: Vec<String> = client
        .request_stream(Payload::from_str("3", ""))
        .await
        .unwrap()
        .map(|item| item.unwrap().data_utf8().unwrap().to_string())
        .collect()
        .await;
    assert_eq!(items, vec!["item-0", "item-1", "item-2"]);
    assert_eq!(client.live_streams(), 0);
}

#[tokio::test]
async fn test_empty_request_stream_completes() {
    let client = connect_pair(
        demo_server(Arc::new(TestResponder::default())),
        setup_client("setup"),
    )
    .await
    .unwrap();

    let mut items = client.request_stream(Payload::from_str("0", "")).await.unwrap();
    assert!(items.next().await.is_none());
}

#[tokio::test]
async fn test_request_channel_against_server() {
    let (client_io, server_io) = duplex(PIPE_SIZE);
    let server = demo_server(Arc::new(TestResponder::default()));
    tokio::spawn(async move {
        let _ = server
            .serve_connection(StreamTransport::new(server_io).into_connection())
            .await;
    });

    let mut peer = RawPeer::new(client_io);
    peer.send(Frame::setup(SetupPayload::from_str("setup", ""))).await;
    peer.send(Frame::request_channel(1, 8, Payload::from_str("a", ""), false))
        .await;
    peer.send(Frame::next(1, Payload::from_str("b", ""))).await;
    peer.send(Frame::complete(1)).await;

    let mut outputs = Vec::new();
    loop {
        let frame = peer.recv_request().await;
        assert_eq!(frame.stream_id, 1);
        if frame.is_next() {
            outputs.push(frame.payload_ref().unwrap().data_utf8().unwrap().to_string());
        }
        if frame.is_complete() {
            break;
        }
    }
    assert_eq!(outputs, vec!["A", "B"]);
}

#[tokio::test]
async fn test_fire_and_forget_and_metadata_push_reach_responder() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let client = connect_pair(
        demo_server(Arc::new(TestResponder::with_one_way(tx))),
        setup_client("setup"),
    )
    .await
    .unwrap();

    client
        .fire_and_forget(Payload::from_str("fnf", ""))
        .await
        .unwrap();
    client.metadata_push(Bytes::from_static(b"push")).await.unwrap();

    let fnf = rx.recv().await.unwrap();
    assert_eq!(fnf.data_utf8(), Some("fnf"));
    let push = rx.recv().await.unwrap();
    assert_eq!(push.metadata_utf8(), Some("push"));
    assert_eq!(client.live_streams(), 0);
}

#[tokio::test]
async fn test_server_initiated_request() {
    let (answer_tx, answer_rx) = oneshot::channel();
    let answer_tx = Arc::new(Mutex::new(Some(answer_tx)));

    let server = Server::builder()
        .acceptor_fn(move |_setup: &SetupPayload, requester: Requester| -> AcceptResult {
            let answer_tx = answer_tx.clone();
            tokio::spawn(async move {
                let answer = requester
                    .request_response(Payload::from_str("ping", ""))
                    .await;
                if let Some(tx) = answer_tx.lock().take() {
                    let _ = tx.send(answer.map(|p| p.data_utf8().unwrap_or_default().to_string()));
                }
            });
            Ok(Arc::new(TestResponder::default()))
        })
        .build();

    let pong = RequestResponseFn::new(|payload: Payload| async move {
        assert_eq!(payload.data_utf8(), Some("ping"));
        Ok(Payload::from_str("pong", ""))
    });
    let _client = connect_pair(server, setup_client("setup").responder(Arc::new(pong)))
        .await
        .unwrap();

    assert_eq!(answer_rx.await.unwrap().unwrap(), "pong");
}

#[tokio::test]
async fn test_handler_limit_rejects_excess_requests() {
    let server = Server::builder()
        .acceptor(accept_if_data_equals(
            "setup",
            Arc::new(TestResponder::default()),
        ))
        .max_concurrent_handlers(1)
        .build();
    let client = connect_pair(server, setup_client("setup")).await.unwrap();

    let _blocked = client
        .start_request_response(Payload::from_str("block", ""))
        .await
        .unwrap();
    let err = client
        .request_response(Payload::from_str("data", ""))
        .await
        .unwrap_err();
    assert!(matches!(err, RSocketError::Request { code, .. } if code == ErrorCode::REJECTED));
}

#[tokio::test]
async fn test_first_frame_must_be_setup() {
    let (client_io, server_io) = duplex(PIPE_SIZE);
    let server = demo_server(Arc::new(TestResponder::default()));
    let served = tokio::spawn(async move {
        server
            .serve_connection(StreamTransport::new(server_io).into_connection())
            .await
    });

    let mut peer = RawPeer::new(client_io);
    peer.send(Frame::request_response(1, Payload::from_str("data", "")))
        .await;

    let reply = peer.recv().await.unwrap();
    assert_eq!(reply.stream_id, 0);
    assert!(matches!(reply.body, FrameBody::Error { code, .. } if code == ErrorCode::INVALID_SETUP));
    assert!(peer.recv().await.is_none());
    assert!(served.await.unwrap().is_err());
}

#[tokio::test]
async fn test_unsupported_version_rejected() {
    let (client_io, server_io) = duplex(PIPE_SIZE);
    let server = demo_server(Arc::new(TestResponder::default()));
    tokio::spawn(async move {
        let _ = server
            .serve_connection(StreamTransport::new(server_io).into_connection())
            .await;
    });

    let mut setup = SetupPayload::from_str("setup", "");
    setup.major_version = 2;
    let mut peer = RawPeer::new(client_io);
    peer.send(Frame::setup(setup)).await;

    let reply = peer.recv().await.unwrap();
    assert!(
        matches!(reply.body, FrameBody::Error { code, .. } if code == ErrorCode::UNSUPPORTED_SETUP)
    );
}

#[tokio::test(start_paused = true)]
async fn test_server_drops_connection_without_setup() {
    let (client_io, server_io) = duplex(PIPE_SIZE);
    let server = Server::builder()
        .setup_timeout(Duration::from_secs(2))
        .build();
    let served = tokio::spawn(async move {
        server
            .serve_connection(StreamTransport::new(server_io).into_connection())
            .await
    });

    let mut peer = RawPeer::new(client_io);
    let started = Instant::now();
    assert!(peer.recv().await.is_none());
    assert!(started.elapsed() >= Duration::from_secs(2));
    assert!(served.await.unwrap().is_err());
}

#[tokio::test(start_paused = true)]
async fn test_connect_times_out_without_confirmation() {
    let (transport, mut peer) = raw_pair();
    tokio::spawn(async move { while peer.recv().await.is_some() {} });

    let started = Instant::now();
    let err = setup_client("setup")
        .connect_timeout(Duration::from_secs(1))
        .connect(transport)
        .await
        .unwrap_err();
    assert!(matches!(err, RSocketError::Connect(_)), "unexpected error: {err}");
    assert!(started.elapsed() >= Duration::from_secs(1));
}

#[tokio::test(start_paused = true)]
async fn test_keepalive_timeout_closes_connection() {
    let (transport, mut peer) = raw_pair();
    let keepalives = Arc::new(AtomicUsize::new(0));
    let seen = keepalives.clone();
    tokio::spawn(async move {
        peer.accept_setup().await;
        while let Some(frame) = peer.recv().await {
            if matches!(frame.body, FrameBody::KeepAlive { .. }) {
                seen.fetch_add(1, Ordering::SeqCst);
            }
        }
    });

    let (closed_tx, closed_rx) = oneshot::channel();
    let client = setup_client("setup")
        .keepalive(Duration::from_secs(1), Duration::from_secs(3))
        .on_close(move |cause| {
            let _ = closed_tx.send(matches!(cause, RSocketError::KeepaliveTimeout(_)));
        })
        .connect(transport)
        .await
        .unwrap();

    client.closed().await;
    assert!(closed_rx.await.unwrap());
    assert!(keepalives.load(Ordering::SeqCst) >= 2);
}

#[tokio::test]
async fn test_keepalive_answered_by_server() {
    let (client_io, server_io) = duplex(PIPE_SIZE);
    let server = demo_server(Arc::new(TestResponder::default()));
    tokio::spawn(async move {
        let _ = server
            .serve_connection(StreamTransport::new(server_io).into_connection())
            .await;
    });

    let mut peer = RawPeer::new(client_io);
    peer.send(Frame::setup(SetupPayload::from_str("setup", ""))).await;
    peer.send(Frame::keepalive(true, 0, Bytes::from_static(b"hi"))).await;

    let reply = peer.recv().await.unwrap();
    assert_eq!(reply, Frame::keepalive(false, 0, Bytes::from_static(b"hi")));
}

#[tokio::test]
async fn test_tcp_loopback() {
    let transport = TcpServerTransport::bind("127.0.0.1:0").await.unwrap();
    let addr = transport.local_addr().unwrap();
    let server = demo_server(Arc::new(TestResponder::default()));
    tokio::spawn(async move { server.serve(transport).await });

    let client = setup_client("setup")
        .connect_timeout(Duration::from_secs(1))
        .connect(TcpClientTransport::new(addr.to_string()))
        .await
        .unwrap();

    let answer = client
        .request_response_timeout(Payload::from_str("data", "metadata"), Duration::from_secs(1))
        .await
        .unwrap();
    assert_eq!(answer.data_utf8(), Some("data"));
    assert_eq!(answer.metadata_utf8(), Some("meta"));

    let err = setup_client("nope")
        .connect(TcpClientTransport::new(addr.to_string()))
        .await
        .unwrap_err();
    assert!(matches!(err, RSocketError::SetupRejected(_)));
}

#[tokio::test]
async fn test_websocket_loopback() {
    let transport = WebSocketServerTransport::bind("127.0.0.1:0", "/events")
        .await
        .unwrap();
    let addr = transport.local_addr().unwrap();
    let server = demo_server(Arc::new(TestResponder::default()));
    tokio::spawn(async move { server.serve(transport).await });

    let client = setup_client("setup")
        .connect_timeout(Duration::from_secs(1))
        .connect(WebSocketClientTransport::from_addr(addr, "/events"))
        .await
        .unwrap();

    let answer = client
        .request_response_timeout(Payload::from_str("data", "metadata"), Duration::from_secs(1))
        .await
        .unwrap();
    assert_eq!(answer.data_utf8(), Some("data"));
    assert_eq!(answer.metadata_utf8(), Some("meta"));
    client.close().await;
}

#[tokio::test]
async fn test_websocket_wrong_path_fails_connect() {
    let transport = WebSocketServerTransport::bind("127.0.0.1:0", "/events")
        .await
        .unwrap();
    let addr = transport.local_addr().unwrap();
    tokio::spawn(async move { Server::builder().build().serve(transport).await });

    let err = setup_client("setup")
        .connect_timeout(Duration::from_secs(1))
        .connect(WebSocketClientTransport::from_addr(addr, "/other"))
        .await
        .unwrap_err();
    assert!(matches!(err, RSocketError::Connect(_)), "unexpected error: {err}");
}

#[tokio::test]
async fn test_connect_refused() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let err = setup_client("setup")
        .connect_timeout(Duration::from_secs(1))
        .connect(TcpClientTransport::new(addr.to_string()))
        .await
        .unwrap_err();
    assert!(matches!(err, RSocketError::Connect(_)));
}
