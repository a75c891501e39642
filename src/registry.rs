//! Stream registry: the arena of live streams on one connection.
//!
//! Both the read loop (incoming frames) and request-issuing callers (new
//! streams) mutate the registry, so every access goes through one
//! `parking_lot::Mutex`. The lock is never held across an await point; the
//! callbacks passed to [`StreamRegistry::with_stream`] must not block.
//!
//! Stream IDs are allocated per side: the client uses odd IDs (1, 3, 5, ...)
//! and the server even IDs (2, 4, 6, ...). IDs increase monotonically and,
//! after wrapping at 2^31, skip any ID that is still live.

use std::collections::HashMap;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};

use crate::error::{RSocketError, Result};
use crate::payload::Payload;
use crate::protocol::MAX_STREAM_ID;
use crate::stream::{RequestResponseStream, StreamState};

/// Which end of the connection allocates IDs from this registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamSide {
    /// Odd stream IDs.
    Client,
    /// Even stream IDs.
    Server,
}

impl StreamSide {
    /// First ID this side allocates.
    pub fn first_id(self) -> u32 {
        match self {
            Self::Client => 1,
            Self::Server => 2,
        }
    }

    /// Whether `stream_id` was allocated by this side.
    pub fn owns(self, stream_id: u32) -> bool {
        stream_id != 0 && (stream_id % 2 == 1) == (self == Self::Client)
    }

    /// The other side.
    pub fn peer(self) -> Self {
        match self {
            Self::Client => Self::Server,
            Self::Server => Self::Client,
        }
    }
}

/// What kind of stream a record tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    /// Our request/response, awaiting one answer.
    RequestResponse,
    /// Our request-stream, receiving many answers.
    Subscriber,
    /// A peer request being served by our handler.
    Responder,
}

/// Snapshot returned by [`StreamRegistry::lookup`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamHandle {
    pub stream_id: u32,
    pub kind: StreamKind,
    /// State of request/response streams; `None` for other kinds.
    pub state: Option<StreamState>,
}

/// A live stream.
#[derive(Debug)]
pub enum StreamRecord {
    /// Requester side of a request/response.
    RequestResponse(RequestResponseStream),
    /// Requester side of a request-stream.
    Subscriber {
        items: mpsc::UnboundedSender<Result<Payload>>,
    },
    /// Responder side of any peer request.
    Responder {
        /// Fired to abort the handler task when the peer cancels.
        cancel: Option<oneshot::Sender<()>>,
        /// Feeds PAYLOAD frames into a request-channel handler.
        inbound: Option<mpsc::UnboundedSender<Payload>>,
    },
}

impl StreamRecord {
    /// Kind of this record.
    pub fn kind(&self) -> StreamKind {
        match self {
            Self::RequestResponse(_) => StreamKind::RequestResponse,
            Self::Subscriber { .. } => StreamKind::Subscriber,
            Self::Responder { .. } => StreamKind::Responder,
        }
    }

    /// A request/response that reached a terminal state.
    fn is_settled(&self) -> bool {
        matches!(self, Self::RequestResponse(stream) if stream.state().is_terminal())
    }

    /// Force the record into its cancelled state, notifying whoever waits on it.
    fn force_cancel(self, cause: &dyn Fn() -> RSocketError) {
        match self {
            Self::RequestResponse(mut stream) => {
                stream.cancel(cause());
            }
            Self::Subscriber { items } => {
                let _ = items.send(Err(cause()));
            }
            Self::Responder { cancel, .. } => {
                if let Some(cancel) = cancel {
                    let _ = cancel.send(());
                }
            }
        }
    }
}

struct Inner {
    streams: HashMap<u32, StreamRecord>,
    next_id: u32,
    closed: bool,
}

/// Registry of all live streams on a connection.
pub struct StreamRegistry {
    side: StreamSide,
    inner: Mutex<Inner>,
}

impl StreamRegistry {
    /// Create an empty registry for one side of a connection.
    pub fn new(side: StreamSide) -> Self {
        Self {
            side,
            inner: Mutex::new(Inner {
                streams: HashMap::new(),
                next_id: side.first_id(),
                closed: false,
            }),
        }
    }

    /// Side whose IDs this registry allocates.
    pub fn side(&self) -> StreamSide {
        self.side
    }

    /// Allocate the next local stream ID and register the record built for it.
    ///
    /// # Errors
    ///
    /// `TransportClosed` once the registry has been closed.
    pub fn allocate<F>(&self, make: F) -> Result<u32>
    where
        F: FnOnce(u32) -> StreamRecord,
    {
        let mut inner = self.inner.lock();
        let id = self.next_free_id(&mut inner)?;
        inner.streams.insert(id, make(id));
        Ok(id)
    }

    /// Allocate a local stream ID without registering anything under it.
    ///
    /// Fire-and-forget requests need an ID but never get an answer.
    pub fn allocate_id(&self) -> Result<u32> {
        let mut inner = self.inner.lock();
        self.next_free_id(&mut inner)
    }

    fn next_free_id(&self, inner: &mut Inner) -> Result<u32> {
        if inner.closed {
            return Err(RSocketError::TransportClosed);
        }

        let first = self.side.first_id();
        let mut id = inner.next_id;
        while inner.streams.contains_key(&id) {
            id = advance(id, first);
            if id == inner.next_id {
                return Err(RSocketError::Protocol("no free stream ids".to_string()));
            }
        }

        inner.next_id = advance(id, first);
        Ok(id)
    }

    /// Register a record under an ID chosen by the peer.
    ///
    /// # Errors
    ///
    /// `TransportClosed` once closed; `Protocol` if the ID is already live.
    pub fn register(&self, stream_id: u32, record: StreamRecord) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(RSocketError::TransportClosed);
        }
        if inner.streams.contains_key(&stream_id) {
            return Err(RSocketError::Protocol(format!(
                "stream {stream_id} is already live"
            )));
        }
        inner.streams.insert(stream_id, record);
        Ok(())
    }

    /// Look up a live stream.
    pub fn lookup(&self, stream_id: u32) -> Option<StreamHandle> {
        let inner = self.inner.lock();
        inner.streams.get(&stream_id).map(|record| StreamHandle {
            stream_id,
            kind: record.kind(),
            state: match record {
                StreamRecord::RequestResponse(stream) => Some(stream.state()),
                _ => None,
            },
        })
    }

    /// Run `f` against a live record while holding the lock.
    pub fn with_stream<R>(&self, stream_id: u32, f: impl FnOnce(&mut StreamRecord) -> R) -> Option<R> {
        let mut inner = self.inner.lock();
        inner.streams.get_mut(&stream_id).map(f)
    }

    /// State of a request/response stream.
    pub fn state(&self, stream_id: u32) -> Option<StreamState> {
        self.lookup(stream_id).and_then(|handle| handle.state)
    }

    /// Remove a stream. Releasing an unknown or already released ID is a no-op.
    pub fn release(&self, stream_id: u32) -> Option<StreamRecord> {
        self.inner.lock().streams.remove(&stream_id)
    }

    /// Number of live streams.
    pub fn len(&self) -> usize {
        self.inner.lock().streams.len()
    }

    /// Whether no stream is live.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether [`close`](Self::close) has run.
    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    /// Tear down: cancel every live stream and refuse new ones.
    ///
    /// Waiters see the error produced by `cause`. Request/response records
    /// that already ended stay until their owner releases them, so their
    /// final state remains readable. Returns how many streams were
    /// cancelled; a second call cancels nothing.
    pub fn close(&self, cause: &dyn Fn() -> RSocketError) -> usize {
        let drained: Vec<StreamRecord> = {
            let mut inner = self.inner.lock();
            inner.closed = true;
            let (settled, live): (HashMap<_, _>, HashMap<_, _>) =
                std::mem::take(&mut inner.streams)
                    .into_iter()
                    .partition(|(_, record)| record.is_settled());
            inner.streams = settled;
            live.into_values().collect()
        };

        let count = drained.len();
        for record in drained {
            record.force_cancel(cause);
        }
        count
    }
}

fn advance(id: u32, first: u32) -> u32 {
    match id.checked_add(2) {
        Some(next) if next <= MAX_STREAM_ID => next,
        _ => first,
    }
}
