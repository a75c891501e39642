//! The responder capability set.

use std::future::Future;
use std::marker::PhantomData;

use futures_util::stream;

use super::{BoxFuture, BoxStream};
use crate::error::{RSocketError, Result};
use crate::payload::Payload;

/// Business logic answering peer requests.
///
/// Every method has a default, so implementors override only the
/// interactions they support. Futures and streams are `'static`; clone what
/// the handler needs out of `&self` before moving it into them.
pub trait RSocket: Send + Sync + 'static {
    /// A request that expects no answer.
    fn fire_and_forget(&self, payload: Payload) {
        tracing::debug!(len = payload.len(), "fire-and-forget ignored");
    }

    /// Connection-level metadata from the peer.
    fn metadata_push(&self, payload: Payload) {
        tracing::debug!(len = payload.len(), "metadata-push ignored");
    }

    /// A request answered by exactly one payload or an error.
    fn request_response(&self, _payload: Payload) -> BoxFuture<'static, Result<Payload>> {
        Box::pin(async { Err(RSocketError::application("not implemented")) })
    }

    /// A request answered by a finite stream of payloads.
    fn request_stream(&self, _payload: Payload) -> BoxStream<'static, Result<Payload>> {
        Box::pin(stream::empty())
    }

    /// A bidirectional stream. `inputs` yields the initial payload first.
    fn request_channel(
        &self,
        _inputs: BoxStream<'static, Payload>,
    ) -> BoxStream<'static, Result<Payload>> {
        Box::pin(stream::empty())
    }
}

/// Responder that uses every default.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmptyRSocket;

impl RSocket for EmptyRSocket {}

/// Request/response handler built from a closure.
///
/// # Example
///
/// ```
/// use rsocket_wire::handler::RequestResponseFn;
/// use rsocket_wire::Payload;
///
/// let echo = RequestResponseFn::new(|payload: Payload| async move { Ok(payload) });
/// ```
pub struct RequestResponseFn<F, Fut>
where
    F: Fn(Payload) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Payload>> + Send + 'static,
{
    handler: F,
    _phantom: PhantomData<fn() -> Fut>,
}

impl<F, Fut> RequestResponseFn<F, Fut>
where
    F: Fn(Payload) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Payload>> + Send + 'static,
{
    pub fn new(handler: F) -> Self {
        Self {
            handler,
            _phantom: PhantomData,
        }
    }
}

impl<F, Fut> RSocket for RequestResponseFn<F, Fut>
where
    F: Fn(Payload) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Payload>> + Send + 'static,
{
    fn request_response(&self, payload: Payload) -> BoxFuture<'static, Result<Payload>> {
        Box::pin((self.handler)(payload))
    }
}
