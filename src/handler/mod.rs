//! Handler module - what a connection does with peer requests.
//!
//! Provides:
//! - [`RSocket`] - the responder trait, with defaults for every interaction
//! - [`RequestResponseFn`] - a responder built from a closure
//! - [`Acceptor`] helpers deciding whether a SETUP is accepted
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use rsocket_wire::handler::{accept_if_data_equals, BoxFuture, RSocket};
//! use rsocket_wire::{Payload, Result};
//!
//! struct Fixed;
//!
//! impl RSocket for Fixed {
//!     fn request_response(&self, _payload: Payload) -> BoxFuture<'static, Result<Payload>> {
//!         Box::pin(async { Ok(Payload::from_str("data", "meta")) })
//!     }
//! }
//!
//! let acceptor = accept_if_data_equals("setup", Arc::new(Fixed));
//! ```

mod acceptor;
mod responder;

use std::future::Future;
use std::pin::Pin;

pub use acceptor::{accept_all, accept_if_data_equals, setup_data_equals, AcceptResult, Acceptor};
pub use responder::{EmptyRSocket, RSocket, RequestResponseFn};

/// Boxed future for handler results.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Boxed stream for handler outputs.
pub type BoxStream<'a, T> = futures_util::stream::BoxStream<'a, T>;
