//! Setup acceptance.
//!
//! A server runs its acceptor once per connection with the peer's SETUP
//! payload and a [`Requester`] for server-initiated requests. Returning a
//! responder accepts the connection; returning a message rejects it with
//! REJECTED_SETUP.

use std::sync::Arc;

use super::RSocket;
use crate::payload::SetupPayload;
use crate::requester::Requester;

/// Outcome of an acceptor: the responder for the connection, or a rejection message.
pub type AcceptResult = std::result::Result<Arc<dyn RSocket>, String>;

/// Acceptor stored by the server.
pub type Acceptor = dyn Fn(&SetupPayload, Requester) -> AcceptResult + Send + Sync;

/// Acceptor taking every connection and answering with `responder`.
pub fn accept_all(responder: Arc<dyn RSocket>) -> Arc<Acceptor> {
    Arc::new(move |_setup: &SetupPayload, _requester: Requester| -> AcceptResult {
        Ok(responder.clone())
    })
}

/// Acceptor taking connections whose setup data equals `expected`, ignoring ASCII case.
pub fn accept_if_data_equals(expected: impl Into<String>, responder: Arc<dyn RSocket>) -> Arc<Acceptor> {
    let expected = expected.into();
    Arc::new(move |setup: &SetupPayload, _requester: Requester| -> AcceptResult {
        if setup_data_equals(setup, &expected) {
            Ok(responder.clone())
        } else {
            Err(format!(
                "unexpected setup data {:?}",
                String::from_utf8_lossy(&setup.payload.data)
            ))
        }
    })
}

/// Whether the setup data is `expected`, ignoring ASCII case.
pub fn setup_data_equals(setup: &SetupPayload, expected: &str) -> bool {
    setup
        .data_utf8()
        .is_some_and(|data| data.eq_ignore_ascii_case(expected))
}
