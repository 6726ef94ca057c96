//! The per-request observability hook.
//!
//! Every suspension-adjacent step of a request (TCP connect, TLS handshake,
//! header send, body send, header receive, body receive, pool release) fires
//! a named event through this callback, in addition to a `tracing::debug!`
//! event at the same call site when the `tracing` feature is on.

use std::fmt;
use std::sync::Arc;

/// A named lifecycle event plus a small set of key/value pairs, formatted
/// with `{:?}` by the call site before being handed to the callback.
pub type Kwargs<'a> = &'a [(&'static str, String)];

/// A per-request trace callback.
///
/// Cloning an [`Extensions`](crate::request::Extensions) clones the `Arc`,
/// not the closure itself.
#[derive(Clone)]
pub struct Trace(Arc<dyn Fn(&str, Kwargs<'_>) + Send + Sync>);

impl Trace {
    /// Wraps a closure as a trace callback.
    pub fn new<F>(f: F) -> Trace
    where
        F: Fn(&str, Kwargs<'_>) + Send + Sync + 'static,
    {
        Trace(Arc::new(f))
    }

    pub(crate) fn call(&self, name: &str, kwargs: Kwargs<'_>) {
        (self.0)(name, kwargs)
    }
}

impl fmt::Debug for Trace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Trace(..)")
    }
}

/// Event names fired during connection setup, request framing, and teardown
/// (§6 of the design).
pub mod event {
    pub const CONNECT_TCP_STARTED: &str = "connection.connect_tcp.started";
    pub const CONNECT_TCP_COMPLETE: &str = "connection.connect_tcp.complete";
    pub const CONNECT_TCP_FAILED: &str = "connection.connect_tcp.failed";
    pub const START_TLS_STARTED: &str = "connection.start_tls.started";
    pub const START_TLS_COMPLETE: &str = "connection.start_tls.complete";
    pub const START_TLS_FAILED: &str = "connection.start_tls.failed";
    pub const SEND_REQUEST_HEADERS_STARTED: &str = "http11.send_request_headers.started";
    pub const SEND_REQUEST_HEADERS_COMPLETE: &str = "http11.send_request_headers.complete";
    pub const SEND_REQUEST_BODY_STARTED: &str = "http11.send_request_body.started";
    pub const SEND_REQUEST_BODY_COMPLETE: &str = "http11.send_request_body.complete";
    pub const RECEIVE_RESPONSE_HEADERS_STARTED: &str = "http11.receive_response_headers.started";
    pub const RECEIVE_RESPONSE_HEADERS_COMPLETE: &str =
        "http11.receive_response_headers.complete";
    pub const RECEIVE_RESPONSE_HEADERS_FAILED: &str = "http11.receive_response_headers.failed";
    pub const RECEIVE_RESPONSE_BODY_STARTED: &str = "http11.receive_response_body.started";
    pub const RECEIVE_RESPONSE_BODY_COMPLETE: &str = "http11.receive_response_body.complete";
    pub const RESPONSE_CLOSED_STARTED: &str = "http11.response_closed.started";
    pub const RESPONSE_CLOSED_COMPLETE: &str = "http11.response_closed.complete";
}
