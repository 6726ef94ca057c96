//! Responses: status, headers, and a lazy body tied to pool accounting.

use http::HeaderMap;

use crate::body::Body;
use crate::request::Extensions;

/// A response returned by [`crate::pool::ConnectionPool::handle_request`].
///
/// The body is explicit: callers must read or close it (§3). Dropping a
/// `Response` without consuming its body is a usage error whose defined
/// recovery is documented on [`crate::body::Body`] — the underlying
/// connection is closed rather than returned to the pool.
#[derive(Debug)]
pub struct Response {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Body,
    pub extensions: Extensions,
}

impl Response {
    pub(crate) fn new(status: u16, headers: HeaderMap, body: Body, extensions: Extensions) -> Response {
        Response {
            status,
            headers,
            body,
            extensions,
        }
    }

    /// The negotiated protocol, if the connection reported one: `"HTTP/1.1"`
    /// or `"HTTP/2"`.
    pub fn http_version(&self) -> Option<&'static str> {
        self.extensions.http_version
    }

    /// Reads the entire body into memory and consumes it, leaving `body`
    /// empty. Equivalent to the `request()` convenience entry point (§6).
    pub async fn read(&mut self) -> crate::Result<bytes::Bytes> {
        self.body.read_to_end().await
    }
}
