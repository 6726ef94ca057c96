//! The polymorphic [`Connection`]: one of HTTP/1.1, HTTP/2, a lazily
//! negotiating connection, or a proxy connection wrapping one of those.
//!
//! Modeled as a closed enum rather than `Box<dyn Trait>` (§9 Design Notes):
//! the variant set is fixed, and the suspending methods take different
//! internal locking paths per variant, so there's no seam that benefits
//! from dynamic dispatch.

mod h1;
pub(crate) mod http1;
pub(crate) mod http2;
pub(crate) mod negotiating;

use crate::net::NetworkBackend;
use crate::origin::Origin;
use crate::request::Request;
use crate::response::Response;

/// Per-connection lifecycle state (§3).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum State {
    New,
    Active,
    Idle,
    Closed,
}

impl State {
    pub(crate) fn name(&self) -> &'static str {
        match self {
            State::New => "new",
            State::Active => "active",
            State::Idle => "idle",
            State::Closed => "closed",
        }
    }
}

/// A non-suspending snapshot of a connection's identity, for logging and
/// diagnostics (`info()` in §9's capability set).
#[derive(Clone, Debug)]
pub struct ConnectionInfo {
    pub origin: Origin,
    pub protocol: &'static str,
    pub state: &'static str,
    pub request_count: u64,
}

/// The capability set every connection variant implements (§9): accept a
/// request, report routing/availability/expiry predicates, and close.
pub(crate) enum Connection {
    Http1(http1::HTTP11Connection),
    Http2(http2::HTTP2Connection),
    Negotiating(negotiating::NegotiatingConnection),
    ForwardProxy(crate::proxy::forward::ForwardProxyConnection),
    TunnelProxy(crate::proxy::tunnel::TunnelProxyConnection),
}

impl Connection {
    pub(crate) fn origin(&self) -> &Origin {
        match self {
            Connection::Http1(c) => c.origin(),
            Connection::Http2(c) => c.origin(),
            Connection::Negotiating(c) => c.origin(),
            Connection::ForwardProxy(c) => c.origin(),
            Connection::TunnelProxy(c) => c.origin(),
        }
    }

    pub(crate) fn can_handle_request(&self, origin: &Origin) -> bool {
        match self {
            Connection::Http1(c) => c.can_handle_request(origin),
            Connection::Http2(c) => c.can_handle_request(origin),
            Connection::Negotiating(c) => c.can_handle_request(origin),
            Connection::ForwardProxy(c) => c.can_handle_request(origin),
            Connection::TunnelProxy(c) => c.can_handle_request(origin),
        }
    }

    /// Optimistic for a `New` negotiating connection that might turn out to
    /// be HTTP/2-multiplexable (§4.4): a pool may hand it to more than one
    /// waiter before the protocol is known.
    pub(crate) fn is_available(&self) -> bool {
        match self {
            Connection::Http1(c) => c.is_available(),
            Connection::Http2(c) => c.is_available(),
            Connection::Negotiating(c) => c.is_available(),
            Connection::ForwardProxy(c) => c.is_available(),
            Connection::TunnelProxy(c) => c.is_available(),
        }
    }

    pub(crate) fn is_idle(&self) -> bool {
        match self {
            Connection::Http1(c) => c.is_idle(),
            Connection::Http2(c) => c.is_idle(),
            Connection::Negotiating(c) => c.is_idle(),
            Connection::ForwardProxy(c) => c.is_idle(),
            Connection::TunnelProxy(c) => c.is_idle(),
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        match self {
            Connection::Http1(c) => c.is_closed(),
            Connection::Http2(c) => c.is_closed(),
            Connection::Negotiating(c) => c.is_closed(),
            Connection::ForwardProxy(c) => c.is_closed(),
            Connection::TunnelProxy(c) => c.is_closed(),
        }
    }

    pub(crate) fn has_expired(&self) -> bool {
        match self {
            Connection::Http1(c) => c.has_expired(),
            Connection::Http2(c) => c.has_expired(),
            Connection::Negotiating(c) => c.has_expired(),
            Connection::ForwardProxy(c) => c.has_expired(),
            Connection::TunnelProxy(c) => c.has_expired(),
        }
    }

    pub(crate) fn info(&self) -> ConnectionInfo {
        match self {
            Connection::Http1(c) => c.info(),
            Connection::Http2(c) => c.info(),
            Connection::Negotiating(c) => c.info(),
            Connection::ForwardProxy(c) => c.info(),
            Connection::TunnelProxy(c) => c.info(),
        }
    }

    pub(crate) async fn close(&self) {
        match self {
            Connection::Http1(c) => c.close().await,
            Connection::Http2(c) => c.close().await,
            Connection::Negotiating(c) => c.close().await,
            Connection::ForwardProxy(c) => c.close().await,
            Connection::TunnelProxy(c) => c.close().await,
        }
    }

    pub(crate) async fn try_close(&self) -> bool {
        match self {
            Connection::Http1(c) => c.try_close().await,
            Connection::Http2(c) => c.try_close().await,
            Connection::Negotiating(c) => c.try_close().await,
            Connection::ForwardProxy(c) => c.try_close().await,
            Connection::TunnelProxy(c) => c.try_close().await,
        }
    }

    pub(crate) async fn handle_request(&self, request: &mut Request) -> crate::Result<Response> {
        match self {
            Connection::Http1(c) => c.handle_request(request).await,
            Connection::Http2(c) => c.handle_request(request).await,
            Connection::Negotiating(c) => c.handle_request(request).await,
            Connection::ForwardProxy(c) => c.handle_request(request).await,
            Connection::TunnelProxy(c) => c.handle_request(request).await,
        }
    }
}

/// Parameters needed to create a connection for a freshly admitted origin
/// (§4.6 step 5, `create_connection`).
pub(crate) struct ConnectionParams {
    pub backend: std::sync::Arc<dyn NetworkBackend>,
    pub http1: bool,
    pub http2: bool,
    pub connect_timeout: Option<std::time::Duration>,
    pub keepalive_expiry: Option<std::time::Duration>,
    pub retries: u32,
    pub local_address: Option<std::net::IpAddr>,
}

pub(crate) fn create_plain(origin: Origin, params: std::sync::Arc<ConnectionParams>) -> Connection {
    Connection::Negotiating(negotiating::NegotiatingConnection::new(origin, params))
}
