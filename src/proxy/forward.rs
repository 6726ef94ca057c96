//! Forward-mode proxying: rewrite the request-target to absolute-form and
//! send it straight to the proxy (§4.5). Plaintext only — a forward proxy
//! cannot see inside a tunneled TLS session, so it only ever handles `http`
//! origins.

use http::HeaderMap;

use crate::connection::negotiating::NegotiatingConnection;
use crate::connection::{ConnectionInfo, ConnectionParams};
use crate::origin::{Origin, Scheme};
use crate::request::{Request, Url};
use crate::response::Response;

/// Holds the proxy link as a [`NegotiatingConnection`] directly rather than
/// the full [`crate::connection::Connection`] enum: that enum has a variant
/// wrapping this very struct, so embedding it here would make the type
/// infinitely recursive.
pub(crate) struct ForwardProxyConnection {
    proxy_origin: Origin,
    proxy_headers: HeaderMap,
    inner: NegotiatingConnection,
}

impl ForwardProxyConnection {
    pub(crate) fn new(
        proxy_origin: Origin,
        proxy_headers: HeaderMap,
        params: std::sync::Arc<ConnectionParams>,
    ) -> ForwardProxyConnection {
        ForwardProxyConnection {
            inner: NegotiatingConnection::new(proxy_origin.clone(), params),
            proxy_origin,
            proxy_headers,
        }
    }

    pub(crate) fn origin(&self) -> &Origin {
        &self.proxy_origin
    }

    /// Accepts any plaintext origin: the proxy link itself is what matters
    /// for routing, not the target the request is ultimately bound for.
    pub(crate) fn can_handle_request(&self, origin: &Origin) -> bool {
        origin.scheme == Scheme::Http
    }

    pub(crate) fn is_available(&self) -> bool {
        self.inner.is_available()
    }

    pub(crate) fn is_idle(&self) -> bool {
        self.inner.is_idle()
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    pub(crate) fn has_expired(&self) -> bool {
        self.inner.has_expired()
    }

    pub(crate) fn info(&self) -> ConnectionInfo {
        self.inner.info()
    }

    pub(crate) async fn close(&self) {
        self.inner.close().await
    }

    pub(crate) async fn try_close(&self) -> bool {
        self.inner.try_close().await
    }

    pub(crate) async fn handle_request(&self, request: &mut Request) -> crate::Result<Response> {
        // Host must reflect the real target, so synthesize it before the
        // URL below is temporarily replaced with the proxy's own origin.
        request.normalize_headers();

        for (name, value) in self.proxy_headers.iter() {
            if !request.headers.contains_key(name) {
                request.headers.append(name.clone(), value.clone());
            }
        }

        let absolute_target = request.url.to_string().into_bytes();
        let original_url = std::mem::replace(
            &mut request.url,
            Url::new(
                self.proxy_origin.scheme,
                self.proxy_origin.host.clone(),
                Some(self.proxy_origin.port),
                absolute_target,
            ),
        );

        let result = self.inner.handle_request(request).await;
        request.url = original_url;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ConnectionParams;
    use crate::net::mock::MockBackend;
    use std::sync::Arc;

    fn params() -> Arc<ConnectionParams> {
        Arc::new(ConnectionParams {
            backend: Arc::new(MockBackend::new()),
            http1: true,
            http2: false,
            connect_timeout: None,
            keepalive_expiry: None,
            retries: 0,
            local_address: None,
        })
    }

    #[test]
    fn accepts_any_http_origin_rejects_https() {
        let proxy_origin = Origin::new(Scheme::Http, "localhost", Some(8080));
        let conn = ForwardProxyConnection::new(proxy_origin, HeaderMap::new(), params());

        assert!(conn.can_handle_request(&Origin::new(Scheme::Http, "example.com", None)));
        assert!(conn.can_handle_request(&Origin::new(Scheme::Http, "other.example", Some(8888))));
        assert!(!conn.can_handle_request(&Origin::new(Scheme::Https, "example.com", None)));
    }
}
