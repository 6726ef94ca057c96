//! Tunnel-mode proxying: `CONNECT`, then TLS straight through to the
//! remote host over the now-opaque TCP pipe (§4.5).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use http::header::{ACCEPT, HOST};
use http::{HeaderMap, HeaderValue, Method};
use tokio::sync::Mutex as AsyncMutex;
use tokio::time::sleep;

use crate::connection::http1::HTTP11Connection;
use crate::connection::{ConnectionInfo, ConnectionParams};
use crate::error::Error;
use crate::origin::Origin;
use crate::request::{Extensions, Request, Url};
use crate::response::Response;

enum Inner {
    Pending,
    Ready(HTTP11Connection),
}

pub(crate) struct TunnelProxyConnection {
    proxy_origin: Origin,
    remote_origin: Origin,
    // Accepted for a constructor signature symmetric with
    // `ForwardProxyConnection::new`, but never merged into the `CONNECT`
    // request: the handshake only ever sends `Host`/`Accept` to the proxy.
    #[allow(dead_code)]
    proxy_headers: HeaderMap,
    params: Arc<ConnectionParams>,
    connect_lock: AsyncMutex<()>,
    inner: AsyncMutex<Inner>,
    failed: AtomicBool,
}

impl TunnelProxyConnection {
    pub(crate) fn new(
        proxy_origin: Origin,
        remote_origin: Origin,
        proxy_headers: HeaderMap,
        params: Arc<ConnectionParams>,
    ) -> TunnelProxyConnection {
        TunnelProxyConnection {
            proxy_origin,
            remote_origin,
            proxy_headers,
            params,
            connect_lock: AsyncMutex::new(()),
            inner: AsyncMutex::new(Inner::Pending),
            failed: AtomicBool::new(false),
        }
    }

    pub(crate) fn origin(&self) -> &Origin {
        &self.remote_origin
    }

    pub(crate) fn can_handle_request(&self, origin: &Origin) -> bool {
        &self.remote_origin == origin
    }

    pub(crate) fn is_available(&self) -> bool {
        if self.failed.load(Ordering::Acquire) {
            return false;
        }
        match self.inner.try_lock() {
            Ok(guard) => match &*guard {
                Inner::Pending => true,
                Inner::Ready(c) => c.is_available(),
            },
            Err(_) => true,
        }
    }

    pub(crate) fn is_idle(&self) -> bool {
        match self.inner.try_lock() {
            Ok(guard) => match &*guard {
                Inner::Pending => false,
                Inner::Ready(c) => c.is_idle(),
            },
            Err(_) => false,
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        if self.failed.load(Ordering::Acquire) {
            return true;
        }
        match self.inner.try_lock() {
            Ok(guard) => match &*guard {
                Inner::Pending => false,
                Inner::Ready(c) => c.is_closed(),
            },
            Err(_) => false,
        }
    }

    pub(crate) fn has_expired(&self) -> bool {
        match self.inner.try_lock() {
            Ok(guard) => match &*guard {
                Inner::Pending => false,
                Inner::Ready(c) => c.has_expired(),
            },
            Err(_) => false,
        }
    }

    pub(crate) fn info(&self) -> ConnectionInfo {
        match self.inner.try_lock() {
            Ok(guard) => match &*guard {
                Inner::Ready(c) => c.info(),
                Inner::Pending => ConnectionInfo {
                    origin: self.remote_origin.clone(),
                    protocol: "?",
                    state: "new",
                    request_count: 0,
                },
            },
            Err(_) => ConnectionInfo {
                origin: self.remote_origin.clone(),
                protocol: "?",
                state: "new",
                request_count: 0,
            },
        }
    }

    pub(crate) async fn close(&self) {
        self.failed.store(true, Ordering::Release);
        if let Inner::Ready(c) = &*self.inner.lock().await {
            c.close().await;
        }
    }

    pub(crate) async fn try_close(&self) -> bool {
        match &*self.inner.lock().await {
            Inner::Pending => {
                self.failed.store(true, Ordering::Release);
                true
            }
            Inner::Ready(c) => c.try_close().await,
        }
    }

    pub(crate) async fn handle_request(&self, request: &mut Request) -> crate::Result<Response> {
        if self.remote_origin != request.url.origin() {
            return Err(Error::connection_not_available());
        }

        let guard = self.connect_lock.lock().await;
        {
            let inner = self.inner.lock().await;
            if let Inner::Ready(c) = &*inner {
                let c = c.clone();
                drop(inner);
                drop(guard);
                return c.handle_request(request).await;
            }
        }

        let established = self.establish_tunnel(&request.extensions).await;
        let established = match established {
            Ok(c) => c,
            Err(e) => {
                self.failed.store(true, Ordering::Release);
                return Err(e);
            }
        };
        *self.inner.lock().await = Inner::Ready(established.clone());
        drop(guard);

        established.handle_request(request).await
    }

    async fn establish_tunnel(&self, extensions: &Extensions) -> crate::Result<HTTP11Connection> {
        let mut attempt = 0;
        loop {
            match self.establish_tunnel_once(extensions).await {
                Ok(c) => return Ok(c),
                Err(e) if e.is_connect() && attempt < self.params.retries => {
                    attempt += 1;
                    sleep(Duration::from_millis(100u64.saturating_mul(1u64 << attempt.min(5)))).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn establish_tunnel_once(&self, extensions: &Extensions) -> crate::Result<HTTP11Connection> {
        let stream = self
            .params
            .backend
            .connect(&self.proxy_origin, self.params.connect_timeout, self.params.local_address)
            .await?;
        let proxy_link = HTTP11Connection::new(self.proxy_origin.clone(), stream, None);

        let host_value = format!("{}:{}", self.remote_origin.host_str(), self.remote_origin.port);
        let mut headers = HeaderMap::new();
        headers.insert(
            HOST,
            HeaderValue::from_bytes(host_value.as_bytes()).map_err(Error::local_protocol)?,
        );
        headers.insert(ACCEPT, HeaderValue::from_static("*/*"));

        let mut connect_request = Request {
            method: Method::CONNECT,
            url: Url::new(
                self.proxy_origin.scheme,
                self.proxy_origin.host.clone(),
                Some(self.proxy_origin.port),
                host_value.into_bytes(),
            ),
            headers,
            body: crate::body::Body::empty(),
            extensions: Extensions::new().with_timeouts(extensions.timeouts),
        };

        let response = proxy_link.handle_request(&mut connect_request).await?;
        if !(200..300).contains(&response.status) {
            return Err(Error::proxy(response.status, "CONNECT rejected"));
        }

        let raw_stream = proxy_link.take_stream().await;

        let remote_stream = if self.remote_origin.scheme.is_secure() {
            raw_stream
                .start_tls(self.remote_origin.host_str(), &["http/1.1"], self.params.connect_timeout)
                .await?
        } else {
            raw_stream
        };

        Ok(HTTP11Connection::new(
            self.remote_origin.clone(),
            remote_stream,
            self.params.keepalive_expiry,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ConnectionParams;
    use crate::net::mock::MockBackend;
    use crate::origin::Scheme;

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
    fn accepts_only_the_exact_remote_origin() {
        let proxy_origin = Origin::new(Scheme::Http, "localhost", Some(8080));
        let remote_origin = Origin::new(Scheme::Https, "example.com", None);
        let conn = TunnelProxyConnection::new(proxy_origin, remote_origin.clone(), HeaderMap::new(), params());

        assert!(conn.can_handle_request(&remote_origin));
        assert!(!conn.can_handle_request(&Origin::new(Scheme::Https, "other.example", None)));
        assert!(!conn.can_handle_request(&Origin::new(Scheme::Http, "example.com", Some(80))));
    }
}
