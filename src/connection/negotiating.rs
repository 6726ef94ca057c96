//! The lazy/negotiating connection: connects, optionally negotiates TLS +
//! ALPN, and becomes an HTTP/1.1 or HTTP/2 connection on the first request
//! (§4.4).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex as AsyncMutex;
use tokio::time::sleep;

use super::http1::HTTP11Connection;
use super::http2::HTTP2Connection;
use super::{Connection, ConnectionInfo, ConnectionParams};
use crate::error::Error;
use crate::net::ExtraInfo;
use crate::origin::Origin;
use crate::request::Request;
use crate::response::Response;
use crate::trace::event;

enum Inner {
    Http1(HTTP11Connection),
    Http2(HTTP2Connection),
}

/// Holds an origin, backend, and protocol preferences; becomes one of
/// `Inner`'s variants the first time a request is handled.
pub(crate) struct NegotiatingConnection {
    origin: Origin,
    params: Arc<ConnectionParams>,
    connect_lock: AsyncMutex<()>,
    inner: AsyncMutex<Option<Inner>>,
    failed: AtomicBool,
}

impl NegotiatingConnection {
    pub(crate) fn new(origin: Origin, params: Arc<ConnectionParams>) -> NegotiatingConnection {
        NegotiatingConnection {
            origin,
            params,
            connect_lock: AsyncMutex::new(()),
            inner: AsyncMutex::new(None),
            failed: AtomicBool::new(false),
        }
    }

    pub(crate) fn origin(&self) -> &Origin {
        &self.origin
    }

    pub(crate) fn can_handle_request(&self, origin: &Origin) -> bool {
        &self.origin == origin
    }

    /// Optimistic while still negotiating: a not-yet-negotiated connection
    /// is reported available so the pool may hand it to a waiter; if
    /// negotiation resolves to HTTP/1.1, a second concurrent waiter will
    /// get `ConnectionNotAvailable` from the inner connection and retry
    /// (§4.6 Request handling step 4).
    pub(crate) fn is_available(&self) -> bool {
        if self.failed.load(Ordering::Acquire) {
            return false;
        }
        match self.inner.try_lock() {
            Ok(guard) => match guard.as_ref() {
                None => true,
                Some(Inner::Http1(c)) => c.is_available(),
                Some(Inner::Http2(c)) => c.is_available(),
            },
            Err(_) => true,
        }
    }

    pub(crate) fn is_idle(&self) -> bool {
        match self.inner.try_lock() {
            Ok(guard) => match guard.as_ref() {
                None => false,
                Some(Inner::Http1(c)) => c.is_idle(),
                Some(Inner::Http2(c)) => c.is_idle(),
            },
            Err(_) => false,
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        if self.failed.load(Ordering::Acquire) {
            return true;
        }
        match self.inner.try_lock() {
            Ok(guard) => match guard.as_ref() {
                None => false,
                Some(Inner::Http1(c)) => c.is_closed(),
                Some(Inner::Http2(c)) => c.is_closed(),
            },
            Err(_) => false,
        }
    }

    pub(crate) fn has_expired(&self) -> bool {
        match self.inner.try_lock() {
            Ok(guard) => match guard.as_ref() {
                None => false,
                Some(Inner::Http1(c)) => c.has_expired(),
                Some(Inner::Http2(c)) => c.has_expired(),
            },
            Err(_) => false,
        }
    }

    pub(crate) fn info(&self) -> ConnectionInfo {
        match self.inner.try_lock() {
            Ok(guard) => match guard.as_ref() {
                None => ConnectionInfo {
                    origin: self.origin.clone(),
                    protocol: "?",
                    state: "new",
                    request_count: 0,
                },
                Some(Inner::Http1(c)) => c.info(),
                Some(Inner::Http2(c)) => c.info(),
            },
            Err(_) => ConnectionInfo {
                origin: self.origin.clone(),
                protocol: "?",
                state: "new",
                request_count: 0,
            },
        }
    }

    pub(crate) async fn close(&self) {
        self.failed.store(true, Ordering::Release);
        if let Some(inner) = self.inner.lock().await.as_ref() {
            match inner {
                Inner::Http1(c) => c.close().await,
                Inner::Http2(c) => c.close().await,
            }
        }
    }

    pub(crate) async fn try_close(&self) -> bool {
        match self.inner.lock().await.as_ref() {
            None => {
                self.failed.store(true, Ordering::Release);
                true
            }
            Some(Inner::Http1(c)) => c.try_close().await,
            Some(Inner::Http2(c)) => c.try_close().await,
        }
    }

    pub(crate) async fn handle_request(&self, request: &mut Request) -> crate::Result<Response> {
        if self.origin != request.url.origin() {
            return Err(Error::connection_not_available());
        }

        let guard = self.connect_lock.lock().await;
        {
            let inner = self.inner.lock().await;
            if let Some(existing) = inner.as_ref() {
                let existing = match existing {
                    Inner::Http1(c) => Connection::Http1(c.clone()),
                    Inner::Http2(c) => Connection::Http2(c.clone()),
                };
                drop(inner);
                drop(guard);
                return existing.handle_request(request).await;
            }
        }

        let established = self.connect_with_retries(&request.extensions).await;
        let established = match established {
            Ok(inner) => inner,
            Err(e) => {
                self.failed.store(true, Ordering::Release);
                return Err(e);
            }
        };
        *self.inner.lock().await = Some(established);
        drop(guard);

        let inner = self.inner.lock().await;
        let connection = match inner.as_ref().unwrap() {
            Inner::Http1(c) => Connection::Http1(c.clone()),
            Inner::Http2(c) => Connection::Http2(c.clone()),
        };
        drop(inner);
        connection.handle_request(request).await
    }

    async fn connect_with_retries(&self, extensions: &crate::request::Extensions) -> crate::Result<Inner> {
        let mut attempt = 0;
        loop {
            match self.connect_once(extensions).await {
                Ok(inner) => return Ok(inner),
                Err(e) if e.is_connect() && attempt < self.params.retries => {
                    attempt += 1;
                    sleep(backoff(attempt)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn connect_once(&self, extensions: &crate::request::Extensions) -> crate::Result<Inner> {
        trace_event!(extensions, event::CONNECT_TCP_STARTED);
        let connect_result = self
            .params
            .backend
            .connect(&self.origin, self.params.connect_timeout, self.params.local_address)
            .await;
        let stream = match connect_result {
            Ok(s) => {
                trace_event!(extensions, event::CONNECT_TCP_COMPLETE);
                s
            }
            Err(e) => {
                trace_event!(extensions, event::CONNECT_TCP_FAILED);
                return Err(e);
            }
        };

        if !self.origin.scheme.is_secure() {
            return Ok(Inner::Http1(HTTP11Connection::new(
                self.origin.clone(),
                stream,
                self.params.keepalive_expiry,
            )));
        }

        let alpn: &[&str] = if self.params.http2 {
            &["http/1.1", "h2"]
        } else {
            &["http/1.1"]
        };

        trace_event!(extensions, event::START_TLS_STARTED);
        let tls_timeout = extensions.timeouts.connect;
        let tls_stream = match stream
            .start_tls(self.origin.host_str(), alpn, tls_timeout)
            .await
        {
            Ok(s) => {
                trace_event!(extensions, event::START_TLS_COMPLETE);
                s
            }
            Err(e) => {
                trace_event!(extensions, event::START_TLS_FAILED);
                return Err(e);
            }
        };

        let selected_h2 = matches!(
            tls_stream.extra_info("ssl_object"),
            Some(ExtraInfo::SslObject {
                alpn_protocol: Some(ref p),
                ..
            }) if p == "h2"
        );

        if selected_h2 && self.params.http2 {
            Ok(Inner::Http2(HTTP2Connection::new(
                self.origin.clone(),
                tls_stream,
                self.params.keepalive_expiry,
            )))
        } else {
            Ok(Inner::Http1(HTTP11Connection::new(
                self.origin.clone(),
                tls_stream,
                self.params.keepalive_expiry,
            )))
        }
    }
}

fn backoff(attempt: u32) -> Duration {
    Duration::from_millis(100u64.saturating_mul(1u64 << attempt.min(5)))
}
