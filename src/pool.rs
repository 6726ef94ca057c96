//! The connection pool: origin-keyed reuse, bounded admission, FIFO
//! fairness, LRU eviction, and keep-alive housekeeping (§4.6).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use crate::body::{Body, PoolRelease};
use crate::connection::{create_plain, Connection, ConnectionInfo, ConnectionParams};
use crate::error::{Error, Kind};
use crate::net::tcp::TcpBackend;
use crate::net::NetworkBackend;
use crate::origin::Origin;
use crate::proxy::forward::ForwardProxyConnection;
use crate::proxy::tunnel::TunnelProxyConnection;
use crate::proxy::{ProxyConfig, ProxyMode};
use crate::request::Request;
use crate::response::Response;
use crate::sync::Event;

/// Pool-wide configuration (§6 Configuration table).
pub struct PoolConfig {
    pub max_connections: usize,
    pub max_keepalive_connections: usize,
    pub keepalive_expiry: Option<Duration>,
    pub http1: bool,
    pub http2: bool,
    pub retries: u32,
    pub local_address: Option<std::net::IpAddr>,
    pub connect_timeout: Option<Duration>,
    pub backend: Arc<dyn NetworkBackend>,
    pub proxy: Option<ProxyConfig>,
}

impl PoolConfig {
    pub fn new() -> PoolConfig {
        PoolConfig::default()
    }

    pub fn with_max_connections(mut self, n: usize) -> PoolConfig {
        self.max_connections = n;
        self
    }

    pub fn with_max_keepalive_connections(mut self, n: usize) -> PoolConfig {
        self.max_keepalive_connections = n;
        self
    }

    pub fn with_keepalive_expiry(mut self, d: Option<Duration>) -> PoolConfig {
        self.keepalive_expiry = d;
        self
    }

    pub fn with_http2(mut self, enabled: bool) -> PoolConfig {
        self.http2 = enabled;
        self
    }

    pub fn with_retries(mut self, retries: u32) -> PoolConfig {
        self.retries = retries;
        self
    }

    pub fn with_backend(mut self, backend: Arc<dyn NetworkBackend>) -> PoolConfig {
        self.backend = backend;
        self
    }

    pub fn with_proxy(mut self, proxy: ProxyConfig) -> PoolConfig {
        self.proxy = Some(proxy);
        self
    }
}

impl Default for PoolConfig {
    fn default() -> PoolConfig {
        PoolConfig {
            max_connections: 100,
            max_keepalive_connections: 20,
            keepalive_expiry: Some(Duration::from_secs(5)),
            http1: true,
            http2: false,
            retries: 0,
            local_address: None,
            connect_timeout: None,
            backend: Arc::new(TcpBackend::default()),
            proxy: None,
        }
    }
}

impl std::fmt::Debug for PoolConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolConfig")
            .field("max_connections", &self.max_connections)
            .field("max_keepalive_connections", &self.max_keepalive_connections)
            .field("keepalive_expiry", &self.keepalive_expiry)
            .field("http1", &self.http1)
            .field("http2", &self.http2)
            .field("retries", &self.retries)
            .finish()
    }
}

/// A pending request's place in the FIFO queue (§4.6 "Request status").
struct Waiter {
    origin: Origin,
    ready: Event,
    assigned: StdMutex<Option<Arc<Connection>>>,
}

struct PoolState {
    /// MRU at front.
    entries: Vec<Arc<Connection>>,
    /// FIFO order.
    waiters: Vec<Arc<Waiter>>,
}

struct PoolShared {
    state: StdMutex<PoolState>,
    config: PoolConfig,
    params: Arc<ConnectionParams>,
}

/// The pool of pooled HTTP connections. Cheap to clone: clones share the
/// same pool state, the way [`crate::connection::http1::HTTP11Connection`]
/// shares its connection state.
#[derive(Clone)]
pub struct ConnectionPool(Arc<PoolShared>);

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.0.state.lock().unwrap();
        f.debug_struct("ConnectionPool")
            .field("connections", &state.entries.len())
            .field("waiters", &state.waiters.len())
            .finish()
    }
}

enum Acquire {
    /// The waiter either got assigned, or cannot proceed right now (a
    /// waiter ahead of it in line is still unassigned, or the pool is at
    /// capacity with nothing idle to evict) — either way, stop looping.
    Done,
    /// An idle connection at capacity must be closed (outside the pool
    /// lock) before retrying admission.
    Evict(Arc<Connection>),
    /// The pool has room; build a fresh connection and retry.
    Create,
}

impl ConnectionPool {
    pub fn new(config: PoolConfig) -> ConnectionPool {
        let params = Arc::new(ConnectionParams {
            backend: config.backend.clone(),
            http1: config.http1,
            http2: config.http2,
            connect_timeout: config.connect_timeout,
            keepalive_expiry: config.keepalive_expiry,
            retries: config.retries,
            local_address: config.local_address,
        });
        ConnectionPool(Arc::new(PoolShared {
            state: StdMutex::new(PoolState {
                entries: Vec::new(),
                waiters: Vec::new(),
            }),
            config,
            params,
        }))
    }

    /// A snapshot of pooled connections, for diagnostics and tests.
    pub fn connections(&self) -> Vec<ConnectionInfo> {
        self.0.state.lock().unwrap().entries.iter().map(|c| c.info()).collect()
    }

    pub fn len(&self) -> usize {
        self.0.state.lock().unwrap().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Issues a request and reads its body to completion.
    pub async fn request(&self, mut request: Request) -> crate::Result<(u16, http::HeaderMap, bytes::Bytes)> {
        let mut response = self.handle_request(&mut request).await?;
        let body = response.read().await?;
        Ok((response.status, response.headers, body))
    }

    /// Raw entry point (§6): caller owns reading/closing the response body.
    pub async fn handle_request(&self, request: &mut Request) -> crate::Result<Response> {
        loop {
            let origin = request.url.origin();
            let waiter = Arc::new(Waiter {
                origin,
                ready: Event::new(),
                assigned: StdMutex::new(None),
            });
            {
                let mut state = self.0.state.lock().unwrap();
                state.waiters.push(waiter.clone());
            }
            let mut guard = CancelGuard::new(self.clone(), waiter.clone());

            self.try_acquire(&waiter).await;

            let wait = waiter.ready.wait();
            let waited = match request.extensions.timeouts.pool {
                Some(d) => tokio::time::timeout(d, wait).await.is_ok(),
                None => {
                    wait.await;
                    true
                }
            };
            if !waited {
                guard.disarm();
                self.response_closed(&waiter).await;
                return Err(Error::pool_timeout());
            }

            let connection = waiter
                .assigned
                .lock()
                .unwrap()
                .clone()
                .expect("ready implies assigned");

            match connection.handle_request(request).await {
                Ok(mut response) => {
                    guard.disarm();
                    let release: Arc<dyn PoolRelease> = Arc::new(ReleaseHandle {
                        pool: self.clone(),
                        waiter,
                    });
                    let body = std::mem::replace(&mut response.body, Body::empty());
                    response.body = body.with_release(release);
                    return Ok(response);
                }
                Err(e) => {
                    guard.disarm();
                    self.response_closed(&waiter).await;
                    if matches!(e.kind(), Kind::ConnectionNotAvailable) {
                        continue;
                    }
                    return Err(e);
                }
            }
        }
    }

    async fn try_acquire(&self, waiter: &Arc<Waiter>) {
        loop {
            let outcome = {
                let mut state = self.0.state.lock().unwrap();
                self.try_acquire_locked(&mut state, waiter)
            };
            match outcome {
                Acquire::Done => return,
                Acquire::Evict(victim) => {
                    victim.close().await;
                }
                Acquire::Create => {
                    let conn = Arc::new(self.create_connection(&waiter.origin));
                    let mut state = self.0.state.lock().unwrap();
                    state.entries.insert(0, conn.clone());
                    *waiter.assigned.lock().unwrap() = Some(conn);
                    waiter.ready.set();
                    return;
                }
            }
        }
    }

    fn try_acquire_locked(&self, state: &mut PoolState, waiter: &Arc<Waiter>) -> Acquire {
        let idx = match state.waiters.iter().position(|w| Arc::ptr_eq(w, waiter)) {
            Some(i) => i,
            None => return Acquire::Done, // cancelled/removed already
        };
        if state.waiters[..idx]
            .iter()
            .any(|w| w.assigned.lock().unwrap().is_none())
        {
            return Acquire::Done;
        }

        if let Some(pos) = state
            .entries
            .iter()
            .position(|c| c.can_handle_request(&waiter.origin) && c.is_available())
        {
            let conn = state.entries.remove(pos);
            state.entries.insert(0, conn.clone());
            *waiter.assigned.lock().unwrap() = Some(conn);
            waiter.ready.set();
            return Acquire::Done;
        }

        if state.entries.len() >= self.0.config.max_connections {
            return match state.entries.iter().rposition(|c| c.is_idle()) {
                Some(pos) => Acquire::Evict(state.entries.remove(pos)),
                None => Acquire::Done,
            };
        }

        Acquire::Create
    }

    fn create_connection(&self, origin: &Origin) -> Connection {
        match &self.0.config.proxy {
            None => create_plain(origin.clone(), self.0.params.clone()),
            Some(proxy) => {
                let tunnel = match proxy.mode {
                    ProxyMode::ForwardOnly => false,
                    ProxyMode::TunnelOnly => true,
                    ProxyMode::Default => origin.scheme.is_secure(),
                };
                let proxy_origin = proxy.proxy_url.origin();
                if tunnel {
                    Connection::TunnelProxy(TunnelProxyConnection::new(
                        proxy_origin,
                        origin.clone(),
                        proxy.proxy_headers.clone(),
                        self.0.params.clone(),
                    ))
                } else {
                    Connection::ForwardProxy(ForwardProxyConnection::new(
                        proxy_origin,
                        proxy.proxy_headers.clone(),
                        self.0.params.clone(),
                    ))
                }
            }
        }
    }

    /// Releases a waiter's place and its assigned connection's bookkeeping,
    /// re-dispatches remaining waiters in FIFO order, and runs keep-alive
    /// housekeeping (§4.6 Release). Decided open question: re-dispatch
    /// before housekeeping, to minimize waiter latency.
    async fn response_closed(&self, waiter: &Arc<Waiter>) {
        let remaining = {
            let mut state = self.0.state.lock().unwrap();
            state.waiters.retain(|w| !Arc::ptr_eq(w, waiter));
            if let Some(conn) = waiter.assigned.lock().unwrap().clone() {
                if conn.is_closed() {
                    state.entries.retain(|c| !Arc::ptr_eq(c, &conn));
                }
            }
            state.waiters.clone()
        };

        for w in &remaining {
            if w.assigned.lock().unwrap().is_some() {
                continue;
            }
            self.try_acquire(w).await;
            if w.assigned.lock().unwrap().is_none() {
                break;
            }
        }

        self.housekeeping().await;
    }

    async fn housekeeping(&self) {
        loop {
            let victim = {
                let mut state = self.0.state.lock().unwrap();
                state
                    .entries
                    .iter()
                    .position(|c| c.has_expired())
                    .map(|pos| state.entries.remove(pos))
            };
            match victim {
                Some(c) => c.close().await,
                None => break,
            }
        }
        loop {
            let victim = {
                let mut state = self.0.state.lock().unwrap();
                let idle_count = state.entries.iter().filter(|c| c.is_idle()).count();
                if idle_count > self.0.config.max_keepalive_connections {
                    state.entries.iter().rposition(|c| c.is_idle()).map(|pos| state.entries.remove(pos))
                } else {
                    None
                }
            };
            match victim {
                Some(c) => c.close().await,
                None => break,
            }
        }
    }

    /// Closes every pooled connection and clears the waiter list (§9
    /// "Cyclic references": the pool's close tears down everything it
    /// still owns; in-flight response bodies hold their own `Arc`, so
    /// there's nothing left pointing back at a half-torn-down pool).
    pub async fn close(&self) {
        let entries = {
            let mut state = self.0.state.lock().unwrap();
            state.waiters.clear();
            std::mem::take(&mut state.entries)
        };
        for conn in entries {
            conn.close().await;
        }
    }
}

struct ReleaseHandle {
    pool: ConnectionPool,
    waiter: Arc<Waiter>,
}

#[async_trait::async_trait]
impl PoolRelease for ReleaseHandle {
    async fn release(&self) {
        self.pool.response_closed(&self.waiter).await;
    }
}

/// Guarantees a waiter is cleaned up even if the calling future is dropped
/// mid-`.await` (e.g. the caller's own future is cancelled while waiting
/// on `ready` or inside `connection.handle_request`) — the same
/// can't-async-drop problem [`crate::body::ReleaseGuard`] solves, solved
/// the same way.
struct CancelGuard {
    pool: ConnectionPool,
    waiter: Arc<Waiter>,
    done: AtomicBool,
}

impl CancelGuard {
    fn new(pool: ConnectionPool, waiter: Arc<Waiter>) -> CancelGuard {
        CancelGuard {
            pool,
            waiter,
            done: AtomicBool::new(false),
        }
    }

    /// Marks cleanup as already handled by the caller, so `Drop` is a
    /// no-op.
    fn disarm(&mut self) {
        self.done.store(true, Ordering::Release);
    }
}

impl Drop for CancelGuard {
    fn drop(&mut self) {
        if !self.done.swap(true, Ordering::AcqRel) {
            let pool = self.pool.clone();
            let waiter = self.waiter.clone();
            tokio::spawn(async move { pool.response_closed(&waiter).await });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::mock::MockBackend;
    use crate::origin::Scheme;
    use crate::request::Url;
    use http::Method;

    fn config_with(backend: MockBackend) -> PoolConfig {
        PoolConfig::new().with_backend(Arc::new(backend))
    }

    #[tokio::test]
    async fn keep_alive_reuse() {
        let backend = MockBackend::new();
        backend.push_with(|| {
            crate::net::mock::MockStream::with_chunks(vec![bytes::Bytes::from_static(
                b"HTTP/1.1 200 OK\r\nContent-Type: plain/text\r\nContent-Length: 13\r\n\r\nHello, world!",
            )])
        });
        let pool = ConnectionPool::new(config_with(backend));

        let url = Url::parse("https://example.com/").unwrap();
        let mut request = Request::new(Method::GET, url.clone());
        let mut response = pool.handle_request(&mut request).await.unwrap();
        let body = response.read().await.unwrap();
        assert_eq!(&body[..], b"Hello, world!");
        response.body.close().await;
        tokio::task::yield_now().await;

        assert_eq!(pool.len(), 1);
        let info = pool.connections().into_iter().next().unwrap();
        assert_eq!(info.state, "idle");
        assert_eq!(info.request_count, 1);
        let _ = Scheme::Https;
    }

    #[tokio::test]
    async fn different_origins_get_different_connections() {
        let backend = MockBackend::new();
        for _ in 0..2 {
            backend.push_with(|| {
                crate::net::mock::MockStream::with_chunks(vec![bytes::Bytes::from_static(
                    b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n",
                )])
            });
        }
        let pool = ConnectionPool::new(config_with(backend));

        let mut r1 = Request::new(Method::GET, Url::parse("https://example.com/").unwrap());
        let mut resp1 = pool.handle_request(&mut r1).await.unwrap();
        resp1.body.close().await;

        let mut r2 = Request::new(Method::GET, Url::parse("http://example.com/").unwrap());
        let mut resp2 = pool.handle_request(&mut r2).await.unwrap();
        resp2.body.close().await;

        tokio::task::yield_now().await;
        assert_eq!(pool.len(), 2);
    }
}
