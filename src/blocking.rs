//! A synchronous façade over [`ConnectionPool`](crate::pool::ConnectionPool),
//! for callers who don't want to manage a `tokio` runtime themselves.
//!
//! A dedicated background thread owns a single-threaded `tokio` runtime and
//! the pool itself. Every blocking call spawns its work onto that runtime
//! via a [`tokio::runtime::Handle`] and parks the calling thread on a
//! `oneshot` until the result comes back — the same shape ecosystem sync
//! wrappers use to sit in front of an async client, minus the extra
//! request-dispatch channel: a `Handle` can already be spawned onto from
//! any thread, so there's no need to funnel work through a queue by hand.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::thread;

use tokio::runtime::Handle;
use tokio::sync::oneshot;

use crate::pool::{ConnectionPool, PoolConfig};
use crate::request::Request;
use crate::response::Response;

/// A synchronous connection pool.
///
/// Cloning a `BlockingPool` shares the same background thread and the same
/// underlying [`ConnectionPool`].
#[derive(Clone)]
pub struct BlockingPool {
    inner: Arc<Inner>,
}

struct Inner {
    pool: ConnectionPool,
    handle: Handle,
    shutdown: Option<oneshot::Sender<()>>,
    thread: Option<thread::JoinHandle<()>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl BlockingPool {
    /// Spawns the background thread, builds a [`ConnectionPool`] on it, and
    /// waits for startup to finish.
    ///
    /// # Panics
    ///
    /// Panics if the background thread cannot be spawned.
    pub fn new(config: PoolConfig) -> BlockingPool {
        let (ready_tx, ready_rx) = std::sync::mpsc::channel::<Handle>();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let pool = ConnectionPool::new(config);
        let background_pool = pool.clone();

        let thread = thread::Builder::new()
            .name("httpcore-blocking".into())
            .spawn(move || {
                let runtime = tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .expect("failed to start blocking pool runtime");
                if ready_tx.send(runtime.handle().clone()).is_err() {
                    return;
                }
                runtime.block_on(async move {
                    let _ = shutdown_rx.await;
                    background_pool.close().await;
                });
            })
            .expect("failed to spawn blocking pool thread");

        let handle = ready_rx.recv().expect("blocking pool thread exited before starting");

        BlockingPool {
            inner: Arc::new(Inner {
                pool,
                handle,
                shutdown: Some(shutdown_tx),
                thread: Some(thread),
            }),
        }
    }

    /// A snapshot of pooled connections, for diagnostics and tests.
    pub fn connections(&self) -> Vec<crate::ConnectionInfo> {
        self.inner.pool.connections()
    }

    pub fn len(&self) -> usize {
        self.inner.pool.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.pool.is_empty()
    }

    /// Issues a request and reads its body to completion, blocking the
    /// calling thread until it's done.
    pub fn request(&self, request: Request) -> crate::Result<(u16, http::HeaderMap, bytes::Bytes)> {
        let pool = self.inner.pool.clone();
        self.run(async move {
            let mut request = request;
            let mut response = pool.handle_request(&mut request).await?;
            let body = response.read().await?;
            Ok((response.status, response.headers, body))
        })
    }

    /// Raw entry point: blocks until a [`Response`] is ready. The returned
    /// response's body still streams lazily on the background runtime; read
    /// it with [`BlockingPool::read_body`] rather than [`Response::read`]
    /// directly, since the latter would drive it on whatever runtime (if
    /// any) the calling thread happens to be on.
    pub fn handle_request(&self, request: Request) -> crate::Result<Response> {
        let pool = self.inner.pool.clone();
        self.run(async move {
            let mut request = request;
            pool.handle_request(&mut request).await
        })
    }

    /// Reads the rest of a [`Response`]'s body on the background runtime,
    /// for a response returned by [`BlockingPool::handle_request`].
    ///
    /// Uses `Handle::block_on` directly rather than the `run()` helper,
    /// since `response` borrows `&mut self` and can't be moved into a
    /// `'static` spawned task. `Handle::block_on` is safe to call from an
    /// external thread even against a current-thread runtime that's
    /// already parked in its own `block_on` elsewhere.
    pub fn read_body(&self, response: &mut Response) -> crate::Result<bytes::Bytes> {
        self.inner.handle.block_on(response.read())
    }

    /// Closes every pooled connection.
    pub fn close(&self) {
        let pool = self.inner.pool.clone();
        self.run(async move {
            pool.close().await;
        })
    }

    /// Spawns `fut` onto the background runtime and blocks the calling
    /// thread until it completes.
    fn run<F>(&self, fut: F) -> F::Output
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.inner.handle.spawn(async move {
            let _ = tx.send(fut.await);
        });
        rx.blocking_recv()
            .unwrap_or_else(|_| panic!("{}", BACKGROUND_PANICKED))
    }
}

const BACKGROUND_PANICKED: &str = "blocking pool background task panicked";

impl fmt::Debug for BlockingPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockingPool").field("pool", &self.inner.pool).finish()
    }
}
