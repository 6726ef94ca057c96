//! Multiplexed HTTP/2 over the real `h2` crate: a thin orchestration layer
//! around `h2::client::handshake`, a semaphore for the negotiated
//! concurrency cap, and the counters needed to detect stream-id exhaustion
//! (§4.3). Framing, HPACK, and per-stream demultiplexing are `h2`'s job —
//! its own `SendRequest`/`ResponseFuture`/`RecvStream` handles already do
//! that, so this type does not re-implement a stream-id → queue map.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use bytes::Bytes;
use http::header::{CONNECTION, HOST, TRANSFER_ENCODING};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::sync::{Mutex as AsyncMutex, Semaphore};

use super::{ConnectionInfo, State};
use crate::body::Body;
use crate::error::{Error, Kind};
use crate::net::BoxedStream;
use crate::origin::Origin;
use crate::request::{Extensions, Request};
use crate::response::Response;
use crate::sync::Event;

/// The cap we advertise to the peer in our own SETTINGS frame: disables
/// server push, caps concurrent streams and header list size. `h2`'s own
/// `Builder` performs the preamble/SETTINGS exchange this implies. The cap
/// actually enforced locally is the *peer's* advertised
/// `max_concurrent_streams`, read back from the handshake result once it
/// resolves (see `spawn_handshake`), not this constant.
const MAX_CONCURRENT_STREAMS: u32 = 100;
const MAX_HEADER_LIST_SIZE: u32 = 65536;

struct StateInner {
    state: State,
    expire_at: Option<Instant>,
}

struct Shared {
    origin: Origin,
    init: StdMutex<Option<crate::Result<h2::client::SendRequest<Bytes>>>>,
    handshake_ready: Event,
    state: StdMutex<StateInner>,
    open_streams: AtomicI64,
    /// Permits equal to the peer's own advertised `max_concurrent_streams`,
    /// added once the handshake resolves (see `spawn_handshake`) — this
    /// starts at zero, since no stream may be sent before then.
    streams: Semaphore,
    /// Mirrors `streams`' total permit count once the handshake resolves, so
    /// `is_available` can compare against it without acquiring a permit.
    max_streams: AtomicU32,
    next_stream_id: AtomicU64,
    stream_id_exhausted: AtomicBool,
    request_count: AtomicU64,
    keepalive_expiry: Option<Duration>,
}

/// One HTTP/2 connection. Like [`super::http1::HTTP11Connection`], this is
/// a cheap `Arc` handle so stream bookkeeping can be shared with whatever
/// needs to observe it after a request returns.
#[derive(Clone)]
pub(crate) struct HTTP2Connection(Arc<Shared>);

impl HTTP2Connection {
    pub(crate) fn new(origin: Origin, stream: BoxedStream, keepalive_expiry: Option<Duration>) -> HTTP2Connection {
        let shared = Arc::new(Shared {
            origin,
            init: StdMutex::new(None),
            handshake_ready: Event::new(),
            state: StdMutex::new(StateInner {
                state: State::Active,
                expire_at: None,
            }),
            open_streams: AtomicI64::new(0),
            streams: Semaphore::new(0),
            max_streams: AtomicU32::new(0),
            next_stream_id: AtomicU64::new(1),
            stream_id_exhausted: AtomicBool::new(false),
            request_count: AtomicU64::new(0),
            keepalive_expiry,
        });
        let conn = HTTP2Connection(shared);
        conn.spawn_handshake(stream);
        conn
    }

    fn spawn_handshake(&self, stream: BoxedStream) {
        let shared = self.0.clone();
        tokio::spawn(async move {
            let io = H2Io::new(stream);
            let result = h2::client::Builder::new()
                .enable_push(false)
                .max_concurrent_streams(MAX_CONCURRENT_STREAMS)
                .max_header_list_size(MAX_HEADER_LIST_SIZE as usize)
                .handshake(io)
                .await;
            match result {
                Ok((send_request, connection)) => {
                    // The peer's own advertised cap (§4.3), not the value we
                    // offered in our SETTINGS frame.
                    let max = connection.max_concurrent_send_streams().max(1) as u32;
                    shared.max_streams.store(max, Ordering::Release);
                    shared.streams.add_permits(max as usize);
                    *shared.init.lock().unwrap() = Some(Ok(send_request));
                    shared.handshake_ready.set();

                    let driver_shared = shared.clone();
                    tokio::spawn(async move {
                        let _ = connection.await;
                        // The connection future only resolves once the peer
                        // has gone away (clean GOAWAY or an I/O error), so
                        // the connection can never serve another request.
                        driver_shared.state.lock().unwrap().state = State::Closed;
                    });
                    return;
                }
                Err(e) => {
                    shared.state.lock().unwrap().state = State::Closed;
                    *shared.init.lock().unwrap() = Some(Err(Error::with(Kind::ConnectError, e)));
                }
            }
            shared.handshake_ready.set();
        });
    }

    pub(crate) fn origin(&self) -> &Origin {
        &self.0.origin
    }

    pub(crate) fn can_handle_request(&self, origin: &Origin) -> bool {
        &self.0.origin == origin
    }

    /// Available while not closed, stream ids remain, and the negotiated
    /// concurrency cap has not been reached. Optimistic while the handshake
    /// is still in flight, since the real cap isn't known yet; a concurrent
    /// waiter racing ahead of the handshake just blocks in `wait_for_handshake`.
    pub(crate) fn is_available(&self) -> bool {
        if self.0.stream_id_exhausted.load(Ordering::Acquire) {
            return false;
        }
        if self.0.state.lock().unwrap().state == State::Closed {
            return false;
        }
        if !self.0.handshake_ready.is_set() {
            return true;
        }
        self.0.open_streams.load(Ordering::Acquire) < self.0.max_streams.load(Ordering::Acquire) as i64
    }

    pub(crate) fn is_idle(&self) -> bool {
        self.0.open_streams.load(Ordering::Acquire) == 0
            && self.0.state.lock().unwrap().state != State::Closed
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.0.state.lock().unwrap().state == State::Closed
    }

    pub(crate) fn has_expired(&self) -> bool {
        match self.0.state.lock().unwrap().expire_at {
            Some(at) => Instant::now() >= at,
            None => false,
        }
    }

    pub(crate) fn info(&self) -> ConnectionInfo {
        ConnectionInfo {
            origin: self.0.origin.clone(),
            protocol: "HTTP/2",
            state: self.0.state.lock().unwrap().state.name(),
            request_count: self.0.request_count.load(Ordering::Relaxed),
        }
    }

    pub(crate) async fn close(&self) {
        self.0.state.lock().unwrap().state = State::Closed;
    }

    pub(crate) async fn try_close(&self) -> bool {
        let mut guard = self.0.state.lock().unwrap();
        if guard.state == State::Closed {
            return false;
        }
        if self.0.open_streams.load(Ordering::Acquire) > 0 {
            return false;
        }
        guard.state = State::Closed;
        true
    }

    pub(crate) async fn handle_request(&self, request: &mut Request) -> crate::Result<Response> {
        if self.0.origin != request.url.origin() || self.is_closed() {
            return Err(Error::connection_not_available());
        }

        let mut send_request = self.wait_for_handshake().await?;

        if self.0.stream_id_exhausted.load(Ordering::Acquire) {
            return Err(Error::connection_not_available());
        }
        self.0.next_stream_id.fetch_add(2, Ordering::AcqRel);
        // `h2` owns real stream-id allocation; this counter exists only to
        // detect exhaustion against the RFC 7540 2^31 stream-id ceiling.
        if self.0.next_stream_id.load(Ordering::Acquire) >= (1u64 << 31) {
            self.0.stream_id_exhausted.store(true, Ordering::Release);
        }

        let permit = self
            .0
            .streams
            .acquire()
            .await
            .map_err(|_| Error::connection_not_available())?;
        permit.forget();
        self.0.open_streams.fetch_add(1, Ordering::AcqRel);
        self.0.request_count.fetch_add(1, Ordering::Relaxed);

        let result = self.send(&mut send_request, request).await;
        if result.is_err() {
            self.release_stream();
            // Any protocol or I/O error on a stream means the whole
            // connection is suspect (mirroring `HTTP11Connection::close` on
            // its own request-handling errors) — don't hand it out again.
            self.0.state.lock().unwrap().state = State::Closed;
        }
        result
    }

    async fn wait_for_handshake(&self) -> crate::Result<h2::client::SendRequest<Bytes>> {
        self.0.handshake_ready.wait().await;
        loop {
            let guard = self.0.init.lock().unwrap();
            match guard.as_ref() {
                None => unreachable!("handshake_ready set without init populated"),
                Some(Ok(send_request)) => {
                    let mut send_request = send_request.clone();
                    drop(guard);
                    return std::future::poll_fn(move |cx| send_request.poll_ready(cx))
                        .await
                        .map(|_| send_request)
                        .map_err(|e| Error::with(Kind::RemoteProtocolError, e));
                }
                Some(Err(_)) => {
                    drop(guard);
                    let err = self.0.init.lock().unwrap().take().unwrap().unwrap_err();
                    return Err(err);
                }
            }
        }
    }

    async fn send(
        &self,
        send_request: &mut h2::client::SendRequest<Bytes>,
        request: &mut Request,
    ) -> crate::Result<Response> {
        request.normalize_headers();
        let has_body = !matches!(request.body.size_hint(), Some(0));

        let authority = String::from_utf8_lossy(&request.url.host_header_value()).into_owned();
        let mut builder = http::Request::builder()
            .method(request.method.clone())
            .uri(
                http::Uri::builder()
                    .scheme(request.url.scheme.as_str())
                    .authority(authority)
                    .path_and_query(String::from_utf8_lossy(&request.url.target).into_owned())
                    .build()
                    .map_err(|e| Error::local_protocol(e))?,
            )
            .version(http::Version::HTTP_2);
        for (name, value) in request.headers.iter() {
            if *name == HOST || *name == TRANSFER_ENCODING || *name == CONNECTION {
                continue;
            }
            builder = builder.header(name, value);
        }
        let h2_request = builder
            .body(())
            .map_err(|e| Error::local_protocol(e))?;

        let (response_fut, mut send_stream) = send_request
            .send_request(h2_request, !has_body)
            .map_err(|e| Error::with(Kind::LocalProtocolError, e))?;

        if has_body {
            while let Some(chunk) = request.body.next_chunk().await? {
                send_stream
                    .send_data(chunk, false)
                    .map_err(|e| Error::with(Kind::WriteError, e))?;
            }
            send_stream
                .send_data(Bytes::new(), true)
                .map_err(|e| Error::with(Kind::WriteError, e))?;
        }

        let response = response_fut
            .await
            .map_err(|e| Error::with(Kind::RemoteProtocolError, e))?;
        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let recv = response.into_body();

        let mut extensions = Extensions::new();
        extensions.http_version = Some("HTTP/2");

        let shared = self.0.clone();
        let body = Body::from_stream(H2Body { recv, shared: Some(shared) });
        Ok(Response::new(status, headers, body, extensions))
    }

    fn release_stream(&self) {
        self.0.open_streams.fetch_sub(1, Ordering::AcqRel);
        self.0.streams.add_permits(1);
        if self.0.open_streams.load(Ordering::Acquire) == 0 {
            let mut guard = self.0.state.lock().unwrap();
            if guard.state != State::Closed {
                guard.expire_at = self.0.keepalive_expiry.map(|d| Instant::now() + d);
            }
        }
    }
}

struct H2Body {
    recv: h2::RecvStream,
    shared: Option<Arc<Shared>>,
}

#[async_trait::async_trait]
impl crate::body::BodyStream for H2Body {
    async fn next_chunk(&mut self) -> crate::Result<Option<Bytes>> {
        match self.recv.data().await {
            Some(Ok(chunk)) => {
                let _ = self.recv.flow_control().release_capacity(chunk.len());
                Ok(Some(chunk))
            }
            Some(Err(e)) => Err(Error::with(Kind::RemoteProtocolError, e)),
            None => {
                if let Some(shared) = self.shared.take() {
                    HTTP2Connection(shared).release_stream();
                }
                Ok(None)
            }
        }
    }
}

impl Drop for H2Body {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.take() {
            HTTP2Connection(shared).release_stream();
        }
    }
}

/// Bridges our async-`.read`/`.write`-with-timeout [`NetworkStream`] onto
/// `h2`'s required `AsyncRead + AsyncWrite` transport. Futures are driven
/// over an owned `Arc<Mutex<..>>` handle rather than borrowing `self`, so
/// the struct need not be self-referential across `poll_*` calls.
struct H2Io {
    stream: Arc<AsyncMutex<BoxedStream>>,
    read_fut: Option<Pin<Box<dyn Future<Output = std::io::Result<Bytes>> + Send>>>,
    write_fut: Option<Pin<Box<dyn Future<Output = std::io::Result<usize>> + Send>>>,
}

impl H2Io {
    fn new(stream: BoxedStream) -> H2Io {
        H2Io {
            stream: Arc::new(AsyncMutex::new(stream)),
            read_fut: None,
            write_fut: None,
        }
    }
}

fn to_io_error(err: crate::Error) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::Other, err)
}

impl AsyncRead for H2Io {
    fn poll_read(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<std::io::Result<()>> {
        loop {
            if let Some(fut) = self.read_fut.as_mut() {
                return match fut.as_mut().poll(cx) {
                    Poll::Ready(result) => {
                        self.read_fut = None;
                        match result {
                            Ok(bytes) => {
                                buf.put_slice(&bytes);
                                Poll::Ready(Ok(()))
                            }
                            Err(e) => Poll::Ready(Err(e)),
                        }
                    }
                    Poll::Pending => Poll::Pending,
                };
            }
            let stream = self.stream.clone();
            let want = buf.remaining();
            self.read_fut = Some(Box::pin(async move {
                let mut guard = stream.lock().await;
                guard.read(want, None).await.map_err(to_io_error)
            }));
        }
    }
}

impl AsyncWrite for H2Io {
    fn poll_write(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<std::io::Result<usize>> {
        loop {
            if let Some(fut) = self.write_fut.as_mut() {
                return match fut.as_mut().poll(cx) {
                    Poll::Ready(result) => {
                        self.write_fut = None;
                        Poll::Ready(result)
                    }
                    Poll::Pending => Poll::Pending,
                };
            }
            let stream = self.stream.clone();
            let owned = buf.to_vec();
            self.write_fut = Some(Box::pin(async move {
                let mut guard = stream.lock().await;
                guard.write(&owned, None).await.map_err(to_io_error)?;
                Ok(owned.len())
            }));
        }
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}
