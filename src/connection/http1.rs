//! Serial request/response over one stream, with keep-alive accounting
//! (§4.2).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use http::header::CONNECTION;
use tokio::sync::Mutex as AsyncMutex;

use super::{ConnectionInfo, State};
use crate::body::{Body, BodyStream};
use crate::connection::h1::{self, BodyMode, ChunkedDecoder, Decoded, Encoder};
use crate::error::{Error, Kind};
use crate::net::BoxedStream;
use crate::origin::Origin;
use crate::request::{Extensions, Request};
use crate::response::Response;
use crate::trace::event;

struct Inner {
    stream: BoxedStream,
    buf: BytesMut,
}

struct StateInner {
    state: State,
    expire_at: Option<Instant>,
}

struct Shared {
    origin: Origin,
    io: AsyncMutex<Inner>,
    state: StdMutex<StateInner>,
    request_count: AtomicU64,
    keepalive_expiry: Option<Duration>,
}

/// A single HTTP/1.1 connection. Cheap to clone: clones share the same
/// underlying stream and state (the clone exists so a response body can
/// hold a handle back to its connection without the connection itself
/// needing to be wrapped in `Arc` by its caller).
#[derive(Clone)]
pub(crate) struct HTTP11Connection(Arc<Shared>);

impl HTTP11Connection {
    pub(crate) fn new(origin: Origin, stream: BoxedStream, keepalive_expiry: Option<Duration>) -> HTTP11Connection {
        HTTP11Connection(Arc::new(Shared {
            origin,
            io: AsyncMutex::new(Inner {
                stream,
                buf: BytesMut::new(),
            }),
            state: StdMutex::new(StateInner {
                state: State::New,
                expire_at: None,
            }),
            request_count: AtomicU64::new(0),
            keepalive_expiry,
        }))
    }

    pub(crate) fn origin(&self) -> &Origin {
        &self.0.origin
    }

    pub(crate) fn can_handle_request(&self, origin: &Origin) -> bool {
        &self.0.origin == origin
    }

    /// Available exactly when idle: HTTP/1.1 only ever serializes one
    /// request at a time.
    pub(crate) fn is_available(&self) -> bool {
        matches!(self.0.state.lock().unwrap().state, State::New | State::Idle)
    }

    pub(crate) fn is_idle(&self) -> bool {
        self.0.state.lock().unwrap().state == State::Idle
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
        let guard = self.0.state.lock().unwrap();
        ConnectionInfo {
            origin: self.0.origin.clone(),
            protocol: "HTTP/1.1",
            state: guard.state.name(),
            request_count: self.0.request_count.load(Ordering::Relaxed),
        }
    }

    /// Unconditional, unlocked: always transitions to `Closed`.
    pub(crate) async fn close(&self) {
        self.0.state.lock().unwrap().state = State::Closed;
        self.0.io.lock().await.stream.close().await;
    }

    /// Detaches the underlying stream, leaving a [`crate::net::ClosedStream`]
    /// placeholder behind and marking the connection closed. Used by the
    /// tunnel proxy to hand the raw TCP stream off to TLS once a CONNECT
    /// has succeeded — this connection is never used again afterward.
    pub(crate) async fn take_stream(&self) -> BoxedStream {
        self.0.state.lock().unwrap().state = State::Closed;
        let mut io = self.0.io.lock().await;
        std::mem::replace(&mut io.stream, Box::new(crate::net::ClosedStream))
    }

    /// Closes only if idle or never used; reports whether it did.
    pub(crate) async fn try_close(&self) -> bool {
        {
            let mut guard = self.0.state.lock().unwrap();
            if !matches!(guard.state, State::New | State::Idle) {
                return false;
            }
            guard.state = State::Closed;
        }
        self.0.io.lock().await.stream.close().await;
        true
    }

    pub(crate) async fn handle_request(&self, request: &mut Request) -> crate::Result<Response> {
        {
            let mut guard = self.0.state.lock().unwrap();
            if self.0.origin != request.url.origin() || !matches!(guard.state, State::New | State::Idle) {
                return Err(Error::connection_not_available());
            }
            guard.state = State::Active;
            guard.expire_at = None;
        }
        self.0.request_count.fetch_add(1, Ordering::Relaxed);

        match self.send_and_receive_head(request).await {
            Ok(response) => Ok(response),
            Err(err) => {
                self.close().await;
                Err(err)
            }
        }
    }

    async fn send_and_receive_head(&self, request: &mut Request) -> crate::Result<Response> {
        request.normalize_headers();
        let extensions = &request.extensions;
        let write_timeout = extensions.timeouts.write;
        let read_timeout = extensions.timeouts.read;

        let request_wants_close = request
            .headers
            .get(CONNECTION)
            .map(|v| v.as_bytes().eq_ignore_ascii_case(b"close"))
            .unwrap_or(false);

        let mut io = self.0.io.lock().await;

        trace_event!(extensions, event::SEND_REQUEST_HEADERS_STARTED);
        let head = h1::encode_head(&request.method, &request.url, &request.headers);
        io.stream.write(&head, write_timeout).await?;
        trace_event!(extensions, event::SEND_REQUEST_HEADERS_COMPLETE);

        trace_event!(extensions, event::SEND_REQUEST_BODY_STARTED);
        let encoder = Encoder::for_headers(&request.headers);
        while let Some(chunk) = request.body.next_chunk().await? {
            io.stream.write(&encoder.encode(chunk), write_timeout).await?;
        }
        if let Some(eof) = encoder.encode_eof() {
            io.stream.write(&eof, write_timeout).await?;
        }
        trace_event!(extensions, event::SEND_REQUEST_BODY_COMPLETE);

        trace_event!(extensions, event::RECEIVE_RESPONSE_HEADERS_STARTED);
        let head = loop {
            if let Some((consumed, head)) = h1::parse_head(&io.buf, request_wants_close)
                .map_err(|e| {
                    trace_event!(extensions, event::RECEIVE_RESPONSE_HEADERS_FAILED);
                    e
                })?
            {
                let _ = io.buf.split_to(consumed);
                break head;
            }
            let chunk = io.stream.read(8192, read_timeout).await.map_err(|e| {
                trace_event!(extensions, event::RECEIVE_RESPONSE_HEADERS_FAILED);
                e
            })?;
            if chunk.is_empty() {
                trace_event!(extensions, event::RECEIVE_RESPONSE_HEADERS_FAILED);
                return Err(Error::remote_protocol("connection closed before response headers"));
            }
            io.buf.extend_from_slice(&chunk);
        };
        trace_event!(extensions, event::RECEIVE_RESPONSE_HEADERS_COMPLETE);

        drop(io);

        let mut response_extensions = Extensions::new();
        response_extensions.http_version = Some("HTTP/1.1");
        response_extensions.network_stream = None;

        let body = Body::from_boxed_stream(Box::new(Http1Body {
            shared: self.0.clone(),
            mode: head.body_mode,
            remaining: match head.body_mode {
                BodyMode::Length(n) => n,
                _ => 0,
            },
            chunked: ChunkedDecoder::default(),
            close_after: head.close_after,
            read_timeout,
            finished: matches!(head.body_mode, BodyMode::Length(0)),
            extensions: extensions.clone(),
        }));

        Ok(Response::new(head.status, head.headers, body, response_extensions))
    }

    fn note_response_closed(&self, fully_consumed: bool, close_after: bool) {
        let mut guard = self.0.state.lock().unwrap();
        if fully_consumed && !close_after && guard.state != State::Closed {
            guard.state = State::Idle;
            guard.expire_at = self.0.keepalive_expiry.map(|d| Instant::now() + d);
        } else {
            guard.state = State::Closed;
        }
    }
}

struct Http1Body {
    shared: Arc<Shared>,
    mode: BodyMode,
    remaining: u64,
    chunked: ChunkedDecoder,
    close_after: bool,
    read_timeout: Option<Duration>,
    finished: bool,
    extensions: Extensions,
}

impl Http1Body {
    async fn fill(&mut self, io: &mut Inner) -> crate::Result<bool> {
        let chunk = io.stream.read(8192, self.read_timeout).await?;
        if chunk.is_empty() {
            return Ok(false);
        }
        io.buf.extend_from_slice(&chunk);
        Ok(true)
    }
}

#[async_trait::async_trait]
impl BodyStream for Http1Body {
    async fn next_chunk(&mut self) -> crate::Result<Option<Bytes>> {
        if self.finished {
            let conn = HTTP11Connection(self.shared.clone());
            conn.note_response_closed(true, self.close_after);
            return Ok(None);
        }
        trace_event!(self.extensions, event::RECEIVE_RESPONSE_BODY_STARTED);
        let mut io = self.shared.io.lock().await;
        let result = match self.mode {
            BodyMode::Length(_) => {
                loop {
                    if self.remaining == 0 {
                        self.finished = true;
                        break Ok(None);
                    }
                    if !io.buf.is_empty() {
                        let n = (self.remaining as usize).min(io.buf.len());
                        let chunk = io.buf.split_to(n).freeze();
                        self.remaining -= n as u64;
                        break Ok(Some(chunk));
                    }
                    if !self.fill(&mut io).await? {
                        self.finished = true;
                        return Err(Error::remote_protocol("connection closed mid-body"));
                    }
                }
            }
            BodyMode::Chunked => loop {
                match self.chunked.decode(&mut io.buf)? {
                    Decoded::Chunk(b) => break Ok(Some(b)),
                    Decoded::Done => {
                        self.finished = true;
                        break Ok(None);
                    }
                    Decoded::NeedMore => {
                        if !self.fill(&mut io).await? {
                            self.finished = true;
                            return Err(Error::remote_protocol("connection closed mid-chunk"));
                        }
                    }
                }
            },
            BodyMode::Eof => {
                if !io.buf.is_empty() {
                    Ok(Some(io.buf.split().freeze()))
                } else if self.fill(&mut io).await? {
                    Ok(Some(io.buf.split().freeze()))
                } else {
                    self.finished = true;
                    Ok(None)
                }
            }
        };
        drop(io);
        if matches!(result, Ok(None)) {
            trace_event!(self.extensions, event::RECEIVE_RESPONSE_BODY_COMPLETE);
            trace_event!(self.extensions, event::RESPONSE_CLOSED_STARTED);
            let conn = HTTP11Connection(self.shared.clone());
            conn.note_response_closed(true, self.close_after);
            trace_event!(self.extensions, event::RESPONSE_CLOSED_COMPLETE);
        }
        result
    }
}

impl Drop for Http1Body {
    fn drop(&mut self) {
        if !self.finished {
            // Body discarded before reaching end-of-message: the connection
            // cannot be trusted to be at a message boundary, so it is
            // closed rather than returned to the pool (§3, invariant 5).
            let mut guard = self.shared.state.lock().unwrap();
            guard.state = State::Closed;
        }
    }
}
