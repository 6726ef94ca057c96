//! Lazy byte-chunk bodies, and the stream-release protocol binding a
//! response body's lifetime to pool accounting (§4.7).

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::{Bytes, BytesMut};

/// A source of body chunks. Implemented by protocol connections for
/// response bodies, and by callers for streaming request bodies.
#[async_trait::async_trait]
pub trait BodyStream: Send {
    /// Yields the next chunk, or `Ok(None)` at end of message.
    async fn next_chunk(&mut self) -> crate::Result<Option<Bytes>>;
}

/// Something that must be notified exactly once when a response body is
/// closed, regardless of whether it was read to completion. Implemented by
/// [`crate::pool::ConnectionPool`]'s internal release handle.
#[async_trait::async_trait]
pub(crate) trait PoolRelease: Send + Sync {
    async fn release(&self);
}

struct ReleaseGuardInner {
    target: Arc<dyn PoolRelease>,
    closed: AtomicBool,
}

impl Drop for ReleaseGuardInner {
    fn drop(&mut self) {
        // A `Body` can be dropped without ever calling `close` — a future
        // cancelled mid-iteration, or a caller that simply discards the
        // response. Either way pool accounting must still run, so if this is
        // the last handle and nobody closed explicitly, fire the release on
        // a detached task: `Drop` cannot `.await`.
        if !self.closed.swap(true, Ordering::AcqRel) {
            let target = self.target.clone();
            tokio::spawn(async move { target.release().await });
        }
    }
}

#[derive(Clone)]
pub(crate) struct ReleaseGuard(Arc<ReleaseGuardInner>);

impl ReleaseGuard {
    pub(crate) fn new(target: Arc<dyn PoolRelease>) -> ReleaseGuard {
        ReleaseGuard(Arc::new(ReleaseGuardInner {
            target,
            closed: AtomicBool::new(false),
        }))
    }

    /// Idempotent: the second and later calls are no-ops.
    async fn close(&self) {
        if !self.0.closed.swap(true, Ordering::AcqRel) {
            self.0.target.release().await;
        }
    }
}

enum Inner {
    Empty,
    Full(Option<Bytes>),
    Streaming(Box<dyn BodyStream>),
}

/// A finite, lazily-produced sequence of body bytes.
///
/// Used for both request bodies (supplied by the caller) and response
/// bodies (produced by a connection, and for pooled responses wrapped with
/// a [`ReleaseGuard`] so that closing the body releases the connection back
/// to the pool exactly once).
///
/// Reading a body that has already reached end-of-message is a usage
/// error (`Error::body_already_consumed`) rather than silently yielding
/// `None` again, matching the "reading the same response body twice raises
/// an error" invariant.
pub struct Body {
    inner: Inner,
    done: bool,
    release: Option<ReleaseGuard>,
}

impl Body {
    /// An empty body — used for GET-style requests and `204`-style
    /// responses.
    pub fn empty() -> Body {
        Body {
            inner: Inner::Empty,
            done: false,
            release: None,
        }
    }

    /// A body with the full content already in memory; its length is
    /// reported by [`Body::size_hint`], so the request layer can synthesize
    /// `Content-Length` instead of `Transfer-Encoding: chunked`.
    pub fn from_bytes(bytes: impl Into<Bytes>) -> Body {
        Body {
            inner: Inner::Full(Some(bytes.into())),
            done: false,
            release: None,
        }
    }

    /// A body whose chunks are produced on demand; its length is unknown
    /// ahead of time, so it is sent chunked.
    pub fn from_stream(stream: impl BodyStream + 'static) -> Body {
        Body {
            inner: Inner::Streaming(Box::new(stream)),
            done: false,
            release: None,
        }
    }

    pub(crate) fn from_boxed_stream(stream: Box<dyn BodyStream>) -> Body {
        Body {
            inner: Inner::Streaming(stream),
            done: false,
            release: None,
        }
    }

    pub(crate) fn with_release(mut self, target: Arc<dyn PoolRelease>) -> Body {
        self.release = Some(ReleaseGuard::new(target));
        self
    }

    /// The body's length, if known ahead of time.
    pub fn size_hint(&self) -> Option<u64> {
        match &self.inner {
            Inner::Empty => Some(0),
            Inner::Full(Some(b)) => Some(b.len() as u64),
            Inner::Full(None) => Some(0),
            Inner::Streaming(_) => None,
        }
    }

    /// Pulls the next chunk, or `Ok(None)` once the body has been fully
    /// delivered. Calling this again after that `Ok(None)` returns
    /// [`Error::body_already_consumed`](crate::Error).
    pub async fn next_chunk(&mut self) -> crate::Result<Option<Bytes>> {
        if self.done {
            return Err(crate::Error::body_already_consumed());
        }
        let chunk = match &mut self.inner {
            Inner::Empty => None,
            Inner::Full(slot) => slot.take(),
            Inner::Streaming(s) => s.next_chunk().await?,
        };
        if chunk.is_none() {
            self.done = true;
        }
        Ok(chunk)
    }

    /// Drains the body into a single buffer.
    pub async fn read_to_end(&mut self) -> crate::Result<Bytes> {
        let mut buf = BytesMut::new();
        while let Some(chunk) = self.next_chunk().await? {
            buf.extend_from_slice(&chunk);
        }
        Ok(buf.freeze())
    }

    /// Explicitly closes the body, guaranteeing release of any attached
    /// pool accounting exactly once, whether or not the body was read to
    /// completion. Safe to call more than once.
    pub async fn close(&mut self) {
        self.done = true;
        if let Some(guard) = self.release.take() {
            guard.close().await;
        }
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match &self.inner {
            Inner::Empty => "empty",
            Inner::Full(_) => "full",
            Inner::Streaming(_) => "streaming",
        };
        f.debug_struct("Body")
            .field("kind", &kind)
            .field("done", &self.done)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn empty_body_yields_no_chunks() {
        let mut body = Body::empty();
        assert_eq!(body.next_chunk().await.unwrap(), None);
        assert_eq!(body.size_hint(), Some(0));
    }

    #[tokio::test]
    async fn full_body_yields_once_then_ends() {
        let mut body = Body::from_bytes(&b"hi"[..]);
        assert_eq!(body.next_chunk().await.unwrap(), Some(Bytes::from_static(b"hi")));
        assert_eq!(body.next_chunk().await.unwrap(), None);
    }

    #[tokio::test]
    async fn reading_past_end_of_message_is_an_error() {
        let mut body = Body::empty();
        assert_eq!(body.next_chunk().await.unwrap(), None);
        let err = body.next_chunk().await.unwrap_err();
        assert!(format!("{}", err).contains("already"));
    }

    #[tokio::test]
    async fn read_to_end_collects_all_chunks() {
        struct Chunks(Vec<Bytes>);
        #[async_trait::async_trait]
        impl BodyStream for Chunks {
            async fn next_chunk(&mut self) -> crate::Result<Option<Bytes>> {
                if self.0.is_empty() {
                    Ok(None)
                } else {
                    Ok(Some(self.0.remove(0)))
                }
            }
        }
        let mut body = Body::from_stream(Chunks(vec![Bytes::from_static(b"a"), Bytes::from_static(b"b")]));
        assert_eq!(body.read_to_end().await.unwrap(), Bytes::from_static(b"ab"));
    }

    struct CountingRelease(Arc<AtomicBool>);
    #[async_trait::async_trait]
    impl PoolRelease for CountingRelease {
        async fn release(&self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn explicit_close_releases_exactly_once() {
        let released = Arc::new(AtomicBool::new(false));
        let mut body = Body::empty().with_release(Arc::new(CountingRelease(released.clone())));
        body.close().await;
        assert!(released.load(Ordering::SeqCst));
        body.close().await;
        assert!(released.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn drop_without_close_still_releases() {
        let released = Arc::new(AtomicBool::new(false));
        let body = Body::empty().with_release(Arc::new(CountingRelease(released.clone())));
        drop(body);
        tokio::task::yield_now().await;
        assert!(released.load(Ordering::SeqCst));
    }
}
