//! A deterministic backend for tests: plays back a fixed byte buffer and
//! records everything written to it. Grounded in the original's
//! `backends/mock.py`.

use std::collections::VecDeque;
use std::net::IpAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;

use super::{BoxedStream, ExtraInfo, NetworkBackend, NetworkStream};
use crate::origin::Origin;

#[derive(Debug, Default)]
struct Recorded {
    written: Vec<u8>,
    closed: bool,
}

/// One scripted connection's worth of canned read data and write capture.
pub struct MockStream {
    read_chunks: VecDeque<Bytes>,
    recorded: Arc<Mutex<Recorded>>,
    alpn_protocol: Option<&'static str>,
}

impl MockStream {
    /// Builds a stream that plays back `data` as a single readable chunk,
    /// then EOF.
    pub fn new(data: impl Into<Bytes>) -> MockStream {
        let mut read_chunks = VecDeque::new();
        read_chunks.push_back(data.into());
        MockStream {
            read_chunks,
            recorded: Arc::new(Mutex::new(Recorded::default())),
            alpn_protocol: None,
        }
    }

    /// Builds a stream that plays back each element of `chunks` as a
    /// separate `read()` call, useful for simulating slow/partial reads.
    pub fn with_chunks(chunks: impl IntoIterator<Item = Bytes>) -> MockStream {
        MockStream {
            read_chunks: chunks.into_iter().collect(),
            recorded: Arc::new(Mutex::new(Recorded::default())),
            alpn_protocol: None,
        }
    }

    /// Reports `protocol` from `extra_info("ssl_object")`, simulating ALPN
    /// negotiation without a real TLS handshake.
    pub fn with_alpn(mut self, protocol: &'static str) -> MockStream {
        self.alpn_protocol = Some(protocol);
        self
    }

    /// Everything written to this stream so far.
    pub fn written(&self) -> Vec<u8> {
        self.recorded.lock().unwrap().written.clone()
    }
}

#[async_trait::async_trait]
impl NetworkStream for MockStream {
    async fn read(&mut self, max_bytes: usize, _timeout: Option<Duration>) -> crate::Result<Bytes> {
        match self.read_chunks.front_mut() {
            None => Ok(Bytes::new()),
            Some(chunk) => {
                let n = max_bytes.min(chunk.len());
                let out = chunk.split_to(n);
                if chunk.is_empty() {
                    self.read_chunks.pop_front();
                }
                Ok(out)
            }
        }
    }

    async fn write(&mut self, buf: &[u8], _timeout: Option<Duration>) -> crate::Result<()> {
        self.recorded.lock().unwrap().written.extend_from_slice(buf);
        Ok(())
    }

    async fn close(&mut self) {
        self.recorded.lock().unwrap().closed = true;
    }

    async fn start_tls(
        self: Box<Self>,
        _server_hostname: &str,
        alpn_protocols: &[&str],
        _timeout: Option<Duration>,
    ) -> crate::Result<BoxedStream> {
        let mut upgraded = *self;
        if upgraded.alpn_protocol.is_none() {
            upgraded.alpn_protocol = alpn_protocols.first().copied();
        }
        Ok(Box::new(upgraded))
    }

    fn extra_info(&self, key: &str) -> Option<ExtraInfo> {
        match key {
            "ssl_object" => Some(ExtraInfo::SslObject {
                alpn_protocol: self.alpn_protocol.map(String::from),
                cipher_suite: None,
            }),
            _ => None,
        }
    }
}

/// A [`NetworkBackend`] that hands out pre-scripted [`MockStream`]s in
/// order, one per `connect()` call, regardless of the requested origin.
/// Records every origin it was asked to connect to.
pub struct MockBackend {
    streams: Mutex<VecDeque<Box<dyn FnMut() -> MockStream + Send>>>,
    connected: Mutex<Vec<Origin>>,
}

impl MockBackend {
    pub fn new() -> MockBackend {
        MockBackend {
            streams: Mutex::new(VecDeque::new()),
            connected: Mutex::new(Vec::new()),
        }
    }

    /// Queues a single scripted stream, built fresh each time it would be
    /// handed out (here, exactly once).
    pub fn push(&self, data: impl Into<Bytes>) -> &Self {
        let bytes = data.into();
        self.streams
            .lock()
            .unwrap()
            .push_back(Box::new(move || MockStream::new(bytes.clone())));
        self
    }

    /// Queues a scripted stream built from a closure, for cases (like ALPN)
    /// that need more than raw bytes.
    pub fn push_with(&self, build: impl FnMut() -> MockStream + Send + 'static) -> &Self {
        self.streams.lock().unwrap().push_back(Box::new(build));
        self
    }

    /// Origins this backend has been asked to connect to, in order.
    pub fn connected_origins(&self) -> Vec<Origin> {
        self.connected.lock().unwrap().clone()
    }
}

impl Default for MockBackend {
    fn default() -> MockBackend {
        MockBackend::new()
    }
}

#[async_trait::async_trait]
impl NetworkBackend for MockBackend {
    async fn connect(
        &self,
        origin: &Origin,
        _timeout: Option<Duration>,
        _local_address: Option<IpAddr>,
    ) -> crate::Result<BoxedStream> {
        self.connected.lock().unwrap().push(origin.clone());
        let mut build = self
            .streams
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| crate::Error::new(crate::error::Kind::ConnectError))?;
        Ok(Box::new(build()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn plays_back_scripted_bytes() {
        let backend = MockBackend::new();
        backend.push(&b"hello"[..]);
        let origin = Origin::new(crate::Scheme::Http, "example.com", None);
        let mut stream = backend.connect(&origin, None, None).await.unwrap();
        let chunk = stream.read(1024, None).await.unwrap();
        assert_eq!(&chunk[..], b"hello");
        assert_eq!(stream.read(1024, None).await.unwrap().len(), 0);
    }

    #[tokio::test]
    async fn records_written_bytes() {
        let mut stream = MockStream::new(&b""[..]);
        stream.write(b"GET / HTTP/1.1\r\n\r\n", None).await.unwrap();
        assert_eq!(stream.written(), b"GET / HTTP/1.1\r\n\r\n");
    }
}
