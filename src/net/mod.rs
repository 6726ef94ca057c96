//! Abstract byte-stream I/O, with TLS upgrade and extra-info (§4.1).
//!
//! `NetworkBackend`/`NetworkStream` are the one seam this crate leaves for
//! callers to substitute: [`tcp::TcpBackend`] for production traffic,
//! [`mock::MockBackend`] for deterministic tests.

pub mod mock;
pub mod tcp;

use std::fmt;
use std::net::IpAddr;
use std::time::Duration;

use bytes::Bytes;

use crate::origin::Origin;

/// A boxed, type-erased [`NetworkStream`] — what `HTTPConnection` and the
/// tunnel proxy pass around once a transport has been established.
pub type BoxedStream = Box<dyn NetworkStream>;

/// Out-of-band facts about an established stream, queried by key so the
/// set can grow without changing the trait (§4.1: `ssl_object`,
/// `client_addr`, `server_addr`).
#[derive(Clone, Debug)]
pub enum ExtraInfo {
    /// The negotiated ALPN protocol and ciphersuite, once TLS is up.
    SslObject {
        alpn_protocol: Option<String>,
        cipher_suite: Option<String>,
    },
    ClientAddr(std::net::SocketAddr),
    ServerAddr(std::net::SocketAddr),
}

/// A connected, optionally-TLS, byte stream.
#[async_trait::async_trait]
pub trait NetworkStream: Send {
    /// Reads up to `max_bytes`. An empty return means EOF.
    async fn read(&mut self, max_bytes: usize, timeout: Option<Duration>) -> crate::Result<Bytes>;

    /// Writes the full buffer, applying `timeout` to the whole write.
    async fn write(&mut self, buf: &[u8], timeout: Option<Duration>) -> crate::Result<()>;

    /// Closes the underlying transport. Idempotent.
    async fn close(&mut self);

    /// Upgrades a plaintext stream to TLS, negotiating from `alpn_protocols`
    /// in order of preference.
    async fn start_tls(
        self: Box<Self>,
        server_hostname: &str,
        alpn_protocols: &[&str],
        timeout: Option<Duration>,
    ) -> crate::Result<BoxedStream>;

    /// Queries one of `"ssl_object"`, `"client_addr"`, `"server_addr"`.
    fn extra_info(&self, key: &str) -> Option<ExtraInfo>;
}

impl fmt::Debug for dyn NetworkStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("dyn NetworkStream")
    }
}

/// Placeholder left behind when a stream's ownership has been taken out of
/// a connection (the tunnel-proxy CONNECT handoff, §4.5); any further use
/// is a bug, so every operation errors instead of silently acting on
/// nothing.
pub(crate) struct ClosedStream;

#[async_trait::async_trait]
impl NetworkStream for ClosedStream {
    async fn read(&mut self, _max_bytes: usize, _timeout: Option<Duration>) -> crate::Result<Bytes> {
        Err(crate::Error::remote_protocol("stream was already taken"))
    }

    async fn write(&mut self, _buf: &[u8], _timeout: Option<Duration>) -> crate::Result<()> {
        Err(crate::Error::remote_protocol("stream was already taken"))
    }

    async fn close(&mut self) {}

    async fn start_tls(
        self: Box<Self>,
        _server_hostname: &str,
        _alpn_protocols: &[&str],
        _timeout: Option<Duration>,
    ) -> crate::Result<BoxedStream> {
        Err(crate::Error::remote_protocol("stream was already taken"))
    }

    fn extra_info(&self, _key: &str) -> Option<ExtraInfo> {
        None
    }
}

/// Establishes transport-layer connections to an [`Origin`].
#[async_trait::async_trait]
pub trait NetworkBackend: Send + Sync {
    async fn connect(
        &self,
        origin: &Origin,
        timeout: Option<Duration>,
        local_address: Option<IpAddr>,
    ) -> crate::Result<BoxedStream>;
}
