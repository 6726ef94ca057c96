//! The production [`NetworkBackend`]: plain TCP plus TLS via
//! `tokio-rustls`/`rustls`, with roots from `webpki-roots` by default.

use std::convert::TryFrom;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpSocket, TcpStream};
use tokio_rustls::{client::TlsStream, TlsConnector};

use super::{BoxedStream, ExtraInfo, NetworkBackend, NetworkStream};
use crate::origin::Origin;

async fn with_timeout<T>(timeout: Option<Duration>, fut: impl std::future::Future<Output = T>) -> Option<T> {
    match timeout {
        Some(d) => tokio::time::timeout(d, fut).await.ok(),
        None => Some(fut.await),
    }
}

/// Builds a `rustls::ClientConfig` trusting the bundled Mozilla root store,
/// the `default_ssl_context()`-equivalent called for by §4.1.
fn default_root_store() -> rustls::RootCertStore {
    let mut roots = rustls::RootCertStore::empty();
    roots.add_server_trust_anchors(webpki_roots::TLS_SERVER_ROOTS.0.iter().map(|ta| {
        rustls::OwnedTrustAnchor::from_subject_spki_name_constraints(ta.subject, ta.spki, ta.name_constraints)
    }));
    roots
}

/// TCP connection establishment for [`crate::pool::ConnectionPool`].
///
/// Owns a base `rustls::ClientConfig` (no ALPN set); each `start_tls` call
/// clones it and fills in the caller's ALPN preference list, since the set
/// of offered protocols depends on whether HTTP/2 is enabled for that pool.
pub struct TcpBackend {
    tls_config: Arc<rustls::ClientConfig>,
}

impl TcpBackend {
    pub fn new() -> TcpBackend {
        let config = rustls::ClientConfig::builder()
            .with_safe_defaults()
            .with_root_certificates(default_root_store())
            .with_no_client_auth();
        TcpBackend {
            tls_config: Arc::new(config),
        }
    }

    /// Builds a backend trusting a caller-supplied root store instead of
    /// the bundled Mozilla roots — the `ssl_context` configuration option
    /// from §6.
    pub fn with_root_store(roots: rustls::RootCertStore) -> TcpBackend {
        let config = rustls::ClientConfig::builder()
            .with_safe_defaults()
            .with_root_certificates(roots)
            .with_no_client_auth();
        TcpBackend {
            tls_config: Arc::new(config),
        }
    }
}

impl Default for TcpBackend {
    fn default() -> TcpBackend {
        TcpBackend::new()
    }
}

#[async_trait::async_trait]
impl NetworkBackend for TcpBackend {
    async fn connect(
        &self,
        origin: &Origin,
        timeout: Option<Duration>,
        local_address: Option<IpAddr>,
    ) -> crate::Result<BoxedStream> {
        let host = origin.host_str().to_owned();
        let port = origin.port;
        let tls_config = self.tls_config.clone();

        let connect = async move {
            let addr = resolve(&host, port).await?;
            let socket = match addr {
                SocketAddr::V4(_) => TcpSocket::new_v4(),
                SocketAddr::V6(_) => TcpSocket::new_v6(),
            }
            .map_err(|e| crate::Error::with(crate::error::Kind::ConnectError, e))?;
            if let Some(local) = local_address {
                socket
                    .bind(SocketAddr::new(local, 0))
                    .map_err(|e| crate::Error::with(crate::error::Kind::ConnectError, e))?;
            }
            socket
                .connect(addr)
                .await
                .map_err(|e| crate::Error::with(crate::error::Kind::ConnectError, e))
        };

        match with_timeout(timeout, connect).await {
            Some(Ok(stream)) => Ok(Box::new(TcpNetworkStream {
                wire: Wire::Plain(stream),
                tls_config,
            })),
            Some(Err(e)) => Err(e),
            None => Err(crate::Error::new(crate::error::Kind::ConnectTimeout)),
        }
    }
}

async fn resolve(host: &str, port: u16) -> crate::Result<SocketAddr> {
    tokio::net::lookup_host((host, port))
        .await
        .map_err(|e| crate::Error::with(crate::error::Kind::ConnectError, e))?
        .next()
        .ok_or_else(|| crate::Error::new(crate::error::Kind::ConnectError))
}

enum Wire {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

struct TcpNetworkStream {
    wire: Wire,
    tls_config: Arc<rustls::ClientConfig>,
}

#[async_trait::async_trait]
impl NetworkStream for TcpNetworkStream {
    async fn read(&mut self, max_bytes: usize, timeout: Option<Duration>) -> crate::Result<Bytes> {
        let mut buf = vec![0u8; max_bytes];
        let read = async {
            let n = match &mut self.wire {
                Wire::Plain(s) => s.read(&mut buf).await,
                Wire::Tls(s) => s.read(&mut buf).await,
            }?;
            Ok::<_, std::io::Error>(n)
        };
        match with_timeout(timeout, read).await {
            Some(Ok(n)) => {
                buf.truncate(n);
                Ok(Bytes::from(buf))
            }
            Some(Err(e)) => Err(crate::Error::from(e)),
            None => Err(crate::Error::new(crate::error::Kind::ReadTimeout)),
        }
    }

    async fn write(&mut self, data: &[u8], timeout: Option<Duration>) -> crate::Result<()> {
        let write = async {
            match &mut self.wire {
                Wire::Plain(s) => s.write_all(data).await,
                Wire::Tls(s) => s.write_all(data).await,
            }
        };
        match with_timeout(timeout, write).await {
            Some(Ok(())) => Ok(()),
            Some(Err(e)) => Err(crate::Error::with(crate::error::Kind::WriteError, e)),
            None => Err(crate::Error::new(crate::error::Kind::WriteTimeout)),
        }
    }

    async fn close(&mut self) {
        let _ = match &mut self.wire {
            Wire::Plain(s) => s.shutdown().await,
            Wire::Tls(s) => s.shutdown().await,
        };
    }

    async fn start_tls(
        self: Box<Self>,
        server_hostname: &str,
        alpn_protocols: &[&str],
        timeout: Option<Duration>,
    ) -> crate::Result<BoxedStream> {
        let tcp = match self.wire {
            Wire::Plain(tcp) => tcp,
            Wire::Tls(_) => return Err(crate::Error::local_protocol("stream is already TLS")),
        };
        let mut config = (*self.tls_config).clone();
        config.alpn_protocols = alpn_protocols.iter().map(|p| p.as_bytes().to_vec()).collect();
        let connector = TlsConnector::from(Arc::new(config));
        let name = rustls::ServerName::try_from(server_hostname)
            .map_err(|e| crate::Error::local_protocol(e))?;

        let handshake = connector.connect(name, tcp);
        match with_timeout(timeout, handshake).await {
            Some(Ok(stream)) => Ok(Box::new(TcpNetworkStream {
                wire: Wire::Tls(Box::new(stream)),
                tls_config: self.tls_config,
            })),
            Some(Err(e)) => Err(crate::Error::with(crate::error::Kind::ConnectError, e)),
            None => Err(crate::Error::new(crate::error::Kind::ConnectTimeout)),
        }
    }

    fn extra_info(&self, key: &str) -> Option<ExtraInfo> {
        match (key, &self.wire) {
            ("ssl_object", Wire::Tls(s)) => {
                let (_, session) = s.get_ref();
                Some(ExtraInfo::SslObject {
                    alpn_protocol: session
                        .alpn_protocol()
                        .map(|p| String::from_utf8_lossy(p).into_owned()),
                    cipher_suite: session.negotiated_cipher_suite().map(|cs| format!("{:?}", cs.suite())),
                })
            }
            ("client_addr", Wire::Plain(s)) => s.local_addr().ok().map(ExtraInfo::ClientAddr),
            ("client_addr", Wire::Tls(s)) => s.get_ref().0.local_addr().ok().map(ExtraInfo::ClientAddr),
            ("server_addr", Wire::Plain(s)) => s.peer_addr().ok().map(ExtraInfo::ServerAddr),
            ("server_addr", Wire::Tls(s)) => s.get_ref().0.peer_addr().ok().map(ExtraInfo::ServerAddr),
            _ => None,
        }
    }
}
