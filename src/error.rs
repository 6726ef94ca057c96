//! Error and Result module.

use std::error::Error as StdError;
use std::fmt;
use std::io;

/// Result type used throughout this crate.
pub type Result<T> = std::result::Result<T, Error>;

type Cause = Box<dyn StdError + Send + Sync>;

/// Represents every error this crate can produce.
///
/// Matches one of the kinds from §7 of the design: connect/read/write
/// failures and their timeouts, protocol violations (local or remote), pool
/// admission timeouts, unsupported schemes, and proxy CONNECT failures.
/// [`Kind::ConnectionNotAvailable`] is the one kind that never escapes
/// [`ConnectionPool`](crate::pool::ConnectionPool) — it is caught and
/// retried internally.
pub struct Error {
    inner: Box<ErrorImpl>,
}

struct ErrorImpl {
    kind: Kind,
    cause: Option<Cause>,
}

#[derive(Debug)]
pub(crate) enum Kind {
    ConnectionNotAvailable,
    UnsupportedProtocol,
    ConnectError,
    ConnectTimeout,
    ReadError,
    ReadTimeout,
    WriteError,
    WriteTimeout,
    LocalProtocolError,
    RemoteProtocolError,
    Proxy { status: u16, reason: String },
    PoolTimeout,
    BodyAlreadyConsumed,
}

impl Error {
    pub(crate) fn new(kind: Kind) -> Error {
        Error {
            inner: Box::new(ErrorImpl { kind, cause: None }),
        }
    }

    pub(crate) fn with<C: Into<Cause>>(kind: Kind, cause: C) -> Error {
        Error {
            inner: Box::new(ErrorImpl {
                kind,
                cause: Some(cause.into()),
            }),
        }
    }

    pub(crate) fn kind(&self) -> &Kind {
        &self.inner.kind
    }

    /// The request could not be sent on the connection it was assigned, and
    /// should never be observed outside this crate: the pool catches it and
    /// retries against a different connection.
    pub(crate) fn connection_not_available() -> Error {
        Error::new(Kind::ConnectionNotAvailable)
    }

    pub(crate) fn unsupported_protocol(scheme: impl fmt::Display) -> Error {
        Error::with(
            Kind::UnsupportedProtocol,
            format!("unsupported URL scheme {:?}", scheme.to_string()),
        )
    }

    pub(crate) fn proxy(status: u16, reason: impl Into<String>) -> Error {
        Error::new(Kind::Proxy {
            status,
            reason: reason.into(),
        })
    }

    pub(crate) fn pool_timeout() -> Error {
        Error::new(Kind::PoolTimeout)
    }

    pub(crate) fn local_protocol<C: Into<Cause>>(cause: C) -> Error {
        Error::with(Kind::LocalProtocolError, cause)
    }

    pub(crate) fn remote_protocol<C: Into<Cause>>(cause: C) -> Error {
        Error::with(Kind::RemoteProtocolError, cause)
    }

    pub(crate) fn body_already_consumed() -> Error {
        Error::new(Kind::BodyAlreadyConsumed)
    }

    /// True for a failed or timed-out connect attempt.
    pub fn is_connect(&self) -> bool {
        matches!(self.inner.kind, Kind::ConnectError | Kind::ConnectTimeout)
    }

    /// True for any of the four `*Timeout` kinds, including pool admission.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self.inner.kind,
            Kind::ConnectTimeout | Kind::ReadTimeout | Kind::WriteTimeout | Kind::PoolTimeout
        )
    }

    /// True if the peer violated the protocol, or closed the connection
    /// mid-message.
    pub fn is_remote_protocol(&self) -> bool {
        matches!(self.inner.kind, Kind::RemoteProtocolError)
    }

    /// True if a CONNECT request to a proxy was rejected; see
    /// [`Error::proxy_status`] for the status code.
    pub fn is_proxy(&self) -> bool {
        matches!(self.inner.kind, Kind::Proxy { .. })
    }

    /// The status code of a rejected CONNECT, if this is a proxy error.
    pub fn proxy_status(&self) -> Option<u16> {
        match &self.inner.kind {
            Kind::Proxy { status, .. } => Some(*status),
            _ => None,
        }
    }

    fn description(&self) -> &str {
        match self.inner.kind {
            Kind::ConnectionNotAvailable => "connection was not available",
            Kind::UnsupportedProtocol => "unsupported protocol",
            Kind::ConnectError => "error trying to connect",
            Kind::ConnectTimeout => "timed out connecting",
            Kind::ReadError => "error reading from the connection",
            Kind::ReadTimeout => "timed out reading from the connection",
            Kind::WriteError => "error writing to the connection",
            Kind::WriteTimeout => "timed out writing to the connection",
            Kind::LocalProtocolError => "local protocol error",
            Kind::RemoteProtocolError => "remote protocol error",
            Kind::Proxy { .. } => "proxy CONNECT request was rejected",
            Kind::PoolTimeout => "timed out waiting for a pool connection",
            Kind::BodyAlreadyConsumed => "response body already consumed",
        }
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut f = f.debug_tuple("httpcore::Error");
        f.field(&self.inner.kind);
        if let Some(ref cause) = self.inner.cause {
            f.field(cause);
        }
        f.finish()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.inner.kind {
            Kind::Proxy { status, reason } => {
                write!(f, "proxy CONNECT rejected: {} {}", status, reason)
            }
            _ => f.write_str(self.description()),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.inner.cause.as_ref().map(|c| &**c as _)
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Error {
        match err.kind() {
            io::ErrorKind::TimedOut => Error::with(Kind::ReadTimeout, err),
            _ => Error::with(Kind::ReadError, err),
        }
    }
}

#[cfg(feature = "http2")]
impl From<h2::Error> for Error {
    fn from(err: h2::Error) -> Error {
        Error::with(Kind::RemoteProtocolError, err)
    }
}

impl From<httparse::Error> for Error {
    fn from(err: httparse::Error) -> Error {
        Error::with(Kind::RemoteProtocolError, err)
    }
}
