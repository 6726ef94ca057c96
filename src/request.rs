//! Requests: method, URL, headers, body, and the opaque per-request
//! [`Extensions`] bag.

use std::fmt;
use std::time::Duration;

use http::{HeaderMap, Method};

use crate::body::Body;
use crate::origin::{Origin, Scheme};
use crate::trace::Trace;

/// A request URL, reduced to exactly what connection routing needs: an
/// origin plus a request-target. Not a general-purpose URL parser — query
/// strings and fragments are carried as opaque bytes inside `target`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Url {
    pub scheme: Scheme,
    pub host: Vec<u8>,
    pub port: u16,
    /// Path + query, e.g. `/index.html?q=1`. Must start with `/`.
    pub target: Vec<u8>,
}

impl Url {
    /// Builds a `Url` from parts, defaulting the port to the scheme's
    /// well-known port if `port` is `None`.
    pub fn new(scheme: Scheme, host: impl Into<Vec<u8>>, port: Option<u16>, target: impl Into<Vec<u8>>) -> Url {
        let host = host.into();
        let port = port.unwrap_or_else(|| scheme.default_port());
        let mut target = target.into();
        if target.is_empty() {
            target = b"/".to_vec();
        }
        Url {
            scheme,
            host,
            port,
            target,
        }
    }

    /// Parses an absolute `http(s)://host[:port]/path?query` URL.
    ///
    /// This is intentionally minimal: no percent-decoding, no userinfo, no
    /// fragment handling beyond passing it through as part of `target`.
    /// Non-ASCII bytes are rejected, matching the "non-ASCII in string form
    /// is rejected" rule from the external interface contract.
    pub fn parse(s: &str) -> crate::Result<Url> {
        if !s.is_ascii() {
            return Err(crate::Error::local_protocol("non-ASCII URL"));
        }
        let (scheme_str, rest) = s
            .split_once("://")
            .ok_or_else(|| crate::Error::local_protocol("missing scheme"))?;
        let scheme =
            Scheme::parse(scheme_str).ok_or_else(|| crate::Error::unsupported_protocol(scheme_str))?;
        let (authority, path) = match rest.find('/') {
            Some(i) => (&rest[..i], &rest[i..]),
            None => (rest, "/"),
        };
        let (host, port) = match authority.rsplit_once(':') {
            Some((h, p)) => (h, p.parse::<u16>().ok()),
            None => (authority, None),
        };
        if host.is_empty() {
            return Err(crate::Error::local_protocol("missing host"));
        }
        Ok(Url::new(scheme, host.as_bytes().to_vec(), port, path.as_bytes().to_vec()))
    }

    /// The [`Origin`] this URL routes to.
    pub fn origin(&self) -> Origin {
        Origin::new(self.scheme, self.host.clone(), Some(self.port))
    }

    /// Host as it should appear in a synthesized `Host` header: bare host if
    /// the port is the scheme default, else `host:port`.
    pub fn host_header_value(&self) -> Vec<u8> {
        if self.port == self.scheme.default_port() {
            self.host.clone()
        } else {
            let mut v = self.host.clone();
            v.push(b':');
            v.extend_from_slice(self.port.to_string().as_bytes());
            v
        }
    }
}

impl fmt::Display for Url {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}://{}:{}{}",
            self.scheme,
            String::from_utf8_lossy(&self.host),
            self.port,
            String::from_utf8_lossy(&self.target)
        )
    }
}

/// Per-operation deadlines. `None` means "wait indefinitely".
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Timeouts {
    pub connect: Option<Duration>,
    pub read: Option<Duration>,
    pub write: Option<Duration>,
    pub pool: Option<Duration>,
}

impl Timeouts {
    /// No deadlines at all.
    pub fn none() -> Timeouts {
        Timeouts::default()
    }

    /// The same deadline applied to every operation.
    pub fn uniform(d: Duration) -> Timeouts {
        Timeouts {
            connect: Some(d),
            read: Some(d),
            write: Some(d),
            pool: Some(d),
        }
    }
}

/// A closed, typed replacement for the original's open extensions dict
/// (§9 Design Notes): there are no free-form keys, so "unknown keys are
/// ignored" is moot by construction.
#[derive(Debug, Default)]
pub struct Extensions {
    pub timeouts: Timeouts,
    pub trace: Option<Trace>,
    /// Set on the response by [`crate::connection::http1::HTTP11Connection`]
    /// and consumed by [`crate::proxy::tunnel`] to upgrade the raw stream.
    pub(crate) network_stream: Option<crate::net::BoxedStream>,
    /// Set on the response: `"HTTP/1.1"` or `"HTTP/2"`.
    pub http_version: Option<&'static str>,
}

impl Clone for Extensions {
    /// `network_stream` is not `Clone` (it's a boxed trait object owned
    /// exclusively by whichever connection is about to take over the raw
    /// stream, e.g. a tunnel proxy); cloned extensions simply don't carry
    /// one, since by the time extensions are cloned for tracing purposes
    /// the raw stream has either not yet been set or already been taken.
    fn clone(&self) -> Extensions {
        Extensions {
            timeouts: self.timeouts,
            trace: self.trace.clone(),
            network_stream: None,
            http_version: self.http_version,
        }
    }
}

impl Extensions {
    pub fn new() -> Extensions {
        Extensions::default()
    }

    pub fn with_trace(mut self, trace: Trace) -> Extensions {
        self.trace = Some(trace);
        self
    }

    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Extensions {
        self.timeouts = timeouts;
        self
    }
}

/// A request ready to be handed to a [`crate::pool::ConnectionPool`].
pub struct Request {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Body,
    pub extensions: Extensions,
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("method", &self.method)
            .field("url", &self.url.to_string())
            .field("headers", &self.headers)
            .finish()
    }
}

impl Request {
    /// Builds a request with an empty body and no headers beyond what
    /// [`Request::normalize_headers`] synthesizes.
    pub fn new(method: Method, url: Url) -> Request {
        Request {
            method,
            url,
            headers: HeaderMap::new(),
            body: Body::empty(),
            extensions: Extensions::new(),
        }
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Request {
        self.headers = headers;
        self
    }

    pub fn with_body(mut self, body: Body) -> Request {
        self.body = body;
        self
    }

    pub fn with_extensions(mut self, extensions: Extensions) -> Request {
        self.extensions = extensions;
        self
    }

    /// Synthesizes `Host`, and either `Content-Length` or
    /// `Transfer-Encoding: chunked`, if the caller didn't set them (§6).
    pub(crate) fn normalize_headers(&mut self) {
        use http::header::{CONTENT_LENGTH, HOST, TRANSFER_ENCODING};

        if !self.headers.contains_key(HOST) {
            if let Ok(value) = http::HeaderValue::from_bytes(&self.url.host_header_value()) {
                self.headers.insert(HOST, value);
            }
        }
        if self.method == Method::CONNECT {
            return;
        }
        if !self.headers.contains_key(CONTENT_LENGTH) && !self.headers.contains_key(TRANSFER_ENCODING) {
            match self.body.size_hint() {
                Some(len) => {
                    let mut buf = itoa::Buffer::new();
                    if let Ok(value) = http::HeaderValue::from_str(buf.format(len)) {
                        self.headers.insert(CONTENT_LENGTH, value);
                    }
                }
                None => {
                    self.headers
                        .insert(TRANSFER_ENCODING, http::HeaderValue::from_static("chunked"));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_absolute_url() {
        let url = Url::parse("https://example.com/index.html?q=1").unwrap();
        assert_eq!(url.scheme, Scheme::Https);
        assert_eq!(url.host, b"example.com");
        assert_eq!(url.port, 443);
        assert_eq!(url.target, b"/index.html?q=1");
    }

    #[test]
    fn parses_explicit_port() {
        let url = Url::parse("http://example.com:8080/").unwrap();
        assert_eq!(url.port, 8080);
    }

    #[test]
    fn host_header_omits_default_port() {
        let url = Url::new(Scheme::Https, b"example.com".to_vec(), Some(443), b"/".to_vec());
        assert_eq!(url.host_header_value(), b"example.com");
        let url = Url::new(Scheme::Https, b"example.com".to_vec(), Some(8443), b"/".to_vec());
        assert_eq!(url.host_header_value(), b"example.com:8443");
    }

    #[test]
    fn rejects_unsupported_scheme() {
        let err = Url::parse("ftp://example.com/").unwrap_err();
        assert!(!err.is_connect());
    }
}
