//! The [`Origin`] triple that keys connection reuse.

use std::fmt;

/// The scheme of a request URL. Only the two this crate speaks over TCP.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Scheme {
    Http,
    Https,
}

impl Scheme {
    /// The scheme's name, lowercase, without a trailing `://`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
        }
    }

    /// Whether this scheme implies a TLS handshake after connecting.
    pub fn is_secure(&self) -> bool {
        matches!(self, Scheme::Https)
    }

    /// The default port for this scheme (80 / 443).
    pub fn default_port(&self) -> u16 {
        match self {
            Scheme::Http => 80,
            Scheme::Https => 443,
        }
    }

    /// Parses a scheme from a request URL string, case-insensitively.
    ///
    /// Returns `None` for anything but `http`/`https` — the caller is
    /// expected to turn that into [`crate::Error::unsupported_protocol`].
    pub fn parse(s: &str) -> Option<Scheme> {
        if s.eq_ignore_ascii_case("http") {
            Some(Scheme::Http)
        } else if s.eq_ignore_ascii_case("https") {
            Some(Scheme::Https)
        } else {
            None
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A `(scheme, host, port)` triple identifying a server endpoint.
///
/// Two requests only ever share a connection if their origins are exactly
/// equal — `https://example.com:443` and `http://example.com:80` are
/// unrelated origins even though they name "the same" host.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Origin {
    pub scheme: Scheme,
    pub host: Vec<u8>,
    pub port: u16,
}

impl Origin {
    /// Builds an origin, defaulting the port to the scheme's well-known
    /// port (80 for `http`, 443 for `https`) if `port` is `None`.
    pub fn new(scheme: Scheme, host: impl Into<Vec<u8>>, port: Option<u16>) -> Origin {
        let host = host.into();
        let port = port.unwrap_or_else(|| scheme.default_port());
        Origin { scheme, host, port }
    }

    /// The host as a `str`, if it's valid UTF-8 (hostnames always are in
    /// practice; this is a convenience, not a validating constructor).
    pub fn host_str(&self) -> &str {
        std::str::from_utf8(&self.host).unwrap_or("")
    }

    /// `true` if `port` is the scheme's default port.
    pub fn has_default_port(&self) -> bool {
        self.port == self.scheme.default_port()
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.scheme, self.host_str(), self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equality_is_structural_and_exact() {
        let a = Origin::new(Scheme::Https, "example.com", Some(443));
        let b = Origin::new(Scheme::Https, "example.com", None);
        assert_eq!(a, b);

        let c = Origin::new(Scheme::Http, "example.com", Some(80));
        assert_ne!(a, c, "http:80 and https:443 are different origins");
    }

    #[test]
    fn default_ports() {
        assert_eq!(Scheme::Http.default_port(), 80);
        assert_eq!(Scheme::Https.default_port(), 443);
    }
}
