//! Forward and tunnel proxy connections (§4.5).

pub(crate) mod forward;
pub(crate) mod tunnel;

use http::HeaderMap;

use crate::request::Url;

/// Which proxy behavior applies to a given request's scheme.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProxyMode {
    /// Forward for `http`, tunnel for `https`.
    Default,
    ForwardOnly,
    TunnelOnly,
}

impl Default for ProxyMode {
    fn default() -> ProxyMode {
        ProxyMode::Default
    }
}

/// Proxy configuration, carried by [`crate::pool::PoolConfig`].
#[derive(Clone, Debug)]
pub struct ProxyConfig {
    pub proxy_url: Url,
    pub proxy_headers: HeaderMap,
    pub mode: ProxyMode,
}

impl ProxyConfig {
    pub fn new(proxy_url: Url) -> ProxyConfig {
        ProxyConfig {
            proxy_url,
            proxy_headers: HeaderMap::new(),
            mode: ProxyMode::Default,
        }
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> ProxyConfig {
        self.proxy_headers = headers;
        self
    }

    pub fn with_mode(mut self, mode: ProxyMode) -> ProxyConfig {
        self.mode = mode;
        self
    }
}
