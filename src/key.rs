//! Connection identity.

use std::fmt;

use url::{Host, Url};

use crate::error::{HttpError, Result};
use crate::proxy::Proxy;

/// The proxy half of a [`ConnectionKey`].
///
/// Credentials are part of the identity, so two users of one proxy never
/// share a socket.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ProxyIdentity {
    /// Proxy host.
    pub host: String,
    /// Proxy port.
    pub port: u16,
    /// Proxy user.
    pub user: Option<String>,
    /// Proxy password.
    pub password: Option<String>,
}

impl fmt::Debug for ProxyIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyIdentity")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Immutable identity that partitions pooled connections.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ConnectionKey {
    host: String,
    port: u16,
    tls: bool,
    proxy: Option<ProxyIdentity>,
}

impl ConnectionKey {
    /// Create a key for a direct connection.
    pub fn new(host: impl Into<String>, port: u16, tls: bool) -> Self {
        Self {
            host: host.into().to_ascii_lowercase(),
            port,
            tls,
            proxy: None,
        }
    }

    /// Route this key through a proxy.
    pub fn via(mut self, proxy: ProxyIdentity) -> Self {
        self.proxy = Some(proxy);
        self
    }

    /// Derive the key for a destination URL.
    ///
    /// The proxy is skipped when its bypass list covers the destination.
    pub fn from_url(url: &Url, proxy: Option<&Proxy>) -> Result<Self> {
        let tls = match url.scheme() {
            "http" => false,
            "https" => true,
            other => {
                return Err(HttpError::configuration(format!(
                    "unsupported scheme {other} in {url}"
                )));
            }
        };
        let host = match url.host() {
            Some(Host::Domain(domain)) => domain.to_string(),
            Some(Host::Ipv4(addr)) => addr.to_string(),
            Some(Host::Ipv6(addr)) => addr.to_string(),
            None => return Err(HttpError::configuration(format!("{url} has no host"))),
        };
        let port = url
            .port_or_known_default()
            .ok_or_else(|| HttpError::configuration(format!("{url} has no port")))?;

        let key = Self::new(host, port, tls);
        Ok(match proxy {
            Some(proxy) if !proxy.bypasses(&key.host, port) => key.via(proxy.identity()),
            _ => key,
        })
    }

    /// Get the destination host (IPv6 literals without brackets).
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Get the destination port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Check if the destination scheme is encrypted.
    pub fn is_tls(&self) -> bool {
        self.tls
    }

    /// Get the proxy this key is routed through.
    pub fn proxy(&self) -> Option<&ProxyIdentity> {
        self.proxy.as_ref()
    }

    /// `host:port` as used on a `CONNECT` line.
    pub fn authority(&self) -> String {
        format!("{}:{}", self.bracketed_host(), self.port)
    }

    /// Value for the `Host` header; the port is omitted when it is the scheme default.
    pub fn host_header(&self) -> String {
        let default_port = if self.tls { 443 } else { 80 };
        if self.port == default_port {
            self.bracketed_host()
        } else {
            self.authority()
        }
    }

    /// Request target for `origin_target` as sent on the wire.
    ///
    /// Plain HTTP through a proxy needs the absolute form; everything else
    /// (direct, or tunnelled TLS) uses the origin form unchanged.
    pub fn request_target(&self, origin_target: &str) -> String {
        if self.proxy.is_some() && !self.tls {
            format!("http://{}{}", self.host_header(), origin_target)
        } else {
            origin_target.to_string()
        }
    }

    fn bracketed_host(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        }
    }
}

impl fmt::Display for ConnectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.authority())?;
        if let Some(proxy) = &self.proxy {
            write!(f, " via {}:{}", proxy.host, proxy.port)?;
        }
        Ok(())
    }
}

impl fmt::Debug for ConnectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionKey")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("tls", &self.tls)
            .field("proxy", &self.proxy)
            .finish()
    }
}
