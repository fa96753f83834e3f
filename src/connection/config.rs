//! Client configuration types.

use std::time::Duration;

use http::header::{HeaderMap, HeaderValue, IntoHeaderName};

use crate::error::{HttpError, Result};
use crate::proxy::ProxyConfig;
use crate::transport::TlsOptions;
use crate::types::{DEFAULT_IDLE_TIMEOUT_SECS, DEFAULT_KEEP_ALIVE_SECS};

/// Default client name, used to tell clients apart in logs.
pub const DEFAULT_NAME: &str = "persistent-http";

/// Options applied to every socket right after it connects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketOptions {
    /// Disable Nagle's algorithm.
    pub nodelay: bool,
    /// IP time-to-live.
    pub ttl: Option<u32>,
}

impl Default for SocketOptions {
    fn default() -> Self {
        Self {
            nodelay: true,
            ttl: None,
        }
    }
}

impl SocketOptions {
    /// Set `TCP_NODELAY`.
    pub fn with_nodelay(mut self, nodelay: bool) -> Self {
        self.nodelay = nodelay;
        self
    }

    /// Set the IP time-to-live.
    pub fn with_ttl(mut self, ttl: u32) -> Self {
        self.ttl = Some(ttl);
        self
    }
}

/// How connections are shared between workers.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum PoolMode {
    /// Every worker keeps its own connection per destination.
    #[default]
    PerWorker,
    /// All workers share at most `max` connections across destinations.
    Bounded {
        /// Total connection capacity.
        max: usize,
        /// How long a checkout waits for a released connection.
        acquire_timeout: Duration,
    },
}

impl PoolMode {
    /// Create a bounded mode.
    pub fn bounded(max: usize, acquire_timeout: Duration) -> Self {
        PoolMode::Bounded {
            max,
            acquire_timeout,
        }
    }
}

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Name used in log output.
    pub name: String,
    /// Proxy selection.
    pub proxy: ProxyConfig,
    /// TLS options for `https` destinations.
    pub tls: TlsOptions,
    /// Value advertised in the `Keep-Alive` header.
    pub keep_alive: Duration,
    /// Idle time after which a connection is reset before reuse.
    pub idle_timeout: Option<Duration>,
    /// Requests after which a connection is reset before reuse.
    pub max_requests: Option<u64>,
    /// Connection timeout.
    pub connect_timeout: Duration,
    /// Read timeout.
    pub read_timeout: Option<Duration>,
    /// Write timeout.
    pub write_timeout: Option<Duration>,
    /// Socket options.
    pub socket_options: SocketOptions,
    /// Retry non-idempotent requests too.
    pub retry_unsafe: bool,
    /// Connection sharing.
    pub pool: PoolMode,
    /// Headers added to every request that does not set them.
    pub headers: HeaderMap,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_NAME.to_string(),
            proxy: ProxyConfig::None,
            tls: TlsOptions::default(),
            keep_alive: Duration::from_secs(DEFAULT_KEEP_ALIVE_SECS),
            idle_timeout: Some(Duration::from_secs(DEFAULT_IDLE_TIMEOUT_SECS)),
            max_requests: None,
            connect_timeout: Duration::from_secs(5),
            read_timeout: Some(Duration::from_secs(60)),
            write_timeout: Some(Duration::from_secs(60)),
            socket_options: SocketOptions::default(),
            retry_unsafe: false,
            pool: PoolMode::PerWorker,
            headers: HeaderMap::new(),
        }
    }
}

impl ClientConfig {
    /// Create a default configuration with the given name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Set the proxy.
    pub fn with_proxy(mut self, proxy: ProxyConfig) -> Self {
        self.proxy = proxy;
        self
    }

    /// Set the TLS options.
    pub fn with_tls(mut self, tls: TlsOptions) -> Self {
        self.tls = tls;
        self
    }

    /// Set the advertised keep-alive.
    pub fn with_keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    /// Set the idle timeout.
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = Some(timeout);
        self
    }

    /// Never reset connections for being idle.
    pub fn without_idle_timeout(mut self) -> Self {
        self.idle_timeout = None;
        self
    }

    /// Reset a connection once it has served `max` requests.
    pub fn with_max_requests(mut self, max: u64) -> Self {
        self.max_requests = Some(max);
        self
    }

    /// Set the connection timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the read timeout.
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = Some(timeout);
        self
    }

    /// Set the write timeout.
    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = Some(timeout);
        self
    }

    /// Set the socket options.
    pub fn with_socket_options(mut self, options: SocketOptions) -> Self {
        self.socket_options = options;
        self
    }

    /// Allow retrying non-idempotent requests.
    pub fn with_retry_unsafe(mut self, enabled: bool) -> Self {
        self.retry_unsafe = enabled;
        self
    }

    /// Set the pool mode.
    pub fn with_pool(mut self, pool: PoolMode) -> Self {
        self.pool = pool;
        self
    }

    /// Add a default header.
    pub fn with_header<K: IntoHeaderName>(mut self, name: K, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Check the configuration for values no client can run with.
    pub fn validate(&self) -> Result<()> {
        if let PoolMode::Bounded { max: 0, .. } = self.pool {
            return Err(HttpError::configuration("pool capacity must be at least 1"));
        }
        if self.max_requests == Some(0) {
            return Err(HttpError::configuration("max_requests must be at least 1"));
        }
        if self.connect_timeout.is_zero() {
            return Err(HttpError::configuration("connect timeout must be non-zero"));
        }
        Ok(())
    }
}
