//! Client and per-worker request handles.

use std::fmt;
use std::sync::Arc;

use http::Version;
use tracing::{debug, debug_span};
use url::Url;

use crate::connection::{
    AffinityCache, BoundedPool, ClientConfig, Connection, ConnectionProvider, IdlePolicy, PoolMode,
    PooledProvider,
};
use crate::error::Result;
use crate::executor::{RequestExecutor, VersionRegistry};
use crate::key::ConnectionKey;
use crate::message::{Request, Response};
use crate::proxy::Proxy;
use crate::transport::{Connector, TcpConnector};

struct ClientInner {
    config: ClientConfig,
    proxy: Option<Proxy>,
    connector: Arc<dyn Connector>,
    pool: Option<BoundedPool>,
    executor: RequestExecutor,
}

/// A persistent HTTP client.
///
/// Cheap to clone and safe to share between threads. Requests are made
/// through a [`Worker`], which every thread creates for itself.
///
/// # Example
///
/// ```no_run
/// use persistent_http::{Client, ClientConfig};
/// use url::Url;
///
/// let client = Client::new(ClientConfig::new("docs")).unwrap();
/// let mut worker = client.worker();
///
/// let url = Url::parse("http://example.com/").unwrap();
/// let response = worker.get(&url).unwrap();
/// println!("{} {}", response.status, response.text());
///
/// // The second request reuses the same connection.
/// let response = worker.get(&url).unwrap();
/// assert!(response.is_success());
/// ```
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl Client {
    /// Create a client that connects over TCP.
    pub fn new(config: ClientConfig) -> Result<Self> {
        let connector = TcpConnector::from_config(&config)?;
        Self::with_connector(config, Arc::new(connector))
    }

    /// Create a client that opens transports through `connector`.
    pub fn with_connector(config: ClientConfig, connector: Arc<dyn Connector>) -> Result<Self> {
        config.validate()?;
        let proxy = config.proxy.resolve()?;

        let pool = match config.pool {
            PoolMode::PerWorker => None,
            PoolMode::Bounded {
                max,
                acquire_timeout,
            } => Some(BoundedPool::new(max, acquire_timeout, Arc::clone(&connector))),
        };

        let executor = RequestExecutor::new()
            .with_idle_policy(IdlePolicy::new(config.idle_timeout).with_max_requests(config.max_requests))
            .with_retry_unsafe(config.retry_unsafe)
            .with_keep_alive(config.keep_alive)
            .with_headers(config.headers.clone())
            .with_versions(Arc::new(VersionRegistry::new()));

        debug!(
            name = %config.name,
            pool = ?config.pool,
            proxy = ?proxy.as_ref().map(|p| format!("{}:{}", p.host(), p.port())),
            "client created"
        );

        Ok(Self {
            inner: Arc::new(ClientInner {
                config,
                proxy,
                connector,
                pool,
                executor,
            }),
        })
    }

    /// Get the client name.
    pub fn name(&self) -> &str {
        &self.inner.config.name
    }

    /// Get the configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Get the resolved proxy.
    pub fn proxy(&self) -> Option<&Proxy> {
        self.inner.proxy.as_ref()
    }

    /// Get the shared pool in bounded mode.
    pub fn pool(&self) -> Option<&BoundedPool> {
        self.inner.pool.as_ref()
    }

    /// Derive the connection key for `url`, honouring the proxy.
    pub fn key_for(&self, url: &Url) -> Result<ConnectionKey> {
        ConnectionKey::from_url(url, self.inner.proxy.as_ref())
    }

    /// Protocol version first seen from the destination of `url`.
    pub fn http_version(&self, url: &Url) -> Option<Version> {
        let key = self.key_for(url).ok()?;
        self.inner.executor.versions().get(&key)
    }

    /// Create a worker for the calling thread.
    pub fn worker(&self) -> Worker {
        let provider = match &self.inner.pool {
            Some(pool) => Provider::Pooled(PooledProvider::new(pool.clone())),
            None => Provider::Affinity(AffinityCache::new(Arc::clone(&self.inner.connector))),
        };
        Worker {
            client: self.clone(),
            provider,
        }
    }

    /// Close the idle connections of the shared pool.
    ///
    /// Workers keep their own connections until they shut down. Call this
    /// once no other thread is using the client.
    pub fn shutdown(&self) {
        if let Some(pool) = &self.inner.pool {
            pool.shutdown();
        }
        debug!(name = %self.name(), "client shut down");
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("name", &self.inner.config.name)
            .field("proxy", &self.inner.proxy)
            .field("pool", &self.inner.pool)
            .finish()
    }
}

#[derive(Debug)]
enum Provider {
    Affinity(AffinityCache),
    Pooled(PooledProvider),
}

impl ConnectionProvider for Provider {
    fn checkout(&mut self, key: &ConnectionKey) -> Result<Connection> {
        match self {
            Provider::Affinity(cache) => cache.checkout(key),
            Provider::Pooled(pool) => pool.checkout(key),
        }
    }

    fn checkin(&mut self, conn: Connection) {
        match self {
            Provider::Affinity(cache) => cache.checkin(conn),
            Provider::Pooled(pool) => pool.checkin(conn),
        }
    }

    fn discard(&mut self, conn: Connection) {
        match self {
            Provider::Affinity(cache) => cache.discard(conn),
            Provider::Pooled(pool) => pool.discard(conn),
        }
    }

    fn shutdown(&mut self) {
        match self {
            Provider::Affinity(cache) => cache.shutdown(),
            Provider::Pooled(pool) => pool.shutdown(),
        }
    }
}

/// Makes requests on behalf of one thread.
///
/// In per-worker mode the worker owns one connection per destination and
/// closes them when it shuts down or is dropped. In bounded mode it
/// borrows connections from the client's pool for each request.
#[derive(Debug)]
pub struct Worker {
    client: Client,
    provider: Provider,
}

impl Worker {
    /// Get the client this worker belongs to.
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Send `request` (a `GET` of the URL when `None`) to the destination of `url`.
    ///
    /// The request target is taken from the request; `url` only selects
    /// the destination.
    pub fn request(&mut self, url: &Url, request: Option<Request>) -> Result<Response> {
        let key = self.client.key_for(url)?;
        let request = request.unwrap_or_else(|| Request::get(origin_target(url)));

        let span = debug_span!(
            "request",
            client = %self.client.name(),
            destination = %key,
            method = %request.method(),
        );
        let _enter = span.enter();

        self.client
            .inner
            .executor
            .execute(&mut self.provider, &key, request)
    }

    /// `GET` the given URL.
    pub fn get(&mut self, url: &Url) -> Result<Response> {
        self.request(url, None)
    }

    /// Connections this worker keeps open (always zero in bounded mode).
    pub fn open_connections(&self) -> usize {
        match &self.provider {
            Provider::Affinity(cache) => cache.len(),
            Provider::Pooled(_) => 0,
        }
    }

    /// Close this worker's connections. Safe to call more than once.
    pub fn shutdown(&mut self) {
        self.provider.shutdown();
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn origin_target(url: &Url) -> String {
    match url.query() {
        Some(query) => format!("{}?{}", url.path(), query),
        None => url.path().to_string(),
    }
}
