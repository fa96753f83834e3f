//! Connection management for persistent HTTP clients.
//!
//! This module provides:
//! - [`Connection`], a socket holder that can be finished and restarted
//! - [`IdlePolicy`], which resets connections that sat idle too long
//! - [`AffinityCache`], one connection per destination for a single worker
//! - [`BoundedPool`], a capacity-limited pool shared across workers
//! - [`ClientConfig`] and friends
//!
//! # Example
//!
//! ```no_run
//! use persistent_http::connection::{BoundedPool, ConnectionProvider, IdlePolicy, PooledProvider};
//! use persistent_http::transport::{TcpConnector, TlsConnector, TlsOptions};
//! use persistent_http::ConnectionKey;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let tls = TlsConnector::new(&TlsOptions::default()).unwrap();
//! let connector = Arc::new(TcpConnector::new(tls));
//! let pool = BoundedPool::new(4, Duration::from_secs(1), connector);
//!
//! let mut provider = PooledProvider::new(pool.clone());
//! let key = ConnectionKey::new("example.com", 80, false);
//! let mut conn = provider.checkout(&key).unwrap();
//! IdlePolicy::default().prepare(&mut conn).unwrap();
//!
//! // Back into the pool for the next checkout of the same key.
//! provider.checkin(conn);
//! pool.shutdown();
//! ```

mod affinity;
mod config;
mod idle;
mod persistent;
mod pool;
mod provider;
mod state;

pub use affinity::AffinityCache;
pub use config::{ClientConfig, DEFAULT_NAME, PoolMode, SocketOptions};
pub use idle::IdlePolicy;
pub use persistent::Connection;
pub use pool::{BoundedPool, PoolStats, PooledProvider};
pub use provider::ConnectionProvider;
pub use state::{ConnectionId, ConnectionState, ConnectionStats};
