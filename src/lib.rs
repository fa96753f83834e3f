//! Persistent HTTP/1.1 connections built on std::net.
//!
//! This crate keeps HTTP and HTTPS connections open between requests and
//! reuses them, recovering transparently when a reused socket turns out to
//! be dead.
//!
//! # Features
//!
//! - One connection per destination per worker thread, or a pool bounded
//!   across all destinations with least-recently-used eviction
//! - Idle connections are reset before reuse
//! - Malformed responses and broken connections are retried once each for
//!   idempotent requests
//! - HTTP proxies (from a URL or the environment), with `CONNECT` tunnels
//!   for HTTPS
//! - TLS via rustls with per-destination session resumption
//!
//! # Example
//!
//! ```no_run
//! use persistent_http::{Client, ClientConfig, Method, Request};
//! use url::Url;
//!
//! let client = Client::new(ClientConfig::new("example")).unwrap();
//! let mut worker = client.worker();
//!
//! let url = Url::parse("https://example.com/items").unwrap();
//! let response = worker.get(&url).unwrap();
//! println!("{} ({:?})", response.status, client.http_version(&url));
//!
//! let post = Request::builder(Method::Post, "/items").body("name=widget").build();
//! let response = worker.request(&url, Some(post)).unwrap();
//! println!("{}", response.text());
//! ```
//!
//! # Retry rules
//!
//! ```text
//! INIT -> SENDING -> SUCCESS ----------------------------> DONE
//!                 -> BAD_RESPONSE -+
//!                 -> CONN_ERROR ---+-> reset, retry once -> SENDING
//!                                  +-> retry used / unsafe method -> RAISE
//! ```

pub mod client;
pub mod codec;
pub mod connection;
pub mod error;
pub mod executor;
pub mod key;
pub mod message;
pub mod proxy;
pub mod transport;
pub mod types;

#[cfg(test)]
mod test_support;

// Re-export commonly used types at the crate root
pub use client::{Client, Worker};
pub use connection::{ClientConfig, ConnectionId, PoolMode, SocketOptions};
pub use error::{ConnectivityKind, FailureClass, HttpError, Result, TerminalReason};
pub use executor::{RequestExecutor, RetryState};
pub use key::{ConnectionKey, ProxyIdentity};
pub use message::{Request, RequestBuilder, Response};
pub use proxy::{Proxy, ProxyConfig};
pub use transport::{TlsOptions, VerifyMode};
pub use types::Method;
