//! Transport layer for persistent connections.
//!
//! A [`Connector`] turns a [`ConnectionKey`] into a live [`Transport`]: a
//! byte stream that is either plain TCP or TLS over TCP, possibly tunnelled
//! through a proxy. Connections own exactly one transport at a time and ask
//! the connector for a fresh one whenever they are (re)started.

pub mod session;
pub mod tcp;
pub mod tls;

use std::fmt;
use std::io::{self, Read, Write};

use crate::error::Result;
use crate::key::ConnectionKey;

pub use session::{DestinationSessions, SessionReuseCache, SessionStats};
pub use tcp::{TcpConnector, TcpTransport, TlsTransport};
pub use tls::{TlsConnector, TlsOptions, VerifyCallback, VerifyMode};

/// A connected byte stream to a destination.
pub trait Transport: Read + Write + Send + fmt::Debug {
    /// Close the stream.
    ///
    /// Must tolerate a socket the peer already closed.
    fn shutdown(&mut self) -> io::Result<()>;
}

/// Opens transports for connection keys.
pub trait Connector: Send + Sync + fmt::Debug {
    /// Open a new transport to the destination (or proxy) named by `key`.
    ///
    /// Never retries: connect failures surface as
    /// [`HttpError::Connectivity`](crate::HttpError::Connectivity).
    fn connect(&self, key: &ConnectionKey) -> Result<Box<dyn Transport>>;
}
