//! Error types for persistent HTTP operations.

use std::fmt;
use std::io;
use std::time::Duration;

use thiserror::Error;

use crate::connection::ConnectionId;

/// Why a connection could not be established.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityKind {
    /// The remote end actively refused the connection.
    Refused,
    /// The destination could not be reached (DNS, routing, connect timeout).
    Unreachable,
    /// A proxy refused to open a tunnel; carries the proxy's status code.
    TunnelRejected(u16),
}

impl fmt::Display for ConnectivityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectivityKind::Refused => f.write_str("connection refused"),
            ConnectivityKind::Unreachable => f.write_str("host unreachable"),
            ConnectivityKind::TunnelRejected(status) => {
                write!(f, "proxy tunnel rejected with status {status}")
            }
        }
    }
}

/// Failure classes that earn one retry each.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// The peer answered with something that is not valid HTTP.
    BadResponse,
    /// The socket failed underneath the request.
    ConnectionError,
}

/// Why the executor gave up on a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalReason {
    /// The single bad-response retry was already spent.
    TooManyBadResponses,
    /// The single connection-error retry was already spent.
    TooManyConnectionResets,
    /// The request method is not safe to replay.
    NotRetryable,
}

impl fmt::Display for TerminalReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerminalReason::TooManyBadResponses => f.write_str("too many bad responses"),
            TerminalReason::TooManyConnectionResets => f.write_str("too many connection resets"),
            TerminalReason::NotRetryable => f.write_str("request failed and is not retryable"),
        }
    }
}

/// Errors that can occur while issuing persistent HTTP requests.
#[derive(Error, Debug)]
pub enum HttpError {
    /// Transient I/O error on an established socket.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Connection could not be established.
    #[error("{kind}: {addr}:{port}")]
    Connectivity {
        kind: ConnectivityKind,
        addr: String,
        port: u16,
    },

    /// Malformed or invalid response from the peer.
    #[error("Bad response: {0}")]
    Protocol(String),

    /// TLS configuration or handshake failure.
    #[error("TLS error: {0}")]
    Tls(String),

    /// Bounded pool stayed saturated for the whole acquire timeout.
    #[error("Connection pool exhausted: no connection released within {waited:?}")]
    PoolExhausted { waited: Duration },

    /// Bounded pool has been shut down.
    #[error("Connection pool is shut down")]
    PoolClosed,

    /// Invalid proxy or target configuration.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Destination URI could not be parsed.
    #[error("Invalid URI: {0}")]
    InvalidUri(#[from] url::ParseError),

    /// Terminal failure after the retry policy was applied.
    #[error(
        "{reason} after {attempts} attempt(s) to {destination} ({requests} requests on {connection}{}): {source}",
        idle_suffix(.idle_for)
    )]
    Request {
        reason: TerminalReason,
        attempts: u32,
        destination: String,
        connection: ConnectionId,
        requests: u64,
        idle_for: Option<Duration>,
        #[source]
        source: Box<HttpError>,
    },
}

fn idle_suffix(idle_for: &Option<Duration>) -> String {
    match idle_for {
        Some(idle) => format!(", last used {:.1}s ago", idle.as_secs_f64()),
        None => String::new(),
    }
}

/// Result type alias for persistent HTTP operations.
pub type Result<T> = std::result::Result<T, HttpError>;

impl HttpError {
    /// Create a new protocol error.
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Create a new configuration error.
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Map a connect-time I/O error onto the connectivity taxonomy.
    pub fn connect(err: io::Error, addr: impl Into<String>, port: u16) -> Self {
        let kind = match err.kind() {
            io::ErrorKind::ConnectionRefused => ConnectivityKind::Refused,
            _ => ConnectivityKind::Unreachable,
        };
        Self::Connectivity {
            kind,
            addr: addr.into(),
            port,
        }
    }

    /// Classify this error for the retry state machine.
    ///
    /// Returns `None` for errors that must propagate without a retry.
    pub fn failure_class(&self) -> Option<FailureClass> {
        match self {
            Self::Protocol(_) => Some(FailureClass::BadResponse),
            Self::Io(_) | Self::Tls(_) => Some(FailureClass::ConnectionError),
            _ => None,
        }
    }

    /// Check if this error is a connect-time failure.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, Self::Connectivity { .. })
    }
}
