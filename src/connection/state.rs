//! Connection identity, state and statistics.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique connection identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub(crate) fn next() -> Self {
        ConnectionId(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Wrap a raw identifier.
    pub fn from_raw(id: u64) -> Self {
        ConnectionId(id)
    }

    /// Get the raw identifier.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

/// Socket state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No socket.
    #[default]
    Finished,
    /// Socket open and usable.
    Started,
}

impl ConnectionState {
    /// Check if the connection has a socket.
    pub fn is_started(&self) -> bool {
        *self == ConnectionState::Started
    }
}

/// Connection statistics.
#[derive(Debug, Clone)]
pub struct ConnectionStats {
    /// When the connection object was created.
    pub created_at: Instant,
    /// When the connection last completed a request (or was created).
    pub last_used: Instant,
    /// Requests sent since the socket was last started.
    pub requests: u64,
    /// Requests sent over the connection's lifetime.
    pub total_requests: u64,
    /// Sockets opened.
    pub starts: u64,
    /// Resets performed.
    pub restarts: u64,
}

impl Default for ConnectionStats {
    fn default() -> Self {
        let now = Instant::now();
        Self {
            created_at: now,
            last_used: now,
            requests: 0,
            total_requests: 0,
            starts: 0,
            restarts: 0,
        }
    }
}

impl ConnectionStats {
    /// Record a socket start.
    pub fn record_start(&mut self) {
        self.starts += 1;
    }

    /// Record a reset; the per-socket request count starts over.
    pub fn record_restart(&mut self) {
        self.restarts += 1;
        self.requests = 0;
    }

    /// Record a request and return the per-socket count including it.
    pub fn record_request(&mut self) -> u64 {
        self.requests += 1;
        self.total_requests += 1;
        self.requests
    }

    /// Record a completed exchange.
    pub fn touch(&mut self, now: Instant) {
        self.last_used = now;
    }

    /// Time since the connection was last used.
    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_used)
    }

    /// Time since the connection was created.
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_id_display() {
        assert_eq!(ConnectionId::from_raw(42).to_string(), "conn#42");
        let a = ConnectionId::next();
        let b = ConnectionId::next();
        assert!(b > a);
    }

    #[test]
    fn test_connection_state() {
        assert!(ConnectionState::Started.is_started());
        assert!(!ConnectionState::default().is_started());
    }

    #[test]
    fn test_connection_stats() {
        let mut stats = ConnectionStats::default();

        stats.record_start();
        assert_eq!(stats.record_request(), 1);
        assert_eq!(stats.record_request(), 2);
        assert_eq!(stats.total_requests, 2);

        stats.record_restart();
        assert_eq!(stats.requests, 0);
        assert_eq!(stats.total_requests, 2);
        assert_eq!(stats.restarts, 1);

        let later = stats.last_used + Duration::from_secs(3);
        assert_eq!(stats.idle_for(later), Duration::from_secs(3));
        stats.touch(later);
        assert_eq!(stats.idle_for(later), Duration::ZERO);
    }
}
