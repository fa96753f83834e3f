//! Idle expiry for reused connections.

use std::time::{Duration, Instant};

use tracing::debug;

use crate::error::Result;
use crate::types::DEFAULT_IDLE_TIMEOUT_SECS;

use super::persistent::Connection;

/// Decides whether a connection is too stale to reuse as is.
///
/// A connection handed out for a request is started if it has no socket,
/// and reset if it sat idle longer than the timeout or already served the
/// maximum number of requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdlePolicy {
    idle_timeout: Option<Duration>,
    max_requests: Option<u64>,
}

impl Default for IdlePolicy {
    fn default() -> Self {
        Self {
            idle_timeout: Some(Duration::from_secs(DEFAULT_IDLE_TIMEOUT_SECS)),
            max_requests: None,
        }
    }
}

impl IdlePolicy {
    /// Create a policy with the given idle timeout (`None` never expires).
    pub fn new(idle_timeout: Option<Duration>) -> Self {
        Self {
            idle_timeout,
            max_requests: None,
        }
    }

    /// Also expire connections after `max` requests.
    pub fn with_max_requests(mut self, max: Option<u64>) -> Self {
        self.max_requests = max;
        self
    }

    /// Get the idle timeout.
    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout
    }

    /// Get the request limit.
    pub fn max_requests(&self) -> Option<u64> {
        self.max_requests
    }

    /// Check if `conn` must be reset before it is used at `now`.
    pub fn is_expired(&self, conn: &Connection, now: Instant) -> bool {
        let idle = self
            .idle_timeout
            .is_some_and(|timeout| conn.idle_for(now) > timeout);
        let worn = self.max_requests.is_some_and(|max| conn.requests() >= max);
        idle || worn
    }

    /// Make `conn` ready to carry a request.
    pub fn prepare(&self, conn: &mut Connection) -> Result<()> {
        if !conn.is_started() {
            return conn.start();
        }
        if self.is_expired(conn, Instant::now()) {
            debug!(
                connection = %conn.id(),
                idle_ms = conn.idle_for(Instant::now()).as_millis() as u64,
                requests = conn.requests(),
                "connection expired"
            );
            conn.reset()?;
        }
        Ok(())
    }
}
