//! A reusable connection to one destination.

use std::fmt;
use std::io::{self, BufReader};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, trace, warn};

use crate::codec::{self, BodyFraming};
use crate::error::Result;
use crate::key::ConnectionKey;
use crate::message::{Request, Response};
use crate::transport::{Connector, Transport};

use super::state::{ConnectionId, ConnectionState, ConnectionStats};

/// A persistent connection.
///
/// Owns at most one socket at a time. The socket can be finished and
/// started again without changing the connection's identity, which is how
/// idle and failed connections are recovered.
pub struct Connection {
    id: ConnectionId,
    key: ConnectionKey,
    connector: Arc<dyn Connector>,
    stream: Option<BufReader<Box<dyn Transport>>>,
    stats: ConnectionStats,
}

impl Connection {
    /// Create a connection without opening a socket.
    pub fn new(key: ConnectionKey, connector: Arc<dyn Connector>) -> Self {
        Self {
            id: ConnectionId::next(),
            key,
            connector,
            stream: None,
            stats: ConnectionStats::default(),
        }
    }

    /// Create a connection and open its socket.
    pub fn open(key: ConnectionKey, connector: Arc<dyn Connector>) -> Result<Self> {
        let mut conn = Self::new(key, connector);
        conn.start()?;
        Ok(conn)
    }

    /// Get the connection identifier.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Get the destination key.
    pub fn key(&self) -> &ConnectionKey {
        &self.key
    }

    /// Get the socket state.
    pub fn state(&self) -> ConnectionState {
        if self.stream.is_some() {
            ConnectionState::Started
        } else {
            ConnectionState::Finished
        }
    }

    /// Check if the connection has a socket.
    pub fn is_started(&self) -> bool {
        self.stream.is_some()
    }

    /// Get the connection statistics.
    pub fn stats(&self) -> &ConnectionStats {
        &self.stats
    }

    /// Requests sent on the current socket.
    pub fn requests(&self) -> u64 {
        self.stats.requests
    }

    /// Resets performed so far.
    pub fn restarts(&self) -> u64 {
        self.stats.restarts
    }

    /// Time since the connection was last used.
    pub fn idle_for(&self, now: Instant) -> Duration {
        self.stats.idle_for(now)
    }

    /// Open the socket. A started connection is left alone.
    pub fn start(&mut self) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }
        let transport = self.connector.connect(&self.key)?;
        self.stream = Some(BufReader::new(transport));
        self.stats.record_start();
        trace!(connection = %self.id, destination = %self.key, "started");
        Ok(())
    }

    /// Close the socket, ignoring errors from one the peer already closed.
    pub fn finish(&mut self) {
        if let Some(stream) = self.stream.take() {
            let mut transport = stream.into_inner();
            if let Err(e) = transport.shutdown() {
                warn!(connection = %self.id, error = %e, "ignoring error while closing");
            }
            trace!(connection = %self.id, destination = %self.key, "finished");
        }
    }

    /// Finish and start again with a fresh socket.
    pub fn reset(&mut self) -> Result<()> {
        debug!(
            connection = %self.id,
            destination = %self.key,
            requests = self.stats.requests,
            "resetting"
        );
        self.finish();
        self.stats.record_restart();
        self.start()
    }

    /// Mark the connection as just used.
    pub fn touch(&mut self) {
        self.stats.touch(Instant::now());
    }

    /// Send `request` and read the response.
    ///
    /// `target` and `host` are the request line target and `Host` value as
    /// derived from the key.
    pub(crate) fn round_trip(
        &mut self,
        request: &Request,
        target: &str,
        host: &str,
    ) -> Result<(Response, BodyFraming)> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "connection not started"))?;
        codec::write_request(stream.get_mut(), request, target, host)?;
        codec::read_response(stream, request.method())
    }

    /// Count a request on the current socket.
    pub(crate) fn record_request(&mut self) -> u64 {
        self.stats.record_request()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.finish();
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("key", &self.key)
            .field("state", &self.state())
            .field("stats", &self.stats)
            .finish()
    }
}
