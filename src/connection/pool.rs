//! Bounded connection pool shared by all workers.
//!
//! The pool holds at most `max` connections across every destination.
//! Idle connections are queued per key; when the pool is full and a key
//! has nothing idle, the idle connection of the least recently used key is
//! closed to make room. When nothing is idle either, checkout blocks until
//! a connection is released or discarded, up to the acquire timeout.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tracing::{debug, trace};

use crate::error::{HttpError, Result};
use crate::key::ConnectionKey;
use crate::transport::Connector;

use super::persistent::Connection;
use super::provider::ConnectionProvider;

/// Snapshot of pool occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Capacity.
    pub max: usize,
    /// Connections alive, idle or checked out.
    pub created: usize,
    /// Connections waiting in the queues.
    pub idle: usize,
    /// Keys with at least one idle connection.
    pub keys: usize,
}

/// Keys ordered by last checkout.
#[derive(Debug, Default)]
struct LruKeys {
    tick: u64,
    by_tick: BTreeMap<u64, ConnectionKey>,
    ticks: HashMap<ConnectionKey, u64>,
}

impl LruKeys {
    fn touch(&mut self, key: &ConnectionKey) {
        self.tick += 1;
        if let Some(old) = self.ticks.insert(key.clone(), self.tick) {
            self.by_tick.remove(&old);
        }
        self.by_tick.insert(self.tick, key.clone());
    }

    /// Track `key` without moving it if already tracked.
    fn ensure(&mut self, key: &ConnectionKey) {
        if !self.ticks.contains_key(key) {
            self.touch(key);
        }
    }

    fn remove(&mut self, key: &ConnectionKey) {
        if let Some(tick) = self.ticks.remove(key) {
            self.by_tick.remove(&tick);
        }
    }

    fn oldest_where(&self, mut pred: impl FnMut(&ConnectionKey) -> bool) -> Option<ConnectionKey> {
        self.by_tick.values().find(|k| pred(k)).cloned()
    }

    fn clear(&mut self) {
        self.by_tick.clear();
        self.ticks.clear();
    }
}

#[derive(Debug, Default)]
struct PoolState {
    created: usize,
    enqueued: usize,
    idle: HashMap<ConnectionKey, Vec<Connection>>,
    lru: LruKeys,
    closed: bool,
}

impl PoolState {
    fn take_idle(&mut self, key: &ConnectionKey) -> Option<Connection> {
        let queue = self.idle.get_mut(key)?;
        let conn = queue.pop()?;
        if queue.is_empty() {
            self.idle.remove(key);
        }
        self.enqueued -= 1;
        Some(conn)
    }

    /// Remove one idle connection of the least recently used key that has one.
    fn evict_lru(&mut self) -> Option<Connection> {
        let idle = &self.idle;
        let victim = self.lru.oldest_where(|k| idle.contains_key(k))?;
        let conn = self.take_idle(&victim)?;
        if !self.idle.contains_key(&victim) {
            self.lru.remove(&victim);
        }
        self.created -= 1;
        Some(conn)
    }
}

struct PoolShared {
    max: usize,
    acquire_timeout: Duration,
    connector: Arc<dyn Connector>,
    state: Mutex<PoolState>,
    available: Condvar,
}

impl PoolShared {
    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A connection pool bounded across all keys.
///
/// Cloning the pool yields another handle to the same connections.
#[derive(Clone)]
pub struct BoundedPool {
    inner: Arc<PoolShared>,
}

impl BoundedPool {
    /// Create a pool of `max` connections.
    pub fn new(max: usize, acquire_timeout: Duration, connector: Arc<dyn Connector>) -> Self {
        Self {
            inner: Arc::new(PoolShared {
                max,
                acquire_timeout,
                connector,
                state: Mutex::new(PoolState::default()),
                available: Condvar::new(),
            }),
        }
    }

    /// Get the capacity.
    pub fn max(&self) -> usize {
        self.inner.max
    }

    /// Get the acquire timeout.
    pub fn acquire_timeout(&self) -> Duration {
        self.inner.acquire_timeout
    }

    /// Get a connection for `key`.
    ///
    /// Prefers an idle connection for the key, then a new one (evicting
    /// another key's idle connection if the pool is full), and otherwise
    /// waits for a release. Fails with [`HttpError::PoolExhausted`] when
    /// the acquire timeout passes and [`HttpError::PoolClosed`] after
    /// [`shutdown`](Self::shutdown).
    pub fn get(&self, key: &ConnectionKey) -> Result<Connection> {
        let shared = &self.inner;
        let deadline = Instant::now() + shared.acquire_timeout;
        let mut state = shared.lock();

        loop {
            if state.closed {
                return Err(HttpError::PoolClosed);
            }

            if let Some(conn) = state.take_idle(key) {
                state.lru.touch(key);
                trace!(destination = %key, connection = %conn.id(), "reusing pooled connection");
                return Ok(conn);
            }

            let evicted = if state.created >= shared.max && state.enqueued > 0 {
                state.evict_lru()
            } else {
                None
            };

            if state.created < shared.max {
                state.created += 1;
                state.lru.touch(key);
                drop(state);

                if let Some(mut victim) = evicted {
                    debug!(destination = %victim.key(), connection = %victim.id(), "evicting idle connection");
                    victim.finish();
                }

                return match Connection::open(key.clone(), Arc::clone(&shared.connector)) {
                    Ok(conn) => Ok(conn),
                    Err(e) => {
                        shared.lock().created -= 1;
                        shared.available.notify_one();
                        Err(e)
                    }
                };
            }

            let now = Instant::now();
            if now >= deadline {
                debug!(destination = %key, max = shared.max, "pool exhausted");
                return Err(HttpError::PoolExhausted {
                    waited: shared.acquire_timeout,
                });
            }
            trace!(destination = %key, "waiting for a pooled connection");
            state = shared
                .available
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// Return a connection to its key's queue and wake one waiter.
    pub fn release(&self, conn: Connection) {
        let shared = &self.inner;
        let mut state = shared.lock();
        if state.closed {
            state.created -= 1;
            drop(state);
            drop(conn);
            return;
        }
        let key = conn.key().clone();
        state.lru.ensure(&key);
        state.idle.entry(key).or_default().push(conn);
        state.enqueued += 1;
        drop(state);
        shared.available.notify_one();
    }

    /// Close a checked out connection and free its slot.
    pub fn remove(&self, mut conn: Connection) {
        conn.finish();
        let shared = &self.inner;
        shared.lock().created -= 1;
        shared.available.notify_one();
    }

    /// Close every idle connection and refuse further checkouts.
    ///
    /// Connections still checked out are closed when released.
    pub fn shutdown(&self) {
        let shared = &self.inner;
        let drained: Vec<Connection> = {
            let mut state = shared.lock();
            state.closed = true;
            state.created -= state.enqueued;
            state.enqueued = 0;
            state.lru.clear();
            state.idle.drain().flat_map(|(_, queue)| queue).collect()
        };
        debug!(closed = drained.len(), "pool shut down");
        drop(drained);
        shared.available.notify_all();
    }

    /// Check if the pool was shut down.
    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    /// Get the current occupancy.
    pub fn stats(&self) -> PoolStats {
        let state = self.inner.lock();
        PoolStats {
            max: self.inner.max,
            created: state.created,
            idle: state.enqueued,
            keys: state.idle.len(),
        }
    }

    /// Number of idle connections for `key`.
    pub fn idle_for(&self, key: &ConnectionKey) -> usize {
        self.inner.lock().idle.get(key).map_or(0, Vec::len)
    }
}

impl fmt::Debug for BoundedPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stats = self.stats();
        f.debug_struct("BoundedPool")
            .field("max", &stats.max)
            .field("created", &stats.created)
            .field("idle", &stats.idle)
            .field("acquire_timeout", &self.inner.acquire_timeout)
            .finish()
    }
}

/// A worker's handle on the shared pool.
///
/// Shutting down a handle only affects the worker; the pool itself is shut
/// down through [`BoundedPool::shutdown`].
#[derive(Debug, Clone)]
pub struct PooledProvider {
    pool: BoundedPool,
}

impl PooledProvider {
    /// Create a handle on `pool`.
    pub fn new(pool: BoundedPool) -> Self {
        Self { pool }
    }

    /// Get the pool.
    pub fn pool(&self) -> &BoundedPool {
        &self.pool
    }
}

impl ConnectionProvider for PooledProvider {
    fn checkout(&mut self, key: &ConnectionKey) -> Result<Connection> {
        self.pool.get(key)
    }

    fn checkin(&mut self, conn: Connection) {
        self.pool.release(conn);
    }

    fn discard(&mut self, conn: Connection) {
        self.pool.remove(conn);
    }

    fn shutdown(&mut self) {}
}
