//! Per-worker connection cache.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::trace;

use crate::error::Result;
use crate::key::ConnectionKey;
use crate::transport::Connector;

use super::persistent::Connection;
use super::provider::ConnectionProvider;

/// One connection per destination, owned by a single worker.
///
/// The cache is never shared, so it needs no locking. A checked out
/// connection is absent from the map until it is checked back in.
#[derive(Debug)]
pub struct AffinityCache {
    connector: Arc<dyn Connector>,
    connections: HashMap<ConnectionKey, Connection>,
}

impl AffinityCache {
    /// Create an empty cache.
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self {
            connector,
            connections: HashMap::new(),
        }
    }

    /// Number of cached connections.
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Check if the cache holds no connection.
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Get the cached connection for `key`.
    pub fn get(&self, key: &ConnectionKey) -> Option<&Connection> {
        self.connections.get(key)
    }
}

impl ConnectionProvider for AffinityCache {
    fn checkout(&mut self, key: &ConnectionKey) -> Result<Connection> {
        match self.connections.remove(key) {
            Some(conn) => Ok(conn),
            None => {
                trace!(destination = %key, "opening worker connection");
                Connection::open(key.clone(), Arc::clone(&self.connector))
            }
        }
    }

    fn checkin(&mut self, conn: Connection) {
        // A displaced connection is closed on drop.
        self.connections.insert(conn.key().clone(), conn);
    }

    fn discard(&mut self, mut conn: Connection) {
        conn.finish();
    }

    fn shutdown(&mut self) {
        for (_, mut conn) in self.connections.drain() {
            conn.finish();
        }
    }
}

impl Drop for AffinityCache {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedConnector;

    #[test]
    fn test_same_connection_is_reused() {
        let connector = ScriptedConnector::new();
        let mut cache = AffinityCache::new(connector.clone());
        let key = ConnectionKey::new("example.com", 80, false);

        let conn = cache.checkout(&key).unwrap();
        let id = conn.id();
        cache.checkin(conn);

        let conn = cache.checkout(&key).unwrap();
        assert_eq!(conn.id(), id);
        assert_eq!(connector.connects(), 1);
        cache.checkin(conn);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_destinations_get_own_connections() {
        let connector = ScriptedConnector::new();
        let mut cache = AffinityCache::new(connector.clone());
        let a = ConnectionKey::new("a.example", 80, false);
        let b = ConnectionKey::new("b.example", 80, false);

        let conn_a = cache.checkout(&a).unwrap();
        let conn_b = cache.checkout(&b).unwrap();
        assert_ne!(conn_a.id(), conn_b.id());
        cache.checkin(conn_a);
        cache.checkin(conn_b);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_discard_drops_connection() {
        let connector = ScriptedConnector::new();
        let mut cache = AffinityCache::new(connector.clone());
        let key = ConnectionKey::new("example.com", 80, false);

        let conn = cache.checkout(&key).unwrap();
        cache.discard(conn);
        assert!(cache.get(&key).is_none());
        assert_eq!(connector.shutdowns(), 1);

        let conn = cache.checkout(&key).unwrap();
        cache.checkin(conn);
        assert_eq!(connector.connects(), 2);
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let connector = ScriptedConnector::new();
        let mut cache = AffinityCache::new(connector.clone());
        for host in ["a", "b", "c"] {
            let conn = cache.checkout(&ConnectionKey::new(host, 80, false)).unwrap();
            cache.checkin(conn);
        }

        cache.shutdown();
        cache.shutdown();
        assert!(cache.is_empty());
        assert_eq!(connector.shutdowns(), 3);
    }
}
