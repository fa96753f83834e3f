//! TLS session reuse.
//!
//! Each destination gets its own session store so a resumed handshake only
//! ever presents a ticket issued by the same host, port and proxy route.
//! A failed resumption falls back to a full handshake inside rustls.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use rustls::NamedGroup;
use rustls::client::{
    ClientSessionMemoryCache, ClientSessionStore, Resumption, Tls12ClientSessionValue,
    Tls13ClientSessionValue,
};
use rustls::pki_types::ServerName;

use crate::key::ConnectionKey;

/// Counters for one destination's session store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// Sessions or tickets handed to the store by completed handshakes.
    pub stored: u64,
    /// Sessions or tickets offered for resumption.
    pub offered: u64,
}

/// Session store for a single destination.
#[derive(Debug)]
pub struct DestinationSessions {
    cache: ClientSessionMemoryCache,
    stored: AtomicU64,
    offered: AtomicU64,
}

impl DestinationSessions {
    fn new(size: usize) -> Self {
        Self {
            cache: ClientSessionMemoryCache::new(size),
            stored: AtomicU64::new(0),
            offered: AtomicU64::new(0),
        }
    }

    /// Get the store's counters.
    pub fn stats(&self) -> SessionStats {
        SessionStats {
            stored: self.stored.load(Ordering::Relaxed),
            offered: self.offered.load(Ordering::Relaxed),
        }
    }
}

impl ClientSessionStore for DestinationSessions {
    fn set_kx_hint(&self, server_name: ServerName<'static>, group: NamedGroup) {
        self.cache.set_kx_hint(server_name, group);
    }

    fn kx_hint(&self, server_name: &ServerName<'_>) -> Option<NamedGroup> {
        self.cache.kx_hint(server_name)
    }

    fn set_tls12_session(&self, server_name: ServerName<'static>, value: Tls12ClientSessionValue) {
        self.stored.fetch_add(1, Ordering::Relaxed);
        self.cache.set_tls12_session(server_name, value);
    }

    fn tls12_session(&self, server_name: &ServerName<'_>) -> Option<Tls12ClientSessionValue> {
        let session = self.cache.tls12_session(server_name);
        if session.is_some() {
            self.offered.fetch_add(1, Ordering::Relaxed);
        }
        session
    }

    fn remove_tls12_session(&self, server_name: &ServerName<'static>) {
        self.cache.remove_tls12_session(server_name);
    }

    fn insert_tls13_ticket(&self, server_name: ServerName<'static>, value: Tls13ClientSessionValue) {
        self.stored.fetch_add(1, Ordering::Relaxed);
        self.cache.insert_tls13_ticket(server_name, value);
    }

    fn take_tls13_ticket(&self, server_name: &ServerName<'static>) -> Option<Tls13ClientSessionValue> {
        let ticket = self.cache.take_tls13_ticket(server_name);
        if ticket.is_some() {
            self.offered.fetch_add(1, Ordering::Relaxed);
        }
        ticket
    }
}

/// Per-destination TLS session stores.
///
/// Shared by every connection of a client; lookups take a short lock.
#[derive(Debug, Clone)]
pub struct SessionReuseCache {
    stores: Option<Arc<Mutex<HashMap<ConnectionKey, Arc<DestinationSessions>>>>>,
    per_destination: usize,
}

impl SessionReuseCache {
    /// Create an enabled cache keeping up to `per_destination` sessions each.
    pub fn new(per_destination: usize) -> Self {
        Self {
            stores: Some(Arc::new(Mutex::new(HashMap::new()))),
            per_destination: per_destination.max(1),
        }
    }

    /// Create a cache that never resumes sessions.
    pub fn disabled() -> Self {
        Self {
            stores: None,
            per_destination: 0,
        }
    }

    /// Check if session reuse is enabled.
    pub fn is_enabled(&self) -> bool {
        self.stores.is_some()
    }

    /// Get (or create) the store for `key`.
    pub fn store_for(&self, key: &ConnectionKey) -> Option<Arc<DestinationSessions>> {
        let stores = self.stores.as_ref()?;
        let mut stores = stores.lock().unwrap_or_else(PoisonError::into_inner);
        let store = stores
            .entry(key.clone())
            .or_insert_with(|| Arc::new(DestinationSessions::new(self.per_destination)));
        Some(Arc::clone(store))
    }

    /// Get the counters for `key`, if it has a store.
    pub fn stats(&self, key: &ConnectionKey) -> Option<SessionStats> {
        let stores = self.stores.as_ref()?.lock().unwrap_or_else(PoisonError::into_inner);
        stores.get(key).map(|store| store.stats())
    }

    /// Number of destinations with a store.
    pub fn len(&self) -> usize {
        self.stores.as_ref().map_or(0, |stores| {
            stores.lock().unwrap_or_else(PoisonError::into_inner).len()
        })
    }

    /// Check if no destination has a store.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forget the sessions of one destination.
    pub fn forget(&self, key: &ConnectionKey) {
        if let Some(stores) = &self.stores {
            stores.lock().unwrap_or_else(PoisonError::into_inner).remove(key);
        }
    }

    /// Forget all sessions.
    pub fn clear(&self) {
        if let Some(stores) = &self.stores {
            stores.lock().unwrap_or_else(PoisonError::into_inner).clear();
        }
    }

    /// Resumption settings for a handshake to `key`.
    pub(crate) fn resumption_for(&self, key: &ConnectionKey) -> Resumption {
        match self.store_for(key) {
            Some(store) => Resumption::store(store),
            None => Resumption::disabled(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_per_destination() {
        let cache = SessionReuseCache::new(4);
        let a = ConnectionKey::new("a.example", 443, true);
        let b = ConnectionKey::new("b.example", 443, true);

        let first = cache.store_for(&a).unwrap();
        let again = cache.store_for(&a).unwrap();
        let other = cache.store_for(&b).unwrap();

        assert!(Arc::ptr_eq(&first, &again));
        assert!(!Arc::ptr_eq(&first, &other));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_proxy_route_gets_own_store() {
        let cache = SessionReuseCache::new(4);
        let direct = ConnectionKey::new("a.example", 443, true);
        let proxied = direct
            .clone()
            .via(crate::proxy::Proxy::new("proxy", 3128).identity());

        let first = cache.store_for(&direct).unwrap();
        let second = cache.store_for(&proxied).unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_disabled_cache() {
        let cache = SessionReuseCache::disabled();
        let key = ConnectionKey::new("a.example", 443, true);
        assert!(!cache.is_enabled());
        assert!(cache.store_for(&key).is_none());
        assert!(cache.stats(&key).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_empty_store_offers_nothing() {
        let cache = SessionReuseCache::new(4);
        let key = ConnectionKey::new("a.example", 443, true);
        let store = cache.store_for(&key).unwrap();
        let name = ServerName::try_from("a.example").unwrap();

        assert!(store.tls12_session(&name).is_none());
        assert!(store.take_tls13_ticket(&name).is_none());
        assert_eq!(cache.stats(&key), Some(SessionStats::default()));
    }

    #[test]
    fn test_forget_and_clear() {
        let cache = SessionReuseCache::new(4);
        let a = ConnectionKey::new("a.example", 443, true);
        let b = ConnectionKey::new("b.example", 443, true);
        cache.store_for(&a);
        cache.store_for(&b);

        cache.forget(&a);
        assert_eq!(cache.len(), 1);
        cache.clear();
        assert!(cache.is_empty());
    }
}
