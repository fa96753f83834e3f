//! Request execution with bounded retries.
//!
//! A request goes out on a connection from a [`ConnectionProvider`]. A
//! malformed response and a broken connection are each retried once, on a
//! freshly reset socket, as long as the request may be repeated safely.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use http::header::{CONNECTION, HeaderMap, HeaderValue, PROXY_AUTHORIZATION};
use http::Version;
use tracing::{debug, trace, warn};

use crate::connection::{ConnectionProvider, IdlePolicy};
use crate::error::{FailureClass, HttpError, Result, TerminalReason};
use crate::key::ConnectionKey;
use crate::message::{Request, Response};
use crate::proxy::basic_authorization;
use crate::types::DEFAULT_KEEP_ALIVE_SECS;

/// Retries used so far by one request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryState {
    /// A malformed response was already retried.
    pub retried_bad_response: bool,
    /// A connection failure was already retried.
    pub retried_connection_error: bool,
}

impl RetryState {
    /// Record a failure and decide whether to retry it.
    ///
    /// Each class gets one retry, and only for requests that may be
    /// repeated.
    pub fn record(&mut self, class: FailureClass, retryable: bool) -> std::result::Result<(), TerminalReason> {
        if !retryable {
            return Err(TerminalReason::NotRetryable);
        }
        let (used, reason) = match class {
            FailureClass::BadResponse => (
                &mut self.retried_bad_response,
                TerminalReason::TooManyBadResponses,
            ),
            FailureClass::ConnectionError => (
                &mut self.retried_connection_error,
                TerminalReason::TooManyConnectionResets,
            ),
        };
        if *used {
            return Err(reason);
        }
        *used = true;
        Ok(())
    }
}

/// Protocol version first seen per destination.
#[derive(Debug, Default)]
pub struct VersionRegistry {
    versions: Mutex<HashMap<ConnectionKey, Version>>,
}

impl VersionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `version` unless one is already known for `key`.
    pub fn record(&self, key: &ConnectionKey, version: Version) {
        self.versions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(key.clone())
            .or_insert(version);
    }

    /// Get the version recorded for `key`.
    pub fn get(&self, key: &ConnectionKey) -> Option<Version> {
        self.versions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .copied()
    }
}

/// Sends requests and applies the retry rules.
#[derive(Debug, Clone)]
pub struct RequestExecutor {
    idle_policy: IdlePolicy,
    retry_unsafe: bool,
    keep_alive: Duration,
    headers: HeaderMap,
    versions: Arc<VersionRegistry>,
}

impl Default for RequestExecutor {
    fn default() -> Self {
        Self {
            idle_policy: IdlePolicy::default(),
            retry_unsafe: false,
            keep_alive: Duration::from_secs(DEFAULT_KEEP_ALIVE_SECS),
            headers: HeaderMap::new(),
            versions: Arc::new(VersionRegistry::new()),
        }
    }
}

impl RequestExecutor {
    /// Create an executor with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the idle policy applied to every checked out connection.
    pub fn with_idle_policy(mut self, policy: IdlePolicy) -> Self {
        self.idle_policy = policy;
        self
    }

    /// Retry non-idempotent requests too.
    pub fn with_retry_unsafe(mut self, enabled: bool) -> Self {
        self.retry_unsafe = enabled;
        self
    }

    /// Set the advertised keep-alive.
    pub fn with_keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    /// Set headers added to requests that do not carry them.
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    /// Share a version registry.
    pub fn with_versions(mut self, versions: Arc<VersionRegistry>) -> Self {
        self.versions = versions;
        self
    }

    /// Get the version registry.
    pub fn versions(&self) -> &Arc<VersionRegistry> {
        &self.versions
    }

    /// Add default and keep-alive headers the caller did not set.
    pub fn apply_default_headers(&self, request: &mut Request) {
        let headers = request.headers_mut();
        for name in self.headers.keys() {
            if !headers.contains_key(name) {
                for value in self.headers.get_all(name) {
                    headers.append(name.clone(), value.clone());
                }
            }
        }
        if !headers.contains_key(CONNECTION) {
            headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
            headers.insert("keep-alive", HeaderValue::from(self.keep_alive.as_secs()));
        }
    }

    /// Add proxy credentials to requests sent through a plain HTTP proxy.
    ///
    /// Tunnelled destinations authenticate on the `CONNECT` instead.
    fn apply_proxy_authorization(&self, key: &ConnectionKey, request: &mut Request) -> Result<()> {
        let Some(proxy) = key.proxy() else {
            return Ok(());
        };
        if key.is_tls() || request.headers().contains_key(PROXY_AUTHORIZATION) {
            return Ok(());
        }
        if let Some(user) = &proxy.user {
            let value = basic_authorization(user, proxy.password.as_deref())?;
            request.headers_mut().insert(PROXY_AUTHORIZATION, value);
        }
        Ok(())
    }

    /// Send `request` to `key` using a connection from `provider`.
    pub fn execute<P>(&self, provider: &mut P, key: &ConnectionKey, mut request: Request) -> Result<Response>
    where
        P: ConnectionProvider + ?Sized,
    {
        self.apply_default_headers(&mut request);
        self.apply_proxy_authorization(key, &mut request)?;
        let retryable = request.method().is_idempotent() || self.retry_unsafe;
        let target = key.request_target(request.target());
        let host = key.host_header();

        let mut conn = provider.checkout(key)?;
        if let Err(e) = self.idle_policy.prepare(&mut conn) {
            provider.discard(conn);
            return Err(e);
        }

        let mut retry = RetryState::default();
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            let requests = conn.record_request();
            trace!(connection = %conn.id(), requests, attempt = attempts, "sending");

            let err = match conn.round_trip(&request, &target, &host) {
                Ok((response, framing)) => {
                    conn.touch();
                    self.versions.record(key, response.version);
                    if request.wants_close() || response.wants_close() || framing.requires_close() {
                        debug!(connection = %conn.id(), "closing after response");
                        provider.discard(conn);
                    } else {
                        provider.checkin(conn);
                    }
                    return Ok(response);
                }
                Err(err) => err,
            };

            let Some(class) = err.failure_class() else {
                provider.discard(conn);
                return Err(err);
            };

            if let Err(reason) = retry.record(class, retryable) {
                let idle_for = conn.idle_for(Instant::now());
                let terminal = HttpError::Request {
                    reason,
                    attempts,
                    destination: key.to_string(),
                    connection: conn.id(),
                    requests,
                    idle_for: (class == FailureClass::ConnectionError).then_some(idle_for),
                    source: Box::new(err),
                };
                warn!(error = %terminal, "request failed");
                provider.discard(conn);
                return Err(terminal);
            }

            debug!(
                connection = %conn.id(),
                class = ?class,
                error = %err,
                "retrying on a fresh socket"
            );
            if let Err(e) = conn.reset() {
                provider.discard(conn);
                return Err(e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::AffinityCache;
    use crate::test_support::ScriptedConnector;
    use crate::types::Method;
    use std::io;

    const OK: &[u8] = b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok";

    fn key() -> ConnectionKey {
        ConnectionKey::new("example.com", 80, false)
    }

    fn setup() -> (Arc<ScriptedConnector>, AffinityCache) {
        let connector = ScriptedConnector::new();
        let cache = AffinityCache::new(connector.clone());
        (connector, cache)
    }

    #[test]
    fn test_retry_state() {
        let mut state = RetryState::default();
        assert!(state.record(FailureClass::ConnectionError, true).is_ok());
        assert!(state.record(FailureClass::BadResponse, true).is_ok());
        assert_eq!(
            state.record(FailureClass::ConnectionError, true),
            Err(TerminalReason::TooManyConnectionResets)
        );
        assert_eq!(
            state.record(FailureClass::BadResponse, true),
            Err(TerminalReason::TooManyBadResponses)
        );
        assert_eq!(
            RetryState::default().record(FailureClass::BadResponse, false),
            Err(TerminalReason::NotRetryable)
        );
    }

    #[test]
    fn test_success_keeps_connection() {
        let (connector, mut cache) = setup();
        connector.reply(OK);
        connector.reply(OK);
        let executor = RequestExecutor::new();

        executor.execute(&mut cache, &key(), Request::get("/a")).unwrap();
        let id = cache.get(&key()).unwrap().id();
        executor.execute(&mut cache, &key(), Request::get("/b")).unwrap();

        assert_eq!(cache.get(&key()).unwrap().id(), id);
        assert_eq!(cache.get(&key()).unwrap().requests(), 2);
        assert_eq!(connector.connects(), 1);
    }

    #[test]
    fn test_keep_alive_headers() {
        let (connector, mut cache) = setup();
        connector.reply(OK);
        RequestExecutor::new()
            .execute(&mut cache, &key(), Request::get("/"))
            .unwrap();

        let written = connector.written().to_ascii_lowercase();
        assert!(written.contains("connection: keep-alive\r\n"));
        assert!(written.contains("keep-alive: 30\r\n"));
    }

    #[test]
    fn test_caller_connection_header_wins() {
        let (connector, mut cache) = setup();
        connector.reply(OK);
        let request = Request::builder(Method::Get, "/")
            .header(CONNECTION, HeaderValue::from_static("close"))
            .build();
        RequestExecutor::new()
            .execute(&mut cache, &key(), request)
            .unwrap();

        let written = connector.written().to_ascii_lowercase();
        assert!(written.contains("connection: close\r\n"));
        assert!(!written.contains("keep-alive"));
        // Close was requested, so nothing is cached.
        assert!(cache.get(&key()).is_none());
        assert_eq!(connector.shutdowns(), 1);
    }

    #[test]
    fn test_default_headers_do_not_override() {
        let mut defaults = HeaderMap::new();
        defaults.insert(http::header::USER_AGENT, HeaderValue::from_static("default"));
        defaults.insert(http::header::ACCEPT, HeaderValue::from_static("*/*"));
        let executor = RequestExecutor::new().with_headers(defaults);

        let mut request = Request::builder(Method::Get, "/")
            .header(http::header::USER_AGENT, HeaderValue::from_static("mine"))
            .build();
        executor.apply_default_headers(&mut request);

        assert_eq!(request.headers()[http::header::USER_AGENT], "mine");
        assert_eq!(request.headers()[http::header::ACCEPT], "*/*");
    }

    #[test]
    fn test_get_retried_once_after_connection_error() {
        let (connector, mut cache) = setup();
        connector.fail(io::ErrorKind::ConnectionReset);
        connector.reply(OK);

        let response = RequestExecutor::new()
            .execute(&mut cache, &key(), Request::get("/"))
            .unwrap();

        assert_eq!(response.text(), "ok");
        let conn = cache.get(&key()).unwrap();
        assert_eq!(conn.restarts(), 1);
        assert_eq!(connector.connects(), 2);
    }

    #[test]
    fn test_get_fails_after_second_connection_error() {
        let (connector, mut cache) = setup();
        connector.fail(io::ErrorKind::ConnectionReset);
        connector.fail(io::ErrorKind::BrokenPipe);

        let err = RequestExecutor::new()
            .execute(&mut cache, &key(), Request::get("/"))
            .unwrap_err();

        match &err {
            HttpError::Request {
                reason,
                attempts,
                idle_for,
                ..
            } => {
                assert_eq!(*reason, TerminalReason::TooManyConnectionResets);
                assert_eq!(*attempts, 2);
                assert!(idle_for.is_some());
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(cache.get(&key()).is_none());
        assert_eq!(connector.shutdowns(), 2);
    }

    #[test]
    fn test_bad_response_retried_once() {
        let (connector, mut cache) = setup();
        connector.reply(b"garbage\r\n\r\n");
        connector.reply(OK);

        let response = RequestExecutor::new()
            .execute(&mut cache, &key(), Request::get("/"))
            .unwrap();
        assert!(response.is_success());
        assert_eq!(connector.requests_written(), 2);
    }

    #[test]
    fn test_bad_response_twice_is_terminal() {
        let (connector, mut cache) = setup();
        connector.reply(b"garbage\r\n\r\n");
        connector.reply(b"garbage\r\n\r\n");

        let err = RequestExecutor::new()
            .execute(&mut cache, &key(), Request::get("/"))
            .unwrap_err();
        assert!(matches!(
            err,
            HttpError::Request {
                reason: TerminalReason::TooManyBadResponses,
                idle_for: None,
                ..
            }
        ));
    }

    #[test]
    fn test_classes_are_retried_independently() {
        let (connector, mut cache) = setup();
        connector.reply(b"garbage\r\n\r\n");
        connector.fail(io::ErrorKind::ConnectionReset);
        connector.reply(OK);

        let response = RequestExecutor::new()
            .execute(&mut cache, &key(), Request::get("/"))
            .unwrap();
        assert!(response.is_success());
        assert_eq!(connector.requests_written(), 3);
    }

    #[test]
    fn test_post_not_retried_by_default() {
        let (connector, mut cache) = setup();
        connector.fail(io::ErrorKind::ConnectionReset);
        connector.reply(OK);

        let request = Request::builder(Method::Post, "/").body("x").build();
        let err = RequestExecutor::new()
            .execute(&mut cache, &key(), request)
            .unwrap_err();

        assert!(matches!(
            err,
            HttpError::Request {
                reason: TerminalReason::NotRetryable,
                attempts: 1,
                ..
            }
        ));
        assert_eq!(connector.requests_written(), 1);
    }

    #[test]
    fn test_post_retried_when_unsafe_allowed() {
        let (connector, mut cache) = setup();
        connector.fail(io::ErrorKind::ConnectionReset);
        connector.reply(OK);

        let request = Request::builder(Method::Post, "/").body("x").build();
        let response = RequestExecutor::new()
            .with_retry_unsafe(true)
            .execute(&mut cache, &key(), request)
            .unwrap();

        assert!(response.is_success());
        assert_eq!(cache.get(&key()).unwrap().restarts(), 1);
    }

    #[test]
    fn test_connectivity_error_propagates() {
        let (connector, mut cache) = setup();
        connector.refuse_next();

        let err = RequestExecutor::new()
            .execute(&mut cache, &key(), Request::get("/"))
            .unwrap_err();
        assert!(err.is_connectivity());
    }

    #[test]
    fn test_response_close_discards_connection() {
        let (connector, mut cache) = setup();
        connector.reply(b"HTTP/1.1 200 OK\r\nConnection: close\r\nContent-Length: 0\r\n\r\n");

        RequestExecutor::new()
            .execute(&mut cache, &key(), Request::get("/"))
            .unwrap();
        assert!(cache.get(&key()).is_none());
    }

    #[test]
    fn test_http10_without_keep_alive_discards_connection() {
        let (connector, mut cache) = setup();
        connector.reply(b"HTTP/1.0 200 OK\r\nContent-Length: 0\r\n\r\n");

        RequestExecutor::new()
            .execute(&mut cache, &key(), Request::get("/"))
            .unwrap();
        assert!(cache.get(&key()).is_none());
    }

    #[test]
    fn test_version_first_write_wins() {
        let (connector, mut cache) = setup();
        connector.reply(b"HTTP/1.0 200 OK\r\nConnection: keep-alive\r\nContent-Length: 0\r\n\r\n");
        connector.reply(OK);
        let executor = RequestExecutor::new();

        executor.execute(&mut cache, &key(), Request::get("/")).unwrap();
        executor.execute(&mut cache, &key(), Request::get("/")).unwrap();

        assert_eq!(executor.versions().get(&key()), Some(Version::HTTP_10));
    }
}
