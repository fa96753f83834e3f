//! HTTP request and response messages.

use bytes::Bytes;
use http::header::{CONNECTION, HeaderMap, HeaderValue, IntoHeaderName};
use http::{StatusCode, Version};

use crate::types::Method;

/// An HTTP request to be sent over a persistent connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    method: Method,
    target: String,
    headers: HeaderMap,
    body: Bytes,
}

impl Request {
    /// Create a `GET` request for the given origin-form target (`/path?query`).
    pub fn get(target: impl Into<String>) -> Self {
        Self::builder(Method::Get, target).build()
    }

    /// Create a request builder.
    pub fn builder(method: Method, target: impl Into<String>) -> RequestBuilder {
        RequestBuilder::new(method, target)
    }

    /// Get the request method.
    pub fn method(&self) -> Method {
        self.method
    }

    /// Get the origin-form request target.
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Get the request headers.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Get mutable access to the request headers.
    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    /// Get the request body.
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Check if the caller asked for the connection to be closed after this request.
    pub fn wants_close(&self) -> bool {
        has_connection_token(&self.headers, "close")
    }
}

/// Builder for constructing HTTP requests.
#[derive(Debug, Clone)]
pub struct RequestBuilder {
    method: Method,
    target: String,
    headers: HeaderMap,
    body: Bytes,
}

impl RequestBuilder {
    /// Create a new request builder.
    pub fn new(method: Method, target: impl Into<String>) -> Self {
        let mut target = target.into();
        if target.is_empty() {
            target.push('/');
        }
        Self {
            method,
            target,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    /// Set a header, replacing any previous value.
    pub fn header<K: IntoHeaderName>(mut self, name: K, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Set the request body.
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Build the request.
    pub fn build(self) -> Request {
        Request {
            method: self.method,
            target: self.target,
            headers: self.headers,
            body: self.body,
        }
    }
}

/// A fully buffered HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Protocol version reported on the status line.
    pub version: Version,
    /// Response status.
    pub status: StatusCode,
    /// Response headers.
    pub headers: HeaderMap,
    /// Response body with transfer coding removed.
    pub body: Bytes,
}

impl Response {
    /// Check if the status is 2xx.
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Get a header value as a string, if present and valid UTF-8.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Get the body as text, replacing invalid UTF-8.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Check if the server signalled that the connection will not be reused.
    ///
    /// HTTP/1.0 (and older) responses close unless they opt into keep-alive.
    pub fn wants_close(&self) -> bool {
        if has_connection_token(&self.headers, "close") {
            return true;
        }
        self.version < Version::HTTP_11 && !has_connection_token(&self.headers, "keep-alive")
    }
}

/// Check whether any `Connection` header lists `token`.
pub(crate) fn has_connection_token(headers: &HeaderMap, token: &str) -> bool {
    headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|t| t.trim().eq_ignore_ascii_case(token))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(version: Version, connection: Option<&'static str>) -> Response {
        let mut headers = HeaderMap::new();
        if let Some(value) = connection {
            headers.insert(CONNECTION, HeaderValue::from_static(value));
        }
        Response {
            version,
            status: StatusCode::OK,
            headers,
            body: Bytes::new(),
        }
    }

    #[test]
    fn test_request_builder() {
        let request = Request::builder(Method::Post, "/items")
            .header("x-trace", HeaderValue::from_static("abc"))
            .body(b"payload".as_slice())
            .build();

        assert_eq!(request.method(), Method::Post);
        assert_eq!(request.target(), "/items");
        assert_eq!(request.headers()["x-trace"], "abc");
        assert_eq!(request.body().as_ref(), b"payload");
        assert!(!request.wants_close());
    }

    #[test]
    fn test_empty_target_becomes_root() {
        assert_eq!(Request::get("").target(), "/");
    }

    #[test]
    fn test_request_close() {
        let request = Request::builder(Method::Get, "/")
            .header(CONNECTION, HeaderValue::from_static("Close"))
            .build();
        assert!(request.wants_close());
    }

    #[test]
    fn test_response_close_signals() {
        assert!(!response(Version::HTTP_11, None).wants_close());
        assert!(response(Version::HTTP_11, Some("close")).wants_close());
        assert!(response(Version::HTTP_10, None).wants_close());
        assert!(!response(Version::HTTP_10, Some("Keep-Alive")).wants_close());
        assert!(response(Version::HTTP_11, Some("upgrade, close")).wants_close());
    }
}
