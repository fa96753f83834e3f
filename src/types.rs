//! Core HTTP types and constants.

use std::fmt;
use std::str::FromStr;

use crate::error::HttpError;

/// Default `Keep-Alive` value advertised to servers, in seconds.
pub const DEFAULT_KEEP_ALIVE_SECS: u64 = 30;

/// Default idle window after which a cached connection is reset, in seconds.
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 5;

/// Request methods understood by the executor.
///
/// The set is closed on purpose: idempotency is decided by value, and a
/// method the enum cannot name cannot be sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    /// Retrieve a representation.
    Get,
    /// Like `GET` without a body.
    Head,
    /// Submit data to be processed.
    Post,
    /// Replace a resource.
    Put,
    /// Delete a resource.
    Delete,
    /// Describe communication options.
    Options,
    /// Loop-back diagnostic.
    Trace,
    /// Partially modify a resource.
    Patch,
    /// Establish a tunnel.
    Connect,
}

impl Method {
    /// Check if replaying this method has no additional side effects.
    pub fn is_idempotent(&self) -> bool {
        matches!(
            self,
            Self::Get | Self::Head | Self::Put | Self::Delete | Self::Options | Self::Trace
        )
    }

    /// Check if a response to this method never carries a body.
    pub fn response_has_no_body(&self) -> bool {
        matches!(self, Self::Head)
    }

    /// The method token as it appears on the request line.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Head => "HEAD",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
            Self::Options => "OPTIONS",
            Self::Trace => "TRACE",
            Self::Patch => "PATCH",
            Self::Connect => "CONNECT",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = HttpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(Self::Get),
            "HEAD" => Ok(Self::Head),
            "POST" => Ok(Self::Post),
            "PUT" => Ok(Self::Put),
            "DELETE" => Ok(Self::Delete),
            "OPTIONS" => Ok(Self::Options),
            "TRACE" => Ok(Self::Trace),
            "PATCH" => Ok(Self::Patch),
            "CONNECT" => Ok(Self::Connect),
            other => Err(HttpError::configuration(format!("unsupported method {other}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_idempotent_methods() {
        for method in [
            Method::Get,
            Method::Head,
            Method::Put,
            Method::Delete,
            Method::Options,
            Method::Trace,
        ] {
            assert!(method.is_idempotent(), "{method} should be idempotent");
        }
        for method in [Method::Post, Method::Patch, Method::Connect] {
            assert!(!method.is_idempotent(), "{method} should not be idempotent");
        }
    }

    #[test]
    fn test_method_parse() {
        assert_eq!("get".parse::<Method>().unwrap(), Method::Get);
        assert_eq!("DELETE".parse::<Method>().unwrap(), Method::Delete);
        assert!("BREW".parse::<Method>().is_err());
    }
}
