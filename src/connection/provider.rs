//! The seam between request execution and connection storage.

use crate::error::Result;
use crate::key::ConnectionKey;

use super::persistent::Connection;

/// Hands out connections by key and takes them back.
///
/// A connection is owned by exactly one caller between `checkout` and the
/// matching `checkin` or `discard`.
pub trait ConnectionProvider {
    /// Get a started connection for `key`, creating one if needed.
    fn checkout(&mut self, key: &ConnectionKey) -> Result<Connection>;

    /// Return a healthy connection for reuse.
    fn checkin(&mut self, conn: Connection);

    /// Give up a connection that must not be reused; its socket is closed.
    fn discard(&mut self, conn: Connection);

    /// Close every idle connection. Safe to call more than once.
    fn shutdown(&mut self);
}
