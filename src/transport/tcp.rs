//! TCP (and TLS-over-TCP) transport.

use std::io::{self, BufReader, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;

use rustls::{ClientConnection, StreamOwned};
use tracing::{debug, trace};

use crate::codec::{read_response, write_request};
use crate::connection::{ClientConfig, SocketOptions};
use crate::error::{ConnectivityKind, HttpError, Result};
use crate::key::ConnectionKey;
use crate::message::Request;
use crate::proxy::basic_authorization;
use crate::types::Method;

use super::tls::TlsConnector;
use super::{Connector, Transport};

/// A plain TCP transport.
#[derive(Debug)]
pub struct TcpTransport {
    stream: TcpStream,
}

impl TcpTransport {
    /// Wrap a connected stream.
    pub fn new(stream: TcpStream) -> Self {
        Self { stream }
    }

    /// Get the underlying stream.
    pub fn get_ref(&self) -> &TcpStream {
        &self.stream
    }
}

impl Read for TcpTransport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf)
    }
}

impl Write for TcpTransport {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stream.flush()
    }
}

impl Transport for TcpTransport {
    fn shutdown(&mut self) -> io::Result<()> {
        match self.stream.shutdown(Shutdown::Both) {
            Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(()),
            other => other,
        }
    }
}

/// A TLS session over TCP.
pub struct TlsTransport {
    stream: StreamOwned<ClientConnection, TcpStream>,
}

impl TlsTransport {
    pub(crate) fn new(stream: StreamOwned<ClientConnection, TcpStream>) -> Self {
        Self { stream }
    }

    /// Get the negotiated TLS connection state.
    pub fn connection(&self) -> &ClientConnection {
        &self.stream.conn
    }
}

impl std::fmt::Debug for TlsTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsTransport")
            .field("peer", &self.stream.sock.peer_addr().ok())
            .field("protocol", &self.stream.conn.protocol_version())
            .finish()
    }
}

impl Read for TlsTransport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf)
    }
}

impl Write for TlsTransport {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stream.flush()
    }
}

impl Transport for TlsTransport {
    fn shutdown(&mut self) -> io::Result<()> {
        self.stream.conn.send_close_notify();
        // Best effort; the peer may already be gone.
        let _ = self.stream.conn.complete_io(&mut self.stream.sock);
        match self.stream.sock.shutdown(Shutdown::Both) {
            Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(()),
            other => other,
        }
    }
}

/// Production connector over `std::net`.
///
/// Resolves the destination (or proxy), connects with a timeout, applies
/// socket options to the fresh socket, tunnels through the proxy when the
/// destination is encrypted, then performs the TLS handshake.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    connect_timeout: Duration,
    read_timeout: Option<Duration>,
    write_timeout: Option<Duration>,
    socket_options: SocketOptions,
    tls: Arc<TlsConnector>,
}

impl TcpConnector {
    /// Create a connector with the given TLS setup.
    pub fn new(tls: TlsConnector) -> Self {
        let defaults = ClientConfig::default();
        Self {
            connect_timeout: defaults.connect_timeout,
            read_timeout: defaults.read_timeout,
            write_timeout: defaults.write_timeout,
            socket_options: defaults.socket_options,
            tls: Arc::new(tls),
        }
    }

    /// Create a connector from a client configuration.
    pub fn from_config(config: &ClientConfig) -> Result<Self> {
        let tls = TlsConnector::new(&config.tls)?;
        Ok(Self {
            connect_timeout: config.connect_timeout,
            read_timeout: config.read_timeout,
            write_timeout: config.write_timeout,
            socket_options: config.socket_options.clone(),
            tls: Arc::new(tls),
        })
    }

    /// Get the TLS connector.
    pub fn tls(&self) -> &TlsConnector {
        &self.tls
    }

    fn dial(&self, host: &str, port: u16) -> Result<TcpStream> {
        let addrs = (host, port)
            .to_socket_addrs()
            .map_err(|_| HttpError::Connectivity {
                kind: ConnectivityKind::Unreachable,
                addr: host.to_string(),
                port,
            })?;

        let mut last_err = io::Error::new(io::ErrorKind::AddrNotAvailable, "no addresses resolved");
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, self.connect_timeout) {
                Ok(stream) => {
                    self.configure(&stream)?;
                    trace!(%addr, "socket connected");
                    return Ok(stream);
                }
                Err(e) => {
                    trace!(%addr, error = %e, "connect attempt failed");
                    last_err = e;
                }
            }
        }
        Err(HttpError::connect(last_err, host, port))
    }

    /// Applied once per socket, right after it is started.
    fn configure(&self, stream: &TcpStream) -> Result<()> {
        stream.set_read_timeout(self.read_timeout)?;
        stream.set_write_timeout(self.write_timeout)?;
        stream.set_nodelay(self.socket_options.nodelay)?;
        if let Some(ttl) = self.socket_options.ttl {
            stream.set_ttl(ttl)?;
        }
        Ok(())
    }

    fn tunnel(&self, stream: &TcpStream, key: &ConnectionKey) -> Result<()> {
        let authority = key.authority();
        let mut builder = Request::builder(Method::Connect, authority.clone());
        if let Some(user) = key.proxy().and_then(|p| p.user.as_deref()) {
            let password = key.proxy().and_then(|p| p.password.as_deref());
            builder = builder.header(
                http::header::PROXY_AUTHORIZATION,
                basic_authorization(user, password)?,
            );
        }
        let request = builder.build();

        let mut writer = stream;
        write_request(&mut writer, &request, &authority, &authority)?;

        let mut reader = BufReader::new(stream);
        let (response, _) = read_response(&mut reader, Method::Connect)?;
        if !response.status.is_success() {
            return Err(HttpError::Connectivity {
                kind: ConnectivityKind::TunnelRejected(response.status.as_u16()),
                addr: key.host().to_string(),
                port: key.port(),
            });
        }
        debug!(destination = %key, "proxy tunnel established");
        Ok(())
    }
}

impl Connector for TcpConnector {
    fn connect(&self, key: &ConnectionKey) -> Result<Box<dyn Transport>> {
        let stream = match key.proxy() {
            Some(proxy) => self.dial(&proxy.host, proxy.port)?,
            None => self.dial(key.host(), key.port())?,
        };

        if !key.is_tls() {
            debug!(destination = %key, "connected");
            return Ok(Box::new(TcpTransport::new(stream)));
        }

        if key.proxy().is_some() {
            self.tunnel(&stream, key)?;
        }
        let transport = self.tls.connect(key, stream)?;
        debug!(destination = %key, "connected with TLS");
        Ok(Box::new(transport))
    }
}
