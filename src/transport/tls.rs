//! TLS client setup on top of rustls.

use std::fmt;
use std::fs::File;
use std::io::BufReader;
use std::net::TcpStream;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustls::client::WebPkiServerVerifier;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{CryptoProvider, verify_tls12_signature, verify_tls13_signature};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::{ClientConfig, ClientConnection, DigitallySignedStruct, RootCertStore, SignatureScheme, StreamOwned};
use tracing::{debug, trace};

use crate::error::{HttpError, Result};
use crate::key::ConnectionKey;

use super::session::SessionReuseCache;
use super::tcp::TlsTransport;

/// Default number of cached sessions per destination.
pub const DEFAULT_SESSIONS_PER_DESTINATION: usize = 8;

/// Server certificate verification mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum VerifyMode {
    /// Verify the chain against the trusted roots and the server name.
    #[default]
    Peer,
    /// Accept any certificate. Handshake signatures are still checked.
    None,
}

/// Final say on a server certificate.
///
/// Called with the end-entity certificate and whether chain verification
/// passed; returning `false` aborts the handshake.
pub type VerifyCallback = Arc<dyn Fn(&CertificateDer<'_>, bool) -> bool + Send + Sync>;

/// TLS options for encrypted destinations.
#[derive(Clone)]
pub struct TlsOptions {
    /// PEM file with the client certificate chain.
    pub client_cert: Option<PathBuf>,
    /// PEM file with the client private key.
    pub private_key: Option<PathBuf>,
    /// PEM file with trusted roots; replaces the bundled roots when set.
    pub ca_file: Option<PathBuf>,
    /// Verification mode.
    pub verify_mode: VerifyMode,
    /// Optional verification callback.
    pub verify_callback: Option<VerifyCallback>,
    /// Reuse TLS sessions per destination.
    pub reuse_sessions: bool,
    /// Sessions kept per destination.
    pub sessions_per_destination: usize,
}

impl Default for TlsOptions {
    fn default() -> Self {
        Self {
            client_cert: None,
            private_key: None,
            ca_file: None,
            verify_mode: VerifyMode::Peer,
            verify_callback: None,
            reuse_sessions: true,
            sessions_per_destination: DEFAULT_SESSIONS_PER_DESTINATION,
        }
    }
}

impl TlsOptions {
    /// Create default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the client certificate and private key files.
    pub fn with_client_identity(mut self, cert: impl Into<PathBuf>, key: impl Into<PathBuf>) -> Self {
        self.client_cert = Some(cert.into());
        self.private_key = Some(key.into());
        self
    }

    /// Trust only the roots in this PEM file.
    pub fn with_ca_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.ca_file = Some(path.into());
        self
    }

    /// Set the verification mode.
    pub fn with_verify_mode(mut self, mode: VerifyMode) -> Self {
        self.verify_mode = mode;
        self
    }

    /// Set the verification callback.
    pub fn with_verify_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(&CertificateDer<'_>, bool) -> bool + Send + Sync + 'static,
    {
        self.verify_callback = Some(Arc::new(callback));
        self
    }

    /// Enable or disable session reuse.
    pub fn with_session_reuse(mut self, enabled: bool) -> Self {
        self.reuse_sessions = enabled;
        self
    }
}

impl fmt::Debug for TlsOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsOptions")
            .field("client_cert", &self.client_cert)
            .field("private_key", &self.private_key.as_ref().map(|_| "<redacted>"))
            .field("ca_file", &self.ca_file)
            .field("verify_mode", &self.verify_mode)
            .field("verify_callback", &self.verify_callback.is_some())
            .field("reuse_sessions", &self.reuse_sessions)
            .field("sessions_per_destination", &self.sessions_per_destination)
            .finish()
    }
}

/// Performs TLS handshakes over connected sockets.
///
/// Holds one base rustls configuration; each handshake clones it and
/// attaches the session store of its destination.
#[derive(Debug)]
pub struct TlsConnector {
    config: ClientConfig,
    sessions: SessionReuseCache,
}

impl TlsConnector {
    /// Build the rustls configuration for `options`.
    pub fn new(options: &TlsOptions) -> Result<Self> {
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let roots = Arc::new(load_roots(options.ca_file.as_deref())?);

        let verifier: Arc<dyn ServerCertVerifier> = match (options.verify_mode, &options.verify_callback) {
            (VerifyMode::Peer, None) => webpki_verifier(roots, &provider)?,
            (mode, callback) => Arc::new(CallbackVerifier {
                webpki: match mode {
                    VerifyMode::Peer => Some(webpki_verifier(roots, &provider)?),
                    VerifyMode::None => None,
                },
                callback: callback.clone(),
                provider: provider.clone(),
            }),
        };

        let builder = ClientConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .map_err(tls_error)?
            .dangerous()
            .with_custom_certificate_verifier(verifier);

        let config = match (&options.client_cert, &options.private_key) {
            (Some(cert), Some(key)) => builder
                .with_client_auth_cert(load_certs(cert)?, load_private_key(key)?)
                .map_err(tls_error)?,
            (None, None) => builder.with_no_client_auth(),
            _ => {
                return Err(HttpError::configuration(
                    "client certificate and private key must be set together",
                ));
            }
        };

        let sessions = if options.reuse_sessions {
            SessionReuseCache::new(options.sessions_per_destination)
        } else {
            SessionReuseCache::disabled()
        };

        debug!(
            verify_mode = ?options.verify_mode,
            reuse_sessions = options.reuse_sessions,
            "TLS connector ready"
        );
        Ok(Self { config, sessions })
    }

    /// Get the session reuse cache.
    pub fn sessions(&self) -> &SessionReuseCache {
        &self.sessions
    }

    /// Run the handshake for `key` over `stream`.
    pub fn connect(&self, key: &ConnectionKey, mut stream: TcpStream) -> Result<TlsTransport> {
        let server_name = ServerName::try_from(key.host().to_string())
            .map_err(|e| HttpError::Tls(format!("invalid server name {}: {e}", key.host())))?;

        let mut config = self.config.clone();
        config.resumption = self.sessions.resumption_for(key);

        let mut conn = ClientConnection::new(Arc::new(config), server_name).map_err(tls_error)?;
        while conn.is_handshaking() {
            conn.complete_io(&mut stream)
                .map_err(|e| HttpError::Tls(format!("handshake with {key} failed: {e}")))?;
        }
        trace!(
            destination = %key,
            protocol = ?conn.protocol_version(),
            "handshake complete"
        );
        Ok(TlsTransport::new(StreamOwned::new(conn, stream)))
    }
}

fn tls_error(e: rustls::Error) -> HttpError {
    HttpError::Tls(e.to_string())
}

fn webpki_verifier(
    roots: Arc<RootCertStore>,
    provider: &Arc<CryptoProvider>,
) -> Result<Arc<WebPkiServerVerifier>> {
    WebPkiServerVerifier::builder_with_provider(roots, provider.clone())
        .build()
        .map_err(|e| HttpError::configuration(format!("cannot build certificate verifier: {e}")))
}

fn load_roots(ca_file: Option<&Path>) -> Result<RootCertStore> {
    let mut roots = RootCertStore::empty();
    match ca_file {
        Some(path) => {
            for cert in load_certs(path)? {
                roots.add(cert).map_err(|e| {
                    HttpError::configuration(format!("bad CA certificate in {}: {e}", path.display()))
                })?;
            }
        }
        None => roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned()),
    }
    Ok(roots)
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let mut reader = BufReader::new(open(path)?);
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<std::io::Result<Vec<_>>>()
        .map_err(|e| HttpError::configuration(format!("cannot read {}: {e}", path.display())))?;
    if certs.is_empty() {
        return Err(HttpError::configuration(format!(
            "no certificates in {}",
            path.display()
        )));
    }
    Ok(certs)
}

fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>> {
    let mut reader = BufReader::new(open(path)?);
    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| HttpError::configuration(format!("cannot read {}: {e}", path.display())))?
        .ok_or_else(|| HttpError::configuration(format!("no private key in {}", path.display())))
}

fn open(path: &Path) -> Result<File> {
    File::open(path)
        .map_err(|e| HttpError::configuration(format!("cannot open {}: {e}", path.display())))
}

/// Verifier used when verification is relaxed or a callback is installed.
struct CallbackVerifier {
    webpki: Option<Arc<WebPkiServerVerifier>>,
    callback: Option<VerifyCallback>,
    provider: Arc<CryptoProvider>,
}

impl fmt::Debug for CallbackVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackVerifier")
            .field("verify_peer", &self.webpki.is_some())
            .field("callback", &self.callback.is_some())
            .finish()
    }
}

impl ServerCertVerifier for CallbackVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        // Without peer verification the callback result is ignored.
        let Some(webpki) = &self.webpki else {
            return Ok(ServerCertVerified::assertion());
        };
        let verified =
            webpki.verify_server_cert(end_entity, intermediates, server_name, ocsp_response, now);
        match &self.callback {
            Some(callback) if callback(end_entity, verified.is_ok()) => {
                Ok(ServerCertVerified::assertion())
            }
            Some(_) => Err(rustls::Error::General(
                "certificate rejected by verify callback".into(),
            )),
            None => verified,
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.provider.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.provider.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider.signature_verification_algorithms.supported_schemes()
    }
}
