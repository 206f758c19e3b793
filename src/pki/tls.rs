//! TLS termination with optional client certificates.
//!
//! Provides:
//! - [`build_tls_config`]: a `rustls::ServerConfig` trusting the client CA
//! - [`PeerCertAcceptor`]: an `axum-server` acceptor that records the peer
//!   certificate chain of each connection as a [`TlsSession`] request extension
//!
//! Client certificates are requested but not required at the handshake.
//! Registration (`POST /user/`) has to accept clients that do not have one
//! yet; the authentication gate enforces presence on protected routes.

use std::io;
use std::path::Path;
use std::sync::Arc;

use axum::Extension;
use axum::middleware::AddExtension;
use axum_server::accept::{Accept, DefaultAcceptor};
use axum_server::tls_rustls::{RustlsAcceptor, RustlsConfig};
use futures::future::BoxFuture;
use rustls::ServerConfig;
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::WebPkiClientVerifier;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_rustls::server::TlsStream;
use tower::Layer;
use tracing::debug;

use super::pem::{CERTIFICATE_TAG, decode_pem};
use crate::{Error, Result};

// ─────────────────────────────────────────────────────────────────────────────
// Session data
// ─────────────────────────────────────────────────────────────────────────────

/// TLS facts of the connection a request arrived on.
///
/// Inserted into request extensions by [`PeerCertAcceptor`]. Absent when the
/// server runs without TLS.
#[derive(Debug, Clone, Default)]
pub struct TlsSession {
    /// Peer certificate chain in DER, leaf first. Empty if none was sent.
    pub peer_certificates: Vec<Vec<u8>>,
}

impl TlsSession {
    /// Session presenting `chain`.
    #[must_use]
    pub fn with_peer_certificates(chain: Vec<Vec<u8>>) -> Self {
        Self {
            peer_certificates: chain,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Server config
// ─────────────────────────────────────────────────────────────────────────────

/// Build the server TLS config.
///
/// Client certificates chaining to `clients_ca` are verified during the
/// handshake when presented; connections without one are still accepted.
///
/// # Errors
///
/// Returns [`Error::Config`] if a file cannot be read or parsed, or if the
/// server certificate and key do not match.
pub fn build_tls_config(
    server_cert: &Path,
    server_key: &Path,
    clients_ca: &Path,
) -> Result<ServerConfig> {
    let provider = Arc::new(rustls::crypto::aws_lc_rs::default_provider());

    let server_certs = load_certs(server_cert)?;
    let server_key = load_private_key(server_key)?;

    let mut roots = rustls::RootCertStore::empty();
    for cert in load_certs(clients_ca)? {
        roots
            .add(cert)
            .map_err(|e| Error::Config(format!("Failed to add client CA to trust store: {e}")))?;
    }

    let client_verifier = client_verifier(roots, Arc::clone(&provider))?;

    let mut tls_cfg = ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| Error::Config(format!("TLS protocol setup failed: {e}")))?
        .with_client_cert_verifier(client_verifier)
        .with_single_cert(server_certs, server_key)
        .map_err(|e| Error::Config(format!("TLS config error (cert/key mismatch?): {e}")))?;

    // Prefer HTTP/2, fall back to HTTP/1.1
    tls_cfg.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];

    debug!(
        server_cert = %server_cert.display(),
        clients_ca = %clients_ca.display(),
        "TLS config built"
    );

    Ok(tls_cfg)
}

fn client_verifier(
    roots: rustls::RootCertStore,
    provider: Arc<CryptoProvider>,
) -> Result<Arc<dyn rustls::server::danger::ClientCertVerifier>> {
    WebPkiClientVerifier::builder_with_provider(Arc::new(roots), provider)
        .allow_unauthenticated()
        .build()
        .map_err(|e| Error::Config(format!("Failed to build client verifier: {e}")))
}

/// Load every `CERTIFICATE` block of a PEM file.
///
/// # Errors
///
/// Returns [`Error::Config`] if the file cannot be read or holds no
/// certificate.
pub fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let data = read_file(path)?;
    let blocks = ::pem::parse_many(&data)
        .map_err(|e| Error::Config(format!("Failed to parse certs from '{}': {e}", path.display())))?;

    let certs: Vec<CertificateDer<'static>> = blocks
        .into_iter()
        .filter(|block| block.tag() == CERTIFICATE_TAG)
        .map(|block| CertificateDer::from(block.into_contents()))
        .collect();

    if certs.is_empty() {
        return Err(Error::Config(format!(
            "No certificates found in '{}'",
            path.display()
        )));
    }
    Ok(certs)
}

/// Load the server private key (PKCS#8, PKCS#1 or SEC1 PEM).
///
/// # Errors
///
/// Returns [`Error::Config`] if the file cannot be read or holds no
/// recognisable key.
pub fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>> {
    let data = read_file(path)?;
    let der = decode_pem(&data, None).map_err(|e| {
        Error::Config(format!(
            "Failed to parse private key from '{}': {e}",
            path.display()
        ))
    })?;
    PrivateKeyDer::try_from(der).map_err(|e| {
        Error::Config(format!(
            "No private key found in '{}': {e}",
            path.display()
        ))
    })
}

fn read_file(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path)
        .map_err(|e| Error::Config(format!("Cannot read '{}': {e}", path.display())))
}

// ─────────────────────────────────────────────────────────────────────────────
// Acceptor
// ─────────────────────────────────────────────────────────────────────────────

/// Rustls acceptor exposing the peer certificate chain to handlers.
#[derive(Debug, Clone)]
pub struct PeerCertAcceptor {
    inner: RustlsAcceptor,
}

impl PeerCertAcceptor {
    /// Wrap a built server config.
    #[must_use]
    pub fn new(config: ServerConfig) -> Self {
        let config = RustlsConfig::from_config(Arc::new(config));
        Self {
            inner: RustlsAcceptor::new(config),
        }
    }
}

impl<I, S> Accept<I, S> for PeerCertAcceptor
where
    I: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    S: Send + 'static,
{
    type Stream = TlsStream<I>;
    type Service = AddExtension<S, TlsSession>;
    type Future = BoxFuture<'static, io::Result<(Self::Stream, Self::Service)>>;

    fn accept(&self, stream: I, service: S) -> Self::Future {
        let acceptor: RustlsAcceptor<DefaultAcceptor> = self.inner.clone();
        Box::pin(async move {
            let (stream, service) = acceptor.accept(stream, service).await?;
            let chain = stream
                .get_ref()
                .1
                .peer_certificates()
                .map(|certs| certs.iter().map(|cert| cert.as_ref().to_vec()).collect())
                .unwrap_or_default();
            let service = Extension(TlsSession::with_peer_certificates(chain)).layer(service);
            Ok((stream, service))
        })
    }
}
