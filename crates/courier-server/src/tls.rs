//! TLS credential loading and the TLS accept loop.
//!
//! Credentials are read once at server construction; any problem with the
//! configured paths is fatal before the listener binds. Handshake failures
//! at accept time only drop that one connection.

use std::fs::File;
use std::io::{self, BufReader};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::WebPkiClientVerifier;
use rustls::RootCertStore;
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::server::TlsStream;
use tokio_rustls::TlsAcceptor;
use tracing::debug;

use courier_core::CourierError;

use crate::config::ServerConfig;

/// Build the rustls server configuration from the configured credential
/// paths. Requires `ssl_certfile` and `ssl_keyfile`; when `ssl_verify` is
/// set, `ssl_ca_certs` supplies the roots for client-certificate
/// verification.
pub fn load_server_tls(config: &ServerConfig) -> Result<Arc<rustls::ServerConfig>, CourierError> {
    let certfile = config
        .ssl_certfile
        .as_deref()
        .ok_or_else(|| CourierError::tls("ssl_certfile not set"))?;
    let keyfile = config
        .ssl_keyfile
        .as_deref()
        .ok_or_else(|| CourierError::tls("ssl_keyfile not set"))?;

    let certs = load_certs(certfile)?;
    let key = load_key(keyfile)?;

    let builder = if config.ssl_verify {
        let ca_path = config
            .ssl_ca_certs
            .as_deref()
            .ok_or_else(|| CourierError::tls("ssl_verify requires ssl_ca_certs"))?;
        let mut roots = RootCertStore::empty();
        for cert in load_certs(ca_path)? {
            roots
                .add(cert)
                .map_err(|e| CourierError::tls(format!("invalid CA certificate: {e}")))?;
        }
        let verifier = WebPkiClientVerifier::builder(Arc::new(roots))
            .build()
            .map_err(|e| CourierError::tls(format!("client verifier: {e}")))?;
        rustls::ServerConfig::builder().with_client_cert_verifier(verifier)
    } else {
        rustls::ServerConfig::builder().with_no_client_auth()
    };

    let tls = builder
        .with_single_cert(certs, key)
        .map_err(|e| CourierError::tls(format!("certificate chain rejected: {e}")))?;
    Ok(Arc::new(tls))
}

pub(crate) fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, CourierError> {
    let file = File::open(path)
        .map_err(|e| CourierError::tls(format!("open {}: {e}", path.display())))?;
    let certs: Result<Vec<_>, _> = rustls_pemfile::certs(&mut BufReader::new(file)).collect();
    let certs =
        certs.map_err(|e| CourierError::tls(format!("parse {}: {e}", path.display())))?;
    if certs.is_empty() {
        return Err(CourierError::tls(format!(
            "no certificates in {}",
            path.display()
        )));
    }
    Ok(certs)
}

pub(crate) fn load_key(path: &Path) -> Result<PrivateKeyDer<'static>, CourierError> {
    let file = File::open(path)
        .map_err(|e| CourierError::tls(format!("open {}: {e}", path.display())))?;
    rustls_pemfile::private_key(&mut BufReader::new(file))
        .map_err(|e| CourierError::tls(format!("parse {}: {e}", path.display())))?
        .ok_or_else(|| CourierError::tls(format!("no private key in {}", path.display())))
}

/// A TCP listener that terminates TLS before handing connections to axum.
pub struct TlsListener {
    inner: TcpListener,
    acceptor: TlsAcceptor,
}

impl TlsListener {
    #[must_use]
    pub fn new(inner: TcpListener, acceptor: TlsAcceptor) -> Self {
        Self { inner, acceptor }
    }
}

impl axum::serve::Listener for TlsListener {
    type Io = TlsStream<TcpStream>;
    type Addr = SocketAddr;

    async fn accept(&mut self) -> (Self::Io, Self::Addr) {
        loop {
            match self.inner.accept().await {
                Ok((tcp, addr)) => match self.acceptor.accept(tcp).await {
                    Ok(tls) => return (tls, addr),
                    Err(error) => {
                        debug!(%addr, %error, "TLS handshake failed");
                    }
                },
                Err(error) => {
                    debug!(%error, "TCP accept failed");
                    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
                }
            }
        }
    }

    fn local_addr(&self) -> io::Result<Self::Addr> {
        self.inner.local_addr()
    }
}
