//! Client-side TLS connector construction.
//!
//! The connector is rebuilt from the config on every connect attempt; the
//! cost is dominated by the PEM reads, which only happen when custom
//! credentials are configured.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use rustls::client::danger::{
    HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier,
};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::{DigitallySignedStruct, RootCertStore, SignatureScheme};
use tokio_tungstenite::Connector;

use courier_core::CourierError;

use crate::config::ClientTlsConfig;

/// Build the connector for one connection attempt. `None` means plain TCP.
pub(crate) fn connector(config: &ClientTlsConfig) -> Result<Option<Connector>, CourierError> {
    if !config.enabled {
        return Ok(None);
    }

    let mut roots = RootCertStore::empty();
    if let Some(ca_path) = &config.ca_certs {
        for cert in load_certs(ca_path)? {
            roots
                .add(cert)
                .map_err(|e| CourierError::tls(format!("invalid CA certificate: {e}")))?;
        }
    } else {
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    }

    let builder = rustls::ClientConfig::builder().with_root_certificates(roots);
    let mut tls = match (&config.certfile, &config.keyfile) {
        (Some(certfile), Some(keyfile)) => {
            let certs = load_certs(certfile)?;
            let key = load_key(keyfile)?;
            builder
                .with_client_auth_cert(certs, key)
                .map_err(|e| CourierError::tls(format!("client certificate rejected: {e}")))?
        }
        (None, None) => builder.with_no_client_auth(),
        _ => {
            return Err(CourierError::tls(
                "certfile and keyfile must be set together",
            ))
        }
    };

    // rustls couples hostname checking to chain verification, so disabling
    // either one swaps in the accept-all verifier.
    if !config.verify || !config.check_hostname {
        tls.dangerous()
            .set_certificate_verifier(Arc::new(AcceptAll::new()));
    }

    Ok(Some(Connector::Rustls(Arc::new(tls))))
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, CourierError> {
    let file = File::open(path)
        .map_err(|e| CourierError::tls(format!("open {}: {e}", path.display())))?;
    let certs: Result<Vec<_>, _> = rustls_pemfile::certs(&mut BufReader::new(file)).collect();
    certs.map_err(|e| CourierError::tls(format!("parse {}: {e}", path.display())))
}

fn load_key(path: &Path) -> Result<PrivateKeyDer<'static>, CourierError> {
    let file = File::open(path)
        .map_err(|e| CourierError::tls(format!("open {}: {e}", path.display())))?;
    rustls_pemfile::private_key(&mut BufReader::new(file))
        .map_err(|e| CourierError::tls(format!("parse {}: {e}", path.display())))?
        .ok_or_else(|| CourierError::tls(format!("no private key in {}", path.display())))
}

/// Verifier that accepts any server certificate. Installed only when the
/// operator explicitly turned verification off.
#[derive(Debug)]
struct AcceptAll {
    provider: CryptoProvider,
}

impl AcceptAll {
    fn new() -> Self {
        Self {
            provider: rustls::crypto::ring::default_provider(),
        }
    }
}

impl ServerCertVerifier for AcceptAll {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_tls_yields_plain_connector() {
        let config = ClientTlsConfig::default();
        assert!(connector(&config).unwrap().is_none());
    }

    #[test]
    fn enabled_tls_with_web_roots_builds() {
        let config = ClientTlsConfig {
            enabled: true,
            ..ClientTlsConfig::default()
        };
        assert!(matches!(
            connector(&config).unwrap(),
            Some(Connector::Rustls(_))
        ));
    }

    #[test]
    fn no_verify_builds() {
        let config = ClientTlsConfig {
            enabled: true,
            verify: false,
            ..ClientTlsConfig::default()
        };
        assert!(connector(&config).unwrap().is_some());
    }

    #[test]
    fn missing_ca_path_errors() {
        let config = ClientTlsConfig {
            enabled: true,
            ca_certs: Some("/nonexistent/ca.pem".into()),
            ..ClientTlsConfig::default()
        };
        assert!(connector(&config).is_err());
    }

    #[test]
    fn certfile_without_keyfile_errors() {
        let config = ClientTlsConfig {
            enabled: true,
            certfile: Some("/tmp/cert.pem".into()),
            ..ClientTlsConfig::default()
        };
        assert!(connector(&config).is_err());
    }
}
