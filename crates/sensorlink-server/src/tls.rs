// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! TLS termination with mandatory client certificates.
//!
//! Devices authenticate with a certificate issued by the configured root CA.
//! Certificates whose serial number is listed as expired are still accepted
//! by the handshake but turned away right after it, so the device gets an
//! explicit notice instead of a bare handshake failure.

use crate::config::TlsConfig;
use rustls::crypto::CryptoProvider;
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::WebPkiClientVerifier;
use rustls::{RootCertStore, ServerConfig};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tokio_rustls::TlsAcceptor;

/// Notice sent to a device presenting an expired certificate.
pub const EXPIRED_NOTICE: &str = "Sorry! Your certificate has been expired!";

#[derive(Debug, Error)]
pub enum TlsError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("certificate error: {0}")]
    Certificate(String),

    #[error("private key error: {0}")]
    PrivateKey(String),

    #[error("TLS configuration error: {0}")]
    Config(String),
}

/// Crypto provider shared by the server and tests.
pub fn crypto_provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

/// Build the server-side rustls configuration from PEM files.
pub fn server_config(tls: &TlsConfig) -> Result<Arc<ServerConfig>, TlsError> {
    let certs = parse_certificates(&read_pem(&tls.cert_path)?)?;
    if certs.is_empty() {
        return Err(TlsError::Certificate(
            "no server certificates found".into(),
        ));
    }
    let key = parse_private_key(&read_pem(&tls.key_path)?)?;

    let ca_certs = parse_certificates(&read_pem(&tls.root_ca_path)?)?;
    if ca_certs.is_empty() {
        return Err(TlsError::Certificate("no CA certificates found".into()));
    }

    let mut root_store = RootCertStore::empty();
    for cert in ca_certs {
        root_store
            .add(cert)
            .map_err(|e| TlsError::Certificate(format!("failed to add CA certificate: {e}")))?;
    }

    let provider = crypto_provider();
    let verifier = WebPkiClientVerifier::builder_with_provider(Arc::new(root_store), provider.clone())
        .build()
        .map_err(|e| TlsError::Config(format!("client verifier error: {e}")))?;

    let config = ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| TlsError::Config(format!("protocol versions: {e}")))?
        .with_client_cert_verifier(verifier)
        .with_single_cert(certs, key)
        .map_err(|e| TlsError::Config(format!("server config error: {e}")))?;

    Ok(Arc::new(config))
}

/// Create the acceptor used by the accept loop.
pub fn acceptor(tls: &TlsConfig) -> Result<TlsAcceptor, TlsError> {
    Ok(TlsAcceptor::from(server_config(tls)?))
}

fn read_pem(path: &Path) -> Result<Vec<u8>, TlsError> {
    std::fs::read(path).map_err(|e| TlsError::Read {
        path: path.display().to_string(),
        source: e,
    })
}

/// Parse PEM-encoded certificates.
fn parse_certificates(pem: &[u8]) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    CertificateDer::pem_slice_iter(pem)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| TlsError::Certificate(format!("failed to parse certificates: {e}")))
}

/// Parse PEM-encoded private key.
fn parse_private_key(pem: &[u8]) -> Result<PrivateKeyDer<'static>, TlsError> {
    PrivateKeyDer::from_pem_slice(pem)
        .map_err(|e| TlsError::PrivateKey(format!("failed to parse private key: {e}")))
}

/// Serial number of a DER certificate, as uppercase hex.
pub fn certificate_serial(cert: &CertificateDer<'_>) -> Result<String, TlsError> {
    let (_, parsed) = x509_parser::parse_x509_certificate(cert.as_ref())
        .map_err(|e| TlsError::Certificate(format!("failed to parse peer certificate: {e}")))?;

    Ok(parsed
        .tbs_certificate
        .raw_serial()
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect())
}

/// Canonical form of a hex serial: uppercase, no separators or leading
/// zeros.
pub fn normalize_serial(serial: &str) -> String {
    let hex: String = serial
        .chars()
        .filter(|c| !matches!(c, ':' | ' ' | '-'))
        .map(|c| c.to_ascii_uppercase())
        .collect();

    let trimmed = hex.trim_start_matches('0');
    if trimmed.is_empty() {
        "0".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Set of revoked client certificate serials.
#[derive(Debug, Clone, Default)]
pub struct ExpiredSerials {
    serials: HashSet<String>,
}

impl ExpiredSerials {
    pub fn new<I, S>(serials: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            serials: serials
                .into_iter()
                .map(|s| normalize_serial(s.as_ref()))
                .collect(),
        }
    }

    pub fn contains(&self, serial: &str) -> bool {
        self.serials.contains(&normalize_serial(serial))
    }

    pub fn len(&self) -> usize {
        self.serials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.serials.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_serial() {
        assert_eq!(normalize_serial("0a:1b:2c"), "A1B2C");
        assert_eq!(normalize_serial("00A1B2C"), "A1B2C");
        assert_eq!(normalize_serial("a1 b2 c"), "A1B2C");
        assert_eq!(normalize_serial("00:00"), "0");
    }

    #[test]
    fn test_expired_serials_lookup() {
        let expired = ExpiredSerials::new(["0A:1B:2C", "ff00"]);
        assert_eq!(expired.len(), 2);
        assert!(expired.contains("A1B2C"));
        assert!(expired.contains("00FF00"));
        assert!(!expired.contains("A1B2D"));
    }

    #[test]
    fn test_certificate_serial_from_generated_cert() {
        let key = rcgen::KeyPair::generate().unwrap();
        let mut params = rcgen::CertificateParams::new(vec!["device-1".to_string()]).unwrap();
        params.serial_number = Some(rcgen::SerialNumber::from_slice(&[0x01, 0xA2, 0xB3]));
        let cert = params.self_signed(&key).unwrap();

        let serial = certificate_serial(cert.der()).unwrap();
        assert_eq!(normalize_serial(&serial), "1A2B3");
    }

    #[test]
    fn test_missing_files_reported() {
        let config = TlsConfig {
            cert_path: "/nonexistent/server.pem".into(),
            key_path: "/nonexistent/server.key".into(),
            root_ca_path: "/nonexistent/ca.pem".into(),
            expired_serials: vec![],
        };
        assert!(matches!(server_config(&config), Err(TlsError::Read { .. })));
    }

    #[test]
    fn test_garbage_certificate_rejected() {
        let cert = CertificateDer::from(vec![0x30, 0x03, 0x01, 0x02, 0x03]);
        assert!(certificate_serial(&cert).is_err());
    }
}
