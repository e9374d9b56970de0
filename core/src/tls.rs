//! rustls client configuration for `https` transports.
//!
//! With a certificate path, the server chain and host name are verified
//! against the certificates in that PEM file. Without one, verification is
//! switched off entirely: the connection is encrypted but the peer is not
//! authenticated.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{ring, verify_tls12_signature, verify_tls13_signature, CryptoProvider};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use rustls_pki_types::{CertificateDer, ServerName, UnixTime};

use crate::error::TransportError;

pub fn client_config(cert_path: Option<&Path>) -> Result<Arc<ClientConfig>, TransportError> {
    let provider = Arc::new(ring::default_provider());
    let builder = ClientConfig::builder_with_provider(provider.clone())
        .with_safe_default_protocol_versions()
        .map_err(|e| TransportError::Config(e.to_string()))?;

    let config = match cert_path {
        Some(path) => builder
            .with_root_certificates(load_roots(path)?)
            .with_no_client_auth(),
        None => {
            tracing::debug!("tls certificate verification disabled");
            builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(NoVerification(provider)))
                .with_no_client_auth()
        }
    };
    Ok(Arc::new(config))
}

pub fn server_name(host: &str) -> Result<ServerName<'static>, TransportError> {
    ServerName::try_from(host.to_string())
        .map_err(|_| TransportError::Config(format!("invalid tls server name: {host}")))
}

fn load_roots(path: &Path) -> Result<RootCertStore, TransportError> {
    let file = File::open(path)
        .map_err(|e| TransportError::Config(format!("cannot open {}: {e}", path.display())))?;
    let certs = rustls_pemfile::certs(&mut BufReader::new(file))
        .collect::<Result<Vec<CertificateDer<'static>>, _>>()
        .map_err(|e| TransportError::Config(format!("cannot read {}: {e}", path.display())))?;

    let mut roots = RootCertStore::empty();
    let (added, _ignored) = roots.add_parsable_certificates(certs);
    if added == 0 {
        return Err(TransportError::Config(format!(
            "no usable certificates in {}",
            path.display()
        )));
    }
    Ok(roots)
}

/// Accepts any server certificate. Handshake signatures are still checked
/// so the session keys belong to whoever presented the certificate.
#[derive(Debug)]
struct NoVerification(Arc<CryptoProvider>);

impl ServerCertVerifier for NoVerification {
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
        verify_tls12_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insecure_config_builds_without_a_certificate() {
        assert!(client_config(None).is_ok());
    }

    #[test]
    fn missing_certificate_file_is_a_config_error() {
        let err = client_config(Some(Path::new("/nonexistent/couch-ca.pem"))).unwrap_err();
        assert!(matches!(err, TransportError::Config(ref m) if m.contains("couch-ca.pem")));
    }

    #[test]
    fn file_without_certificates_is_a_config_error() {
        let path = std::env::temp_dir().join(format!("couch-transport-empty-{}.pem", std::process::id()));
        std::fs::write(&path, "not a certificate\n").unwrap();
        let err = client_config(Some(&path)).unwrap_err();
        std::fs::remove_file(&path).ok();
        assert!(matches!(err, TransportError::Config(ref m) if m.contains("no usable certificates")));
    }

    #[test]
    fn server_names_accept_hosts_and_addresses() {
        assert!(server_name("couch.example.com").is_ok());
        assert!(server_name("127.0.0.1").is_ok());
        assert!(server_name("bad host name").is_err());
    }
}
