//! TLS client configuration
//!
//! Certificates are verified against the bundled web PKI roots unless the
//! caller opts into [`CertificatePolicy::AcceptAny`].

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{DigitallySignedStruct, SignatureScheme};
use std::sync::Arc;
use tokio_rustls::TlsConnector;
use uptred_types::CertificatePolicy;

use crate::error::UptredError;

/// Build a client configuration for the given verification policy
pub fn client_config(policy: CertificatePolicy) -> Arc<rustls::ClientConfig> {
    let config = match policy {
        CertificatePolicy::Strict => {
            let roots = rustls::RootCertStore {
                roots: webpki_roots::TLS_SERVER_ROOTS.into(),
            };
            rustls::ClientConfig::builder()
                .with_root_certificates(roots)
                .with_no_client_auth()
        }
        CertificatePolicy::AcceptAny => rustls::ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyCertVerifier))
            .with_no_client_auth(),
    };
    Arc::new(config)
}

pub fn connector(policy: CertificatePolicy) -> TlsConnector {
    TlsConnector::from(client_config(policy))
}

/// Server name presented for SNI and checked against the certificate
pub fn server_name(host: &str) -> Result<ServerName<'static>, UptredError> {
    ServerName::try_from(host.to_string())
        .map_err(|e| UptredError::Tls(format!("invalid server name {}: {}", host, e)))
}

/// Certificate verifier that accepts any certificate.
#[derive(Debug)]
struct AcceptAnyCertVerifier;

impl ServerCertVerifier for AcceptAnyCertVerifier {
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
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::RSA_PKCS1_SHA384,
            SignatureScheme::RSA_PKCS1_SHA512,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::ECDSA_NISTP521_SHA512,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::RSA_PSS_SHA384,
            SignatureScheme::RSA_PSS_SHA512,
            SignatureScheme::ED25519,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_both_policies_build() {
        let strict = client_config(CertificatePolicy::Strict);
        let any = client_config(CertificatePolicy::AcceptAny);
        assert!(!Arc::ptr_eq(&strict, &any));
    }

    #[test]
    fn test_server_names() {
        assert!(server_name("api.example.com").is_ok());
        assert!(server_name("127.0.0.1").is_ok());
        assert!(matches!(server_name("bad host name"), Err(UptredError::Tls(_))));
    }
}
