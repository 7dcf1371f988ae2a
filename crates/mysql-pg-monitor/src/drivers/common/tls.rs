//! TLS settings for the PostgreSQL target connection.

use std::fmt;
use std::sync::Arc;

use rustls::ClientConfig;
use tokio_postgres_rustls::MakeRustlsConnect;
use tracing::{info, warn};

use crate::error::{MonitorError, Result};

/// PostgreSQL `sslmode` values understood by the monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SslMode {
    /// Plain TCP.
    #[default]
    Disable,
    /// Encrypt, but accept any server certificate.
    Require,
    /// Verify the certificate chain against the webpki roots.
    VerifyCa,
    /// Verify the chain and the host name.
    VerifyFull,
}

impl SslMode {
    pub fn parse(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "disable" | "" => Ok(SslMode::Disable),
            "require" => Ok(SslMode::Require),
            "verify-ca" => Ok(SslMode::VerifyCa),
            "verify-full" => Ok(SslMode::VerifyFull),
            other => Err(MonitorError::Config(format!(
                "Invalid target.ssl_mode '{}'. Valid values: disable, require, verify-ca, verify-full",
                other
            ))),
        }
    }

    pub fn requires_tls(&self) -> bool {
        !matches!(self, SslMode::Disable)
    }
}

impl fmt::Display for SslMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SslMode::Disable => "disable",
            SslMode::Require => "require",
            SslMode::VerifyCa => "verify-ca",
            SslMode::VerifyFull => "verify-full",
        };
        f.write_str(s)
    }
}

/// Produces the rustls connector for a given [`SslMode`].
pub struct TlsBuilder {
    ssl_mode: SslMode,
}

impl TlsBuilder {
    pub fn new(ssl_mode: SslMode) -> Self {
        Self { ssl_mode }
    }

    pub fn parse(ssl_mode: &str) -> Result<Self> {
        Ok(Self::new(SslMode::parse(ssl_mode)?))
    }

    /// Connector for deadpool-postgres, or `None` when TLS is disabled.
    pub fn build(&self) -> Result<Option<MakeRustlsConnect>> {
        Ok(self.client_config()?.map(MakeRustlsConnect::new))
    }

    fn client_config(&self) -> Result<Option<ClientConfig>> {
        if !self.ssl_mode.requires_tls() {
            return Ok(None);
        }

        // Pin the provider: sqlx and tokio-postgres-rustls may enable different
        // rustls backends, which makes the process default ambiguous.
        let builder =
            ClientConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
                .with_safe_default_protocol_versions()
                .map_err(|e| MonitorError::Config(format!("TLS setup failed: {}", e)))?;

        let config = match self.ssl_mode {
            SslMode::Disable => return Ok(None),
            SslMode::Require => {
                warn!(
                    "ssl_mode=require encrypts the target connection but does NOT verify the \
                     server certificate; use verify-full outside trusted networks"
                );
                builder
                    .dangerous()
                    .with_custom_certificate_verifier(Arc::new(AcceptAnyCertificate))
                    .with_no_client_auth()
            }
            SslMode::VerifyCa | SslMode::VerifyFull => {
                if self.ssl_mode == SslMode::VerifyCa {
                    // rustls always checks the host name
                    warn!("ssl_mode=verify-ca behaves like verify-full");
                } else {
                    info!("ssl_mode=verify-full: certificate and host name are verified");
                }
                let mut roots = rustls::RootCertStore::empty();
                roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
                builder.with_root_certificates(roots).with_no_client_auth()
            }
        };
        Ok(Some(config))
    }
}

/// Certificate verifier for `ssl_mode=require`.
#[derive(Debug)]
struct AcceptAnyCertificate;

impl rustls::client::danger::ServerCertVerifier for AcceptAnyCertificate {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> std::result::Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        use rustls::SignatureScheme::*;
        vec![
            RSA_PKCS1_SHA256,
            RSA_PKCS1_SHA384,
            RSA_PKCS1_SHA512,
            ECDSA_NISTP256_SHA256,
            ECDSA_NISTP384_SHA384,
            ECDSA_NISTP521_SHA512,
            RSA_PSS_SHA256,
            RSA_PSS_SHA384,
            RSA_PSS_SHA512,
            ED25519,
        ]
    }
}
