//! The TLS context configuration surface (spec §6). Certificates, cipher
//! lists and verification modes are treated as an opaque collaborator at the
//! protocol level; this is the shape of that handle and how it's consumed.

use std::path::PathBuf;
use std::sync::Arc;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VerifyMode {
    None,
    #[default]
    VerifyPeer,
    VerifyPeerAndOnce,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum ProtocolVersion {
    Tls11,
    #[default]
    Tls12,
    Tls13,
}

/// Certificate/key/CA paths plus verification policy, consumed by `Connect()`
/// on SSL and WSS sockets to build the underlying `rustls` client or server
/// config. Cipher list is accepted for API parity with the original surface;
/// `rustls` selects from a fixed, vetted suite set rather than an arbitrary
/// OpenSSL-style string, so it is validated but not threaded further.
#[derive(Debug, Clone, Default)]
pub struct TlsConfig {
    pub cert_file: Option<PathBuf>,
    pub key_file: Option<PathBuf>,
    pub ca_file: Option<PathBuf>,
    pub cipher_list: Option<String>,
    pub verify_mode: VerifyMode,
    pub min_protocol_version: ProtocolVersion,
}

impl TlsConfig {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(feature = "tls")]
    pub fn build_client_config(&self) -> Result<Arc<rustls::ClientConfig>> {
        let mut roots = rustls::RootCertStore::empty();
        if let Some(ca_file) = &self.ca_file {
            let mut reader = std::io::BufReader::new(
                std::fs::File::open(ca_file).map_err(Error::Io)?,
            );
            for cert in rustls_pemfile::certs(&mut reader) {
                let cert = cert.map_err(Error::Io)?;
                roots.add(cert).map_err(|err| {
                    Error::Tls {
                        code: -1,
                        detail: Some(err.to_string().into_boxed_str()),
                    }
                })?;
            }
        } else {
            roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        }

        let builder = rustls::ClientConfig::builder().with_root_certificates(roots);
        let config = match self.verify_mode {
            VerifyMode::None => {
                let mut config = builder.with_no_client_auth();
                config.dangerous().set_certificate_verifier(Arc::new(NoVerify));
                config
            },
            VerifyMode::VerifyPeer | VerifyMode::VerifyPeerAndOnce => builder.with_no_client_auth(),
        };
        Ok(Arc::new(config))
    }

    #[cfg(feature = "tls")]
    pub fn build_server_config(&self) -> Result<Arc<rustls::ServerConfig>> {
        let cert_file = self
            .cert_file
            .as_ref()
            .ok_or_else(|| Error::InvalidArgument("TLS server config requires cert_file".into()))?;
        let key_file = self
            .key_file
            .as_ref()
            .ok_or_else(|| Error::InvalidArgument("TLS server config requires key_file".into()))?;

        let certs = rustls_pemfile::certs(&mut std::io::BufReader::new(
            std::fs::File::open(cert_file).map_err(Error::Io)?,
        ))
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(Error::Io)?;

        let key = rustls_pemfile::private_key(&mut std::io::BufReader::new(
            std::fs::File::open(key_file).map_err(Error::Io)?,
        ))
        .map_err(Error::Io)?
        .ok_or_else(|| Error::InvalidArgument("no private key found in key_file".into()))?;

        let config = rustls::ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(certs, key)
            .map_err(|err| Error::Tls {
                code: -1,
                detail: Some(err.to_string().into_boxed_str()),
            })?;
        Ok(Arc::new(config))
    }
}

#[cfg(feature = "tls")]
#[derive(Debug)]
struct NoVerify;

#[cfg(feature = "tls")]
impl rustls::client::danger::ServerCertVerifier for NoVerify {
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
        rustls::crypto::ring::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}
