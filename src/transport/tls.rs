//! TLS settings for the collector connection.

use std::{fs::File, io::BufReader, path::PathBuf, sync::Arc};

use log::debug;
use rustls::{
    ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme,
    client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier},
    crypto::{self, CryptoProvider},
    pki_types::{CertificateDer, ServerName, UnixTime},
};

use super::config::DEFAULT_ALPN;
use crate::error::TransportError;

/// TLS connection options.
#[derive(Clone, Debug)]
pub struct TlsOptions {
    /// Name the collector certificate must be valid for.
    pub domain: String,
    /// Skip certificate validation when true (intended for tests).
    pub insecure_skip_verify: bool,
    /// PEM bundle trusted instead of the platform roots.
    pub ca_file: Option<PathBuf>,
    /// Protocol identifier the collector must agree on.
    pub alpn: String,
}

impl TlsOptions {
    pub fn new(domain: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            insecure_skip_verify: false,
            ca_file: None,
            alpn: DEFAULT_ALPN.into(),
        }
    }

    /// TLS 1.3 client config offering only the configured ALPN identifier.
    pub(crate) fn client_config(&self) -> Result<ClientConfig, TransportError> {
        let provider = Arc::new(crypto::ring::default_provider());
        let builder = ClientConfig::builder_with_provider(Arc::clone(&provider))
            .with_protocol_versions(&[&rustls::version::TLS13])
            .map_err(|err| TransportError::Setup(err.to_string()))?;
        let mut config = if self.insecure_skip_verify {
            builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert(provider)))
                .with_no_client_auth()
        } else {
            builder
                .with_root_certificates(self.root_store()?)
                .with_no_client_auth()
        };
        config.alpn_protocols = vec![self.alpn.as_bytes().to_vec()];
        Ok(config)
    }

    fn root_store(&self) -> Result<RootCertStore, TransportError> {
        let mut roots = RootCertStore::empty();
        match &self.ca_file {
            Some(path) => {
                let unreadable = |err: &dyn std::fmt::Display| {
                    TransportError::Setup(format!("cannot read CA file {}: {err}", path.display()))
                };
                let file = File::open(path).map_err(|err| unreadable(&err))?;
                for cert in rustls_pemfile::certs(&mut BufReader::new(file)) {
                    let cert = cert.map_err(|err| unreadable(&err))?;
                    roots.add(cert).map_err(|err| unreadable(&err))?;
                }
                if roots.is_empty() {
                    return Err(TransportError::Setup(format!(
                        "CA file {} holds no certificates",
                        path.display()
                    )));
                }
            }
            None => {
                let native = rustls_native_certs::load_native_certs();
                for err in &native.errors {
                    debug!("skipping platform certificate source: {err}");
                }
                let (added, ignored) = roots.add_parsable_certificates(native.certs);
                debug!("loaded {added} platform root certificates ({ignored} ignored)");
            }
        }
        Ok(roots)
    }
}

/// Accepts whatever certificate the collector presents.
///
/// Handshake signatures are still checked so the peer must hold the key of
/// the certificate it sent.
#[derive(Debug)]
struct AcceptAnyServerCert(Arc<CryptoProvider>);

impl ServerCertVerifier for AcceptAnyServerCert {
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
        crypto::verify_tls12_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        crypto::verify_tls13_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}
