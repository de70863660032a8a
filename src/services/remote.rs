//! Comparison of stored certificates with the ones served by a host

use std::sync::Arc;
use std::time::Duration;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::aws_lc_rs::default_provider;
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, SignatureScheme};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;

use crate::models::Certificate;
use crate::utils::{ViceError, ViceResult};

/// Dial timeout for the remote comparison
pub const REMOTE_DIAL_TIMEOUT: Duration = Duration::from_secs(2);

/// Fetches the leaf certificate a host serves and compares it to ours
#[derive(Clone)]
pub struct RemoteComparer {
    connector: TlsConnector,
    port: u16,
    timeout: Duration,
    placeholder_common_names: Vec<String>,
}

impl RemoteComparer {
    pub fn new(port: u16, placeholder_common_names: Vec<String>) -> ViceResult<Self> {
        let provider = Arc::new(default_provider());
        let config = ClientConfig::builder_with_provider(provider.clone())
            .with_safe_default_protocol_versions()
            .map_err(|e| ViceError::Internal(format!("Failed to set TLS protocol versions: {}", e)))?
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyCertificate(provider)))
            .with_no_client_auth();

        Ok(Self {
            connector: TlsConnector::from(Arc::new(config)),
            port,
            timeout: REMOTE_DIAL_TIMEOUT,
            placeholder_common_names,
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Leaf certificate served at `host`, verification disabled
    pub async fn fetch_leaf(&self, host: &str) -> ViceResult<Certificate> {
        let server_name = ServerName::try_from(host.to_string())
            .map_err(|_| ViceError::InvalidHost(host.to_string()))?;

        let handshake = async {
            let tcp = TcpStream::connect((host, self.port)).await?;
            let tls = self.connector.connect(server_name, tcp).await?;
            let (_, connection) = tls.get_ref();
            let leaf = connection
                .peer_certificates()
                .and_then(|certs| certs.first())
                .ok_or_else(|| ViceError::Http(format!("{} presented no certificate", host)))?;
            Certificate::from_der(leaf.as_ref())
        };

        tokio::time::timeout(self.timeout, handshake)
            .await
            .map_err(|_| ViceError::Http(format!("TLS dial to {}:{} timed out", host, self.port)))?
    }

    /// Whether `host` serves a certificate equal to `local`.
    ///
    /// Dial failures and load balancer placeholder certificates carry no
    /// information and count as a match.
    pub async fn remote_matches(&self, host: &str, local: &Certificate) -> bool {
        let remote = match self.fetch_leaf(host).await {
            Ok(remote) => remote,
            Err(e) => {
                tracing::debug!(host = %host, error = %e, "Remote certificate unavailable");
                return true;
            }
        };

        if let Some(cn) = remote.common_name() {
            if self.placeholder_common_names.iter().any(|p| p == cn) {
                tracing::debug!(host = %host, common_name = %cn, "Host serves a placeholder certificate");
                return true;
            }
        }

        certificates_match(local, &remote)
    }
}

/// Compare common name, sorted SANs and the validity window
pub fn certificates_match(local: &Certificate, remote: &Certificate) -> bool {
    local.common_name() == remote.common_name()
        && local.sorted_dns_names() == remote.sorted_dns_names()
        && local.not_before() == remote.not_before()
        && local.not_after() == remote.not_after()
}

#[derive(Debug)]
struct AcceptAnyCertificate(Arc<CryptoProvider>);

impl ServerCertVerifier for AcceptAnyCertificate {
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
            &self.0.signature_verification_algorithms,
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
            &self.0.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}
