//! Revocation checking through the responders named in a certificate

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::Client;

use super::ocsp::{self, OcspCertStatus, OCSP_REQUEST_CONTENT_TYPE, OCSP_RESPONSE_CONTENT_TYPE};
use crate::models::Certificate;
use crate::utils::pem;
use crate::utils::{ViceError, ViceResult};

/// Answers whether a certificate has been revoked
#[async_trait]
pub trait RevocationCheck: Send + Sync {
    /// Revocation status. Failures to find out count as not revoked.
    async fn is_revoked(&self, cert: &Certificate) -> bool;
}

/// Issuer certificate and OCSP responders of a leaf certificate
#[derive(Debug, Clone)]
pub struct IssuerInfo {
    pub issuer: Certificate,
    pub ocsp_servers: Vec<String>,
}

/// OCSP based revocation checker with an on-disk issuer cache
#[derive(Clone)]
pub struct RevocationChecker {
    client: Client,
    cache_dir: PathBuf,
}

impl RevocationChecker {
    pub fn new(cache_dir: impl Into<PathBuf>, timeout: Duration) -> ViceResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .use_rustls_tls()
            .build()
            .map_err(|e| ViceError::Internal(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self::with_client(client, cache_dir))
    }

    /// Share an existing HTTP client
    pub fn with_client(client: Client, cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            client,
            cache_dir: cache_dir.into(),
        }
    }

    /// Resolve the issuer certificate and OCSP responders of `cert`.
    ///
    /// The issuer is read from the cache when present, otherwise downloaded
    /// from the first issuing certificate URL and cached.
    pub async fn get_issuer_info(&self, cert: &Certificate) -> ViceResult<IssuerInfo> {
        let issuer_url = cert
            .issuing_certificate_urls()
            .first()
            .ok_or(ViceError::MissingIssuerInfo)?;

        let ocsp_servers: Vec<String> = cert
            .ocsp_servers()
            .iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        if ocsp_servers.is_empty() {
            return Err(ViceError::MissingOcspInfo);
        }

        let issuer = self.load_issuer(issuer_url).await?;
        Ok(IssuerInfo {
            issuer,
            ocsp_servers,
        })
    }

    /// Query the responders in order; the first parsable answer wins
    pub async fn check(&self, cert: &Certificate) -> ViceResult<OcspCertStatus> {
        let info = self.get_issuer_info(cert).await?;
        let request = ocsp::build_request(cert, &info.issuer)?;

        let mut last_error = None;
        for server in &info.ocsp_servers {
            match self.query(server, &request, cert.serial()).await {
                Ok(status) => {
                    tracing::debug!(responder = %server, serial = %cert.serial_hex(), ?status, "OCSP status");
                    return Ok(status);
                }
                Err(e) => {
                    tracing::warn!(responder = %server, error = %e, "OCSP query failed");
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| ViceError::Ocsp("no OCSP responder answered".to_string())))
    }

    async fn query(&self, server: &str, request: &[u8], serial: &[u8]) -> ViceResult<OcspCertStatus> {
        let response = self
            .client
            .post(server)
            .header(CONTENT_TYPE, OCSP_REQUEST_CONTENT_TYPE)
            .header(ACCEPT, OCSP_RESPONSE_CONTENT_TYPE)
            .body(request.to_vec())
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ViceError::Ocsp(format!(
                "responder returned HTTP {}",
                response.status()
            )));
        }

        let body = response.bytes().await?;
        ocsp::parse_response(&body, serial)
    }

    async fn load_issuer(&self, url: &str) -> ViceResult<Certificate> {
        let path = self.cache_dir.join(cache_file_name(url)?);

        if let Ok(bytes) = tokio::fs::read(&path).await {
            match decode_certificate(&bytes) {
                Ok(cert) => return Ok(cert),
                Err(e) => {
                    tracing::warn!(path = ?path, error = %e, "Ignoring unreadable cached issuer certificate");
                }
            }
        }

        tracing::debug!(url = %url, "Downloading issuer certificate");
        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(ViceError::Http(format!(
                "issuer download from {} returned {}",
                url,
                response.status()
            )));
        }
        let bytes = response.bytes().await?;
        let issuer = decode_certificate(&bytes)?;

        write_atomically(&self.cache_dir, &path, &bytes).await?;
        Ok(issuer)
    }
}

#[async_trait]
impl RevocationCheck for RevocationChecker {
    async fn is_revoked(&self, cert: &Certificate) -> bool {
        match self.check(cert).await {
            Ok(status) => status == OcspCertStatus::Revoked,
            Err(e @ (ViceError::MissingIssuerInfo | ViceError::MissingOcspInfo)) => {
                tracing::debug!(serial = %cert.serial_hex(), reason = %e, "Skipping revocation check");
                false
            }
            Err(e) => {
                tracing::warn!(serial = %cert.serial_hex(), error = %e, "Revocation check failed, assuming not revoked");
                false
            }
        }
    }
}

/// Cache file name derived from the basename of the issuer URL
fn cache_file_name(url: &str) -> ViceResult<String> {
    let parsed = url::Url::parse(url)
        .map_err(|e| ViceError::Http(format!("invalid issuer URL {}: {}", url, e)))?;

    let basename = parsed
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
        .or_else(|| parsed.host_str().map(str::to_string))
        .unwrap_or_else(|| "issuer".to_string());

    Ok(basename
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') { c } else { '_' })
        .collect())
}

/// Issuer certificates are served either as DER or as PEM
fn decode_certificate(bytes: &[u8]) -> ViceResult<Certificate> {
    match Certificate::from_der(bytes) {
        Ok(cert) => Ok(cert),
        Err(_) => {
            let ders = pem::certificates_from_pem(bytes)?;
            Certificate::from_der(&ders[0])
        }
    }
}

async fn write_atomically(dir: &Path, path: &Path, bytes: &[u8]) -> ViceResult<()> {
    tokio::fs::create_dir_all(dir).await?;
    let tmp = dir.join(format!(".{}.tmp", uuid::Uuid::new_v4()));
    tokio::fs::write(&tmp, bytes).await?;
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    Ok(())
}
