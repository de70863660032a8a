//! Symantec VICE CA protocol client

use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::{Client, Identity, StatusCode};
use serde::Deserialize;

use super::csr;
use crate::config::ViceConfig;
use crate::models::{Certificate, CertificateMaterial};
use crate::utils::{ViceError, ViceResult};

/// Result of a request that may complete asynchronously
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaOutcome {
    /// The CA issued the certificate right away
    Issued(Certificate),
    /// The CA queued the request under this transaction id
    Pending(String),
}

/// The five operations of the CA protocol.
///
/// Each call records its result on the material: an issued certificate
/// replaces `certificate` and clears the transaction id, a pending request
/// stores its transaction id.
#[async_trait]
pub trait CertificateAuthority: Send + Sync {
    /// Request a certificate for a host that has none
    async fn enroll(&self, material: &mut CertificateMaterial) -> ViceResult<CaOutcome>;

    /// Request a successor for the current certificate
    async fn renew(&self, material: &mut CertificateMaterial) -> ViceResult<CaOutcome>;

    /// Approve the pending transaction.
    ///
    /// Fails with [`ViceError::ApprovalPending`] when the CA accepted the
    /// approval but has not produced the certificate yet.
    async fn approve(&self, material: &mut CertificateMaterial) -> ViceResult<Certificate>;

    /// Collect the certificate of an approved transaction.
    ///
    /// Fails with [`ViceError::NotYetApproved`] while the CA holds it back.
    async fn pickup(&self, material: &mut CertificateMaterial) -> ViceResult<Certificate>;

    /// Reissue the current certificate under the same enrollment
    async fn replace(&self, material: &mut CertificateMaterial) -> ViceResult<CaOutcome>;
}

/// Response body of every VICE endpoint
#[derive(Debug, Default, Deserialize)]
struct ViceResponse {
    #[serde(rename = "StatusCode", default)]
    status_code: Option<String>,
    #[serde(rename = "Message", default)]
    message: Option<String>,
    #[serde(rename = "TransactionID", default)]
    transaction_id: Option<String>,
    #[serde(rename = "Certificate", default)]
    certificate: Option<String>,
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

impl ViceResponse {
    fn is_success(&self) -> bool {
        match non_empty(&self.status_code) {
            None => true,
            Some(code) => {
                code.eq_ignore_ascii_case("success")
                    || code.trim_start_matches("0x").chars().all(|c| c == '0')
            }
        }
    }

    fn message(&self) -> &str {
        non_empty(&self.message).unwrap_or("no message")
    }

    fn certificate(&self) -> ViceResult<Option<Certificate>> {
        non_empty(&self.certificate).map(decode_certificate).transpose()
    }

    fn transaction_id(&self) -> Option<String> {
        non_empty(&self.transaction_id).map(str::to_string)
    }
}

/// Certificates come back as a PEM block or as bare base64 DER
fn decode_certificate(value: &str) -> ViceResult<Certificate> {
    if value.contains("-----BEGIN") {
        return Certificate::from_pem(value.as_bytes());
    }
    let compact: String = value.chars().filter(|c| !c.is_whitespace()).collect();
    let der = STANDARD
        .decode(compact)
        .map_err(|e| ViceError::UnparsableCertificate(format!("invalid base64: {}", e)))?;
    Certificate::from_der(&der)
}

/// HTTP client for the VICE REST endpoints
#[derive(Clone)]
pub struct ViceClient {
    client: Client,
    base_url: String,
    config: ViceConfig,
}

impl ViceClient {
    /// Create a new VICE client from configuration
    pub fn new(config: &ViceConfig) -> ViceResult<Self> {
        let mut client_builder = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .use_rustls_tls();

        // Add CA certificate if provided (must be done before identity for rustls)
        if let Some(ca_path) = &config.ca_bundle {
            let ca_pem = std::fs::read(ca_path)
                .map_err(|e| ViceError::Config(format!("Failed to read CA bundle: {}", e)))?;
            let ca_cert = reqwest::Certificate::from_pem(&ca_pem).map_err(|e| {
                ViceError::Config(format!("Failed to parse CA certificate: {}", e))
            })?;
            client_builder = client_builder.add_root_certificate(ca_cert);
        }

        if let (Some(cert_path), Some(key_path)) = (&config.cert, &config.key) {
            let cert_pem = std::fs::read(cert_path).map_err(|e| {
                ViceError::Config(format!("Failed to read client certificate: {}", e))
            })?;
            let key_pem = std::fs::read(key_path)
                .map_err(|e| ViceError::Config(format!("Failed to read client key: {}", e)))?;

            // Combine cert and key into a single PEM bundle for rustls
            let mut pem_bundle = cert_pem;
            pem_bundle.push(b'\n');
            pem_bundle.extend_from_slice(&key_pem);

            let identity = Identity::from_pem(&pem_bundle)
                .map_err(|e| ViceError::Config(format!("Failed to create identity: {}", e)))?;

            client_builder = client_builder.identity(identity);
        }

        let client = client_builder
            .build()
            .map_err(|e| ViceError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self::with_client(client, config))
    }

    /// Use a preconfigured HTTP client
    pub fn with_client(client: Client, config: &ViceConfig) -> Self {
        Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            config: config.clone(),
        }
    }

    async fn post(&self, endpoint: &str, form: &[(&str, String)]) -> ViceResult<ViceResponse> {
        let url = format!("{}/{}", self.base_url, endpoint);
        tracing::debug!(url = %url, "Sending VICE request");

        let response = self.client.post(&url).form(form).send().await?;
        let status = response.status();
        let body = response.text().await?;
        let parsed = quick_xml::de::from_str::<ViceResponse>(&body);

        if status == StatusCode::TOO_MANY_REQUESTS {
            let message = parsed
                .as_ref()
                .map(|r| r.message().to_string())
                .unwrap_or_else(|_| status.to_string());
            return Err(ViceError::RateLimited(message));
        }

        if !status.is_success() {
            return Err(match parsed {
                Ok(r) => classify_failure(&r, Some(status)),
                Err(_) => ViceError::CaService(format!("{} returned status: {}", endpoint, status)),
            });
        }

        let parsed = parsed?;
        if !parsed.is_success() {
            return Err(classify_failure(&parsed, None));
        }
        Ok(parsed)
    }

    fn contact_fields(&self) -> Vec<(&'static str, String)> {
        let subject = &self.config.subject;
        vec![
            ("firstName", subject.first_name.clone()),
            ("lastName", subject.last_name.clone()),
            ("email", subject.email.clone()),
        ]
    }

    async fn request_form(
        &self,
        material: &mut CertificateMaterial,
    ) -> ViceResult<Vec<(&'static str, String)>> {
        csr::prepare_request(material, &self.config.subject).await?;
        let csr = material
            .csr
            .clone()
            .ok_or_else(|| ViceError::Internal("CSR missing after key generation".to_string()))?;

        let mut form = self.contact_fields();
        form.extend([
            ("csr", csr),
            ("signatureAlgorithm", self.config.signature_algorithm.clone()),
            ("challenge", self.config.default_challenge.clone()),
            ("certProductType", self.config.certificate_product_type.clone()),
            ("serverType", self.config.server_type.clone()),
            ("validityPeriod", format!("{}Y", self.config.validity_years)),
            (
                "subjectAltNames",
                material.sans().iter().cloned().collect::<Vec<_>>().join(","),
            ),
        ]);
        Ok(form)
    }

    fn original_certificate_fields(
        &self,
        material: &CertificateMaterial,
        operation: &str,
    ) -> ViceResult<Vec<(&'static str, String)>> {
        let current = material.certificate.as_ref().ok_or_else(|| {
            ViceError::Internal(format!("{} requires the current certificate", operation))
        })?;
        Ok(vec![
            ("originalCertificate", current.to_pem()),
            ("originalChallenge", self.config.default_challenge.clone()),
        ])
    }

    async fn submit(
        &self,
        endpoint: &str,
        form: Vec<(&'static str, String)>,
        material: &mut CertificateMaterial,
    ) -> ViceResult<CaOutcome> {
        let response = self.post(endpoint, &form).await?;

        if let Some(certificate) = response.certificate()? {
            tracing::info!(host = %material.host(), operation = endpoint, serial = %certificate.serial_hex(), "Certificate issued");
            material.certificate = Some(certificate.clone());
            material.transaction_id = None;
            return Ok(CaOutcome::Issued(certificate));
        }

        match response.transaction_id() {
            Some(tid) => {
                tracing::info!(host = %material.host(), operation = endpoint, transaction_id = %tid, "Request pending");
                material.transaction_id = Some(tid.clone());
                Ok(CaOutcome::Pending(tid))
            }
            None => Err(ViceError::EmptyCaResponse),
        }
    }

    async fn transaction_call(
        &self,
        endpoint: &str,
        material: &mut CertificateMaterial,
    ) -> ViceResult<Option<Certificate>> {
        let tid = material
            .pending_transaction()
            .ok_or(ViceError::MissingTransactionId)?
            .to_string();

        let mut form = self.contact_fields();
        form.push(("transactionID", tid));

        let certificate = self.post(endpoint, &form).await?.certificate()?;
        if let Some(ref certificate) = certificate {
            tracing::info!(host = %material.host(), operation = endpoint, serial = %certificate.serial_hex(), "Certificate issued");
            material.certificate = Some(certificate.clone());
            material.transaction_id = None;
        }
        Ok(certificate)
    }
}

fn classify_failure(response: &ViceResponse, status: Option<StatusCode>) -> ViceError {
    let message = response.message();
    if message.to_ascii_lowercase().contains("rate limit") {
        return ViceError::RateLimited(message.to_string());
    }
    let code = non_empty(&response.status_code)
        .map(str::to_string)
        .or_else(|| status.map(|s| s.to_string()))
        .unwrap_or_default();
    ViceError::CaService(format!("{}: {}", code, message))
}

#[async_trait]
impl CertificateAuthority for ViceClient {
    async fn enroll(&self, material: &mut CertificateMaterial) -> ViceResult<CaOutcome> {
        let form = self.request_form(material).await?;
        self.submit("enroll", form, material).await
    }

    async fn renew(&self, material: &mut CertificateMaterial) -> ViceResult<CaOutcome> {
        let original = self.original_certificate_fields(material, "renew")?;
        let mut form = self.request_form(material).await?;
        form.extend(original);
        self.submit("renew", form, material).await
    }

    async fn approve(&self, material: &mut CertificateMaterial) -> ViceResult<Certificate> {
        match self.transaction_call("approve", material).await? {
            Some(certificate) => Ok(certificate),
            None => Err(ViceError::ApprovalPending(
                material.pending_transaction().unwrap_or_default().to_string(),
            )),
        }
    }

    async fn pickup(&self, material: &mut CertificateMaterial) -> ViceResult<Certificate> {
        match self.transaction_call("pickup", material).await? {
            Some(certificate) => Ok(certificate),
            None => Err(ViceError::NotYetApproved(
                material.pending_transaction().unwrap_or_default().to_string(),
            )),
        }
    }

    async fn replace(&self, material: &mut CertificateMaterial) -> ViceResult<CaOutcome> {
        let original = self.original_certificate_fields(material, "replace")?;
        let mut form = self.request_form(material).await?;
        form.extend(original);
        self.submit("replace", form, material).await
    }
}
