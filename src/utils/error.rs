//! Error types and handling
//!
//! This module provides the error taxonomy shared by every component of the
//! certificate lifecycle engine. Errors are grouped so callers can tell
//! transient failures (retry on the next reconciliation) from protocol and
//! validation failures.

use thiserror::Error;

/// Certificate lifecycle error types
#[derive(Debug, Error)]
pub enum ViceError {
    /// The secret holds neither a certificate nor a private key
    #[error("Missing key material: secret holds neither certificate nor key")]
    MissingKeyMaterial,

    /// Certificate bytes are present but cannot be parsed
    #[error("Unparsable certificate: {0}")]
    UnparsableCertificate(String),

    /// Private key bytes are present but cannot be parsed
    #[error("Unparsable private key: {0}")]
    UnparsablePrivateKey(String),

    /// Certificate carries no issuing certificate URL
    #[error("Certificate has no issuing certificate URL")]
    MissingIssuerInfo,

    /// Certificate carries no OCSP server
    #[error("Certificate has no OCSP server")]
    MissingOcspInfo,

    /// Pickup or approve called without a transaction id
    #[error("Missing transaction id")]
    MissingTransactionId,

    /// The CA has not released a certificate for the transaction yet
    #[error("Transaction {0} is not approved yet")]
    NotYetApproved(String),

    /// The CA accepted the approval but has not finished processing
    #[error("Approval of transaction {0} is still being processed")]
    ApprovalPending(String),

    /// The CA answered with neither a certificate nor a transaction id
    #[error("CA returned neither certificate nor transaction id")]
    EmptyCaResponse,

    /// CA request quota exhausted
    #[error("Rate limit reached: {0}")]
    RateLimited(String),

    /// CA answered with an error status
    #[error("CA service error: {0}")]
    CaService(String),

    /// Transport level HTTP failure
    #[error("HTTP error: {0}")]
    Http(String),

    /// OCSP request or response failure
    #[error("OCSP error: {0}")]
    Ocsp(String),

    /// Host name is not a usable DNS name
    #[error("Invalid host: {0}")]
    InvalidHost(String),

    /// Local file system failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ViceError {
    /// Whether the failure is expected to clear up on a later reconciliation
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ViceError::NotYetApproved(_)
                | ViceError::ApprovalPending(_)
                | ViceError::RateLimited(_)
                | ViceError::CaService(_)
                | ViceError::Http(_)
                | ViceError::Ocsp(_)
                | ViceError::Io(_)
        )
    }

    /// Short identifier used in structured log fields
    pub fn kind(&self) -> &'static str {
        match self {
            ViceError::MissingKeyMaterial => "missing_key_material",
            ViceError::UnparsableCertificate(_) => "unparsable_certificate",
            ViceError::UnparsablePrivateKey(_) => "unparsable_private_key",
            ViceError::MissingIssuerInfo => "missing_issuer_info",
            ViceError::MissingOcspInfo => "missing_ocsp_info",
            ViceError::MissingTransactionId => "missing_transaction_id",
            ViceError::NotYetApproved(_) => "not_yet_approved",
            ViceError::ApprovalPending(_) => "approval_pending",
            ViceError::EmptyCaResponse => "empty_ca_response",
            ViceError::RateLimited(_) => "rate_limited",
            ViceError::CaService(_) => "ca_service",
            ViceError::Http(_) => "http",
            ViceError::Ocsp(_) => "ocsp",
            ViceError::InvalidHost(_) => "invalid_host",
            ViceError::Io(_) => "io",
            ViceError::Config(_) => "config",
            ViceError::Internal(_) => "internal",
        }
    }
}

// Implement From for common error types

impl From<anyhow::Error> for ViceError {
    fn from(err: anyhow::Error) -> Self {
        ViceError::Internal(err.to_string())
    }
}

impl From<reqwest::Error> for ViceError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ViceError::Http("request timed out".to_string())
        } else if err.is_connect() {
            ViceError::Http(format!("failed to connect: {}", err))
        } else {
            ViceError::Http(err.to_string())
        }
    }
}

impl From<quick_xml::DeError> for ViceError {
    fn from(err: quick_xml::DeError) -> Self {
        ViceError::CaService(format!("failed to parse CA response: {}", err))
    }
}

impl From<rcgen::Error> for ViceError {
    fn from(err: rcgen::Error) -> Self {
        ViceError::Internal(format!("CSR generation failed: {}", err))
    }
}

impl From<rsa::Error> for ViceError {
    fn from(err: rsa::Error) -> Self {
        ViceError::Internal(format!("RSA key operation failed: {}", err))
    }
}

impl From<tokio::task::JoinError> for ViceError {
    fn from(err: tokio::task::JoinError) -> Self {
        ViceError::Internal(format!("background task failed: {}", err))
    }
}

/// Result type alias used throughout the crate
pub type ViceResult<T> = Result<T, ViceError>;
