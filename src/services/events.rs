//! Lifecycle events for observers such as metrics exporters

use std::fmt;

use async_trait::async_trait;
use serde::Serialize;

/// CA operations reported in events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Enroll,
    Renew,
    Approve,
    Pickup,
    Replace,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::Enroll => "enroll",
            Operation::Renew => "renew",
            Operation::Approve => "approve",
            Operation::Pickup => "pickup",
            Operation::Replace => "replace",
        };
        f.write_str(name)
    }
}

/// Something worth counting happened to a host's certificate
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CertificateEvent {
    /// A CA operation finished, successfully or not
    Operation {
        ingress: String,
        host: String,
        operation: Operation,
        success: bool,
    },
    /// The stored certificate was found revoked
    Revoked { ingress: String, host: String },
    /// The per-host CA request quota is exhausted
    RateLimitReached { ingress: String, host: String },
    /// The host serves a different certificate than the one stored
    RemoteMismatch { ingress: String, host: String },
}

/// Receives lifecycle events
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn record(&self, event: CertificateEvent);
}

/// Event sink writing every event to the log
#[derive(Debug, Clone, Default)]
pub struct TracingEventSink;

#[async_trait]
impl EventSink for TracingEventSink {
    async fn record(&self, event: CertificateEvent) {
        match &event {
            CertificateEvent::Operation {
                ingress,
                host,
                operation,
                success: true,
            } => tracing::info!(ingress = %ingress, host = %host, operation = %operation, "CA operation succeeded"),
            CertificateEvent::Operation {
                ingress,
                host,
                operation,
                success: false,
            } => tracing::warn!(ingress = %ingress, host = %host, operation = %operation, "CA operation failed"),
            CertificateEvent::Revoked { ingress, host } => {
                tracing::warn!(ingress = %ingress, host = %host, "Certificate is revoked")
            }
            CertificateEvent::RateLimitReached { ingress, host } => {
                tracing::warn!(ingress = %ingress, host = %host, "CA request rate limit reached")
            }
            CertificateEvent::RemoteMismatch { ingress, host } => {
                tracing::warn!(ingress = %ingress, host = %host, "Served certificate differs from stored certificate")
            }
        }
    }
}
