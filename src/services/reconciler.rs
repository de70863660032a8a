//! One reconciliation cycle per ingress
//!
//! The reconciler reads each managed host's Secret and annotations, decides
//! the next step with the state machine, runs the CA operation and persists
//! the result. Persistence and scheduling go through caller-supplied
//! collaborators so the engine stays independent of the Kubernetes client.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;

use super::events::{CertificateEvent, EventSink, Operation, TracingEventSink};
use super::rate_limit::RequestRateLimiter;
use super::remote::RemoteComparer;
use super::revocation::RevocationCheck;
use super::secret::{self, SecretKeys, SecretMaterial};
use super::state_machine::{decide, Action, Decision, Evaluator, Reason};
use super::vice::{CaOutcome, CertificateAuthority};
use crate::config::AppConfig;
use crate::models::{
    AnnotationPatch, CertState, Certificate, CertificateMaterial, Ingress, Secret,
};
use crate::utils::{ViceError, ViceResult};

/// Read and write access to Secrets
#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn get(&self, namespace: &str, name: &str) -> ViceResult<Option<Secret>>;
    async fn put(&self, secret: Secret) -> ViceResult<()>;
}

/// Write access to ingress annotations
#[async_trait]
pub trait IngressStore: Send + Sync {
    async fn update_annotations(
        &self,
        namespace: &str,
        name: &str,
        patch: &AnnotationPatch,
    ) -> ViceResult<()>;
}

/// Schedules another reconciliation of an ingress
#[async_trait]
pub trait Scheduler: Send + Sync {
    async fn requeue(&self, key: &str, after: Duration);
}

/// Tunables of the reconciliation loop
#[derive(Debug, Clone)]
pub struct ReconcilerOptions {
    pub min_validity_days: u32,
    pub resync_period: Duration,
    pub pending_retry: Duration,
    pub validate_remote: bool,
    pub requests_per_hour_per_host: u32,
    pub intermediate_certificate: Option<Certificate>,
    pub root_certificates: Vec<Certificate>,
}

impl Default for ReconcilerOptions {
    fn default() -> Self {
        Self {
            min_validity_days: 30,
            resync_period: Duration::from_secs(300),
            pending_retry: Duration::from_secs(60),
            validate_remote: false,
            requests_per_hour_per_host: 0,
            intermediate_certificate: None,
            root_certificates: Vec::new(),
        }
    }
}

impl ReconcilerOptions {
    /// Options from the application configuration, reading the configured certificate files
    pub fn from_config(config: &AppConfig) -> ViceResult<Self> {
        let certificates = &config.certificates;
        Ok(Self {
            min_validity_days: certificates.min_validity_days,
            resync_period: Duration::from_secs(certificates.resync_period_secs),
            pending_retry: Duration::from_secs(certificates.pending_retry_secs),
            validate_remote: certificates.validate_remote,
            requests_per_hour_per_host: config.rate_limit.requests_per_hour_per_host,
            intermediate_certificate: certificates
                .load_intermediate_certificate()
                .map_err(|e| ViceError::Config(format!("{:#}", e)))?,
            root_certificates: certificates
                .load_root_certificates()
                .map_err(|e| ViceError::Config(format!("{:#}", e)))?,
        })
    }
}

/// What happened to one host during a cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostStatus {
    /// Nothing to do
    Steady,
    /// A new certificate was written to the Secret
    Issued,
    /// The CA queued the request under this transaction id
    Pending(String),
    /// The CA still works on a pending transaction
    Waiting,
    /// The CA request quota, local or at the CA, is used up
    RateLimited,
    /// The cycle failed with this error
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostOutcome {
    pub host: String,
    pub secret: String,
    pub action: Action,
    pub status: HostStatus,
}

/// Drives the certificate lifecycle of managed ingresses
pub struct Reconciler {
    ca: Arc<dyn CertificateAuthority>,
    evaluator: Evaluator,
    secrets: Arc<dyn SecretStore>,
    ingresses: Arc<dyn IngressStore>,
    scheduler: Arc<dyn Scheduler>,
    events: Arc<dyn EventSink>,
    rate_limiter: RequestRateLimiter,
    remote: Option<RemoteComparer>,
    options: ReconcilerOptions,
}

/// The host being worked on and where its material lives
struct HostContext<'a> {
    ingress: &'a Ingress,
    host: &'a str,
    keys: SecretKeys,
    secret: Secret,
}

impl HostContext<'_> {
    fn event_operation(&self, operation: Operation, success: bool) -> CertificateEvent {
        CertificateEvent::Operation {
            ingress: self.ingress.key(),
            host: self.host.to_string(),
            operation,
            success,
        }
    }
}

impl Reconciler {
    pub fn new(
        ca: Arc<dyn CertificateAuthority>,
        revocation: Arc<dyn RevocationCheck>,
        secrets: Arc<dyn SecretStore>,
        ingresses: Arc<dyn IngressStore>,
        scheduler: Arc<dyn Scheduler>,
        options: ReconcilerOptions,
    ) -> Self {
        Self {
            ca,
            evaluator: Evaluator::new(revocation, options.min_validity_days),
            secrets,
            ingresses,
            scheduler,
            events: Arc::new(TracingEventSink),
            rate_limiter: RequestRateLimiter::new(options.requests_per_hour_per_host),
            remote: None,
            options,
        }
    }

    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Compare steady certificates with the ones the hosts serve
    pub fn with_remote(mut self, remote: RemoteComparer) -> Self {
        self.remote = Some(remote);
        self
    }

    /// Reconcile every TLS host of a managed ingress.
    ///
    /// Unmanaged ingresses are skipped. A replace request is cleared once
    /// every host went through without failure.
    pub async fn reconcile_ingress(&self, ingress: &Ingress) -> ViceResult<Vec<HostOutcome>> {
        if !ingress.is_managed() {
            tracing::debug!(ingress = %ingress.key(), "Ingress is not managed, skipping");
            return Ok(Vec::new());
        }

        let keys = SecretKeys::from_annotations(&ingress.annotations);
        let mut cycles = Vec::new();

        for tls in &ingress.tls {
            let Some(secret_name) = tls.secret_name.as_deref().filter(|s| !s.is_empty()) else {
                tracing::warn!(ingress = %ingress.key(), "TLS entry without secretName, skipping");
                continue;
            };
            let Some(host) = tls.hosts.first() else {
                continue;
            };

            // Further hosts of the entry share the Secret and become SANs
            let sans = &tls.hosts[1..];
            let keys = &keys;
            cycles.push(async move {
                match self.reconcile_host(ingress, host, sans, secret_name, keys).await {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        tracing::error!(ingress = %ingress.key(), host = %host, error = %e, kind = e.kind(), "Reconciliation failed");
                        let after = if e.is_transient() {
                            self.options.pending_retry
                        } else {
                            self.options.resync_period
                        };
                        self.scheduler.requeue(&ingress.key(), after).await;
                        HostOutcome {
                            host: host.clone(),
                            secret: secret_name.to_string(),
                            action: Action::None,
                            status: HostStatus::Failed(e.to_string()),
                        }
                    }
                }
            });
        }

        // Each TLS entry owns its Secret, so the entries are independent
        let outcomes = join_all(cycles).await;
        self.rate_limiter.cleanup();

        let failed = outcomes
            .iter()
            .any(|o| !matches!(o.status, HostStatus::Steady | HostStatus::Issued));
        if ingress.replace_requested() && !failed {
            let mut patch = AnnotationPatch::new();
            patch.clear_replace();
            self.ingresses
                .update_annotations(&ingress.namespace, &ingress.name, &patch)
                .await?;
            tracing::info!(ingress = %ingress.key(), "Certificate replacement finished");
        }

        Ok(outcomes)
    }

    /// Run one cycle for `host`, whose certificate lives in `secret_name`
    pub async fn reconcile_host(
        &self,
        ingress: &Ingress,
        host: &str,
        sans: &[String],
        secret_name: &str,
        keys: &SecretKeys,
    ) -> ViceResult<HostOutcome> {
        let mut material = CertificateMaterial::new(host, sans)?;
        material.intermediate_certificate = self.options.intermediate_certificate.clone();
        material.root_certificates = self.options.root_certificates.clone();

        let secret = self
            .secrets
            .get(&ingress.namespace, secret_name)
            .await?
            .unwrap_or_else(|| Secret::new(&ingress.namespace, secret_name));

        let decoded = secret::decode(&secret, keys);
        if let Err(ref e) = decoded {
            tracing::debug!(host = %host, secret = %secret.key(), error = %e, "Secret holds no usable material");
        }

        let host_state = ingress.host_state(material.host());
        let evaluation = self
            .evaluator
            .evaluate(&decoded, &material, host_state, ingress.replace_requested())
            .await;
        let decision = decide(&evaluation);

        tracing::info!(
            ingress = %ingress.key(),
            host = %host,
            action = %decision.action,
            reason = %decision.reason,
            "Certificate decision"
        );

        if let Ok(SecretMaterial {
            certificate,
            private_key,
        }) = decoded
        {
            material.certificate = certificate;
            material.private_key = private_key;
        }

        let normalized_host = material.host().to_string();
        let mut ctx = HostContext {
            ingress,
            host: &normalized_host,
            keys: keys.clone(),
            secret,
        };

        if decision.reason == Reason::Revoked {
            self.events
                .record(CertificateEvent::Revoked {
                    ingress: ingress.key(),
                    host: normalized_host.clone(),
                })
                .await;
        }

        let status = self.execute(&mut ctx, &mut material, &decision).await?;

        Ok(HostOutcome {
            host: normalized_host.clone(),
            secret: secret_name.to_string(),
            action: decision.action,
            status,
        })
    }

    async fn execute(
        &self,
        ctx: &mut HostContext<'_>,
        material: &mut CertificateMaterial,
        decision: &Decision,
    ) -> ViceResult<HostStatus> {
        if decision.action == Action::None {
            self.compare_remote(ctx, material).await;
            if decision.clear_state {
                let mut patch = AnnotationPatch::new();
                patch.clear_state(ctx.host);
                self.patch(ctx, &patch).await?;
            }
            self.requeue(ctx, self.options.resync_period).await;
            return Ok(HostStatus::Steady);
        }

        // Polling a pending transaction requests no new certificate
        let new_request = matches!(
            decision.action,
            Action::Enroll | Action::Renew | Action::Replace
        );
        if new_request && !self.rate_limiter.check(ctx.host) {
            tracing::warn!(host = %ctx.host, action = %decision.action, "CA request quota exhausted");
            return Ok(self.rate_limited(ctx).await);
        }

        if decision.clear_state {
            let mut patch = AnnotationPatch::new();
            patch.clear_state(ctx.host);
            self.patch(ctx, &patch).await?;
        }

        match &decision.action {
            Action::None => Ok(HostStatus::Steady),
            Action::Enroll => self.request(ctx, material, Operation::Enroll).await,
            Action::Renew => {
                // Renewal references the current certificate, without one enroll afresh
                let operation = if material.certificate.is_some() {
                    Operation::Renew
                } else {
                    Operation::Enroll
                };
                self.request(ctx, material, operation).await
            }
            Action::Replace => {
                let operation = if material.certificate.is_some() {
                    Operation::Replace
                } else {
                    Operation::Enroll
                };
                self.request(ctx, material, operation).await
            }
            Action::Approve(tid) => {
                self.resume(ctx, material, tid, Operation::Approve).await
            }
            Action::Pickup(tid) => self.resume(ctx, material, tid, Operation::Pickup).await,
        }
    }

    /// Submit a new certificate request
    async fn request(
        &self,
        ctx: &mut HostContext<'_>,
        material: &mut CertificateMaterial,
        operation: Operation,
    ) -> ViceResult<HostStatus> {
        let result = match operation {
            Operation::Renew => self.ca.renew(material).await,
            Operation::Replace => self.ca.replace(material).await,
            _ => self.ca.enroll(material).await,
        };

        match result {
            Ok(CaOutcome::Issued(_)) => {
                self.store_certificate(ctx, material).await?;
                self.events.record(ctx.event_operation(operation, true)).await;
                self.requeue(ctx, self.options.resync_period).await;
                Ok(HostStatus::Issued)
            }
            Ok(CaOutcome::Pending(tid)) => {
                let key = material.private_key.as_ref().ok_or_else(|| {
                    ViceError::Internal("private key missing after request".to_string())
                })?;
                secret::stage_pending_key(&mut ctx.secret, &ctx.keys, key)?;
                self.secrets.put(ctx.secret.clone()).await?;

                let mut patch = AnnotationPatch::new();
                patch.set_state(ctx.host, CertState::Approve, Some(tid.as_str()));
                self.patch(ctx, &patch).await?;

                self.events.record(ctx.event_operation(operation, true)).await;
                self.requeue(ctx, self.options.pending_retry).await;
                Ok(HostStatus::Pending(tid))
            }
            Err(ViceError::RateLimited(message)) => {
                tracing::warn!(host = %ctx.host, operation = %operation, message = %message, "CA refused the request, quota exhausted");
                self.events.record(ctx.event_operation(operation, false)).await;
                Ok(self.rate_limited(ctx).await)
            }
            Err(e) => self.fail(ctx, operation, e).await,
        }
    }

    /// Continue a pending transaction
    async fn resume(
        &self,
        ctx: &mut HostContext<'_>,
        material: &mut CertificateMaterial,
        tid: &str,
        operation: Operation,
    ) -> ViceResult<HostStatus> {
        let Some(staged_key) = secret::pending_key(&ctx.secret, &ctx.keys)? else {
            // Without the key of the request the issued certificate is useless
            tracing::error!(host = %ctx.host, transaction_id = %tid, "No staged key for pending transaction, starting over");
            let mut patch = AnnotationPatch::new();
            patch.clear_state(ctx.host);
            self.patch(ctx, &patch).await?;
            self.events.record(ctx.event_operation(operation, false)).await;
            self.requeue(ctx, self.options.pending_retry).await;
            return Ok(HostStatus::Failed(format!(
                "no staged key for transaction {}",
                tid
            )));
        };

        material.transaction_id = Some(tid.to_string());
        let result = match operation {
            Operation::Approve => self.ca.approve(material).await,
            _ => self.ca.pickup(material).await,
        };

        match result {
            Ok(_) => {
                material.private_key = Some(staged_key);
                self.store_certificate(ctx, material).await?;
                self.events.record(ctx.event_operation(operation, true)).await;
                self.requeue(ctx, self.options.resync_period).await;
                Ok(HostStatus::Issued)
            }
            Err(ViceError::ApprovalPending(_)) => {
                tracing::info!(host = %ctx.host, transaction_id = %tid, "Approved, waiting for pickup");
                let mut patch = AnnotationPatch::new();
                patch.set_state(ctx.host, CertState::Pickup, Some(tid));
                self.patch(ctx, &patch).await?;
                self.events.record(ctx.event_operation(operation, true)).await;
                self.requeue(ctx, self.options.pending_retry).await;
                Ok(HostStatus::Waiting)
            }
            Err(ViceError::NotYetApproved(_)) => {
                tracing::info!(host = %ctx.host, transaction_id = %tid, "Certificate not released yet");
                self.requeue(ctx, self.options.pending_retry).await;
                Ok(HostStatus::Waiting)
            }
            Err(ViceError::RateLimited(message)) => {
                tracing::warn!(host = %ctx.host, operation = %operation, transaction_id = %tid, message = %message, "CA refused the request, quota exhausted");
                self.events.record(ctx.event_operation(operation, false)).await;
                Ok(self.rate_limited(ctx).await)
            }
            Err(e) => self.fail(ctx, operation, e).await,
        }
    }

    /// Persist an issued certificate and drop the pending state
    async fn store_certificate(
        &self,
        ctx: &mut HostContext<'_>,
        material: &CertificateMaterial,
    ) -> ViceResult<()> {
        secret::encode(&mut ctx.secret, &ctx.keys, material)?;
        self.secrets.put(ctx.secret.clone()).await?;

        let mut patch = AnnotationPatch::new();
        patch.clear_state(ctx.host);
        self.patch(ctx, &patch).await?;

        if let Some(ref certificate) = material.certificate {
            tracing::info!(
                host = %ctx.host,
                secret = %ctx.secret.key(),
                serial = %certificate.serial_hex(),
                not_after = %certificate.not_after(),
                "Stored certificate"
            );
        }
        Ok(())
    }

    async fn fail(
        &self,
        ctx: &HostContext<'_>,
        operation: Operation,
        error: ViceError,
    ) -> ViceResult<HostStatus> {
        self.events.record(ctx.event_operation(operation, false)).await;

        if error.is_transient() {
            tracing::warn!(host = %ctx.host, operation = %operation, error = %error, "CA operation failed, retrying later");
            self.requeue(ctx, self.options.pending_retry).await;
        } else {
            tracing::error!(host = %ctx.host, operation = %operation, error = %error, kind = error.kind(), "CA operation failed");
            self.requeue(ctx, self.options.resync_period).await;
        }

        Ok(HostStatus::Failed(error.to_string()))
    }

    /// Report an exhausted quota, local or at the CA, and retry later
    async fn rate_limited(&self, ctx: &HostContext<'_>) -> HostStatus {
        self.events
            .record(CertificateEvent::RateLimitReached {
                ingress: ctx.ingress.key(),
                host: ctx.host.to_string(),
            })
            .await;
        self.requeue(ctx, self.options.pending_retry).await;
        HostStatus::RateLimited
    }

    async fn compare_remote(&self, ctx: &HostContext<'_>, material: &CertificateMaterial) {
        if !self.options.validate_remote {
            return;
        }
        let (Some(remote), Some(certificate)) = (&self.remote, &material.certificate) else {
            return;
        };
        if !remote.remote_matches(ctx.host, certificate).await {
            self.events
                .record(CertificateEvent::RemoteMismatch {
                    ingress: ctx.ingress.key(),
                    host: ctx.host.to_string(),
                })
                .await;
        }
    }

    async fn patch(&self, ctx: &HostContext<'_>, patch: &AnnotationPatch) -> ViceResult<()> {
        if patch.is_empty() {
            return Ok(());
        }
        self.ingresses
            .update_annotations(&ctx.ingress.namespace, &ctx.ingress.name, patch)
            .await
    }

    async fn requeue(&self, ctx: &HostContext<'_>, after: Duration) {
        self.scheduler.requeue(&ctx.ingress.key(), after).await;
    }
}
