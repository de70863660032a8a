//! Mock collaborators for testing
//!
//! In-memory implementations of the stores, scheduler, event sink, CA and
//! revocation check so the reconciler can run without a cluster or network.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;

use vice_president::models::{AnnotationPatch, Certificate, CertificateMaterial, Ingress, Secret};
use vice_president::services::{
    CaOutcome, CertificateAuthority, CertificateEvent, EventSink, IngressStore, Operation,
    RevocationCheck, Scheduler, SecretStore,
};
use vice_president::{ViceError, ViceResult};

/// Secrets kept in a map keyed by `namespace/name`
#[derive(Default, Clone)]
pub struct InMemorySecretStore {
    secrets: Arc<RwLock<HashMap<String, Secret>>>,
    puts: Arc<RwLock<usize>>,
    unavailable: Arc<RwLock<bool>>,
}

impl InMemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, secret: Secret) {
        self.secrets.write().unwrap().insert(secret.key(), secret);
    }

    pub fn secret(&self, namespace: &str, name: &str) -> Option<Secret> {
        self.secrets
            .read()
            .unwrap()
            .get(&format!("{}/{}", namespace, name))
            .cloned()
    }

    /// Number of writes so far
    pub fn put_count(&self) -> usize {
        *self.puts.read().unwrap()
    }

    /// Fail every read as if the API server were unreachable
    pub fn set_unavailable(&self, unavailable: bool) {
        *self.unavailable.write().unwrap() = unavailable;
    }
}

#[async_trait]
impl SecretStore for InMemorySecretStore {
    async fn get(&self, namespace: &str, name: &str) -> ViceResult<Option<Secret>> {
        if *self.unavailable.read().unwrap() {
            return Err(ViceError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "secret store unavailable",
            )));
        }
        Ok(self.secret(namespace, name))
    }

    async fn put(&self, secret: Secret) -> ViceResult<()> {
        *self.puts.write().unwrap() += 1;
        self.insert(secret);
        Ok(())
    }
}

/// Ingress annotations kept in memory, patches applied in place
#[derive(Default, Clone)]
pub struct InMemoryIngressStore {
    annotations: Arc<RwLock<HashMap<String, BTreeMap<String, String>>>>,
    patches: Arc<RwLock<Vec<AnnotationPatch>>>,
}

impl InMemoryIngressStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, ingress: &Ingress) {
        self.annotations
            .write()
            .unwrap()
            .insert(ingress.key(), ingress.annotations.clone());
    }

    pub fn annotations(&self, namespace: &str, name: &str) -> BTreeMap<String, String> {
        self.annotations
            .read()
            .unwrap()
            .get(&format!("{}/{}", namespace, name))
            .cloned()
            .unwrap_or_default()
    }

    /// The ingress as stored, with patched annotations
    pub fn refreshed(&self, ingress: &Ingress) -> Ingress {
        let mut refreshed = ingress.clone();
        refreshed.annotations = self.annotations(&ingress.namespace, &ingress.name);
        refreshed
    }

    pub fn patches(&self) -> Vec<AnnotationPatch> {
        self.patches.read().unwrap().clone()
    }
}

#[async_trait]
impl IngressStore for InMemoryIngressStore {
    async fn update_annotations(
        &self,
        namespace: &str,
        name: &str,
        patch: &AnnotationPatch,
    ) -> ViceResult<()> {
        let mut annotations = self.annotations.write().unwrap();
        let entry = annotations
            .entry(format!("{}/{}", namespace, name))
            .or_default();
        patch.apply(entry);
        self.patches.write().unwrap().push(patch.clone());
        Ok(())
    }
}

/// Scheduler remembering every requeue
#[derive(Default, Clone)]
pub struct RecordingScheduler {
    requeues: Arc<RwLock<Vec<(String, Duration)>>>,
}

impl RecordingScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn requeues(&self) -> Vec<(String, Duration)> {
        self.requeues.read().unwrap().clone()
    }

    pub fn last(&self) -> Option<(String, Duration)> {
        self.requeues.read().unwrap().last().cloned()
    }
}

#[async_trait]
impl Scheduler for RecordingScheduler {
    async fn requeue(&self, key: &str, after: Duration) {
        self.requeues
            .write()
            .unwrap()
            .push((key.to_string(), after));
    }
}

/// Event sink collecting events
#[derive(Default, Clone)]
pub struct RecordingEventSink {
    events: Arc<RwLock<Vec<CertificateEvent>>>,
}

impl RecordingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<CertificateEvent> {
        self.events.read().unwrap().clone()
    }

    /// Operations reported with their success flag
    pub fn operations(&self) -> Vec<(Operation, bool)> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                CertificateEvent::Operation {
                    operation, success, ..
                } => Some((operation, success)),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl EventSink for RecordingEventSink {
    async fn record(&self, event: CertificateEvent) {
        self.events.write().unwrap().push(event);
    }
}

/// Revocation check with a fixed answer
#[derive(Default, Clone)]
pub struct StaticRevocation {
    revoked: Arc<RwLock<bool>>,
    calls: Arc<RwLock<usize>>,
}

impl StaticRevocation {
    pub fn new(revoked: bool) -> Self {
        Self {
            revoked: Arc::new(RwLock::new(revoked)),
            calls: Arc::new(RwLock::new(0)),
        }
    }

    pub fn set_revoked(&self, revoked: bool) {
        *self.revoked.write().unwrap() = revoked;
    }

    pub fn calls(&self) -> usize {
        *self.calls.read().unwrap()
    }
}

#[async_trait]
impl RevocationCheck for StaticRevocation {
    async fn is_revoked(&self, _cert: &Certificate) -> bool {
        *self.calls.write().unwrap() += 1;
        *self.revoked.read().unwrap()
    }
}

/// Scripted answer of the mock CA
#[derive(Debug, Clone)]
pub enum MockCaReply {
    /// Issue a certificate for the material's host and SANs
    Issue,
    /// Queue the request under this transaction id
    Pending(String),
    /// Fail with a service error
    Fail(String),
    /// Fail with a rate limit error
    RateLimited,
    /// Answer with neither certificate nor transaction id
    Empty,
    /// Approval accepted, certificate not ready
    ApprovalPending,
    /// Certificate not released yet
    NotYetApproved,
}

/// Certificate authority answering from a script, issuing rcgen certificates
#[derive(Default, Clone)]
pub struct MockCertificateAuthority {
    replies: Arc<RwLock<VecDeque<MockCaReply>>>,
    calls: Arc<RwLock<Vec<(Operation, Option<String>)>>>,
    /// Keys of queued requests, standing in for their CSRs
    pending_keys: Arc<RwLock<HashMap<String, rsa::RsaPrivateKey>>>,
}

impl MockCertificateAuthority {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the answer to the next call; calls without a queued answer issue
    pub fn reply(&self, reply: MockCaReply) -> &Self {
        self.replies.write().unwrap().push_back(reply);
        self
    }

    /// Operations called with the transaction id they carried
    pub fn calls(&self) -> Vec<(Operation, Option<String>)> {
        self.calls.read().unwrap().clone()
    }

    fn next(&self, operation: Operation, material: &CertificateMaterial) -> MockCaReply {
        self.calls
            .write()
            .unwrap()
            .push((operation, material.transaction_id.clone()));
        self.replies
            .write()
            .unwrap()
            .pop_front()
            .unwrap_or(MockCaReply::Issue)
    }

    /// Generate a key the way a real request does and answer from the script
    async fn request(
        &self,
        operation: Operation,
        material: &mut CertificateMaterial,
    ) -> ViceResult<CaOutcome> {
        let key = vice_president::services::csr::generate_private_key().await?;
        material.private_key = Some(key);

        match self.next(operation, material) {
            MockCaReply::Issue => {
                let certificate = issue(material);
                material.certificate = Some(certificate.clone());
                material.transaction_id = None;
                Ok(CaOutcome::Issued(certificate))
            }
            MockCaReply::Pending(tid) => {
                if let Some(ref key) = material.private_key {
                    self.pending_keys
                        .write()
                        .unwrap()
                        .insert(tid.clone(), key.clone());
                }
                material.transaction_id = Some(tid.clone());
                Ok(CaOutcome::Pending(tid))
            }
            other => Err(error_for(other, material)),
        }
    }

    fn transaction(
        &self,
        operation: Operation,
        material: &mut CertificateMaterial,
    ) -> ViceResult<Certificate> {
        let Some(tid) = material.pending_transaction().map(str::to_string) else {
            return Err(ViceError::MissingTransactionId);
        };
        match self.next(operation, material) {
            MockCaReply::Issue => {
                // Sign for the key of the original request
                let key = self
                    .pending_keys
                    .write()
                    .unwrap()
                    .remove(&tid)
                    .unwrap_or_else(|| super::fixtures::leaf_key().clone());
                let certificate = issue_with(material, &key);
                material.certificate = Some(certificate.clone());
                material.transaction_id = None;
                Ok(certificate)
            }
            other => Err(error_for(other, material)),
        }
    }
}

fn issue(material: &CertificateMaterial) -> Certificate {
    let key = material
        .private_key
        .clone()
        .unwrap_or_else(|| super::fixtures::leaf_key().clone());
    issue_with(material, &key)
}

fn issue_with(material: &CertificateMaterial, key: &rsa::RsaPrivateKey) -> Certificate {
    let sans: Vec<&str> = material.sans().iter().map(String::as_str).collect();
    super::fixtures::CertificateBuilder::new(material.host())
        .sans(&sans)
        .valid_for_days(365)
        .build_with(key)
}

fn error_for(reply: MockCaReply, material: &CertificateMaterial) -> ViceError {
    let tid = material.transaction_id.clone().unwrap_or_default();
    match reply {
        MockCaReply::Fail(message) => ViceError::CaService(message),
        MockCaReply::RateLimited => ViceError::RateLimited("too many requests".to_string()),
        MockCaReply::ApprovalPending => ViceError::ApprovalPending(tid),
        MockCaReply::NotYetApproved => ViceError::NotYetApproved(tid),
        MockCaReply::Pending(_) | MockCaReply::Empty => ViceError::EmptyCaResponse,
        MockCaReply::Issue => ViceError::Internal("unexpected reply".to_string()),
    }
}

#[async_trait]
impl CertificateAuthority for MockCertificateAuthority {
    async fn enroll(&self, material: &mut CertificateMaterial) -> ViceResult<CaOutcome> {
        self.request(Operation::Enroll, material).await
    }

    async fn renew(&self, material: &mut CertificateMaterial) -> ViceResult<CaOutcome> {
        if material.certificate.is_none() {
            return Err(ViceError::Internal("renew requires the current certificate".to_string()));
        }
        self.request(Operation::Renew, material).await
    }

    async fn approve(&self, material: &mut CertificateMaterial) -> ViceResult<Certificate> {
        self.transaction(Operation::Approve, material)
    }

    async fn pickup(&self, material: &mut CertificateMaterial) -> ViceResult<Certificate> {
        self.transaction(Operation::Pickup, material)
    }

    async fn replace(&self, material: &mut CertificateMaterial) -> ViceResult<CaOutcome> {
        if material.certificate.is_none() {
            return Err(ViceError::Internal("replace requires the current certificate".to_string()));
        }
        self.request(Operation::Replace, material).await
    }
}
