//! Certificate lifecycle services

pub mod csr;
pub mod events;
pub mod ocsp;
pub mod rate_limit;
pub mod reconciler;
pub mod remote;
pub mod revocation;
pub mod secret;
pub mod state_machine;
pub mod validator;
pub mod vice;

pub use events::{CertificateEvent, EventSink, Operation, TracingEventSink};
pub use ocsp::OcspCertStatus;
pub use rate_limit::RequestRateLimiter;
pub use reconciler::{
    HostOutcome, HostStatus, IngressStore, Reconciler, ReconcilerOptions, Scheduler, SecretStore,
};
pub use remote::RemoteComparer;
pub use revocation::{IssuerInfo, RevocationCheck, RevocationChecker};
pub use secret::{SecretKeys, SecretMaterial};
pub use state_machine::{decide, Action, Decision, Evaluation, Evaluator, MaterialCondition, Reason};
pub use vice::{CaOutcome, CertificateAuthority, ViceClient};
