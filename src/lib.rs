//! vice-president library
//!
//! Keeps TLS certificates issued by the Symantec VICE CA in sync with the
//! Secrets referenced by Kubernetes ingresses: validates stored material,
//! checks revocation, and drives enroll, renew, approve, pickup and replace.

pub mod config;
pub mod models;
pub mod services;
pub mod utils;

pub use config::AppConfig;
pub use models::{Certificate, CertificateMaterial, Ingress, Secret};
pub use services::{Reconciler, ReconcilerOptions, ViceClient};
pub use utils::{ViceError, ViceResult};
